use std::future::Future;

use crate::{ImgCacheError, Result};

/// Attempt budget for response rewriting.
pub const REWRITE_ATTEMPTS: u32 = 5;

/// Run `op` up to `attempts` times with no inter-attempt delay, returning
/// the first success or the last error once the budget is exhausted.
pub async fn with_retries<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(attempt, attempts, error = %e, "attempt failed");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| ImgCacheError::InternalError("retry budget was zero".into())))
}
