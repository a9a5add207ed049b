use std::future::Future;
use std::time::Duration;

use crate::core::errors::ApiError;

const RETRY_BACKOFF_MS: u64 = 200;

/// Runs `op` until it succeeds, fails with a non-transport error, or
/// `max_attempts` attempts have been made. The first call counts as an attempt.
pub async fn with_transport_retry<T, F, Fut>(
    max_attempts: u32,
    label: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transport() && attempt < attempts => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying",
                    label,
                    attempt,
                    attempts,
                    err
                );
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
