//! Retry-with-backoff for provider requests.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;

/// Transient failures get this many attempts in total.
pub const MAX_ATTEMPTS: u32 = 3;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(3);

/// Run `op` under the provider retry policy: up to three attempts with a
/// doubling backoff starting at 1s for transient failures, and a single
/// retry after 3s when the provider reports a rate limit. Application-level
/// errors are returned immediately.
pub async fn with_backoff<T, F, Fut>(what: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut attempt: u32 = 1;
    let mut rate_limit_retried = false;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() => {
                if rate_limit_retried {
                    return Err(err);
                }
                rate_limit_retried = true;
                log::warn!(
                    "{}: provider rate limit hit, retrying in {}s",
                    what,
                    RATE_LIMIT_BACKOFF.as_secs()
                );
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
            }
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                log::warn!(
                    "{}: transient failure (attempt {}/{}): {}",
                    what,
                    attempt,
                    MAX_ATTEMPTS,
                    err
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
