use log::warn;
use std::future::Future;
use tokio::time::{Duration, sleep};

use crate::Result;

/// Unit of the linear backoff: attempt `n` waits `n × BACKOFF_UNIT` before
/// the next try.
pub const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Default ceiling on attempts per platform call. Bridges control-plane
/// blips (rolling restarts) while keeping the worst case around 15s asleep.
pub const DEFAULT_API_RETRIES: u32 = 5;

/// Runs `op` up to `max_attempts` times, sleeping `attempt × BACKOFF_UNIT`
/// after each transient failure. Non-transient errors return immediately;
/// once the ceiling is reached the last error is returned as-is.
pub async fn with_retries<T, F, Fut>(what: &str, max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = BACKOFF_UNIT * attempt;
                warn!(
                    "{what} failed (attempt {attempt}/{max_attempts}, retrying in {}s): {e}",
                    delay.as_secs()
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
