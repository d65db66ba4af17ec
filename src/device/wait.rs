//! Bounded polling used where the emulator gives no completion signal.

use std::future::Future;
use tokio::time::{Duration, Instant, sleep};

/// Screenshot files are polled every 100ms for up to 5 seconds.
pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `check` until it yields `Some`, sleeping `interval` between attempts.
///
/// The check always runs at least once, and once more at the deadline, so a
/// result that appears during the last sleep is not lost. Returns `None` when
/// `timeout` elapses. Uses tokio's clock, so tests can drive it with
/// `tokio::time::pause`.
pub async fn await_condition<T, F, Fut>(
    mut check: F,
    interval: Duration,
    timeout: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        sleep(interval.min(deadline - now)).await;
    }
}
