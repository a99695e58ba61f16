//! Rolling-window rate limiting for outbound calls.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rolling-window counter bounding how many calls start per window.
///
/// Every attempt, retries included, reserves a slot before its request goes
/// on the wire. A full window makes `acquire` sleep until the oldest stamp
/// ages out and then re-check, so no caller busy-polls. Timestamps come from
/// the tokio clock, which keeps the window testable under paused time.
pub struct RateWindow {
    limit: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateWindow {
    /// Create a window admitting `limit` call starts per `window`.
    ///
    /// A zero `limit` is raised to one so `acquire` always makes progress.
    pub fn new(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            window,
            stamps: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Reserve a slot, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while let Some(oldest) = stamps.front() {
                    if now.duration_since(*oldest) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }

                if stamps.len() < self.limit {
                    stamps.push_back(now);
                    return;
                }

                let oldest = *stamps
                    .front()
                    .expect("full window must have a front stamp");
                self.window - now.duration_since(oldest)
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}
