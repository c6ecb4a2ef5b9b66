use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::Clock;

/// Sliding-window rate limiter: at most `max_requests` per `window`.
///
/// One limiter is built per data source and shared by every loop that calls
/// that source, so pacing is not scattered as inline sleeps.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    timestamps: Arc<Mutex<VecDeque<DateTime<Utc>>>>,
    max_requests: usize,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(name: &'static str, max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window: chrono::Duration::milliseconds(window.as_millis() as i64),
            clock,
        }
    }

    /// One request per `delay`: the first call passes at once, each later
    /// call waits until `delay` has elapsed since the previous one.
    pub fn spacing(name: &'static str, delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::new(name, 1, delay, clock)
    }

    pub async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = self.clock.now();

            while let Some(&front) = ts.front() {
                if now - front >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match ts.front() {
                Some(&oldest) if ts.len() >= self.max_requests => oldest,
                _ => {
                    ts.push_back(now);
                    return;
                }
            };

            let sleep_dur = (oldest + self.window - now).to_std().unwrap_or_default();
            drop(ts);
            tracing::debug!(
                "Rate limiter [{}]: waiting {:.1}s for provider slot",
                self.name,
                sleep_dur.as_secs_f64()
            );
            self.clock.sleep(sleep_dur).await;
        }
    }
}
