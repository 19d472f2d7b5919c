//! [`RenewRateLimiter`]: throttles expiry-driven renewal storms with a
//! sliding window over recent attempt timestamps.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use token_manager_core::{Clock, TokenManagerError};

/// Number of trailing expiry-driven attempts the window tracks.
pub const WINDOW_SIZE: usize = 10;

/// If the window's span falls below this threshold, the limiter trips.
pub const THRESHOLD_MS: i64 = 30_000;

/// Tracks the timestamps of the last [`WINDOW_SIZE`] expiry-driven renewal
/// attempts (successful or suppressed) and trips once their span falls
/// below [`THRESHOLD_MS`], so a busy-looping renewal storm degrades to a
/// steady trickle of errors instead of hammering the authorization server.
pub struct RenewRateLimiter {
    clock: Arc<dyn Clock>,
    window: Mutex<VecDeque<i64>>,
}

impl std::fmt::Debug for RenewRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewRateLimiter").finish_non_exhaustive()
    }
}

impl RenewRateLimiter {
    /// Build a limiter driven by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            window: Mutex::new(VecDeque::with_capacity(WINDOW_SIZE)),
        }
    }

    /// Record this attempt and decide whether it's allowed to proceed.
    /// Returns `Err` (without rolling the attempt back out of the window)
    /// when the last [`WINDOW_SIZE`] attempts span less than
    /// [`THRESHOLD_MS`].
    pub async fn check_and_record(&self) -> Result<(), TokenManagerError> {
        let now = self.clock.now_ms();
        let mut window = self.window.lock().await;
        window.push_back(now);
        if window.len() > WINDOW_SIZE {
            window.pop_front();
        }

        if window.len() == WINDOW_SIZE {
            let span = now - *window.front().expect("window is non-empty");
            if span < THRESHOLD_MS {
                return Err(TokenManagerError::TooManyRenewRequests {
                    attempts: WINDOW_SIZE,
                    span_ms: span as u64,
                    threshold_ms: THRESHOLD_MS as u64,
                });
            }
        }
        Ok(())
    }
}
