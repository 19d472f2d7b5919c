//! [`ExpirationScheduler`]: arms one background timer per token key, firing
//! an [`Event::Expired`] when a token's effective expiry passes. At most
//! one timer is ever live per key; re-arming cancels whatever was there
//! first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use token_manager_core::Clock;

use crate::event_bus::{Event, EventBus};
use crate::types::{Token, TokenKey};

/// Compute the effective expiry, in UNIX milliseconds: the token's
/// `expiresAt` (seconds), minus `expire_early_seconds` of headroom, minus
/// the configured local/server clock offset.
#[must_use]
pub fn effective_expiry_ms(token: &Token, expire_early_seconds: u32, local_clock_offset_ms: i64) -> i64 {
    token.expires_at * 1000 - i64::from(expire_early_seconds) * 1000 - local_clock_offset_ms
}

/// Whether `token` is expired right now, per `effective_expiry_ms`.
#[must_use]
pub fn is_expired(
    token: &Token,
    clock: &dyn Clock,
    expire_early_seconds: u32,
    local_clock_offset_ms: i64,
) -> bool {
    clock.now_ms() >= effective_expiry_ms(token, expire_early_seconds, local_clock_offset_ms)
}

/// Owns one timer task per armed token key.
#[derive(Default)]
pub struct ExpirationScheduler {
    timers: Mutex<HashMap<TokenKey, JoinHandle<()>>>,
}

impl std::fmt::Debug for ExpirationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationScheduler").finish_non_exhaustive()
    }
}

impl ExpirationScheduler {
    /// Create a scheduler with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer for `key`. If the effective expiry has
    /// already passed, the timer fires on the next scheduler tick rather
    /// than synchronously, keeping the call non-blocking.
    pub async fn arm(
        &self,
        key: TokenKey,
        token: Token,
        clock: Arc<dyn Clock>,
        expire_early_seconds: u32,
        local_clock_offset_ms: i64,
        bus: EventBus,
    ) {
        self.cancel(&key).await;

        let delay_ms = (effective_expiry_ms(&token, expire_early_seconds, local_clock_offset_ms)
            - clock.now_ms())
        .max(0) as u64;

        let fire_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            bus.emit(Event::Expired(fire_key, token));
        });

        self.timers.lock().await.insert(key, handle);
    }

    /// Cancel the timer for `key`, if one is armed. Returns whether a timer
    /// was actually cancelled.
    pub async fn cancel(&self, key: &TokenKey) -> bool {
        if let Some(handle) = self.timers.lock().await.remove(key) {
            handle.abort();
            true
        } else {
            false
        }
    }

    /// Cancel every armed timer, e.g. on `clear()` or facade teardown.
    pub async fn cancel_all(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Number of currently armed timers, for tests and diagnostics.
    pub async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}
