//! [`CrossTabSynchronizer`]: reacts to storage-change notifications from
//! other hosts sharing the same backing store, diffing old and new blobs
//! into `added`/`removed` events and re-arming expiration timers (spec
//! other tabs in a browser).
//!
//! A real browser's `storage` event has no native-process analogue, so
//! [`StorageChangeSource`] abstracts it; [`InProcessStorageChangeBus`] is
//! the native/test stand-in (other processes or in-process collaborators
//! publish onto it directly).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use token_manager_core::Clock;

use crate::event_bus::{Event, EventBus};
use crate::scheduler::ExpirationScheduler;
use crate::types::{blob_to_tokens, Token, TokenKey};

/// A single storage-change notification, mirroring the browser `StorageEvent`
/// shape: the key that changed (`None` meaning the whole storage area was
/// cleared), and its value before and after.
#[derive(Debug, Clone)]
pub struct StorageChangeEvent {
    /// The storage key that changed, or `None` for a wholesale clear.
    pub key: Option<String>,
    /// The value before the change, if any.
    pub old_value: Option<String>,
    /// The value after the change, if any.
    pub new_value: Option<String>,
}

/// A source of [`StorageChangeEvent`]s from outside this process's own
/// writes — other tabs in a browser, or other collaborators sharing a
/// backing store in this crate's native analogue.
pub trait StorageChangeSource: Send + Sync {
    /// Subscribe to future change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StorageChangeEvent>;
}

/// Native/test stand-in for the browser's cross-tab `storage` event: an
/// in-process broadcast channel other collaborators publish onto directly.
#[derive(Clone)]
pub struct InProcessStorageChangeBus {
    sender: broadcast::Sender<StorageChangeEvent>,
}

impl std::fmt::Debug for InProcessStorageChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessStorageChangeBus").finish_non_exhaustive()
    }
}

impl Default for InProcessStorageChangeBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl InProcessStorageChangeBus {
    /// Create a bus with the given broadcast channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a change notification to every subscriber.
    pub fn publish(&self, event: StorageChangeEvent) {
        let _ = self.sender.send(event);
    }
}

impl StorageChangeSource for InProcessStorageChangeBus {
    fn subscribe(&self) -> broadcast::Receiver<StorageChangeEvent> {
        self.sender.subscribe()
    }
}

fn parse_blob(raw: Option<&str>) -> HashMap<TokenKey, Token> {
    let Some(raw) = raw else {
        return HashMap::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return HashMap::new();
    };
    blob_to_tokens(&value).unwrap_or_default()
}

/// Owns the background task that listens for storage-change notifications
/// and reconciles this process's in-memory view (scheduler timers, event
/// bus) to match. Dropping it tears the listener down.
pub struct CrossTabSynchronizer {
    handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for CrossTabSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossTabSynchronizer").finish_non_exhaustive()
    }
}

impl CrossTabSynchronizer {
    /// Start listening on `source` for changes to `storage_key`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        source: Arc<dyn StorageChangeSource>,
        storage_key: String,
        delay_ms: u64,
        bus: EventBus,
        scheduler: Arc<ExpirationScheduler>,
        clock: Arc<dyn Clock>,
        expire_early_seconds: u32,
        local_clock_offset_ms: i64,
    ) -> Self {
        let mut rx = source.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if let Some(changed_key) = &event.key {
                    if changed_key != &storage_key {
                        continue;
                    }
                }
                if event.old_value == event.new_value {
                    continue;
                }

                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }

                let old_map = parse_blob(event.old_value.as_deref());
                let new_map = parse_blob(event.new_value.as_deref());

                for (key, new_token) in &new_map {
                    let changed = match old_map.get(key) {
                        Some(old_token) => old_token != new_token,
                        None => true,
                    };
                    if changed {
                        bus.emit(Event::Added(key.clone(), new_token.clone()));
                    }
                }
                for (key, old_token) in &old_map {
                    if !new_map.contains_key(key) {
                        bus.emit(Event::Removed(key.clone(), old_token.clone()));
                    }
                }

                scheduler.cancel_all().await;
                for (key, token) in &new_map {
                    scheduler
                        .arm(
                            key.clone(),
                            token.clone(),
                            Arc::clone(&clock),
                            expire_early_seconds,
                            local_clock_offset_ms,
                            bus.clone(),
                        )
                        .await;
                }
            }
        });

        Self { handle }
    }
}

impl Drop for CrossTabSynchronizer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
