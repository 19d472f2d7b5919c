//! [`RenewCoordinator`]: single-flight token renewal.
//!
//! Concurrent `renew()` calls for the same key share one in-flight attempt
//! via `futures::future::Shared`, a hard dependency of this crate since
//! single-flight renewal is core functionality rather than an optional
//! layer (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use token_manager_core::{Clock, RenewError};

use crate::config::TokenManagerConfig;
use crate::event_bus::{Event, EventBus};
use crate::scheduler::{is_expired, ExpirationScheduler};
use crate::store::TokenStore;
use crate::types::{Token, TokenKey};

/// The caller's collaborator for actually talking to the authorization
/// server. This crate only coordinates *when* and *how many times* a
/// renewal happens; it has no opinion on the wire protocol.
#[async_trait]
pub trait TokenClient: Send + Sync + std::fmt::Debug {
    /// Obtain a fresh token for `key`, e.g. by redeeming a refresh token or
    /// re-running the silent-auth flow.
    async fn renew(&self, key: &TokenKey) -> Result<Token, RenewError>;
}

type RenewFuture = Shared<BoxFuture<'static, Result<Token, RenewError>>>;

/// Coordinates renewal attempts so that concurrent callers for the same key
/// share a single in-flight request, and applies the resulting success or
/// failure back to the store.
pub struct RenewCoordinator {
    client: Arc<dyn TokenClient>,
    store: TokenStore,
    scheduler: Arc<ExpirationScheduler>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: Arc<TokenManagerConfig>,
    pending: Mutex<HashMap<TokenKey, RenewFuture>>,
}

impl std::fmt::Debug for RenewCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewCoordinator").finish_non_exhaustive()
    }
}

impl RenewCoordinator {
    /// Build a coordinator around the given collaborator and shared state.
    #[must_use]
    pub fn new(
        client: Arc<dyn TokenClient>,
        store: TokenStore,
        scheduler: Arc<ExpirationScheduler>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: Arc<TokenManagerConfig>,
    ) -> Self {
        Self {
            client,
            store,
            scheduler,
            bus,
            clock,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Renew the token at `key`. If a renewal for `key` is already
    /// in-flight, await that one instead of starting a second request
    /// (at most one in-flight collaborator call per key).
    pub async fn renew(self: &Arc<Self>, key: TokenKey) -> Result<Token, RenewError> {
        let shared = {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.get(&key) {
                existing.clone()
            } else {
                let this = Arc::clone(self);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = this.client.renew(&task_key).await;
                    this.apply_result(&task_key, result.clone()).await;
                    result
                });
                let fut: BoxFuture<'static, Result<Token, RenewError>> = Box::pin(async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(_) => Err(RenewError::AuthSdk {
                            token_key: None,
                            error_code: "renewal_task_panicked".to_string(),
                            error_summary: "the renewal task terminated unexpectedly".to_string(),
                            error_link: None,
                            error_id: None,
                            error_causes: Vec::new(),
                        }),
                    }
                });
                let shared = fut.shared();
                pending.insert(key.clone(), shared.clone());
                shared
            }
        };
        shared.await
    }

    /// Apply a completed renewal's outcome to the store and event bus, then
    /// clear the in-flight entry so the next call starts a fresh attempt.
    async fn apply_result(&self, key: &TokenKey, result: Result<Token, RenewError>) {
        match result {
            Ok(new_token) => self.apply_success(key, new_token).await,
            Err(err) => self.apply_failure(key, err).await,
        }
        self.pending.lock().await.remove(key);
    }

    async fn apply_success(&self, key: &TokenKey, new_token: Token) {
        let mut map = match self.store.load().await {
            Ok(map) => map,
            Err(err) => {
                self.bus.emit(Event::Error(err));
                return;
            }
        };

        let Some(old_token) = map.remove(key) else {
            // The key was removed (e.g. by clear()) while the renewal was
            // in flight; the swap's atomicity check discards the result.
            tracing::debug!(%key, "discarding renewal result: key no longer stored");
            return;
        };

        map.insert(key.clone(), new_token.clone());
        if let Err(err) = self.store.save(&map).await {
            self.bus.emit(Event::Error(err));
            return;
        }

        self.scheduler
            .arm(
                key.clone(),
                new_token.clone(),
                Arc::clone(&self.clock),
                self.config.expire_early_seconds,
                self.config.local_clock_offset_ms,
                self.bus.clone(),
            )
            .await;

        // Order fixed by spec: renewed precedes the added/removed pair that
        // completes the swap.
        self.bus
            .emit(Event::Renewed(key.clone(), new_token.clone(), old_token.clone()));
        self.bus.emit(Event::Added(key.clone(), new_token));
        self.bus.emit(Event::Removed(key.clone(), old_token));
    }

    async fn apply_failure(&self, key: &TokenKey, err: RenewError) {
        let tagged = err.with_token_key(key.to_string());

        if let Ok(Some(current)) = self.store.get_one(key).await {
            if is_expired(
                &current,
                &*self.clock,
                self.config.expire_early_seconds,
                self.config.local_clock_offset_ms,
            ) {
                if let Ok(Some(removed)) = self.store.delete_one(key).await {
                    self.scheduler.cancel(key).await;
                    self.bus.emit(Event::Removed(key.clone(), removed));
                }
            }
        }

        self.bus
            .emit(Event::Error(token_manager_core::TokenManagerError::Renew(
                tagged,
            )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use token_manager_core::FixedClock;

    #[derive(Debug)]
    struct CountingClient {
        calls: AtomicUsize,
        outcome: Token,
    }

    #[async_trait]
    impl TokenClient for CountingClient {
        async fn renew(&self, _key: &TokenKey) -> Result<Token, RenewError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(self.outcome.clone())
        }
    }

    fn test_store() -> TokenStore {
        TokenStore::new(
            Arc::new(crate::storage::MemoryBackend::new()),
            "prefix".to_string(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_renewals_share_one_collaborator_call() {
        let key = TokenKey::new("accessToken");
        let store = test_store();
        store
            .set_one(
                key.clone(),
                Token::access_token("old", vec!["openid".to_string()], 1),
            )
            .await
            .unwrap();

        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            outcome: Token::access_token("new", vec!["openid".to_string()], 2_000_000_000),
        });

        let coordinator = Arc::new(RenewCoordinator::new(
            client.clone(),
            store.clone(),
            Arc::new(ExpirationScheduler::new()),
            EventBus::new(),
            Arc::new(FixedClock(0)),
            Arc::new(TokenManagerConfig::default()),
        ));

        let c1 = Arc::clone(&coordinator);
        let c2 = Arc::clone(&coordinator);
        let k1 = key.clone();
        let k2 = key.clone();

        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { c1.renew(k1).await }),
            tokio::spawn(async move { c2.renew(k2).await })
        );

        assert!(r1.unwrap().is_ok());
        assert!(r2.unwrap().is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let stored = store.get_one(&key).await.unwrap().unwrap();
        assert_eq!(stored, client.outcome);
    }

    #[derive(Debug)]
    struct FailingClient;

    #[async_trait]
    impl TokenClient for FailingClient {
        async fn renew(&self, _key: &TokenKey) -> Result<Token, RenewError> {
            Err(RenewError::OAuth {
                token_key: None,
                error_code: "invalid_grant".to_string(),
                error_summary: "refresh token expired".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn failed_renewal_emits_error_event() {
        let key = TokenKey::new("accessToken");
        let store = test_store();
        store
            .set_one(
                key.clone(),
                Token::access_token("old", vec!["openid".to_string()], 1),
            )
            .await
            .unwrap();

        let saw_error = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let saw_error2 = Arc::clone(&saw_error);
        let bus = EventBus::new();
        bus.on(EventKind::Error, move |_| {
            saw_error2.store(true, Ordering::SeqCst);
        });

        let coordinator = Arc::new(RenewCoordinator::new(
            Arc::new(FailingClient),
            store,
            Arc::new(ExpirationScheduler::new()),
            bus,
            Arc::new(FixedClock(0)),
            Arc::new(TokenManagerConfig::default()),
        ));

        let result = coordinator.renew(key).await;
        assert!(result.is_err());
        assert!(saw_error.load(Ordering::SeqCst));
    }
}
