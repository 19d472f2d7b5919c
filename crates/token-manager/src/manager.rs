//! [`TokenManager`]: the facade tying storage, scheduling, renewal, rate
//! limiting, and cross-tab sync together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use token_manager_core::{Clock, RenewError, SystemClock, TokenManagerError, TokenResult};

use crate::config::TokenManagerConfig;
use crate::cross_tab::{CrossTabSynchronizer, StorageChangeSource};
use crate::event_bus::{Event, EventBus, EventKind};
use crate::rate_limit::RenewRateLimiter;
use crate::renew::{RenewCoordinator, TokenClient};
use crate::scheduler::ExpirationScheduler;
use crate::storage::select_backend;
use crate::store::TokenStore;
use crate::types::{well_known_keys, Token, TokenKey};

/// The three well-known token slots [`TokenManager::get_tokens`] and
/// [`TokenManager::set_tokens`] operate on together.
#[derive(Debug, Clone, Default)]
pub struct TokenBundle {
    /// The ID token slot.
    pub id_token: Option<Token>,
    /// The access token slot.
    pub access_token: Option<Token>,
    /// The refresh token slot.
    pub refresh_token: Option<Token>,
}

impl TokenBundle {
    fn into_map(self) -> HashMap<TokenKey, Token> {
        let mut map = HashMap::new();
        if let Some(token) = self.id_token {
            map.insert(TokenKey::new(well_known_keys::ID_TOKEN), token);
        }
        if let Some(token) = self.access_token {
            map.insert(TokenKey::new(well_known_keys::ACCESS_TOKEN), token);
        }
        if let Some(token) = self.refresh_token {
            map.insert(TokenKey::new(well_known_keys::REFRESH_TOKEN), token);
        }
        map
    }
}

struct Inner {
    config: Arc<TokenManagerConfig>,
    store: TokenStore,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    scheduler: Arc<ExpirationScheduler>,
    coordinator: Arc<RenewCoordinator>,
    rate_limiter: RenewRateLimiter,
    callback_in_progress: AtomicBool,
    _cross_tab: Option<CrossTabSynchronizer>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let scheduler = Arc::clone(&self.scheduler);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                scheduler.cancel_all().await;
            });
        }
    }
}

/// Client-side OAuth/OIDC token manager: pluggable storage, expiration
/// scheduling, single-flight renewal, and cross-tab synchronization behind
/// one facade.
#[derive(Clone)]
pub struct TokenManager(Arc<Inner>);

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("backend", &self.0.store.backend_label())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Start building a manager from defaults.
    #[must_use]
    pub fn builder(client: Arc<dyn TokenClient>) -> TokenManagerBuilder {
        TokenManagerBuilder::new(client)
    }

    /// Subscribe to lifecycle events. See [`EventBus::on`].
    pub fn on<F>(&self, kind: EventKind, handler: F) -> crate::event_bus::SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.0.bus.on(kind, handler)
    }

    /// Backend label currently in use, for diagnostics.
    #[must_use]
    pub fn backend_label(&self) -> &'static str {
        self.0.store.backend_label()
    }

    /// Mark that an OAuth redirect callback is being processed. While set,
    /// [`Self::get`] and [`Self::get_tokens`] return
    /// [`TokenManagerError::CallbackInProgress`] rather than racing a
    /// concurrent token write.
    pub fn begin_callback(&self) {
        self.0.callback_in_progress.store(true, Ordering::SeqCst);
    }

    /// Clear the callback-in-progress flag set by [`Self::begin_callback`].
    pub fn end_callback(&self) {
        self.0.callback_in_progress.store(false, Ordering::SeqCst);
    }

    fn check_not_in_callback(&self) -> TokenResult<()> {
        if self.0.callback_in_progress.load(Ordering::SeqCst) {
            Err(TokenManagerError::CallbackInProgress)
        } else {
            Ok(())
        }
    }

    /// Whether `token` is expired right now, given this manager's configured
    /// expiry headroom and clock offset.
    #[must_use]
    pub fn has_expired(&self, token: &Token) -> bool {
        crate::scheduler::is_expired(
            token,
            &*self.0.clock,
            self.0.config.expire_early_seconds,
            self.0.config.local_clock_offset_ms,
        )
    }

    /// Store a token under `key`, validating its shape invariants, arming
    /// its expiration timer, and emitting `added`.
    pub async fn add(&self, key: TokenKey, token: Token) -> TokenResult<()> {
        token.validate(&key)?;
        self.0.store.set_one(key.clone(), token.clone()).await?;
        self.arm(key.clone(), token.clone()).await;
        self.0.bus.emit(Event::Added(key, token));
        Ok(())
    }

    /// Read the token stored under `key`. Returns `None` both when nothing
    /// is stored there and when the stored token has passed its effective
    /// expiry; use [`Self::remove`] to read an
    /// expired token's prior value instead.
    pub async fn get(&self, key: &TokenKey) -> TokenResult<Option<Token>> {
        self.check_not_in_callback()?;
        let token = self.0.store.get_one(key).await?;
        Ok(token.filter(|t| !self.has_expired(t)))
    }

    /// Remove the token under `key`, cancelling its timer and emitting
    /// `removed` if one was stored.
    pub async fn remove(&self, key: &TokenKey) -> TokenResult<Option<Token>> {
        let removed = self.0.store.delete_one(key).await?;
        if let Some(token) = &removed {
            self.0.scheduler.cancel(key).await;
            self.0.bus.emit(Event::Removed(key.clone(), token.clone()));
        }
        Ok(removed)
    }

    /// Remove every stored token, cancelling all timers and emitting
    /// `removed` once per key that was present.
    pub async fn clear(&self) -> TokenResult<()> {
        let cleared = self.0.store.clear_all().await?;
        self.0.scheduler.cancel_all().await;
        for (key, token) in cleared {
            self.0.bus.emit(Event::Removed(key, token));
        }
        Ok(())
    }

    /// Read the id/access/refresh token bundle, classifying stored tokens
    /// by their payload discriminant rather than by key name.
    pub async fn get_tokens(&self) -> TokenResult<TokenBundle> {
        self.check_not_in_callback()?;
        let map = self.0.store.load().await?;
        let mut bundle = TokenBundle::default();
        for token in map.into_values() {
            match token.discriminant_key() {
                well_known_keys::ID_TOKEN => bundle.id_token = Some(token),
                well_known_keys::ACCESS_TOKEN => bundle.access_token = Some(token),
                well_known_keys::REFRESH_TOKEN => bundle.refresh_token = Some(token),
                _ => unreachable!("discriminant_key only returns the three well-known names"),
            }
        }
        Ok(bundle)
    }

    /// Write the id/access/refresh token bundle verbatim in a single
    /// backend write, diffing against what was previously stored to emit
    /// `added` for every new or changed slot and `removed` for every
    /// dropped slot. Writes the bundle as given without shape validation,
    /// unlike `add`, which validates (see DESIGN.md).
    pub async fn set_tokens(&self, bundle: TokenBundle) -> TokenResult<()> {
        let new_map = bundle.into_map();
        let old_map = self.0.store.load().await?;
        self.0.store.replace_all(new_map.clone()).await?;

        for (key, token) in &new_map {
            let changed = match old_map.get(key) {
                Some(old_token) => old_token != token,
                None => true,
            };
            if changed {
                self.arm(key.clone(), token.clone()).await;
                self.0.bus.emit(Event::Added(key.clone(), token.clone()));
            }
        }
        for (key, old_token) in &old_map {
            if !new_map.contains_key(key) {
                self.0.scheduler.cancel(key).await;
                self.0.bus.emit(Event::Removed(key.clone(), old_token.clone()));
            }
        }
        Ok(())
    }

    /// Renew the token under `key` via the configured [`TokenClient`],
    /// single-flighted across concurrent callers. Bypasses the renewal-storm
    /// rate limiter, which only throttles expiry-driven auto-renewal; an
    /// explicit caller-initiated renewal always runs.
    pub async fn renew(&self, key: TokenKey) -> TokenResult<Token> {
        if self.0.store.get_one(&key).await?.is_none() {
            return Err(TokenManagerError::NoTokenForKey(key.to_string()));
        }
        self.0
            .coordinator
            .renew(key)
            .await
            .map_err(TokenManagerError::Renew)
    }

    async fn arm(&self, key: TokenKey, token: Token) {
        self.0
            .scheduler
            .arm(
                key,
                token,
                Arc::clone(&self.0.clock),
                self.0.config.expire_early_seconds,
                self.0.config.local_clock_offset_ms,
                self.0.bus.clone(),
            )
            .await;
    }

    async fn wire_expiry_reaction(&self) {
        let config = Arc::clone(&self.0.config);
        let rate_limiter_active = config.auto_renew;
        let auto_remove = config.auto_remove;
        let coordinator = Arc::clone(&self.0.coordinator);
        let store = self.0.store.clone();
        let scheduler = Arc::clone(&self.0.scheduler);
        let bus_for_dispatch = self.0.bus.clone();
        let inner = Arc::clone(&self.0);

        self.0.bus.on(EventKind::Expired, move |event| {
            let Event::Expired(key, _token) = event else {
                return;
            };
            let key = key.clone();

            if rate_limiter_active {
                let inner = Arc::clone(&inner);
                let coordinator = Arc::clone(&coordinator);
                let bus = bus_for_dispatch.clone();
                tokio::spawn(async move {
                    if let Err(err) = inner.rate_limiter.check_and_record().await {
                        bus.emit(Event::Error(err));
                    } else {
                        let _ = coordinator.renew(key).await;
                    }
                });
            } else if auto_remove {
                let store = store.clone();
                let scheduler = Arc::clone(&scheduler);
                let bus = bus_for_dispatch.clone();
                tokio::spawn(async move {
                    if let Ok(Some(removed)) = store.delete_one(&key).await {
                        scheduler.cancel(&key).await;
                        bus.emit(Event::Removed(key, removed));
                    }
                });
            }
        });
    }
}

/// Builds a [`TokenManager`]: configure, then call `build()`. `build()` is
/// async because backend selection probes candidates.
pub struct TokenManagerBuilder {
    config: TokenManagerConfig,
    client: Arc<dyn TokenClient>,
    bus: Option<EventBus>,
    clock: Option<Arc<dyn Clock>>,
    cross_tab_source: Option<Arc<dyn StorageChangeSource>>,
}

impl TokenManagerBuilder {
    /// Start building with the given renewal collaborator.
    #[must_use]
    pub fn new(client: Arc<dyn TokenClient>) -> Self {
        Self {
            config: TokenManagerConfig::default(),
            client,
            bus: None,
            clock: None,
            cross_tab_source: None,
        }
    }

    /// Use this configuration instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: TokenManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an externally-owned event bus, e.g. one a host SDK also
    /// publishes its own events onto.
    #[must_use]
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Inject a clock, overriding [`SystemClock`] (primarily for tests).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable cross-tab synchronization against the given change source.
    #[must_use]
    pub fn cross_tab_source(mut self, source: Arc<dyn StorageChangeSource>) -> Self {
        self.cross_tab_source = Some(source);
        self
    }

    /// Select a storage backend, load whatever's already stored, arm
    /// timers for it, and wire up the expiry reaction.
    pub async fn build(mut self) -> TokenResult<TokenManager> {
        self.config.normalize();
        let config = Arc::new(self.config);
        let (backend, remaining_cascade) = select_backend(&config).await?;
        let store = TokenStore::with_cascade(
            backend,
            remaining_cascade,
            config.disabled_storage.clone(),
            config.cookie_secure,
            config.storage_key.clone(),
        );
        let bus = self.bus.unwrap_or_default();
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let scheduler = Arc::new(ExpirationScheduler::new());
        let rate_limiter = RenewRateLimiter::new(Arc::clone(&clock));

        let coordinator = Arc::new(RenewCoordinator::new(
            self.client,
            store.clone(),
            Arc::clone(&scheduler),
            bus.clone(),
            Arc::clone(&clock),
            Arc::clone(&config),
        ));

        let cross_tab = self.cross_tab_source.map(|source| {
            CrossTabSynchronizer::spawn(
                source,
                config.storage_key.clone(),
                config.storage_event_delay_ms,
                bus.clone(),
                Arc::clone(&scheduler),
                Arc::clone(&clock),
                config.expire_early_seconds,
                config.local_clock_offset_ms,
            )
        });

        let manager = TokenManager(Arc::new(Inner {
            config,
            store,
            bus,
            clock,
            scheduler,
            coordinator,
            rate_limiter,
            callback_in_progress: AtomicBool::new(false),
            _cross_tab: cross_tab,
        }));

        manager.wire_expiry_reaction().await;

        let existing = manager.0.store.load().await?;
        for (key, token) in existing {
            manager.arm(key, token).await;
        }

        Ok(manager)
    }
}
