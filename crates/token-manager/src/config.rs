//! Construction-time configuration, mirroring the builder pattern the
//! teacher uses for `RateLimitConfig` (`turbomcp-auth::rate_limit`).

use std::str::FromStr;
use std::sync::Arc;

use token_manager_core::TokenManagerError;

use crate::storage::StorageBackend;

/// Default storage key used when the caller doesn't supply one.
pub const DEFAULT_STORAGE_KEY: &str = "okta-token-storage";

/// Default `expireEarlySeconds`: treat a token as expired this many seconds
/// before its real `expiresAt`, leaving headroom for clock skew and network
/// latency on the next API call.
pub const DEFAULT_EXPIRE_EARLY_SECONDS: u32 = 30;

/// A storage backend selected by name, without needing to construct one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedStorage {
    /// Browser `localStorage` equivalent: durable, shared across tabs.
    LocalStorage,
    /// Browser `sessionStorage` equivalent: durable for the tab's lifetime.
    SessionStorage,
    /// Cookie-backed storage: one record per token key.
    Cookie,
    /// Process-local, non-durable storage. Always available; the final
    /// fallback in the selection cascade.
    Memory,
}

impl NamedStorage {
    /// The cascade order tried at construction time when the caller doesn't
    /// pin a specific backend.
    pub const CASCADE_ORDER: [NamedStorage; 4] = [
        NamedStorage::LocalStorage,
        NamedStorage::SessionStorage,
        NamedStorage::Cookie,
        NamedStorage::Memory,
    ];

    /// Human-readable label, used in cascade warnings and error messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            NamedStorage::LocalStorage => "localStorage",
            NamedStorage::SessionStorage => "sessionStorage",
            NamedStorage::Cookie => "cookie",
            NamedStorage::Memory => "memory",
        }
    }
}

impl FromStr for NamedStorage {
    type Err = TokenManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localStorage" => Ok(NamedStorage::LocalStorage),
            "sessionStorage" => Ok(NamedStorage::SessionStorage),
            "cookie" => Ok(NamedStorage::Cookie),
            "memory" => Ok(NamedStorage::Memory),
            other => Err(TokenManagerError::UnrecognizedStorageOption(
                other.to_string(),
            )),
        }
    }
}

/// The storage the caller asked for at construction time: a named backend
/// to start the cascade from, or a caller-supplied implementation.
#[derive(Clone)]
pub enum StorageChoice {
    /// Start the selection cascade at this named backend.
    Named(NamedStorage),
    /// Use exactly this backend; it still participates in the "probe at
    /// construction, fail over on write failure" cascade logic, but the
    /// cascade's candidate list is just this one entry.
    Custom(Arc<dyn StorageBackend>),
}

impl std::fmt::Debug for StorageChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageChoice::Named(n) => write!(f, "StorageChoice::Named({n:?})"),
            StorageChoice::Custom(_) => write!(f, "StorageChoice::Custom(..)"),
        }
    }
}

/// Construction-time configuration for a [`crate::manager::TokenManager`].
#[derive(Clone)]
pub struct TokenManagerConfig {
    /// Explicit starting point for the storage selection cascade. `None`
    /// means start at the head of [`NamedStorage::CASCADE_ORDER`].
    pub storage: Option<StorageChoice>,
    /// Key (or key prefix, for keyed backends) under which tokens are
    /// persisted.
    pub storage_key: String,
    /// Seconds of headroom subtracted from `expiresAt` before a token is
    /// treated as expired.
    pub expire_early_seconds: u32,
    /// Automatically attempt a renewal when a token expires.
    pub auto_renew: bool,
    /// Remove an expired token when `auto_renew` is `false`.
    pub auto_remove: bool,
    /// Millisecond offset applied to the local clock to approximate the
    /// authorization server's clock.
    pub local_clock_offset_ms: i64,
    /// Mark cookies `Secure`. Defaults to `true`; callers serving plain HTTP
    /// in local development can opt out.
    pub cookie_secure: bool,
    /// Extra delay before reacting to a cross-tab storage-change
    /// notification, to ride out slow or coalesced delivery on the
    /// underlying platform. Zero for a native, single-process host.
    pub storage_event_delay_ms: u64,
    /// Relaxes the floor on `expire_early_seconds`, for local
    /// development configurations that want a tight or zero window.
    pub is_local_development: bool,
    /// Storage media the host has already determined are unavailable (spec
    /// availability of each storage medium is a host-detected
    /// feature). The selection cascade skips these without probing them.
    pub disabled_storage: Vec<NamedStorage>,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            storage: None,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            expire_early_seconds: DEFAULT_EXPIRE_EARLY_SECONDS,
            auto_renew: true,
            auto_remove: true,
            local_clock_offset_ms: 0,
            cookie_secure: true,
            storage_event_delay_ms: 0,
            is_local_development: false,
            disabled_storage: Vec::new(),
        }
    }
}

impl TokenManagerConfig {
    /// Start building a config from defaults.
    #[must_use]
    pub fn builder() -> TokenManagerConfigBuilder {
        TokenManagerConfigBuilder::default()
    }

    /// Outside local development, floor `expire_early_seconds` at
    /// [`DEFAULT_EXPIRE_EARLY_SECONDS`] rather than letting a caller-supplied
    /// `0` (or otherwise too-tight) value through: there's no network round
    /// trip without headroom, and local development is the only setting
    /// that wants one this tight.
    pub fn normalize(&mut self) {
        if !self.is_local_development && self.expire_early_seconds < DEFAULT_EXPIRE_EARLY_SECONDS {
            self.expire_early_seconds = DEFAULT_EXPIRE_EARLY_SECONDS;
        }
    }
}

/// Builder for [`TokenManagerConfig`]: one setter per field, `build()` at the
/// end.
#[derive(Default)]
pub struct TokenManagerConfigBuilder {
    config: TokenManagerConfig,
}

impl TokenManagerConfigBuilder {
    /// Pin the storage selection cascade to start at a named backend.
    #[must_use]
    pub fn storage(mut self, storage: NamedStorage) -> Self {
        self.config.storage = Some(StorageChoice::Named(storage));
        self
    }

    /// Use a caller-supplied storage backend.
    #[must_use]
    pub fn custom_storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.config.storage = Some(StorageChoice::Custom(backend));
        self
    }

    /// Set the storage key (or key prefix).
    #[must_use]
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.config.storage_key = key.into();
        self
    }

    /// Set the expiry headroom, in seconds.
    #[must_use]
    pub fn expire_early_seconds(mut self, seconds: u32) -> Self {
        self.config.expire_early_seconds = seconds;
        self
    }

    /// Enable or disable automatic renewal on expiry.
    #[must_use]
    pub fn auto_renew(mut self, enabled: bool) -> Self {
        self.config.auto_renew = enabled;
        self
    }

    /// Enable or disable automatic removal on expiry when not auto-renewing.
    #[must_use]
    pub fn auto_remove(mut self, enabled: bool) -> Self {
        self.config.auto_remove = enabled;
        self
    }

    /// Offset applied to the local clock, in milliseconds.
    #[must_use]
    pub fn local_clock_offset_ms(mut self, offset_ms: i64) -> Self {
        self.config.local_clock_offset_ms = offset_ms;
        self
    }

    /// Mark cookies `Secure` (default `true`).
    #[must_use]
    pub fn cookie_secure(mut self, secure: bool) -> Self {
        self.config.cookie_secure = secure;
        self
    }

    /// Delay, in milliseconds, before reacting to a cross-tab storage event.
    #[must_use]
    pub fn storage_event_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.storage_event_delay_ms = delay_ms;
        self
    }

    /// Mark this a local-development configuration, relaxing the floor on
    /// `expire_early_seconds`.
    #[must_use]
    pub fn is_local_development(mut self, value: bool) -> Self {
        self.config.is_local_development = value;
        self
    }

    /// Mark storage media the host has detected as unavailable; the
    /// cascade skips them without probing.
    #[must_use]
    pub fn disabled_storage(mut self, media: Vec<NamedStorage>) -> Self {
        self.config.disabled_storage = media;
        self
    }

    /// Finish building, clamping the expiry-headroom floor.
    pub fn build(mut self) -> Result<TokenManagerConfig, TokenManagerError> {
        self.config.normalize();
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unrecognized_storage_name() {
        let err = NamedStorage::from_str("indexeddb").unwrap_err();
        assert!(matches!(err, TokenManagerError::UnrecognizedStorageOption(_)));
    }

    #[test]
    fn clamps_zero_expire_early_in_production_to_default() {
        let config = TokenManagerConfig::builder()
            .expire_early_seconds(0)
            .build()
            .unwrap();
        assert_eq!(config.expire_early_seconds, DEFAULT_EXPIRE_EARLY_SECONDS);
    }

    #[test]
    fn allows_zero_expire_early_in_local_development() {
        let config = TokenManagerConfig::builder()
            .expire_early_seconds(0)
            .is_local_development(true)
            .build()
            .unwrap();
        assert_eq!(config.expire_early_seconds, 0);
    }

    #[test]
    fn default_storage_key_matches_constant() {
        let config = TokenManagerConfig::default();
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
    }
}
