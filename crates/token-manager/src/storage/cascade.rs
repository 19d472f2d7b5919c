//! Construction-time backend selection: probe candidates in cascade order,
//! falling over to the next one on failure, warning on every downgrade
//! (see the `StorageBackend` cascade described in `storage::mod`).

use std::sync::Arc;

use token_manager_core::TokenManagerError;

use crate::config::{NamedStorage, StorageChoice, TokenManagerConfig};

use super::{CookieBackend, InMemoryCookieJar, InMemoryKeyValueStore, KeyValueBackend, MemoryBackend, StorageBackend};

pub(crate) fn build_named(choice: NamedStorage, cookie_secure: bool) -> Arc<dyn StorageBackend> {
    match choice {
        NamedStorage::LocalStorage => Arc::new(KeyValueBackend::new(Box::new(
            InMemoryKeyValueStore::new("localStorage"),
        ))),
        NamedStorage::SessionStorage => Arc::new(KeyValueBackend::new(Box::new(
            InMemoryKeyValueStore::new("sessionStorage"),
        ))),
        NamedStorage::Cookie => {
            Arc::new(CookieBackend::new(Box::new(InMemoryCookieJar::new()), cookie_secure))
        }
        NamedStorage::Memory => Arc::new(MemoryBackend::new()),
    }
}

/// Select a working storage backend for `config`, probing candidates in
/// cascade order and returning the first that passes, along with the
/// untried candidates after it (in cascade order) that remain available for
/// [`crate::store::TokenStore`] to escalate to at runtime if a later write
/// fails. Every downgrade past the caller's preferred backend is logged via
/// `tracing::warn!`.
pub async fn select_backend(
    config: &TokenManagerConfig,
) -> Result<(Arc<dyn StorageBackend>, Vec<NamedStorage>), TokenManagerError> {
    match &config.storage {
        Some(StorageChoice::Custom(backend)) => {
            backend.probe().await.map_err(|_| TokenManagerError::StorageUnavailable {
                tried: vec!["custom".to_string()],
            })?;
            // A caller-supplied backend has no named fallback chain of its
            // own; there's nothing to escalate to.
            Ok((Arc::clone(backend), Vec::new()))
        }
        Some(StorageChoice::Named(preferred)) => {
            let start = NamedStorage::CASCADE_ORDER
                .iter()
                .position(|n| n == preferred)
                .unwrap_or(0);
            probe_cascade(
                &NamedStorage::CASCADE_ORDER[start..],
                config.cookie_secure,
                &config.disabled_storage,
            )
            .await
        }
        None => {
            probe_cascade(
                &NamedStorage::CASCADE_ORDER,
                config.cookie_secure,
                &config.disabled_storage,
            )
            .await
        }
    }
}

async fn probe_cascade(
    candidates: &[NamedStorage],
    cookie_secure: bool,
    disabled: &[NamedStorage],
) -> Result<(Arc<dyn StorageBackend>, Vec<NamedStorage>), TokenManagerError> {
    let requested = candidates.first().copied();
    let mut tried = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        if disabled.contains(candidate) {
            tried.push(candidate.label().to_string());
            continue;
        }
        let backend = build_named(*candidate, cookie_secure);
        match backend.probe().await {
            Ok(()) => {
                if requested != Some(*candidate) {
                    tracing::warn!(
                        requested = requested.map(NamedStorage::label).unwrap_or("none"),
                        selected = candidate.label(),
                        "storage cascade downgraded to a fallback backend"
                    );
                }
                return Ok((backend, candidates[index + 1..].to_vec()));
            }
            Err(_) => {
                tried.push(candidate.label().to_string());
            }
        }
    }
    Err(TokenManagerError::StorageUnavailable { tried })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_cascade_selects_local_storage() {
        let config = TokenManagerConfig::default();
        let (backend, remaining) = select_backend(&config).await.unwrap();
        assert_eq!(backend.label(), "localStorage");
        assert_eq!(
            remaining,
            vec![NamedStorage::SessionStorage, NamedStorage::Cookie, NamedStorage::Memory]
        );
    }

    #[tokio::test]
    async fn explicit_memory_choice_is_honored() {
        let config = TokenManagerConfig::builder()
            .storage(NamedStorage::Memory)
            .build()
            .unwrap();
        let (backend, remaining) = select_backend(&config).await.unwrap();
        assert_eq!(backend.label(), "memory");
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn disabled_local_storage_downgrades_to_session_storage() {
        let config = TokenManagerConfig::builder()
            .disabled_storage(vec![NamedStorage::LocalStorage])
            .build()
            .unwrap();
        let (backend, remaining) = select_backend(&config).await.unwrap();
        assert_eq!(backend.label(), "sessionStorage");
        assert_eq!(remaining, vec![NamedStorage::Cookie, NamedStorage::Memory]);
    }

    #[tokio::test]
    async fn every_candidate_disabled_is_fatal() {
        let config = TokenManagerConfig::builder()
            .disabled_storage(NamedStorage::CASCADE_ORDER.to_vec())
            .build()
            .unwrap();
        let err = select_backend(&config).await.unwrap_err();
        assert!(matches!(err, TokenManagerError::StorageUnavailable { .. }));
    }
}
