//! [`TokenStore`]: the load/save primitive every other mutation is derived
//! from. `get_one`/`set_one`/`delete_one`/`clear_all` are all
//! implemented in terms of `load` + `save`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use tokio::sync::Mutex;
use token_manager_core::{TokenManagerError, TokenResult};

use crate::config::NamedStorage;
use crate::storage::{build_named, StorageBackend};
use crate::types::{blob_to_tokens, tokens_to_blob, Token, TokenKey};

/// The cascade candidates a [`TokenStore`] hasn't tried yet, retained so a
/// runtime write failure can escalate to the next one instead of just
/// propagating [`TokenManagerError::StorageWriteFailed`] upward.
struct CascadeFallback {
    remaining: Vec<NamedStorage>,
    disabled: Vec<NamedStorage>,
    cookie_secure: bool,
}

/// Reads and writes the full token map through a [`StorageBackend`],
/// handling the blob-vs-keyed split so callers never need to know which
/// kind of backend they're talking to. On a write failure, escalates to the
/// next candidate in its construction-time cascade (if any remain) and
/// retries once, rather than surfacing the failure straight away.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<StdRwLock<Arc<dyn StorageBackend>>>,
    cascade: Arc<Mutex<CascadeFallback>>,
    storage_key: String,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("backend", &self.current_backend().label())
            .field("storage_key", &self.storage_key)
            .finish()
    }
}

impl TokenStore {
    /// Wrap a backend selected for `storage_key`, with no fallback cascade
    /// to escalate to on a write failure.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, storage_key: String) -> Self {
        Self::with_cascade(backend, Vec::new(), Vec::new(), true, storage_key)
    }

    /// Wrap a backend selected for `storage_key`, retaining `remaining` (the
    /// untried candidates after it, in cascade order) and `disabled` (media
    /// the host has ruled out) so a write failure can escalate at runtime.
    #[must_use]
    pub fn with_cascade(
        backend: Arc<dyn StorageBackend>,
        remaining: Vec<NamedStorage>,
        disabled: Vec<NamedStorage>,
        cookie_secure: bool,
        storage_key: String,
    ) -> Self {
        Self {
            backend: Arc::new(StdRwLock::new(backend)),
            cascade: Arc::new(Mutex::new(CascadeFallback {
                remaining,
                disabled,
                cookie_secure,
            })),
            storage_key,
        }
    }

    fn current_backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend.read().expect("backend lock poisoned"))
    }

    /// Label of the underlying backend, for diagnostics.
    #[must_use]
    pub fn backend_label(&self) -> &'static str {
        self.current_backend().label()
    }

    /// Try the next untried cascade candidate, probing it before swapping it
    /// in. Returns `true` if a replacement backend was found and installed.
    async fn escalate(&self) -> bool {
        let mut cascade = self.cascade.lock().await;
        while let Some(candidate) = cascade.remaining.first().copied() {
            cascade.remaining.remove(0);
            if cascade.disabled.contains(&candidate) {
                continue;
            }
            let backend = build_named(candidate, cascade.cookie_secure);
            if backend.probe().await.is_ok() {
                tracing::warn!(
                    selected = candidate.label(),
                    "storage write failed; cascading to the next fallback backend"
                );
                *self.backend.write().expect("backend lock poisoned") = backend;
                return true;
            }
            tracing::warn!(candidate = candidate.label(), "fallback candidate unavailable, skipping");
        }
        false
    }

    fn keyed_subkey(&self, key: &TokenKey) -> String {
        format!("{}_{}", self.storage_key, key)
    }

    /// Load the full token map.
    pub async fn load(&self) -> TokenResult<HashMap<TokenKey, Token>> {
        let backend = self.current_backend();
        if backend.is_keyed() {
            let prefix = format!("{}_", self.storage_key);
            let subkeys = backend.list_keys(&prefix).await?;
            let mut out = HashMap::with_capacity(subkeys.len());
            for subkey in subkeys {
                let Some(raw) = backend.get_item(Some(&subkey)).await? else {
                    continue;
                };
                let token_key = TokenKey::new(subkey.trim_start_matches(&prefix).to_string());
                match serde_json::from_str::<Token>(&raw) {
                    Ok(token) => {
                        out.insert(token_key, token);
                    }
                    Err(err) => {
                        tracing::warn!(%token_key, %err, "skipping unparseable keyed token record");
                    }
                }
            }
            Ok(out)
        } else {
            match backend.get_item(None).await? {
                None => Ok(HashMap::new()),
                Some(raw) => {
                    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|err| {
                        TokenManagerError::UnparseableStorage {
                            storage_key: self.storage_key.clone(),
                            reason: err.to_string(),
                        }
                    })?;
                    blob_to_tokens(&value).map_err(|reason| TokenManagerError::UnparseableStorage {
                        storage_key: self.storage_key.clone(),
                        reason,
                    })
                }
            }
        }
    }

    async fn save_once(&self, tokens: &HashMap<TokenKey, Token>) -> TokenResult<()> {
        let backend = self.current_backend();
        if backend.is_keyed() {
            let prefix = format!("{}_", self.storage_key);
            let existing = backend.list_keys(&prefix).await?;
            let wanted: Vec<String> = tokens.keys().map(|k| self.keyed_subkey(k)).collect();
            for stale in existing.iter().filter(|e| !wanted.contains(e)) {
                backend.remove_item(Some(stale)).await?;
            }
            for (key, token) in tokens {
                let raw = serde_json::to_string(token).map_err(|err| {
                    TokenManagerError::StorageWriteFailed(err.to_string())
                })?;
                backend.set_item(Some(&self.keyed_subkey(key)), raw).await?;
            }
            Ok(())
        } else {
            let raw = serde_json::to_string(&tokens_to_blob(tokens))
                .map_err(|err| TokenManagerError::StorageWriteFailed(err.to_string()))?;
            backend.set_item(None, raw).await
        }
    }

    /// Persist the full token map, replacing whatever was there. On
    /// `StorageWriteFailed`, escalates to the next cascade candidate (if
    /// any) and retries once before giving up.
    pub async fn save(&self, tokens: &HashMap<TokenKey, Token>) -> TokenResult<()> {
        match self.save_once(tokens).await {
            Err(TokenManagerError::StorageWriteFailed(reason)) => {
                if self.escalate().await {
                    self.save_once(tokens).await
                } else {
                    Err(TokenManagerError::StorageWriteFailed(reason))
                }
            }
            other => other,
        }
    }

    async fn clear_once(&self) -> TokenResult<()> {
        self.current_backend().clear().await
    }

    /// Clear the current backend, escalating once on `StorageWriteFailed`
    /// the same way [`TokenStore::save`] does.
    async fn clear_backend(&self) -> TokenResult<()> {
        match self.clear_once().await {
            Err(TokenManagerError::StorageWriteFailed(reason)) => {
                if self.escalate().await {
                    self.clear_once().await
                } else {
                    Err(TokenManagerError::StorageWriteFailed(reason))
                }
            }
            other => other,
        }
    }

    /// Read a single token.
    pub async fn get_one(&self, key: &TokenKey) -> TokenResult<Option<Token>> {
        Ok(self.load().await?.remove(key))
    }

    /// Write a single token, leaving the rest of the map untouched.
    pub async fn set_one(&self, key: TokenKey, token: Token) -> TokenResult<()> {
        let mut map = self.load().await?;
        map.insert(key, token);
        self.save(&map).await
    }

    /// Remove a single token, returning the value that was there, if any.
    pub async fn delete_one(&self, key: &TokenKey) -> TokenResult<Option<Token>> {
        let mut map = self.load().await?;
        let removed = map.remove(key);
        if removed.is_some() {
            self.save(&map).await?;
        }
        Ok(removed)
    }

    /// Remove every token, returning the map that was cleared so the caller
    /// can emit per-key removal events.
    pub async fn clear_all(&self) -> TokenResult<HashMap<TokenKey, Token>> {
        let map = self.load().await?;
        self.clear_backend().await?;
        Ok(map)
    }

    /// Overwrite the whole map verbatim (`setTokens` writes the
    /// bundle as given in a single backend write, no merge with whatever
    /// was previously stored at keys not present in the bundle).
    pub async fn replace_all(&self, tokens: HashMap<TokenKey, Token>) -> TokenResult<()> {
        self.clear_backend().await?;
        self.save(&tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn sample_token() -> Token {
        Token::access_token("tok", vec!["openid".to_string()], 2_000_000_000)
    }

    #[tokio::test]
    async fn set_one_then_get_one_round_trips() {
        let store = TokenStore::new(Arc::new(MemoryBackend::new()), "prefix".to_string());
        store
            .set_one(TokenKey::new("accessToken"), sample_token())
            .await
            .unwrap();

        let loaded = store.get_one(&TokenKey::new("accessToken")).await.unwrap();
        assert_eq!(loaded, Some(sample_token()));
    }

    #[tokio::test]
    async fn delete_one_removes_only_that_key() {
        let store = TokenStore::new(Arc::new(MemoryBackend::new()), "prefix".to_string());
        store
            .set_one(TokenKey::new("a"), sample_token())
            .await
            .unwrap();
        store
            .set_one(TokenKey::new("b"), sample_token())
            .await
            .unwrap();

        let removed = store.delete_one(&TokenKey::new("a")).await.unwrap();
        assert!(removed.is_some());
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_all_empties_the_store() {
        let store = TokenStore::new(Arc::new(MemoryBackend::new()), "prefix".to_string());
        store
            .set_one(TokenKey::new("a"), sample_token())
            .await
            .unwrap();
        let cleared = store.clear_all().await.unwrap();
        assert_eq!(cleared.len(), 1);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_on_malformed_blob_is_unparseable_storage_error() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_item(None, "not json".to_string()).await.unwrap();
        let store = TokenStore::new(backend, "prefix".to_string());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, TokenManagerError::UnparseableStorage { .. }));
    }

    /// A backend whose `probe()` passes (so it wins construction-time
    /// selection) but whose `set_item` always fails, simulating a quota
    /// error discovered only on a later write.
    #[derive(Debug)]
    struct WriteAlwaysFailsBackend;

    #[async_trait::async_trait]
    impl StorageBackend for WriteAlwaysFailsBackend {
        async fn get_item(&self, _subkey: Option<&str>) -> TokenResult<Option<String>> {
            Ok(None)
        }

        async fn set_item(&self, _subkey: Option<&str>, _value: String) -> TokenResult<()> {
            Err(TokenManagerError::StorageWriteFailed("quota exceeded".to_string()))
        }

        async fn remove_item(&self, _subkey: Option<&str>) -> TokenResult<()> {
            Ok(())
        }

        async fn clear(&self) -> TokenResult<()> {
            Err(TokenManagerError::StorageWriteFailed("quota exceeded".to_string()))
        }

        fn label(&self) -> &'static str {
            "write-always-fails"
        }

        async fn probe(&self) -> TokenResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn save_escalates_to_the_next_cascade_candidate_on_write_failure() {
        let store = TokenStore::with_cascade(
            Arc::new(WriteAlwaysFailsBackend),
            vec![NamedStorage::Memory],
            Vec::new(),
            true,
            "prefix".to_string(),
        );

        store
            .set_one(TokenKey::new("accessToken"), sample_token())
            .await
            .unwrap();

        assert_eq!(store.backend_label(), "memory");
        let loaded = store.get_one(&TokenKey::new("accessToken")).await.unwrap();
        assert_eq!(loaded, Some(sample_token()));
    }

    #[tokio::test]
    async fn save_propagates_the_error_once_every_candidate_is_exhausted() {
        let store = TokenStore::with_cascade(
            Arc::new(WriteAlwaysFailsBackend),
            Vec::new(),
            Vec::new(),
            true,
            "prefix".to_string(),
        );

        let err = store
            .set_one(TokenKey::new("accessToken"), sample_token())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenManagerError::StorageWriteFailed(_)));
    }
}
