//! Backend for storage media that expose a synchronous key/value API, the
//! same shape as the browser's `Storage` interface (`localStorage` and
//! `sessionStorage`). Real browser storage isn't reachable from a native
//! process, so [`InMemoryKeyValueStore`] stands in for it; a host embedding
//! this crate in something that does have access to such an API (a WASM
//! build, an Electron shell) implements [`SyncKeyValueStore`] itself and
//! wraps it in a [`KeyValueBackend`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use token_manager_core::{TokenManagerError, TokenResult};

use super::StorageBackend;

/// A synchronous key/value store, mirroring `window.localStorage` /
/// `window.sessionStorage`. Implementations may fail (quota exceeded,
/// storage disabled by the user) — that's the whole reason the construction
/// cascade probes before committing to a backend.
pub trait SyncKeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read the value at `key`, or `None` if unset.
    fn get_item(&self, key: &str) -> Result<Option<String>, String>;
    /// Write `value` at `key`.
    fn set_item(&self, key: &str, value: &str) -> Result<(), String>;
    /// Remove the value at `key`.
    fn remove_item(&self, key: &str) -> Result<(), String>;
    /// List every key currently stored with the given prefix.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
    /// Label for diagnostics (`"localStorage"`, `"sessionStorage"`, ...).
    fn label(&self) -> &'static str;
}

/// Native stand-in for a browser key/value store: a process-local map
/// guarded by a `std::sync::Mutex`, since the trait it backs is
/// synchronous.
#[derive(Debug)]
pub struct InMemoryKeyValueStore {
    label: &'static str,
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store reporting as `label` in diagnostics.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl SyncKeyValueStore for InMemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self
            .entries
            .lock()
            .expect("key/value store mutex poisoned")
            .get(key)
            .cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
        self.entries
            .lock()
            .expect("key/value store mutex poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), String> {
        self.entries
            .lock()
            .expect("key/value store mutex poisoned")
            .remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .expect("key/value store mutex poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

/// Adapts a [`SyncKeyValueStore`] into an async [`StorageBackend`]. Single
/// blob: tokens live under one JSON object at the configured storage key.
#[derive(Debug)]
pub struct KeyValueBackend {
    store: Box<dyn SyncKeyValueStore>,
}

impl KeyValueBackend {
    /// Wrap a synchronous key/value store.
    #[must_use]
    pub fn new(store: Box<dyn SyncKeyValueStore>) -> Self {
        Self { store }
    }

    fn slot(subkey: Option<&str>) -> &str {
        subkey.unwrap_or("")
    }
}

#[async_trait]
impl StorageBackend for KeyValueBackend {
    async fn get_item(&self, subkey: Option<&str>) -> TokenResult<Option<String>> {
        self.store
            .get_item(Self::slot(subkey))
            .map_err(TokenManagerError::StorageWriteFailed)
    }

    async fn set_item(&self, subkey: Option<&str>, value: String) -> TokenResult<()> {
        self.store
            .set_item(Self::slot(subkey), &value)
            .map_err(TokenManagerError::StorageWriteFailed)
    }

    async fn remove_item(&self, subkey: Option<&str>) -> TokenResult<()> {
        self.store
            .remove_item(Self::slot(subkey))
            .map_err(TokenManagerError::StorageWriteFailed)
    }

    async fn clear(&self) -> TokenResult<()> {
        self.store
            .remove_item(Self::slot(None))
            .map_err(TokenManagerError::StorageWriteFailed)
    }

    fn label(&self) -> &'static str {
        self.store.label()
    }
}
