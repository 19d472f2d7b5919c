//! Pluggable storage backends.
//!
//! [`StorageBackend`] is the trait every backend (memory, web-storage-like
//! key/value, cookie, caller-supplied custom) implements; [`cascade`] probes
//! candidates in order at construction time and falls over to the next one
//! on failure.

mod cascade;
mod cookie;
mod custom;
mod keyvalue;
mod memory;

pub use cascade::select_backend;
pub(crate) use cascade::build_named;
pub use cookie::{CookieBackend, CookieJar, InMemoryCookieJar};
pub use custom::{CustomProvider, CustomProviderBackend};
pub use keyvalue::{InMemoryKeyValueStore, KeyValueBackend, SyncKeyValueStore};
pub use memory::MemoryBackend;

use async_trait::async_trait;
use token_manager_core::TokenResult;

/// A storage medium tokens are persisted to. Implementations model either a
/// single JSON blob (the common case: local/session storage) or a set of
/// keyed records (cookies, one per token).
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Read the value at `subkey` (or the single blob, if `subkey` is
    /// `None`).
    async fn get_item(&self, subkey: Option<&str>) -> TokenResult<Option<String>>;

    /// Write `value` at `subkey` (or as the single blob, if `subkey` is
    /// `None`).
    async fn set_item(&self, subkey: Option<&str>, value: String) -> TokenResult<()>;

    /// Remove the value at `subkey` (or the single blob, if `subkey` is
    /// `None`). A no-op if nothing is stored there.
    async fn remove_item(&self, subkey: Option<&str>) -> TokenResult<()>;

    /// Remove everything this backend has stored under its configured key.
    async fn clear(&self) -> TokenResult<()>;

    /// Human-readable label for logs and cascade-downgrade warnings.
    fn label(&self) -> &'static str;

    /// `true` for backends that store one record per token (cookies);
    /// `false` for single-blob backends (local/session storage, memory,
    /// most custom providers).
    fn is_keyed(&self) -> bool {
        false
    }

    /// For keyed backends, list all subkeys currently stored with the given
    /// prefix (used to reconstruct the full token map on load). Blob
    /// backends don't need this; the default is unused for them.
    async fn list_keys(&self, _prefix: &str) -> TokenResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Probe availability by performing a harmless write-then-delete, per
    /// the construction-time cascade probe. The default probes
    /// via `set_item`/`remove_item` on a throwaway subkey; backends that
    /// are always available (memory) can override this to skip the round
    /// trip.
    async fn probe(&self) -> TokenResult<()> {
        const PROBE_KEY: &str = "__token_manager_probe__";
        self.set_item(Some(PROBE_KEY), "1".to_string()).await?;
        self.remove_item(Some(PROBE_KEY)).await?;
        Ok(())
    }
}
