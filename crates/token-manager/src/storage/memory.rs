//! In-process, non-durable storage backend: the final cascade fallback and
//! the default for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use token_manager_core::TokenResult;

use super::StorageBackend;

const BLOB_SLOT: &str = "__blob__";

/// Holds values in a process-local map. Nothing survives process restart;
/// nothing is shared across a real browser's tabs, which is exactly why the
/// selection cascade only reaches it as a last resort.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get_item(&self, subkey: Option<&str>) -> TokenResult<Option<String>> {
        let slot = subkey.unwrap_or(BLOB_SLOT);
        Ok(self.slots.read().await.get(slot).cloned())
    }

    async fn set_item(&self, subkey: Option<&str>, value: String) -> TokenResult<()> {
        let slot = subkey.unwrap_or(BLOB_SLOT).to_string();
        self.slots.write().await.insert(slot, value);
        Ok(())
    }

    async fn remove_item(&self, subkey: Option<&str>) -> TokenResult<()> {
        let slot = subkey.unwrap_or(BLOB_SLOT);
        self.slots.write().await.remove(slot);
        Ok(())
    }

    async fn clear(&self) -> TokenResult<()> {
        self.slots.write().await.clear();
        Ok(())
    }

    fn label(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> TokenResult<()> {
        Ok(())
    }
}
