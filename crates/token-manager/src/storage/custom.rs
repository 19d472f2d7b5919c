//! Adapter for a caller-supplied storage provider.
//!
//! A custom provider only has to implement `getItem` and
//! `setItem`; `removeItem` is optional. [`CustomProvider`] mirrors that
//! minimal surface, and [`CustomProviderBackend`] fills in the rest.

use async_trait::async_trait;
use token_manager_core::TokenResult;

use super::StorageBackend;

/// The minimal storage surface a caller can implement to plug in a backend
/// this crate doesn't know about (a database-backed session store, a
/// secure-enclave binding, etc).
#[async_trait]
pub trait CustomProvider: Send + Sync + std::fmt::Debug {
    /// Read the stored blob, or `None` if unset.
    async fn get_item(&self) -> TokenResult<Option<String>>;
    /// Write the blob.
    async fn set_item(&self, value: String) -> TokenResult<()>;
    /// Remove the blob. Default falls back to writing an empty object,
    /// since not every custom provider exposes a delete operation.
    async fn remove_item(&self) -> TokenResult<()> {
        self.set_item("{}".to_string()).await
    }
}

/// Adapts a [`CustomProvider`] into the full [`StorageBackend`] interface.
/// Always single-blob; a caller who wants keyed records implements
/// [`StorageBackend`] directly instead of going through this adapter.
#[derive(Debug)]
pub struct CustomProviderBackend {
    provider: Box<dyn CustomProvider>,
}

impl CustomProviderBackend {
    /// Wrap a caller-supplied provider.
    #[must_use]
    pub fn new(provider: Box<dyn CustomProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StorageBackend for CustomProviderBackend {
    async fn get_item(&self, _subkey: Option<&str>) -> TokenResult<Option<String>> {
        self.provider.get_item().await
    }

    async fn set_item(&self, _subkey: Option<&str>, value: String) -> TokenResult<()> {
        self.provider.set_item(value).await
    }

    async fn remove_item(&self, _subkey: Option<&str>) -> TokenResult<()> {
        self.provider.remove_item().await
    }

    async fn clear(&self) -> TokenResult<()> {
        self.provider.remove_item().await
    }

    fn label(&self) -> &'static str {
        "custom"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingProvider {
        value: Mutex<Option<String>>,
    }

    #[async_trait]
    impl CustomProvider for RecordingProvider {
        async fn get_item(&self) -> TokenResult<Option<String>> {
            Ok(self.value.lock().await.clone())
        }

        async fn set_item(&self, value: String) -> TokenResult<()> {
            *self.value.lock().await = Some(value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_remove_item_writes_empty_object() {
        let backend = CustomProviderBackend::new(Box::new(RecordingProvider::default()));
        backend.set_item(None, "{\"a\":1}".to_string()).await.unwrap();
        backend.remove_item(None).await.unwrap();
        assert_eq!(backend.get_item(None).await.unwrap(), Some("{}".to_string()));
    }
}
