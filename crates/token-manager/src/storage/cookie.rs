//! Cookie-backed storage: one cookie per token key, the browser's
//! `document.cookie` API abstracted behind [`CookieJar`] so this crate can
//! run outside a browser.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use token_manager_core::{TokenManagerError, TokenResult};

use super::StorageBackend;

/// A cookie jar: get/set/remove by name, and enumerate everything present.
/// Real `document.cookie` access is write-through text parsing; a native
/// host (or a test) uses [`InMemoryCookieJar`] instead.
pub trait CookieJar: Send + Sync + std::fmt::Debug {
    /// Read the value of the cookie named `name`.
    fn get(&self, name: &str) -> Option<String>;
    /// Set the cookie named `name` to `value`. `secure` controls the
    /// `Secure` attribute; a real implementation also sets a far-future
    /// expiry and `SameSite=Lax`.
    fn set(&self, name: &str, value: &str, secure: bool);
    /// Delete the cookie named `name`.
    fn remove(&self, name: &str);
    /// List the names of every cookie currently set.
    fn names(&self) -> Vec<String>;
}

/// Native stand-in for a browser cookie jar.
#[derive(Debug, Default)]
pub struct InMemoryCookieJar {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCookieJar {
    /// Create an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieJar for InMemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("cookie jar mutex poisoned")
            .get(name)
            .cloned()
    }

    fn set(&self, name: &str, value: &str, _secure: bool) {
        self.entries
            .lock()
            .expect("cookie jar mutex poisoned")
            .insert(name.to_string(), value.to_string());
    }

    fn remove(&self, name: &str) {
        self.entries
            .lock()
            .expect("cookie jar mutex poisoned")
            .remove(name);
    }

    fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("cookie jar mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

/// One cookie per token key: `{storage_key}_{token_key}`. Cookies carry
/// tighter size limits than local/session storage, so this backend is a
/// late entry in the default cascade order.
#[derive(Debug)]
pub struct CookieBackend {
    jar: Box<dyn CookieJar>,
    secure: bool,
}

impl CookieBackend {
    /// Wrap a cookie jar. `secure` sets the `Secure` attribute on every
    /// cookie this backend writes.
    #[must_use]
    pub fn new(jar: Box<dyn CookieJar>, secure: bool) -> Self {
        Self { jar, secure }
    }
}

#[async_trait]
impl StorageBackend for CookieBackend {
    async fn get_item(&self, subkey: Option<&str>) -> TokenResult<Option<String>> {
        let Some(name) = subkey else {
            return Err(TokenManagerError::Other(
                "cookie backend requires a subkey per record".to_string(),
            ));
        };
        Ok(self.jar.get(name))
    }

    async fn set_item(&self, subkey: Option<&str>, value: String) -> TokenResult<()> {
        let Some(name) = subkey else {
            return Err(TokenManagerError::Other(
                "cookie backend requires a subkey per record".to_string(),
            ));
        };
        self.jar.set(name, &value, self.secure);
        Ok(())
    }

    async fn remove_item(&self, subkey: Option<&str>) -> TokenResult<()> {
        let Some(name) = subkey else {
            return Err(TokenManagerError::Other(
                "cookie backend requires a subkey per record".to_string(),
            ));
        };
        self.jar.remove(name);
        Ok(())
    }

    async fn clear(&self) -> TokenResult<()> {
        for name in self.jar.names() {
            self.jar.remove(&name);
        }
        Ok(())
    }

    fn label(&self) -> &'static str {
        "cookie"
    }

    fn is_keyed(&self) -> bool {
        true
    }

    async fn list_keys(&self, prefix: &str) -> TokenResult<Vec<String>> {
        Ok(self
            .jar
            .names()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    async fn probe(&self) -> TokenResult<()> {
        const PROBE_NAME: &str = "__token_manager_probe__";
        self.jar.set(PROBE_NAME, "1", self.secure);
        let ok = self.jar.get(PROBE_NAME).as_deref() == Some("1");
        self.jar.remove(PROBE_NAME);
        if ok {
            Ok(())
        } else {
            Err(TokenManagerError::StorageUnavailable {
                tried: vec!["cookie".to_string()],
            })
        }
    }
}
