//! Core token types: [`TokenKey`], [`Token`], and its payload discriminant.
//!
//! Persisted layout is a flat JSON object (`{"scopes": [...],
//! "expiresAt": N, "idToken": "...", "claims": {...}}`, or `accessToken`, or
//! `refreshToken`), so `Token` implements `Serialize`/`Deserialize` by hand
//! rather than deriving a tagged enum representation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use token_manager_core::TokenManagerError;

/// Opaque identifier for a slot in the token store (e.g. `"idToken"`,
/// `"test-accessToken"`). A thin wrapper over `String` so call sites read as
/// intent rather than a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey(String);

impl TokenKey {
    /// Build a key from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TokenKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The well-known token-key names used by [`crate::manager::TokenManager::get_tokens`]
/// and [`crate::manager::TokenManager::set_tokens`] bundles.
pub mod well_known_keys {
    /// Key name for the ID token slot.
    pub const ID_TOKEN: &str = "idToken";
    /// Key name for the access token slot.
    pub const ACCESS_TOKEN: &str = "accessToken";
    /// Key name for the refresh token slot.
    pub const REFRESH_TOKEN: &str = "refreshToken";
}

/// Which credential a [`Token`] carries. Exactly one variant per token, per
/// invariant: exactly one payload variant per token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPayload {
    /// An OIDC ID token plus its decoded claims.
    Id {
        /// The raw ID token (JWT compact serialization).
        id_token: String,
        /// Decoded claims, carried verbatim (not re-validated here; JWT
        /// signature verification happens elsewhere).
        claims: Map<String, Value>,
    },
    /// An OAuth access token.
    Access {
        /// The raw access token.
        access_token: String,
    },
    /// An OAuth refresh token.
    Refresh {
        /// The raw refresh token.
        refresh_token: String,
    },
}

/// A stored OAuth/OIDC credential with its shared envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Non-empty set of granted scopes.
    pub scopes: Vec<String>,
    /// Absolute expiry, UNIX seconds, server-clock reference.
    pub expires_at: i64,
    /// The credential this token carries.
    pub payload: TokenPayload,
    /// Fields present on the persisted JSON that this crate doesn't model.
    /// Preserved verbatim across read-modify-write so a newer client
    /// version's extra fields survive a write from an older one.
    pub extra: Map<String, Value>,
}

impl Token {
    /// Construct an ID token.
    #[must_use]
    pub fn id_token(
        token: impl Into<String>,
        scopes: Vec<String>,
        expires_at: i64,
        claims: Map<String, Value>,
    ) -> Self {
        Self {
            scopes,
            expires_at,
            payload: TokenPayload::Id {
                id_token: token.into(),
                claims,
            },
            extra: Map::new(),
        }
    }

    /// Construct an access token.
    #[must_use]
    pub fn access_token(token: impl Into<String>, scopes: Vec<String>, expires_at: i64) -> Self {
        Self {
            scopes,
            expires_at,
            payload: TokenPayload::Access {
                access_token: token.into(),
            },
            extra: Map::new(),
        }
    }

    /// Construct a refresh token.
    #[must_use]
    pub fn refresh_token(token: impl Into<String>, scopes: Vec<String>, expires_at: i64) -> Self {
        Self {
            scopes,
            expires_at,
            payload: TokenPayload::Refresh {
                refresh_token: token.into(),
            },
            extra: Map::new(),
        }
    }

    /// The well-known key name this token's payload corresponds to, used to
    /// classify tokens in [`crate::manager::TokenManager::get_tokens`].
    #[must_use]
    pub fn discriminant_key(&self) -> &'static str {
        match self.payload {
            TokenPayload::Id { .. } => well_known_keys::ID_TOKEN,
            TokenPayload::Access { .. } => well_known_keys::ACCESS_TOKEN,
            TokenPayload::Refresh { .. } => well_known_keys::REFRESH_TOKEN,
        }
    }

    /// Validate the shape invariants: non-empty
    /// scopes and a present `expiresAt` (both are structurally guaranteed by
    /// this type; this additionally rejects empty scopes, which the type
    /// alone cannot).
    pub fn validate(&self, key: &TokenKey) -> Result<(), TokenManagerError> {
        if self.scopes.is_empty() {
            return Err(TokenManagerError::InvalidToken {
                key: key.to_string(),
                reason: "scopes must be non-empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Serialize for Token {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json_map().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map = Map::deserialize(deserializer)?;
        Token::from_json_map(map).map_err(serde::de::Error::custom)
    }
}

impl Token {
    /// Flatten this token into the persisted JSON object shape.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert("scopes".to_string(), Value::from(self.scopes.clone()));
        map.insert("expiresAt".to_string(), Value::from(self.expires_at));
        match &self.payload {
            TokenPayload::Id { id_token, claims } => {
                map.insert("idToken".to_string(), Value::from(id_token.clone()));
                map.insert("claims".to_string(), Value::Object(claims.clone()));
            }
            TokenPayload::Access { access_token } => {
                map.insert("accessToken".to_string(), Value::from(access_token.clone()));
            }
            TokenPayload::Refresh { refresh_token } => {
                map.insert(
                    "refreshToken".to_string(),
                    Value::from(refresh_token.clone()),
                );
            }
        }
        map
    }

    /// Parse the persisted JSON object shape back into a `Token`, rejecting
    /// anything missing `scopes`, `expiresAt`, or a single discriminant
    /// field, per the `InvalidToken` error variant.
    pub fn from_json_map(mut map: Map<String, Value>) -> Result<Self, String> {
        let scopes: Vec<String> = match map.remove("scopes") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| "scopes must be strings".to_string())
                })
                .collect::<Result<_, _>>()?,
            _ => return Err("missing or invalid 'scopes'".to_string()),
        };
        if scopes.is_empty() {
            return Err("scopes must be non-empty".to_string());
        }

        let expires_at = map
            .remove("expiresAt")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| "missing or invalid 'expiresAt'".to_string())?;

        let id_token = map.remove("idToken").and_then(|v| v.as_str().map(str::to_string));
        let access_token = map
            .remove("accessToken")
            .and_then(|v| v.as_str().map(str::to_string));
        let refresh_token = map
            .remove("refreshToken")
            .and_then(|v| v.as_str().map(str::to_string));
        let claims = match map.remove("claims") {
            Some(Value::Object(obj)) => obj,
            _ => Map::new(),
        };

        let payload = match (id_token, access_token, refresh_token) {
            (Some(id_token), None, None) => TokenPayload::Id { id_token, claims },
            (None, Some(access_token), None) => TokenPayload::Access { access_token },
            (None, None, Some(refresh_token)) => TokenPayload::Refresh { refresh_token },
            _ => {
                return Err(
                    "token must carry exactly one of idToken, accessToken, refreshToken"
                        .to_string(),
                );
            }
        };

        Ok(Self {
            scopes,
            expires_at,
            payload,
            extra: map,
        })
    }
}

/// Serialize a full token map to the blob-backend persisted shape
/// (`{ [tokenKey]: Token }`).
pub(crate) fn tokens_to_blob(tokens: &HashMap<TokenKey, Token>) -> Value {
    let map: Map<String, Value> = tokens
        .iter()
        .map(|(k, v)| (k.to_string(), Value::Object(v.to_json_map())))
        .collect();
    Value::Object(map)
}

/// Parse the blob-backend persisted shape back into a token map. Individual
/// entries that fail to parse as a valid `Token` are logged and skipped
/// rather than failing the whole load — only a malformed top-level blob is
/// an `UnparseableStorageError`.
pub(crate) fn blob_to_tokens(value: &Value) -> Result<HashMap<TokenKey, Token>, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "storage blob is not a JSON object".to_string())?;
    let mut out = HashMap::with_capacity(obj.len());
    for (key, token_value) in obj {
        let Some(token_obj) = token_value.as_object() else {
            tracing::warn!(token_key = %key, "skipping non-object token entry");
            continue;
        };
        match Token::from_json_map(token_obj.clone()) {
            Ok(token) => {
                out.insert(TokenKey::new(key.clone()), token);
            }
            Err(reason) => {
                tracing::warn!(token_key = %key, %reason, "skipping unparseable token entry");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_access_token_preserving_unknown_fields() {
        let mut extra = Map::new();
        extra.insert("future_field".to_string(), Value::from("keep-me"));
        let token = Token {
            scopes: vec!["openid".to_string()],
            expires_at: 2_000_000_000,
            payload: TokenPayload::Access {
                access_token: "abc".to_string(),
            },
            extra,
        };

        let json = token.to_json_map();
        let parsed = Token::from_json_map(json).unwrap();
        assert_eq!(parsed, token);
        assert_eq!(
            parsed.extra.get("future_field").and_then(Value::as_str),
            Some("keep-me")
        );
    }

    #[test]
    fn rejects_token_with_no_discriminant() {
        let mut map = Map::new();
        map.insert("scopes".to_string(), Value::from(vec!["openid"]));
        map.insert("expiresAt".to_string(), Value::from(2_000_000_000i64));
        assert!(Token::from_json_map(map).is_err());
    }

    #[test]
    fn rejects_token_with_two_discriminants() {
        let mut map = Map::new();
        map.insert("scopes".to_string(), Value::from(vec!["openid"]));
        map.insert("expiresAt".to_string(), Value::from(2_000_000_000i64));
        map.insert("accessToken".to_string(), Value::from("a"));
        map.insert("refreshToken".to_string(), Value::from("b"));
        assert!(Token::from_json_map(map).is_err());
    }

    #[test]
    fn rejects_empty_scopes() {
        let mut map = Map::new();
        map.insert("scopes".to_string(), Value::from(Vec::<String>::new()));
        map.insert("expiresAt".to_string(), Value::from(2_000_000_000i64));
        map.insert("accessToken".to_string(), Value::from("a"));
        assert!(Token::from_json_map(map).is_err());
    }
}
