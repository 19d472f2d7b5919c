//! Unified error type for the token manager.
//!
//! One [`TokenManagerError`] covers the whole lifecycle: storage
//! construction/IO, token shape validation, and renewal coordination. This
//! covers every failure mode rather than collapsing everything into a
//! single opaque variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias used throughout the token manager.
pub type TokenResult<T> = Result<T, TokenManagerError>;

/// All errors the token manager can surface to a caller.
#[derive(Debug, Clone, Error)]
pub enum TokenManagerError {
    /// `storage` configuration named a backend this crate doesn't know.
    /// Fatal at construction time.
    #[error("unrecognized storage option: {0}")]
    UnrecognizedStorageOption(String),

    /// Every backend in the fallback cascade failed to initialize.
    /// Fatal at construction time.
    #[error("no storage backend available (cascade exhausted: {tried:?})")]
    StorageUnavailable {
        /// Backends attempted, in cascade order.
        tried: Vec<String>,
    },

    /// Parsing the persisted JSON blob failed on read.
    #[error("could not parse storage at key '{storage_key}': {reason}")]
    UnparseableStorage {
        /// The configured `storageKey` that failed to parse.
        storage_key: String,
        /// The underlying parse failure.
        reason: String,
    },

    /// `add`/`setTokens` received a value missing `scopes`, `expiresAt`, or
    /// a token discriminant field.
    #[error("invalid token for key '{key}': {reason}")]
    InvalidToken {
        /// The token key the caller tried to write.
        key: String,
        /// Which invariant was violated.
        reason: String,
    },

    /// `renew` was called for a key with nothing stored.
    #[error("no token stored for key '{0}'")]
    NoTokenForKey(String),

    /// The renewal rate limiter tripped. Always emitted on the event bus,
    /// never returned synchronously from a caller-facing method.
    #[error("too many renew requests (last {attempts} attempts spanned {span_ms}ms, < {threshold_ms}ms threshold)")]
    TooManyRenewRequests {
        /// Number of attempts considered in the sliding window.
        attempts: usize,
        /// Observed span of those attempts, in milliseconds.
        span_ms: u64,
        /// The policy threshold that was violated.
        threshold_ms: u64,
    },

    /// `get` was called while the host URL indicates an in-progress OAuth
    /// callback.
    #[error("cannot read tokens while an OAuth callback is in progress")]
    CallbackInProgress,

    /// The underlying storage backend rejected a write (e.g. quota) at
    /// runtime, after construction.
    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    /// Propagated from [`crate::clock`]-adjacent or caller-supplied
    /// collaborators that don't fit another variant.
    #[error("{0}")]
    Other(String),

    /// The `TokenClient` collaborator's OAuth round-trip failed.
    #[error(transparent)]
    Renew(#[from] RenewError),
}

/// Error returned by the `TokenClient::renew` collaborator.
///
/// The coordinator re-throws this after adding `token_key`, preserving the
/// original variant so callers can match on `OAuth` vs `AuthSdk`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum RenewError {
    /// OAuth-protocol-level failure returned by the authorization server.
    #[error("OAuth error [{error_code}]: {error_summary}")]
    OAuth {
        /// The token key this renewal was for, filled in by the coordinator.
        #[serde(skip_serializing_if = "Option::is_none")]
        token_key: Option<String>,
        /// Machine-readable OAuth error code.
        error_code: String,
        /// Human-readable summary.
        error_summary: String,
    },
    /// SDK-level failure (network, config, etc.) not specific to OAuth.
    #[error("AuthSdk error [{error_code}]: {error_summary}")]
    AuthSdk {
        /// The token key this renewal was for, filled in by the coordinator.
        #[serde(skip_serializing_if = "Option::is_none")]
        token_key: Option<String>,
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable summary.
        error_summary: String,
        /// Link to documentation about the error, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        error_link: Option<String>,
        /// Unique ID for this error instance, for support correlation.
        #[serde(skip_serializing_if = "Option::is_none")]
        error_id: Option<String>,
        /// Nested causes, if the SDK reported any.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        error_causes: Vec<String>,
    },
}

impl RenewError {
    /// Tag this error with the token key that was being renewed. Coordinator
    /// calls this exactly once, after a failed renewal.
    #[must_use]
    pub fn with_token_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        match &mut self {
            Self::OAuth { token_key, .. } | Self::AuthSdk { token_key, .. } => {
                *token_key = Some(key);
            }
        }
        self
    }

    /// The token key this error was tagged with, if any.
    #[must_use]
    pub fn token_key(&self) -> Option<&str> {
        match self {
            Self::OAuth { token_key, .. } | Self::AuthSdk { token_key, .. } => {
                token_key.as_deref()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renew_error_tags_token_key_once() {
        let err = RenewError::OAuth {
            token_key: None,
            error_code: "invalid_grant".to_string(),
            error_summary: "refresh token expired".to_string(),
        }
        .with_token_key("accessToken");

        assert_eq!(err.token_key(), Some("accessToken"));
    }

    #[test]
    fn too_many_renew_requests_displays_policy_constants() {
        let err = TokenManagerError::TooManyRenewRequests {
            attempts: 10,
            span_ms: 18_000,
            threshold_ms: 30_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("10 attempts"));
        assert!(msg.contains("18000ms"));
    }
}
