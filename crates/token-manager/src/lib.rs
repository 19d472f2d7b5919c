//! # token-manager
//!
//! Client-side OAuth/OIDC token lifecycle management: pluggable storage
//! (memory, a browser-`localStorage`-shaped key/value interface, cookies,
//! or a caller-supplied backend), expiration scheduling, single-flight
//! renewal coordination, renewal-storm rate limiting, and cross-tab
//! synchronization, behind one [`manager::TokenManager`] facade.
//!
//! ## Modules
//!
//! - [`types`] — [`types::Token`], [`types::TokenKey`], the persisted shape
//! - [`config`] — [`config::TokenManagerConfig`] and its builder
//! - [`event_bus`] — [`event_bus::EventBus`], the lifecycle event taxonomy
//! - [`storage`] — [`storage::StorageBackend`] and its implementations
//! - [`store`] — [`store::TokenStore`], the load/save primitive
//! - [`scheduler`] — [`scheduler::ExpirationScheduler`]
//! - [`renew`] — [`renew::RenewCoordinator`] and [`renew::TokenClient`]
//! - [`rate_limit`] — [`rate_limit::RenewRateLimiter`]
//! - [`cross_tab`] — [`cross_tab::CrossTabSynchronizer`]
//! - [`manager`] — [`manager::TokenManager`], the facade

pub mod config;
pub mod cross_tab;
pub mod event_bus;
pub mod manager;
pub mod rate_limit;
pub mod renew;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod types;

#[doc(inline)]
pub use config::{NamedStorage, StorageChoice, TokenManagerConfig, TokenManagerConfigBuilder};
#[doc(inline)]
pub use cross_tab::{CrossTabSynchronizer, InProcessStorageChangeBus, StorageChangeEvent, StorageChangeSource};
#[doc(inline)]
pub use event_bus::{Event, EventBus, EventKind, SubscriptionId};
#[doc(inline)]
pub use manager::{TokenBundle, TokenManager, TokenManagerBuilder};
#[doc(inline)]
pub use rate_limit::RenewRateLimiter;
#[doc(inline)]
pub use renew::{RenewCoordinator, TokenClient};
#[doc(inline)]
pub use scheduler::ExpirationScheduler;
#[doc(inline)]
pub use storage::StorageBackend;
#[doc(inline)]
pub use store::TokenStore;
#[doc(inline)]
pub use types::{Token, TokenKey, TokenPayload};

pub use token_manager_core::{Clock, RenewError, TokenManagerError, TokenResult};
