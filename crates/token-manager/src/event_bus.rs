//! Synchronous publish/subscribe bus for token lifecycle events.
//!
//! Modeled as a capability interface (`on` / `off` / `emit`) supplied at
//! construction rather than a module-global. Handlers run synchronously on
//! the emitting task; a handler that needs to do async work spawns its own
//! task (see `manager::TokenManager::wire_expiry_reaction`, which does
//! exactly that to react to `Expired`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use token_manager_core::TokenManagerError;

use crate::types::{Token, TokenKey};

/// A lifecycle event published on the bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// A token was added under `key`.
    Added(TokenKey, Token),
    /// A token was removed from under `key`; carries the value removed.
    Removed(TokenKey, Token),
    /// A token under `key` was renewed; carries the new and old values.
    Renewed(TokenKey, Token, Token),
    /// A token under `key` passed its effective expiry.
    Expired(TokenKey, Token),
    /// An operation failed.
    Error(TokenManagerError),
}

/// The channel an [`Event`] was published on, used for subscription
/// filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Matches [`Event::Added`].
    Added,
    /// Matches [`Event::Removed`].
    Removed,
    /// Matches [`Event::Renewed`].
    Renewed,
    /// Matches [`Event::Expired`].
    Expired,
    /// Matches [`Event::Error`].
    Error,
}

impl Event {
    /// The channel this event was published on.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Added(..) => EventKind::Added,
            Event::Removed(..) => EventKind::Removed,
            Event::Renewed(..) => EventKind::Renewed,
            Event::Expired(..) => EventKind::Expired,
            Event::Error(..) => EventKind::Error,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe via
/// [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Inner {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
}

/// A cheaply cloneable handle to the event bus. Cloning shares the same
/// subscriber set; every clone publishes onto and hears from the same bus.
#[derive(Clone)]
pub struct EventBus(Arc<Inner>);

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a fresh, unsubscribed bus.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
        }))
    }

    /// Subscribe `handler` to `kind`, returning an id usable with [`Self::off`].
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.0.next_id.fetch_add(1, Ordering::Relaxed));
        self.0
            .handlers
            .lock()
            .expect("event bus mutex poisoned")
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription previously returned by [`Self::on`].
    pub fn off(&self, kind: EventKind, id: SubscriptionId) {
        if let Some(subs) = self
            .0
            .handlers
            .lock()
            .expect("event bus mutex poisoned")
            .get_mut(&kind)
        {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Publish an event, synchronously invoking every subscriber on its
    /// channel in registration order.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let subs: Vec<Handler> = self
            .0
            .handlers
            .lock()
            .expect("event bus mutex poisoned")
            .get(&kind)
            .map(|v| v.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in subs {
            handler(&event);
        }
    }
}
