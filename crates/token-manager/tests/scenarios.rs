//! End-to-end scenario tests covering basic add/get, storage auto-downgrade,
//! single-flight renewal, renewal-storm rate limiting, cross-tab
//! synchronization, and expired-token reads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use token_manager::config::NamedStorage;
use token_manager::cross_tab::{CrossTabSynchronizer, InProcessStorageChangeBus, StorageChangeEvent, StorageChangeSource};
use token_manager::event_bus::{Event, EventBus, EventKind};
use token_manager::rate_limit::RenewRateLimiter;
use token_manager::renew::{RenewCoordinator, TokenClient};
use token_manager::scheduler::ExpirationScheduler;
use token_manager::store::TokenStore;
use token_manager::storage::MemoryBackend;
use token_manager::{RenewError, Token, TokenKey, TokenManager, TokenManagerConfig, TokenManagerError};
use token_manager_core::{AdvancingClock, Clock, FixedClock};

#[derive(Debug)]
struct StubClient {
    outcome: Token,
}

#[async_trait]
impl TokenClient for StubClient {
    async fn renew(&self, _key: &TokenKey) -> Result<Token, RenewError> {
        Ok(self.outcome.clone())
    }
}

/// S1. Basic add/get: a freshly-added token reads back unchanged and is not
/// expired.
#[tokio::test]
async fn s1_basic_add_get() {
    let manager = TokenManager::builder(Arc::new(StubClient {
        outcome: Token::access_token("unused", vec!["openid".to_string()], 1),
    }))
    .config(
        TokenManagerConfig::builder()
            .storage(NamedStorage::Memory)
            .build()
            .unwrap(),
    )
    .clock(Arc::new(FixedClock(1_000_000_000_000)))
    .build()
    .await
    .unwrap();

    let token = Token::id_token(
        "X",
        vec!["openid".to_string()],
        2_000_000_000,
        serde_json::Map::new(),
    );
    manager.add(TokenKey::new("id"), token.clone()).await.unwrap();

    let read_back = manager.get(&TokenKey::new("id")).await.unwrap();
    assert_eq!(read_back, Some(token.clone()));
    assert!(!manager.has_expired(&token));
}

/// S2. Auto-downgrade: a disabled preferred medium causes the construction
/// cascade to settle on the next one in order.
#[tokio::test]
async fn s2_auto_downgrade_to_session_storage() {
    let manager = TokenManager::builder(Arc::new(StubClient {
        outcome: Token::access_token("unused", vec!["openid".to_string()], 1),
    }))
    .config(
        TokenManagerConfig::builder()
            .disabled_storage(vec![NamedStorage::LocalStorage])
            .build()
            .unwrap(),
    )
    .build()
    .await
    .unwrap();

    assert_eq!(manager.backend_label(), "sessionStorage");
}

/// S3. Single-flight renew: two concurrent `renew(k)` calls share one
/// collaborator invocation, and the success path emits `renewed`, `added`,
/// `removed` in that order.
#[tokio::test(start_paused = true)]
async fn s3_single_flight_renew_emits_events_in_order() {
    let key = TokenKey::new("k");
    let old_token = Token::access_token("t", vec!["openid".to_string()], 1);
    let new_token = Token::access_token("t-prime", vec!["openid".to_string()], 2_000_000_000);

    #[derive(Debug)]
    struct OneTickClient {
        calls: AtomicUsize,
        outcome: Token,
    }

    #[async_trait]
    impl TokenClient for OneTickClient {
        async fn renew(&self, _key: &TokenKey) -> Result<Token, RenewError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            Ok(self.outcome.clone())
        }
    }

    let client = Arc::new(OneTickClient {
        calls: AtomicUsize::new(0),
        outcome: new_token.clone(),
    });

    let store = TokenStore::new(Arc::new(MemoryBackend::new()), "prefix".to_string());
    store.set_one(key.clone(), old_token.clone()).await.unwrap();

    let bus = EventBus::new();
    let sequence = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    for (kind, label) in [
        (EventKind::Renewed, "renewed"),
        (EventKind::Added, "added"),
        (EventKind::Removed, "removed"),
    ] {
        let sequence = Arc::clone(&sequence);
        bus.on(kind, move |_| {
            sequence.lock().unwrap().push(label);
        });
    }

    let coordinator = Arc::new(RenewCoordinator::new(
        client.clone(),
        store,
        Arc::new(ExpirationScheduler::new()),
        bus,
        Arc::new(FixedClock(0)),
        Arc::new(TokenManagerConfig::default()),
    ));

    let c1 = Arc::clone(&coordinator);
    let c2 = Arc::clone(&coordinator);
    let k1 = key.clone();
    let k2 = key.clone();

    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { c1.renew(k1).await }),
        tokio::spawn(async move { c2.renew(k2).await })
    );
    let r1 = r1.unwrap().unwrap();
    let r2 = r2.unwrap().unwrap();

    assert_eq!(r1, r2);
    assert_eq!(r1, new_token);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*sequence.lock().unwrap(), vec!["renewed", "added", "removed"]);
}

/// S4. Rate limiter: a storm of 10 expiry-driven attempts at 2-second
/// spacing trips the limiter exactly once (on the 10th); after a 50-second
/// gap the limiter recovers and every subsequent attempt proceeds.
#[tokio::test]
async fn s4_rate_limiter_trips_once_then_recovers() {
    let clock = Arc::new(AdvancingClock::new(0));
    let limiter = RenewRateLimiter::new(Arc::clone(&clock) as Arc<dyn Clock>);
    let renew_calls = Arc::new(AtomicUsize::new(0));
    let error_count = Arc::new(AtomicUsize::new(0));

    async fn fire_and_maybe_renew(
        limiter: &RenewRateLimiter,
        renew_calls: &AtomicUsize,
        error_count: &AtomicUsize,
    ) {
        match limiter.check_and_record().await {
            Ok(()) => {
                renew_calls.fetch_add(1, Ordering::SeqCst);
            }
            Err(TokenManagerError::TooManyRenewRequests { .. }) => {
                error_count.fetch_add(1, Ordering::SeqCst);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    for _ in 0..10 {
        fire_and_maybe_renew(&limiter, &renew_calls, &error_count).await;
        clock.advance_secs(2);
    }
    assert_eq!(error_count.load(Ordering::SeqCst), 1);
    assert_eq!(renew_calls.load(Ordering::SeqCst), 9);

    clock.advance_secs(50);

    for _ in 0..10 {
        fire_and_maybe_renew(&limiter, &renew_calls, &error_count).await;
        clock.advance_secs(5);
    }
    assert_eq!(error_count.load(Ordering::SeqCst), 1);
    assert_eq!(renew_calls.load(Ordering::SeqCst), 19);
}

/// S5. Cross-tab add: a storage-change notification from `null` to a
/// single-key blob emits exactly one `added` and never writes to storage.
#[tokio::test]
async fn s5_cross_tab_add_emits_added_without_writing() {
    let change_bus = InProcessStorageChangeBus::new(16);
    let source: Arc<dyn StorageChangeSource> = Arc::new(change_bus.clone());
    let bus = EventBus::new();
    let added_payload = Arc::new(Mutex::new(None));
    let added_payload2 = Arc::clone(&added_payload);
    let added_count = Arc::new(AtomicUsize::new(0));
    let added_count2 = Arc::clone(&added_count);
    bus.on(EventKind::Added, move |event| {
        if let Event::Added(key, token) = event {
            *added_payload2.lock().unwrap() = Some((key.clone(), token.clone()));
        }
        added_count2.fetch_add(1, Ordering::SeqCst);
    });

    let store = TokenStore::new(Arc::new(MemoryBackend::new()), "okta-token-storage".to_string());

    let _synchronizer = CrossTabSynchronizer::spawn(
        source,
        "okta-token-storage".to_string(),
        0,
        bus,
        Arc::new(ExpirationScheduler::new()),
        Arc::new(FixedClock(0)) as Arc<dyn Clock>,
        30,
        0,
    );

    let new_blob = json!({
        "idToken": {
            "scopes": ["openid"],
            "expiresAt": 2_000_000_000,
            "idToken": "T",
            "claims": {},
        }
    })
    .to_string();

    change_bus.publish(StorageChangeEvent {
        key: Some("okta-token-storage".to_string()),
        old_value: None,
        new_value: Some(new_blob),
    });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(added_count.load(Ordering::SeqCst), 1);
    let (key, token) = added_payload.lock().unwrap().clone().unwrap();
    assert_eq!(key, TokenKey::new("idToken"));
    assert_eq!(
        token,
        Token::id_token("T", vec!["openid".to_string()], 2_000_000_000, serde_json::Map::new())
    );
    assert!(store.load().await.unwrap().is_empty());
}

/// S6. Expired read returns nothing: a token whose effective expiry has
/// already passed reads back as absent, but `remove` still reports (and
/// emits) its value.
#[tokio::test]
async fn s6_expired_read_returns_none_but_remove_reports_value() {
    let manager = TokenManager::builder(Arc::new(StubClient {
        outcome: Token::access_token("unused", vec!["openid".to_string()], 1),
    }))
    .config(
        TokenManagerConfig::builder()
            .storage(NamedStorage::Memory)
            .expire_early_seconds(0)
            .local_clock_offset_ms(0)
            .is_local_development(true)
            .build()
            .unwrap(),
    )
    .clock(Arc::new(FixedClock(1001 * 1000)))
    .build()
    .await
    .unwrap();

    let key = TokenKey::new("id");
    let token = Token::access_token("t", vec!["openid".to_string()], 1000);
    manager.add(key.clone(), token.clone()).await.unwrap();

    assert_eq!(manager.get(&key).await.unwrap(), None);

    let removed_payload = Arc::new(Mutex::new(None));
    let removed_payload2 = Arc::clone(&removed_payload);
    manager.on(EventKind::Removed, move |event| {
        if let Event::Removed(_, removed_token) = event {
            *removed_payload2.lock().unwrap() = Some(removed_token.clone());
        }
    });

    let removed = manager.remove(&key).await.unwrap();
    assert_eq!(removed, Some(token.clone()));
    assert_eq!(*removed_payload.lock().unwrap(), Some(token));
}
