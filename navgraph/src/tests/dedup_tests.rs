//! Tests for the element deduplication cache

use crate::dedup::{CacheConfig, CacheStatsSource, ElementDeduplicationCache, Residency};
use crate::element::{UIElement, UIElementAttributes};
use crate::fingerprint::{ElementHash, ScreenHash};
use crate::models::{ElementRecord, Provenance, ScreenState};
use crate::store::NavigationGraphStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const APP: &str = "com.example.shop";

async fn store_with_screen(screen: &ScreenHash) -> Arc<NavigationGraphStore> {
    let store = Arc::new(NavigationGraphStore::in_memory());
    store
        .upsert_screen(&ScreenState::new(
            screen.clone(),
            APP,
            "CartActivity",
            3,
            Provenance::Exploration,
            Utc::now(),
        ))
        .await
        .unwrap();
    store
}

fn record(hash: &str, screen: &ScreenHash) -> ElementRecord {
    let element = UIElement {
        handle: format!("cart/{hash}"),
        window_id: 1,
        app_id: APP.to_string(),
        attributes: UIElementAttributes {
            role: "Button".to_string(),
            text: Some(hash.to_string()),
            clickable: true,
            ..Default::default()
        },
        depth: 1,
        ancestor_roles: vec!["FrameLayout".to_string()],
        twin_index: 0,
    };
    ElementRecord::from_element(
        ElementHash::from(hash),
        screen.clone(),
        &element,
        Provenance::Exploration,
        Utc::now(),
    )
}

#[tokio::test]
async fn registration_is_idempotent() {
    let screen = ScreenHash::from("cart");
    let store = store_with_screen(&screen).await;
    let cache = ElementDeduplicationCache::new(store.clone(), CacheConfig::default());

    assert!(!cache.exists(&ElementHash::from("checkout")).await.unwrap());
    assert!(cache.register_if_new(record("checkout", &screen)).await.unwrap());
    for _ in 0..3 {
        assert!(!cache.register_if_new(record("checkout", &screen)).await.unwrap());
    }
    assert!(cache.exists(&ElementHash::from("checkout")).await.unwrap());
    assert_eq!(store.write_stats().elements_inserted, 1);
}

#[tokio::test]
async fn durable_tier_answers_after_memory_eviction() {
    let screen = ScreenHash::from("cart");
    let store = store_with_screen(&screen).await;
    let cache = ElementDeduplicationCache::new(store, CacheConfig::default());

    cache.register_if_new(record("pay", &screen)).await.unwrap();
    cache.clear_memory_tier();
    cache.reset_stats();

    assert!(cache.exists(&ElementHash::from("pay")).await.unwrap());
    let stats = cache.cache_stats();
    assert_eq!(stats.durable_hits, 1);
    // Promoted back into memory
    assert_eq!(stats.memory_entries, 1);

    assert!(cache.exists(&ElementHash::from("pay")).await.unwrap());
    assert_eq!(cache.cache_stats().memory_hits, 1);
}

#[tokio::test]
async fn lru_capacity_bounds_memory_tier() {
    let screen = ScreenHash::from("cart");
    let store = store_with_screen(&screen).await;
    let cache = ElementDeduplicationCache::new(
        store,
        CacheConfig {
            memory_capacity: 2,
            ..Default::default()
        },
    );

    for name in ["a", "b", "c"] {
        assert!(cache.register_if_new(record(name, &screen)).await.unwrap());
    }
    assert_eq!(cache.cache_stats().memory_entries, 2);
    // Evicted from memory, still known
    assert!(!cache.register_if_new(record("a", &screen)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn transient_entries_expire_but_stay_durable() {
    let screen = ScreenHash::from("cart");
    let store = store_with_screen(&screen).await;
    let cache = ElementDeduplicationCache::new(
        store,
        CacheConfig {
            transient_ttl_ms: 1000,
            ..Default::default()
        },
    );

    cache
        .register_with(record("share", &screen), Residency::Transient)
        .await
        .unwrap();
    assert!(cache.exists(&ElementHash::from("share")).await.unwrap());
    assert_eq!(cache.cache_stats().transient_hits, 1);

    tokio::time::advance(Duration::from_millis(1500)).await;
    assert!(cache.exists(&ElementHash::from("share")).await.unwrap());
    let stats = cache.cache_stats();
    assert_eq!(stats.transient_hits, 1);
    assert_eq!(stats.durable_hits, 1);
    assert_eq!(stats.transient_entries, 0);
}

#[tokio::test]
async fn orphan_element_is_rejected_not_registered() {
    let store = Arc::new(NavigationGraphStore::in_memory());
    let cache = ElementDeduplicationCache::new(store.clone(), CacheConfig::default());

    let registered = cache
        .register_if_new(record("ghost", &ScreenHash::from("missing")))
        .await
        .unwrap();
    assert!(!registered);
    assert_eq!(store.write_stats().rejected, 1);
    assert!(!cache.exists(&ElementHash::from("ghost")).await.unwrap());
}

#[tokio::test]
async fn hit_rate_reflects_lookups() {
    let screen = ScreenHash::from("cart");
    let store = store_with_screen(&screen).await;
    let cache = ElementDeduplicationCache::new(store, CacheConfig::default());
    assert_eq!(cache.cache_stats().hit_rate(), 0.0);

    cache.register_if_new(record("x", &screen)).await.unwrap();
    cache.reset_stats();
    for _ in 0..4 {
        cache.exists(&ElementHash::from("x")).await.unwrap();
    }
    let stats = cache.cache_stats();
    assert_eq!(stats.lookups(), 4);
    assert_eq!(stats.hit_rate(), 1.0);
}

#[tokio::test]
async fn known_elements_are_touched_not_rewritten() {
    let screen = ScreenHash::from("cart");
    let store = store_with_screen(&screen).await;
    let cache = ElementDeduplicationCache::new(store.clone(), CacheConfig::default());

    assert!(cache
        .register_or_touch(record("coupon", &screen), Residency::Screen)
        .await
        .unwrap());
    let first = store
        .get_element(&ElementHash::from("coupon"))
        .await
        .unwrap()
        .unwrap();

    for _ in 0..2 {
        assert!(!cache
            .register_or_touch(record("coupon", &screen), Residency::Screen)
            .await
            .unwrap());
    }
    let touched = store
        .get_element(&ElementHash::from("coupon"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(touched.seen_count, 3);
    assert_eq!(touched.first_seen, first.first_seen);
    assert!(touched.last_seen >= first.last_seen);
    assert_eq!(store.write_stats().elements_inserted, 1);
    assert_eq!(cache.cache_stats().registrations, 1);
}
