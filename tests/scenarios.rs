//! End-to-end scenarios from the specification's Testable Properties
//! section, exercised with the literal values given there against
//! `MemoryStore` (no external Redis dependency required to run these).

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use racecache::prelude::*;
use rstest::rstest;

fn counting_loader(counter: Arc<AtomicU32>, sleep_for: Duration) -> impl Fn(serde_json::Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<serde_json::Value, LoaderError>> + Send>> {
    move |args| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if !sleep_for.is_zero() {
                tokio::time::sleep(sleep_for).await;
            }
            Ok(serde_json::json!({"id": args}))
        })
    }
}

#[tokio::test]
async fn scenario_1_cold_cache_single_caller() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(AtomicU32::new(0));
    let options = LoaderOptions { ttl: Some(2), ..Default::default() };
    let loader = Loader::new("users", Arc::clone(&store), options, counting_loader(counter.clone(), Duration::ZERO)).unwrap();

    let value = loader.load("u1").await.unwrap();
    assert_eq!(value, serde_json::json!({"id": "u1"}));

    let remaining = store.ttl("nwloader:users:u1").await.unwrap();
    assert!(remaining > 0 && remaining <= 4, "remaining TTL was {remaining}");
}

#[tokio::test]
async fn scenario_2_cold_cache_eight_concurrent_callers_single_flight() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(AtomicU32::new(0));
    let options = LoaderOptions { ttl: Some(2), ..Default::default() };
    let loader = Arc::new(
        Loader::new("users", store, options, counting_loader(counter.clone(), Duration::from_millis(10))).unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let loader = Arc::clone(&loader);
        handles.push(tokio::spawn(async move { loader.load("u1").await.unwrap() }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results.len(), 8);
    for value in results {
        assert_eq!(value, serde_json::json!({"id": "u1"}));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_3_warm_cache_fresh_skips_loader() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(AtomicU32::new(0));
    let options = LoaderOptions { ttl: Some(2), ..Default::default() };
    let loader = Loader::new("users", store, options, counting_loader(counter.clone(), Duration::ZERO)).unwrap();

    loader.load("u1").await.unwrap();
    let value = loader.load("u1").await.unwrap();

    assert_eq!(value, serde_json::json!({"id": "u1"}));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_4_warm_cache_stale_window_serves_then_refreshes_in_background() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(AtomicU32::new(0));
    // The loader sleeps far longer than a cache read so a blocking
    // implementation would make the assertion below fail.
    let loader_sleep = Duration::from_millis(200);
    let options = LoaderOptions { ttl: Some(2), ..Default::default() };
    let loader =
        Loader::new("users", Arc::clone(&store), options, counting_loader(counter.clone(), loader_sleep)).unwrap();

    loader.load("u1").await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let started = Instant::now();
    let value = loader.load("u1").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(value, serde_json::json!({"id": "u1"}), "stale value is still served immediately");
    assert!(
        elapsed < loader_sleep / 2,
        "load() took {elapsed:?}, which means it waited on the background refresh instead of returning the cached value"
    );

    tokio::time::sleep(loader_sleep + Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2, "exactly one background refresh ran");
}

#[tokio::test]
async fn scenario_6_loader_error_is_not_cached_and_is_retried() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(AtomicU32::new(0));
    let options = LoaderOptions { ttl: Some(2), ..Default::default() };
    let counter_for_loader = counter.clone();
    let loader = Loader::new("errors", store, options, move |_args| {
        let counter = counter_for_loader.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LoaderError::new("Simulated loader error"))
        }
    })
    .unwrap();

    let first = loader.load("error").await;
    assert!(first.is_err());
    assert!(first.unwrap_err().to_string().contains("Simulated loader error"));

    let second = loader.load("error").await;
    assert!(second.is_err());
    assert!(second.unwrap_err().to_string().contains("Simulated loader error"));
    assert_eq!(counter.load(Ordering::SeqCst), 2, "a failing loader is retried on every call");
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_5_sustained_load_bounds_invocation_count() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(AtomicU32::new(0));
    let options = LoaderOptions { ttl: Some(5), ..Default::default() };
    let loader = Arc::new(
        Loader::new("counter", store, options, counting_loader(counter.clone(), Duration::from_millis(1))).unwrap(),
    );

    for _ in 0..100 {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let loader = Arc::clone(&loader);
            handles.push(tokio::spawn(async move { loader.load(1).await.unwrap() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let invocations = counter.load(Ordering::SeqCst);
    assert!(invocations <= 3, "loader invoked {invocations} times, expected <= 3");
}

#[rstest]
#[case::ttl_zero(LoaderOptions { ttl: Some(0), ..Default::default() }, "users")]
#[case::ttl_one(LoaderOptions { ttl: Some(1), ..Default::default() }, "users")]
#[case::name_with_slash(LoaderOptions::default(), "users/profile")]
#[case::empty_name(LoaderOptions::default(), "")]
#[tokio::test]
async fn boundary_construction_rejects_invalid_input(#[case] options: LoaderOptions, #[case] name: &str) {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let result = Loader::new(name, store, options, |args| async move { Ok(args) });
    assert!(result.is_err());
}

#[tokio::test]
async fn boundary_object_argument_key_order_does_not_change_cache_key() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(AtomicU32::new(0));
    let options = LoaderOptions { ttl: Some(2), ..Default::default() };
    let loader = Loader::new("users", store, options, counting_loader(counter.clone(), Duration::ZERO)).unwrap();

    loader.load(serde_json::json!({"a": 1, "b": 2})).await.unwrap();
    loader.load(serde_json::json!({"b": 2, "a": 1})).await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1, "both argument orderings derive the same cache key");
}
