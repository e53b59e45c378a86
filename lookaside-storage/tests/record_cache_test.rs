//! Single-record caching and compare-and-swap writes through `DataAccess`.

use std::sync::Arc;
use std::time::Duration;

use lookaside_storage::{LookasideCache, MemoryCache};
use lookaside_test_utils::assertions::{
    assert_concurrency_conflict, assert_duplicate_key, assert_validation_error, cached_scores,
};
use lookaside_test_utils::fixtures::{self, record};
use lookaside_test_utils::{init_tracing, json, CountingStore, ItemId};

const TTL: Duration = Duration::from_secs(60);

struct Harness {
    store: Arc<CountingStore>,
    cache: Arc<MemoryCache>,
    access: lookaside_storage::DataAccess,
}

fn harness() -> Harness {
    init_tracing();
    let store = Arc::new(CountingStore::new(fixtures::seeded_store()));
    let cache = Arc::new(MemoryCache::new());
    let access = fixtures::access(store.clone(), cache.clone());
    Harness {
        store,
        cache,
        access,
    }
}

#[tokio::test]
async fn test_get_cached_populates_plain_entry() {
    let h = harness();
    let users = fixtures::users();
    let id = ItemId::from("user-1");

    let item = h.access.get_cached(&users, &id, Some(TTL)).await.unwrap();
    assert_eq!(item, Some(fixtures::user_1()));
    h.access.flush().await;

    assert_eq!(
        h.cache.get("prefix.users!user-1").await.unwrap().as_deref(),
        Some(r#"{"id":"user-1","iv":0}"#)
    );
    assert_eq!(h.cache.ttl("prefix.users!user-1").await.unwrap(), Some(TTL));

    let again = h.access.get_cached(&users, &id, Some(TTL)).await.unwrap();
    assert_eq!(again, Some(fixtures::user_1()));
    assert_eq!(h.store.reads(), 1);

    let stats = h.access.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_absent_key_writes_nothing() {
    let h = harness();
    let users = fixtures::users();
    let id = ItemId::from("nobody");

    assert_eq!(h.access.get(&users, &id).await.unwrap(), None);
    assert_eq!(h.access.get_cached(&users, &id, None).await.unwrap(), None);
    assert_eq!(
        h.access.get_cached_versioned(&users, &id, None).await.unwrap(),
        None
    );
    h.access.flush().await;
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_create_versioned_starts_at_zero() {
    let h = harness();
    let users = fixtures::users();

    let created = h
        .access
        .create_versioned(&users, record(json!({"id": "user-2", "name": "Ada"})))
        .await
        .unwrap();
    assert_eq!(created, record(json!({"id": "user-2", "name": "Ada", "iv": 0})));

    let read = h
        .access
        .get_cached_versioned(&users, &ItemId::from("user-2"), Some(TTL))
        .await
        .unwrap();
    assert_eq!(read, Some(created.clone()));
    h.access.flush().await;

    let scores = cached_scores(&h.cache, "prefix.users!user-2").await;
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].1, 0.0);

    let duplicate = h.access.create_versioned(&users, created).await;
    assert_duplicate_key(&duplicate);
}

#[tokio::test]
async fn test_unrefreshed_update_conflicts() {
    let h = harness();
    let users = fixtures::users();
    let observed = record(json!({"id": "user-1", "iv": 0, "name": "first"}));

    let first = h.access.update_versioned(&users, observed.clone()).await.unwrap();
    assert_eq!(first.get("iv"), Some(&json!(1)));

    let second = h.access.update_versioned(&users, observed).await;
    assert_concurrency_conflict(&second);
    assert!(second.as_ref().unwrap_err().is_condition_failed());

    let third = h.access.update_versioned(&users, first).await.unwrap();
    assert_eq!(third.get("iv"), Some(&json!(2)));
}

#[tokio::test]
async fn test_update_seeds_missing_version() {
    let h = harness();
    let plain = fixtures::users();
    h.access
        .put(&plain, record(json!({"id": "legacy", "name": "old"})))
        .await
        .unwrap();

    let seeded = h
        .access
        .update_versioned(&plain, record(json!({"id": "legacy", "name": "new"})))
        .await
        .unwrap();
    assert_eq!(seeded.get("iv"), Some(&json!(0)));

    let again = h
        .access
        .update_versioned(&plain, record(json!({"id": "legacy", "name": "newer"})))
        .await;
    assert_concurrency_conflict(&again);

    let malformed = h
        .access
        .update_versioned(&plain, record(json!({"id": "legacy", "iv": "two"})))
        .await;
    assert_validation_error(&malformed);
}

#[tokio::test]
async fn test_cached_writes_need_no_store_reads() {
    let h = harness();
    let users = fixtures::users();
    let id = ItemId::from("user-3");

    let created = h
        .access
        .create_cached_versioned(&users, record(json!({"id": "user-3"})), Some(TTL))
        .await
        .unwrap();
    let read = h.access.get_cached_versioned(&users, &id, None).await.unwrap();
    assert_eq!(read, Some(created.clone()));

    let updated = h
        .access
        .update_cached_versioned(&users, created, Some(TTL))
        .await
        .unwrap();
    let read = h.access.get_cached_versioned(&users, &id, None).await.unwrap();
    assert_eq!(read, Some(updated));

    assert_eq!(h.store.reads(), 0);
    assert_eq!(h.store.total(), 2);
}

#[tokio::test]
async fn test_versioned_entry_keeps_one_member() {
    let h = harness();
    let users = fixtures::users();
    let id = ItemId::from("user-9");

    let mut item = h
        .access
        .create_cached_versioned(&users, record(json!({"id": "user-9"})), Some(TTL))
        .await
        .unwrap();
    for _ in 0..5 {
        item = h
            .access
            .update_cached_versioned(&users, item, Some(TTL))
            .await
            .unwrap();
    }
    let read = h.access.get_cached_versioned(&users, &id, None).await.unwrap();
    assert_eq!(read, Some(item));
    h.access.flush().await;

    let scores = cached_scores(&h.cache, "prefix.users!user-9").await;
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].1, 5.0);
}

#[tokio::test]
async fn test_put_cached_writes_plain_entry() {
    let h = harness();
    let users = fixtures::users();
    let item = record(json!({"id": "user-4", "name": "Grace"}));

    let written = h
        .access
        .put_cached(&users, item.clone(), Some(TTL))
        .await
        .unwrap();
    assert_eq!(written, item);
    assert_eq!(
        h.cache.get("prefix.users!user-4").await.unwrap().as_deref(),
        Some(r#"{"id":"user-4","name":"Grace"}"#)
    );
    assert_eq!(h.cache.ttl("prefix.users!user-4").await.unwrap(), Some(TTL));

    let read = h
        .access
        .get_cached(&users, &ItemId::from("user-4"), None)
        .await
        .unwrap();
    assert_eq!(read, Some(item));
    assert_eq!(h.store.reads(), 0);
    assert_eq!(h.access.stats().hits, 1);
}

#[tokio::test]
async fn test_whole_float_ids_use_integer_keys() {
    init_tracing();
    let store = fixtures::seeded_store();
    fixtures::seed(&store, &fixtures::users(), [record(json!({"id": 1.0, "iv": 0}))]);
    let cache = Arc::new(MemoryCache::new());
    let access = fixtures::access(store, cache.clone());
    let users = fixtures::users();

    let item = access
        .get_cached(&users, &ItemId::new(json!(1.0)), None)
        .await
        .unwrap();
    assert!(item.is_some());
    access.flush().await;

    assert!(cache.contains("prefix.users!1"));
    assert!(!cache.contains("prefix.users!1.0"));
    let again = access
        .get_cached(&users, &ItemId::new(json!(1)), None)
        .await
        .unwrap();
    assert_eq!(again, item);
    assert_eq!(access.stats().hits, 1);
}

#[tokio::test]
async fn test_stale_versioned_entry_is_a_miss() {
    let h = harness();
    let users = fixtures::users();
    // Payload claims version 5 but is scored 7.
    h.cache
        .zadd("prefix.users!user-1", 7.0, r#"{"id":"user-1","iv":5}"#)
        .await
        .unwrap();

    let read = h
        .access
        .get_cached_versioned(&users, &ItemId::from("user-1"), Some(TTL))
        .await
        .unwrap();
    assert_eq!(read, Some(fixtures::user_1()));
    assert_eq!(h.store.reads(), 1);
}

#[tokio::test]
async fn test_delete_cached_drops_entry() {
    let h = harness();
    let users = fixtures::users();
    let id = ItemId::from("user-1");

    h.access.get_cached(&users, &id, None).await.unwrap();
    h.access.flush().await;
    assert!(h.cache.contains("prefix.users!user-1"));

    h.access.delete_cached(&users, &id).await.unwrap();
    assert!(!h.cache.contains("prefix.users!user-1"));
    assert_eq!(h.access.get_cached(&users, &id, None).await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_cached_versioned_checks_version() {
    let h = harness();
    let users = fixtures::users();
    let id = ItemId::from("user-1");

    h.access.get_cached_versioned(&users, &id, None).await.unwrap();
    h.access.flush().await;

    let stale = h.access.remove_cached_versioned(&users, &id, 3).await;
    assert_concurrency_conflict(&stale);
    assert!(h.cache.contains("prefix.users!user-1"));

    h.access.remove_cached_versioned(&users, &id, 0).await.unwrap();
    assert!(!h.cache.contains("prefix.users!user-1"));
    assert_eq!(h.access.get(&users, &id).await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_ranged_versioned() {
    let h = harness();
    let memberships = fixtures::memberships();

    let stale = h
        .access
        .remove_ranged_versioned(&memberships, "group-1", "user-2", 0)
        .await;
    assert_concurrency_conflict(&stale);

    h.access
        .remove_ranged_versioned(&memberships, "group-1", "user-2", 3)
        .await
        .unwrap();
    let gone = h
        .access
        .get(&memberships, &ItemId::ranged("group-1", "user-2"))
        .await
        .unwrap();
    assert_eq!(gone, None);
}

#[tokio::test]
async fn test_disconnected_cache_falls_back_to_store() {
    let h = harness();
    let users = fixtures::users();
    h.cache.set_connected(false);

    for _ in 0..2 {
        let read = h
            .access
            .get_cached_versioned(&users, &ItemId::from("user-1"), None)
            .await
            .unwrap();
        assert_eq!(read, Some(fixtures::user_1()));
    }
    h.access.flush().await;

    assert_eq!(h.store.reads(), 2);
    assert_eq!(h.cache.commands_executed(), 0);
}

#[tokio::test]
async fn test_failing_cache_never_fails_the_caller() {
    let h = harness();
    let users = fixtures::users();
    h.cache.set_failing(true);

    let read = h
        .access
        .get_cached(&users, &ItemId::from("user-1"), None)
        .await
        .unwrap();
    assert_eq!(read, Some(fixtures::user_1()));

    let created = h
        .access
        .create_cached_versioned(&users, record(json!({"id": "user-9"})), None)
        .await
        .unwrap();
    assert_eq!(created.get("iv"), Some(&json!(0)));
    h.access.flush().await;

    assert!(h.access.stats().cache_errors >= 2);
}

#[tokio::test]
async fn test_plain_and_versioned_entries_do_not_mix() {
    let h = harness();
    let users = fixtures::users();
    let id = ItemId::from("user-1");

    h.access.get_cached(&users, &id, None).await.unwrap();
    h.access.flush().await;

    // A string entry cannot answer a versioned read; the store does.
    let read = h.access.get_cached_versioned(&users, &id, None).await.unwrap();
    assert_eq!(read, Some(fixtures::user_1()));
    h.access.flush().await;

    assert_eq!(h.store.reads(), 2);
    assert!(h.access.stats().cache_errors >= 1);
    assert!(h.cache.get("prefix.users!user-1").await.is_ok());
}

#[tokio::test]
async fn test_zero_ttl_is_rejected_before_io() {
    let h = harness();
    let users = fixtures::users();

    let result = h
        .access
        .get_cached(&users, &ItemId::from("user-1"), Some(Duration::ZERO))
        .await;
    assert_validation_error(&result);
    assert_eq!(h.store.total(), 0);
}

#[tokio::test]
async fn test_invalid_keys_are_rejected_before_io() {
    let h = harness();
    let users = fixtures::users();

    assert_validation_error(&h.access.get(&users, &ItemId::from("")).await);
    assert_validation_error(&h.access.get(&users, &ItemId::new(json!(true))).await);
    assert_validation_error(
        &h.access
            .create_versioned(&users, record(json!({"name": "no id"})))
            .await,
    );
    assert_eq!(h.store.total(), 0);
}
