//! Cached scan and query result sets.

use std::sync::Arc;
use std::time::Duration;

use lookaside_storage::{DataAccess, LookasideCache, MemoryCache, MemoryStore, PageOptions};
use lookaside_test_utils::assertions::{assert_validation_error, cached_scores};
use lookaside_test_utils::fixtures::{self, record};
use lookaside_test_utils::{init_tracing, json, CountingStore, PREFIX};

const TTL: Duration = Duration::from_secs(120);

fn setup(store: Arc<MemoryStore>) -> (Arc<CountingStore>, Arc<MemoryCache>, DataAccess) {
    init_tracing();
    let counting = Arc::new(CountingStore::new(store));
    let cache = Arc::new(MemoryCache::new());
    let access = fixtures::access(counting.clone(), cache.clone());
    (counting, cache, access)
}

fn scans(store: &CountingStore) -> usize {
    store.calls().scans.load(std::sync::atomic::Ordering::SeqCst)
}

fn queries(store: &CountingStore) -> usize {
    store.calls().queries.load(std::sync::atomic::Ordering::SeqCst)
}

#[tokio::test]
async fn test_scan_cached_versioned_fixture() {
    let (store, cache, access) = setup(fixtures::seeded_store());
    let pairs = fixtures::group_user_pairs();

    let items = access.scan_cached_versioned(&pairs, Some(TTL)).await.unwrap();
    assert_eq!(items, fixtures::pair_rows());
    access.flush().await;

    assert_eq!(
        cached_scores(&cache, "prefix.group-user-pairs").await,
        vec![
            ("group-1|user-1".to_string(), 0.0),
            ("group-2|user-1".to_string(), 1.0),
        ]
    );
    assert_eq!(
        cache.ttl("prefix.group-user-pairs").await.unwrap(),
        Some(TTL)
    );

    let again = access.scan_cached_versioned(&pairs, Some(TTL)).await.unwrap();
    assert_eq!(again, fixtures::pair_rows());
    assert_eq!(scans(&store), 1);
}

#[tokio::test]
async fn test_missing_member_forces_rescan() {
    let (store, cache, access) = setup(fixtures::seeded_store());
    let pairs = fixtures::group_user_pairs();

    access.scan_cached(&pairs, None).await.unwrap();
    access.flush().await;
    assert!(cache.remove_key("prefix.group-user-pairs!group-1|user-1"));

    let items = access.scan_cached(&pairs, None).await.unwrap();
    assert_eq!(items, fixtures::pair_rows());
    assert_eq!(scans(&store), 2);
    access.flush().await;

    assert!(cache.contains("prefix.group-user-pairs!group-1|user-1"));
    access.scan_cached(&pairs, None).await.unwrap();
    assert_eq!(scans(&store), 2);
}

#[tokio::test]
async fn test_stale_member_forces_rescan() {
    let (store, cache, access) = setup(fixtures::seeded_store());
    let pairs = fixtures::group_user_pairs();

    access.scan_cached_versioned(&pairs, None).await.unwrap();
    access.flush().await;
    cache
        .zadd(
            "prefix.group-user-pairs!group-2|user-1",
            9.0,
            r#"{"id":"group-2|user-1","iv":0}"#,
        )
        .await
        .unwrap();

    let items = access.scan_cached_versioned(&pairs, None).await.unwrap();
    assert_eq!(items, fixtures::pair_rows());
    assert_eq!(scans(&store), 2);
}

#[tokio::test]
async fn test_empty_result_writes_nothing() {
    let (store, cache, access) = setup(fixtures::empty_store());
    let users = fixtures::users();

    for _ in 0..2 {
        assert!(access.scan_cached(&users, None).await.unwrap().is_empty());
    }
    access.flush().await;
    assert!(cache.is_empty());
    assert_eq!(scans(&store), 2);
}

#[tokio::test]
async fn test_unversioned_rows_are_not_cached_in_versioned_mode() {
    let store = fixtures::empty_store();
    fixtures::seed(
        &store,
        &fixtures::users(),
        [
            record(json!({"id": "a", "iv": 1})),
            record(json!({"id": "b"})),
        ],
    );
    let (_, cache, access) = setup(store);

    let items = access
        .scan_cached_versioned(&fixtures::users(), None)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    access.flush().await;
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_cached_scan_drains_every_page() {
    let store = Arc::new(MemoryStore::new().with_page_size(1));
    let pairs = fixtures::group_user_pairs();
    store.define_table(format!("{PREFIX}{}", pairs.name), &pairs);
    fixtures::seed(&store, &pairs, fixtures::pair_rows());
    let (counting, _, access) = setup(store);

    let first = access.scan(&pairs, PageOptions::default()).await.unwrap();
    assert_eq!(first.items.len(), 1);
    let next = first.last_evaluated_key.clone().unwrap();
    let second = access
        .scan(&pairs, PageOptions::default().starting_after(next))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(second.last_evaluated_key.is_none());

    let all = access.scan_cached(&pairs, None).await.unwrap();
    assert_eq!(all, fixtures::pair_rows());
    assert_eq!(scans(&counting), 4);
}

#[tokio::test]
async fn test_query_cached_by_hash() {
    let (store, cache, access) = setup(fixtures::seeded_store());
    let memberships = fixtures::memberships();

    let items = access
        .query_cached_versioned(&memberships, &json!("group-1"), None)
        .await
        .unwrap();
    let users: Vec<_> = items.iter().map(|item| item["userId"].clone()).collect();
    assert_eq!(users, vec![json!("user-1"), json!("user-2")]);
    access.flush().await;

    assert_eq!(
        cache.zrange("prefix.memberships!group-1", 0, -1).await.unwrap(),
        vec!["group-1!user-1".to_string(), "group-1!user-2".to_string()]
    );
    assert!(cache.contains("prefix.memberships!group-1!user-2"));

    access
        .query_cached_versioned(&memberships, &json!("group-1"), None)
        .await
        .unwrap();
    assert_eq!(queries(&store), 1);
}

#[tokio::test]
async fn test_plain_query_cached_populates_string_entries() {
    let (store, cache, access) = setup(fixtures::seeded_store());
    let memberships = fixtures::memberships();

    let items = access
        .query_cached(&memberships, &json!("group-1"), Some(TTL))
        .await
        .unwrap();
    assert_eq!(items, fixtures::membership_rows()[..2].to_vec());
    access.flush().await;

    assert_eq!(
        cache.zrange("prefix.memberships!group-1", 0, -1).await.unwrap(),
        vec!["group-1!user-1".to_string(), "group-1!user-2".to_string()]
    );
    assert_eq!(
        cache.ttl("prefix.memberships!group-1").await.unwrap(),
        Some(TTL)
    );
    for key in [
        "prefix.memberships!group-1!user-1",
        "prefix.memberships!group-1!user-2",
    ] {
        assert!(cache.get(key).await.unwrap().is_some());
    }

    let again = access
        .query_cached(&memberships, &json!("group-1"), Some(TTL))
        .await
        .unwrap();
    assert_eq!(again, items);
    assert_eq!(queries(&store), 1);
    let stats = access.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_query_cached_needs_range_attribute() {
    let (store, _, access) = setup(fixtures::seeded_store());
    let result = access
        .query_cached(&fixtures::users(), &json!("user-1"), None)
        .await;
    assert_validation_error(&result);
    assert_eq!(store.total(), 0);
}

#[tokio::test]
async fn test_query_index_cached_uses_table_keys() {
    let (store, cache, access) = setup(fixtures::seeded_store());
    let memberships = fixtures::memberships();

    let items = access
        .query_index_cached(&memberships, "by-user", &json!("user-1"), None)
        .await
        .unwrap();
    let groups: Vec<_> = items.iter().map(|item| item["groupId"].clone()).collect();
    assert_eq!(groups, vec![json!("group-1"), json!("group-2")]);
    access.flush().await;

    assert_eq!(
        cache
            .zrange("prefix.memberships!by-user!user-1", 0, -1)
            .await
            .unwrap(),
        vec!["group-1!user-1".to_string(), "group-2!user-1".to_string()]
    );

    let again = access
        .query_index_cached(&memberships, "by-user", &json!("user-1"), None)
        .await
        .unwrap();
    assert_eq!(again, items);
    assert_eq!(queries(&store), 1);

    let unknown = access
        .query_index_cached(&memberships, "by-email", &json!("x"), None)
        .await;
    assert_validation_error(&unknown);
}

#[tokio::test]
async fn test_query_index_cached_versioned_scores_items() {
    let (store, cache, access) = setup(fixtures::seeded_store());
    let memberships = fixtures::memberships();

    let items = access
        .query_index_cached_versioned(&memberships, "by-user", &json!("user-1"), None)
        .await
        .unwrap();
    let groups: Vec<_> = items.iter().map(|item| item["groupId"].clone()).collect();
    assert_eq!(groups, vec![json!("group-1"), json!("group-2")]);
    access.flush().await;

    assert_eq!(
        cache
            .zrange("prefix.memberships!by-user!user-1", 0, -1)
            .await
            .unwrap(),
        vec!["group-1!user-1".to_string(), "group-2!user-1".to_string()]
    );
    assert_eq!(
        cached_scores(&cache, "prefix.memberships!group-1!user-1").await[0].1,
        0.0
    );
    assert_eq!(
        cached_scores(&cache, "prefix.memberships!group-2!user-1").await[0].1,
        1.0
    );

    let again = access
        .query_index_cached_versioned(&memberships, "by-user", &json!("user-1"), None)
        .await
        .unwrap();
    assert_eq!(again, items);
    assert_eq!(queries(&store), 1);
}

#[tokio::test]
async fn test_single_page_query_and_index_query() {
    let (_, _, access) = setup(fixtures::seeded_store());
    let memberships = fixtures::memberships();

    let page = access
        .query(
            &memberships,
            &json!("group-1"),
            None,
            PageOptions::default().with_limit(1).reversed(),
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0]["userId"], json!("user-2"));
    assert!(page.last_evaluated_key.is_some());

    let page = access
        .query_index(
            &memberships,
            "by-user",
            &json!("user-2"),
            None,
            PageOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert!(page.last_evaluated_key.is_none());
}
