//! Integration tests for column store failure handling through the tree.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use slicetree::column::{ClusterConfig, Credentials, MemoryColumnStore, RetryPolicy};
use slicetree::error::ColumnStoreError;
use slicetree::layout::initialize_table_layout;
use slicetree::{
    AggregationMethod, DataTree, Database, DatabaseSettings, ErrorKind, Metadata, NodeDefinition,
    Retention, SliceTreeError, TreeOptions,
};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(max_retries)
        .with_initial_backoff(Duration::from_millis(1))
}

fn tree_with_retry(store: &Arc<MemoryColumnStore>, retry: RetryPolicy) -> DataTree {
    let (client, layout) = initialize_table_layout(
        store.clone(),
        "metrics",
        ClusterConfig::new(["10.0.0.1", "10.0.0.2"]).with_retry(retry),
        "NetworkTopologyStrategy",
        &json!({"dc1": "3"}),
        "dc1",
    )
    .unwrap();
    let tree = DataTree::new(client, layout, TreeOptions::default());
    tree.create_node(
        "a.b",
        NodeDefinition::new(vec![Retention::new(60, 100)], 0.0, AggregationMethod::Last).unwrap(),
        Metadata::new(),
    )
    .unwrap();
    tree
}

fn unavailable() -> ColumnStoreError {
    ColumnStoreError::Unavailable {
        reason: "not enough replicas".to_string(),
    }
}

#[test]
fn test_transient_failures_are_retried_transparently() {
    let store = Arc::new(MemoryColumnStore::new());
    let tree = tree_with_retry(&store, fast_retry(3));

    store.inject_failure(unavailable());
    store.inject_failure(ColumnStoreError::Timeout {
        operation: "get",
        elapsed: Duration::from_secs(2),
    });
    tree.store("a.b", &[(600, 1.0)]).unwrap();
    assert_eq!(store.pending_failures(), 0);

    let data = tree.get_node("a.b").unwrap().read(600, 660).unwrap();
    assert_eq!(data.values, vec![Some(1.0)]);
}

#[test]
fn test_exhausted_retries_are_reported_as_retryable() {
    let store = Arc::new(MemoryColumnStore::new());
    let tree = tree_with_retry(&store, fast_retry(1));

    for _ in 0..2 {
        store.inject_failure(unavailable());
    }
    let err = tree.store("a.b", &[(600, 1.0)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientStore);
    assert!(err.is_retryable());
    match err {
        SliceTreeError::TransientStore { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected TransientStore, got {other:?}"),
    }

    // The caller can retry the whole operation once the store recovers.
    tree.store("a.b", &[(600, 1.0)]).unwrap();
}

#[test]
fn test_permanent_failures_are_attempted_once() {
    let store = Arc::new(MemoryColumnStore::new());
    let tree = tree_with_retry(&store, fast_retry(5));

    store.inject_failure(ColumnStoreError::Corrupted {
        location: "metadata/a.b".to_string(),
        reason: "truncated".to_string(),
    });
    store.inject_failure(unavailable());

    let err = tree.has_node("a.b").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentStore);
    assert!(!err.is_retryable());
    assert_eq!(store.pending_failures(), 1);
}

#[test]
fn test_credentials_are_presented() {
    let store = Arc::new(MemoryColumnStore::with_credentials(Credentials::new("carbon", "secret")));
    let base = DatabaseSettings::new("/unused", "metrics", "localhost");

    let err = Database::with_store(base.clone(), store.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentStore);

    let mut settings = base;
    settings.username = Some("carbon".to_string());
    settings.password = Some("secret".to_string());
    let db = Database::with_store(settings, store).unwrap();
    assert!(!db.exists("a.b").unwrap());
}

#[test]
fn test_replication_mismatch_keeps_existing_keyspace() {
    let store = Arc::new(MemoryColumnStore::new());
    tree_with_retry(&store, RetryPolicy::none());

    // Reopening with a different strategy reuses the keyspace as is.
    let (client, _) = initialize_table_layout(
        store.clone(),
        "metrics",
        ClusterConfig::new(["10.0.0.1"]),
        "SimpleStrategy",
        &json!({"replication_factor": 1}),
        "dc1",
    )
    .unwrap();
    let definition = client.describe_keyspace().unwrap().unwrap();
    assert_eq!(definition.replication.to_string(), "NetworkTopologyStrategy(dc1=3)");
}
