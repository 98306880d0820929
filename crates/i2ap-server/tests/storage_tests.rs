//! Object store helpers against the directory-backed store

use i2ap_server::storage::local::LocalStore;
use i2ap_server::storage::{self, ObjectStore};

#[tokio::test]
async fn test_move_to_archive_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    store.put("stage", "in/orders.csv.gz", b"gz".to_vec()).await.unwrap();

    storage::move_object(&store, "stage", "in/orders.csv.gz", Some("archive"), None)
        .await
        .unwrap();

    assert!(!store.exists("stage", "in/orders.csv.gz").await.unwrap());
    assert_eq!(store.get("archive", "in/orders.csv.gz").await.unwrap(), b"gz".to_vec());
}

#[tokio::test]
async fn test_move_onto_itself_keeps_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    store.put("stage", "a.csv", b"x".to_vec()).await.unwrap();

    storage::move_object(&store, "stage", "a.csv", None, None).await.unwrap();
    assert!(store.exists("stage", "a.csv").await.unwrap());
}

#[tokio::test]
async fn test_pattern_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    for key in ["exports/orders_2024.csv", "exports/orders_2025.csv", "exports/users.csv", "other/orders_1.csv"] {
        store.put("stage", key, b"1".to_vec()).await.unwrap();
    }

    let mut matched = storage::list_matching(&store, "stage", "exports/", "orders_")
        .await
        .unwrap();
    matched.sort();
    assert_eq!(matched, vec!["exports/orders_2024.csv", "exports/orders_2025.csv"]);

    assert!(storage::any_matching(&store, "stage", "exports", "users").await.unwrap());
    assert!(!storage::any_matching(&store, "stage", "exports", "invoices").await.unwrap());

    let deleted = storage::delete_matching(&store, "stage", "exports", r"orders_\d+")
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert!(store.exists("stage", "other/orders_1.csv").await.unwrap());
}

#[tokio::test]
async fn test_json_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());

    let value = serde_json::json!({"status": "COMPLETE"});
    storage::put_json(&store, "state", "processor/x.json", &value).await.unwrap();
    let back: serde_json::Value = storage::get_json(&store, "state", "processor/x.json")
        .await
        .unwrap();
    assert_eq!(back, value);

    let missing = storage::get_json::<serde_json::Value>(&store, "state", "processor/y.json").await;
    assert!(missing.unwrap_err().is_not_found());
}
