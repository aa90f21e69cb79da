use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("credentials_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("client.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn round_trips_saved_credentials() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_credentials("tok1", r#"{"id":1,"username":"admin"}"#)
        .await
        .expect("save");

    let loaded = storage
        .load_credentials()
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.token, "tok1");
    assert_eq!(loaded.user_json, r#"{"id":1,"username":"admin"}"#);
}

#[tokio::test]
async fn save_replaces_the_single_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_credentials("first", "{}")
        .await
        .expect("save first");
    storage
        .save_credentials("second", r#"{"id":2}"#)
        .await
        .expect("save second");

    let loaded = storage
        .load_credentials()
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.token, "second");
    assert_eq!(loaded.user_json, r#"{"id":2}"#);
}

#[tokio::test]
async fn load_returns_none_when_empty() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage.load_credentials().await.expect("load").is_none());
}

#[tokio::test]
async fn clear_is_idempotent() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_credentials("tok", "{}")
        .await
        .expect("save");

    storage.clear_credentials().await.expect("first clear");
    assert!(storage.load_credentials().await.expect("load").is_none());

    storage.clear_credentials().await.expect("second clear");
    assert!(storage.load_credentials().await.expect("load").is_none());
}
