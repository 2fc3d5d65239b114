//! Cloud Integration Tests
//!
//! These tests are marked with #[ignore] and require real credentials.
//! They will NOT run with normal `cargo test`.
//!
//! To run these tests manually:
//!   export ARTISYNC_TEST_S3_BUCKET="my-bucket"     # plus the usual AWS_* variables
//!   export ARTISYNC_TEST_GCS_BUCKET="my-bucket"    # plus GOOGLE_APPLICATION_CREDENTIALS
//!   export ARTISYNC_TEST_AZURE_CONTAINER="my-container"  # plus AZURE_STORAGE_ACCOUNT/ACCESS_KEY
//!   cargo test --test integration_cloud -- --ignored --nocapture

use artisync::config::Config;
use artisync::keys;
use artisync::storage::{self, Metadata, Storage};
use artisync::uri::Location;
use artisync::SyncEngine;
use bytes::Bytes;
use futures::TryStreamExt;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

/// Helper to create a unique test prefix for isolation
fn test_prefix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("artisync-test-{}-{}-{}", timestamp, std::process::id(), counter)
}

async fn open(scheme: &str, env_var: &str) -> (Arc<dyn Storage>, String) {
    let bucket = std::env::var(env_var).unwrap_or_else(|_| panic!("{env_var} not set"));
    let uri = format!("{}://{}/{}/", scheme, bucket, test_prefix());
    let location = Location::parse(&uri).unwrap();
    let (storage, prefix) = storage::open(&location, &Config::default()).await.unwrap();
    (storage, keys::normalize_prefix(&prefix))
}

async fn cleanup(storage: &dyn Storage, prefix: &str) {
    let keys: Vec<String> = storage
        .list(prefix)
        .map_ok(|o| o.key)
        .try_collect()
        .await
        .unwrap();
    for key in keys {
        storage.delete(&key).await.unwrap();
    }
}

async fn exercise_primitives(storage: Arc<dyn Storage>, prefix: &str) {
    let key = format!("{}obj.txt", prefix);
    let mut metadata = Metadata::new();
    metadata.insert("stage".to_string(), "final".to_string());

    storage
        .put_with_metadata(&key, Bytes::from("payload"), &metadata)
        .await
        .unwrap();
    assert_eq!(storage.get(&key).await.unwrap(), Bytes::from("payload"));
    assert_eq!(storage.head(&key).await.unwrap().info.size, 7);
    assert_eq!(storage.get_metadata_tag(&key, "stage").await.unwrap(), "final");

    let moved = format!("{}moved/obj.txt", prefix);
    storage.rename(&key, &moved).await.unwrap();
    assert!(!storage.exists(&key).await.unwrap());
    assert!(storage.get(&key).await.unwrap_err().is_not_found());
    assert_eq!(storage.get(&moved).await.unwrap(), Bytes::from("payload"));

    cleanup(storage.as_ref(), prefix).await;
}

async fn exercise_sync(storage: Arc<dyn Storage>, prefix: &str) {
    let source = TempDir::new().unwrap();
    for i in 0..10 {
        let path = source.path().join(format!("dir{}/file{}.txt", i % 2, i));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("content {i}")).unwrap();
    }

    let engine = SyncEngine::new(Config::default(), storage.clone());
    let first = engine.sync_dir_upload(source.path(), prefix).await.unwrap();
    assert_eq!(first.files_uploaded, 10);

    fs::remove_file(source.path().join("dir0/file0.txt")).unwrap();
    let second = engine.sync_dir_upload(source.path(), prefix).await.unwrap();
    assert_eq!(second.files_uploaded, 0);
    assert_eq!(second.files_deleted, 1);
    assert_eq!(second.files_skipped, 9);

    let restore = TempDir::new().unwrap();
    let down = engine.download_dir(prefix, restore.path()).await.unwrap();
    assert_eq!(down.files_downloaded, 9);
    assert_eq!(
        fs::read_to_string(restore.path().join("dir1/file3.txt")).unwrap(),
        "content 3"
    );

    cleanup(storage.as_ref(), prefix).await;
}

#[tokio::test]
#[ignore]
async fn test_s3_primitives() {
    let (storage, prefix) = open("s3", "ARTISYNC_TEST_S3_BUCKET").await;
    exercise_primitives(storage, &prefix).await;
}

#[tokio::test]
#[ignore]
async fn test_s3_sync_dir_upload() {
    let (storage, prefix) = open("s3", "ARTISYNC_TEST_S3_BUCKET").await;
    exercise_sync(storage, &prefix).await;
}

#[tokio::test]
#[ignore]
async fn test_gcs_primitives() {
    let (storage, prefix) = open("gs", "ARTISYNC_TEST_GCS_BUCKET").await;
    exercise_primitives(storage, &prefix).await;
}

#[tokio::test]
#[ignore]
async fn test_gcs_sync_dir_upload() {
    let (storage, prefix) = open("gs", "ARTISYNC_TEST_GCS_BUCKET").await;
    exercise_sync(storage, &prefix).await;
}

#[tokio::test]
#[ignore]
async fn test_azure_primitives() {
    let (storage, prefix) = open("az", "ARTISYNC_TEST_AZURE_CONTAINER").await;
    exercise_primitives(storage, &prefix).await;
}

#[tokio::test]
#[ignore]
async fn test_azure_sync_dir_upload() {
    let (storage, prefix) = open("az", "ARTISYNC_TEST_AZURE_CONTAINER").await;
    exercise_sync(storage, &prefix).await;
}
