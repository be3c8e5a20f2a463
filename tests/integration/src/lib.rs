//! Integration tests for s3vfs against an S3-compatible server.
//!
//! These tests require a server (LocalStack, MinIO, RustStack, ...) at
//! `localhost:4566`. They are marked `#[ignore]` so they don't run during
//! normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p s3vfs-integration -- --ignored
//! ```

use std::sync::{Arc, Once};

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::types::{BucketVersioningStatus, VersioningConfiguration};
use s3vfs_core::{S3Store, VersionedDocumentStore, VfsConfig, VirtualFileSystem};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL for the server.
fn endpoint_url() -> String {
    std::env::var("S3_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_owned())
}

/// Create a raw S3 client pointing at the local server.
#[must_use]
pub fn s3_client() -> aws_sdk_s3::Client {
    init_tracing();

    let creds = Credentials::new("test", "test", None, None, "integration-test");

    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(creds)
        .endpoint_url(endpoint_url())
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(config)
}

/// File system configuration for a test bucket.
#[must_use]
pub fn test_config(bucket: &str, prefix: &str) -> VfsConfig {
    VfsConfig::builder()
        .bucket(bucket.to_owned())
        .prefix(prefix.to_owned())
        .endpoint_url(Some(endpoint_url()))
        .access_key_id(Some("test".to_owned()))
        .secret_access_key(Some("test".to_owned()))
        .force_path_style(true)
        .build()
}

/// File system over a test bucket.
pub async fn test_vfs(bucket: &str, prefix: &str) -> VirtualFileSystem {
    init_tracing();
    let config = test_config(bucket, prefix);
    let store = S3Store::from_config(&config).await;
    VirtualFileSystem::new(Arc::new(store), &config)
}

/// Document store over a test bucket.
pub async fn test_documents(bucket: &str, prefix: &str) -> VersionedDocumentStore {
    VersionedDocumentStore::new(test_vfs(bucket, prefix).await)
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Create a bucket and return its name. Caller is responsible for cleanup.
pub async fn create_test_bucket(client: &aws_sdk_s3::Client, prefix: &str) -> String {
    let name = test_bucket_name(prefix);
    client
        .create_bucket()
        .bucket(&name)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to create bucket {name}: {e}"));
    name
}

/// Create a bucket with versioning enabled.
pub async fn create_versioned_bucket(client: &aws_sdk_s3::Client, prefix: &str) -> String {
    let name = create_test_bucket(client, prefix).await;
    client
        .put_bucket_versioning()
        .bucket(&name)
        .versioning_configuration(
            VersioningConfiguration::builder()
                .status(BucketVersioningStatus::Enabled)
                .build(),
        )
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to enable versioning on {name}: {e}"));
    name
}

/// Delete every object version and delete marker, then the bucket.
pub async fn cleanup_bucket(client: &aws_sdk_s3::Client, bucket: &str) {
    let mut key_marker = None;
    let mut version_marker = None;
    loop {
        let mut req = client.list_object_versions().bucket(bucket);
        if let Some(marker) = key_marker.take() {
            req = req.key_marker(marker);
        }
        if let Some(marker) = version_marker.take() {
            req = req.version_id_marker(marker);
        }
        let Ok(resp) = req.send().await else {
            return; // Bucket may not exist.
        };

        let versions = resp
            .versions()
            .iter()
            .map(|v| (v.key(), v.version_id()))
            .chain(resp.delete_markers().iter().map(|m| (m.key(), m.version_id())));
        for (key, version_id) in versions {
            if let Some(key) = key {
                let _ = client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .set_version_id(version_id.map(ToOwned::to_owned))
                    .send()
                    .await;
            }
        }

        if resp.is_truncated() == Some(true) {
            key_marker = resp.next_key_marker().map(ToOwned::to_owned);
            version_marker = resp.next_version_id_marker().map(ToOwned::to_owned);
        } else {
            break;
        }
    }

    let _ = client.delete_bucket().bucket(bucket).send().await;
}

mod test_documents;
mod test_vfs;
