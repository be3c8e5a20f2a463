//! S3 backend built on `aws-sdk-s3`.
//!
//! Full keys are `<bucket>/<key>`; the bucket is split off at the first `/`
//! for every request and prepended again to every key the store returns.
//! SDK errors are mapped to [`StoreError`] by error code, falling back to the
//! HTTP status of the raw response.

use std::fmt;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier, ServerSideEncryption, Tag, Tagging};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::debug;

use super::{ObjectInfo, ObjectStore, ObjectTag, PutOutcome, StoredVersion};
use crate::config::VfsConfig;
use crate::error::{StoreError, StoreResult};
use crate::path::BUCKET_SEPARATOR;

/// Maximum number of keys accepted by a single `DeleteObjects` request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Characters escaped in the `x-amz-copy-source` header.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// [`ObjectStore`] backed by an S3 (or S3-compatible) endpoint.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    sse: Option<ServerSideEncryption>,
    kms_key_id: Option<String>,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("sse", &self.sse)
            .field("kms_key_id", &self.kms_key_id)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self {
            client,
            sse: None,
            kms_key_id: None,
        }
    }

    /// Build a client from the configuration.
    ///
    /// Static credentials are used when both the access key and the secret
    /// are configured; otherwise the default AWS provider chain applies.
    pub async fn from_config(config: &VfsConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region_name.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let creds = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                "s3vfs-config",
            );
            builder = builder.credentials_provider(creds);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            sse: config.sse.as_deref().map(ServerSideEncryption::from),
            kms_key_id: config.kms_key_id.clone(),
        }
    }

    /// Apply server-side encryption settings to every write.
    #[must_use]
    pub fn with_encryption(mut self, sse: Option<&str>, kms_key_id: Option<String>) -> Self {
        self.sse = sse.map(ServerSideEncryption::from);
        self.kms_key_id = kms_key_id;
        self
    }

    /// The underlying SDK client.
    #[must_use]
    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }
}

/// Split a full key into `(bucket, key)`. The bucket is always joined with
/// [`BUCKET_SEPARATOR`], independent of the path delimiter.
fn split_key(full_key: &str) -> (&str, &str) {
    full_key
        .split_once(BUCKET_SEPARATOR)
        .unwrap_or((full_key, ""))
}

fn join_key(bucket: &str, key: &str) -> String {
    format!("{bucket}{BUCKET_SEPARATOR}{key}")
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

fn map_sdk_error<E>(key: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|resp| resp.status().as_u16());
    match (err.code(), status) {
        (Some("NoSuchKey" | "NotFound" | "NoSuchVersion"), _) | (_, Some(404)) => {
            StoreError::NotFound {
                key: key.to_owned(),
            }
        }
        (Some("AccessDenied" | "AllAccessDisabled"), _) | (_, Some(403)) => {
            StoreError::AccessDenied {
                key: key.to_owned(),
            }
        }
        _ => StoreError::Internal(anyhow::anyhow!(
            "S3 request for {key} failed: {}",
            DisplayErrorContext(&err)
        )),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_directory(&self, prefix: &str, delimiter: &str) -> StoreResult<Vec<String>> {
        let (bucket, key_prefix) = split_key(prefix);
        let mut entries = Vec::new();
        let mut continuation_token = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(key_prefix)
                .delimiter(delimiter)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(prefix, e))?;

            entries.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|key| join_key(bucket, key)),
            );
            entries.extend(
                resp.common_prefixes()
                    .iter()
                    .filter_map(|cp| cp.prefix())
                    .map(|p| join_key(bucket, p.strip_suffix(delimiter).unwrap_or(p))),
            );

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(ToOwned::to_owned);
            } else {
                break;
            }
        }

        entries.sort();
        entries.dedup();
        debug!(prefix, count = entries.len(), "listed directory");
        Ok(entries)
    }

    async fn list_keys(&self, prefix: &str, limit: Option<usize>) -> StoreResult<Vec<String>> {
        let (bucket, key_prefix) = split_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(key_prefix)
                .set_continuation_token(continuation_token.take());
            if let Some(limit) = limit {
                let remaining = limit.saturating_sub(keys.len()).min(1000);
                req = req.max_keys(i32::try_from(remaining).unwrap_or(1000));
            }
            let resp = req.send().await.map_err(|e| map_sdk_error(prefix, e))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|key| join_key(bucket, key)),
            );

            let done = limit.is_some_and(|limit| keys.len() >= limit);
            if !done && resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(ToOwned::to_owned);
            } else {
                break;
            }
        }

        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn get_object(&self, key: &str, version_id: Option<&str>) -> StoreResult<Bytes> {
        let (bucket, object_key) = split_key(key);
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object_key)
            .set_version_id(version_id.map(ToOwned::to_owned))
            .send()
            .await
            .map_err(|e| match (map_sdk_error(key, e), version_id) {
                (StoreError::NotFound { .. }, Some(version_id)) => StoreError::NoSuchVersion {
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                },
                (other, _) => other,
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Internal(anyhow::anyhow!("reading body of {key}: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn put_object(&self, key: &str, body: Bytes) -> StoreResult<PutOutcome> {
        let (bucket, object_key) = split_key(key);
        let resp = self
            .client
            .put_object()
            .bucket(bucket)
            .key(object_key)
            .body(ByteStream::from(body))
            .set_server_side_encryption(self.sse.clone())
            .set_ssekms_key_id(self.kms_key_id.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        debug!(key, version = ?resp.version_id(), "put object");
        Ok(PutOutcome {
            version_id: resp.version_id().map(ToOwned::to_owned),
        })
    }

    async fn copy_object(&self, src: &str, dst: &str) -> StoreResult<()> {
        let (dst_bucket, dst_key) = split_key(dst);
        let copy_source = utf8_percent_encode(src, COPY_SOURCE).to_string();
        self.client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(copy_source)
            .set_server_side_encryption(self.sse.clone())
            .set_ssekms_key_id(self.kms_key_id.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(src, e))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let (bucket, object_key) = split_key(key);
        self.client
            .delete_object()
            .bucket(bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let (bucket, _) = split_key(prefix);
        let keys = self.list_keys(prefix, None).await?;

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(split_key(key).1)
                        .build()
                        .map_err(|e| StoreError::Internal(e.into()))
                })
                .collect::<StoreResult<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StoreError::Internal(e.into()))?;

            let resp = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error(prefix, e))?;

            if let Some(failed) = resp.errors().first() {
                return Err(match failed.code() {
                    Some("AccessDenied") => StoreError::AccessDenied {
                        key: join_key(bucket, failed.key().unwrap_or_default()),
                    },
                    _ => StoreError::Internal(anyhow::anyhow!(
                        "failed to delete {}: {}",
                        failed.key().unwrap_or_default(),
                        failed.message().unwrap_or_default()
                    )),
                });
            }
        }

        debug!(prefix, count = keys.len(), "deleted prefix");
        Ok(keys.len())
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        let (bucket, object_key) = split_key(key);
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        Ok(ObjectInfo {
            key: key.to_owned(),
            size: resp
                .content_length()
                .and_then(|len| u64::try_from(len).ok())
                .unwrap_or_default(),
            last_modified: resp.last_modified().map(to_chrono).unwrap_or_default(),
        })
    }

    async fn list_object_versions(
        &self,
        key: &str,
        max_keys: usize,
    ) -> StoreResult<Vec<StoredVersion>> {
        let (bucket, object_key) = split_key(key);
        let resp = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .prefix(object_key)
            .max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        // The prefix also matches longer keys (`a.ipynb` vs `a.ipynb.bak`).
        Ok(resp
            .versions()
            .iter()
            .filter(|v| v.key() == Some(object_key))
            .filter_map(|v| {
                Some(StoredVersion {
                    version_id: v.version_id()?.to_owned(),
                    last_modified: v.last_modified().map(to_chrono).unwrap_or_default(),
                    is_latest: v.is_latest().unwrap_or(false),
                })
            })
            .take(max_keys)
            .collect())
    }

    async fn get_object_tagging(
        &self,
        key: &str,
        version_id: &str,
    ) -> StoreResult<Vec<ObjectTag>> {
        let (bucket, object_key) = split_key(key);
        let resp = self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(object_key)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        Ok(resp
            .tag_set()
            .iter()
            .map(|t| ObjectTag::new(t.key(), t.value()))
            .collect())
    }

    async fn put_object_tagging(
        &self,
        key: &str,
        version_id: &str,
        tags: Vec<ObjectTag>,
    ) -> StoreResult<()> {
        let (bucket, object_key) = split_key(key);
        let tag_set = tags
            .into_iter()
            .map(|t| {
                Tag::builder()
                    .key(t.key)
                    .value(t.value)
                    .build()
                    .map_err(|e| StoreError::Internal(e.into()))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| StoreError::Internal(e.into()))?;

        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(object_key)
            .version_id(version_id)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;
        Ok(())
    }
}
