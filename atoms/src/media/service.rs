
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::model::{file_name, Listing, ObjectInfo, ObjectMetadata, ObjectSummary, PrefixEntry};
use crate::error::{StoreError, StoreResult};

/// Blob storage under hierarchical paths with per-object string metadata.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>, metadata: ObjectMetadata) -> StoreResult<()>;

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Access URL for an object.
    async fn url(&self, path: &str) -> StoreResult<String>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Immediate children of `prefix` (objects and sub-prefixes).
    async fn list(&self, prefix: &str) -> StoreResult<Listing>;

    async fn metadata(&self, path: &str) -> StoreResult<ObjectInfo>;

    /// Replaces the metadata of an existing object, keeping its bytes.
    async fn update_metadata(&self, path: &str, metadata: ObjectMetadata) -> StoreResult<()>;
}

pub(crate) fn folder_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    format!("{}/", trimmed)
}

/// S3-backed object store.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    public_base_url: Option<String>,
    url_expiry: Duration,
}

impl S3ObjectStore {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        public_base_url: Option<String>,
        url_expiry: Duration,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url,
            url_expiry,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn to_utc(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

// CopySource must be URL-encoded; path separators stay as-is.
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    format!("{}/{}", bucket, encoded)
}

// S3 user metadata must be US-ASCII. Other values travel as RFC 2047
// encoded-words (`=?UTF-8?B?...?=`), the form S3 documents for them.
const ENCODED_WORD_PREFIX: &str = "=?UTF-8?B?";
const ENCODED_WORD_SUFFIX: &str = "?=";

fn encode_metadata_value(value: &str) -> String {
    if value.bytes().all(|b| b.is_ascii() && !b.is_ascii_control()) {
        return value.to_string();
    }
    format!("{}{}{}", ENCODED_WORD_PREFIX, STANDARD.encode(value), ENCODED_WORD_SUFFIX)
}

fn decode_metadata_value(value: &str) -> String {
    let prefix_len = ENCODED_WORD_PREFIX.len();
    let is_encoded = value.len() >= prefix_len + ENCODED_WORD_SUFFIX.len()
        && value.is_char_boundary(prefix_len)
        && value[..prefix_len].eq_ignore_ascii_case(ENCODED_WORD_PREFIX)
        && value.ends_with(ENCODED_WORD_SUFFIX);
    if !is_encoded {
        return value.to_string();
    }

    let payload = &value[prefix_len..value.len() - ENCODED_WORD_SUFFIX.len()];
    match STANDARD.decode(payload).map(String::from_utf8) {
        Ok(Ok(decoded)) => decoded,
        _ => {
            tracing::warn!("⚠️ Could not decode metadata value {}", value);
            value.to_string()
        }
    }
}

fn encode_metadata(custom: BTreeMap<String, String>) -> HashMap<String, String> {
    custom
        .into_iter()
        .map(|(k, v)| (k, encode_metadata_value(&v)))
        .collect()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, metadata: ObjectMetadata) -> StoreResult<()> {
        let custom = encode_metadata(metadata.custom);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .set_content_type(metadata.content_type)
            .set_metadata(Some(custom))
            .send()
            .await
            .map_err(|e| StoreError::backend("S3 put_object", DisplayErrorContext(e)))?;

        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    StoreError::NotFound(path.to_string())
                } else {
                    StoreError::backend("S3 get_object", DisplayErrorContext(e))
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::backend("S3 body read", e))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn url(&self, path: &str) -> StoreResult<String> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{}", base.trim_end_matches('/'), path));
        }

        let config = PresigningConfig::expires_in(self.url_expiry)
            .map_err(|e| StoreError::backend("S3 presigning config", e))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(config)
            .await
            .map_err(|e| StoreError::backend("S3 presign get_object", DisplayErrorContext(e)))?;

        Ok(request.uri().to_string())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| StoreError::backend("S3 delete_object", DisplayErrorContext(e)))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Listing> {
        let prefix = folder_prefix(prefix);
        let mut listing = Listing::default();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("S3 list_objects_v2", DisplayErrorContext(e)))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    listing.objects.push(ObjectSummary {
                        path: key.to_string(),
                        name: file_name(key).to_string(),
                        last_modified: object.last_modified().and_then(to_utc),
                    });
                }
            }

            for common in output.common_prefixes() {
                if let Some(p) = common.prefix() {
                    listing.prefixes.push(PrefixEntry {
                        name: file_name(p).to_string(),
                        path: p.trim_end_matches('/').to_string(),
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation = output.next_continuation_token().map(|s| s.to_string());
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(listing)
    }

    async fn metadata(&self, path: &str) -> StoreResult<ObjectInfo> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    StoreError::NotFound(path.to_string())
                } else {
                    StoreError::backend("S3 head_object", DisplayErrorContext(e))
                }
            })?;

        Ok(ObjectInfo {
            path: path.to_string(),
            name: file_name(path).to_string(),
            content_type: output.content_type().map(|s| s.to_string()),
            custom: output
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), decode_metadata_value(v))).collect())
                .unwrap_or_default(),
            last_modified: output
                .last_modified()
                .and_then(to_utc)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn update_metadata(&self, path: &str, metadata: ObjectMetadata) -> StoreResult<()> {
        let custom = encode_metadata(metadata.custom);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(encode_copy_source(&self.bucket, path))
            .key(path)
            .metadata_directive(MetadataDirective::Replace)
            .set_content_type(metadata.content_type)
            .set_metadata(Some(custom))
            .send()
            .await
            .map_err(|e| StoreError::backend("S3 copy_object", DisplayErrorContext(e)))?;

        Ok(())
    }
}
