//! AWS S3 storage backend

use super::{Metadata, MultipartConfig, ObjectStream, Storage};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{FileInfo, ObjectInfo};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream as AwsByteStream, DateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Smallest part S3 accepts (except the last)
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Most parts one upload may have
const MAX_PARTS: u64 = 10_000;

/// AWS S3 storage backend
#[derive(Clone)]
pub struct S3Backend {
    /// S3 client
    client: Client,
    /// Bucket name
    bucket: String,
    /// Part-wise upload settings for `put_file`
    multipart: MultipartConfig,
}

impl S3Backend {
    /// Create a new S3 backend from the ambient AWS configuration
    pub async fn new(bucket: String, config: &Config) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.s3_region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.s3_endpoint {
            // S3-compatible services rarely support virtual-hosted buckets
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::from_client(Client::from_conf(builder.build()), bucket)
            .with_multipart(MultipartConfig::from(config)))
    }

    /// Use an existing client
    pub fn from_client(client: Client, bucket: String) -> Self {
        Self {
            client,
            bucket,
            multipart: MultipartConfig::default(),
        }
    }

    /// Override when and how files are uploaded in parts
    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    /// Upload a file in parts; the upload is aborted if any part fails
    async fn put_file_multipart(&self, key: &str, path: &Path, len: u64) -> Result<u64> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("put", key, e))?;
        let upload_id = output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::storage("put", key, "no upload ID returned"))?;

        match self.upload_parts(key, &upload_id, path, len).await {
            Ok(written) => Ok(written),
            Err(e) => {
                let aborted = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort) = aborted {
                    tracing::warn!(
                        key = %key,
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, path: &Path, len: u64) -> Result<u64> {
        let part_size = self.multipart.part_size_for(len, MIN_PART_SIZE, MAX_PARTS);
        let mut file = super::open_file(path).await?;
        let mut parts = Vec::new();
        let mut part_number = 1;
        let mut written = 0u64;

        loop {
            let chunk = super::read_chunk(&mut file, part_size, path).await?;
            // An empty file still needs one (empty) part
            if chunk.is_empty() && part_number > 1 {
                break;
            }
            let last = chunk.len() < part_size;
            let chunk_len = chunk.len() as u64;

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(AwsByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| sdk_error("put", key, e))?;

            let etag = output
                .e_tag()
                .map(str::to_string)
                .ok_or_else(|| Error::storage("put", key, "no ETag returned for part"))?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );

            written += chunk_len;
            part_number += 1;
            if last {
                break;
            }
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| sdk_error("put", key, e))?;

        tracing::debug!(key = %key, bytes = written, parts = part_number - 1, "Multipart upload complete");
        Ok(written)
    }
}

/// Map SDK errors, keeping missing objects distinct
fn sdk_error<E>(op: &'static str, key: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match err.code() {
        Some("NoSuchKey") | Some("NotFound") => Error::NotFound {
            key: key.to_string(),
        },
        _ => Error::storage(op, key, DisplayErrorContext(&err)),
    }
}

fn to_system_time(t: Option<&DateTime>) -> SystemTime {
    t.and_then(|t| {
        UNIX_EPOCH.checked_add(Duration::new(t.secs().max(0) as u64, t.subsec_nanos()))
    })
    .unwrap_or(UNIX_EPOCH)
}

/// Build the URL-encoded `bucket/key` value CopyObject expects
fn copy_source(bucket: &str, key: &str) -> Result<String> {
    let mut url =
        Url::parse("s3://copy-source").map_err(|e| Error::invalid_key(key, e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| Error::invalid_key(key, "cannot encode copy source"))?
        .push(bucket)
        .extend(key.split('/'));
    Ok(url.path().trim_start_matches('/').to_string())
}

#[async_trait]
impl Storage for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("get", key, e))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| Error::storage("get", key, e))?
            .into_bytes();

        Ok(bytes)
    }

    async fn put_with_metadata(&self, key: &str, data: Bytes, metadata: &Metadata) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(AwsByteStream::from(data));

        if !metadata.is_empty() {
            request = request.set_metadata(Some(metadata.clone()));
        }

        request.send().await.map_err(|e| sdk_error("put", key, e))?;

        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<u64> {
        let len = super::file_size(path).await?;
        if self.multipart.applies(len) {
            return self.put_file_multipart(key, path, len).await;
        }

        // Stream small files straight from disk
        let body = AwsByteStream::from_path(path)
            .await
            .map_err(|e| Error::io(format!("reading {}", path.display()), std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error("put", key, e))?;

        Ok(len)
    }

    fn list(&self, prefix: &str) -> ObjectStream {
        let pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let prefix = prefix.to_string();

        futures::stream::try_unfold(
            (pages, VecDeque::new()),
            move |(mut pages, mut pending)| {
                let prefix = prefix.clone();
                async move {
                    loop {
                        if let Some(object) = pending.pop_front() {
                            return Ok(Some((object, (pages, pending))));
                        }

                        let Some(page) = pages.next().await else {
                            return Ok(None);
                        };
                        let output = page.map_err(|e| sdk_error("list", &prefix, e))?;

                        for obj in output.contents() {
                            if let Some(key) = obj.key() {
                                let size = obj.size().unwrap_or(0).max(0) as u64;
                                let modified = to_system_time(obj.last_modified());
                                pending.push_back(ObjectInfo::new(key, FileInfo::new(size, modified)));
                            }
                        }
                    }
                }
            },
        )
        .boxed()
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("head", key, e))?;

        let size = output.content_length().unwrap_or(0).max(0) as u64;
        Ok(ObjectInfo::new(
            key,
            FileInfo::new(size, to_system_time(output.last_modified())),
        ))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("delete", key, e))?;

        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(to)
            .copy_source(copy_source(&self.bucket, from)?)
            .send()
            .await
            .map_err(|e| sdk_error("copy", from, e))?;

        Ok(())
    }

    async fn get_metadata_tag(&self, key: &str, tag: &str) -> Result<String> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("get_metadata_tag", key, e))?;

        // S3 lowercases user metadata names
        output
            .metadata()
            .and_then(|m| m.get(tag).or_else(|| m.get(&tag.to_lowercase())))
            .cloned()
            .ok_or_else(|| Error::TagNotFound {
                key: key.to_string(),
                tag: tag.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_source_encoding() {
        assert_eq!(copy_source("bucket", "a/b.txt").unwrap(), "bucket/a/b.txt");
        assert_eq!(
            copy_source("bucket", "dir/with space?.txt").unwrap(),
            "bucket/dir/with%20space%3F.txt"
        );
    }

    #[test]
    fn test_to_system_time() {
        let t = DateTime::from_secs(1_700_000_000);
        assert_eq!(
            to_system_time(Some(&t)),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
        assert_eq!(to_system_time(None), UNIX_EPOCH);
    }
}
