//! Backend over any `object_store` implementation
//!
//! Google Cloud Storage and the in-memory store both go through here.

use super::{Metadata, MultipartConfig, ObjectStream, Storage};
use crate::error::{Error, Result};
use crate::types::{FileInfo, ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, StreamExt, TryStreamExt};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectMeta, ObjectStore, PutOptions,
    PutPayload, WriteMultipart,
};
use std::path::Path;
use std::sync::Arc;

/// Upper bound on parts of one upload
const MAX_PARTS: u64 = 10_000;

/// Parts in flight per multipart upload
const MAX_CONCURRENT_PARTS: usize = 4;

/// `object_store`-backed storage
#[derive(Clone)]
pub struct StoreBackend {
    /// Object store instance
    store: Arc<dyn ObjectStore>,
    /// Backend name (for logging)
    name: &'static str,
    /// Part-wise upload settings for `put_file`
    multipart: MultipartConfig,
}

impl StoreBackend {
    /// Wrap an existing object store
    pub fn new(name: &'static str, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            name,
            multipart: MultipartConfig::default(),
        }
    }

    /// Override when and how files are uploaded in parts
    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    /// Process-local store, mostly useful for tests
    pub fn in_memory() -> Self {
        Self::new("memory", Arc::new(InMemory::new()))
    }

    /// Parse a key into an object_store path
    fn path(key: &str) -> Result<ObjectPath> {
        if key.is_empty() {
            return Err(Error::invalid_key(key, "empty key"));
        }
        ObjectPath::parse(key).map_err(|e| Error::invalid_key(key, e.to_string()))
    }

    /// Stream a file through `WriteMultipart`, aborting the upload on failure
    async fn put_file_multipart(&self, key: &str, path: &Path, len: u64) -> Result<u64> {
        let location = Self::path(key)?;
        let part_size = self.multipart.part_size_for(len, 1, MAX_PARTS);
        let mut file = super::open_file(path).await?;

        let upload = self
            .store
            .put_multipart(&location)
            .await
            .map_err(|e| map_err("put", key, e))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, part_size);

        let sent = async {
            let mut written = 0u64;
            loop {
                let chunk = super::read_chunk(&mut file, part_size, path).await?;
                if chunk.is_empty() {
                    return Ok::<u64, Error>(written);
                }
                writer
                    .wait_for_capacity(MAX_CONCURRENT_PARTS)
                    .await
                    .map_err(|e| map_err("put", key, e))?;
                written += chunk.len() as u64;
                writer.put(chunk);
            }
        }
        .await;

        match sent {
            Ok(written) => {
                writer.finish().await.map_err(|e| map_err("put", key, e))?;
                tracing::debug!(key = %key, bytes = written, part_size, "Multipart upload complete");
                Ok(written)
            }
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    tracing::warn!(key = %key, error = %abort, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    fn object_info(meta: ObjectMeta) -> ObjectInfo {
        ObjectInfo::new(
            meta.location.to_string(),
            FileInfo::new(meta.size as u64, meta.last_modified.into()),
        )
    }
}

/// Map object_store errors, keeping not-found distinct
fn map_err(op: &'static str, key: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::NotFound {
            key: key.to_string(),
        },
        other => Error::storage(op, key, other),
    }
}

#[async_trait]
impl Storage for StoreBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = Self::path(key)?;

        self.store
            .get(&path)
            .await
            .map_err(|e| map_err("get", key, e))?
            .bytes()
            .await
            .map_err(|e| map_err("get", key, e))
    }

    async fn put_with_metadata(&self, key: &str, data: Bytes, metadata: &Metadata) -> Result<()> {
        let path = Self::path(key)?;

        let mut attributes = Attributes::new();
        for (name, value) in metadata {
            attributes.insert(
                Attribute::Metadata(name.clone().into()),
                AttributeValue::from(value.clone()),
            );
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map_err(|e| map_err("put", key, e))?;

        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<u64> {
        let len = super::file_size(path).await?;
        if self.multipart.applies(len) {
            return self.put_file_multipart(key, path, len).await;
        }

        let data = super::read_file(path).await?;
        let size = data.len() as u64;
        self.put(key, data).await?;
        Ok(size)
    }

    fn list(&self, prefix: &str) -> ObjectStream {
        // object_store lists whole path segments, so list the enclosing
        // directory and filter on the raw prefix
        let dir = prefix.rfind('/').map(|i| &prefix[..i]).unwrap_or("");
        let dir_path = if dir.is_empty() {
            None
        } else {
            match ObjectPath::parse(dir) {
                Ok(p) => Some(p),
                Err(e) => {
                    let err = Error::invalid_key(prefix, e.to_string());
                    return futures::stream::once(future::ready(Err(err))).boxed();
                }
            }
        };

        let prefix = prefix.to_string();
        let err_prefix = prefix.clone();

        self.store
            .list(dir_path.as_ref())
            .map_err(move |e| Error::storage("list", err_prefix.clone(), e))
            .try_filter_map(move |meta| {
                let matched = meta.location.as_ref().starts_with(prefix.as_str());
                future::ready(Ok(matched.then(|| Self::object_info(meta))))
            })
            .boxed()
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo> {
        let path = Self::path(key)?;

        let meta = self
            .store
            .head(&path)
            .await
            .map_err(|e| map_err("head", key, e))?;

        Ok(Self::object_info(meta))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = Self::path(key)?;

        self.store
            .delete(&path)
            .await
            .map_err(|e| map_err("delete", key, e))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let src = Self::path(from)?;
        let dst = Self::path(to)?;

        self.store
            .copy(&src, &dst)
            .await
            .map_err(|e| map_err("copy", from, e))
    }

    async fn get_metadata_tag(&self, key: &str, tag: &str) -> Result<String> {
        let path = Self::path(key)?;
        let options = GetOptions {
            head: true,
            ..Default::default()
        };

        let result = self
            .store
            .get_opts(&path, options)
            .await
            .map_err(|e| map_err("get_metadata_tag", key, e))?;

        match result.attributes.get(&Attribute::Metadata(tag.to_string().into())) {
            Some(value) => {
                let value: &str = value.as_ref();
                Ok(value.to_string())
            }
            None => Err(Error::TagNotFound {
                key: key.to_string(),
                tag: tag.to_string(),
            }),
        }
    }
}
