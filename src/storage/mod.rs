//! Storage backends for artisync
//!
//! Every backend implements [`Storage`], the single-object contract the sync
//! engine drives. Keys passed to a backend are full keys within its bucket or
//! container; prefix handling belongs to the engine.

pub mod azure;
pub mod gcs;
pub mod local;
pub mod s3;
pub mod store;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::ObjectInfo;
use crate::uri::Location;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

pub use azure::AzureBackend;
pub use local::LocalBackend;
pub use s3::S3Backend;
pub use store::StoreBackend;

/// Lazy, finite listing. Backend failures arrive as `Err` items; the stream
/// ends after the first one.
pub type ObjectStream = BoxStream<'static, Result<ObjectInfo>>;

/// User metadata attached to an object
pub type Metadata = HashMap<String, String>;

/// When and how files are uploaded in parts instead of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Files at least this large are uploaded in parts
    pub threshold: u64,
    /// Preferred part size in bytes
    pub part_size: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            threshold: crate::config::DEFAULT_MULTIPART_THRESHOLD,
            part_size: crate::config::DEFAULT_MULTIPART_CHUNK_SIZE,
        }
    }
}

impl From<&Config> for MultipartConfig {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.multipart_threshold,
            part_size: config.multipart_chunk_size,
        }
    }
}

impl MultipartConfig {
    /// True if a file of `len` bytes should go up in parts
    pub fn applies(&self, len: u64) -> bool {
        len >= self.threshold
    }

    /// Part size for a file of `len` bytes, grown so the upload fits in
    /// `max_parts` and never below `min_part`
    pub fn part_size_for(&self, len: u64, min_part: usize, max_parts: u64) -> usize {
        let needed = len.div_ceil(max_parts.max(1)) as usize;
        self.part_size.max(min_part).max(needed).max(1)
    }
}

/// Size of a local file about to be uploaded
pub(crate) async fn file_size(path: &Path) -> Result<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| Error::io(format!("reading metadata of {}", path.display()), e))
}

/// Read a whole local file for a single-request upload
pub(crate) async fn read_file(path: &Path) -> Result<Bytes> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| Error::io(format!("reading {}", path.display()), e))
}

/// Open a local file for a part-wise upload
pub(crate) async fn open_file(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(format!("opening {}", path.display()), e))
}

/// Read up to `size` bytes; shorter only at end of file, empty once exhausted
pub(crate) async fn read_chunk(file: &mut tokio::fs::File, size: usize, path: &Path) -> Result<Bytes> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file
            .read(&mut buf[filled..])
            .await
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

/// Single-object primitives shared by all backends.
///
/// Calls are cancelled by dropping the returned future; the engine does this
/// when its cancellation token fires.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name (for logging)
    fn name(&self) -> &'static str;

    /// Read an object's contents
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Replace an object's contents. Readers see either the old or the new
    /// object, never a partial write.
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.put_with_metadata(key, data, &Metadata::new()).await
    }

    /// Replace an object's contents and attach metadata tags
    async fn put_with_metadata(&self, key: &str, data: Bytes, metadata: &Metadata) -> Result<()>;

    /// Upload a local file, returning the bytes written.
    ///
    /// Backends that can upload in parts override this so large files are
    /// never held in memory whole.
    async fn put_file(&self, key: &str, path: &Path) -> Result<u64> {
        let data = read_file(path).await?;
        let size = data.len() as u64;
        self.put(key, data).await?;
        Ok(size)
    }

    /// List every object whose key starts with `prefix`, following pagination.
    ///
    /// Order is whatever the backend yields. Calling again restarts from the top.
    fn list(&self, prefix: &str) -> ObjectStream;

    /// Read size and modification time of one object
    async fn head(&self, key: &str) -> Result<ObjectInfo>;

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<()>;

    /// Server-side copy (or the closest the backend offers)
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Copy then delete the source.
    ///
    /// Same key is a no-op. If the copy lands but the delete fails the object
    /// exists under both keys and `PartialRename` is returned.
    async fn rename(&self, old_key: &str, new_key: &str) -> Result<()> {
        if old_key == new_key {
            return Ok(());
        }

        self.copy(old_key, new_key).await?;

        if let Err(e) = self.delete(old_key).await {
            tracing::warn!(
                from = %old_key,
                to = %new_key,
                error = %e,
                "Rename copied the object but could not delete the source"
            );
            return Err(Error::PartialRename {
                from: old_key.to_string(),
                to: new_key.to_string(),
                source: Box::new(e),
            });
        }

        Ok(())
    }

    /// Read one metadata tag. A missing tag is `TagNotFound`, a missing
    /// object is `NotFound`.
    async fn get_metadata_tag(&self, key: &str, tag: &str) -> Result<String>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Open the backend a location points at.
///
/// Returns the backend and the key prefix inside it.
pub async fn open(location: &Location, config: &Config) -> Result<(Arc<dyn Storage>, String)> {
    let storage: Arc<dyn Storage> = match location {
        Location::Local(path) => Arc::new(LocalBackend::new(path.clone())),
        Location::S3 { bucket, .. } => Arc::new(S3Backend::new(bucket.clone(), config).await?),
        Location::Gcs { bucket, .. } => Arc::new(gcs::open(bucket, config)?),
        Location::Azure { container, .. } => {
            Arc::new(AzureBackend::new(container.clone(), config).await?)
        }
    };

    tracing::debug!(backend = storage.name(), location = %location, "Opened storage");

    Ok((storage, location.prefix().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose copy works but whose delete always fails
    struct StuckSource {
        inner: StoreBackend,
        copies: AtomicUsize,
    }

    #[async_trait]
    impl Storage for StuckSource {
        fn name(&self) -> &'static str {
            "stuck"
        }
        async fn get(&self, key: &str) -> Result<Bytes> {
            self.inner.get(key).await
        }
        async fn put_with_metadata(&self, key: &str, data: Bytes, metadata: &Metadata) -> Result<()> {
            self.inner.put_with_metadata(key, data, metadata).await
        }
        fn list(&self, prefix: &str) -> ObjectStream {
            self.inner.list(prefix)
        }
        async fn head(&self, key: &str) -> Result<ObjectInfo> {
            self.inner.head(key).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            Err(Error::storage("delete", key, "403 Forbidden"))
        }
        async fn copy(&self, from: &str, to: &str) -> Result<()> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            self.inner.copy(from, to).await
        }
        async fn get_metadata_tag(&self, key: &str, tag: &str) -> Result<String> {
            self.inner.get_metadata_tag(key, tag).await
        }
    }

    #[tokio::test]
    async fn test_rename_reports_partial_failure() {
        let storage = StuckSource {
            inner: StoreBackend::in_memory(),
            copies: AtomicUsize::new(0),
        };
        storage.put("old", Bytes::from("payload")).await.unwrap();

        let err = storage.rename("old", "new").await.unwrap_err();
        assert!(matches!(err, Error::PartialRename { .. }));

        // Both copies remain
        assert!(storage.exists("old").await.unwrap());
        assert_eq!(storage.get("new").await.unwrap(), Bytes::from("payload"));
    }

    #[tokio::test]
    async fn test_rename_same_key_is_noop() {
        let storage = StuckSource {
            inner: StoreBackend::in_memory(),
            copies: AtomicUsize::new(0),
        };

        storage.rename("k", "k").await.unwrap();
        assert_eq!(storage.copies.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_part_size_grows_to_fit_part_limit() {
        let multipart = MultipartConfig {
            threshold: 100,
            part_size: 10,
        };
        assert!(!multipart.applies(99));
        assert!(multipart.applies(100));

        assert_eq!(multipart.part_size_for(1_000, 1, 1_000), 10);
        assert_eq!(multipart.part_size_for(1_000, 64, 1_000), 64);
        assert_eq!(multipart.part_size_for(100_001, 1, 1_000), 101);
    }

    #[tokio::test]
    async fn test_read_chunk_splits_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("f");
        std::fs::write(&path, b"abcdefg").unwrap();

        let mut file = open_file(&path).await.unwrap();
        assert_eq!(read_chunk(&mut file, 3, &path).await.unwrap(), Bytes::from("abc"));
        assert_eq!(read_chunk(&mut file, 3, &path).await.unwrap(), Bytes::from("def"));
        assert_eq!(read_chunk(&mut file, 3, &path).await.unwrap(), Bytes::from("g"));
        assert!(read_chunk(&mut file, 3, &path).await.unwrap().is_empty());
    }
}
