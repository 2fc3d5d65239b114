//! Local filesystem storage backend
//!
//! Treats a directory as a bucket: keys map to paths under the root. Useful
//! as a sync target on a mounted volume and in tests.

use super::{Metadata, ObjectStream, Storage};
use crate::error::{Error, Result};
use crate::keys;
use crate::sync::walk;
use crate::types::{FileInfo, ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, StreamExt, TryStreamExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Name prefix of in-flight temp files, hidden from listings
const TEMP_PREFIX: &str = ".artisync-tmp-";

/// Queue depth of the listing walker
const LIST_CAPACITY: usize = 64;

/// Local filesystem storage backend
#[derive(Clone)]
pub struct LocalBackend {
    /// Root path for this backend
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend with the given root path
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a key to a path under the root
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        keys::local_path(&self.root, key)
    }
}

/// Map I/O errors, keeping missing files distinct
fn fs_error(op: &'static str, key: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound {
            key: key.to_string(),
        }
    } else {
        Error::io(format!("{} '{}'", op, key), err)
    }
}

/// Write through a temp file in the same directory and rename it into place.
///
/// An empty directory left at the target path is replaced.
fn write_atomic<F>(path: &Path, fill: F) -> std::io::Result<u64>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<u64>,
{
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;

    // A concurrent delete may prune the parent between creating it and
    // opening the temp file, so try again once
    let mut tmp = match create_temp_in(parent) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create_temp_in(parent)?,
        other => other?,
    };
    let written = fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;

    if path.is_dir() {
        std::fs::remove_dir(path)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(written)
}

fn create_temp_in(dir: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    std::fs::create_dir_all(dir)?;
    tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)
}

/// Remove empty directories from `dir` upwards, stopping below `root`
fn prune_empty_dirs(root: &Path, dir: &Path) {
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // Fails on the first directory that still has entries
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX))
        .unwrap_or(false)
}

#[async_trait]
impl Storage for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.resolve(key)?;
        let data = fs::read(&path).await.map_err(|e| fs_error("get", key, e))?;
        Ok(Bytes::from(data))
    }

    async fn put_with_metadata(&self, key: &str, data: Bytes, metadata: &Metadata) -> Result<()> {
        let path = self.resolve(key)?;

        if !metadata.is_empty() {
            tracing::debug!(key = %key, "Local backend does not persist metadata tags");
        }

        tokio::task::spawn_blocking(move || {
            write_atomic(&path, |out| out.write_all(&data).map(|_| data.len() as u64))
        })
        .await
        .map_err(|e| Error::io("spawn_blocking", std::io::Error::other(e.to_string())))?
        .map_err(|e| fs_error("put", key, e))?;
        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<u64> {
        let dest = self.resolve(key)?;
        let src = path.to_path_buf();

        let copied = tokio::task::spawn_blocking(move || {
            let mut input = std::fs::File::open(&src)?;
            write_atomic(&dest, |out| std::io::copy(&mut input, out))
        })
        .await
        .map_err(|e| Error::io("spawn_blocking", std::io::Error::other(e.to_string())))?;

        // A missing source is a local problem, not a missing object
        copied.map_err(|e| Error::io(format!("uploading {} to '{}'", path.display(), key), e))
    }

    fn list(&self, prefix: &str) -> ObjectStream {
        // Walk only the deepest directory the prefix names
        let base = match prefix.rfind('/') {
            Some(i) => match self.resolve(&prefix[..i]) {
                Ok(path) => path,
                Err(e) => return futures::stream::once(future::ready(Err(e))).boxed(),
            },
            None => self.root.clone(),
        };

        if !base.is_dir() {
            return futures::stream::empty().boxed();
        }

        let root = self.root.clone();
        let prefix = prefix.to_string();

        walk::walk_stream(base, LIST_CAPACITY)
            .try_filter_map(move |file| {
                let result = if is_temp_file(&file.path) {
                    Ok(None)
                } else {
                    keys::relative_key(&root, &file.path).map(|key| {
                        key.starts_with(prefix.as_str())
                            .then(|| ObjectInfo::new(key, file.info))
                    })
                };
                future::ready(result)
            })
            .boxed()
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo> {
        let path = self.resolve(key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| fs_error("head", key, e))?;

        if !metadata.is_file() {
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }

        let info = FileInfo::from_metadata(&metadata).map_err(|e| fs_error("head", key, e))?;
        Ok(ObjectInfo::new(key, info))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| fs_error("delete", key, e))?;

        if let Some(parent) = path.parent() {
            let root = self.root.clone();
            let parent = parent.to_path_buf();
            tokio::task::spawn_blocking(move || prune_empty_dirs(&root, &parent))
                .await
                .map_err(|e| Error::io("spawn_blocking", std::io::Error::other(e.to_string())))?;
        }
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let data = self.get(from).await?;
        self.put(to, data).await
    }

    async fn get_metadata_tag(&self, key: &str, tag: &str) -> Result<String> {
        self.head(key).await?;
        Err(Error::TagNotFound {
            key: key.to_string(),
            tag: tag.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_backend_put_get() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().to_path_buf());

        backend.put("dir/test.txt", Bytes::from("hello world")).await.unwrap();

        let data = backend.get("dir/test.txt").await.unwrap();
        assert_eq!(data, Bytes::from("hello world"));
        assert!(tmp.path().join("dir").join("test.txt").is_file());
    }

    #[tokio::test]
    async fn test_local_backend_head() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().to_path_buf());

        assert!(backend.head("nonexistent.txt").await.unwrap_err().is_not_found());

        backend.put("test.txt", Bytes::from("content")).await.unwrap();

        let entry = backend.head("test.txt").await.unwrap();
        assert_eq!(entry.info.size, 7);
    }

    #[tokio::test]
    async fn test_local_backend_list_prefix() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().to_path_buf());
        for key in ["a/1", "a/b/2", "ab/3", "c"] {
            backend.put(key, Bytes::from("x")).await.unwrap();
        }

        let mut listed: Vec<String> = backend
            .list("a/")
            .map_ok(|o| o.key)
            .try_collect()
            .await
            .unwrap();
        listed.sort();
        assert_eq!(listed, vec!["a/1", "a/b/2"]);

        let missing: Vec<ObjectInfo> = backend.list("nope/").try_collect().await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_local_backend_rejects_escaping_keys() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().join("root"));

        let err = backend.put("../outside", Bytes::from("x")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
        assert!(!tmp.path().join("outside").exists());
    }

    #[tokio::test]
    async fn test_local_backend_tags() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().to_path_buf());
        backend.put("f", Bytes::from("x")).await.unwrap();

        assert!(matches!(
            backend.get_metadata_tag("f", "owner").await,
            Err(Error::TagNotFound { .. })
        ));
        assert!(backend.get_metadata_tag("g", "owner").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_backend_delete_missing() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().to_path_buf());
        assert!(backend.delete("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_backend_delete_prunes_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().to_path_buf());
        backend.put("m/x/y/z", Bytes::from("deep")).await.unwrap();
        backend.put("m/keep", Bytes::from("k")).await.unwrap();

        backend.delete("m/x/y/z").await.unwrap();

        assert!(!tmp.path().join("m/x").exists());
        assert!(tmp.path().join("m/keep").is_file());
        assert!(tmp.path().is_dir());
    }

    #[tokio::test]
    async fn test_local_backend_put_replaces_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().to_path_buf());
        std::fs::create_dir_all(tmp.path().join("m/x")).unwrap();

        backend.put("m/x", Bytes::from("now a file")).await.unwrap();
        assert_eq!(backend.get("m/x").await.unwrap(), Bytes::from("now a file"));

        std::fs::create_dir_all(tmp.path().join("m/d/child")).unwrap();
        assert!(backend.put("m/d", Bytes::from("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_local_backend_put_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        std::fs::write(&src, vec![3u8; 10_000]).unwrap();
        let backend = LocalBackend::new(tmp.path().join("bucket"));

        assert_eq!(backend.put_file("a/b.bin", &src).await.unwrap(), 10_000);
        assert_eq!(backend.get("a/b.bin").await.unwrap().len(), 10_000);

        let err = backend
            .put_file("a/c.bin", &tmp.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
