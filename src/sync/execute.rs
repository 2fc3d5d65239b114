//! Transfer execution
//!
//! Jobs are spawned onto a `JoinSet` as they are decided, bounded by a
//! semaphore of `effective_jobs` permits. The first failure cancels the pass:
//! nothing new is scheduled, in-flight work is told to stop, and the failure
//! is what the pass returns once everything has drained.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::retry::{with_retry, RetryConfig};
use crate::storage::Storage;
use crate::types::{FileInfo, LocalFile, SyncAction, SyncStats};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// One unit of work, addressed by full object key
#[derive(Debug, Clone)]
pub enum Job {
    /// Put a local file's contents at `key`
    Upload { key: String, file: LocalFile },
    /// Remove the object at `key`
    Delete { key: String },
    /// Write the object at `key` to `dest`, stamping the object's mtime
    Download {
        key: String,
        dest: PathBuf,
        info: FileInfo,
    },
    /// Already in sync, only counted
    Skip { key: String },
}

impl Job {
    /// Object key this job touches
    pub fn key(&self) -> &str {
        match self {
            Job::Upload { key, .. }
            | Job::Delete { key }
            | Job::Download { key, .. }
            | Job::Skip { key } => key,
        }
    }

    /// Action this job carries out
    pub fn action(&self) -> SyncAction {
        match self {
            Job::Upload { .. } => SyncAction::Upload,
            Job::Delete { .. } => SyncAction::Delete,
            Job::Download { .. } => SyncAction::Download,
            Job::Skip { .. } => SyncAction::Skip,
        }
    }

    /// Bytes this job is expected to move
    fn size(&self) -> u64 {
        match self {
            Job::Upload { file, .. } => file.info.size,
            Job::Download { info, .. } => info.size,
            Job::Delete { .. } | Job::Skip { .. } => 0,
        }
    }
}

/// Shared state of the transfer tasks
struct Transfers {
    storage: Arc<dyn Storage>,
    retry: RetryConfig,
    align_mtime: bool,
}

impl Transfers {
    /// Run one job; returns bytes moved
    async fn run(&self, job: &Job) -> Result<u64> {
        let result = match job {
            Job::Upload { key, file } => self.upload(key, file).await,
            Job::Delete { key } => self.delete(key).await.map(|_| 0),
            Job::Download { key, dest, info } => self.download(key, dest, info).await,
            Job::Skip { .. } => Ok(0),
        };

        result.map_err(|e| Error::transfer(job.action().as_str(), job.key(), e))
    }

    async fn upload(&self, key: &str, file: &LocalFile) -> Result<u64> {
        tracing::info!(key = %key, size = file.info.size, "Uploading");

        let size = with_retry(&self.retry, || self.storage.put_file(key, &file.path)).await?;

        // Best effort, the object is already stored
        if self.align_mtime {
            if let Err(e) = self.align_local_mtime(key, file).await {
                tracing::warn!(key = %key, error = %e, "Could not align local mtime");
            }
        }

        Ok(size)
    }

    /// Stamp the local file with the stored object's modified time, so the
    /// next comparison sees the pair as equal.
    ///
    /// Skipped if the file changed while it was being uploaded.
    async fn align_local_mtime(&self, key: &str, file: &LocalFile) -> Result<()> {
        let remote = with_retry(&self.retry, || self.storage.head(key)).await?;

        let current = tokio::fs::metadata(&file.path)
            .await
            .and_then(|m| FileInfo::from_metadata(&m))
            .map_err(|e| Error::io(format!("reading metadata of {}", file.path.display()), e))?;

        if current != file.info || remote.info.size != current.size {
            tracing::debug!(
                path = %file.path.display(),
                "File changed during upload, leaving mtime alone"
            );
            return Ok(());
        }

        let mtime = FileTime::from_system_time(remote.info.modified);
        filetime::set_file_mtime(&file.path, mtime)
            .map_err(|e| Error::io(format!("setting mtime of {}", file.path.display()), e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tracing::info!(key = %key, "Deleting");

        match with_retry(&self.retry, || self.storage.delete(key)).await {
            Err(e) if e.is_not_found() => {
                tracing::warn!(key = %key, "Object already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn download(&self, key: &str, dest: &Path, info: &FileInfo) -> Result<u64> {
        tracing::info!(key = %key, size = info.size, "Downloading");

        let data = with_retry(&self.retry, || self.storage.get(key)).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }
        tokio::fs::write(dest, &data)
            .await
            .map_err(|e| Error::io(format!("writing {}", dest.display()), e))?;

        let mtime = FileTime::from_system_time(info.modified);
        filetime::set_file_times(dest, mtime, mtime)
            .map_err(|e| Error::io(format!("setting times of {}", dest.display()), e))?;

        Ok(data.len() as u64)
    }
}

/// Outcome of one spawned job
struct Outcome {
    key: String,
    action: SyncAction,
    result: Result<u64>,
}

/// Bounded, fail-fast job runner for one pass
pub struct Executor {
    transfers: Arc<Transfers>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<Outcome>,
    cancel: CancellationToken,
    progress: ProgressTracker,
    stats: SyncStats,
    first_error: Option<Error>,
    dry_run: bool,
}

impl Executor {
    /// Create an executor; `cancel` should be scoped to this pass
    pub fn new(storage: Arc<dyn Storage>, config: &Config, cancel: CancellationToken) -> Self {
        let jobs = config.effective_jobs().max(1);
        tracing::debug!(jobs, dry_run = config.dry_run, "Starting executor");

        Self {
            transfers: Arc::new(Transfers {
                storage,
                retry: RetryConfig::from(config),
                align_mtime: config.align_mtime,
            }),
            permits: Arc::new(Semaphore::new(jobs)),
            tasks: JoinSet::new(),
            cancel,
            progress: ProgressTracker::new(config.progress),
            stats: SyncStats::default(),
            first_error: None,
            dry_run: config.dry_run,
        }
    }

    /// Statistics gathered so far
    pub fn stats_mut(&mut self) -> &mut SyncStats {
        &mut self.stats
    }

    /// True once the pass has failed or been cancelled
    pub fn failed(&self) -> bool {
        self.first_error.is_some()
    }

    /// Record a failure that happened outside a job and stop the pass
    pub fn fail(&mut self, err: Error) {
        if !matches!(err, Error::Cancelled) {
            tracing::error!(error = %err, "Pass failed");
        }
        self.record_error(err);
        self.cancel.cancel();
    }

    /// Schedule a job.
    ///
    /// Waits for a free slot. Returns `false` once the pass has failed; the
    /// caller should stop producing jobs and call [`Executor::finish`].
    pub async fn submit(&mut self, job: Job) -> bool {
        self.reap();
        if self.failed() {
            return false;
        }

        let action = job.action();

        if self.dry_run || action == SyncAction::Skip {
            if action == SyncAction::Skip {
                tracing::debug!(key = %job.key(), "Skipping unchanged file");
            } else {
                tracing::info!(key = %job.key(), action = action.as_str(), "Would run (dry run)");
            }
            self.stats.record(action, job.size());
            self.progress.finish_action(action, 0);
            return true;
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.fail(Error::Cancelled);
                return false;
            }
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.fail(Error::Cancelled);
                    return false;
                }
            },
        };

        let transfers = self.transfers.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let _permit = permit;
            let key = job.key().to_string();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = transfers.run(&job) => result,
            };

            if matches!(&result, Err(e) if !matches!(e, Error::Cancelled)) {
                cancel.cancel();
            }

            Outcome {
                key,
                action,
                result,
            }
        });

        true
    }

    /// Wait for in-flight jobs and return the pass result
    pub async fn finish(mut self) -> Result<SyncStats> {
        self.wait_idle().await;
        self.progress.finish();

        match self.first_error {
            Some(err) => {
                tracing::debug!(stats = ?self.stats, "Pass stopped early");
                Err(err)
            }
            None => Ok(self.stats),
        }
    }

    /// Wait for every in-flight job, leaving the executor usable
    pub async fn wait_idle(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.absorb(joined);
        }
    }

    /// Collect finished jobs without waiting
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.absorb(joined);
        }
    }

    fn absorb(&mut self, joined: std::result::Result<Outcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.errors += 1;
                self.fail(Error::io(
                    "transfer task failed",
                    std::io::Error::other(e.to_string()),
                ));
                return;
            }
        };

        match outcome.result {
            Ok(bytes) => {
                self.stats.record(outcome.action, bytes);
                self.progress.finish_action(outcome.action, bytes);
            }
            Err(Error::Cancelled) => {
                tracing::debug!(key = %outcome.key, "Transfer cancelled");
                self.record_error(Error::Cancelled);
            }
            Err(err) => {
                self.stats.errors += 1;
                tracing::error!(
                    key = %outcome.key,
                    action = outcome.action.as_str(),
                    error = %err,
                    "Transfer failed"
                );
                self.record_error(err);
                self.cancel.cancel();
            }
        }
    }

    /// Keep the first real failure; cancellation only fills an empty slot
    fn record_error(&mut self, err: Error) {
        let replace = match &self.first_error {
            None => true,
            Some(Error::Cancelled) => !matches!(err, Error::Cancelled),
            Some(_) => false,
        };
        if replace {
            self.first_error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Metadata, ObjectStream, StoreBackend};
    use crate::types::ObjectInfo;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn config(dry_run: bool) -> Config {
        Config {
            jobs: 2,
            dry_run,
            max_retries: 0,
            ..Default::default()
        }
    }

    fn local_file(dir: &TempDir, name: &str, content: &str) -> LocalFile {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let info = FileInfo::from_metadata(&std::fs::metadata(&path).unwrap()).unwrap();
        LocalFile { path, info }
    }

    #[tokio::test]
    async fn test_upload_aligns_mtime() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(StoreBackend::in_memory());
        let file = local_file(&tmp, "a.txt", "hello");
        let old = FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(&file.path, old).unwrap();
        let file = LocalFile {
            info: FileInfo::from_metadata(&std::fs::metadata(&file.path).unwrap()).unwrap(),
            ..file
        };

        let mut exec = Executor::new(storage.clone(), &config(false), CancellationToken::new());
        assert!(
            exec.submit(Job::Upload {
                key: "p/a.txt".to_string(),
                file: file.clone(),
            })
            .await
        );
        let stats = exec.finish().await.unwrap();

        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(stats.bytes_uploaded, 5);

        let remote = storage.head("p/a.txt").await.unwrap();
        let local = FileInfo::from_metadata(&std::fs::metadata(&file.path).unwrap()).unwrap();
        assert!(local.same_as(&remote.info, 0));
    }

    #[tokio::test]
    async fn test_dry_run_only_counts() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(StoreBackend::in_memory());
        storage.put("p/old", Bytes::from("x")).await.unwrap();

        let mut exec = Executor::new(storage.clone(), &config(true), CancellationToken::new());
        exec.submit(Job::Upload {
            key: "p/new".to_string(),
            file: local_file(&tmp, "new", "abc"),
        })
        .await;
        exec.submit(Job::Delete {
            key: "p/old".to_string(),
        })
        .await;
        let stats = exec.finish().await.unwrap();

        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(stats.bytes_uploaded, 3);
        assert_eq!(stats.files_deleted, 1);
        assert!(storage.exists("p/old").await.unwrap());
        assert!(!storage.exists("p/new").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_is_ok() {
        let storage = Arc::new(StoreBackend::in_memory());
        let mut exec = Executor::new(storage, &config(false), CancellationToken::new());
        exec.submit(Job::Delete {
            key: "never-existed".to_string(),
        })
        .await;

        assert_eq!(exec.finish().await.unwrap().files_deleted, 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_key() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(StoreBackend::in_memory());
        let missing = LocalFile {
            path: tmp.path().join("vanished"),
            info: FileInfo::new(1, UNIX_EPOCH),
        };

        let mut exec = Executor::new(storage, &config(false), CancellationToken::new());
        exec.submit(Job::Upload {
            key: "p/vanished".to_string(),
            file: missing,
        })
        .await;

        let err = exec.finish().await.unwrap_err();
        match err {
            Error::Transfer { op, key, .. } => {
                assert_eq!(op, "upload");
                assert_eq!(key, "p/vanished");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_submit() {
        let storage = Arc::new(StoreBackend::in_memory());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut exec = Executor::new(storage, &config(false), cancel);
        let accepted = exec
            .submit(Job::Delete {
                key: "k".to_string(),
            })
            .await;

        assert!(!accepted);
        assert!(matches!(exec.finish().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_download_sets_mtime() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(StoreBackend::in_memory());
        storage.put("p/x/y.bin", Bytes::from("data")).await.unwrap();
        let modified = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let dest = tmp.path().join("x").join("y.bin");

        let mut exec = Executor::new(storage, &config(false), CancellationToken::new());
        exec.submit(Job::Download {
            key: "p/x/y.bin".to_string(),
            dest: dest.clone(),
            info: FileInfo::new(4, modified),
        })
        .await;
        let stats = exec.finish().await.unwrap();

        assert_eq!(stats.files_downloaded, 1);
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
        assert_eq!(std::fs::metadata(&dest).unwrap().modified().unwrap(), modified);
    }

    /// Write-only store: reads of object state are refused
    struct HeadDenied {
        inner: StoreBackend,
    }

    #[async_trait]
    impl Storage for HeadDenied {
        fn name(&self) -> &'static str {
            "head-denied"
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
            Err(Error::storage("head", key, "403 Forbidden"))
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
        async fn copy(&self, from: &str, to: &str) -> Result<()> {
            self.inner.copy(from, to).await
        }
        async fn get_metadata_tag(&self, key: &str, tag: &str) -> Result<String> {
            self.inner.get_metadata_tag(key, tag).await
        }
    }

    #[tokio::test]
    async fn test_upload_survives_failed_alignment() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(HeadDenied {
            inner: StoreBackend::in_memory(),
        });
        let file = local_file(&tmp, "a.txt", "stored anyway");

        let mut exec = Executor::new(storage.clone(), &config(false), CancellationToken::new());
        exec.submit(Job::Upload {
            key: "p/a.txt".to_string(),
            file,
        })
        .await;
        let stats = exec.finish().await.unwrap();

        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(
            storage.inner.get("p/a.txt").await.unwrap(),
            Bytes::from("stored anyway")
        );
    }
}
