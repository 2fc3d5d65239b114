//! Sync engine and orchestration
//!
//! A sync pass makes a prefix mirror a local directory. Objects whose
//! relative key has no local file are deleted, local files with no matching
//! object or a differing size/mtime are uploaded, and everything else is left
//! alone.

pub mod bulk;
pub mod diff;
pub mod execute;
pub mod listing;
pub mod walk;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keys;
use crate::storage::Storage;
use crate::types::SyncStats;
use diff::{LocalIndex, PlannedAction};
use execute::{Executor, Job};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The main sync engine
pub struct SyncEngine {
    /// Configuration
    config: Config,
    /// Remote storage backend
    storage: Arc<dyn Storage>,
    /// Cancels every pass started by this engine
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            storage,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g. tied to Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels running passes
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Make everything under `dst_prefix` mirror `src_dir`.
    ///
    /// Stops at the first failure (walk, listing or transfer) and returns it.
    /// Work already done stays done; running the pass again converges.
    pub async fn sync_dir_upload(&self, src_dir: &Path, dst_prefix: &str) -> Result<SyncStats> {
        self.config.validate()?;
        let start = Instant::now();
        let prefix = keys::normalize_prefix(dst_prefix);
        let cancel = self.cancel.child_token();
        // Stops the listing producer however this function returns
        let _guard = cancel.clone().drop_guard();

        tracing::info!(
            local = %src_dir.display(),
            prefix = %prefix,
            backend = self.storage.name(),
            dry_run = self.config.dry_run,
            "Starting sync"
        );

        let mut remote = listing::spawn_listing(
            self.storage.clone(),
            prefix.clone(),
            self.config.channel_capacity,
            cancel.clone(),
        );

        // Step 1: index the local tree while the listing starts filling its queue
        let mut index = self.index_local(src_dir, &cancel).await?;
        let files_scanned = index.len() as u64;
        tracing::debug!(files = files_scanned, "Local scan complete");

        let mut exec = Executor::new(self.storage.clone(), &self.config, cancel.clone());
        exec.stats_mut().files_scanned = files_scanned;

        // Step 2: match remote entries as they arrive
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    exec.fail(Error::Cancelled);
                    break;
                }
                item = remote.recv() => item,
            };

            let object = match item {
                None => break,
                Some(Ok(object)) => object,
                Some(Err(e)) => {
                    exec.fail(e);
                    break;
                }
            };
            exec.stats_mut().objects_listed += 1;

            let Some(planned) = index.match_remote(object, self.config.modify_window) else {
                continue;
            };
            if !exec.submit(to_job(&prefix, planned)).await {
                break;
            }
        }

        // Step 3: whatever is left has no remote counterpart. Deletes finish
        // first so a new key never lands where a removed path still sits.
        exec.wait_idle().await;
        if !exec.failed() {
            for planned in index.into_uploads() {
                if !exec.submit(to_job(&prefix, planned)).await {
                    break;
                }
            }
        }

        let mut stats = exec.finish().await?;
        stats.duration_secs = start.elapsed().as_secs_f64();

        tracing::info!(
            uploaded = stats.files_uploaded,
            deleted = stats.files_deleted,
            skipped = stats.files_skipped,
            bytes = stats.bytes_uploaded,
            "Sync complete"
        );

        Ok(stats)
    }

    /// Upload every file under `src_dir` without comparing or deleting
    pub async fn upload_dir(&self, src_dir: &Path, dst_prefix: &str) -> Result<SyncStats> {
        self.config.validate()?;
        let start = Instant::now();
        let prefix = keys::normalize_prefix(dst_prefix);

        tracing::info!(local = %src_dir.display(), prefix = %prefix, "Starting upload");

        let mut stats = bulk::upload_dir(
            self.storage.clone(),
            &self.config,
            self.cancel.child_token(),
            src_dir,
            &prefix,
        )
        .await?;
        stats.duration_secs = start.elapsed().as_secs_f64();

        tracing::info!(files = stats.files_uploaded, bytes = stats.bytes_uploaded, "Upload complete");
        Ok(stats)
    }

    /// Download every object under `src_prefix` into `dst_dir`
    pub async fn download_dir(&self, src_prefix: &str, dst_dir: &Path) -> Result<SyncStats> {
        self.config.validate()?;
        let start = Instant::now();
        let prefix = keys::normalize_prefix(src_prefix);
        let cancel = self.cancel.child_token();
        let _guard = cancel.clone().drop_guard();

        tracing::info!(prefix = %prefix, local = %dst_dir.display(), "Starting download");

        let mut stats =
            bulk::download_dir(self.storage.clone(), &self.config, cancel, &prefix, dst_dir)
                .await?;
        stats.duration_secs = start.elapsed().as_secs_f64();

        tracing::info!(
            files = stats.files_downloaded,
            bytes = stats.bytes_downloaded,
            "Download complete"
        );
        Ok(stats)
    }

    /// Walk `src_dir` into an index keyed by relative key
    async fn index_local(&self, src_dir: &Path, cancel: &CancellationToken) -> Result<LocalIndex> {
        let mut files = walk::spawn_walk(src_dir.to_path_buf(), self.config.channel_capacity);
        let mut index = LocalIndex::default();

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                item = files.recv() => item,
            };

            match item {
                None => return Ok(index),
                Some(item) => {
                    let file = item?;
                    let key = keys::relative_key(src_dir, &file.path)?;
                    index.insert(key, file);
                }
            }
        }
    }
}

/// Attach the prefix to a decision and turn it into a job
fn to_job(prefix: &str, planned: PlannedAction) -> Job {
    match planned {
        PlannedAction::Upload { key, file } => Job::Upload {
            key: keys::join_key(prefix, &key),
            file,
        },
        PlannedAction::Delete { key } => Job::Delete {
            key: keys::join_key(prefix, &key),
        },
        PlannedAction::Skip { key } => Job::Skip {
            key: keys::join_key(prefix, &key),
        },
    }
}
