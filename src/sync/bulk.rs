//! Unconditional whole-tree copies
//!
//! Unlike a sync pass these never compare and never delete: every file under
//! the source is written to the destination.

use super::execute::{Executor, Job};
use super::{listing, walk};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::keys;
use crate::storage::Storage;
use crate::types::SyncStats;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Upload every regular file under `src_dir` to `prefix` + relative path
pub async fn upload_dir(
    storage: Arc<dyn Storage>,
    config: &Config,
    cancel: CancellationToken,
    src_dir: &Path,
    prefix: &str,
) -> Result<SyncStats> {
    let mut files = walk::spawn_walk(src_dir.to_path_buf(), config.channel_capacity);
    let mut exec = Executor::new(storage, config, cancel.clone());

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                exec.fail(Error::Cancelled);
                break;
            }
            item = files.recv() => item,
        };

        let file = match item {
            None => break,
            Some(Ok(file)) => file,
            Some(Err(e)) => {
                exec.fail(e);
                break;
            }
        };
        exec.stats_mut().files_scanned += 1;

        let key = match keys::relative_key(src_dir, &file.path) {
            Ok(relative) => keys::join_key(prefix, &relative),
            Err(e) => {
                exec.fail(e);
                break;
            }
        };

        if !exec.submit(Job::Upload { key, file }).await {
            break;
        }
    }

    exec.finish().await
}

/// Download every object under `prefix` into `dst_dir`, creating directories
/// as needed and stamping each file with the object's modified time
pub async fn download_dir(
    storage: Arc<dyn Storage>,
    config: &Config,
    cancel: CancellationToken,
    prefix: &str,
    dst_dir: &Path,
) -> Result<SyncStats> {
    let mut objects = listing::spawn_listing(
        storage.clone(),
        prefix.to_string(),
        config.channel_capacity,
        cancel.clone(),
    );
    let mut exec = Executor::new(storage, config, cancel.clone());

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                exec.fail(Error::Cancelled);
                break;
            }
            item = objects.recv() => item,
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

        // Reject keys that would escape the destination directory
        let dest = match keys::local_path(dst_dir, &object.key) {
            Ok(dest) => dest,
            Err(e) => {
                exec.fail(e);
                break;
            }
        };

        let job = Job::Download {
            key: keys::join_key(prefix, &object.key),
            dest,
            info: object.info,
        };
        if !exec.submit(job).await {
            break;
        }
    }

    exec.finish().await
}
