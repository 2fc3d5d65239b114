//! Local directory walker
//!
//! Runs jwalk on a blocking thread and feeds regular files into a bounded
//! queue, so a slow consumer holds the walk back instead of buffering the
//! whole tree.

use crate::error::{Error, Result};
use crate::types::{FileInfo, LocalFile};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Start walking `root` and return the receiving end of the queue.
///
/// Yields regular files only. Symlinks are not followed into directories; a
/// symlink to a regular file is reported with the target's size and mtime,
/// dangling links are skipped. The first traversal error is sent as the last
/// item. Dropping the receiver stops the walk.
pub fn spawn_walk(root: PathBuf, capacity: usize) -> mpsc::Receiver<Result<LocalFile>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::task::spawn_blocking(move || walk_into(&root, &tx));
    rx
}

/// [`spawn_walk`] as a stream
pub fn walk_stream(root: PathBuf, capacity: usize) -> BoxStream<'static, Result<LocalFile>> {
    receiver_stream(spawn_walk(root, capacity))
}

/// Adapt a bounded queue into a stream
pub(crate) fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
    .boxed()
}

fn walk_into(root: &Path, tx: &mpsc::Sender<Result<LocalFile>>) {
    let traversal = |path: &Path, message: String| Error::Traversal {
        path: path.to_path_buf(),
        message,
    };

    match std::fs::metadata(root) {
        Ok(m) if m.is_dir() => {}
        Ok(_) => {
            let _ = tx.blocking_send(Err(traversal(root, "not a directory".to_string())));
            return;
        }
        Err(e) => {
            let _ = tx.blocking_send(Err(traversal(root, e.to_string())));
            return;
        }
    }

    let walker = jwalk::WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .sort(true)
        .parallelism(jwalk::Parallelism::Serial);

    for entry in walker {
        let item = match entry {
            Ok(entry) => match classify(&entry) {
                Some(item) => item,
                None => continue,
            },
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                Err(Error::Traversal {
                    path,
                    message: e.to_string(),
                })
            }
        };

        let failed = item.is_err();
        if tx.blocking_send(item).is_err() {
            tracing::debug!(root = %root.display(), "Walk receiver dropped, stopping");
            return;
        }
        if failed {
            return;
        }
    }
}

/// Turn a directory entry into a file, or `None` if it is not one
fn classify(entry: &jwalk::DirEntry<((), ())>) -> Option<Result<LocalFile>> {
    let path = entry.path();
    let file_type = entry.file_type();

    if file_type.is_dir() {
        return None;
    }

    let metadata = if file_type.is_symlink() {
        match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                tracing::debug!(path = %path.display(), "Skipping symlink to non-file");
                return None;
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping dangling symlink");
                return None;
            }
        }
    } else if file_type.is_file() {
        match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                return Some(Err(Error::Traversal {
                    path,
                    message: e.to_string(),
                }))
            }
        }
    } else {
        tracing::debug!(path = %path.display(), "Skipping special file");
        return None;
    };

    Some(
        FileInfo::from_metadata(&metadata)
            .map(|info| LocalFile {
                path: path.clone(),
                info,
            })
            .map_err(|e| Error::Traversal {
                path,
                message: e.to_string(),
            }),
    )
}
