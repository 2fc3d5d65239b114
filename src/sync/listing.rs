//! Remote listing producer
//!
//! Lists a prefix on its own task and hands entries to the diff loop through
//! a bounded queue, with keys already made relative to the prefix.

use crate::error::{Error, Result};
use crate::keys;
use crate::storage::Storage;
use crate::types::ObjectInfo;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Start listing `prefix` (already normalized) and return the receiving end.
///
/// Directory markers are dropped. A listing failure is forwarded as the last
/// item instead of silently ending the queue. The task stops when `cancel`
/// fires or the receiver is dropped.
pub fn spawn_listing(
    storage: Arc<dyn Storage>,
    prefix: String,
    capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<Result<ObjectInfo>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move { produce(storage, prefix, tx, cancel).await });
    rx
}

async fn produce(
    storage: Arc<dyn Storage>,
    prefix: String,
    tx: mpsc::Sender<Result<ObjectInfo>>,
    cancel: CancellationToken,
) {
    let mut stream = storage.list(&prefix);
    let mut listed = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(prefix = %prefix, listed, "Listing cancelled");
                return;
            }
            next = stream.next() => next,
        };

        let item = match next {
            None => break,
            Some(Ok(object)) => match relativize(object, &prefix) {
                Ok(Some(object)) => Ok(object),
                Ok(None) => continue,
                Err(e) => Err(e),
            },
            Some(Err(e)) => Err(e),
        };

        let failed = item.is_err();
        if let Err(e) = &item {
            tracing::debug!(prefix = %prefix, error = %e, "Listing failed");
        } else {
            listed += 1;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        if failed {
            return;
        }
    }

    tracing::debug!(prefix = %prefix, listed, backend = storage.name(), "Listing complete");
}

/// Strip the prefix; `None` for directory markers
fn relativize(object: ObjectInfo, prefix: &str) -> Result<Option<ObjectInfo>> {
    let Some(relative) = keys::strip_key_prefix(&object.key, prefix) else {
        return Err(Error::storage(
            "list",
            object.key.clone(),
            format!("backend returned a key outside prefix '{}'", prefix),
        ));
    };

    if relative.is_empty() || relative.ends_with(keys::SEPARATOR) {
        tracing::trace!(key = %object.key, "Skipping directory marker");
        return Ok(None);
    }

    Ok(Some(ObjectInfo::new(relative, object.info)))
}
