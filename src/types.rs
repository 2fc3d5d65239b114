//! Core domain types for artisync

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size and modification time of a local file or a stored object.
///
/// This pair is the only signal used to decide whether a file is up to date;
/// content is never hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,
}

impl FileInfo {
    /// Create a new file info
    pub fn new(size: u64, modified: SystemTime) -> Self {
        Self { size, modified }
    }

    /// Build from filesystem metadata
    pub fn from_metadata(metadata: &std::fs::Metadata) -> std::io::Result<Self> {
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Modification time as whole seconds relative to the Unix epoch
    pub fn modified_secs(&self) -> i64 {
        match self.modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            // Pre-epoch: round towards negative infinity so truncation stays monotonic
            Err(e) => {
                let d = e.duration();
                let secs = d.as_secs() as i64;
                if d.subsec_nanos() > 0 {
                    -secs - 1
                } else {
                    -secs
                }
            }
        }
    }

    /// Compare at one-second granularity.
    ///
    /// Sizes must match exactly; truncated mtimes may differ by at most
    /// `modify_window` seconds.
    pub fn same_as(&self, other: &FileInfo, modify_window: u64) -> bool {
        if self.size != other.size {
            return false;
        }
        self.modified_secs().abs_diff(other.modified_secs()) <= modify_window
    }
}

/// One entry in a listing: a key plus its file info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key (absolute within the bucket, or relative to a prefix
    /// once it has passed through the listing producer)
    pub key: String,

    /// Size and modification time
    pub info: FileInfo,
}

impl ObjectInfo {
    /// Create a new object info
    pub fn new(key: impl Into<String>, info: FileInfo) -> Self {
        Self {
            key: key.into(),
            info,
        }
    }
}

/// A regular file found by the local walker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Path on the host filesystem
    pub path: PathBuf,

    /// Size and modification time from stat
    pub info: FileInfo,
}

/// Action decided for one key during a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAction {
    /// Upload local file (new or changed)
    Upload,

    /// Delete remote object (no local counterpart)
    Delete,

    /// Download remote object to a local file
    Download,

    /// Skip (already in sync)
    Skip,
}

impl SyncAction {
    /// Check if this action transfers data
    pub fn transfers_data(&self) -> bool {
        matches!(self, SyncAction::Upload | SyncAction::Download)
    }

    /// Operation name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Upload => "upload",
            SyncAction::Delete => "delete",
            SyncAction::Download => "download",
            SyncAction::Skip => "skip",
        }
    }
}

/// Statistics for a sync, upload or download pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Local files found by the walker
    pub files_scanned: u64,

    /// Remote objects seen in the listing
    pub objects_listed: u64,

    /// Files uploaded
    pub files_uploaded: u64,

    /// Files downloaded
    pub files_downloaded: u64,

    /// Remote objects deleted
    pub files_deleted: u64,

    /// Files skipped (already in sync)
    pub files_skipped: u64,

    /// Bytes uploaded
    pub bytes_uploaded: u64,

    /// Bytes downloaded
    pub bytes_downloaded: u64,

    /// Failed transfers
    pub errors: u64,

    /// Duration in seconds
    pub duration_secs: f64,
}

impl SyncStats {
    /// Total bytes moved in either direction
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_uploaded + self.bytes_downloaded
    }

    /// Calculate transfer rate in bytes per second
    pub fn transfer_rate(&self) -> f64 {
        if self.duration_secs == 0.0 {
            0.0
        } else {
            self.bytes_transferred() as f64 / self.duration_secs
        }
    }

    /// Count one decided action
    pub fn record(&mut self, action: SyncAction, bytes: u64) {
        match action {
            SyncAction::Upload => {
                self.files_uploaded += 1;
                self.bytes_uploaded += bytes;
            }
            SyncAction::Download => {
                self.files_downloaded += 1;
                self.bytes_downloaded += bytes;
            }
            SyncAction::Delete => self.files_deleted += 1,
            SyncAction::Skip => self.files_skipped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64, millis: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_millis(millis)
    }

    #[test]
    fn test_same_as_ignores_subsecond_part() {
        let local = FileInfo::new(10, at(1_700_000_000, 123));
        let remote = FileInfo::new(10, at(1_700_000_000, 0));
        assert!(local.same_as(&remote, 0));
    }

    #[test]
    fn test_same_as_detects_mtime_change() {
        let local = FileInfo::new(10, at(1_700_000_005, 0));
        let remote = FileInfo::new(10, at(1_700_000_000, 0));
        assert!(!local.same_as(&remote, 0));
        assert!(local.same_as(&remote, 5));
    }

    #[test]
    fn test_same_as_detects_size_change() {
        let t = at(1_700_000_000, 0);
        assert!(!FileInfo::new(10, t).same_as(&FileInfo::new(11, t), 60));
    }

    #[test]
    fn test_modified_secs_before_epoch() {
        let info = FileInfo::new(0, UNIX_EPOCH - Duration::from_millis(500));
        assert_eq!(info.modified_secs(), -1);
    }

    #[test]
    fn test_sync_action_transfers_data() {
        assert!(SyncAction::Upload.transfers_data());
        assert!(SyncAction::Download.transfers_data());
        assert!(!SyncAction::Skip.transfers_data());
        assert!(!SyncAction::Delete.transfers_data());
    }

    #[test]
    fn test_stats_record() {
        let mut stats = SyncStats::default();
        stats.record(SyncAction::Upload, 10);
        stats.record(SyncAction::Delete, 0);
        stats.record(SyncAction::Skip, 0);
        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(stats.bytes_uploaded, 10);
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.files_skipped, 1);
    }
}
