//! Diff computation between the local tree and the remote listing
//!
//! The local side is indexed by relative key up front. Each remote entry is
//! then matched against the index as it arrives: a hit is compared and
//! removed, a miss means the object has no local counterpart. Whatever is
//! left in the index after the listing ends has no remote counterpart.

use crate::types::{FileInfo, LocalFile, ObjectInfo, SyncAction};
use std::collections::{HashMap, HashSet};

/// One decision of a sync pass, keyed by relative key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    /// Local file is new or differs from the object
    Upload { key: String, file: LocalFile },
    /// Object has no local counterpart
    Delete { key: String },
    /// Pair compares equal
    Skip { key: String },
}

impl PlannedAction {
    /// Key relative to the sync prefix
    pub fn key(&self) -> &str {
        match self {
            PlannedAction::Upload { key, .. }
            | PlannedAction::Delete { key }
            | PlannedAction::Skip { key } => key,
        }
    }

    /// Action kind
    pub fn action(&self) -> SyncAction {
        match self {
            PlannedAction::Upload { .. } => SyncAction::Upload,
            PlannedAction::Delete { .. } => SyncAction::Delete,
            PlannedAction::Skip { .. } => SyncAction::Skip,
        }
    }
}

/// Compare a local file against the object at the same key
pub fn decide(local: &FileInfo, remote: &FileInfo, modify_window: u64) -> SyncAction {
    if local.same_as(remote, modify_window) {
        SyncAction::Skip
    } else {
        SyncAction::Upload
    }
}

/// Local files by relative key, consumed while the listing is matched
#[derive(Debug, Default)]
pub struct LocalIndex {
    files: HashMap<String, LocalFile>,
    /// Remote keys already decided in this pass
    decided: HashSet<String>,
}

impl LocalIndex {
    /// Add a file under its relative key
    pub fn insert(&mut self, key: String, file: LocalFile) {
        self.files.insert(key, file);
    }

    /// Number of files not yet matched
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True if no files remain
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Decide what to do about one remote entry (key relative to the prefix).
    ///
    /// A key the listing repeats gets no second decision and yields `None`.
    pub fn match_remote(&mut self, remote: ObjectInfo, modify_window: u64) -> Option<PlannedAction> {
        if !self.decided.insert(remote.key.clone()) {
            tracing::debug!(key = %remote.key, "Ignoring repeated listing entry");
            return None;
        }

        let planned = match self.files.remove(&remote.key) {
            Some(local) => {
                let action = decide(&local.info, &remote.info, modify_window);
                tracing::trace!(
                    key = %remote.key,
                    action = action.as_str(),
                    local_size = local.info.size,
                    remote_size = remote.info.size,
                    "Compared"
                );
                match action {
                    SyncAction::Skip => PlannedAction::Skip { key: remote.key },
                    _ => PlannedAction::Upload {
                        key: remote.key,
                        file: local,
                    },
                }
            }
            None => PlannedAction::Delete { key: remote.key },
        };
        Some(planned)
    }

    /// Files with no remote counterpart, sorted by key
    pub fn into_uploads(self) -> Vec<PlannedAction> {
        let mut uploads: Vec<PlannedAction> = self
            .files
            .into_iter()
            .map(|(key, file)| PlannedAction::Upload { key, file })
            .collect();
        uploads.sort_by(|a, b| a.key().cmp(b.key()));
        uploads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn make_local(key: &str, size: u64, modified: SystemTime) -> LocalFile {
        LocalFile {
            path: PathBuf::from("/src").join(key),
            info: FileInfo::new(size, modified),
        }
    }

    fn make_remote(key: &str, size: u64, modified: SystemTime) -> ObjectInfo {
        ObjectInfo::new(key, FileInfo::new(size, modified))
    }

    fn index(files: &[(&str, u64, u64)]) -> LocalIndex {
        let mut index = LocalIndex::default();
        for (key, size, secs) in files {
            index.insert(key.to_string(), make_local(key, *size, at(*secs)));
        }
        index
    }

    #[test]
    fn test_unchanged_files_skipped() {
        let mut index = index(&[("a", 1, 100)]);
        let planned = index.match_remote(make_remote("a", 1, at(100)), 0).unwrap();
        assert_eq!(planned.action(), SyncAction::Skip);
        assert!(index.is_empty());
    }

    #[test]
    fn test_subsecond_difference_skipped() {
        let mut index = LocalIndex::default();
        index.insert(
            "a".to_string(),
            make_local("a", 1, at(100) + Duration::from_millis(900)),
        );
        let planned = index.match_remote(make_remote("a", 1, at(100)), 0).unwrap();
        assert_eq!(planned.action(), SyncAction::Skip);
    }

    #[test]
    fn test_changed_files_uploaded() {
        let mut index = index(&[("size", 2, 100), ("mtime", 1, 200)]);

        let by_size = index.match_remote(make_remote("size", 1, at(100)), 0).unwrap();
        assert!(matches!(by_size, PlannedAction::Upload { .. }));

        let by_mtime = index.match_remote(make_remote("mtime", 1, at(100)), 0).unwrap();
        assert_eq!(by_mtime.action(), SyncAction::Upload);
    }

    #[test]
    fn test_modify_window() {
        let mut index = index(&[("a", 1, 102)]);
        let planned = index.match_remote(make_remote("a", 1, at(100)), 2).unwrap();
        assert_eq!(planned.action(), SyncAction::Skip);
    }

    #[test]
    fn test_delete_detection() {
        let mut index = index(&[("a", 1, 100)]);
        let planned = index.match_remote(make_remote("gone", 1, at(100)), 0).unwrap();
        assert_eq!(planned.action(), SyncAction::Delete);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_new_files_detected_in_key_order() {
        let mut index = index(&[("c", 1, 100), ("a", 1, 100), ("b/d", 1, 100)]);
        index.match_remote(make_remote("a", 1, at(100)), 0);

        let uploads = index.into_uploads();
        let keys: Vec<&str> = uploads.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["b/d", "c"]);
        assert!(uploads.iter().all(|p| p.action() == SyncAction::Upload));
    }

    #[test]
    fn test_each_key_decided_once() {
        // local {a, b}, remote {b, c}: b compared, c deleted, a uploaded
        let mut index = index(&[("a", 1, 100), ("b", 1, 100)]);
        let mut decided = vec![
            index.match_remote(make_remote("b", 1, at(100)), 0).unwrap(),
            index.match_remote(make_remote("c", 1, at(100)), 0).unwrap(),
        ];
        decided.extend(index.into_uploads());

        let summary: Vec<(&str, SyncAction)> =
            decided.iter().map(|p| (p.key(), p.action())).collect();
        assert_eq!(
            summary,
            vec![
                ("b", SyncAction::Skip),
                ("c", SyncAction::Delete),
                ("a", SyncAction::Upload),
            ]
        );
    }

    #[test]
    fn test_repeated_listing_entry_ignored() {
        // The first sighting uploads; a repeat must not turn into a delete
        let mut index = index(&[("a", 2, 100)]);
        let first = index.match_remote(make_remote("a", 1, at(100)), 0);
        assert_eq!(first.map(|p| p.action()), Some(SyncAction::Upload));

        assert!(index.match_remote(make_remote("a", 1, at(100)), 0).is_none());
        assert!(index.match_remote(make_remote("gone", 1, at(100)), 0).is_some());
        assert!(index.match_remote(make_remote("gone", 1, at(100)), 0).is_none());
        assert!(index.into_uploads().is_empty());
    }
}
