use std::collections::BTreeMap;
use std::fs::{read_to_string, remove_file, write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string_pretty};
use thiserror::Error;

/// Errors surfaced by the progress record.
#[derive(Debug, Error)]
pub(crate) enum ProgressError {
    #[error("progress file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("progress file contains invalid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A download that hit a transport error.
///
/// The sequence number is stored next to the formatted name so retry
/// rounds never have to parse it back out of the string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct FailedEntry {
    pub(crate) seq: u32,
    pub(crate) name: String,
}

/// The persisted record of finished and failed downloads.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct ProgressDocument {
    /// Names that hit request errors, in the order they failed.
    #[serde(rename = "failed_images", default)]
    failed: Vec<FailedEntry>,
    /// Every finished download mapped to its size in MB.
    #[serde(rename = "success_images", default)]
    succeeded: BTreeMap<String, f64>,
}

/// Tracks download outcomes and mirrors them to a JSON file.
///
/// One instance is shared by every worker. The single mutex guards both
/// the in-memory collections and the file write, so concurrent workers
/// cannot interleave partial documents.
pub(crate) struct ProgressTracker {
    path: PathBuf,
    state: Mutex<ProgressDocument>,
}

impl ProgressTracker {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(ProgressDocument::default()),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory state with the file contents.
    ///
    /// A missing file means no progress yet. Invalid JSON is a hard
    /// error; quietly resetting would re-download everything.
    pub(crate) fn reload(&self) -> Result<(), ProgressError> {
        let document = if self.path.exists() {
            from_str(&read_to_string(&self.path)?)?
        } else {
            ProgressDocument::default()
        };
        *self.state.lock() = document;
        Ok(())
    }

    /// Writes the current state out, overwriting the file. The lock is
    /// held across serialization and the write itself.
    pub(crate) fn save(&self) -> Result<(), ProgressError> {
        let state = self.state.lock();
        let json = to_string_pretty(&*state)?;
        write(&self.path, json)?;
        Ok(())
    }

    /// Deletes the progress file and forgets the in-memory state.
    /// Returns whether a file was actually removed.
    pub(crate) fn clear(&self) -> Result<bool, ProgressError> {
        let mut state = self.state.lock();
        *state = ProgressDocument::default();
        if self.path.exists() {
            remove_file(&self.path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Whether the name finished downloading in an earlier attempt.
    pub(crate) fn is_complete(&self, name: &str) -> bool {
        self.state.lock().succeeded.contains_key(name)
    }

    pub(crate) fn record_success(&self, name: &str, size_mb: f64) {
        self.state.lock().succeeded.insert(name.to_owned(), size_mb);
    }

    pub(crate) fn record_failure(&self, seq: u32, name: &str) {
        self.state.lock().failed.push(FailedEntry {
            seq,
            name: name.to_owned(),
        });
    }

    /// Removes and returns the failed list.
    ///
    /// Each retry round works from this snapshot while fresh failures
    /// re-accumulate from empty, so a round replaces the list instead of
    /// growing it.
    pub(crate) fn take_failed(&self) -> Vec<FailedEntry> {
        std::mem::take(&mut self.state.lock().failed)
    }

    pub(crate) fn failed_len(&self) -> usize {
        self.state.lock().failed.len()
    }

    /// Copy of the succeeded map for summaries.
    pub(crate) fn succeeded_snapshot(&self) -> BTreeMap<String, f64> {
        self.state.lock().succeeded.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker_in(dir: &TempDir) -> ProgressTracker {
        ProgressTracker::new(dir.path().join("test_progress.json"))
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);

        tracker.reload().unwrap();

        assert_eq!(tracker.failed_len(), 0);
        assert!(tracker.succeeded_snapshot().is_empty());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        tracker.record_failure(12, "2025-05-09-IMG_0012.jpeg");
        tracker.record_success("2025-05-09-IMG_0001.jpeg", 1.5);
        tracker.save().unwrap();

        let reloaded = tracker_in(&dir);
        reloaded.reload().unwrap();

        let failed = reloaded.take_failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].seq, 12);
        assert_eq!(failed[0].name, "2025-05-09-IMG_0012.jpeg");
        let succeeded = reloaded.succeeded_snapshot();
        assert!((succeeded["2025-05-09-IMG_0001.jpeg"] - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        std::fs::write(tracker.path(), "{not json").unwrap();

        assert!(matches!(tracker.reload(), Err(ProgressError::Malformed(_))));
    }

    #[test]
    fn clear_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        tracker.record_success("a.jpeg", 0.5);
        tracker.save().unwrap();

        assert!(tracker.clear().unwrap());
        assert!(!tracker.path().exists());

        tracker.reload().unwrap();
        assert!(tracker.succeeded_snapshot().is_empty());

        // Nothing left to remove the second time around.
        assert!(!tracker.clear().unwrap());
    }

    #[test]
    fn take_failed_replaces_instead_of_accumulating() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        tracker.record_failure(1, "a.jpeg");
        tracker.record_failure(2, "b.jpeg");

        let taken = tracker.take_failed();

        assert_eq!(taken.len(), 2);
        assert_eq!(tracker.failed_len(), 0);

        tracker.record_failure(2, "b.jpeg");
        assert_eq!(tracker.failed_len(), 1);
    }

    #[test]
    fn recorded_success_marks_the_name_complete() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);

        assert!(!tracker.is_complete("a.jpeg"));
        tracker.record_success("a.jpeg", 2.0);
        assert!(tracker.is_complete("a.jpeg"));
    }
}
