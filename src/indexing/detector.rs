use crate::core::error::{Error, Result};
use crate::storage::state::{calculate_file_hash, FileState, FingerprintStore};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Decides whether a file's content changed since it was last indexed.
///
/// Fingerprints are loaded once at construction, mutated in memory and
/// written back by an explicit [`ChangeDetector::flush`] after each batch.
pub struct ChangeDetector {
    store: FingerprintStore,
    entries: HashMap<String, FileState>,
    dirty: HashSet<String>,
    removed: HashSet<String>,
}

impl ChangeDetector {
    pub fn open(state_path: &Path) -> Result<Self> {
        let store = FingerprintStore::open(state_path)?;
        let entries = store.load_all()?;
        tracing::debug!(files = entries.len(), "loaded fingerprints");
        Ok(Self {
            store,
            entries,
            dirty: HashSet::new(),
            removed: HashSet::new(),
        })
    }

    /// Hash the file and compare with the recorded fingerprint.
    ///
    /// A changed or unknown file has its new hash recorded and returns `true`.
    /// An unreadable file yields `Error::Extraction` and leaves state untouched.
    pub fn needs_reindex(&mut self, path: &Path) -> Result<bool> {
        let hash = calculate_file_hash(path).map_err(|e| Error::extraction(path, e))?;
        let key = path_key(path);

        if self
            .entries
            .get(&key)
            .is_some_and(|state| state.content_hash == hash)
        {
            return Ok(false);
        }

        self.removed.remove(&key);
        self.dirty.insert(key.clone());
        self.entries.insert(key, FileState::new(hash));
        Ok(true)
    }

    /// Drop the fingerprint so the file is processed again on the next pass
    pub fn invalidate(&mut self, path: &Path) {
        let key = path_key(path);
        if self.entries.remove(&key).is_some() {
            self.removed.insert(key.clone());
        }
        self.dirty.remove(&key);
    }

    pub fn fingerprint(&self, path: &Path) -> Option<&FileState> {
        self.entries.get(&path_key(path))
    }

    pub fn tracked_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }

    /// Persist pending changes in one transaction
    pub fn flush(&mut self) -> Result<()> {
        if !self.has_pending_changes() {
            return Ok(());
        }

        let upserts = self
            .dirty
            .iter()
            .filter_map(|key| self.entries.get(key).map(|state| (key.as_str(), state)));
        self.store
            .write_batch(upserts, self.removed.iter().map(String::as_str))?;

        tracing::debug!(
            updated = self.dirty.len(),
            removed = self.removed.len(),
            "flushed fingerprints"
        );
        self.dirty.clear();
        self.removed.clear();
        Ok(())
    }

    /// Forget every fingerprint, in memory and on disk
    pub fn clear(&mut self) -> Result<()> {
        self.store.clear()?;
        self.entries.clear();
        self.dirty.clear();
        self.removed.clear();
        Ok(())
    }

    pub fn model_id(&self) -> Result<Option<String>> {
        self.store.get_model_id()
    }

    pub fn set_model_id(&self, model_id: &str) -> Result<()> {
        self.store.set_model_id(model_id)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_needs_reindex_tracks_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("note.md");
        fs::write(&file, "first").unwrap();

        let mut detector = ChangeDetector::open(&temp_dir.path().join("state.redb")).unwrap();
        assert!(detector.needs_reindex(&file).unwrap());
        assert!(!detector.needs_reindex(&file).unwrap());

        fs::write(&file, "second").unwrap();
        assert!(detector.needs_reindex(&file).unwrap());
        assert!(!detector.needs_reindex(&file).unwrap());
    }

    #[test]
    fn test_unreadable_file_leaves_state_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let mut detector = ChangeDetector::open(&temp_dir.path().join("state.redb")).unwrap();

        let missing = temp_dir.path().join("missing.md");
        let err = detector.needs_reindex(&missing).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
        assert!(detector.is_empty());
        assert!(!detector.has_pending_changes());
    }

    #[test]
    fn test_flush_persists_only_on_request() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("state.redb");
        let file = temp_dir.path().join("note.md");
        fs::write(&file, "content").unwrap();

        {
            let mut detector = ChangeDetector::open(&state_path).unwrap();
            assert!(detector.needs_reindex(&file).unwrap());
        }
        {
            // Not flushed, so nothing was recorded
            let mut detector = ChangeDetector::open(&state_path).unwrap();
            assert!(detector.is_empty());
            assert!(detector.needs_reindex(&file).unwrap());
            detector.flush().unwrap();
        }

        let mut detector = ChangeDetector::open(&state_path).unwrap();
        assert_eq!(detector.len(), 1);
        assert!(!detector.needs_reindex(&file).unwrap());
    }

    #[test]
    fn test_invalidate_forces_retry() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("state.redb");
        let file = temp_dir.path().join("note.md");
        fs::write(&file, "content").unwrap();

        let mut detector = ChangeDetector::open(&state_path).unwrap();
        assert!(detector.needs_reindex(&file).unwrap());
        detector.flush().unwrap();

        detector.invalidate(&file);
        detector.flush().unwrap();
        assert!(detector.fingerprint(&file).is_none());
        drop(detector);

        let mut detector = ChangeDetector::open(&state_path).unwrap();
        assert!(detector.is_empty());
        assert!(detector.needs_reindex(&file).unwrap());
    }
}
