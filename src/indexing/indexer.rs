use crate::core::config::{Config, IndexingSettings};
use crate::core::document::{Document, DocumentMetadata};
use crate::core::error::{Error, Result};
use crate::indexing::chunker::Chunker;
use crate::indexing::detector::ChangeDetector;
use crate::indexing::extract::{detect_format, extract_text, FileFormat};
use crate::privacy::classifier::PrivacyClassifier;
use crate::storage::state::get_file_modified_time;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Documents produced by a walk, plus the files that failed along the way
#[derive(Debug, Default)]
pub struct IndexBatch {
    pub documents: Vec<Document>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl IndexBatch {
    fn extend(&mut self, other: IndexBatch) {
        self.documents.extend(other.documents);
        self.failed.extend(other.failed);
    }
}

/// Turns files into tiered documents: filter, fingerprint, extract, classify, chunk.
pub struct FileIndexer {
    classifier: PrivacyClassifier,
    chunker: Chunker,
    settings: IndexingSettings,
    detector: Mutex<ChangeDetector>,
}

impl FileIndexer {
    pub fn new(
        classifier: PrivacyClassifier,
        chunker: Chunker,
        settings: IndexingSettings,
        detector: ChangeDetector,
    ) -> Self {
        Self {
            classifier,
            chunker,
            settings,
            detector: Mutex::new(detector),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = &config.settings;
        Ok(Self::new(
            PrivacyClassifier::from_settings(settings)?,
            Chunker::new(settings.rag.chunk_size, settings.rag.chunk_overlap)?,
            settings.indexing.clone(),
            ChangeDetector::open(&config.state_path)?,
        ))
    }

    pub fn classifier(&self) -> &PrivacyClassifier {
        &self.classifier
    }

    pub fn settings(&self) -> &IndexingSettings {
        &self.settings
    }

    /// Produce documents for one file.
    ///
    /// Returns nothing for excluded, unsupported or unchanged files. A file
    /// that cannot be hashed or read is an `Error::Extraction`; a read failure
    /// also drops the freshly recorded fingerprint so the file is retried.
    pub fn index_file(&self, path: &Path) -> Result<Vec<Document>> {
        if !self.classifier.should_index(path) {
            tracing::debug!(path = %path.display(), "excluded");
            return Ok(Vec::new());
        }

        match detect_format(path) {
            FileFormat::Text(_) => {}
            FileFormat::Unsupported(kind) => {
                tracing::info!(path = %path.display(), format = kind, "no text extractor for format, skipping");
                return Ok(Vec::new());
            }
            FileFormat::Unknown => {
                tracing::debug!(path = %path.display(), "unknown file type, skipping");
                return Ok(Vec::new());
            }
        }

        if !self.detector().needs_reindex(path)? {
            tracing::debug!(path = %path.display(), "unchanged, skipping");
            return Ok(Vec::new());
        }

        let text = match extract_text(path) {
            Ok(text) => text,
            Err(e) => {
                self.invalidate(path);
                return Err(e);
            }
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tier = self.classifier.classify(path);
        let modified_time = get_file_modified_time(path).unwrap_or(0);
        let source_path = path.to_string_lossy().into_owned();
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.clone());

        let chunks = self.chunker.chunk(&text);
        let chunk_count = chunks.len();
        let documents: Vec<Document> = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| Document {
                content,
                metadata: DocumentMetadata {
                    source_path: source_path.clone(),
                    source_name: source_name.clone(),
                    privacy_tier: Some(tier),
                    chunk_index,
                    chunk_count,
                    modified_time,
                },
            })
            .collect();

        tracing::info!(path = %path.display(), chunks = chunk_count, %tier, "indexed file");
        Ok(documents)
    }

    /// Index every allow-listed file under `dir`, then flush fingerprints once
    pub fn index_directory(&self, dir: &Path) -> Vec<Document> {
        self.scan_directory(dir).documents
    }

    /// Like [`FileIndexer::index_directory`], also reporting failed files
    pub fn scan_directory(&self, dir: &Path) -> IndexBatch {
        let batch = self.collect_directory(dir);
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "failed to persist fingerprints");
        }
        batch
    }

    /// Walk `dir` without persisting fingerprints.
    ///
    /// New fingerprints stay in memory until [`FileIndexer::flush`], so a
    /// caller can persist them only once the documents are stored.
    pub fn collect_directory(&self, dir: &Path) -> IndexBatch {
        let mut batch = IndexBatch::default();
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "directory does not exist");
            return batch;
        }

        let classifier = self.classifier.clone();
        let walker = WalkBuilder::new(dir)
            .hidden(false)
            .git_ignore(self.settings.respect_gitignore)
            .git_exclude(self.settings.respect_gitignore)
            .git_global(self.settings.respect_gitignore)
            .filter_entry(move |entry| classifier.should_index(entry.path()))
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to access path during walk");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            if !self.settings.allows_extension(path) {
                continue;
            }

            match self.index_file(path) {
                Ok(documents) => batch.documents.extend(documents),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping file");
                    batch.failed.push((path.to_path_buf(), e));
                }
            }
        }
        batch
    }

    /// Index every watched root and concatenate the results
    pub fn index_all_watched(&self, roots: &[PathBuf]) -> Vec<Document> {
        self.scan_all_watched(roots).documents
    }

    pub fn scan_all_watched(&self, roots: &[PathBuf]) -> IndexBatch {
        let batch = self.collect_all_watched(roots);
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "failed to persist fingerprints");
        }
        batch
    }

    /// [`FileIndexer::scan_all_watched`] without the final flush
    pub fn collect_all_watched(&self, roots: &[PathBuf]) -> IndexBatch {
        let mut batch = IndexBatch::default();
        for root in roots {
            tracing::info!(dir = %root.display(), "indexing directory");
            batch.extend(self.collect_directory(root));
        }
        tracing::info!(documents = batch.documents.len(), "indexed watched directories");
        batch
    }

    pub fn invalidate(&self, path: &Path) {
        self.detector().invalidate(path);
    }

    pub fn flush(&self) -> Result<()> {
        self.detector().flush()
    }

    /// Run `f` with exclusive access to the change detector
    pub fn with_detector<T>(&self, f: impl FnOnce(&mut ChangeDetector) -> T) -> T {
        f(&mut self.detector())
    }

    fn detector(&self) -> MutexGuard<'_, ChangeDetector> {
        self.detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for FileIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndexer")
            .field("chunk_size", &self.chunker.size())
            .field("chunk_overlap", &self.chunker.overlap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PrivacyRules;
    use crate::core::tier::PrivacyTier;
    use std::fs;
    use tempfile::TempDir;

    fn indexer(state_dir: &Path) -> FileIndexer {
        let rules = PrivacyRules {
            paths: vec![("*/work/*".to_string(), PrivacyTier::Work)],
            extensions: vec![(".md".to_string(), PrivacyTier::Public)],
        };
        let settings = IndexingSettings {
            watch_dirs: vec![],
            exclude_dirs: vec!["skipme".to_string(), "*.tmp".to_string()],
            file_types: vec![".md".to_string(), ".txt".to_string(), ".pdf".to_string()],
            debounce_secs: 2.0,
            respect_gitignore: true,
        };
        FileIndexer::new(
            PrivacyClassifier::new(&rules, &settings.exclude_dirs).unwrap(),
            Chunker::new(100, 20).unwrap(),
            settings,
            ChangeDetector::open(&state_dir.join("state.redb")).unwrap(),
        )
    }

    #[test]
    fn test_index_file_builds_documents() {
        let temp_dir = TempDir::new().unwrap();
        let notes = temp_dir.path().join("notes");
        fs::create_dir_all(&notes).unwrap();
        let file = notes.join("long.txt");
        fs::write(&file, "word ".repeat(60)).unwrap();

        let indexer = indexer(temp_dir.path());
        let docs = indexer.index_file(&file).unwrap();
        assert!(docs.len() > 1);
        for (i, doc) in docs.iter().enumerate() {
            assert_eq!(doc.metadata.chunk_index, i);
            assert_eq!(doc.metadata.chunk_count, docs.len());
            assert_eq!(doc.metadata.source_name, "long.txt");
            assert_eq!(doc.tier(), Some(PrivacyTier::Personal));
        }

        // Unchanged content produces nothing
        assert!(indexer.index_file(&file).unwrap().is_empty());
    }

    #[test]
    fn test_index_file_classifies_by_path() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("plan.md"), "roadmap").unwrap();
        fs::write(temp_dir.path().join("readme.md"), "hello").unwrap();

        let indexer = indexer(temp_dir.path());
        let docs = indexer.index_file(&work.join("plan.md")).unwrap();
        assert_eq!(docs[0].tier(), Some(PrivacyTier::Work));
        let docs = indexer.index_file(&temp_dir.path().join("readme.md")).unwrap();
        assert_eq!(docs[0].tier(), Some(PrivacyTier::Public));
    }

    #[test]
    fn test_unsupported_and_excluded_files_yield_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let pdf = temp_dir.path().join("paper.pdf");
        fs::write(&pdf, b"%PDF-1.4").unwrap();
        let skipped = temp_dir.path().join("skipme");
        fs::create_dir_all(&skipped).unwrap();
        fs::write(skipped.join("a.md"), "hidden").unwrap();

        let indexer = indexer(temp_dir.path());
        assert!(indexer.index_file(&pdf).unwrap().is_empty());
        assert!(indexer.index_file(&skipped.join("a.md")).unwrap().is_empty());
        // Neither was fingerprinted
        assert!(indexer.with_detector(|d| d.is_empty()));
    }

    #[test]
    fn test_extraction_failure_is_retried() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("binary.txt");
        fs::write(&file, [0xff, 0xfe, 0x81]).unwrap();

        let indexer = indexer(temp_dir.path());
        assert!(matches!(indexer.index_file(&file), Err(Error::Extraction { .. })));
        assert!(indexer.with_detector(|d| d.fingerprint(&file).is_none()));

        fs::write(&file, "now readable").unwrap();
        assert_eq!(indexer.index_file(&file).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("empty.md");
        fs::write(&file, "   \n").unwrap();
        let indexer = indexer(temp_dir.path());
        assert!(indexer.index_file(&file).unwrap().is_empty());
    }

    #[test]
    fn test_scan_directory_isolates_bad_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("notes");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("skipme")).unwrap();
        fs::write(root.join("a.md"), "alpha").unwrap();
        fs::write(root.join("sub").join("b.txt"), "beta").unwrap();
        fs::write(root.join("bad.txt"), [0xff, 0xfe]).unwrap();
        fs::write(root.join("skipme").join("c.md"), "gamma").unwrap();
        fs::write(root.join("d.rs"), "fn main() {}").unwrap();
        fs::write(root.join("e.tmp"), "scratch").unwrap();

        let indexer = indexer(temp_dir.path());
        let batch = indexer.scan_directory(&root);

        let mut names: Vec<&str> = batch
            .documents
            .iter()
            .map(|d| d.metadata.source_name.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.md", "b.txt"]);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, root.join("bad.txt"));

        // Fingerprints were flushed for the batch; the failed file has none
        drop(indexer);
        let reopened = ChangeDetector::open(&temp_dir.path().join("state.redb")).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.fingerprint(&root.join("bad.txt")).is_none());
    }

    #[test]
    fn test_collect_directory_defers_fingerprints() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("notes");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.md"), "alpha").unwrap();
        let state_path = temp_dir.path().join("state.redb");

        let first = indexer(temp_dir.path());
        let batch = first.collect_all_watched(&[root.clone()]);
        assert_eq!(batch.documents.len(), 1);
        assert!(first.with_detector(|d| d.has_pending_changes()));

        // Nothing reached disk before the flush
        drop(first);
        let reopened = ChangeDetector::open(&state_path).unwrap();
        assert!(reopened.is_empty());
        drop(reopened);

        let second = indexer(temp_dir.path());
        assert_eq!(second.collect_directory(&root).documents.len(), 1);
        second.flush().unwrap();
        drop(second);
        assert_eq!(ChangeDetector::open(&state_path).unwrap().len(), 1);
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("vanished.md");

        let indexer = indexer(temp_dir.path());
        assert!(matches!(indexer.index_file(&missing), Err(Error::Extraction { .. })));
        assert!(indexer.with_detector(|d| d.is_empty()));
    }

    #[test]
    fn test_index_all_watched_skips_missing_roots() {
        let temp_dir = TempDir::new().unwrap();
        let one = temp_dir.path().join("one");
        let two = temp_dir.path().join("two");
        fs::create_dir_all(&one).unwrap();
        fs::create_dir_all(&two).unwrap();
        fs::write(one.join("a.md"), "alpha").unwrap();
        fs::write(two.join("b.md"), "beta").unwrap();

        let indexer = indexer(temp_dir.path());
        let docs = indexer.index_all_watched(&[one, temp_dir.path().join("missing"), two]);
        assert_eq!(docs.len(), 2);
        assert!(indexer.index_all_watched(&[temp_dir.path().join("missing")]).is_empty());
    }
}
