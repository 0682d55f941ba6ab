use crate::core::config::Config;
use crate::core::document::Document;
use crate::core::error::{Error, Result};
use crate::core::tier::{TierMap, TierSet};
use crate::indexing::indexer::FileIndexer;
use crate::indexing::watch::{ChangeWatcher, ReindexSink, WatchHandle};
use crate::search::embedder::{embedder_for_model, Embedder};
use crate::search::retrieval::RetrievalEngine;
use crate::storage::partitions::{PartitionedStore, SearchResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Side-effect hooks for indexing progress (desktop notifications and the like)
pub trait IndexObserver: Send + Sync {
    fn on_index_started(&self) {}
    fn on_index_finished(&self, _summary: &str) {}
    fn on_file_error(&self, _path: &Path, _error: &Error) {}
}

/// Observer that ignores every signal
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl IndexObserver for NoopObserver {}

/// Entry point tying indexing, storage and retrieval together.
///
/// Every write path (full passes, watcher updates, maintenance) holds one
/// write lock, so the delete and add for a file never interleave with
/// another writer. Searches do not take the lock.
pub struct ContextService {
    config: Config,
    indexer: FileIndexer,
    store: Arc<PartitionedStore>,
    retrieval: RetrievalEngine,
    observer: Arc<dyn IndexObserver>,
    write_lock: Mutex<()>,
}

impl ContextService {
    /// Open with the embedder named in the settings
    pub fn open(config: Config) -> Result<Self> {
        let embedder = embedder_for_model(&config.settings.rag.embedding_model)?;
        Self::open_with_embedder(config, embedder)
    }

    pub fn open_with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.settings.validate()?;

        let indexer = FileIndexer::from_config(&config)?;
        let store = Arc::new(PartitionedStore::open(&config.partitions_path(), embedder.clone())?);

        let model_id = embedder.model_id().to_string();
        let previous = indexer.with_detector(|d| d.model_id())?;
        match previous {
            Some(previous) if previous != model_id => {
                tracing::warn!(
                    previous = previous.as_str(),
                    current = model_id.as_str(),
                    "embedding model changed, rebuilding index"
                );
                store.reset()?;
                indexer.with_detector(|d| d.clear())?;
                indexer.with_detector(|d| d.set_model_id(&model_id))?;
            }
            Some(_) => {}
            None => indexer.with_detector(|d| d.set_model_id(&model_id))?,
        }

        let retrieval = RetrievalEngine::new(
            store.clone(),
            &config.settings.privacy,
            config.settings.rag.max_results,
        );

        Ok(Self {
            config,
            indexer,
            store,
            retrieval,
            observer: Arc::new(NoopObserver),
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn IndexObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub fn store(&self) -> &PartitionedStore {
        &self.store
    }

    /// Index every watched directory and store what changed.
    ///
    /// With `force`, fingerprints are dropped first so every file is re-read;
    /// replacement keeps that from duplicating documents.
    pub fn index_files(&self, force: bool) -> String {
        let _guard = self.write_guard();
        self.observer.on_index_started();

        if force {
            if let Err(e) = self.indexer.with_detector(|d| d.clear()) {
                tracing::error!(error = %e, "failed to clear fingerprints");
            }
        }

        // Fingerprints stay in memory until the documents are stored
        let batch = self.indexer.collect_all_watched(&self.config.watch_roots());
        let mut failed = batch.failed.len();
        for (path, error) in &batch.failed {
            self.observer.on_file_error(path, error);
        }

        let mut added = 0;
        let mut files = 0;
        for (source, documents) in group_by_source(batch.documents) {
            match self.store.replace_source(&source, documents) {
                Ok(replaced) => {
                    added += replaced.added;
                    files += 1;
                }
                Err(e) => {
                    let path = PathBuf::from(&source);
                    tracing::warn!(path = source.as_str(), error = %e, "failed to store documents");
                    self.indexer.invalidate(&path);
                    self.observer.on_file_error(&path, &e);
                    failed += 1;
                }
            }
        }
        self.flush_fingerprints();

        let mut summary = if added > 0 {
            format!(
                "indexed {} new documents from {} files. total: {} documents across privacy tiers.",
                added,
                files,
                self.store.stats().total()
            )
        } else {
            "no new documents to index.".to_string()
        };
        if failed > 0 {
            summary.push_str(&format!(" ({} files failed)", failed));
        }

        tracing::info!(summary = summary.as_str(), "indexing finished");
        self.observer.on_index_finished(&summary);
        summary
    }

    pub fn get_stats(&self) -> TierMap<u64> {
        self.store.stats()
    }

    pub fn format_stats(&self) -> String {
        let stats = self.get_stats();
        let mut out = format!("total documents: {}", stats.total());
        for (tier, count) in stats.iter() {
            out.push_str(&format!("\n  {}: {} documents", tier, count));
        }
        out
    }

    /// Context block for `query`, scoped by the tiers `context` unlocks
    pub fn get_context_for_query(&self, query: &str, context: &str) -> String {
        self.retrieval.get_context(query, context)
    }

    /// Search with the hint-derived tiers, or an explicit tier set when given
    pub fn search(
        &self,
        query: &str,
        context: &str,
        tiers: Option<TierSet>,
        limit: Option<usize>,
    ) -> Vec<SearchResult> {
        let tiers = tiers.unwrap_or_else(|| self.retrieval.resolve_accessible_tiers(context));
        let limit = limit.unwrap_or(self.config.settings.rag.max_results);
        self.retrieval.search_limited(query, tiers, limit)
    }

    /// Re-index one file after a change. Returns the number of documents written.
    pub fn reindex_path(&self, path: &Path) -> Result<usize> {
        if !path.is_file() || !self.indexer.settings().allows_extension(path) {
            return Ok(0);
        }

        let _guard = self.write_guard();
        let documents = match self.indexer.index_file(path) {
            Ok(documents) => documents,
            Err(e) => {
                self.observer.on_file_error(path, &e);
                self.flush_fingerprints();
                return Err(e);
            }
        };
        if documents.is_empty() {
            self.flush_fingerprints();
            return Ok(0);
        }

        let source = path.to_string_lossy();
        match self.store.replace_source(&source, documents) {
            Ok(replaced) => {
                self.flush_fingerprints();
                Ok(replaced.added)
            }
            Err(e) => {
                self.indexer.invalidate(path);
                self.flush_fingerprints();
                self.observer.on_file_error(path, &e);
                Err(e)
            }
        }
    }

    /// Drop a deleted file's documents and fingerprint
    pub fn remove_path(&self, path: &Path) -> Result<usize> {
        let _guard = self.write_guard();
        let removed = self.store.delete_by_source(&path.to_string_lossy())?;
        self.indexer.invalidate(path);
        self.indexer.flush()?;
        Ok(removed)
    }

    /// Remove every indexed file that the exclusion rules now reject.
    /// Returns the paths that were purged.
    pub fn purge_excluded(&self) -> Result<Vec<String>> {
        let _guard = self.write_guard();
        let excluded: Vec<String> = self
            .indexer
            .with_detector(|d| d.tracked_paths())
            .into_iter()
            .filter(|path| !self.indexer.classifier().should_index(Path::new(path)))
            .collect();

        for path in &excluded {
            let removed = self.store.delete_by_source(path)?;
            self.indexer.invalidate(Path::new(path));
            tracing::info!(path = path.as_str(), removed, "purged excluded file");
        }
        self.indexer.flush()?;
        Ok(excluded)
    }

    /// Paths with a recorded fingerprint, sorted
    pub fn indexed_files(&self) -> Vec<String> {
        self.indexer.with_detector(|d| d.tracked_paths())
    }

    /// Destroy all partitions and forget all fingerprints
    pub fn reset(&self) -> Result<()> {
        let _guard = self.write_guard();
        self.store.reset()?;
        self.indexer.with_detector(|d| d.clear())?;
        tracing::info!("index reset");
        Ok(())
    }

    /// Start watching the configured roots on a background thread
    pub fn watch(self: &Arc<Self>) -> Result<WatchHandle> {
        let window = debounce_window(self.config.settings.indexing.debounce_secs)?;
        ChangeWatcher::new(self.config.watch_roots(), window, self.clone()).spawn()
    }

    fn flush_fingerprints(&self) {
        if let Err(e) = self.indexer.flush() {
            tracing::error!(error = %e, "failed to persist fingerprints");
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ReindexSink for ContextService {
    fn reindex(&self, path: &Path) -> Result<usize> {
        self.reindex_path(path)
    }

    fn remove(&self, path: &Path) -> Result<usize> {
        self.remove_path(path)
    }
}

fn debounce_window(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("invalid indexing.debounce_secs {}: {}", secs, e)))
}

/// Group documents by source file, keeping chunk order within each file
fn group_by_source(documents: Vec<Document>) -> BTreeMap<String, Vec<Document>> {
    let mut grouped: BTreeMap<String, Vec<Document>> = BTreeMap::new();
    for doc in documents {
        grouped
            .entry(doc.metadata.source_path.clone())
            .or_default()
            .push(doc);
    }
    grouped
}
