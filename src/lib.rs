// Core functionality
pub mod core {
    pub mod config;
    pub mod document;
    pub mod error;
    pub mod tier;
}

// Privacy classification
pub mod privacy {
    pub mod classifier;
}

// Data storage
pub mod storage {
    pub mod partitions;
    pub mod state;
}

// Indexing pipeline
pub mod indexing {
    pub mod chunker;
    pub mod detector;
    pub mod extract;
    pub mod indexer;
    pub mod watch;
}

// Embedding & retrieval
pub mod search {
    pub mod embedder;
    pub mod retrieval;
}

pub mod service;

// User interfaces
pub mod ui {
    pub mod cli;
}

// Re-export commonly used types
pub use core::config::{Config, MissingTierPolicy, Settings};
pub use core::document::{Document, DocumentMetadata};
pub use core::error::{Error, Result};
pub use core::tier::{PrivacyTier, TierMap, TierSet};
pub use indexing::chunker::Chunker;
pub use indexing::detector::ChangeDetector;
pub use indexing::indexer::FileIndexer;
pub use indexing::watch::{ChangeWatcher, Debouncer, ReindexSink, WatchHandle};
pub use privacy::classifier::PrivacyClassifier;
pub use search::embedder::{embedder_for_model, Embedder, HashingEmbedder};
pub use search::retrieval::RetrievalEngine;
pub use service::{ContextService, IndexObserver, NoopObserver};
pub use storage::partitions::{PartitionedStore, SearchResult};
pub use storage::state::{calculate_file_hash, get_file_modified_time};
pub use ui::cli;
