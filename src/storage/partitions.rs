use crate::core::document::Document;
use crate::core::error::{Error, Result};
use crate::core::tier::{PrivacyTier, TierMap, TierSet};
use crate::search::embedder::Embedder;
use redb::{
    Database, MultimapTableDefinition, ReadTransaction, ReadableMultimapTable, ReadableTable,
    TableDefinition, TableError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Store-wide counters
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("partition_meta");
const NEXT_SEQ_KEY: &str = "next_seq";

/// Partition table for a tier
/// Key: generated document id, value: JSON serialized StoredDocument
fn documents_table(tier: PrivacyTier) -> TableDefinition<'static, &'static str, &'static str> {
    TableDefinition::new(match tier {
        PrivacyTier::Public => "documents_public",
        PrivacyTier::Personal => "documents_personal",
        PrivacyTier::Private => "documents_private",
        PrivacyTier::Work => "documents_work",
    })
}

/// Source path → document ids, per tier
fn sources_table(tier: PrivacyTier) -> MultimapTableDefinition<'static, &'static str, &'static str> {
    MultimapTableDefinition::new(match tier {
        PrivacyTier::Public => "sources_public",
        PrivacyTier::Personal => "sources_personal",
        PrivacyTier::Private => "sources_private",
        PrivacyTier::Work => "sources_work",
    })
}

/// A document as persisted in its partition
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    /// Insertion order across all partitions, used to break distance ties
    seq: u64,
    #[serde(flatten)]
    document: Document,
    embedding: Vec<f32>,
}

/// A ranked hit from a partition
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    /// Partition the hit was read from
    pub tier: PrivacyTier,
    /// Cosine distance to the query; smaller is more relevant
    pub distance: f32,
    pub document: Document,
}

/// Counts reported by a delete-then-add replacement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Replacement {
    pub removed: usize,
    pub added: usize,
}

/// Documents grouped by tier with their embeddings, ready to write
struct EmbeddedGroup {
    tier: PrivacyTier,
    documents: Vec<Document>,
    embeddings: Vec<Vec<f32>>,
}

/// Similarity store with one partition per privacy tier.
///
/// Partitions are redb tables created on first write and named after their
/// tier. Every mutation runs in a single write transaction, so writers are
/// mutually exclusive while searches read from snapshots.
pub struct PartitionedStore {
    db: Database,
    embedder: Arc<dyn Embedder>,
}

impl PartitionedStore {
    /// Open or create the partitioned store
    pub fn open(db_path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(db_path).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("lock") {
                Error::Database("Partition database is locked. Another tierdex process may be running. Close other instances and try again.".to_string())
            } else {
                Error::Database(format!("Failed to open partition database: {}", e))
            }
        })?;

        let write_txn = db.begin_write().map_err(db_err("begin write transaction"))?;
        {
            write_txn.open_table(META_TABLE).map_err(db_err("open table"))?;
        }
        write_txn.commit().map_err(db_err("commit transaction"))?;

        Ok(Self { db, embedder })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Add documents to the partitions matching their tiers.
    ///
    /// Embeddings are computed in one batch per tier before the write begins.
    pub fn add(&self, documents: Vec<Document>) -> Result<usize> {
        let groups = self.embed_groups(documents)?;
        if groups.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write().map_err(write_err("begin write transaction"))?;
        let added = insert_groups(&write_txn, groups)?;
        write_txn.commit().map_err(write_err("commit transaction"))?;
        Ok(added)
    }

    /// Remove every document of `source_path` from all partitions
    pub fn delete_by_source(&self, source_path: &str) -> Result<usize> {
        let write_txn = self.db.begin_write().map_err(write_err("begin write transaction"))?;
        let mut removed = 0;
        for tier in PrivacyTier::ALL {
            removed += remove_source(&write_txn, tier, source_path)?;
        }
        write_txn.commit().map_err(write_err("commit transaction"))?;

        if removed > 0 {
            tracing::info!(source = source_path, removed, "deleted documents");
        }
        Ok(removed)
    }

    /// Delete the documents of `source_path` and add `documents` as one unit.
    ///
    /// No other writer can interleave between the delete and the add, so a
    /// changed file never has stale and fresh chunks side by side.
    pub fn replace_source(&self, source_path: &str, documents: Vec<Document>) -> Result<Replacement> {
        let groups = self.embed_groups(documents)?;

        let write_txn = self.db.begin_write().map_err(write_err("begin write transaction"))?;
        let mut removed = 0;
        for tier in PrivacyTier::ALL {
            removed += remove_source(&write_txn, tier, source_path)?;
        }
        let added = insert_groups(&write_txn, groups)?;
        write_txn.commit().map_err(write_err("commit transaction"))?;

        tracing::debug!(source = source_path, removed, added, "replaced documents");
        Ok(Replacement { removed, added })
    }

    /// Nearest-neighbour search over the given tiers.
    ///
    /// Each tier contributes up to `limit` candidates; the merged list is
    /// ordered by ascending distance (then insertion order) and truncated to
    /// `limit`. A tier that fails to query is skipped.
    pub fn search(&self, query: &str, tiers: TierSet, limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 || tiers.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("embedder returned no vector for query".to_string()))?;

        let read_txn = self.db.begin_read().map_err(db_err("begin read transaction"))?;

        let mut candidates = Vec::new();
        for tier in tiers.iter() {
            match search_partition(&read_txn, tier, &query_embedding, limit) {
                Ok(Some(found)) => candidates.extend(found),
                Ok(None) => tracing::debug!(%tier, "no partition yet"),
                Err(e) => tracing::warn!(%tier, error = %e, "skipping tier in search"),
            }
        }

        candidates.sort();
        candidates.truncate(limit);
        Ok(candidates.into_iter().map(Candidate::into_result).collect())
    }

    /// Document count per tier. A partition that cannot be read counts as empty.
    pub fn stats(&self) -> TierMap<u64> {
        let mut counts = TierMap::default();
        let read_txn = match self.db.begin_read() {
            Ok(txn) => txn,
            Err(e) => {
                tracing::error!(error = %e, "failed to read partition stats");
                return counts;
            }
        };

        for tier in PrivacyTier::ALL {
            counts[tier] = match read_txn.open_table(documents_table(tier)) {
                Ok(table) => table.len().unwrap_or_else(|e| {
                    tracing::error!(%tier, error = %e, "failed to count partition");
                    0
                }),
                Err(TableError::TableDoesNotExist(_)) => 0,
                Err(e) => {
                    tracing::error!(%tier, error = %e, "failed to open partition");
                    0
                }
            };
        }
        counts
    }

    /// Drop and recreate every partition. Destructive.
    pub fn reset(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(write_err("begin write transaction"))?;
        for tier in PrivacyTier::ALL {
            write_txn
                .delete_table(documents_table(tier))
                .map_err(write_err("delete partition"))?;
            write_txn
                .delete_multimap_table(sources_table(tier))
                .map_err(write_err("delete source index"))?;
            write_txn
                .open_table(documents_table(tier))
                .map_err(write_err("create partition"))?;
            write_txn
                .open_multimap_table(sources_table(tier))
                .map_err(write_err("create source index"))?;
        }
        write_txn.commit().map_err(write_err("commit transaction"))?;
        tracing::info!("reset all partitions");
        Ok(())
    }

    fn embed_groups(&self, documents: Vec<Document>) -> Result<Vec<EmbeddedGroup>> {
        let mut by_tier: TierMap<Vec<Document>> = TierMap::default();
        for doc in documents {
            match doc.tier() {
                Some(tier) => by_tier[tier].push(doc),
                None => tracing::warn!(
                    source = doc.metadata.source_path.as_str(),
                    "refusing to store document without a privacy tier"
                ),
            }
        }

        let mut groups = Vec::new();
        for tier in PrivacyTier::ALL {
            let documents = std::mem::take(&mut by_tier[tier]);
            if documents.is_empty() {
                continue;
            }
            let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
            let embeddings = self.embedder.embed(&texts).map_err(|e| {
                Error::StoreWrite(format!("embedding failed for {} partition: {}", tier, e))
            })?;
            if embeddings.len() != documents.len() {
                return Err(Error::StoreWrite(format!(
                    "embedder returned {} vectors for {} documents",
                    embeddings.len(),
                    documents.len()
                )));
            }
            groups.push(EmbeddedGroup {
                tier,
                documents,
                embeddings,
            });
        }
        Ok(groups)
    }
}

fn insert_groups(write_txn: &WriteTransaction, groups: Vec<EmbeddedGroup>) -> Result<usize> {
    let mut seq = {
        let meta = write_txn.open_table(META_TABLE).map_err(write_err("open table"))?;
        let next = meta.get(NEXT_SEQ_KEY).map_err(write_err("read sequence"))?;
        next.map(|guard| guard.value()).unwrap_or(0)
    };

    let mut added = 0;
    for group in groups {
        let tier = group.tier;
        let mut docs = write_txn
            .open_table(documents_table(tier))
            .map_err(write_err("open partition"))?;
        let mut sources = write_txn
            .open_multimap_table(sources_table(tier))
            .map_err(write_err("open source index"))?;

        let count = group.documents.len();
        for (document, embedding) in group.documents.into_iter().zip(group.embeddings) {
            let id = Uuid::new_v4().to_string();
            let stored = StoredDocument {
                seq,
                document,
                embedding,
            };
            seq += 1;

            let json = serde_json::to_string(&stored)
                .map_err(|e| Error::StoreWrite(format!("Failed to serialize document: {}", e)))?;
            docs.insert(id.as_str(), json.as_str())
                .map_err(write_err("insert document"))?;
            sources
                .insert(stored.document.metadata.source_path.as_str(), id.as_str())
                .map_err(write_err("index document source"))?;
        }
        tracing::info!(%tier, count, "added documents to partition");
        added += count;
    }

    let mut meta = write_txn.open_table(META_TABLE).map_err(write_err("open table"))?;
    meta.insert(NEXT_SEQ_KEY, seq).map_err(write_err("store sequence"))?;
    Ok(added)
}

fn remove_source(write_txn: &WriteTransaction, tier: PrivacyTier, source_path: &str) -> Result<usize> {
    let mut sources = write_txn
        .open_multimap_table(sources_table(tier))
        .map_err(write_err("open source index"))?;

    let ids = sources
        .get(source_path)
        .map_err(write_err("read source index"))?
        .map(|item| item.map(|guard| guard.value().to_string()))
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(write_err("read source index"))?;
    if ids.is_empty() {
        return Ok(0);
    }

    sources
        .remove_all(source_path)
        .map_err(write_err("clear source index"))?;

    let mut docs = write_txn
        .open_table(documents_table(tier))
        .map_err(write_err("open partition"))?;
    for id in &ids {
        docs.remove(id.as_str()).map_err(write_err("remove document"))?;
    }
    Ok(ids.len())
}

/// `Ok(None)` when the tier has no partition yet
fn search_partition(
    read_txn: &ReadTransaction,
    tier: PrivacyTier,
    query_embedding: &[f32],
    limit: usize,
) -> Result<Option<Vec<Candidate>>> {
    let table = match read_txn.open_table(documents_table(tier)) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(query_err(tier, e)),
    };

    // Max-heap on (distance, seq): the worst candidate sits on top
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();

    for item in table.iter().map_err(|e| query_err(tier, e))? {
        let (key, value) = item.map_err(|e| query_err(tier, e))?;
        let stored: StoredDocument = match serde_json::from_str(value.value()) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(%tier, id = key.value(), error = %e, "skipping unreadable document");
                continue;
            }
        };

        heap.push(Candidate {
            distance: 1.0 - cosine_similarity(query_embedding, &stored.embedding),
            seq: stored.seq,
            id: key.value().to_string(),
            tier,
            document: stored.document,
        });
        if heap.len() > limit {
            heap.pop();
        }
    }

    Ok(Some(heap.into_vec()))
}

/// Search candidate ordered by ascending distance, then insertion order
struct Candidate {
    distance: f32,
    seq: u64,
    id: String,
    tier: PrivacyTier,
    document: Document,
}

impl Candidate {
    fn into_result(self) -> SearchResult {
        SearchResult {
            id: self.id,
            tier: self.tier,
            distance: self.distance,
            document: self.document,
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Calculate cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn db_err<E: std::fmt::Display>(action: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(format!("Failed to {}: {}", action, e))
}

fn write_err<E: std::fmt::Display>(action: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::StoreWrite(format!("Failed to {}: {}", action, e))
}

fn query_err(tier: PrivacyTier, e: impl std::fmt::Display) -> Error {
    Error::StoreQuery {
        tier,
        reason: e.to_string(),
    }
}
