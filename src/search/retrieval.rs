use crate::core::config::{MissingTierPolicy, PrivacySettings};
use crate::core::tier::{PrivacyTier, TierSet};
use crate::storage::partitions::{PartitionedStore, SearchResult};
use std::sync::Arc;

/// Separator placed between results in a context block
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Privacy-scoped search over the partitioned store.
pub struct RetrievalEngine {
    store: Arc<PartitionedStore>,
    work_terms: Vec<String>,
    missing_tier_policy: MissingTierPolicy,
    max_results: usize,
}

impl RetrievalEngine {
    pub fn new(store: Arc<PartitionedStore>, privacy: &PrivacySettings, max_results: usize) -> Self {
        Self {
            store,
            work_terms: privacy
                .work_terms
                .iter()
                .map(|term| term.trim().to_lowercase())
                .filter(|term| !term.is_empty())
                .collect(),
            missing_tier_policy: privacy.missing_tier_policy,
            max_results,
        }
    }

    /// Tiers a query may read given its context hint.
    ///
    /// Public and personal always; work when the hint mentions a work term;
    /// private never.
    pub fn resolve_accessible_tiers(&self, context_hint: &str) -> TierSet {
        let mut tiers = TierSet::from_iter([PrivacyTier::Public, PrivacyTier::Personal]);
        let hint = context_hint.to_lowercase();
        if self.work_terms.iter().any(|term| hint.contains(term.as_str())) {
            tiers.insert(PrivacyTier::Work);
        }
        tiers
    }

    pub fn search(&self, query: &str, context_hint: &str) -> Vec<SearchResult> {
        self.search_in(query, self.resolve_accessible_tiers(context_hint))
    }

    /// Search an explicit tier set. Explicit sets are the only way to read `private`.
    ///
    /// Never fails: a store error is logged and yields no results.
    pub fn search_in(&self, query: &str, tiers: TierSet) -> Vec<SearchResult> {
        self.search_limited(query, tiers, self.max_results)
    }

    /// [`RetrievalEngine::search_in`] with a caller-chosen result limit
    pub fn search_limited(&self, query: &str, tiers: TierSet, limit: usize) -> Vec<SearchResult> {
        let results = match self.store.search(query, tiers, limit) {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, "search failed");
                return Vec::new();
            }
        };

        results
            .into_iter()
            .filter(|result| self.is_visible(result, tiers))
            .collect()
    }

    /// Second pass over store results, keyed on the tier recorded in each document
    fn is_visible(&self, result: &SearchResult, tiers: TierSet) -> bool {
        match result.document.tier() {
            Some(tier) => tiers.contains(tier),
            None => {
                tracing::debug!(id = result.id.as_str(), "result has no tier metadata");
                self.missing_tier_policy == MissingTierPolicy::Include
            }
        }
    }

    /// Formatted context for the top results, or an empty string when nothing matched
    pub fn get_context(&self, query: &str, context_hint: &str) -> String {
        format_context(&self.search(query, context_hint))
    }
}

pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|result| {
            format!(
                "from {}:\n{}",
                result.document.metadata.source_name, result.document.content
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}
