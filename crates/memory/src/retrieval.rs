//! Strategy-dispatched retrieval over the memory store.
//!
//! One entry point, five strategies. Strategies share no mutable state
//! and differ only in how they build the result set, so dispatch is a
//! plain enum match. Every path applies the query's `min_confidence`
//! filter as the final step and bumps `last_accessed_at` best-effort on
//! returned records.

use std::sync::Arc;

use tracing::debug;

use cortex_common::{CortexError, Result};

use crate::similarity::PatternMatcher;
use crate::store::MemoryStore;
use crate::types::{MemoryRecord, PartitionKey, QueryOrder, RetrievalQuery, RetrievalStrategy};

/// Candidate pool cap for similarity scans; keeps a wildcard-heavy
/// filter from scoring the whole store.
const CANDIDATE_POOL_CAP: usize = 512;

/// Dispatches retrieval queries and merges/ranks results.
///
/// Read-only over the store apart from best-effort access-time bumps.
pub struct RetrievalCoordinator {
    store: Arc<MemoryStore>,
    matcher: PatternMatcher,
}

impl RetrievalCoordinator {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            matcher: PatternMatcher,
        }
    }

    /// Run a retrieval query.
    ///
    /// Returns at most `max_results` records, all at or above
    /// `min_confidence`. Storage errors surface unmodified; retries are
    /// the caller's call.
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<MemoryRecord>> {
        debug!(
            strategy = ?query.strategy,
            max_results = query.max_results,
            min_confidence = query.min_confidence,
            "Dispatching retrieval"
        );

        let results = match query.strategy {
            RetrievalStrategy::Partition => self.by_partition(query),
            RetrievalStrategy::Content => self.by_content(query)?,
            RetrievalStrategy::Similarity => self.by_similarity(query, &query.filter)?,
            RetrievalStrategy::Pattern => self.by_pattern(query)?,
            RetrievalStrategy::Contextual => self.contextual(query)?,
        };

        let mut results: Vec<MemoryRecord> = results
            .into_iter()
            .filter(|r| r.confidence >= query.min_confidence)
            .collect();
        results.truncate(query.max_results);

        for record in &results {
            self.store.touch(&record.id);
        }

        debug!(count = results.len(), "Retrieval complete");
        Ok(results)
    }

    fn by_partition(&self, query: &RetrievalQuery) -> Vec<MemoryRecord> {
        self.store.query_by_partition(
            &query.filter,
            Some(query.max_results),
            QueryOrder::LastAccessedDesc,
        )
    }

    fn by_content(&self, query: &RetrievalQuery) -> Result<Vec<MemoryRecord>> {
        let needle = query_content(query)?.to_lowercase();
        let keywords: Vec<&str> = needle.split_whitespace().collect();

        let pool = self.store.query_by_partition(
            &query.filter,
            Some(CANDIDATE_POOL_CAP),
            QueryOrder::LastAccessedDesc,
        );

        Ok(pool
            .into_iter()
            .filter(|record| {
                let content = record.content.to_lowercase();
                keywords.iter().any(|kw| content.contains(kw))
            })
            .collect())
    }

    fn by_similarity(
        &self,
        query: &RetrievalQuery,
        filter: &PartitionKey,
    ) -> Result<Vec<MemoryRecord>> {
        let candidate = query_content(query)?;

        // Partition filter as a pre-filter keeps the scored pool small.
        let pool = self.store.query_by_partition(
            filter,
            Some(CANDIDATE_POOL_CAP),
            QueryOrder::LastAccessedDesc,
        );

        let scored = self
            .matcher
            .find_similar(candidate, pool, query.min_similarity);

        Ok(scored.into_iter().map(|s| s.record).collect())
    }

    fn by_pattern(&self, query: &RetrievalQuery) -> Result<Vec<MemoryRecord>> {
        let mut filter = query.filter.clone();
        match (&query.pattern_type, filter.pattern_type.is_any()) {
            (Some(pattern_type), _) => {
                filter = filter.with_pattern_type(pattern_type.clone());
            }
            (None, false) => {} // category already pinned by the filter
            (None, true) => {
                return Err(CortexError::Config(
                    "pattern strategy requires a pattern_type".into(),
                ));
            }
        }
        self.by_similarity(query, &filter)
    }

    /// Exact-partition lookup first; when that comes up short, a
    /// similarity fallback over the widened partition fills the rest.
    /// De-duplicated by id, partition-matched copy wins on conflict.
    fn contextual(&self, query: &RetrievalQuery) -> Result<Vec<MemoryRecord>> {
        let mut results = self.by_partition(query);

        if results.len() < query.max_results {
            debug!(
                partition_hits = results.len(),
                "Contextual fallback to widened similarity"
            );

            let widened = query.filter.widened();
            let fallback = self.by_similarity(query, &widened)?;

            for record in fallback {
                if !results.iter().any(|r| r.id == record.id) {
                    results.push(record);
                }
            }
        }

        Ok(results)
    }
}

fn query_content(query: &RetrievalQuery) -> Result<&str> {
    query
        .content
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            CortexError::Config(format!(
                "{:?} strategy requires query content",
                query.strategy
            ))
        })
}
