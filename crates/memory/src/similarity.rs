//! Pattern matching over record content.
//!
//! Similarity is token-frequency cosine: symmetric, deterministic, and
//! cheap enough to run over a partition-filtered candidate pool without
//! an embedding backend.

use std::collections::HashMap;

use crate::types::MemoryRecord;

/// A record paired with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f64,
}

/// Scores and ranks records against a candidate's content.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternMatcher;

impl PatternMatcher {
    /// Cosine similarity over token frequencies, in [0, 1].
    ///
    /// Symmetric: `score(a, b) == score(b, a)`. Two texts with no
    /// tokens in common score 0; identical token distributions score 1.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let counts_a = token_counts(a);
        let counts_b = token_counts(b);

        if counts_a.is_empty() || counts_b.is_empty() {
            return 0.0;
        }

        let mut dot = 0.0;
        for (token, count_a) in &counts_a {
            if let Some(count_b) = counts_b.get(token) {
                dot += count_a * count_b;
            }
        }

        let norm_a: f64 = counts_a.values().map(|c| c * c).sum::<f64>().sqrt();
        let norm_b: f64 = counts_b.values().map(|c| c * c).sum::<f64>().sqrt();

        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }

    /// Rank `pool` by similarity to `candidate`, excluding anything
    /// below `threshold`.
    ///
    /// Results are sorted by score descending; ties go to the more
    /// recently accessed record.
    pub fn find_similar(
        &self,
        candidate: &str,
        pool: Vec<MemoryRecord>,
        threshold: f64,
    ) -> Vec<ScoredRecord> {
        let mut scored: Vec<ScoredRecord> = pool
            .into_iter()
            .filter_map(|record| {
                let score = self.score(candidate, &record.content);
                (score >= threshold).then_some(ScoredRecord { record, score })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.record.last_accessed_at.cmp(&a.record.last_accessed_at))
        });

        scored
    }
}

fn token_counts(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
    {
        *counts.entry(token.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}
