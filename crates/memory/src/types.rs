//! Record, partition key, and query types for the memory system.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::confidence::ScorerConfig;
use crate::partition::PartitionConfig;

/// One dimension of a partition key.
///
/// `Any` acts as a wildcard on the filter side: it matches every value.
/// Serializes as `null` for `Any` and the plain string otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Dim {
    #[default]
    Any,
    Value(String),
}

impl Dim {
    pub fn value(v: impl Into<String>) -> Self {
        Dim::Value(v.into())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Dim::Any)
    }

    /// Whether this dimension, used as a filter, matches a concrete
    /// dimension on a stored record.
    pub fn matches(&self, other: &Dim) -> bool {
        match self {
            Dim::Any => true,
            Dim::Value(v) => matches!(other, Dim::Value(o) if o == v),
        }
    }
}

impl From<Option<String>> for Dim {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => Dim::Value(s),
            None => Dim::Any,
        }
    }
}

impl From<Dim> for Option<String> {
    fn from(d: Dim) -> Self {
        match d {
            Dim::Any => None,
            Dim::Value(s) => Some(s),
        }
    }
}

/// Multi-dimensional index key for memory records.
///
/// Used both as a storage index (all dimensions concrete) and as a query
/// filter (any dimension may be `Any`). Immutable once assigned to a
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub project: Dim,
    pub language: Dim,
    pub pattern_type: Dim,
    pub agent_id: Dim,
    pub time_bucket: Dim,
    pub complexity_band: Dim,
    pub domain: Dim,
}

impl PartitionKey {
    /// A filter that matches every record.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, v: impl Into<String>) -> Self {
        self.project = Dim::value(v);
        self
    }

    pub fn with_language(mut self, v: impl Into<String>) -> Self {
        self.language = Dim::value(v);
        self
    }

    pub fn with_pattern_type(mut self, v: impl Into<String>) -> Self {
        self.pattern_type = Dim::value(v);
        self
    }

    pub fn with_agent_id(mut self, v: impl Into<String>) -> Self {
        self.agent_id = Dim::value(v);
        self
    }

    pub fn with_time_bucket(mut self, v: impl Into<String>) -> Self {
        self.time_bucket = Dim::value(v);
        self
    }

    pub fn with_complexity_band(mut self, v: impl Into<String>) -> Self {
        self.complexity_band = Dim::value(v);
        self
    }

    pub fn with_domain(mut self, v: impl Into<String>) -> Self {
        self.domain = Dim::value(v);
        self
    }

    /// Whether this key, used as a filter, matches a stored record's key.
    pub fn matches(&self, key: &PartitionKey) -> bool {
        self.project.matches(&key.project)
            && self.language.matches(&key.language)
            && self.pattern_type.matches(&key.pattern_type)
            && self.agent_id.matches(&key.agent_id)
            && self.time_bucket.matches(&key.time_bucket)
            && self.complexity_band.matches(&key.complexity_band)
            && self.domain.matches(&key.domain)
    }

    /// Relax the time and complexity dimensions to wildcards.
    ///
    /// Used by the contextual retrieval fallback to widen the candidate
    /// pool when the exact partition is too sparse.
    pub fn widened(&self) -> PartitionKey {
        let mut widened = self.clone();
        widened.time_bucket = Dim::Any;
        widened.complexity_band = Dim::Any;
        widened
    }
}

/// One accuracy observation: what the record predicted vs. what actually
/// happened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyObservation {
    pub predicted: bool,
    pub actual: bool,
    /// Observation timestamp (Unix millis)
    pub timestamp: u64,
}

impl AccuracyObservation {
    pub fn new(predicted: bool, actual: bool, timestamp: u64) -> Self {
        Self {
            predicted,
            actual,
            timestamp,
        }
    }

    pub fn accurate(&self) -> bool {
        self.predicted == self.actual
    }
}

/// A stored analysis memory: a previously observed pattern or finding
/// plus its accuracy track record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique id, assigned by the store on `put` if empty
    #[serde(default)]
    pub id: String,

    /// Serialized pattern/finding payload
    pub content: String,

    /// Index key, immutable once assigned
    pub partition_key: PartitionKey,

    /// Creation timestamp (Unix millis), assigned by the store if zero
    #[serde(default)]
    pub created_at: u64,

    /// Last access timestamp, updated best-effort on retrieval
    #[serde(default)]
    pub last_accessed_at: u64,

    /// Ordered accuracy observations
    #[serde(default)]
    pub accuracy_history: Vec<AccuracyObservation>,

    /// Calibrated confidence in [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl MemoryRecord {
    /// A record ready for `put`: id and timestamps are assigned by the
    /// store.
    pub fn new(content: impl Into<String>, partition_key: PartitionKey) -> Self {
        Self {
            id: String::new(),
            content: content.into(),
            partition_key,
            created_at: 0,
            last_accessed_at: 0,
            accuracy_history: Vec::new(),
            confidence: default_confidence(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Which retrieval path to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Exact partition lookup with similarity fallback over a widened
    /// partition
    Contextual,
    /// Similarity ranking over a partition-filtered candidate pool
    Similarity,
    /// Similarity restricted to one pattern category
    Pattern,
    /// Keyword filter over record content
    Content,
    /// Direct partition lookup
    Partition,
}

/// A per-call retrieval request. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub strategy: RetrievalStrategy,

    /// Partition filter; wildcard dimensions match all values
    #[serde(default)]
    pub filter: PartitionKey,

    /// Query content for similarity/content strategies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Pattern category for the `pattern` strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Records below this confidence are dropped regardless of strategy
    #[serde(default)]
    pub min_confidence: f64,

    /// Similarity threshold for strategies that rank by similarity
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

fn default_max_results() -> usize {
    10
}

fn default_min_similarity() -> f64 {
    0.3
}

impl RetrievalQuery {
    pub fn new(strategy: RetrievalStrategy) -> Self {
        Self {
            strategy,
            filter: PartitionKey::any(),
            content: None,
            pattern_type: None,
            max_results: default_max_results(),
            min_confidence: 0.0,
            min_similarity: default_min_similarity(),
        }
    }

    pub fn with_filter(mut self, filter: PartitionKey) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_pattern_type(mut self, pattern_type: impl Into<String>) -> Self {
        self.pattern_type = Some(pattern_type.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }
}

/// Sort order for partition queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    #[default]
    LastAccessedDesc,
    CreatedDesc,
    ConfidenceDesc,
}

/// Configuration for the memory system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Partition key discretization
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Confidence calibration parameters
    #[serde(default)]
    pub scorer: ScorerConfig,

    /// Default result cap for queries that don't specify one
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Record retention window for the TTL sweep; zero disables sweeping
    #[serde(default)]
    pub retention_ms: u64,

    /// Snapshot file for persistence across restarts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            partition: PartitionConfig::default(),
            scorer: ScorerConfig::default(),
            max_results: default_max_results(),
            retention_ms: 0,
            snapshot_path: None,
        }
    }
}
