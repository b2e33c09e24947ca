//! Partitioned analysis memory for the cortex coordination core.
//!
//! Stores previously observed code patterns and findings, indexed by a
//! multi-dimensional partition key, and retrieves them through five
//! strategies with different precision/recall trade-offs:
//!
//! ```text
//!  RetrievalQuery ──► RetrievalCoordinator
//!                        │ partition   ──► MemoryStore::query_by_partition
//!                        │ content     ──► keyword filter over partition pool
//!                        │ similarity  ──► PatternMatcher over partition pool
//!                        │ pattern     ──► similarity pinned to one category
//!                        └ contextual  ──► partition, then widened similarity
//! ```
//!
//! Confidence per record is calibrated by [`ConfidenceScorer`] from the
//! record's accuracy history; [`PartitionManager`] discretizes raw
//! observations into deterministic keys.

pub mod confidence;
pub mod partition;
pub mod retrieval;
pub mod similarity;
pub mod store;
pub mod types;

pub use confidence::{ConfidenceScorer, ScorerConfig};
pub use partition::{ComplexityBand, Observation, PartitionConfig, PartitionManager, TimeGranularity};
pub use retrieval::RetrievalCoordinator;
pub use similarity::{PatternMatcher, ScoredRecord};
pub use store::MemoryStore;
pub use types::{
    AccuracyObservation, Dim, MemoryConfig, MemoryRecord, PartitionKey, QueryOrder,
    RetrievalQuery, RetrievalStrategy,
};
