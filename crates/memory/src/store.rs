//! Indexed record storage.
//!
//! Records live in a concurrent map keyed by id, each behind its own
//! lock so `update_accuracy` is serialized per record without touching
//! any session-level lock. Partition queries scan the map and filter by
//! key; the snapshot methods persist the whole store as JSON.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use cortex_common::{new_id, now_millis, CortexError, Result};

use crate::confidence::ConfidenceScorer;
use crate::types::{AccuracyObservation, MemoryConfig, MemoryRecord, PartitionKey, QueryOrder};

struct RecordSlot {
    record: RwLock<MemoryRecord>,
}

/// The shared memory store.
pub struct MemoryStore {
    config: MemoryConfig,
    scorer: ConfidenceScorer,
    records: DashMap<String, Arc<RecordSlot>>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        info!(
            max_results = config.max_results,
            retention_ms = config.retention_ms,
            "Initializing memory store"
        );

        let scorer = ConfidenceScorer::new(config.scorer.clone());
        Self {
            config,
            scorer,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Insert a new record, assigning id and timestamps if absent.
    ///
    /// Never overwrites: a record whose id already exists is rejected.
    /// Updates go through [`MemoryStore::update_accuracy`] or
    /// [`MemoryStore::replace`].
    pub fn put(&self, mut record: MemoryRecord) -> Result<String> {
        if record.id.is_empty() {
            record.id = new_id("rec");
        }
        let now = now_millis();
        if record.created_at == 0 {
            record.created_at = now;
        }
        if record.last_accessed_at == 0 {
            record.last_accessed_at = record.created_at;
        }
        record.confidence = record.confidence.clamp(0.0, 1.0);

        let id = record.id.clone();
        match self.records.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CortexError::Storage(format!(
                "record '{}' already exists; use update_accuracy or replace",
                id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(record_id = %id, "Stored memory record");
                slot.insert(Arc::new(RecordSlot {
                    record: RwLock::new(record),
                }));
                Ok(id)
            }
        }
    }

    /// Fetch a record by id. Missing records are `None`, never an error.
    pub fn get(&self, id: &str) -> Option<MemoryRecord> {
        self.records.get(id).map(|slot| slot.record.read().clone())
    }

    /// Replace an existing record's content wholesale.
    ///
    /// The partition key is immutable once assigned: a replacement that
    /// tries to move the record to a different partition is rejected.
    pub fn replace(&self, record: MemoryRecord) -> Result<()> {
        let slot = self
            .records
            .get(&record.id)
            .ok_or_else(|| CortexError::Storage(format!("unknown record '{}'", record.id)))?;

        let mut current = slot.record.write();
        if current.partition_key != record.partition_key {
            return Err(CortexError::Storage(format!(
                "partition key of record '{}' is immutable",
                record.id
            )));
        }
        let mut record = record;
        record.confidence = record.confidence.clamp(0.0, 1.0);
        record.created_at = current.created_at;
        *current = record;
        Ok(())
    }

    /// Query records whose key matches the filter (wildcard dimensions
    /// match all values).
    ///
    /// Ordered by `last_accessed_at` descending unless the caller asks
    /// for a different order.
    pub fn query_by_partition(
        &self,
        filter: &PartitionKey,
        limit: Option<usize>,
        order: QueryOrder,
    ) -> Vec<MemoryRecord> {
        let limit = limit.unwrap_or(self.config.max_results);

        let mut results: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter_map(|entry| {
                let record = entry.record.read();
                filter
                    .matches(&record.partition_key)
                    .then(|| MemoryRecord::clone(&record))
            })
            .collect();

        match order {
            QueryOrder::LastAccessedDesc => {
                results.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at))
            }
            QueryOrder::CreatedDesc => results.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            QueryOrder::ConfidenceDesc => results.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }

        results.truncate(limit);
        results
    }

    /// Append an accuracy observation and recalibrate confidence.
    ///
    /// This is the only mutation path after creation. The read-modify-
    /// write runs under the record's own write lock, so concurrent
    /// callers for the same id are serialized and no observation is
    /// lost.
    pub fn update_accuracy(
        &self,
        id: &str,
        observed: AccuracyObservation,
    ) -> Result<MemoryRecord> {
        let slot = self
            .records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CortexError::Storage(format!("unknown record '{}'", id)))?;

        let mut record = slot.record.write();
        record.accuracy_history.push(observed);
        let now = now_millis();
        record.confidence = self.scorer.calibrate(&record.accuracy_history, now);
        record.last_accessed_at = now;

        debug!(
            record_id = %id,
            history_len = record.accuracy_history.len(),
            confidence = record.confidence,
            "Updated record accuracy"
        );

        Ok(record.clone())
    }

    /// Best-effort `last_accessed_at` bump.
    ///
    /// Skips silently when the record is write-locked or gone; retrieval
    /// freshness is not worth a second lock domain.
    pub fn touch(&self, id: &str) {
        if let Some(slot) = self.records.get(id) {
            if let Some(mut record) = slot.record.try_write() {
                record.last_accessed_at = now_millis();
            }
        }
    }

    /// Retention sweep: drop records not accessed within the configured
    /// retention window. The only deletion path. No-op when retention
    /// is disabled (zero).
    pub fn sweep_expired(&self) -> usize {
        if self.config.retention_ms == 0 {
            return 0;
        }
        let cutoff = now_millis().saturating_sub(self.config.retention_ms);
        // Counted inside retain; a len() diff could race a concurrent
        // insert.
        let mut removed = 0usize;
        self.records.retain(|_, slot| {
            let keep = slot.record.read().last_accessed_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            info!(removed, "Swept expired memory records");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// All records, cloned. Used by snapshotting and tests.
    pub fn snapshot(&self) -> Vec<MemoryRecord> {
        self.records
            .iter()
            .map(|entry| entry.record.read().clone())
            .collect()
    }

    /// Persist the store as a JSON snapshot.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut records = self.snapshot();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_string_pretty(&records)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!(count = records.len(), path = %path.as_ref().display(), "Saved memory snapshot");
        Ok(())
    }

    /// Build a store from a JSON snapshot. A missing file yields an
    /// empty store; a corrupt one is logged and skipped rather than
    /// refusing to start.
    pub async fn load_from(config: MemoryConfig, path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::new(config);
        let path = path.as_ref();

        if !path.exists() {
            return Ok(store);
        }

        let content = fs::read_to_string(path).await?;
        match serde_json::from_str::<Vec<MemoryRecord>>(&content) {
            Ok(records) => {
                info!(count = records.len(), path = %path.display(), "Loaded memory snapshot");
                for record in records {
                    store.records.insert(
                        record.id.clone(),
                        Arc::new(RecordSlot {
                            record: RwLock::new(record),
                        }),
                    );
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse memory snapshot, starting empty");
            }
        }

        Ok(store)
    }
}
