//! Log store collaborator (spec §6).
//!
//! External in the original spec; an in-memory fake is provided here for
//! tests, following the "tests inject fakes" guidance of spec §9.

use crate::error::StoreError;
use crate::record::{Flags, Log};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Records returned by a `load`, checked out under a fresh `batch_id` until
/// `delete_batch` is called (or the process restarts, per spec §6).
#[derive(Debug, Clone)]
pub struct LoadedBatch {
    pub batch_id: String,
    pub records: Vec<Log>,
}

/// Durable queue keyed by group id, time-indexed, supporting batch checkout
/// by id (spec §2.1, §6).
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist `record` for `group_id`. Returns `Ok(())` on success; a
    /// failure must not update the caller's counters or schedule a flush
    /// (spec §4.2 step 7).
    async fn save(&self, record: Log, group_id: &str, flags: Flags) -> Result<(), StoreError>;

    /// Return up to `limit` records for `group_id` with timestamps in
    /// `[after, before)`, excluding any record whose target keys are
    /// entirely in `excluded_target_keys`, and mark them checked out under
    /// a fresh batch id. `before = None` means unbounded.
    async fn load(
        &self,
        group_id: &str,
        limit: usize,
        excluded_target_keys: &HashSet<String>,
        after: u128,
        before: Option<u128>,
    ) -> Result<LoadedBatch, StoreError>;

    async fn delete_batch(&self, batch_id: &str, group_id: &str) -> Result<(), StoreError>;

    async fn delete_group(&self, group_id: &str) -> Result<(), StoreError>;

    async fn count(&self, group_id: &str) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Log,
    checked_out: bool,
}

/// A single-process, `tokio::sync::Mutex`-guarded store, useful for tests
/// and small deployments without a real durable backend.
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    inner: Arc<tokio::sync::Mutex<InMemoryStoreState>>,
    next_batch_id: Arc<AtomicU64>,
}

#[derive(Default)]
struct InMemoryStoreState {
    // group_id -> records, insertion order preserved (time-indexed by
    // insertion for this fake's purposes)
    by_group: HashMap<String, Vec<StoredRecord>>,
    // batch_id -> (group_id, record indices) for checkout bookkeeping
    checkouts: HashMap<String, (String, Vec<usize>)>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn save(&self, mut record: Log, group_id: &str, flags: Flags) -> Result<(), StoreError> {
        record.flags = flags;
        let mut state = self.inner.lock().await;
        state
            .by_group
            .entry(group_id.to_string())
            .or_default()
            .push(StoredRecord {
                record,
                checked_out: false,
            });
        Ok(())
    }

    async fn load(
        &self,
        group_id: &str,
        limit: usize,
        excluded_target_keys: &HashSet<String>,
        after: u128,
        before: Option<u128>,
    ) -> Result<LoadedBatch, StoreError> {
        let mut state = self.inner.lock().await;
        let records = state.by_group.entry(group_id.to_string()).or_default();

        let mut picked_indices = Vec::new();
        let mut picked_records = Vec::new();

        for (idx, stored) in records.iter_mut().enumerate() {
            if picked_indices.len() >= limit {
                break;
            }
            if stored.checked_out {
                continue;
            }
            let ts = stored.record.timestamp.unwrap_or(0);
            if ts < after {
                continue;
            }
            if let Some(before) = before {
                if ts >= before {
                    continue;
                }
            }
            if stored.record.all_targets_paused(excluded_target_keys) {
                continue;
            }

            stored.checked_out = true;
            picked_indices.push(idx);
            picked_records.push(stored.record.clone());
        }

        let batch_id = self
            .next_batch_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
            .to_string();

        if !picked_records.is_empty() {
            state
                .checkouts
                .insert(batch_id.clone(), (group_id.to_string(), picked_indices));
        }

        Ok(LoadedBatch {
            batch_id,
            records: picked_records,
        })
    }

    async fn delete_batch(&self, batch_id: &str, group_id: &str) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        let Some((checkout_group, indices)) = state.checkouts.remove(batch_id) else {
            return Ok(());
        };
        if checkout_group != group_id {
            return Ok(());
        }
        if let Some(records) = state.by_group.get_mut(group_id) {
            // Remove from highest index to lowest so earlier indices stay valid.
            let mut sorted = indices;
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            for idx in sorted {
                if idx < records.len() {
                    records.remove(idx);
                }
            }
        }
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        state.by_group.remove(group_id);
        state
            .checkouts
            .retain(|_, (g, _)| g != group_id);
        Ok(())
    }

    async fn count(&self, group_id: &str) -> Result<usize, StoreError> {
        let state = self.inner.lock().await;
        Ok(state
            .by_group
            .get(group_id)
            .map(|records| records.iter().filter(|r| !r.checked_out).count())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Log;

    fn log_at(ts: u128) -> Log {
        let mut l = Log::new(bytes::Bytes::from_static(b"x"));
        l.timestamp = Some(ts);
        l
    }

    #[tokio::test]
    async fn save_then_count() {
        let store = InMemoryLogStore::new();
        store.save(log_at(1), "g1", Flags::Default).await.unwrap();
        store.save(log_at(2), "g1", Flags::Default).await.unwrap();
        assert_eq!(store.count("g1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn load_respects_time_window_and_checks_out() {
        let store = InMemoryLogStore::new();
        store.save(log_at(1), "g1", Flags::Default).await.unwrap();
        store.save(log_at(50), "g1", Flags::Default).await.unwrap();
        store.save(log_at(150), "g1", Flags::Default).await.unwrap();

        let batch = store
            .load("g1", 10, &HashSet::new(), 0, Some(100))
            .await
            .unwrap();
        assert_eq!(batch.records.len(), 2);

        // checked-out records are not re-loaded nor counted
        assert_eq!(store.count("g1").await.unwrap(), 1);

        store.delete_batch(&batch.batch_id, "g1").await.unwrap();
        assert_eq!(store.count("g1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn load_excludes_fully_paused_target_records() {
        let store = InMemoryLogStore::new();
        let mut record = log_at(1);
        record.transmission_targets.insert("k1-secret".to_string());
        store.save(record, "g1", Flags::Default).await.unwrap();

        let mut excluded = HashSet::new();
        excluded.insert("k1".to_string());
        let batch = store.load("g1", 10, &excluded, 0, None).await.unwrap();
        assert!(batch.records.is_empty());

        let batch = store
            .load("g1", 10, &HashSet::new(), 0, None)
            .await
            .unwrap();
        assert_eq!(batch.records.len(), 1);
    }

    #[tokio::test]
    async fn delete_group_drops_everything() {
        let store = InMemoryLogStore::new();
        store.save(log_at(1), "g1", Flags::Default).await.unwrap();
        store.delete_group("g1").await.unwrap();
        assert_eq!(store.count("g1").await.unwrap(), 0);
    }
}
