//! SessionCachedDataStore: a read-the-tail cache optimized for recent
//! writes (SPEC_FULL.md §4.8, grounded on
//! `original_source/Beam/Include/Beam/Queries/SessionCachedDataStoreEntry.hpp`).

use super::basic_query::BasicQuery;
use super::data_store::DataStore;
use super::local_store::{LocalDataStore, RecordAdapter};
use super::range::{Range, RangePoint};
use super::sequence::Sequence;
use super::sequenced_value::SequencedIndexedValue;
use super::snapshot_limit::{SnapshotLimit, SnapshotLimitType};
use crate::error::{QueryError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

struct SessionEntryState<T, I> {
    cache: Arc<LocalDataStore<T, I>>,
    watermark_timestamp: DateTime<Utc>,
    watermark_sequence: Sequence,
    size: usize,
}

struct SessionEntry<T, I> {
    init: OnceCell<()>,
    state: Mutex<SessionEntryState<T, I>>,
}

/// Wraps `inner`, keeping an in-memory rolling window of the most recent
/// `~block_size` writes per index. `block_size == 0` disables caching
/// entirely (every operation delegates straight to `inner`).
pub struct SessionCachedDataStore<T, I, S> {
    inner: Arc<S>,
    adapter: RecordAdapter<T>,
    block_size: usize,
    entries: DashMap<I, Arc<SessionEntry<T, I>>>,
    closed: AtomicBool,
}

impl<T, I, S> SessionCachedDataStore<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    pub fn new(inner: S, block_size: usize, adapter: RecordAdapter<T>) -> Self {
        SessionCachedDataStore {
            inner: Arc::new(inner),
            adapter,
            block_size,
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QueryError::NotConnected);
        }
        Ok(())
    }

    fn entry_for(&self, index: &I) -> Arc<SessionEntry<T, I>> {
        self.entries
            .entry(index.clone())
            .or_insert_with(|| {
                Arc::new(SessionEntry {
                    init: OnceCell::new(),
                    state: Mutex::new(SessionEntryState {
                        cache: Arc::new(LocalDataStore::new(self.adapter.clone())),
                        watermark_timestamp: DateTime::<Utc>::MIN_UTC,
                        watermark_sequence: Sequence::FIRST,
                        size: 0,
                    }),
                })
            })
            .clone()
    }

    /// Seeds the watermark with the current tail of `inner` the first time
    /// this index is touched (call-once discipline, spec.md §4.8).
    fn ensure_initialized(&self, index: I, entry: &Arc<SessionEntry<T, I>>) {
        let inner = self.inner.clone();
        let adapter = &self.adapter;
        entry.init.get_or_init(|| {
            let query = BasicQuery::new(index)
                .with_range(Range::total())
                .with_snapshot_limit(SnapshotLimit::new(SnapshotLimitType::Tail, 1));
            if let Ok(data) = inner.load(&query) {
                if let Some(last) = data.last() {
                    let mut state = entry.state.lock();
                    state.watermark_timestamp = (adapter.timestamp_of)(last.record());
                    state.watermark_sequence = last.sequence();
                }
            }
        });
    }
}

impl<T, I, S> DataStore<T, I> for SessionCachedDataStore<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    fn load(&self, query: &BasicQuery<I>) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        self.ensure_open()?;
        if self.block_size == 0 {
            return self.inner.load(query);
        }
        let entry = self.entry_for(query.index());
        self.ensure_initialized(query.index().clone(), &entry);
        let (watermark_ts, watermark_seq, cached_size, cache) = {
            let state = entry.state.lock();
            (
                state.watermark_timestamp,
                state.watermark_sequence,
                state.size,
                state.cache.clone(),
            )
        };
        let start_above_watermark = match query.range().start() {
            RangePoint::Timestamp(t) => t > watermark_ts,
            RangePoint::Sequence(s) => s > watermark_seq,
        };
        if start_above_watermark {
            return cache.load(query);
        }
        if query.snapshot_limit().limit_type() == SnapshotLimitType::Tail
            && query.snapshot_limit().size() as usize <= cached_size
        {
            let end_above_watermark = match query.range().end() {
                RangePoint::Timestamp(t) => t > watermark_ts,
                RangePoint::Sequence(s) => s > watermark_seq,
            };
            if end_above_watermark {
                let result = cache.load(query)?;
                if result.len() >= query.snapshot_limit().size() as usize {
                    return Ok(result);
                }
            }
        }
        self.inner.load(query)
    }

    fn store(&self, value: SequencedIndexedValue<T, I>) -> Result<()> {
        self.ensure_open()?;
        self.inner.store(value.clone())?;
        if self.block_size == 0 {
            return Ok(());
        }
        let index = value.index().clone();
        let entry = self.entry_for(&index);
        self.ensure_initialized(index, &entry);
        let size = entry.state.lock().size;
        let cache = if size > 2 * self.block_size {
            let mut state = entry.state.lock();
            let all = state.cache.load_all()?;
            if all.len() > self.block_size {
                let reference = &all[self.block_size - 1];
                let reference_ts = (self.adapter.timestamp_of)(reference.record());
                let reference_seq = reference.sequence();
                let trimmed = all[self.block_size..].to_vec();
                let fresh = LocalDataStore::new(self.adapter.clone());
                fresh.store_all(trimmed.clone())?;
                state.size = trimmed.len();
                state.watermark_timestamp = reference_ts;
                state.watermark_sequence = reference_seq;
                state.cache = Arc::new(fresh);
                tracing::debug!(watermark = %reference_seq, "trimmed session tail cache");
            }
            state.cache.clone()
        } else {
            entry.state.lock().cache.clone()
        };
        cache.store(value)?;
        entry.state.lock().size += 1;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::sequenced_value::{IndexedValue, SequencedValue};
    use crate::query::value::Value;

    fn adapter() -> RecordAdapter<i32> {
        RecordAdapter {
            projector: Arc::new(|v: &i32| Value::Int(*v)),
            timestamp_of: Arc::new(|_: &i32| Utc::now()),
        }
    }

    #[test]
    fn recent_writes_are_served_from_cache() {
        let inner = LocalDataStore::new(adapter());
        let store = SessionCachedDataStore::new(inner, 4, adapter());
        for s in 1..=6u64 {
            store
                .store(SequencedValue::new(IndexedValue::new(s as i32, "X"), Sequence::new(s)))
                .unwrap();
        }
        let result = store
            .load(
                &BasicQuery::new("X")
                    .with_range(Range::new(Sequence::new(1), Sequence::LAST)),
            )
            .unwrap();
        let seqs: Vec<u64> = result.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn trim_advances_watermark_and_keeps_tail_readable() {
        let inner = LocalDataStore::new(adapter());
        let store = SessionCachedDataStore::new(inner, 2, adapter());
        for s in 1..=6u64 {
            store
                .store(SequencedValue::new(IndexedValue::new(s as i32, "X"), Sequence::new(s)))
                .unwrap();
        }
        let result = store
            .load(
                &BasicQuery::new("X")
                    .with_range(Range::new(Sequence::new(5), Sequence::LAST)),
            )
            .unwrap();
        let seqs: Vec<u64> = result.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(seqs, vec![5, 6]);
    }

    #[test]
    fn zero_block_size_bypasses_caching() {
        let inner = LocalDataStore::new(adapter());
        let store = SessionCachedDataStore::new(inner, 0, adapter());
        store
            .store(SequencedValue::new(IndexedValue::new(1, "X"), Sequence::new(1)))
            .unwrap();
        let result = store.load(&BasicQuery::new("X")).unwrap();
        assert_eq!(result.len(), 1);
    }
}
