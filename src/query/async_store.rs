//! AsyncDataStore: asynchronous writes with immediate read-your-writes
//! visibility (SPEC_FULL.md §4.9, grounded on
//! `original_source/Beam/Include/Beam/Queries/AsyncDataStore.hpp`).

use super::basic_query::BasicQuery;
use super::data_store::DataStore;
use super::local_store::{LocalDataStore, RecordAdapter};
use super::sequenced_value::SequencedIndexedValue;
use super::snapshot_limit;
use super::task_queue::TaskQueue;
use crate::error::{QueryError, Result};
use std::cmp::Ordering;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Wraps `inner`, enqueuing writes onto a background [`TaskQueue`] while
/// keeping a small in-memory reserve so that a write is visible to `load`
/// before it has actually landed in `inner`.
pub struct AsyncDataStore<T, I, S> {
    inner: Arc<S>,
    reserve: Arc<LocalDataStore<T, I>>,
    tasks: Arc<TaskQueue>,
    closed: Arc<AtomicBool>,
}

impl<T, I, S> AsyncDataStore<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    pub fn new(inner: S, adapter: RecordAdapter<T>) -> Self {
        AsyncDataStore {
            inner: Arc::new(inner),
            reserve: Arc::new(LocalDataStore::new(adapter)),
            tasks: Arc::new(TaskQueue::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QueryError::NotConnected);
        }
        Ok(())
    }
}

impl<T, I, S> DataStore<T, I> for AsyncDataStore<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    fn load(&self, query: &BasicQuery<I>) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        self.ensure_open()?;
        let persisted = self.inner.load(query)?;
        let reserved = self.reserve.load(query)?;
        let mut merged = Vec::with_capacity(persisted.len() + reserved.len());
        let (mut pi, mut ri) = (0, 0);
        while pi < persisted.len() && ri < reserved.len() {
            match persisted[pi].sequence().cmp(&reserved[ri].sequence()) {
                Ordering::Less => {
                    merged.push(persisted[pi].clone());
                    pi += 1;
                }
                Ordering::Greater => {
                    merged.push(reserved[ri].clone());
                    ri += 1;
                }
                Ordering::Equal => {
                    merged.push(persisted[pi].clone());
                    pi += 1;
                    ri += 1;
                }
            }
        }
        merged.extend_from_slice(&persisted[pi..]);
        merged.extend_from_slice(&reserved[ri..]);
        Ok(snapshot_limit::truncate(merged, query.snapshot_limit()))
    }

    fn store(&self, value: SequencedIndexedValue<T, I>) -> Result<()> {
        self.ensure_open()?;
        self.reserve.store(value.clone())?;
        let inner = self.inner.clone();
        let reserve = self.reserve.clone();
        let index = value.index().clone();
        let sequence = value.sequence();
        self.tasks.push(move || {
            if inner.store(value).is_ok() {
                let _ = reserve.discard(&index, sequence);
            } else {
                tracing::warn!(sequence = %sequence, "background flush to inner store failed");
            }
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("async data store closing, draining background tasks");
        self.tasks.close();
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::range::Range;
    use crate::query::sequence::Sequence;
    use crate::query::sequenced_value::{IndexedValue, SequencedValue};
    use crate::query::snapshot_limit::SnapshotLimit;
    use crate::query::value::Value;
    use chrono::Utc;

    fn adapter() -> RecordAdapter<i32> {
        RecordAdapter {
            projector: Arc::new(|v: &i32| Value::Int(*v)),
            timestamp_of: Arc::new(|_: &i32| Utc::now()),
        }
    }

    #[test]
    fn writes_are_visible_before_the_background_flush_runs() {
        let inner = LocalDataStore::new(adapter());
        let store = AsyncDataStore::new(inner, adapter());
        store
            .store(SequencedValue::new(IndexedValue::new(1, "A"), Sequence::new(1)))
            .unwrap();
        let result = store
            .load(&BasicQuery::new("A").with_snapshot_limit(SnapshotLimit::UNLIMITED))
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn close_drains_pending_writes_into_the_inner_store() {
        let inner = LocalDataStore::new(adapter());
        let store = AsyncDataStore::new(inner, adapter());
        for s in 1..=3u64 {
            store
                .store(SequencedValue::new(IndexedValue::new(s as i32, "A"), Sequence::new(s)))
                .unwrap();
        }
        store.close().unwrap();
        let result = store
            .inner
            .load(&BasicQuery::new("A").with_range(Range::total()))
            .unwrap();
        assert_eq!(result.len(), 3);
    }
}
