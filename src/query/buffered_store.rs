//! BufferedDataStore: buffers writes in front of an inner store so callers
//! see their own writes immediately while batching persistence
//! (SPEC_FULL.md §4.6, grounded on
//! `original_source/Beam/Include/Beam/Queries/BufferedDataStore.hpp`).

use super::basic_query::BasicQuery;
use super::data_store::DataStore;
use super::local_store::{LocalDataStore, RecordAdapter};
use super::sequenced_value::SequencedIndexedValue;
use super::snapshot_limit::{self, SnapshotLimitType};
use super::task_queue::TaskQueue;
use crate::error::Result;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

struct BufferedState<T, I> {
    buffer_count: usize,
    data_store_buffer: Arc<LocalDataStore<T, I>>,
    flushed_data_store: Arc<LocalDataStore<T, I>>,
}

/// Wraps `inner`, buffering writes into a [`LocalDataStore`] reserve and
/// flushing them asynchronously once `buffer_size` writes accumulate.
pub struct BufferedDataStore<T, I, S> {
    inner: Arc<S>,
    buffer_size: usize,
    adapter: RecordAdapter<T>,
    state: Arc<Mutex<BufferedState<T, I>>>,
    tasks: Arc<TaskQueue>,
    closed: Arc<AtomicBool>,
}

fn flush<T, I, S>(inner: Arc<S>, adapter: RecordAdapter<T>, state: Arc<Mutex<BufferedState<T, I>>>)
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    let fresh = Arc::new(LocalDataStore::new(adapter));
    let drained = {
        let mut guard = state.lock();
        std::mem::replace(&mut guard.data_store_buffer, fresh)
    };
    let Ok(all) = drained.load_all() else { return };
    tracing::debug!(count = all.len(), "flushing buffered writes to inner store");
    let _ = inner.store_all(all);
    {
        let mut guard = state.lock();
        guard.flushed_data_store = guard.data_store_buffer.clone();
    }
}

/// `std::ranges::set_union(a, b)` restricted to the sequence comparator: a
/// stable merge of two ascending-by-sequence runs where, for a sequence
/// present in both, the copy from `a` is kept (SPEC_FULL.md §10's
/// resolution of the BufferedDataStore overlap Open Question).
fn set_union_by_sequence<T, I>(
    a: Vec<SequencedIndexedValue<T, I>>,
    b: Vec<SequencedIndexedValue<T, I>>,
) -> Vec<SequencedIndexedValue<T, I>>
where
    T: Clone + PartialEq,
    I: Clone + PartialEq,
{
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut ai, mut bi) = (0, 0);
    while ai < a.len() && bi < b.len() {
        match a[ai].sequence().cmp(&b[bi].sequence()) {
            Ordering::Less => {
                out.push(a[ai].clone());
                ai += 1;
            }
            Ordering::Greater => {
                out.push(b[bi].clone());
                bi += 1;
            }
            Ordering::Equal => {
                debug_assert_eq!(a[ai], b[bi], "overlapping sequence carries divergent payloads");
                out.push(a[ai].clone());
                ai += 1;
                bi += 1;
            }
        }
    }
    out.extend_from_slice(&a[ai..]);
    out.extend_from_slice(&b[bi..]);
    out
}

impl<T, I, S> BufferedDataStore<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    pub fn new(inner: S, buffer_size: usize, adapter: RecordAdapter<T>) -> Self {
        let initial = Arc::new(LocalDataStore::new(adapter.clone()));
        BufferedDataStore {
            inner: Arc::new(inner),
            buffer_size,
            adapter,
            state: Arc::new(Mutex::new(BufferedState {
                buffer_count: 0,
                data_store_buffer: initial.clone(),
                flushed_data_store: initial,
            })),
            tasks: Arc::new(TaskQueue::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn schedule_flush(&self) {
        let inner = self.inner.clone();
        let adapter = self.adapter.clone();
        let state = self.state.clone();
        self.tasks.push(move || flush(inner, adapter, state));
    }

    fn test_flush(&self) {
        let should_flush = {
            let mut state = self.state.lock();
            if state.buffer_count < self.buffer_size {
                false
            } else {
                state.buffer_count = 0;
                true
            }
        };
        if should_flush {
            self.schedule_flush();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(crate::error::QueryError::NotConnected);
        }
        Ok(())
    }
}

impl<T, I, S> DataStore<T, I> for BufferedDataStore<T, I, S>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    fn load(&self, query: &BasicQuery<I>) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        self.ensure_open()?;
        let buffer = self.state.lock().flushed_data_store.clone();
        let head = query.snapshot_limit().limit_type() == SnapshotLimitType::Head;
        let (primary, secondary): (&dyn DataStore<T, I>, &dyn DataStore<T, I>) = if head {
            (&*self.inner, &*buffer)
        } else {
            (&*buffer, &*self.inner)
        };
        let mut matches = primary.load(query)?;
        if (matches.len() as i64) < query.snapshot_limit().size() as i64 {
            let additional = secondary.load(query)?;
            let merged = set_union_by_sequence(additional, matches);
            matches = snapshot_limit::truncate(merged, query.snapshot_limit());
        }
        Ok(matches)
    }

    fn store(&self, value: SequencedIndexedValue<T, I>) -> Result<()> {
        self.ensure_open()?;
        let buffer = {
            let mut state = self.state.lock();
            state.buffer_count += 1;
            state.data_store_buffer.clone()
        };
        buffer.store(value)?;
        self.test_flush();
        Ok(())
    }

    fn store_all(&self, values: Vec<SequencedIndexedValue<T, I>>) -> Result<()> {
        self.ensure_open()?;
        let buffer = {
            let mut state = self.state.lock();
            state.buffer_count += values.len();
            state.data_store_buffer.clone()
        };
        buffer.store_all(values)?;
        self.test_flush();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("buffered data store closing, flushing pending writes");
        self.schedule_flush();
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

    // S6 — Buffered transparency.
    #[test]
    fn load_sees_buffered_and_flushed_writes_immediately() {
        let inner = LocalDataStore::new(adapter());
        let store = BufferedDataStore::new(inner, 3, adapter());
        for s in 1..=5u64 {
            store
                .store(SequencedValue::new(
                    IndexedValue::new(s as i32, "B"),
                    Sequence::new(s),
                ))
                .unwrap();
        }
        let result = store
            .load(&BasicQuery::new("B").with_snapshot_limit(SnapshotLimit::UNLIMITED))
            .unwrap();
        let seqs: Vec<u64> = result.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn close_flushes_pending_writes_to_inner_store() {
        let inner = LocalDataStore::new(adapter());
        let store = BufferedDataStore::new(inner, 1000, adapter());
        store
            .store(SequencedValue::new(IndexedValue::new(1, "B"), Sequence::new(1)))
            .unwrap();
        store.close().unwrap();
        let result = store
            .inner
            .load(&BasicQuery::new("B").with_range(Range::total()))
            .unwrap();
        assert_eq!(result.len(), 1);
    }
}
