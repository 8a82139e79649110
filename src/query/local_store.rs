//! LocalDataStore: the canonical in-memory reference store (SPEC_FULL.md
//! §4.5, grounded on `original_source/Beam/Include/Beam/QueriesTests/
//! LocalDataStoreTester.hpp` and spec.md §4.5).

use super::basic_query::BasicQuery;
use super::data_store::DataStore;
use super::evaluator::{AccessorRegistry, EvaluatorTranslator};
use super::sequence::Sequence;
use super::sequenced_value::{IndexedValue, SequencedIndexedValue, SequencedValue};
use super::snapshot_limit;
use super::value::Value;
use crate::error::{QueryError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Projects a record into the [`Value`] bound to `Parameter(0)` when
/// evaluating a query's filter, and extracts the timestamp used to resolve
/// timestamp-valued range endpoints against this store's own sequence
/// order (spec.md §4.5: "timestamp endpoints are resolved by binary-search
/// on the store's timestamp-getter").
pub struct RecordAdapter<T> {
    pub projector: Arc<dyn Fn(&T) -> Value + Send + Sync>,
    pub timestamp_of: Arc<dyn Fn(&T) -> DateTime<Utc> + Send + Sync>,
}

impl<T> Clone for RecordAdapter<T> {
    fn clone(&self) -> Self {
        RecordAdapter {
            projector: self.projector.clone(),
            timestamp_of: self.timestamp_of.clone(),
        }
    }
}

/// The in-memory, per-index ordered-by-sequence reference store.
pub struct LocalDataStore<T, I> {
    indices: DashMap<I, Mutex<Vec<SequencedValue<T>>>>,
    adapter: RecordAdapter<T>,
    accessors: AccessorRegistry,
    closed: AtomicBool,
}

impl<T, I> LocalDataStore<T, I>
where
    T: Clone + Send + Sync,
    I: Eq + Hash + Clone + Send + Sync,
{
    pub fn new(adapter: RecordAdapter<T>) -> Self {
        LocalDataStore {
            indices: DashMap::new(),
            adapter,
            accessors: AccessorRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_accessors(mut self, accessors: AccessorRegistry) -> Self {
        self.accessors = accessors;
        self
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QueryError::NotConnected);
        }
        Ok(())
    }

    /// Removes a single record by its exact sequence, used by
    /// [`super::async_store::AsyncDataStore`] to retire a reserve entry once
    /// it has landed in the inner store. A no-op if the sequence is absent.
    pub fn discard(&self, index: &I, sequence: Sequence) -> Result<()> {
        self.ensure_open()?;
        let Some(entry) = self.indices.get(index) else {
            return Ok(());
        };
        let mut guard = entry.lock();
        if let Ok(idx) = guard.binary_search_by_key(&sequence, |v| v.sequence()) {
            guard.remove(idx);
        }
        Ok(())
    }

    /// Every stored record across every index, concatenated in no
    /// particular cross-index order (spec.md §4.5: `load_all`).
    pub fn load_all(&self) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        self.ensure_open()?;
        let mut out = Vec::new();
        for entry in self.indices.iter() {
            let index = entry.key().clone();
            let guard = entry.value().lock();
            for v in guard.iter() {
                out.push(SequencedValue::new(
                    IndexedValue::new(v.value().clone(), index.clone()),
                    v.sequence(),
                ));
            }
        }
        Ok(out)
    }

    /// Resolves a range endpoint against this index's own sequence order.
    /// A timestamp endpoint is translated via binary search on the
    /// per-record timestamp, which is valid because sequences assigned by
    /// [`super::sequencer::Sequencer`] are monotonic in timestamp too.
    fn resolve_start(&self, point: super::range::RangePoint, vec: &[SequencedValue<T>]) -> Sequence {
        match point {
            super::range::RangePoint::Sequence(s) => s,
            super::range::RangePoint::Timestamp(t) => {
                let idx = vec.partition_point(|v| (self.adapter.timestamp_of)(v.value()) < t);
                vec.get(idx).map(|v| v.sequence()).unwrap_or(Sequence::LAST)
            }
        }
    }

    fn resolve_end(&self, point: super::range::RangePoint, vec: &[SequencedValue<T>]) -> Sequence {
        match point {
            super::range::RangePoint::Sequence(s) => s,
            super::range::RangePoint::Timestamp(t) => {
                let idx = vec.partition_point(|v| (self.adapter.timestamp_of)(v.value()) <= t);
                if idx == 0 {
                    Sequence::FIRST.decrement()
                } else {
                    vec[idx - 1].sequence()
                }
            }
        }
    }
}

impl<T, I> DataStore<T, I> for LocalDataStore<T, I>
where
    T: Clone + Send + Sync,
    I: Eq + Hash + Clone + Send + Sync,
{
    fn load(&self, query: &BasicQuery<I>) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        self.ensure_open()?;
        let Some(entry) = self.indices.get(query.index()) else {
            return Ok(Vec::new());
        };
        let guard = entry.lock();
        let start = self.resolve_start(query.range().start(), &guard);
        let end = self.resolve_end(query.range().end(), &guard);
        let lo = guard.partition_point(|v| v.sequence() < start);
        let hi = guard.partition_point(|v| v.sequence() <= end);

        let mut evaluator =
            EvaluatorTranslator::new(self.accessors.clone()).translate(query.filter())?;
        let mut matches = Vec::new();
        for v in &guard[lo..hi] {
            let param = (self.adapter.projector)(v.value());
            if evaluator.eval(&[param]).as_bool().unwrap_or(false) {
                matches.push(v.clone());
            }
        }
        let matches = snapshot_limit::truncate(matches, query.snapshot_limit());
        Ok(matches
            .into_iter()
            .map(|v| {
                let sequence = v.sequence();
                SequencedValue::new(IndexedValue::new(v.into_value(), query.index().clone()), sequence)
            })
            .collect())
    }

    fn store(&self, value: SequencedIndexedValue<T, I>) -> Result<()> {
        self.ensure_open()?;
        let sequence = value.sequence();
        let index = value.index().clone();
        let record = value.record().clone();
        let bucket = self.indices.entry(index).or_insert_with(|| Mutex::new(Vec::new()));
        let mut guard = bucket.lock();
        if let Some(last) = guard.last() {
            if sequence <= last.sequence() {
                return Err(QueryError::SequenceViolation(format!(
                    "sequence {sequence} is not strictly greater than last stored sequence {}",
                    last.sequence()
                )));
            }
        }
        guard.push(SequencedValue::new(record, sequence));
        tracing::debug!(sequence = %sequence, "stored record in local data store");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, AtomicOrdering::Release);
        tracing::debug!("local data store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::Expression;
    use crate::query::range::Range;
    use crate::query::snapshot_limit::{SnapshotLimit, SnapshotLimitType};
    use crate::query::value::ValueType;

    fn int_store() -> LocalDataStore<i32, &'static str> {
        LocalDataStore::new(RecordAdapter {
            projector: Arc::new(|v: &i32| Value::Int(*v)),
            timestamp_of: Arc::new(|_: &i32| Utc::now()),
        })
    }

    fn push(store: &LocalDataStore<i32, &'static str>, index: &'static str, seq: u64, value: i32) {
        store
            .store(SequencedValue::new(
                IndexedValue::new(value, index),
                Sequence::new(seq),
            ))
            .unwrap();
    }

    // S5 — Local store store+load.
    #[test]
    fn store_and_load_round_trips_with_filters_and_limits() {
        let store = int_store();
        for s in 1..=5u64 {
            push(&store, "A", s, s as i32);
        }

        let all = store
            .load(&BasicQuery::new("A").with_filter(Expression::constant(Value::Bool(true))))
            .unwrap();
        let seqs: Vec<u64> = all.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

        let head = store
            .load(
                &BasicQuery::new("A")
                    .with_range(Range::new(Sequence::new(2), Sequence::new(4)))
                    .with_snapshot_limit(SnapshotLimit::new(SnapshotLimitType::Head, 2)),
            )
            .unwrap();
        let head_seqs: Vec<u64> = head.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(head_seqs, vec![2, 3]);

        let tail = store
            .load(
                &BasicQuery::new("A")
                    .with_range(Range::new(Sequence::new(1), Sequence::new(5)))
                    .with_snapshot_limit(SnapshotLimit::new(SnapshotLimitType::Tail, 2)),
            )
            .unwrap();
        let tail_seqs: Vec<u64> = tail.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(tail_seqs, vec![4, 5]);
    }

    #[test]
    fn out_of_order_store_is_rejected() {
        let store = int_store();
        push(&store, "A", 5, 1);
        let err = store.store(SequencedValue::new(IndexedValue::new(2, "A"), Sequence::new(3)));
        assert!(matches!(err, Err(QueryError::SequenceViolation(_))));
    }

    #[test]
    fn load_applies_filter_via_parameter_zero() {
        let store = int_store();
        for s in 1..=4u64 {
            push(&store, "A", s, s as i32);
        }
        let filter = Expression::function(
            crate::query::expression::FunctionName::GreaterEquals,
            vec![
                Expression::parameter(0, ValueType::Int).unwrap(),
                Expression::constant(Value::Int(3)),
            ],
        )
        .unwrap();
        let result = store.load(&BasicQuery::new("A").with_filter(filter)).unwrap();
        let seqs: Vec<u64> = result.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn load_on_unknown_index_is_empty_not_error() {
        let store = int_store();
        let result = store.load(&BasicQuery::new("missing")).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn operations_after_close_fail() {
        let store = int_store();
        store.close().unwrap();
        assert!(matches!(
            store.load(&BasicQuery::new("A")),
            Err(QueryError::NotConnected)
        ));
    }
}
