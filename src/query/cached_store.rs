//! CachedDataStore: a per-index, block-aligned cache over an inner store
//! (SPEC_FULL.md §4.7, grounded on
//! `original_source/Beam/Include/Beam/Queries/CachedDataStoreEntry.hpp`).

use super::basic_query::BasicQuery;
use super::data_store::DataStore;
use super::local_store::{LocalDataStore, RecordAdapter};
use super::range::{Range, RangePoint};
use super::sequence::Sequence;
use super::sequenced_value::SequencedIndexedValue;
use super::snapshot_limit::{SnapshotLimit, SnapshotLimitType};
use super::task_queue::TaskQueue;
use crate::error::{QueryError, Result};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

struct CacheBlock<T, I> {
    store: LocalDataStore<T, I>,
    init: OnceCell<()>,
}

fn normalize(ordinal: u64, block_size: u64) -> u64 {
    ordinal - ordinal % block_size
}

/// Wraps `inner` with a per-index block cache. Blocks are `block_size`
/// sequence ordinals wide, aligned to multiples of `block_size`, and
/// lazily populated on first touch with call-once discipline.
pub struct CachedDataStore<T, I, S> {
    inner: Arc<S>,
    adapter: RecordAdapter<T>,
    block_size: u64,
    blocks: DashMap<I, DashMap<u64, Arc<CacheBlock<T, I>>>>,
    tasks: Arc<TaskQueue>,
    closed: AtomicBool,
}

impl<T, I, S> CachedDataStore<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    pub fn new(inner: S, block_size: u64, adapter: RecordAdapter<T>) -> Self {
        CachedDataStore {
            inner: Arc::new(inner),
            adapter,
            block_size: block_size.max(1),
            blocks: DashMap::new(),
            tasks: Arc::new(TaskQueue::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QueryError::NotConnected);
        }
        Ok(())
    }

    fn find_block(&self, index: &I, ordinal: u64) -> Option<Arc<CacheBlock<T, I>>> {
        self.blocks.get(index)?.get(&ordinal).map(|b| b.clone())
    }

    fn find_or_create_block(&self, index: &I, ordinal: u64) -> Arc<CacheBlock<T, I>> {
        let per_index = self
            .blocks
            .entry(index.clone())
            .or_insert_with(DashMap::new);
        per_index
            .entry(ordinal)
            .or_insert_with(|| {
                Arc::new(CacheBlock {
                    store: LocalDataStore::new(self.adapter.clone()),
                    init: OnceCell::new(),
                })
            })
            .clone()
    }

    /// Synchronously populates `block` from `inner` the first time it is
    /// touched (call-once discipline per block, spec.md §4.7).
    fn ensure_block_loaded(&self, index: I, ordinal: u64, block: &Arc<CacheBlock<T, I>>) {
        let inner = self.inner.clone();
        let block_size = self.block_size;
        let store_ref = &block.store;
        let _ = block.init.get_or_init(|| {
            let query = BasicQuery::new(index)
                .with_range(Range::new(
                    Sequence::new(ordinal),
                    Sequence::new(ordinal + block_size - 1),
                ))
                .with_snapshot_limit(SnapshotLimit::UNLIMITED);
            if let Ok(matches) = inner.load(&query) {
                let _ = store_ref.store_all(matches);
            }
        });
    }

    /// Translates timestamp-valued range endpoints into sequence endpoints
    /// by bounded probes against the inner store; an empty probe collapses
    /// the range to [`Range::empty`] (spec.md §4.7).
    fn resolve_range(&self, index: &I, range: Range) -> Result<Range> {
        let start = match range.start() {
            RangePoint::Sequence(s) => s,
            RangePoint::Timestamp(t) => {
                let query = BasicQuery::new(index.clone())
                    .with_range(Range::new(t, Sequence::LAST))
                    .with_snapshot_limit(SnapshotLimit::new(SnapshotLimitType::Head, 1));
                self.inner
                    .load(&query)?
                    .first()
                    .map(|v| v.sequence())
                    .unwrap_or(Sequence::LAST)
            }
        };
        let end = match range.end() {
            RangePoint::Sequence(s) => s,
            RangePoint::Timestamp(t) => {
                let query = BasicQuery::new(index.clone())
                    .with_range(Range::new(Sequence::FIRST, t))
                    .with_snapshot_limit(SnapshotLimit::new(SnapshotLimitType::Tail, 1));
                self.inner
                    .load(&query)?
                    .first()
                    .map(|v| v.sequence())
                    .unwrap_or(Sequence::FIRST)
            }
        };
        if start > end {
            return Ok(Range::empty());
        }
        Ok(Range::new(start, end))
    }

    fn spawn_background_init(&self, index: I, ordinal: u64, block: Arc<CacheBlock<T, I>>) {
        let inner = self.inner.clone();
        let block_size = self.block_size;
        self.tasks.push(move || {
            let query = BasicQuery::new(index)
                .with_range(Range::new(
                    Sequence::new(ordinal),
                    Sequence::new(ordinal + block_size - 1),
                ))
                .with_snapshot_limit(SnapshotLimit::UNLIMITED);
            if let Ok(matches) = inner.load(&query) {
                let _ = block.init.get_or_init(|| {
                    let _ = block.store.store_all(matches);
                });
            }
        });
    }

    fn load_head(
        &self,
        query: &BasicQuery<I>,
        start: u64,
        end: u64,
    ) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        let mut matches = Vec::new();
        let mut subset_start = query.range().start();
        let mut remaining_limit = query.snapshot_limit().size();
        let unlimited = query.snapshot_limit().is_unlimited();
        let mut ordinal = start;
        loop {
            let limit = if unlimited {
                SnapshotLimit::UNLIMITED
            } else {
                SnapshotLimit::new(SnapshotLimitType::Head, remaining_limit)
            };
            let subset_query = query
                .clone()
                .with_range(Range::new(subset_start, query.range().end()))
                .with_snapshot_limit(limit);
            if let Some(block) = self.find_block(query.index(), ordinal) {
                self.ensure_block_loaded(query.index().clone(), ordinal, &block);
                let subset_matches = block.store.load(&subset_query)?;
                remaining_limit -= subset_matches.len() as i32;
                matches.extend(subset_matches);
                if remaining_limit <= 0 || ordinal == end {
                    break;
                }
                ordinal += self.block_size;
                subset_start = RangePoint::Sequence(Sequence::new(ordinal));
            } else {
                tracing::debug!(ordinal, "cache block miss on head query");
                let subset_matches = self.inner.load(&subset_query)?;
                matches.extend(subset_matches);
                let block = self.find_or_create_block(query.index(), ordinal);
                self.spawn_background_init(query.index().clone(), ordinal, block);
                break;
            }
        }
        Ok(matches)
    }

    fn load_tail(
        &self,
        query: &BasicQuery<I>,
        start: u64,
        end: u64,
    ) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        let mut partitions = Vec::new();
        let mut subset_end = query.range().end();
        let mut remaining_limit = query.snapshot_limit().size();
        let unlimited = query.snapshot_limit().is_unlimited();
        let mut ordinal = end;
        loop {
            let limit = if unlimited {
                SnapshotLimit::UNLIMITED
            } else {
                SnapshotLimit::new(SnapshotLimitType::Tail, remaining_limit)
            };
            let subset_query = query
                .clone()
                .with_range(Range::new(query.range().start(), subset_end))
                .with_snapshot_limit(limit);
            if let Some(block) = self.find_block(query.index(), ordinal) {
                self.ensure_block_loaded(query.index().clone(), ordinal, &block);
                let subset_matches = block.store.load(&subset_query)?;
                remaining_limit -= subset_matches.len() as i32;
                partitions.push(subset_matches);
                if remaining_limit <= 0 || ordinal == start {
                    break;
                }
                ordinal -= self.block_size;
                subset_end = RangePoint::Sequence(Sequence::new(ordinal).decrement());
            } else {
                tracing::debug!(ordinal, "cache block miss on tail query");
                let subset_matches = self.inner.load(&subset_query)?;
                partitions.push(subset_matches);
                let block = self.find_or_create_block(query.index(), ordinal);
                self.spawn_background_init(query.index().clone(), ordinal, block);
                break;
            }
        }
        let mut matches = Vec::new();
        for partition in partitions.into_iter().rev() {
            matches.extend(partition);
        }
        Ok(matches)
    }
}

impl<T, I, S> DataStore<T, I> for CachedDataStore<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    fn load(&self, query: &BasicQuery<I>) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        self.ensure_open()?;
        let resolved = self.resolve_range(query.index(), query.range())?;
        let start = normalize(
            resolved.start().as_sequence().expect("resolved to a sequence").ordinal(),
            self.block_size,
        );
        let end = normalize(
            resolved.end().as_sequence().expect("resolved to a sequence").ordinal(),
            self.block_size,
        );
        let sequenced_query = query.clone().with_range(resolved);
        if sequenced_query.snapshot_limit().limit_type() == SnapshotLimitType::Head {
            self.load_head(&sequenced_query, start, end)
        } else {
            self.load_tail(&sequenced_query, start, end)
        }
    }

    fn store(&self, value: SequencedIndexedValue<T, I>) -> Result<()> {
        self.ensure_open()?;
        let ordinal = normalize(value.sequence().ordinal(), self.block_size);
        let index = value.index().clone();
        let block = self.find_or_create_block(&index, ordinal);
        self.ensure_block_loaded(index, ordinal, &block);
        self.inner.store(value.clone())?;
        block.store.store(value)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        self.tasks.close();
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::sequenced_value::{IndexedValue, SequencedValue};
    use crate::query::value::Value;
    use chrono::Utc;

    fn adapter() -> RecordAdapter<i32> {
        RecordAdapter {
            projector: Arc::new(|v: &i32| Value::Int(*v)),
            timestamp_of: Arc::new(|_: &i32| Utc::now()),
        }
    }

    // S7 — Cached block coverage.
    #[test]
    fn head_and_tail_queries_are_covered_through_an_empty_cache() {
        let inner = LocalDataStore::new(adapter());
        for s in 1..=10u64 {
            inner
                .store(SequencedValue::new(IndexedValue::new(s as i32, "X"), Sequence::new(s)))
                .unwrap();
        }
        let store = CachedDataStore::new(inner, 4, adapter());

        let head = store
            .load(
                &BasicQuery::new("X")
                    .with_range(Range::new(Sequence::new(3), Sequence::new(8)))
                    .with_snapshot_limit(SnapshotLimit::new(SnapshotLimitType::Head, 4)),
            )
            .unwrap();
        let head_seqs: Vec<u64> = head.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(head_seqs, vec![3, 4, 5, 6]);

        let tail = store
            .load(
                &BasicQuery::new("X")
                    .with_range(Range::new(Sequence::new(3), Sequence::new(8)))
                    .with_snapshot_limit(SnapshotLimit::new(SnapshotLimitType::Tail, 4)),
            )
            .unwrap();
        let tail_seqs: Vec<u64> = tail.iter().map(|v| v.sequence().ordinal()).collect();
        assert_eq!(tail_seqs, vec![5, 6, 7, 8]);
    }
}
