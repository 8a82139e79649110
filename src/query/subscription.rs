//! Subscription registry and historical/live splice (SPEC_FULL.md §4.10).
//!
//! Decomposed into small, independently callable steps
//! (`begin_buffering` / `historical_load` / `splice`, composed by
//! `monitor`) so the historical→live race the splice must get right can be
//! driven deterministically in tests rather than through real concurrency.

use super::basic_query::{BasicQuery, InterruptionPolicy};
use super::data_store::DataStore;
use super::evaluator::{AccessorRegistry, EvaluatorTranslator};
use super::expression::Expression;
use super::local_store::RecordAdapter;
use super::sequence::Sequence;
use super::sequenced_value::SequencedIndexedValue;
use crate::error::{QueryError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;

pub type ListenerSender<T, I> =
    crossbeam::channel::Sender<std::result::Result<SequencedIndexedValue<T, I>, QueryError>>;

type RecoverFn<T, I> =
    Arc<dyn Fn(Sequence, Sequence) -> Result<Vec<SequencedIndexedValue<T, I>>> + Send + Sync>;

enum Mode<T, I> {
    Buffering(Vec<SequencedIndexedValue<T, I>>),
    Live(ListenerSender<T, I>),
    Broken,
}

struct ListenerState<T, I> {
    mode: Mode<T, I>,
    last_delivered: Option<Sequence>,
}

/// A single registration: a compiled filter plus a destination queue,
/// buffering live updates until the splice switches it to `Live`.
pub struct Listener<T, I> {
    evaluator: Mutex<super::evaluator::Evaluator>,
    adapter: RecordAdapter<T>,
    interruption_policy: InterruptionPolicy,
    recover: Option<RecoverFn<T, I>>,
    state: Mutex<ListenerState<T, I>>,
}

impl<T, I> Listener<T, I>
where
    T: Clone,
    I: Clone,
{
    fn new(
        filter: &Expression,
        accessors: AccessorRegistry,
        adapter: RecordAdapter<T>,
        interruption_policy: InterruptionPolicy,
        recover: Option<RecoverFn<T, I>>,
    ) -> Result<Arc<Self>> {
        let evaluator = EvaluatorTranslator::new(accessors).translate(filter)?;
        Ok(Arc::new(Listener {
            evaluator: Mutex::new(evaluator),
            adapter,
            interruption_policy,
            recover,
            state: Mutex::new(ListenerState {
                mode: Mode::Buffering(Vec::new()),
                last_delivered: None,
            }),
        }))
    }

    /// Evaluates the filter against `value` and, if it matches, delivers it
    /// through whichever mode this listener is currently in. Returns
    /// `false` once the listener's queue is broken, so the registry can
    /// drop it (spec.md §4.10: "drop listeners whose queue is broken").
    fn deliver(&self, value: &SequencedIndexedValue<T, I>) -> bool {
        let param = (self.adapter.projector)(value.record());
        let matches = {
            let mut evaluator = self.evaluator.lock();
            evaluator.eval(&[param]).as_bool().unwrap_or(false)
        };
        if !matches {
            return true;
        }
        let mut state = self.state.lock();
        if let Mode::Buffering(buf) = &mut state.mode {
            buf.push(value.clone());
            return true;
        }
        if matches!(state.mode, Mode::Broken) {
            return false;
        }
        let sender = match &state.mode {
            Mode::Live(sender) => sender.clone(),
            _ => return true,
        };
        // A value already covered by what this listener has seen is routine
        // duplicate suppression, never an interruption-policy concern.
        if let Some(last) = state.last_delivered {
            if value.sequence() <= last {
                return true;
            }
            if value.sequence() > last.increment() {
                return self.handle_gap(&mut state, &sender, last, value);
            }
        }
        if sender.send(Ok(value.clone())).is_err() {
            state.mode = Mode::Broken;
            return false;
        }
        state.last_delivered = Some(value.sequence());
        true
    }

    /// A live update skipped one or more sequences ahead of what this
    /// listener has delivered so far; dispatch per `interruption_policy`.
    fn handle_gap(
        &self,
        state: &mut ListenerState<T, I>,
        sender: &ListenerSender<T, I>,
        last: Sequence,
        value: &SequencedIndexedValue<T, I>,
    ) -> bool {
        match self.interruption_policy {
            InterruptionPolicy::IgnoreContinue => true,
            InterruptionPolicy::BreakQuery => {
                tracing::warn!(last_sequence = %last, "breaking query on out-of-order live update");
                let _ = sender.send(Err(QueryError::QueryInterrupted {
                    last_sequence: last.ordinal(),
                    reason: "live update skipped one or more sequences".to_string(),
                }));
                state.mode = Mode::Broken;
                false
            }
            InterruptionPolicy::RecoverData => {
                if let Some(recover) = &self.recover {
                    if let Ok(gap) = recover(last, value.sequence()) {
                        for g in gap {
                            if state.last_delivered.map_or(true, |l| g.sequence() > l) {
                                if sender.send(Ok(g.clone())).is_err() {
                                    state.mode = Mode::Broken;
                                    return false;
                                }
                                state.last_delivered = Some(g.sequence());
                            }
                        }
                    }
                }
                if state.last_delivered.map_or(true, |l| value.sequence() > l) {
                    if sender.send(Ok(value.clone())).is_err() {
                        state.mode = Mode::Broken;
                        return false;
                    }
                    state.last_delivered = Some(value.sequence());
                }
                true
            }
        }
    }
}

/// Per-index listener sets, one mutex per index guarding the walk
/// (SPEC_FULL.md §5).
pub struct SubscriptionRegistry<T, I> {
    listeners: DashMap<I, Mutex<Vec<Arc<Listener<T, I>>>>>,
}

impl<T, I> SubscriptionRegistry<T, I>
where
    T: Clone,
    I: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        SubscriptionRegistry {
            listeners: DashMap::new(),
        }
    }

    fn add(&self, index: I, listener: Arc<Listener<T, I>>) {
        self.listeners
            .entry(index)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(listener);
    }

    pub fn publish(&self, value: &SequencedIndexedValue<T, I>) {
        if let Some(bucket) = self.listeners.get(value.index()) {
            let before = bucket.lock().len();
            bucket.lock().retain(|listener| listener.deliver(value));
            let dropped = before - bucket.lock().len();
            if dropped > 0 {
                tracing::debug!(dropped, "dropped listeners with broken queues during publish");
            }
        }
    }
}

impl<T, I> Default for SubscriptionRegistry<T, I>
where
    T: Clone,
    I: Eq + Hash + Clone,
{
    fn default() -> Self {
        SubscriptionRegistry::new()
    }
}

/// Coordinates a listener's historical query with the live tail: starts
/// buffering before the historical load begins, then drains historical
/// followed by de-duplicated buffered live updates (spec.md §4.10).
pub struct SequencedPublisher<T, I, S> {
    inner: Arc<S>,
    registry: Arc<SubscriptionRegistry<T, I>>,
    accessors: AccessorRegistry,
    adapter: RecordAdapter<T>,
}

impl<T, I, S> SequencedPublisher<T, I, S>
where
    T: Clone + Send + Sync + 'static,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: DataStore<T, I> + 'static,
{
    pub fn new(inner: S, accessors: AccessorRegistry, adapter: RecordAdapter<T>) -> Self {
        SequencedPublisher {
            inner: Arc::new(inner),
            registry: Arc::new(SubscriptionRegistry::new()),
            accessors,
            adapter,
        }
    }

    /// Fans `value` out to every registered listener on its index.
    pub fn publish(&self, value: SequencedIndexedValue<T, I>) {
        self.registry.publish(&value);
    }

    fn recover_fn(&self, index: &I) -> RecoverFn<T, I> {
        let inner = self.inner.clone();
        let index = index.clone();
        Arc::new(move |after: Sequence, before: Sequence| {
            let query = BasicQuery::new(index.clone()).with_range(super::range::Range::new(
                after.increment(),
                before.decrement(),
            ));
            inner.load(&query)
        })
    }

    /// Registers a listener in buffering mode, ahead of the historical
    /// query that `monitor` is about to issue.
    pub fn begin_buffering(
        &self,
        index: I,
        filter: &Expression,
        interruption_policy: InterruptionPolicy,
    ) -> Result<Arc<Listener<T, I>>> {
        let recover = self.recover_fn(&index);
        let listener = Listener::new(
            filter,
            self.accessors.clone(),
            self.adapter.clone(),
            interruption_policy,
            Some(recover),
        )?;
        self.registry.add(index, listener.clone());
        Ok(listener)
    }

    pub fn historical_load(&self, query: &BasicQuery<I>) -> Result<Vec<SequencedIndexedValue<T, I>>> {
        self.inner.load(query)
    }

    /// Drains `historical` to `sender`, then switches `listener` to live
    /// delivery and drains whatever it buffered while the historical load
    /// was in flight, discarding anything already covered by `historical`.
    pub fn splice(
        &self,
        listener: &Arc<Listener<T, I>>,
        historical: Vec<SequencedIndexedValue<T, I>>,
        sender: ListenerSender<T, I>,
    ) -> Result<()> {
        let last_historical = historical.last().map(|v| v.sequence());
        for v in &historical {
            if sender.send(Ok(v.clone())).is_err() {
                listener.state.lock().mode = Mode::Broken;
                return Ok(());
            }
        }
        let buffered = {
            let mut state = listener.state.lock();
            let previous = std::mem::replace(&mut state.mode, Mode::Live(sender.clone()));
            state.last_delivered = last_historical;
            match previous {
                Mode::Buffering(buf) => buf,
                _ => Vec::new(),
            }
        };
        for v in buffered {
            if last_historical.map_or(false, |last| v.sequence() <= last) {
                continue;
            }
            if sender.send(Ok(v.clone())).is_err() {
                listener.state.lock().mode = Mode::Broken;
                return Ok(());
            }
            let mut state = listener.state.lock();
            if state.last_delivered.map_or(true, |last| v.sequence() > last) {
                state.last_delivered = Some(v.sequence());
            }
        }
        Ok(())
    }

    /// Registers `query` against this publisher: buffer live updates,
    /// issue the historical load, then splice the two together.
    pub fn monitor(&self, query: BasicQuery<I>, sender: ListenerSender<T, I>) -> Result<()> {
        let listener =
            self.begin_buffering(query.index().clone(), query.filter(), query.interruption_policy())?;
        let historical = self.historical_load(&query)?;
        self.splice(&listener, historical, sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::local_store::LocalDataStore;
    use crate::query::range::Range;
    use crate::query::sequenced_value::{IndexedValue, SequencedValue};
    use crate::query::value::Value;
    use chrono::Utc;

    fn adapter() -> RecordAdapter<i32> {
        RecordAdapter {
            projector: Arc::new(|v: &i32| Value::Int(*v)),
            timestamp_of: Arc::new(|_: &i32| Utc::now()),
        }
    }

    // S8 — Historical/live splice with duplicate suppression.
    #[test]
    fn live_update_arriving_during_the_historical_load_is_appended_without_duplicates() {
        let inner = LocalDataStore::new(adapter());
        for s in 1..=3u64 {
            inner
                .store(SequencedValue::new(IndexedValue::new(s as i32, "X"), Sequence::new(s)))
                .unwrap();
        }
        let publisher = SequencedPublisher::new(inner, AccessorRegistry::new(), adapter());
        let query = BasicQuery::new("X").with_range(Range::total());
        let listener = publisher
            .begin_buffering("X", query.filter(), query.interruption_policy())
            .unwrap();

        // Simulates a write landing while the historical load is still in flight.
        publisher.publish(SequencedValue::new(IndexedValue::new(4, "X"), Sequence::new(4)));

        let historical = publisher.historical_load(&query).unwrap();
        let (sender, receiver) = crossbeam::channel::unbounded();
        publisher.splice(&listener, historical, sender).unwrap();

        let received: Vec<u64> = receiver
            .try_iter()
            .map(|r| r.unwrap().sequence().ordinal())
            .collect();
        assert_eq!(received, vec![1, 2, 3, 4]);
    }

    #[test]
    fn live_update_already_covered_by_the_historical_load_is_suppressed() {
        let inner = LocalDataStore::new(adapter());
        for s in 1..=3u64 {
            inner
                .store(SequencedValue::new(IndexedValue::new(s as i32, "X"), Sequence::new(s)))
                .unwrap();
        }
        let publisher = SequencedPublisher::new(inner, AccessorRegistry::new(), adapter());
        let query = BasicQuery::new("X").with_range(Range::total());
        let listener = publisher
            .begin_buffering("X", query.filter(), query.interruption_policy())
            .unwrap();

        publisher.publish(SequencedValue::new(IndexedValue::new(2, "X"), Sequence::new(2)));

        let historical = publisher.historical_load(&query).unwrap();
        let (sender, receiver) = crossbeam::channel::unbounded();
        publisher.splice(&listener, historical, sender).unwrap();

        let received: Vec<u64> = receiver
            .try_iter()
            .map(|r| r.unwrap().sequence().ordinal())
            .collect();
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn break_query_sends_an_interrupted_error_on_out_of_order_live_update() {
        let inner = LocalDataStore::new(adapter());
        let publisher = SequencedPublisher::new(inner, AccessorRegistry::new(), adapter());
        let query = BasicQuery::new("X")
            .with_range(Range::total())
            .with_interruption_policy(InterruptionPolicy::BreakQuery);
        let listener = publisher
            .begin_buffering("X", query.filter(), query.interruption_policy())
            .unwrap();
        let (sender, receiver) = crossbeam::channel::unbounded();
        publisher.splice(&listener, Vec::new(), sender).unwrap();

        publisher.publish(SequencedValue::new(IndexedValue::new(1, "X"), Sequence::new(1)));
        publisher.publish(SequencedValue::new(IndexedValue::new(2, "X"), Sequence::new(5)));

        let received: Vec<_> = receiver.try_iter().collect();
        assert!(received[0].is_ok());
        assert!(matches!(received[1], Err(QueryError::QueryInterrupted { .. })));
    }
}
