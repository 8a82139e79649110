//! Assigns strictly monotonic sequences to writes (SPEC_FULL.md §4.11).

use super::sequence::Sequence;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;

struct SequencerState {
    started: bool,
    last_timestamp_millis: u64,
    counter: u32,
}

/// Per-index `(last_timestamp, counter)` state. `next(index, timestamp)`
/// resets the counter to 0 whenever `timestamp` strictly increases over the
/// index's last-seen timestamp, and increments it otherwise, so sequences
/// produced for the same index are strictly increasing regardless of how
/// many writes share a millisecond.
pub struct Sequencer<I> {
    indices: DashMap<I, Mutex<SequencerState>>,
}

impl<I> Sequencer<I>
where
    I: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Sequencer {
            indices: DashMap::new(),
        }
    }

    pub fn next(&self, index: &I, timestamp_millis: u64) -> Sequence {
        let entry = self
            .indices
            .entry(index.clone())
            .or_insert_with(|| {
                Mutex::new(SequencerState {
                    started: false,
                    last_timestamp_millis: 0,
                    counter: 0,
                })
            });
        let mut state = entry.lock();
        if !state.started || timestamp_millis > state.last_timestamp_millis {
            state.started = true;
            state.last_timestamp_millis = timestamp_millis;
            state.counter = 0;
        } else {
            state.counter += 1;
        }
        Sequence::encode_timestamp(state.last_timestamp_millis, state.counter)
    }
}

impl<I> Default for Sequencer<I>
where
    I: Eq + Hash + Clone,
{
    fn default() -> Self {
        Sequencer::new()
    }
}
