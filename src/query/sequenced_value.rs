//! SequencedValue and IndexedValue (SPEC_FULL.md §3).

use super::sequence::Sequence;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A payload paired with the [`Sequence`] a store assigned it. Equality
/// compares both fields; ordering compares the sequence only, so a
/// `Vec<SequencedValue<T>>` sorts into sequence order regardless of payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedValue<T> {
    value: T,
    sequence: Sequence,
}

impl<T> SequencedValue<T> {
    pub fn new(value: T, sequence: Sequence) -> Self {
        SequencedValue { value, sequence }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }
}

impl<T: PartialEq> PartialOrd for SequencedValue<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Ord for SequencedValue<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

/// A record belonging to a partition key `I` (the "index"), before a
/// sequence has necessarily been resolved into a [`SequencedValue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedValue<T, I> {
    value: T,
    index: I,
}

impl<T, I> IndexedValue<T, I> {
    pub fn new(value: T, index: I) -> Self {
        IndexedValue { value, index }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn into_parts(self) -> (T, I) {
        (self.value, self.index)
    }
}

/// A `SequencedValue` whose payload is itself indexed — the unit a data
/// store's `store` operation accepts (spec.md §2: "caller submits
/// `IndexedValue{record, index, sequence}`").
pub type SequencedIndexedValue<T, I> = SequencedValue<IndexedValue<T, I>>;

impl<T, I> SequencedIndexedValue<T, I> {
    pub fn record(&self) -> &T {
        self.value().value()
    }

    pub fn index(&self) -> &I {
        self.value().index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_compares_both_fields() {
        let a = SequencedValue::new(1, Sequence::new(1));
        let b = SequencedValue::new(1, Sequence::new(2));
        let c = SequencedValue::new(2, Sequence::new(1));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, SequencedValue::new(1, Sequence::new(1)));
    }

    #[test]
    fn ordering_is_by_sequence_only() {
        let a = SequencedValue::new(99, Sequence::new(1));
        let b = SequencedValue::new(1, Sequence::new(2));
        assert!(a < b);
    }

    #[test]
    fn sorts_into_sequence_order() {
        let mut values = vec![
            SequencedValue::new("c", Sequence::new(3)),
            SequencedValue::new("a", Sequence::new(1)),
            SequencedValue::new("b", Sequence::new(2)),
        ];
        values.sort();
        let ordered: Vec<_> = values.iter().map(|v| *v.value()).collect();
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }
}
