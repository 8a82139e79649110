//! SnapshotLimit: HEAD/TAIL truncation tag (SPEC_FULL.md §4.3).

use super::sequenced_value::SequencedValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotLimitType {
    Head,
    Tail,
}

/// A truncation rule: keep the first (`Head`) or last (`Tail`) `size`
/// matches by sequence. Size 0 coerces to `Head` regardless of the
/// requested tag (S3 in SPEC_FULL.md §8), and negative sizes normalize to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLimit {
    limit_type: SnapshotLimitType,
    size: i32,
}

impl SnapshotLimit {
    pub const NONE: SnapshotLimit = SnapshotLimit {
        limit_type: SnapshotLimitType::Head,
        size: 0,
    };

    pub const UNLIMITED: SnapshotLimit = SnapshotLimit {
        limit_type: SnapshotLimitType::Head,
        size: i32::MAX,
    };

    pub fn new(limit_type: SnapshotLimitType, size: i32) -> Self {
        let size = size.max(0);
        if size == 0 {
            SnapshotLimit {
                limit_type: SnapshotLimitType::Head,
                size: 0,
            }
        } else {
            SnapshotLimit { limit_type, size }
        }
    }

    pub fn limit_type(&self) -> SnapshotLimitType {
        self.limit_type
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn is_unlimited(&self) -> bool {
        self.size == i32::MAX
    }
}

/// Applies the truncation rule shared across every store and wrapper
/// (spec.md §4.3): `items` must already be sorted ascending by sequence.
/// HEAD keeps the lowest-sequence prefix, TAIL the highest-sequence
/// suffix; either way the result stays ascending.
pub fn truncate<T>(mut items: Vec<SequencedValue<T>>, limit: SnapshotLimit) -> Vec<SequencedValue<T>> {
    let size = limit.size() as usize;
    if items.len() <= size {
        return items;
    }
    match limit.limit_type() {
        SnapshotLimitType::Head => {
            items.truncate(size);
            items
        }
        SnapshotLimitType::Tail => items.split_off(items.len() - size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_coerces_to_head_regardless_of_tag() {
        assert_eq!(
            SnapshotLimit::new(SnapshotLimitType::Head, 0),
            SnapshotLimit::new(SnapshotLimitType::Tail, 0)
        );
    }

    #[test]
    fn distinct_tags_with_nonzero_size_differ() {
        assert_ne!(
            SnapshotLimit::new(SnapshotLimitType::Head, 5),
            SnapshotLimit::new(SnapshotLimitType::Tail, 5)
        );
    }

    #[test]
    fn negative_size_normalizes_to_zero() {
        let limit = SnapshotLimit::new(SnapshotLimitType::Head, -3);
        assert_eq!(limit.size(), 0);
        assert_eq!(limit, SnapshotLimit::NONE);
    }

    #[test]
    fn truncate_head_keeps_lowest_sequence_prefix() {
        use super::super::sequence::Sequence;
        let items = (1..=5)
            .map(|i| SequencedValue::new(i, Sequence::new(i as u64)))
            .collect();
        let kept = truncate(items, SnapshotLimit::new(SnapshotLimitType::Head, 2));
        let values: Vec<_> = kept.iter().map(|v| *v.value()).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn truncate_tail_keeps_highest_sequence_suffix_ascending() {
        use super::super::sequence::Sequence;
        let items = (1..=5)
            .map(|i| SequencedValue::new(i, Sequence::new(i as u64)))
            .collect();
        let kept = truncate(items, SnapshotLimit::new(SnapshotLimitType::Tail, 2));
        let values: Vec<_> = kept.iter().map(|v| *v.value()).collect();
        assert_eq!(values, vec![4, 5]);
    }
}
