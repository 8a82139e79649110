//! Range: a start/end pair over sequences or timestamps (SPEC_FULL.md §4.3).

use super::sequence::Sequence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One endpoint of a [`Range`]: either a store-assigned [`Sequence`] or a
/// timestamp to be resolved against a store at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangePoint {
    Sequence(Sequence),
    Timestamp(DateTime<Utc>),
}

impl RangePoint {
    pub fn as_sequence(self) -> Option<Sequence> {
        match self {
            RangePoint::Sequence(s) => Some(s),
            RangePoint::Timestamp(_) => None,
        }
    }

    pub fn as_timestamp(self) -> Option<DateTime<Utc>> {
        match self {
            RangePoint::Timestamp(t) => Some(t),
            RangePoint::Sequence(_) => None,
        }
    }
}

impl From<Sequence> for RangePoint {
    fn from(s: Sequence) -> Self {
        RangePoint::Sequence(s)
    }
}

impl From<DateTime<Utc>> for RangePoint {
    fn from(t: DateTime<Utc>) -> Self {
        RangePoint::Timestamp(t)
    }
}

/// A start/end window. Mixed-type endpoints (one a timestamp, one a
/// sequence) are permitted and resolved by the data store at query time;
/// if both endpoints are already sequences the invariant `start <= end`
/// must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    start: RangePoint,
    end: RangePoint,
}

impl Range {
    /// Constructs a range, panicking if both endpoints are sequences and
    /// `start > end` — mirroring the source's constructor-time assertion.
    pub fn new(start: impl Into<RangePoint>, end: impl Into<RangePoint>) -> Self {
        let start = start.into();
        let end = end.into();
        if let (RangePoint::Sequence(s), RangePoint::Sequence(e)) = (start, end) {
            assert!(s <= e, "Range: start sequence must not exceed end sequence");
        }
        Range { start, end }
    }

    pub fn start(&self) -> RangePoint {
        self.start
    }

    pub fn end(&self) -> RangePoint {
        self.end
    }

    pub fn with_start(mut self, start: impl Into<RangePoint>) -> Self {
        self.start = start.into();
        self
    }

    pub fn with_end(mut self, end: impl Into<RangePoint>) -> Self {
        self.end = end.into();
        self
    }

    /// Empty range: `[LAST, FIRST]`, matching no sequences.
    pub fn empty() -> Range {
        Range {
            start: RangePoint::Sequence(Sequence::LAST),
            end: RangePoint::Sequence(Sequence::FIRST),
        }
    }

    /// `[FIRST, LAST]` — every stored record.
    pub fn total() -> Range {
        Range {
            start: RangePoint::Sequence(Sequence::FIRST),
            end: RangePoint::Sequence(Sequence::LAST),
        }
    }

    /// `[FIRST, PRESENT]` — historical data only.
    pub fn historical() -> Range {
        Range {
            start: RangePoint::Sequence(Sequence::FIRST),
            end: RangePoint::Sequence(Sequence::PRESENT),
        }
    }

    /// `[PRESENT, LAST]` — live data only.
    pub fn real_time() -> Range {
        Range {
            start: RangePoint::Sequence(Sequence::PRESENT),
            end: RangePoint::Sequence(Sequence::LAST),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_well_formed() {
        assert_eq!(Range::total().start(), RangePoint::Sequence(Sequence::FIRST));
        assert_eq!(Range::total().end(), RangePoint::Sequence(Sequence::LAST));
        assert_eq!(Range::historical().end(), RangePoint::Sequence(Sequence::PRESENT));
        assert_eq!(Range::real_time().start(), RangePoint::Sequence(Sequence::PRESENT));
    }

    #[test]
    #[should_panic]
    fn rejects_inverted_sequence_range() {
        Range::new(Sequence::new(5), Sequence::new(1));
    }

    #[test]
    fn mixed_endpoints_are_permitted() {
        let now = Utc::now();
        let r = Range::new(now, Sequence::LAST);
        assert_eq!(r.start(), RangePoint::Timestamp(now));
    }
}
