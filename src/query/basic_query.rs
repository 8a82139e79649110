//! BasicQuery: the query object passed to `DataStore::load` and
//! `Subscription::subscribe` (SPEC_FULL.md §4.4).

use super::expression::Expression;
use super::range::Range;
use super::snapshot_limit::SnapshotLimit;
use super::value::Value;

/// What a live subscription should do when an update arrives out of order
/// relative to buffered state (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionPolicy {
    /// Break the listener's queue and surface a `QueryInterrupted` error.
    BreakQuery,
    /// Re-issue a recovery load for the gap, then resume live.
    RecoverData,
    /// Drop the out-of-order update and continue.
    IgnoreContinue,
}

/// A request to load (or subscribe to) the records of index `I` within
/// `range`, keeping only those for which `filter` evaluates to `true`, and
/// truncated to `snapshot_limit`.
#[derive(Debug, Clone)]
pub struct BasicQuery<I> {
    index: I,
    range: Range,
    snapshot_limit: SnapshotLimit,
    filter: Expression,
    interruption_policy: InterruptionPolicy,
}

impl<I> BasicQuery<I> {
    pub fn new(index: I) -> Self {
        BasicQuery {
            index,
            range: Range::total(),
            snapshot_limit: SnapshotLimit::UNLIMITED,
            filter: Expression::constant(Value::Bool(true)),
            interruption_policy: InterruptionPolicy::BreakQuery,
        }
    }

    /// The most recent record only: `HISTORICAL` range, `TAIL` limit 1
    /// (spec.md §4.4: "current value query").
    pub fn current(index: I) -> Self {
        BasicQuery::new(index)
            .with_range(Range::historical())
            .with_snapshot_limit(SnapshotLimit::new(super::snapshot_limit::SnapshotLimitType::Tail, 1))
    }

    /// Every record from now on: `REAL_TIME` range, unlimited.
    pub fn real_time(index: I) -> Self {
        BasicQuery::new(index).with_range(Range::real_time())
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn snapshot_limit(&self) -> SnapshotLimit {
        self.snapshot_limit
    }

    pub fn filter(&self) -> &Expression {
        &self.filter
    }

    pub fn interruption_policy(&self) -> InterruptionPolicy {
        self.interruption_policy
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = range;
        self
    }

    pub fn with_snapshot_limit(mut self, snapshot_limit: SnapshotLimit) -> Self {
        self.snapshot_limit = snapshot_limit;
        self
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_interruption_policy(mut self, policy: InterruptionPolicy) -> Self {
        self.interruption_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::range::RangePoint;
    use crate::query::sequence::Sequence;
    use crate::query::snapshot_limit::SnapshotLimitType;

    #[test]
    fn current_query_is_tail_one_of_historical() {
        let q = BasicQuery::current("AAPL");
        assert_eq!(q.range().end(), RangePoint::Sequence(Sequence::PRESENT));
        assert_eq!(q.snapshot_limit().limit_type(), SnapshotLimitType::Tail);
        assert_eq!(q.snapshot_limit().size(), 1);
    }

    #[test]
    fn real_time_query_is_unlimited_from_present() {
        let q = BasicQuery::real_time("AAPL");
        assert_eq!(q.range().start(), RangePoint::Sequence(Sequence::PRESENT));
        assert!(q.snapshot_limit().is_unlimited());
    }

    #[test]
    fn default_filter_accepts_everything() {
        let q = BasicQuery::new("AAPL");
        assert_eq!(q.filter().as_constant(), Some(&Value::Bool(true)));
    }
}
