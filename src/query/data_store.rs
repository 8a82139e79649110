//! The shared `DataStore` contract every layer in the stack implements
//! (SPEC_FULL.md §4.12): `LocalDataStore`, `BufferedDataStore`,
//! `CachedDataStore`, `SessionCachedDataStore`, and `AsyncDataStore` all
//! satisfy the same trait so they can wrap one another transparently
//! (spec.md's testable property 4).

use super::basic_query::BasicQuery;
use super::sequenced_value::SequencedIndexedValue;
use crate::error::Result;

/// A store of records of type `T` partitioned by index `I`.
///
/// Implementations must uphold spec.md §4 invariants I1-I3: sequences are
/// strictly increasing per index, `load` never returns a record outside
/// the requested range, and `close` is idempotent.
pub trait DataStore<T, I>: Send + Sync {
    /// Returns the records matching `query`, in sequence order.
    fn load(&self, query: &BasicQuery<I>) -> Result<Vec<SequencedIndexedValue<T, I>>>;

    /// Appends a single record. `value.sequence()` must exceed every
    /// previously stored sequence for `value.index()`.
    fn store(&self, value: SequencedIndexedValue<T, I>) -> Result<()>;

    /// Appends a batch of records as a single logical write.
    fn store_all(&self, values: Vec<SequencedIndexedValue<T, I>>) -> Result<()> {
        for value in values {
            self.store(value)?;
        }
        Ok(())
    }

    /// Releases any held resources. Safe to call more than once.
    fn close(&self) -> Result<()>;
}
