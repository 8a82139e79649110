// Beam query subsystem — typed expression AST, evaluator synthesizer,
// Sequence/Range/SnapshotLimit coordinates, and the layered data store
// stack (local, buffered, cached, session-cached, async) with live
// subscriptions.

pub mod error;
pub mod query;

pub use error::{QueryError, Result};

/// Tuning knobs for the data store stack.
#[derive(Debug, Clone)]
pub struct QueryStoreConfig {
    /// Number of writes `BufferedDataStore` accumulates before flushing to
    /// its inner store.
    pub buffer_size: usize,
    /// Sequence ordinals per block in `CachedDataStore`.
    pub cache_block_size: u64,
    /// Rolling-window size for `SessionCachedDataStore`.
    pub session_cache_block_size: usize,
    /// Bounded-channel capacity used by subscription queues and async
    /// write queues.
    pub queue_capacity: usize,
}

impl Default for QueryStoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            cache_block_size: 1024,
            session_cache_block_size: 1000,
            queue_capacity: 1000,
        }
    }
}

impl QueryStoreConfig {
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_cache_block_size(mut self, size: u64) -> Self {
        self.cache_block_size = size;
        self
    }

    pub fn with_session_cache_block_size(mut self, size: usize) -> Self {
        self.session_cache_block_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, size: usize) -> Self {
        self.queue_capacity = size;
        self
    }
}
