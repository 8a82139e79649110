// Query subsystem: coordinates, expression AST, evaluator, query objects,
// and the layered data store stack.

pub mod sequence;
pub mod range;
pub mod snapshot_limit;
pub mod value;
pub mod sequenced_value;
pub mod expression;
pub mod evaluator;
pub mod basic_query;
pub mod data_store;
pub mod task_queue;
pub mod local_store;
pub mod buffered_store;
pub mod cached_store;
pub mod session_cached_store;
pub mod async_store;
pub mod sequencer;
pub mod subscription;
pub mod sql_translator;

pub use sequence::Sequence;
pub use range::{Range, RangePoint};
pub use snapshot_limit::{SnapshotLimit, SnapshotLimitType};
pub use value::{Value, ValueType};
pub use sequenced_value::{IndexedValue, SequencedValue};
pub use expression::{Expression, ExpressionVisitor, TraversalExpressionVisitor};
pub use evaluator::{AccessorRegistry, Evaluator, EvaluatorTranslator};
pub use basic_query::{BasicQuery, InterruptionPolicy};
pub use data_store::DataStore;
pub use local_store::LocalDataStore;
pub use buffered_store::BufferedDataStore;
pub use cached_store::CachedDataStore;
pub use session_cached_store::SessionCachedDataStore;
pub use async_store::AsyncDataStore;
pub use sequencer::Sequencer;
pub use subscription::{Listener, ListenerSender, SequencedPublisher, SubscriptionRegistry};
pub use sql_translator::SqlTranslator;
