use thiserror::Error;

/// Error taxonomy for the query subsystem (see SPEC_FULL.md §7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("IO error: {0}")]
    Io(String),

    /// Expression constructed (or deserialized) with incompatible child
    /// types. Raised eagerly so downstream code can assume a well-typed
    /// tree.
    #[error("type compatibility error: {0}")]
    TypeCompatibility(String),

    /// Translator could not compile an AST into an evaluator: unknown
    /// function, arity mismatch, unresolved variable, too many parameters,
    /// or a type-overload miss.
    #[error("expression translation error: {0}")]
    ExpressionTranslation(String),

    /// A received AST or value violated a typing invariant on the wire.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A live subscription observed an ordering gap under the
    /// `BREAK_QUERY` interruption policy. Carries the last sequence the
    /// listener was known to have received.
    #[error("query interrupted after sequence {last_sequence}: {reason}")]
    QueryInterrupted {
        last_sequence: u64,
        reason: String,
    },

    /// Generic inner-store failure during load/store.
    #[error("data store error: {0}")]
    DataStore(String),

    /// A store rejected a write because it was out of sequence order or a
    /// duplicate.
    #[error("out-of-order or duplicate write: {0}")]
    SequenceViolation(String),

    /// Operation attempted on a store that is closing or closed.
    #[error("not connected: store is closed")]
    NotConnected,

    #[error("end of file")]
    EndOfFile,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        QueryError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
