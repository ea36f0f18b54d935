use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transaction layer
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Message-model or codec failure
    #[error(transparent)]
    Core(#[from] sipflow_sip_core::Error),

    /// Transport failure while sending or serving
    #[error(transparent)]
    Transport(#[from] sipflow_sip_transport::Error),

    /// No transaction is stored under this key
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// The message could not be matched to any transaction
    #[error("message does not match a transaction: {0}")]
    TransactionNotMatched(String),

    /// The event is not legal in the transaction's current state
    #[error("{action} not allowed in {state} state")]
    TransactionActionNotAllowed {
        /// Attempted action
        action: String,
        /// State the transaction was in
        state: String,
    },

    /// A transaction timer (B, F or H) expired without resolution
    #[error("transaction timed out")]
    TransactionTimedOut,

    /// The layer is closing and accepts no new work
    #[error("transaction layer closed")]
    TransactionLayerClosed,

    /// A message the layer cannot do anything with
    #[error("unhandled message: {0}")]
    UnhandledMessage(String),

    /// Snapshot serialization or restoration failure
    #[error("snapshot error: {0}")]
    Snapshot(String),
}
