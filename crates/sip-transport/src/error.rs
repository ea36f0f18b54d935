use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport layer
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Codec or message-model failure
    #[error(transparent)]
    Core(#[from] sipflow_sip_core::Error),

    /// An argument the caller supplied is unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The rendered message does not fit the transport
    #[error("message of {size} bytes exceeds the {limit} byte limit of an unreliable transport")]
    MessageTooLarge {
        /// Rendered size
        size: usize,
        /// Transport limit
        limit: usize,
    },

    /// The transport is closed or closing
    #[error("transport closed")]
    TransportClosed,

    /// No transport is tracked that could carry the message
    #[error("no transport available")]
    NoTransport,

    /// Every response routing candidate failed
    #[error("no target reachable: {0}")]
    NoTarget(String),

    /// A connection to this peer does not exist and dialing was not allowed
    #[error("no open connection to {0}")]
    ConnectionNotFound(SocketAddr),

    /// DNS resolution failed or yielded nothing
    #[error("resolve failed for {host}: {message}")]
    Resolve {
        /// Host that failed to resolve
        host: String,
        /// Resolver error text
        message: String,
    },

    /// Underlying socket failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// True when the error means the transport is gone for good rather than
    /// a per-message failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::TransportClosed)
    }
}
