use std::str::Utf8Error;
use thiserror::Error;

use crate::types::message::Message;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Phase the message parser was in when an error was raised.
///
/// SIP messages are parsed in three phases: the start line (request line or
/// status line), the header block, and the body framed by `Content-Length`.
/// Transports use the phase together with the error kind to decide whether a
/// `400`, `413` or `500` reply is appropriate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    /// Reading the Request-Line or Status-Line
    StartLine,
    /// Reading header lines up to the empty line
    Headers,
    /// Reading the message body
    Body,
}

/// Errors that can occur in SIP message handling
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Invalid SIP method token
    #[error("invalid SIP method: {0}")]
    InvalidMethod(String),

    /// Invalid SIP version literal (only `SIP/2.0` is understood)
    #[error("invalid SIP version: {0}")]
    InvalidVersion(String),

    /// Status code outside the 100..=699 range
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Invalid SIP, SIPS or tel URI
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// A header line that does not satisfy its grammar
    #[error("invalid {name} header: {message}")]
    InvalidHeader {
        /// Canonical header name
        name: String,
        /// What went wrong
        message: String,
    },

    /// A structurally broken message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An argument the caller supplied is unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A header that every valid message must carry is absent
    #[error("missing mandatory header: {0}")]
    MissingHeader(String),

    /// A line or accumulated message crossed the parser size cap
    #[error("message exceeds maximum size: {0} bytes")]
    MessageTooLarge(usize),

    /// Declared `Content-Length` crosses the size cap; the body is never
    /// buffered in this case
    #[error("declared body of {0} bytes exceeds maximum message size")]
    EntityTooLarge(usize),

    /// The request method is understood but not acceptable here
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Invalid UTF-8 where text was required
    #[error("invalid UTF-8 sequence: {0}")]
    Utf8(#[from] Utf8Error),

    /// Codec failure with the phase it happened in and whatever part of the
    /// message had already been assembled.
    ///
    /// The partial message is kept so a transport can still address an error
    /// reply when the routing headers (Via, From, To, Call-ID, CSeq) made it
    /// through before the failure.
    #[error("parse failed in {phase:?} phase: {cause}")]
    Parse {
        /// Parser phase at the point of failure
        phase: ParsePhase,
        /// Underlying error
        cause: Box<Error>,
        /// Message assembled so far, if the start line was readable
        partial: Option<Box<Message>>,
    },
}

impl Error {
    /// Wraps an error into a phase-tagged parse error.
    pub fn parse(phase: ParsePhase, cause: Error, partial: Option<Message>) -> Self {
        Error::Parse {
            phase,
            cause: Box::new(cause),
            partial: partial.map(Box::new),
        }
    }

    /// Innermost error of a [`Error::Parse`] chain, `self` otherwise.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Parse { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Partial message attached to a parse error, if any.
    pub fn partial_message(&self) -> Option<&Message> {
        match self {
            Error::Parse { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }

    /// True when the root cause is an oversized declared body.
    pub fn is_entity_too_large(&self) -> bool {
        matches!(self.root_cause(), Error::EntityTooLarge(_))
    }

    /// True when the root cause is an oversized line or stream segment.
    pub fn is_message_too_large(&self) -> bool {
        matches!(self.root_cause(), Error::MessageTooLarge(_))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::InvalidMessage(format!("failed to parse integer: {}", err))
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        Error::InvalidMessage(format!("parser error: {:?}", err))
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&'a str>>) -> Self {
        Error::InvalidMessage(format!("parser error: {:?}", err))
    }
}
