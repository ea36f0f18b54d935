//! # SIP Status Codes
//!
//! Response status codes per [RFC 3261 Section 21](https://datatracker.ietf.org/doc/html/rfc3261#section-21).
//! Any value in 100..=699 is representable; named constants cover the codes
//! the stack itself emits, and `canonical_reason` supplies the standard
//! reason phrases for the common set.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A response status code in the range 100..=699.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatusCode(u16);

impl StatusCode {
    /// 100 Trying
    pub const TRYING: StatusCode = StatusCode(100);
    /// 180 Ringing
    pub const RINGING: StatusCode = StatusCode(180);
    /// 183 Session Progress
    pub const SESSION_PROGRESS: StatusCode = StatusCode(183);
    /// 200 OK
    pub const OK: StatusCode = StatusCode(200);
    /// 400 Bad Request
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// 401 Unauthorized
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    /// 403 Forbidden
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    /// 404 Not Found
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    /// 405 Method Not Allowed
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    /// 407 Proxy Authentication Required
    pub const PROXY_AUTHENTICATION_REQUIRED: StatusCode = StatusCode(407);
    /// 408 Request Timeout
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    /// 413 Request Entity Too Large
    pub const REQUEST_ENTITY_TOO_LARGE: StatusCode = StatusCode(413);
    /// 481 Call/Transaction Does Not Exist
    pub const CALL_OR_TRANSACTION_DOES_NOT_EXIST: StatusCode = StatusCode(481);
    /// 486 Busy Here
    pub const BUSY_HERE: StatusCode = StatusCode(486);
    /// 487 Request Terminated
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(487);
    /// 500 Server Internal Error
    pub const SERVER_INTERNAL_ERROR: StatusCode = StatusCode(500);
    /// 503 Service Unavailable
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    /// 603 Decline
    pub const DECLINE: StatusCode = StatusCode(603);

    /// Validates and wraps a raw code.
    pub fn new(code: u16) -> Result<Self> {
        if (100..=699).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(Error::InvalidStatusCode(code))
        }
    }

    /// The raw numeric code.
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// 100..=199
    pub fn is_provisional(&self) -> bool {
        self.0 < 200
    }

    /// 200..=699
    pub fn is_final(&self) -> bool {
        self.0 >= 200
    }

    /// 200..=299
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 300..=699
    pub fn is_failure(&self) -> bool {
        self.0 >= 300
    }

    /// The reason phrase RFC 3261 registers for this code, when one exists.
    pub fn canonical_reason(&self) -> Option<&'static str> {
        let reason = match self.0 {
            100 => "Trying",
            180 => "Ringing",
            181 => "Call Is Being Forwarded",
            182 => "Queued",
            183 => "Session Progress",
            200 => "OK",
            202 => "Accepted",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Moved Temporarily",
            305 => "Use Proxy",
            380 => "Alternative Service",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            410 => "Gone",
            413 => "Request Entity Too Large",
            414 => "Request-URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Unsupported URI Scheme",
            420 => "Bad Extension",
            421 => "Extension Required",
            423 => "Interval Too Brief",
            480 => "Temporarily Unavailable",
            481 => "Call/Transaction Does Not Exist",
            482 => "Loop Detected",
            483 => "Too Many Hops",
            484 => "Address Incomplete",
            485 => "Ambiguous",
            486 => "Busy Here",
            487 => "Request Terminated",
            488 => "Not Acceptable Here",
            491 => "Request Pending",
            493 => "Undecipherable",
            500 => "Server Internal Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Server Time-out",
            505 => "Version Not Supported",
            513 => "Message Too Large",
            600 => "Busy Everywhere",
            603 => "Decline",
            604 => "Does Not Exist Anywhere",
            606 => "Not Acceptable",
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        StatusCode::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check() {
        assert!(StatusCode::new(100).is_ok());
        assert!(StatusCode::new(699).is_ok());
        assert!(StatusCode::new(99).is_err());
        assert!(StatusCode::new(700).is_err());
    }

    #[test]
    fn classification() {
        assert!(StatusCode::TRYING.is_provisional());
        assert!(StatusCode::OK.is_final());
        assert!(StatusCode::OK.is_success());
        assert!(StatusCode::BUSY_HERE.is_failure());
        assert!(!StatusCode::RINGING.is_final());
    }

    #[test]
    fn reasons() {
        assert_eq!(StatusCode::OK.canonical_reason(), Some("OK"));
        assert_eq!(
            StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST.canonical_reason(),
            Some("Call/Transaction Does Not Exist")
        );
        assert_eq!(StatusCode::new(299).unwrap().canonical_reason(), None);
    }
}
