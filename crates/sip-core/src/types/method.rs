//! # SIP Method
//!
//! Request methods as defined in [RFC 3261 Section 7.1](https://datatracker.ietf.org/doc/html/rfc3261#section-7.1)
//! and its extensions. Unknown but grammatically valid tokens are preserved
//! in the `Extension` variant rather than rejected, as required for a
//! forward-compatible core.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A SIP request method
///
/// The two transaction families of RFC 3261 Section 17 are keyed off this
/// type: `INVITE` (and its `ACK`) run the INVITE state machines, everything
/// else runs the non-INVITE ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// INVITE: initiate a session
    Invite,
    /// ACK: acknowledge a final response to INVITE
    Ack,
    /// BYE: terminate a session
    Bye,
    /// CANCEL: cancel a pending request
    Cancel,
    /// REGISTER: bind contact information
    Register,
    /// OPTIONS: query capabilities
    Options,
    /// SUBSCRIBE: request event notification (RFC 6665)
    Subscribe,
    /// NOTIFY: deliver an event notification (RFC 6665)
    Notify,
    /// REFER: ask the recipient to issue a request (RFC 3515)
    Refer,
    /// MESSAGE: instant message (RFC 3428)
    Message,
    /// INFO: mid-session information (RFC 6086)
    Info,
    /// UPDATE: modify session state before answer (RFC 3311)
    Update,
    /// PRACK: acknowledge a reliable provisional response (RFC 3262)
    Prack,
    /// Any other token
    Extension(String),
}

impl Method {
    /// Canonical (upper-case) spelling of the method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Message => "MESSAGE",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Prack => "PRACK",
            Method::Extension(name) => name,
        }
    }

    /// True for `INVITE`.
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }

    /// True for `ACK`.
    pub fn is_ack(&self) -> bool {
        matches!(self, Method::Ack)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(is_token_byte) {
            return Err(Error::InvalidMethod(s.to_string()));
        }
        Ok(match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            "MESSAGE" => Method::Message,
            "INFO" => Method::Info,
            "UPDATE" => Method::Update,
            "PRACK" => Method::Prack,
            other => Method::Extension(other.to_string()),
        })
    }
}

// token per RFC 3261 Section 25.1
pub(crate) fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.' | b'!' | b'%' | b'*' | b'_' | b'+' | b'`' | b'\'' | b'~'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_methods() {
        assert_eq!(Method::from_str("INVITE").unwrap(), Method::Invite);
        assert_eq!(Method::from_str("ACK").unwrap(), Method::Ack);
        assert_eq!(Method::from_str("OPTIONS").unwrap(), Method::Options);
    }

    #[test]
    fn preserves_extension_methods() {
        let m = Method::from_str("PUBLISH").unwrap();
        assert_eq!(m, Method::Extension("PUBLISH".to_string()));
        assert_eq!(m.as_str(), "PUBLISH");
    }

    #[test]
    fn rejects_non_token() {
        assert!(Method::from_str("IN VITE").is_err());
        assert!(Method::from_str("").is_err());
    }
}
