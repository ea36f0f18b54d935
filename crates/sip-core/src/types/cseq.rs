//! CSeq header ([RFC 3261 Section 20.16](https://datatracker.ietf.org/doc/html/rfc3261#section-20.16)):
//! sequence number plus method, ordering requests within a dialog and
//! pairing responses with requests.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::method::Method;

/// The CSeq header value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CSeq {
    /// Sequence number
    pub seq: u32,
    /// Method this sequence number belongs to
    pub method: Method,
}

impl CSeq {
    /// Creates a CSeq.
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let seq = parts
            .next()
            .ok_or_else(|| Error::InvalidHeader {
                name: "CSeq".to_string(),
                message: "missing sequence number".to_string(),
            })?
            .parse()?;
        let method = parts
            .next()
            .ok_or_else(|| Error::InvalidHeader {
                name: "CSeq".to_string(),
                message: "missing method".to_string(),
            })?
            .parse()?;
        if parts.next().is_some() {
            return Err(Error::InvalidHeader {
                name: "CSeq".to_string(),
                message: format!("trailing data in {:?}", s),
            });
        }
        Ok(CSeq { seq, method })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders() {
        let cseq = CSeq::from_str("314159 INVITE").unwrap();
        assert_eq!(cseq, CSeq::new(314159, Method::Invite));
        assert_eq!(cseq.to_string(), "314159 INVITE");
    }

    #[test]
    fn rejects_malformed() {
        assert!(CSeq::from_str("INVITE").is_err());
        assert!(CSeq::from_str("1 INVITE extra").is_err());
    }
}
