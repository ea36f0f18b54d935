//! # SIP Parameters
//!
//! Semicolon-delimited parameters attached to URIs, Via hops and name-addr
//! headers ([RFC 3261 Section 19.1.1](https://datatracker.ietf.org/doc/html/rfc3261#section-19.1.1)).
//! Parameters the core itself reads or writes get typed variants; everything
//! else is carried verbatim in `Other`.

use std::fmt;
use serde::{Deserialize, Serialize};

/// One `;name` or `;name=value` parameter.
///
/// `Rport(None)` models the valueless `;rport` flag a client puts in its Via
/// to request symmetric response routing; the receiving transport fills in
/// the port, turning it into `Rport(Some(port))`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Param {
    /// Transaction branch identifier on a Via hop
    Branch(String),
    /// Dialog tag on From/To
    Tag(String),
    /// Source address recorded by the receiving server (RFC 3261 18.2.1)
    Received(String),
    /// Symmetric response routing port (RFC 3581)
    Rport(Option<u16>),
    /// Multicast address override for response routing
    Maddr(String),
    /// Time-to-live for multicast
    Ttl(u8),
    /// Transport selector on a URI
    Transport(String),
    /// Expiration in seconds (Contact)
    Expires(u32),
    /// Quality value (Contact)
    Q(String),
    /// Loose-routing marker on a Route URI
    Lr,
    /// Anything else, with optional value
    Other(String, Option<String>),
}

impl Param {
    /// Lower-case parameter name.
    pub fn name(&self) -> &str {
        match self {
            Param::Branch(_) => "branch",
            Param::Tag(_) => "tag",
            Param::Received(_) => "received",
            Param::Rport(_) => "rport",
            Param::Maddr(_) => "maddr",
            Param::Ttl(_) => "ttl",
            Param::Transport(_) => "transport",
            Param::Expires(_) => "expires",
            Param::Q(_) => "q",
            Param::Lr => "lr",
            Param::Other(name, _) => name,
        }
    }

    /// Parameter value, if the parameter carries one.
    pub fn value(&self) -> Option<String> {
        match self {
            Param::Branch(v)
            | Param::Tag(v)
            | Param::Received(v)
            | Param::Maddr(v)
            | Param::Transport(v)
            | Param::Q(v) => Some(v.clone()),
            Param::Rport(v) => v.map(|p| p.to_string()),
            Param::Ttl(v) => Some(v.to_string()),
            Param::Expires(v) => Some(v.to_string()),
            Param::Lr => None,
            Param::Other(_, v) => v.clone(),
        }
    }

    /// Builds the typed variant for a raw `name[=value]` pair.
    pub fn from_pair(name: &str, value: Option<&str>) -> Param {
        let lower = name.to_ascii_lowercase();
        match (lower.as_str(), value) {
            ("branch", Some(v)) => Param::Branch(v.to_string()),
            ("tag", Some(v)) => Param::Tag(v.to_string()),
            ("received", Some(v)) => Param::Received(v.to_string()),
            ("rport", None) => Param::Rport(None),
            ("rport", Some(v)) => match v.parse() {
                Ok(port) => Param::Rport(Some(port)),
                Err(_) => Param::Other(lower, Some(v.to_string())),
            },
            ("maddr", Some(v)) => Param::Maddr(v.to_string()),
            ("ttl", Some(v)) => match v.parse() {
                Ok(ttl) => Param::Ttl(ttl),
                Err(_) => Param::Other(lower, Some(v.to_string())),
            },
            ("transport", Some(v)) => Param::Transport(v.to_string()),
            ("expires", Some(v)) => match v.parse() {
                Ok(secs) => Param::Expires(secs),
                Err(_) => Param::Other(lower, Some(v.to_string())),
            },
            ("q", Some(v)) => Param::Q(v.to_string()),
            ("lr", None) => Param::Lr,
            (_, v) => Param::Other(lower, v.map(|s| s.to_string())),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(value) => write!(f, "{}={}", self.name(), value),
            None => f.write_str(self.name()),
        }
    }
}

/// Looks up a parameter by (case-insensitive) name in a parameter list.
pub fn find_param<'a>(params: &'a [Param], name: &str) -> Option<&'a Param> {
    params.iter().find(|p| p.name().eq_ignore_ascii_case(name))
}

/// Generates a random 16-character tag suitable for From/To.
pub fn generate_tag() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_pairs() {
        assert_eq!(
            Param::from_pair("branch", Some("z9hG4bK776asdhds")),
            Param::Branch("z9hG4bK776asdhds".to_string())
        );
        assert_eq!(Param::from_pair("rport", None), Param::Rport(None));
        assert_eq!(Param::from_pair("RPORT", Some("5060")), Param::Rport(Some(5060)));
        assert_eq!(Param::from_pair("lr", None), Param::Lr);
    }

    #[test]
    fn renders_flag_params_bare() {
        assert_eq!(Param::Rport(None).to_string(), "rport");
        assert_eq!(Param::Rport(Some(9)).to_string(), "rport=9");
        assert_eq!(Param::Lr.to_string(), "lr");
    }

    #[test]
    fn tag_generation_is_unique_enough() {
        let a = generate_tag();
        let b = generate_tag();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
