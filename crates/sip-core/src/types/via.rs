//! # SIP Via Header
//!
//! The Via header ([RFC 3261 Section 20.42](https://datatracker.ietf.org/doc/html/rfc3261#section-20.42))
//! records the path a request has taken so responses can be routed back.
//! Each header value is a sequence of hops; the topmost hop belongs to the
//! most recent sender and carries the transaction `branch` parameter.
//!
//! Two parameters are rewritten by the receiving transport per
//! [Section 18.2.1](https://datatracker.ietf.org/doc/html/rfc3261#section-18.2.1):
//! `received` is set when the packet's source address differs from the
//! `sent-by` host, and a valueless `rport` flag is filled with the source
//! port (RFC 3581).

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use serde::{Deserialize, Serialize};

use crate::types::param::{find_param, Param};
use crate::types::uri::Host;
use crate::types::version::Version;

/// Branch parameters carrying this prefix were generated by an RFC 3261
/// implementation; anything else falls back to RFC 2543 matching rules.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// One hop of a Via header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViaHop {
    /// Protocol version from the sent-protocol part (`SIP/2.0`)
    pub version: Version,
    /// Transport token: `UDP`, `TCP`, `TLS`, ...
    pub transport: String,
    /// sent-by host
    pub host: Host,
    /// sent-by port, if present
    pub port: Option<u16>,
    /// Ordered hop parameters
    pub params: Vec<Param>,
}

impl ViaHop {
    /// A hop with the given transport and sent-by address.
    pub fn new(transport: impl Into<String>, host: Host, port: Option<u16>) -> Self {
        ViaHop {
            version: Version::SIP_2_0,
            transport: transport.into(),
            host,
            port,
            params: Vec::new(),
        }
    }

    /// The `branch` parameter.
    pub fn branch(&self) -> Option<&str> {
        match find_param(&self.params, "branch") {
            Some(Param::Branch(b)) => Some(b),
            _ => None,
        }
    }

    /// Sets or replaces the `branch` parameter.
    pub fn set_branch(&mut self, branch: impl Into<String>) {
        let branch = branch.into();
        for param in self.params.iter_mut() {
            if param.name() == "branch" {
                *param = Param::Branch(branch);
                return;
            }
        }
        self.params.push(Param::Branch(branch));
    }

    /// True when the branch exists and starts with the RFC 3261 cookie.
    pub fn is_rfc3261_branch(&self) -> bool {
        self.branch().is_some_and(|b| b.starts_with(MAGIC_COOKIE))
    }

    /// The `received` parameter.
    pub fn received(&self) -> Option<&str> {
        match find_param(&self.params, "received") {
            Some(Param::Received(v)) => Some(v),
            _ => None,
        }
    }

    /// Records the actual source address of the request.
    pub fn set_received(&mut self, addr: IpAddr) {
        let value = addr.to_string();
        for param in self.params.iter_mut() {
            if param.name() == "received" {
                *param = Param::Received(value);
                return;
            }
        }
        self.params.push(Param::Received(value));
    }

    /// The `rport` parameter: `None` when absent, `Some(None)` for the bare
    /// flag, `Some(Some(port))` once filled in.
    pub fn rport(&self) -> Option<Option<u16>> {
        match find_param(&self.params, "rport") {
            Some(Param::Rport(v)) => Some(*v),
            _ => None,
        }
    }

    /// Fills the `rport` flag with the actual source port.
    pub fn set_rport(&mut self, port: u16) {
        for param in self.params.iter_mut() {
            if param.name() == "rport" {
                *param = Param::Rport(Some(port));
                return;
            }
        }
        self.params.push(Param::Rport(Some(port)));
    }

    /// The `maddr` parameter.
    pub fn maddr(&self) -> Option<&str> {
        match find_param(&self.params, "maddr") {
            Some(Param::Maddr(v)) => Some(v),
            _ => None,
        }
    }

    /// The `ttl` parameter.
    pub fn ttl(&self) -> Option<u8> {
        match find_param(&self.params, "ttl") {
            Some(Param::Ttl(v)) => Some(*v),
            _ => None,
        }
    }

    /// Rewrites this hop from the receiving transport's point of view:
    /// `received` when the source host differs from sent-by, `rport` when
    /// the flag was present (RFC 3261 18.2.1, RFC 3581).
    pub fn rewrite_received(&mut self, source: SocketAddr) {
        let host_matches = match &self.host {
            Host::Domain(_) => false,
            host => host == &Host::from_ip(source.ip()),
        };
        if !host_matches {
            self.set_received(source.ip());
        }
        if self.rport() == Some(None) {
            self.set_rport(source.port());
        }
    }
}

impl fmt::Display for ViaHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.version, self.transport.to_ascii_uppercase(), self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for param in &self.params {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

/// A Via header value: one or more hops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via(pub Vec<ViaHop>);

impl Via {
    /// A Via with a single hop.
    pub fn single(hop: ViaHop) -> Self {
        Via(vec![hop])
    }

    /// The topmost hop.
    pub fn top(&self) -> Option<&ViaHop> {
        self.0.first()
    }

    /// Mutable access to the topmost hop.
    pub fn top_mut(&mut self) -> Option<&mut ViaHop> {
        self.0.first_mut()
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            hop.fmt(f)?;
        }
        Ok(())
    }
}

/// Generates an RFC 3261 branch parameter: the magic cookie followed by a
/// random token.
pub fn generate_branch() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("{}{}", MAGIC_COOKIE, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn hop() -> ViaHop {
        let mut hop = ViaHop::new("UDP", Host::from_str("example.com").unwrap(), Some(5060));
        hop.set_branch("z9hG4bK776asdhds");
        hop
    }

    #[test]
    fn renders_canonically() {
        assert_eq!(
            hop().to_string(),
            "SIP/2.0/UDP example.com:5060;branch=z9hG4bK776asdhds"
        );
    }

    #[test]
    fn branch_cookie_detection() {
        assert!(hop().is_rfc3261_branch());
        let mut old = hop();
        old.set_branch("1234");
        assert!(!old.is_rfc3261_branch());
        assert!(generate_branch().starts_with(MAGIC_COOKIE));
    }

    #[test]
    fn rewrite_sets_received_for_mismatched_host() {
        let mut h = hop();
        h.params.push(Param::Rport(None));
        h.rewrite_received("123.123.123.123:555".parse().unwrap());
        assert_eq!(h.received(), Some("123.123.123.123"));
        assert_eq!(h.rport(), Some(Some(555)));
    }

    #[test]
    fn rewrite_skips_received_for_matching_ip() {
        let mut h = ViaHop::new("UDP", Host::from_str("10.0.0.1").unwrap(), Some(5060));
        h.rewrite_received("10.0.0.1:5060".parse().unwrap());
        assert_eq!(h.received(), None);
        // no rport flag, so none is added
        assert_eq!(h.rport(), None);
    }
}
