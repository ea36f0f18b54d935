//! # SIP URIs
//!
//! The URI model of [RFC 3261 Section 19.1](https://datatracker.ietf.org/doc/html/rfc3261#section-19.1):
//! `sip:`/`sips:` URIs with user info, host, port, ordered parameters and
//! headers, plus `tel:` URIs (RFC 3966) and the wildcard `*` Contact form.
//!
//! Equality implements the comparison rules of Section 19.1.4, which are
//! deliberately not structural: host and scheme compare case-insensitively,
//! user and password case-sensitively, and the `transport`, `user`, `ttl`,
//! `method` and `maddr` parameters must agree even when only one side
//! carries them.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::{find_param, Param};

/// Host part of a URI or Via hop: a domain name or an IP literal.
#[derive(Debug, Clone, Eq, Hash, Serialize, Deserialize)]
pub enum Host {
    /// A DNS name, compared case-insensitively
    Domain(String),
    /// An IPv4 literal
    Ipv4(Ipv4Addr),
    /// An IPv6 literal, rendered in brackets
    Ipv6(Ipv6Addr),
}

impl Host {
    /// Wraps an already-resolved address.
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Host::Ipv4(v4),
            IpAddr::V6(v6) => Host::Ipv6(v6),
        }
    }

    /// The IP literal, when this host is one.
    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            Host::Domain(_) => None,
            Host::Ipv4(v4) => Some(IpAddr::V4(*v4)),
            Host::Ipv6(v6) => Some(IpAddr::V6(*v6)),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Host::Domain(a), Host::Domain(b)) => a.eq_ignore_ascii_case(b),
            (Host::Ipv4(a), Host::Ipv4(b)) => a == b,
            (Host::Ipv6(a), Host::Ipv6(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Domain(name) => f.write_str(name),
            Host::Ipv4(addr) => write!(f, "{}", addr),
            Host::Ipv6(addr) => write!(f, "[{}]", addr),
        }
    }
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidUri("empty host".to_string()));
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return inner
                .parse::<Ipv6Addr>()
                .map(Host::Ipv6)
                .map_err(|_| Error::InvalidUri(format!("bad IPv6 literal: {}", s)));
        }
        if let Ok(v4) = s.parse::<Ipv4Addr>() {
            return Ok(Host::Ipv4(v4));
        }
        if s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.') {
            Ok(Host::Domain(s.to_string()))
        } else {
            Err(Error::InvalidUri(format!("bad host: {}", s)))
        }
    }
}

/// A `sip:` or `sips:` URI.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct SipUri {
    /// True for `sips:`
    pub secure: bool,
    /// User part, case-sensitive
    pub user: Option<String>,
    /// Password, case-sensitive (deprecated on the wire, still parsed)
    pub password: Option<String>,
    /// Host name or IP literal
    pub host: Host,
    /// Explicit port, if any
    pub port: Option<u16>,
    /// Ordered URI parameters
    pub params: Vec<Param>,
    /// Ordered URI headers (`?name=value&...`)
    pub headers: Vec<(String, String)>,
}

impl SipUri {
    /// A bare `sip:host` URI.
    pub fn new(host: Host) -> Self {
        SipUri {
            secure: false,
            user: None,
            password: None,
            host,
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Sets the user part.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Explicit port or the scheme default (5060, 5061 for sips).
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 5061 } else { 5060 })
    }

    /// The `transport` URI parameter, when present.
    pub fn transport_param(&self) -> Option<String> {
        find_param(&self.params, "transport").and_then(|p| p.value())
    }
}

// RFC 3261 19.1.4: these parameters must match even when only one side has
// them; any other parameter is compared only when both sides carry it.
const CRITICAL_PARAMS: &[&str] = &["transport", "user", "ttl", "method", "maddr"];

impl PartialEq for SipUri {
    fn eq(&self, other: &Self) -> bool {
        if self.secure != other.secure
            || self.user != other.user
            || self.password != other.password
            || self.host != other.host
            || self.port != other.port
        {
            return false;
        }

        let param_of = |uri: &SipUri, name: &str| -> Option<Option<String>> {
            find_param(&uri.params, name).map(|p| p.value().map(|v| v.to_ascii_lowercase()))
        };
        for name in CRITICAL_PARAMS {
            if param_of(self, name) != param_of(other, name) {
                return false;
            }
        }
        for p in &self.params {
            if CRITICAL_PARAMS.contains(&p.name()) {
                continue;
            }
            if let Some(q) = find_param(&other.params, p.name()) {
                if p.value().map(|v| v.to_ascii_lowercase())
                    != q.value().map(|v| v.to_ascii_lowercase())
                {
                    return false;
                }
            }
        }

        // Headers are significant: any header present in one URI must be
        // present in the other (19.1.4).
        if self.headers.len() != other.headers.len() {
            return false;
        }
        self.headers.iter().all(|(name, value)| {
            other
                .headers
                .iter()
                .any(|(n, v)| n.eq_ignore_ascii_case(name) && v == value)
        })
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.secure { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for param in &self.params {
            write!(f, ";{}", param)?;
        }
        for (i, (name, value)) in self.headers.iter().enumerate() {
            write!(f, "{}{}={}", if i == 0 { "?" } else { "&" }, name, value)?;
        }
        Ok(())
    }
}

/// A `tel:` URI (RFC 3966), carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelUri {
    /// Telephone number, including a leading `+` for global numbers
    pub number: String,
    /// Ordered parameters
    pub params: Vec<Param>,
}

impl fmt::Display for TelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tel:{}", self.number)?;
        for param in &self.params {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

/// Any URI the core understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Uri {
    /// `sip:` / `sips:`
    Sip(SipUri),
    /// `tel:`
    Tel(TelUri),
    /// The `*` form allowed in Contact for REGISTER removals
    Wildcard,
}

impl Uri {
    /// Convenience constructor for `sip:host`.
    pub fn sip(host: Host) -> Self {
        Uri::Sip(SipUri::new(host))
    }

    /// The inner SIP URI, when this is one.
    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            _ => None,
        }
    }

    /// Mutable access to the inner SIP URI.
    pub fn as_sip_mut(&mut self) -> Option<&mut SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            _ => None,
        }
    }

    /// True for the wildcard `*`.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Uri::Wildcard)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::Sip(uri) => uri.fmt(f),
            Uri::Tel(uri) => uri.fmt(f),
            Uri::Wildcard => f.write_str("*"),
        }
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::uri::parse_uri_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        Uri::from_str(s).unwrap()
    }

    #[test]
    fn host_compares_case_insensitively() {
        assert_eq!(uri("sip:alice@AtLanTa.CoM"), uri("sip:alice@atlanta.com"));
    }

    #[test]
    fn user_is_case_sensitive() {
        assert_ne!(uri("sip:Alice@atlanta.com"), uri("sip:alice@atlanta.com"));
    }

    #[test]
    fn critical_params_must_agree() {
        assert_ne!(
            uri("sip:alice@atlanta.com;transport=tcp"),
            uri("sip:alice@atlanta.com")
        );
        assert_eq!(
            uri("sip:alice@atlanta.com;transport=TCP"),
            uri("sip:alice@atlanta.com;transport=tcp")
        );
    }

    #[test]
    fn non_critical_params_compared_when_shared() {
        // newvalue present only on one side: still equal
        assert_eq!(
            uri("sip:alice@atlanta.com;newparam=5"),
            uri("sip:alice@atlanta.com")
        );
        assert_ne!(
            uri("sip:alice@atlanta.com;newparam=5"),
            uri("sip:alice@atlanta.com;newparam=6")
        );
    }

    #[test]
    fn explicit_port_differs_from_default() {
        assert_ne!(uri("sip:alice@atlanta.com:5060"), uri("sip:alice@atlanta.com"));
    }

    #[test]
    fn ipv6_round_trip() {
        let u = uri("sip:[2001:db8::1]:5070");
        assert_eq!(u.to_string(), "sip:[2001:db8::1]:5070");
    }
}
