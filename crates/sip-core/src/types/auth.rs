//! # Authentication headers
//!
//! WWW-Authenticate / Proxy-Authenticate challenges and Authorization /
//! Proxy-Authorization credentials per
//! [RFC 3261 Section 22](https://datatracker.ietf.org/doc/html/rfc3261#section-22)
//! and RFC 2617. The header model is a scheme plus an ordered parameter
//! list; the digest computation itself lives in [`crate::auth`].

use std::fmt;
use serde::{Deserialize, Serialize};

// Parameters RFC 2617 requires to be quoted-string; everything else is
// rendered as a bare token.
const QUOTED: &[&str] = &[
    "realm", "domain", "nonce", "opaque", "username", "uri", "response", "cnonce",
];

/// A scheme with its `name=value` parameters, the shape shared by all four
/// authentication headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    /// Authentication scheme, normally `Digest`
    pub scheme: String,
    /// Ordered parameters with quoting stripped
    pub params: Vec<(String, String)>,
}

impl AuthParams {
    /// An empty parameter set for a scheme.
    pub fn new(scheme: impl Into<String>) -> Self {
        AuthParams {
            scheme: scheme.into(),
            params: Vec::new(),
        }
    }

    /// Looks up a parameter by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets or replaces a parameter.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        for (n, v) in self.params.iter_mut() {
            if n.eq_ignore_ascii_case(&name) {
                *v = value;
                return;
            }
        }
        self.params.push((name, value));
    }

    /// The `realm` parameter.
    pub fn realm(&self) -> Option<&str> {
        self.get("realm")
    }

    /// The `nonce` parameter.
    pub fn nonce(&self) -> Option<&str> {
        self.get("nonce")
    }

    /// The `algorithm` parameter.
    pub fn algorithm(&self) -> Option<&str> {
        self.get("algorithm")
    }

    /// True when the challenge is marked stale.
    pub fn is_stale(&self) -> bool {
        self.get("stale").is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

impl fmt::Display for AuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            if QUOTED.contains(&name.to_ascii_lowercase().as_str()) {
                write!(f, "{}=\"{}\"", name, value)?;
            } else {
                write!(f, "{}={}", name, value)?;
            }
        }
        Ok(())
    }
}

macro_rules! auth_header {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name(pub AuthParams);

        impl $name {
            /// The scheme and parameters.
            pub fn params(&self) -> &AuthParams {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

auth_header! {
    /// WWW-Authenticate challenge from a UAS or registrar (401).
    WwwAuthenticate
}
auth_header! {
    /// Proxy-Authenticate challenge from a proxy (407).
    ProxyAuthenticate
}
auth_header! {
    /// Authorization credentials answering a 401 challenge.
    Authorization
}
auth_header! {
    /// Proxy-Authorization credentials answering a 407 challenge.
    ProxyAuthorization
}
