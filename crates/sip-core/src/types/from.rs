//! From header ([RFC 3261 Section 20.20](https://datatracker.ietf.org/doc/html/rfc3261#section-20.20)):
//! the logical initiator of the request, with its dialog `tag`.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::types::address::Address;
use crate::types::uri::Uri;

/// The From header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct From(pub Address);

impl From {
    /// Wraps an address.
    pub fn new(address: Address) -> Self {
        From(address)
    }

    /// The underlying address.
    pub fn address(&self) -> &Address {
        &self.0
    }

    /// The URI.
    pub fn uri(&self) -> &Uri {
        &self.0.uri
    }

    /// The `tag` parameter.
    pub fn tag(&self) -> Option<&str> {
        self.0.tag()
    }

    /// Sets or replaces the `tag` parameter.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.0.set_tag(tag)
    }
}

impl fmt::Display for From {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
