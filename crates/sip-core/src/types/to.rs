//! To header ([RFC 3261 Section 20.39](https://datatracker.ietf.org/doc/html/rfc3261#section-20.39)):
//! the logical recipient. The `tag` parameter is added by the answering side
//! and, together with From-tag and Call-ID, identifies a dialog.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::types::address::Address;
use crate::types::uri::Uri;

/// The To header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct To(pub Address);

impl To {
    /// Wraps an address.
    pub fn new(address: Address) -> Self {
        To(address)
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

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
