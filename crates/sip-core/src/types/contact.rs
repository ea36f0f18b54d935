//! Contact header ([RFC 3261 Section 20.10](https://datatracker.ietf.org/doc/html/rfc3261#section-20.10)).
//! A REGISTER removal may use the wildcard form, modeled as an address whose
//! URI is [`Uri::Wildcard`](crate::types::uri::Uri::Wildcard).

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::types::address::Address;

/// The Contact header value: one or more addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact(pub Vec<Address>);

impl Contact {
    /// A Contact with a single address.
    pub fn single(address: Address) -> Self {
        Contact(vec![address])
    }

    /// The first address.
    pub fn first(&self) -> Option<&Address> {
        self.0.first()
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, address) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if address.uri.is_wildcard() {
                f.write_str("*")?;
            } else {
                address.fmt(f)?;
            }
        }
        Ok(())
    }
}
