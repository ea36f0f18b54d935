//! Route and Record-Route headers
//! ([RFC 3261 Sections 20.30 and 20.34](https://datatracker.ietf.org/doc/html/rfc3261#section-20.30)).
//! Both are ordered lists of name-addr hops; Route forces the path of a
//! request, Record-Route lets proxies stay on the path of a dialog.

use std::fmt;
use std::fmt::Display;
use serde::{Deserialize, Serialize};

use crate::types::address::Address;

fn fmt_hops(hops: &[Address], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, hop) in hops.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        hop.fmt(f)?;
    }
    Ok(())
}

/// The Route header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route(pub Vec<Address>);

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hops(&self.0, f)
    }
}

/// The Record-Route header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRoute(pub Vec<Address>);

impl fmt::Display for RecordRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hops(&self.0, f)
    }
}
