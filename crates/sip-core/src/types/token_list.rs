//! Comma-separated token list headers: Allow (RFC 3261 20.5), Supported
//! (20.37) and Require (20.32).

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::types::method::Method;

fn fmt_list<T: fmt::Display>(items: &[T], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.fmt(f)?;
    }
    Ok(())
}

/// The Allow header value: methods the sender supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allow(pub Vec<Method>);

impl Allow {
    /// True when the method is listed.
    pub fn allows(&self, method: &Method) -> bool {
        self.0.contains(method)
    }
}

impl fmt::Display for Allow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_list(&self.0, f)
    }
}

/// The Supported header value: option tags the sender understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supported(pub Vec<String>);

impl fmt::Display for Supported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_list(&self.0, f)
    }
}

/// The Require header value: option tags the recipient must support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Require(pub Vec<String>);

impl fmt::Display for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_list(&self.0, f)
    }
}
