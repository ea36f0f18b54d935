//! Call-ID header ([RFC 3261 Section 20.8](https://datatracker.ietf.org/doc/html/rfc3261#section-20.8)).

use std::fmt;
use serde::{Deserialize, Serialize};

/// The Call-ID header value, an opaque `word["@"word]` token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Wraps a call id value.
    pub fn new(value: impl Into<String>) -> Self {
        CallId(value.into())
    }

    /// Generates a random call id.
    pub fn random() -> Self {
        CallId(uuid::Uuid::new_v4().to_string())
    }

    /// The raw value.
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
