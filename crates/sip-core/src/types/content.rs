//! Entity headers: Content-Length (RFC 3261 20.14), Content-Type (20.15),
//! Max-Forwards (20.22), Expires (20.19) and Timestamp (20.38).

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The Content-Length header value in octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLength(pub u32);

impl fmt::Display for ContentLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The Content-Type header value: a media type with parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
    /// Top-level type, e.g. `application`
    pub media_type: String,
    /// Subtype, e.g. `sdp`
    pub media_subtype: String,
    /// Ordered media parameters
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// `application/sdp`
    pub fn application_sdp() -> Self {
        ContentType {
            media_type: "application".to_string(),
            media_subtype: "sdp".to_string(),
            params: Vec::new(),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.media_subtype)?;
        for (name, value) in &self.params {
            write!(f, ";{}={}", name, value)?;
        }
        Ok(())
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let mtype = parts.next().unwrap_or_default().trim();
        let (media_type, media_subtype) = mtype.split_once('/').ok_or_else(|| Error::InvalidHeader {
            name: "Content-Type".to_string(),
            message: format!("not a media type: {:?}", s),
        })?;
        let mut params = Vec::new();
        for raw in parts {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            match raw.split_once('=') {
                Some((name, value)) => params.push((name.to_string(), value.to_string())),
                None => params.push((raw.to_string(), String::new())),
            }
        }
        Ok(ContentType {
            media_type: media_type.trim().to_string(),
            media_subtype: media_subtype.trim().to_string(),
            params,
        })
    }
}

/// The Max-Forwards header value: remaining hop budget of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxForwards(pub u32);

impl MaxForwards {
    /// The conventional initial value.
    pub fn default_hops() -> Self {
        MaxForwards(70)
    }

    /// Decrements the budget, saturating at zero.
    pub fn decrement(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }
}

impl fmt::Display for MaxForwards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The Expires header value in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expires(pub u32);

impl fmt::Display for Expires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The Timestamp header value: when the request left the client, with an
/// optional delay echoed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since an epoch chosen by the client
    pub time: f64,
    /// Server-side processing delay
    pub delay: Option<f64>,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.time)?;
        if let Some(delay) = self.delay {
            write!(f, " {}", delay)?;
        }
        Ok(())
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let time = parts
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Error::InvalidHeader {
                name: "Timestamp".to_string(),
                message: format!("not a timestamp: {:?}", s),
            })?;
        let delay = match parts.next() {
            Some(raw) => Some(raw.parse().map_err(|_| Error::InvalidHeader {
                name: "Timestamp".to_string(),
                message: format!("bad delay in {:?}", s),
            })?),
            None => None,
        };
        Ok(Timestamp { time, delay })
    }
}
