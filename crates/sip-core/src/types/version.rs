//! SIP protocol version. Only `SIP/2.0` exists on the wire today, but the
//! literal is carried through parsing and rendering rather than assumed.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The protocol version found in request and status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version number
    pub major: u8,
    /// Minor version number
    pub minor: u8,
}

impl Version {
    /// `SIP/2.0`
    pub const SIP_2_0: Version = Version { major: 2, minor: 0 };

    /// Creates a version from its parts.
    pub fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::SIP_2_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("SIP/")
            .ok_or_else(|| Error::InvalidVersion(s.to_string()))?;
        let (major, minor) = rest
            .split_once('.')
            .ok_or_else(|| Error::InvalidVersion(s.to_string()))?;
        Ok(Version {
            major: major
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?,
            minor: minor
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?,
        })
    }
}
