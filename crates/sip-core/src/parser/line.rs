//! Start line parsers: Request-Line and Status-Line
//! ([RFC 3261 Section 7.1](https://datatracker.ietf.org/doc/html/rfc3261#section-7.1)).
//!
//! ABNF:
//! ```text
//! Request-Line = Method SP Request-URI SP SIP-Version CRLF
//! Status-Line  = SIP-Version SP Status-Code SP Reason-Phrase CRLF
//! ```
//! The CRLF is stripped by the framing layer before these run.

use std::str::FromStr;
use nom::{
    bytes::complete::take_till1,
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, rest},
    sequence::{preceded, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;
use crate::types::version::Version;

/// Parsed start line of either message kind.
#[derive(Debug, Clone)]
pub enum StartLine {
    /// Request-Line
    Request {
        /// Method token
        method: Method,
        /// Request-URI
        uri: Uri,
        /// Protocol version
        version: Version,
    },
    /// Status-Line
    Status {
        /// Protocol version
        version: Version,
        /// Status code
        status: StatusCode,
        /// Reason phrase, possibly empty
        reason: String,
    },
}

// Method SP Request-URI SP SIP-Version
fn request_line(input: &str) -> IResult<&str, StartLine> {
    map(
        tuple((
            map_res(take_till1(|c| c == ' '), Method::from_str),
            char(' '),
            map_res(take_till1(|c| c == ' '), Uri::from_str),
            char(' '),
            map_res(rest, Version::from_str),
        )),
        |(method, _, uri, _, version)| StartLine::Request {
            method,
            uri,
            version,
        },
    )(input)
}

// Status-Code = 3DIGIT
fn status_code(input: &str) -> IResult<&str, StatusCode> {
    map_res(digit1, |digits: &str| -> Result<StatusCode> {
        if digits.len() != 3 {
            return Err(Error::InvalidMessage(format!(
                "status code must be three digits: {:?}",
                digits
            )));
        }
        StatusCode::new(digits.parse::<u16>()?)
    })(input)
}

// SIP-Version SP Status-Code [SP Reason-Phrase]; the separating space is
// commonly dropped along with an empty reason phrase.
fn status_line(input: &str) -> IResult<&str, StartLine> {
    map(
        tuple((
            map_res(take_till1(|c| c == ' '), Version::from_str),
            char(' '),
            status_code,
            map(opt(preceded(char(' '), rest)), |reason| {
                reason.unwrap_or("").to_string()
            }),
        )),
        |(version, _, status, reason)| StartLine::Status {
            version,
            status,
            reason,
        },
    )(input)
}

/// Parses a start line. Status lines are recognized by their `SIP/` prefix;
/// anything else must be a request line.
pub fn parse_start_line(line: &str) -> Result<StartLine> {
    let parser = if line.starts_with("SIP/") {
        status_line
    } else {
        request_line
    };
    match all_consuming(parser)(line) {
        Ok((_, start)) => Ok(start),
        Err(_) => Err(Error::InvalidMessage(format!(
            "malformed start line: {:?}",
            line
        ))),
    }
}
