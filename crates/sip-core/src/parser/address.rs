//! Name-addr and addr-spec parsing for From, To, Contact, Route and
//! Record-Route values ([RFC 3261 Section 20.10](https://datatracker.ietf.org/doc/html/rfc3261#section-20.10)).

use crate::error::{Error, Result};
use crate::parser::uri::{parse_params, parse_uri_str};
use crate::types::address::Address;
use crate::types::uri::Uri;

/// Splits a comma-separated header value into its elements, ignoring commas
/// inside quoted strings and angle brackets.
pub fn split_commas(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;

    for (i, b) in input.bytes().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b'<' if !in_quotes => in_brackets = true,
            b'>' if !in_quotes => in_brackets = false,
            b',' if !in_quotes && !in_brackets => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Parses a single name-addr or addr-spec value with trailing parameters.
pub fn parse_address(input: &str) -> Result<Address> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidUri("empty address".to_string()));
    }

    // Wildcard Contact.
    if input == "*" {
        return Ok(Address::new(Uri::Wildcard));
    }

    if let Some(open) = find_unquoted(input, b'<') {
        let close = input[open..]
            .find('>')
            .map(|i| open + i)
            .ok_or_else(|| Error::InvalidUri(format!("unterminated name-addr: {:?}", input)))?;
        let display_name = parse_display_name(input[..open].trim())?;
        let uri = parse_uri_str(&input[open + 1..close])?;
        let params = match input[close + 1..].trim() {
            "" => Vec::new(),
            rest => parse_params(rest.strip_prefix(';').unwrap_or(rest))?,
        };
        return Ok(Address {
            display_name,
            uri,
            params,
        });
    }

    // Bare addr-spec: header parameters start at the first semicolon,
    // since an unbracketed URI cannot carry its own.
    let (uri_part, params) = match input.split_once(';') {
        Some((uri_part, raw)) => (uri_part.trim(), parse_params(raw)?),
        None => (input, Vec::new()),
    };
    Ok(Address {
        display_name: None,
        uri: parse_uri_str(uri_part)?,
        params,
    })
}

/// Parses a comma-separated list of addresses.
pub fn parse_address_list(input: &str) -> Result<Vec<Address>> {
    split_commas(input).into_iter().map(parse_address).collect()
}

fn parse_display_name(raw: &str) -> Result<Option<String>> {
    if raw.is_empty() {
        return Ok(None);
    }
    if let Some(inner) = raw.strip_prefix('"') {
        let inner = inner
            .strip_suffix('"')
            .ok_or_else(|| Error::InvalidUri(format!("unterminated quoted name: {:?}", raw)))?;
        return Ok(Some(inner.replace("\\\"", "\"").replace("\\\\", "\\")));
    }
    Ok(Some(raw.to_string()))
}

// Position of the first occurrence of `needle` outside quoted strings.
fn find_unquoted(input: &str, needle: u8) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, b) in input.bytes().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b if b == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}
