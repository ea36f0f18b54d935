//! URI parser for the `sip:`, `sips:` and `tel:` schemes
//! ([RFC 3261 Section 19.1.2](https://datatracker.ietf.org/doc/html/rfc3261#section-19.1.2),
//! RFC 3966).

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::param::Param;
use crate::types::uri::{Host, SipUri, TelUri, Uri};

/// Parses any URI form the core understands, including the `*` wildcard.
pub fn parse_uri_str(input: &str) -> Result<Uri> {
    if input == "*" {
        return Ok(Uri::Wildcard);
    }
    if let Some(rest) = input.strip_prefix("sip:") {
        return parse_sip_uri(rest, false).map(Uri::Sip);
    }
    if let Some(rest) = input.strip_prefix("sips:") {
        return parse_sip_uri(rest, true).map(Uri::Sip);
    }
    if let Some(rest) = input.strip_prefix("tel:") {
        return parse_tel_uri(rest).map(Uri::Tel);
    }
    Err(Error::InvalidUri(format!("unsupported scheme: {:?}", input)))
}

// sip:[user[:password]@]host[:port][;params][?headers]
fn parse_sip_uri(input: &str, secure: bool) -> Result<SipUri> {
    let (rest, headers) = match input.split_once('?') {
        Some((rest, raw)) => (rest, parse_uri_headers(raw)?),
        None => (input, Vec::new()),
    };

    // The userinfo is everything before the last '@'; passwords may not
    // contain one, but user parts may.
    let (userinfo, hostpart) = match rest.rsplit_once('@') {
        Some((userinfo, hostpart)) => (Some(userinfo), hostpart),
        None => (None, rest),
    };
    let (user, password) = match userinfo {
        Some(info) => match info.split_once(':') {
            Some((user, password)) => (Some(user.to_string()), Some(password.to_string())),
            None => (Some(info.to_string()), None),
        },
        None => (None, None),
    };
    if matches!(&user, Some(u) if u.is_empty()) {
        return Err(Error::InvalidUri(format!("empty user part: {:?}", input)));
    }

    let (hostport, params) = match hostpart.split_once(';') {
        Some((hostport, raw)) => (hostport, parse_params(raw)?),
        None => (hostpart, Vec::new()),
    };
    let (host, port) = parse_host_port(hostport)?;

    Ok(SipUri {
        secure,
        user,
        password,
        host,
        port,
        params,
        headers,
    })
}

fn parse_tel_uri(input: &str) -> Result<TelUri> {
    let (number, params) = match input.split_once(';') {
        Some((number, raw)) => (number, parse_params(raw)?),
        None => (input, Vec::new()),
    };
    if number.is_empty() {
        return Err(Error::InvalidUri("empty tel number".to_string()));
    }
    Ok(TelUri {
        number: number.to_string(),
        params,
    })
}

/// Parses `host[:port]`, handling bracketed IPv6 literals.
pub fn parse_host_port(input: &str) -> Result<(Host, Option<u16>)> {
    if input.starts_with('[') {
        // [v6]:port or [v6]
        let close = input
            .find(']')
            .ok_or_else(|| Error::InvalidUri(format!("unterminated IPv6 literal: {:?}", input)))?;
        let host = Host::from_str(&input[..=close])?;
        let port = match &input[close + 1..] {
            "" => None,
            rest => Some(parse_port(rest.strip_prefix(':').ok_or_else(|| {
                Error::InvalidUri(format!("garbage after IPv6 literal: {:?}", input))
            })?)?),
        };
        return Ok((host, port));
    }
    match input.split_once(':') {
        Some((host, port)) => Ok((Host::from_str(host)?, Some(parse_port(port)?))),
        None => Ok((Host::from_str(input)?, None)),
    }
}

fn parse_port(input: &str) -> Result<u16> {
    input
        .parse()
        .map_err(|_| Error::InvalidUri(format!("bad port: {:?}", input)))
}

/// Parses a `;`-separated parameter list into typed parameters.
pub fn parse_params(input: &str) -> Result<Vec<Param>> {
    let mut params = Vec::new();
    for raw in input.split(';') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let param = match raw.split_once('=') {
            Some((name, value)) => Param::from_pair(name.trim(), Some(value.trim())),
            None => Param::from_pair(raw, None),
        };
        params.push(param);
    }
    Ok(params)
}

fn parse_uri_headers(input: &str) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for raw in input.split('&') {
        if raw.is_empty() {
            continue;
        }
        match raw.split_once('=') {
            Some((name, value)) => headers.push((name.to_string(), value.to_string())),
            None => headers.push((raw.to_string(), String::new())),
        }
    }
    Ok(headers)
}
