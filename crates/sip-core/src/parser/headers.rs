//! Per-header value parsers and the name-driven dispatch that turns a raw
//! `name: value` line into a typed [`Header`].

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::parser::address::{parse_address, parse_address_list, split_commas};
use crate::parser::uri::{parse_host_port, parse_params};
use crate::types::auth::{
    AuthParams, Authorization, ProxyAuthenticate, ProxyAuthorization, WwwAuthenticate,
};
use crate::types::call_id::CallId;
use crate::types::contact::Contact;
use crate::types::content::{ContentLength, ContentType, Expires, MaxForwards, Timestamp};
use crate::types::cseq::CSeq;
use crate::types::from::From;
use crate::types::header::{Header, HeaderName};
use crate::types::method::Method;
use crate::types::route::{RecordRoute, Route};
use crate::types::to::To;
use crate::types::token_list::{Allow, Require, Supported};
use crate::types::version::Version;
use crate::types::via::{Via, ViaHop};

/// Parses one (unfolded) header line's value against the grammar its name
/// selects. Unknown names keep the value verbatim.
pub fn parse_header(name: &str, value: &str) -> Result<Header> {
    let name = HeaderName::from_str(name)?;
    let value = value.trim();
    let name_str = name.as_str().to_string();
    let invalid = move |message: String| Error::InvalidHeader {
        name: name_str.clone(),
        message,
    };

    Ok(match name {
        HeaderName::Via => Header::Via(parse_via(value)?),
        HeaderName::From => Header::From(From::new(parse_address(value)?)),
        HeaderName::To => Header::To(To::new(parse_address(value)?)),
        HeaderName::CallId => {
            if value.is_empty() {
                return Err(invalid("empty Call-ID".to_string()));
            }
            Header::CallId(CallId::new(value))
        }
        HeaderName::CSeq => Header::CSeq(CSeq::from_str(value)?),
        HeaderName::Contact => Header::Contact(Contact(parse_address_list(value)?)),
        HeaderName::Route => Header::Route(Route(parse_address_list(value)?)),
        HeaderName::RecordRoute => Header::RecordRoute(RecordRoute(parse_address_list(value)?)),
        HeaderName::MaxForwards => Header::MaxForwards(MaxForwards(
            value.parse().map_err(|_| invalid(format!("not a hop count: {:?}", value)))?,
        )),
        HeaderName::ContentLength => Header::ContentLength(ContentLength(
            value.parse().map_err(|_| invalid(format!("not a length: {:?}", value)))?,
        )),
        HeaderName::ContentType => Header::ContentType(ContentType::from_str(value)?),
        HeaderName::Expires => Header::Expires(Expires(
            value.parse().map_err(|_| invalid(format!("not a duration: {:?}", value)))?,
        )),
        HeaderName::Timestamp => Header::Timestamp(Timestamp::from_str(value)?),
        HeaderName::Allow => Header::Allow(Allow(
            split_commas(value)
                .into_iter()
                .map(Method::from_str)
                .collect::<Result<_>>()?,
        )),
        HeaderName::Supported => Header::Supported(Supported(parse_token_list(value))),
        HeaderName::Require => Header::Require(Require(parse_token_list(value))),
        HeaderName::Authorization => Header::Authorization(Authorization(parse_auth(value)?)),
        HeaderName::ProxyAuthorization => {
            Header::ProxyAuthorization(ProxyAuthorization(parse_auth(value)?))
        }
        HeaderName::WwwAuthenticate => {
            Header::WwwAuthenticate(WwwAuthenticate(parse_auth(value)?))
        }
        HeaderName::ProxyAuthenticate => {
            Header::ProxyAuthenticate(ProxyAuthenticate(parse_auth(value)?))
        }
        name => Header::Other(name, value.to_string()),
    })
}

/// Parses a Via value: one or more comma-separated hops of the form
/// `SIP/2.0/TRANSPORT host[:port][;params]`.
pub fn parse_via(value: &str) -> Result<Via> {
    let hops = split_commas(value)
        .into_iter()
        .map(parse_via_hop)
        .collect::<Result<Vec<_>>>()?;
    if hops.is_empty() {
        return Err(Error::InvalidHeader {
            name: "Via".to_string(),
            message: "no hops".to_string(),
        });
    }
    Ok(Via(hops))
}

fn parse_via_hop(value: &str) -> Result<ViaHop> {
    let invalid = |message: String| Error::InvalidHeader {
        name: "Via".to_string(),
        message,
    };

    let (sent_protocol, rest) = value
        .split_once(|c: char| c == ' ' || c == '\t')
        .ok_or_else(|| invalid(format!("missing sent-by: {:?}", value)))?;

    // sent-protocol = "SIP" "/" version "/" transport
    let mut proto_parts = sent_protocol.split('/');
    let (name, version, transport) =
        match (proto_parts.next(), proto_parts.next(), proto_parts.next(), proto_parts.next()) {
            (Some(name), Some(version), Some(transport), None) => (name, version, transport),
            _ => return Err(invalid(format!("bad sent-protocol: {:?}", sent_protocol))),
        };
    if !name.eq_ignore_ascii_case("SIP") {
        return Err(invalid(format!("bad protocol name: {:?}", name)));
    }
    let version = Version::from_str(&format!("SIP/{}", version))?;

    let rest = rest.trim();
    let (sent_by, params) = match rest.split_once(';') {
        Some((sent_by, raw)) => (sent_by.trim(), parse_params(raw)?),
        None => (rest, Vec::new()),
    };
    let (host, port) = parse_host_port(sent_by)?;

    Ok(ViaHop {
        version,
        transport: transport.trim().to_ascii_uppercase(),
        host,
        port,
        params,
    })
}

/// Parses `Scheme name=value, name=value, ...` with quoted-string values.
pub fn parse_auth(value: &str) -> Result<AuthParams> {
    let (scheme, rest) = match value.split_once(|c: char| c == ' ' || c == '\t') {
        Some((scheme, rest)) => (scheme, rest.trim()),
        None => (value, ""),
    };
    if scheme.is_empty() {
        return Err(Error::InvalidHeader {
            name: "Authorization".to_string(),
            message: "missing scheme".to_string(),
        });
    }
    let mut params = AuthParams::new(scheme);
    for raw in split_commas(rest) {
        let (name, value) = raw.split_once('=').ok_or_else(|| Error::InvalidHeader {
            name: "Authorization".to_string(),
            message: format!("bad auth param: {:?}", raw),
        })?;
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        params.params.push((name.trim().to_string(), value.to_string()));
    }
    Ok(params)
}

fn parse_token_list(value: &str) -> Vec<String> {
    split_commas(value).into_iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn via_with_params() {
        let via = parse_via("SIP/2.0/UDP example.com:5060;branch=z9hG4bK.q;rport").unwrap();
        let hop = via.top().unwrap();
        assert_eq!(hop.transport, "UDP");
        assert_eq!(hop.port, Some(5060));
        assert_eq!(hop.branch(), Some("z9hG4bK.q"));
        assert_eq!(hop.rport(), Some(None));
    }

    #[test]
    fn via_multiple_hops() {
        let via = parse_via(
            "SIP/2.0/UDP first.example.com;branch=z9hG4bKa, SIP/2.0/TCP second.example.com:5062;branch=z9hG4bKb",
        )
        .unwrap();
        assert_eq!(via.0.len(), 2);
        assert_eq!(via.0[1].transport, "TCP");
    }

    #[test]
    fn via_rejects_garbage() {
        assert!(parse_via("SIP/2.0 example.com").is_err());
        assert!(parse_via("HTTP/1.1/TCP example.com").is_err());
    }

    #[test]
    fn compact_form_dispatch() {
        let header = parse_header("i", "c1@x").unwrap();
        assert_eq!(header.name(), HeaderName::CallId);
        let header = parse_header("v", "SIP/2.0/UDP h.example.com").unwrap();
        assert_eq!(header.name(), HeaderName::Via);
    }

    #[test]
    fn unknown_header_is_opaque() {
        let header = parse_header("X-Custom", "anything, goes; here").unwrap();
        assert_eq!(header.value_string(), "anything, goes; here");
    }

    #[test]
    fn auth_challenge() {
        let params = parse_auth(
            "Digest realm=\"atlanta.com\", nonce=\"84a4cc6f\", algorithm=MD5, qop=\"auth\"",
        )
        .unwrap();
        assert_eq!(params.scheme, "Digest");
        assert_eq!(params.realm(), Some("atlanta.com"));
        assert_eq!(params.nonce(), Some("84a4cc6f"));
        assert_eq!(params.algorithm(), Some("MD5"));
    }

    #[test]
    fn malformed_typed_value_is_an_error() {
        assert!(parse_header("CSeq", "not a cseq").is_err());
        assert!(parse_header("Max-Forwards", "seventy").is_err());
    }
}
