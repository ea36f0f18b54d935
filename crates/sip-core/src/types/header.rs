//! # Header model
//!
//! Header names fold case and compact forms ([RFC 3261 Section 7.3.3](https://datatracker.ietf.org/doc/html/rfc3261#section-7.3.3))
//! to canonical spellings. Header values the core reasons about are typed;
//! everything else rides along as an opaque name/value pair.
//!
//! [`Headers`] is an ordered multimap: insertion order is preserved (Via
//! order is routing-relevant), lookups scan by canonical name, and the
//! renderer emits a fixed canonical ordering with unknown headers sorted
//! lexicographically after the known ones.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::types::auth::{Authorization, ProxyAuthenticate, ProxyAuthorization, WwwAuthenticate};
use crate::types::call_id::CallId;
use crate::types::contact::Contact;
use crate::types::content::{ContentLength, ContentType, Expires, MaxForwards, Timestamp};
use crate::types::cseq::CSeq;
use crate::types::from::From;
use crate::types::route::{RecordRoute, Route};
use crate::types::to::To;
use crate::types::token_list::{Allow, Require, Supported};
use crate::types::via::{Via, ViaHop};

/// A canonical header name.
///
/// `from_str` accepts any casing and the single-letter compact forms
/// (`v f t i m l c s k e`); `as_str` always yields the canonical spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    /// Via: path taken by the request so far
    Via,
    /// From: initiator of the request
    From,
    /// To: logical recipient
    To,
    /// Call-ID: unique identifier for this call
    CallId,
    /// CSeq: command sequence number
    CSeq,
    /// Contact: where subsequent requests should be sent
    Contact,
    /// Route: forced route for a request
    Route,
    /// Record-Route: proxies that want to stay in the path
    RecordRoute,
    /// Max-Forwards: remaining hop budget
    MaxForwards,
    /// Content-Length: size of the body in octets
    ContentLength,
    /// Content-Type: media type of the body
    ContentType,
    /// Content-Encoding: codings applied to the body
    ContentEncoding,
    /// Expires: validity period
    Expires,
    /// Timestamp: when the request was sent
    Timestamp,
    /// Allow: methods supported by the sender
    Allow,
    /// Supported: option tags supported by the sender
    Supported,
    /// Require: option tags the recipient must support
    Require,
    /// Subject: human-readable session subject
    Subject,
    /// Authorization: credentials for a UAS
    Authorization,
    /// Proxy-Authorization: credentials for a proxy
    ProxyAuthorization,
    /// WWW-Authenticate: challenge from a UAS
    WwwAuthenticate,
    /// Proxy-Authenticate: challenge from a proxy
    ProxyAuthenticate,
    /// Any other header, with original capitalization
    Other(String),
}

impl HeaderName {
    /// Canonical spelling.
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::Expires => "Expires",
            HeaderName::Timestamp => "Timestamp",
            HeaderName::Allow => "Allow",
            HeaderName::Supported => "Supported",
            HeaderName::Require => "Require",
            HeaderName::Subject => "Subject",
            HeaderName::Authorization => "Authorization",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::Other(name) => name,
        }
    }

    // Rank in the canonical serialization order. Routing headers first,
    // entity headers last, unknown headers after every known one.
    pub(crate) fn serialize_rank(&self) -> u32 {
        match self {
            HeaderName::Route => 0,
            HeaderName::RecordRoute => 1,
            HeaderName::Via => 2,
            HeaderName::From => 3,
            HeaderName::To => 4,
            HeaderName::CallId => 5,
            HeaderName::CSeq => 6,
            HeaderName::Contact => 7,
            HeaderName::MaxForwards => 8,
            HeaderName::Expires => 9,
            HeaderName::Subject => 10,
            HeaderName::Timestamp => 11,
            HeaderName::Allow => 12,
            HeaderName::Supported => 13,
            HeaderName::Require => 14,
            HeaderName::WwwAuthenticate => 15,
            HeaderName::ProxyAuthenticate => 16,
            HeaderName::Authorization => 17,
            HeaderName::ProxyAuthorization => 18,
            HeaderName::ContentEncoding => 96,
            HeaderName::ContentType => 97,
            HeaderName::ContentLength => 98,
            HeaderName::Other(_) => 100,
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        if s.is_empty() {
            return Err(crate::error::Error::InvalidHeader {
                name: String::new(),
                message: "empty header name".to_string(),
            });
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "max-forwards" => HeaderName::MaxForwards,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "content-encoding" | "e" => HeaderName::ContentEncoding,
            "expires" => HeaderName::Expires,
            "timestamp" => HeaderName::Timestamp,
            "allow" => HeaderName::Allow,
            "supported" | "k" => HeaderName::Supported,
            "require" => HeaderName::Require,
            "subject" | "s" => HeaderName::Subject,
            "authorization" => HeaderName::Authorization,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            _ => HeaderName::Other(s.to_string()),
        })
    }
}

/// A typed header value paired with its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Header {
    /// Via hops
    Via(Via),
    /// From
    From(From),
    /// To
    To(To),
    /// Call-ID
    CallId(CallId),
    /// CSeq
    CSeq(CSeq),
    /// Contact addresses
    Contact(Contact),
    /// Route hops
    Route(Route),
    /// Record-Route hops
    RecordRoute(RecordRoute),
    /// Max-Forwards
    MaxForwards(MaxForwards),
    /// Content-Length
    ContentLength(ContentLength),
    /// Content-Type
    ContentType(ContentType),
    /// Expires
    Expires(Expires),
    /// Timestamp
    Timestamp(Timestamp),
    /// Allow
    Allow(Allow),
    /// Supported
    Supported(Supported),
    /// Require
    Require(Require),
    /// Authorization
    Authorization(Authorization),
    /// Proxy-Authorization
    ProxyAuthorization(ProxyAuthorization),
    /// WWW-Authenticate
    WwwAuthenticate(WwwAuthenticate),
    /// Proxy-Authenticate
    ProxyAuthenticate(ProxyAuthenticate),
    /// Anything else, value kept verbatim
    Other(HeaderName, String),
}

impl Header {
    /// The canonical name of this header.
    pub fn name(&self) -> HeaderName {
        match self {
            Header::Via(_) => HeaderName::Via,
            Header::From(_) => HeaderName::From,
            Header::To(_) => HeaderName::To,
            Header::CallId(_) => HeaderName::CallId,
            Header::CSeq(_) => HeaderName::CSeq,
            Header::Contact(_) => HeaderName::Contact,
            Header::Route(_) => HeaderName::Route,
            Header::RecordRoute(_) => HeaderName::RecordRoute,
            Header::MaxForwards(_) => HeaderName::MaxForwards,
            Header::ContentLength(_) => HeaderName::ContentLength,
            Header::ContentType(_) => HeaderName::ContentType,
            Header::Expires(_) => HeaderName::Expires,
            Header::Timestamp(_) => HeaderName::Timestamp,
            Header::Allow(_) => HeaderName::Allow,
            Header::Supported(_) => HeaderName::Supported,
            Header::Require(_) => HeaderName::Require,
            Header::Authorization(_) => HeaderName::Authorization,
            Header::ProxyAuthorization(_) => HeaderName::ProxyAuthorization,
            Header::WwwAuthenticate(_) => HeaderName::WwwAuthenticate,
            Header::ProxyAuthenticate(_) => HeaderName::ProxyAuthenticate,
            Header::Other(name, _) => name.clone(),
        }
    }

    /// Rendered header value, without the name or colon.
    pub fn value_string(&self) -> String {
        match self {
            Header::Via(v) => v.to_string(),
            Header::From(v) => v.to_string(),
            Header::To(v) => v.to_string(),
            Header::CallId(v) => v.to_string(),
            Header::CSeq(v) => v.to_string(),
            Header::Contact(v) => v.to_string(),
            Header::Route(v) => v.to_string(),
            Header::RecordRoute(v) => v.to_string(),
            Header::MaxForwards(v) => v.to_string(),
            Header::ContentLength(v) => v.to_string(),
            Header::ContentType(v) => v.to_string(),
            Header::Expires(v) => v.to_string(),
            Header::Timestamp(v) => v.to_string(),
            Header::Allow(v) => v.to_string(),
            Header::Supported(v) => v.to_string(),
            Header::Require(v) => v.to_string(),
            Header::Authorization(v) => v.to_string(),
            Header::ProxyAuthorization(v) => v.to_string(),
            Header::WwwAuthenticate(v) => v.to_string(),
            Header::ProxyAuthenticate(v) => v.to_string(),
            Header::Other(_, value) => value.clone(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.value_string())
    }
}

/// An ordered header collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// An empty collection.
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// Number of header entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no headers are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a header, preserving order.
    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// The first header with the given name.
    pub fn get(&self, name: &HeaderName) -> Option<&Header> {
        self.0.iter().find(|h| &h.name() == name)
    }

    /// Mutable access to the first header with the given name.
    pub fn get_mut(&mut self, name: &HeaderName) -> Option<&mut Header> {
        self.0.iter_mut().find(|h| &h.name() == name)
    }

    /// All headers with the given name, in order.
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a Header> {
        self.0.iter().filter(move |h| &h.name() == name)
    }

    /// Removes every header with the given name.
    pub fn remove(&mut self, name: &HeaderName) {
        self.0.retain(|h| &h.name() != name);
    }

    /// Replaces all headers of this header's name with the given one.
    pub fn set(&mut self, header: Header) {
        let name = header.name();
        if let Some(first) = self.0.iter_mut().find(|h| h.name() == name) {
            *first = header;
            let mut seen = false;
            self.0.retain(|h| {
                if h.name() != name {
                    return true;
                }
                if !seen {
                    seen = true;
                    true
                } else {
                    false
                }
            });
        } else {
            self.0.push(header);
        }
    }

    /// Iterates all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    /// Headers in the canonical serialization order: known headers by rank,
    /// unknown headers lexicographically after them. The sort is stable, so
    /// repeated headers (Via chains, Route sets) keep their relative order.
    pub fn canonical(&self) -> Vec<&Header> {
        let mut ordered: Vec<&Header> = self.0.iter().collect();
        ordered.sort_by(|a, b| {
            let (an, bn) = (a.name(), b.name());
            an.serialize_rank().cmp(&bn.serialize_rank()).then_with(|| {
                match (&an, &bn) {
                    (HeaderName::Other(x), HeaderName::Other(y)) => {
                        x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase())
                    }
                    _ => std::cmp::Ordering::Equal,
                }
            })
        });
        ordered
    }

    // Typed accessors for the headers the stack itself needs.

    /// First Via header value.
    pub fn via(&self) -> Option<&Via> {
        match self.get(&HeaderName::Via) {
            Some(Header::Via(via)) => Some(via),
            _ => None,
        }
    }

    /// Topmost Via hop across all Via headers.
    pub fn top_via_hop(&self) -> Option<&ViaHop> {
        self.via().and_then(|via| via.top())
    }

    /// Mutable topmost Via hop.
    pub fn top_via_hop_mut(&mut self) -> Option<&mut ViaHop> {
        match self.get_mut(&HeaderName::Via) {
            Some(Header::Via(via)) => via.top_mut(),
            _ => None,
        }
    }

    /// From header.
    pub fn from(&self) -> Option<&From> {
        match self.get(&HeaderName::From) {
            Some(Header::From(from)) => Some(from),
            _ => None,
        }
    }

    /// Mutable From header.
    pub fn from_mut(&mut self) -> Option<&mut From> {
        match self.get_mut(&HeaderName::From) {
            Some(Header::From(from)) => Some(from),
            _ => None,
        }
    }

    /// To header.
    pub fn to(&self) -> Option<&To> {
        match self.get(&HeaderName::To) {
            Some(Header::To(to)) => Some(to),
            _ => None,
        }
    }

    /// Mutable To header.
    pub fn to_mut(&mut self) -> Option<&mut To> {
        match self.get_mut(&HeaderName::To) {
            Some(Header::To(to)) => Some(to),
            _ => None,
        }
    }

    /// Call-ID header.
    pub fn call_id(&self) -> Option<&CallId> {
        match self.get(&HeaderName::CallId) {
            Some(Header::CallId(call_id)) => Some(call_id),
            _ => None,
        }
    }

    /// CSeq header.
    pub fn cseq(&self) -> Option<&CSeq> {
        match self.get(&HeaderName::CSeq) {
            Some(Header::CSeq(cseq)) => Some(cseq),
            _ => None,
        }
    }

    /// Mutable CSeq header.
    pub fn cseq_mut(&mut self) -> Option<&mut CSeq> {
        match self.get_mut(&HeaderName::CSeq) {
            Some(Header::CSeq(cseq)) => Some(cseq),
            _ => None,
        }
    }

    /// Contact header.
    pub fn contact(&self) -> Option<&Contact> {
        match self.get(&HeaderName::Contact) {
            Some(Header::Contact(contact)) => Some(contact),
            _ => None,
        }
    }

    /// Max-Forwards header.
    pub fn max_forwards(&self) -> Option<&MaxForwards> {
        match self.get(&HeaderName::MaxForwards) {
            Some(Header::MaxForwards(mf)) => Some(mf),
            _ => None,
        }
    }

    /// Content-Length header.
    pub fn content_length(&self) -> Option<&ContentLength> {
        match self.get(&HeaderName::ContentLength) {
            Some(Header::ContentLength(cl)) => Some(cl),
            _ => None,
        }
    }

    /// Content-Type header.
    pub fn content_type(&self) -> Option<&ContentType> {
        match self.get(&HeaderName::ContentType) {
            Some(Header::ContentType(ct)) => Some(ct),
            _ => None,
        }
    }

    /// Route header.
    pub fn route(&self) -> Option<&Route> {
        match self.get(&HeaderName::Route) {
            Some(Header::Route(route)) => Some(route),
            _ => None,
        }
    }

    /// Record-Route header.
    pub fn record_route(&self) -> Option<&RecordRoute> {
        match self.get(&HeaderName::RecordRoute) {
            Some(Header::RecordRoute(rr)) => Some(rr),
            _ => None,
        }
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
