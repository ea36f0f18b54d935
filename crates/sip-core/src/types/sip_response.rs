//! # SIP Response
//!
//! A response per [RFC 3261 Section 7.2](https://datatracker.ietf.org/doc/html/rfc3261#section-7.2).
//! [`Response::from_request`] implements the UAS construction rules of
//! Section 8.2.6: Via, From, To, Call-ID and CSeq are copied from the
//! request so the response can retrace the request's path.

use std::fmt;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::content::ContentLength;
use crate::types::header::{Header, HeaderName, Headers};
use crate::types::sip_request::Request;
use crate::types::status::StatusCode;
use crate::types::version::Version;

/// A SIP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The status code
    pub status: StatusCode,
    /// The reason phrase
    pub reason: String,
    /// The protocol version
    pub version: Version,
    /// The headers
    pub headers: Headers,
    /// The body
    pub body: Bytes,
}

impl Response {
    /// A response with the canonical reason phrase for its code.
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            reason: status.canonical_reason().unwrap_or("").to_string(),
            version: Version::SIP_2_0,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Overrides the reason phrase.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds a response to a request, copying the headers the response
    /// needs to retrace the request's path (RFC 3261 Section 8.2.6).
    pub fn from_request(status: StatusCode, request: &Request) -> Self {
        let mut response = Response::new(status);
        for name in [
            HeaderName::Via,
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::CSeq,
        ] {
            for header in request.headers.get_all(&name) {
                response.headers.push(header.clone());
            }
        }
        response
    }

    /// The To-tag of this response, if any.
    pub fn to_tag(&self) -> Option<&str> {
        self.headers.to().and_then(|to| to.tag())
    }

    /// Sets the To-tag, replacing an existing one.
    pub fn set_to_tag(&mut self, tag: impl Into<String>) {
        if let Some(to) = self.headers.to_mut() {
            to.set_tag(tag);
        }
    }

    /// Checks mandatory headers and Content-Length consistency.
    pub fn validate(&self) -> Result<()> {
        for (present, name) in [
            (self.headers.via().is_some(), "Via"),
            (self.headers.from().is_some(), "From"),
            (self.headers.to().is_some(), "To"),
            (self.headers.call_id().is_some(), "Call-ID"),
            (self.headers.cseq().is_some(), "CSeq"),
        ] {
            if !present {
                return Err(Error::MissingHeader(name.to_string()));
            }
        }
        if let Some(cl) = self.headers.content_length() {
            if cl.0 as usize != self.body.len() {
                return Err(Error::InvalidMessage(format!(
                    "Content-Length {} does not match body length {}",
                    cl.0,
                    self.body.len()
                )));
            }
        }
        Ok(())
    }

    /// Sets `Content-Length` to the actual body length.
    pub fn ensure_content_length(&mut self) {
        self.headers
            .set(Header::ContentLength(ContentLength(self.body.len() as u32)));
    }

    /// Renders the response in canonical form.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.version, self.status, self.reason).as_bytes(),
        );
        for header in self.headers.canonical() {
            out.extend_from_slice(header.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        Bytes::from(out)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address::Address;
    use crate::types::call_id::CallId;
    use crate::types::content::MaxForwards;
    use crate::types::cseq::CSeq;
    use crate::types::from::From;
    use crate::types::method::Method;
    use crate::types::to::To;
    use crate::types::uri::{Host, Uri};
    use crate::types::via::{Via, ViaHop};
    use std::str::FromStr;

    fn request() -> Request {
        let uri = Uri::from_str("sip:bob@biloxi.com").unwrap();
        Request::new(Method::Invite, uri.clone())
            .with_header(Header::Via(Via::single(ViaHop::new(
                "UDP",
                Host::from_str("pc33.atlanta.com").unwrap(),
                Some(5060),
            ))))
            .with_header(Header::From(From::new(Address::new(
                Uri::from_str("sip:alice@atlanta.com").unwrap(),
            ))))
            .with_header(Header::To(To::new(Address::new(uri))))
            .with_header(Header::CallId(CallId::new("a84b4c76e66710")))
            .with_header(Header::CSeq(CSeq::new(314159, Method::Invite)))
            .with_header(Header::MaxForwards(MaxForwards(70)))
    }

    #[test]
    fn copies_routing_headers_from_request() {
        let response = Response::from_request(StatusCode::RINGING, &request());
        assert_eq!(response.reason, "Ringing");
        assert!(response.headers.via().is_some());
        assert_eq!(response.headers.cseq().unwrap().method, Method::Invite);
        assert!(response.headers.max_forwards().is_none());
        assert!(response.validate().is_ok());
    }

    #[test]
    fn to_tag_roundtrip() {
        let mut response = Response::from_request(StatusCode::OK, &request());
        assert_eq!(response.to_tag(), None);
        response.set_to_tag("8321234356");
        assert_eq!(response.to_tag(), Some("8321234356"));
    }

    #[test]
    fn status_line_render() {
        let rendered = Response::from_request(StatusCode::OK, &request()).to_bytes();
        assert!(rendered.starts_with(b"SIP/2.0 200 OK\r\n"));
    }
}
