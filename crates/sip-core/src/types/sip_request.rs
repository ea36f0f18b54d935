//! # SIP Request
//!
//! A request per [RFC 3261 Section 7.1](https://datatracker.ietf.org/doc/html/rfc3261#section-7.1):
//! request line, headers, optional body. Rendering follows the canonical
//! header ordering of [`Headers::canonical`]; parsing it back yields an
//! equivalent message.

use std::fmt;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::content::ContentLength;
use crate::types::header::{Header, Headers};
use crate::types::method::Method;
use crate::types::uri::Uri;
use crate::types::version::Version;

/// A SIP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The request method
    pub method: Method,
    /// The request URI
    pub uri: Uri,
    /// The protocol version
    pub version: Version,
    /// The headers
    pub headers: Headers,
    /// The body
    pub body: Bytes,
}

impl Request {
    /// A request with the given method and target, no headers, no body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            version: Version::SIP_2_0,
            headers: Headers::new(),
            body: Bytes::new(),
        }
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

    /// Checks the mandatory headers of RFC 3261 Section 8.1.1: Via, From,
    /// To, Call-ID, CSeq and, for requests, Max-Forwards. ACK is exempt
    /// from Max-Forwards here because locally generated ACKs for non-2xx
    /// responses reuse the original request's headers.
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
        if self.headers.max_forwards().is_none() && !self.method.is_ack() {
            return Err(Error::MissingHeader("Max-Forwards".to_string()));
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

    /// Sets `Content-Length` to the actual body length, replacing any
    /// existing value. Stream-oriented transports call this before
    /// rendering since their framing depends on it.
    pub fn ensure_content_length(&mut self) {
        self.headers
            .set(Header::ContentLength(ContentLength(self.body.len() as u32)));
    }

    /// Renders the request in canonical form.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.method, self.uri, self.version).as_bytes(),
        );
        for header in self.headers.canonical() {
            out.extend_from_slice(header.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        Bytes::from(out)
    }

    /// Shorthand for the CSeq method, falling back to the request method.
    pub fn cseq_method(&self) -> Method {
        self.headers
            .cseq()
            .map(|cseq| cseq.method.clone())
            .unwrap_or_else(|| self.method.clone())
    }
}

impl fmt::Display for Request {
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
    use crate::types::to::To;
    use crate::types::via::{Via, ViaHop};
    use crate::types::uri::Host;
    use std::str::FromStr;

    fn options() -> Request {
        let uri = Uri::from_str("sip:alice@atlanta.com").unwrap();
        Request::new(Method::Options, uri.clone())
            .with_header(Header::Via(Via::single(ViaHop::new(
                "UDP",
                Host::from_str("pc33.atlanta.com").unwrap(),
                Some(5060),
            ))))
            .with_header(Header::From(From::new(Address::new(uri.clone()))))
            .with_header(Header::To(To::new(Address::new(uri))))
            .with_header(Header::CallId(CallId::new("c1@x")))
            .with_header(Header::CSeq(CSeq::new(1, Method::Options)))
            .with_header(Header::MaxForwards(MaxForwards(70)))
    }

    #[test]
    fn validates_mandatory_headers() {
        assert!(options().validate().is_ok());
        let missing = Request::new(Method::Options, Uri::from_str("sip:a@b.c").unwrap());
        assert!(matches!(missing.validate(), Err(Error::MissingHeader(_))));
    }

    #[test]
    fn content_length_mismatch_is_invalid() {
        let mut req = options().with_body("hello");
        req.headers.push(Header::ContentLength(ContentLength(3)));
        assert!(req.validate().is_err());
        req.ensure_content_length();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn renders_request_line_first() {
        let rendered = options().to_bytes();
        assert!(rendered.starts_with(b"OPTIONS sip:alice@atlanta.com SIP/2.0\r\n"));
        assert!(rendered.ends_with(b"\r\n\r\n"));
    }
}
