//! The message sum type: a request or a response.

use std::fmt;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::header::Headers;
use crate::types::method::Method;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;

/// Either a SIP request or a SIP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A request
    Request(Request),
    /// A response
    Response(Response),
}

impl Message {
    /// True for requests.
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    /// True for responses.
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// The request, when this is one.
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(request) => Some(request),
            Message::Response(_) => None,
        }
    }

    /// The response, when this is one.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(response) => Some(response),
        }
    }

    /// The headers of either variant.
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(request) => &request.headers,
            Message::Response(response) => &response.headers,
        }
    }

    /// Mutable headers of either variant.
    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(request) => &mut request.headers,
            Message::Response(response) => &mut response.headers,
        }
    }

    /// The body of either variant.
    pub fn body(&self) -> &Bytes {
        match self {
            Message::Request(request) => &request.body,
            Message::Response(response) => &response.body,
        }
    }

    /// The method governing this message: the request method, or for a
    /// response the method recorded in its CSeq.
    pub fn method(&self) -> Option<Method> {
        match self {
            Message::Request(request) => Some(request.method.clone()),
            Message::Response(response) => {
                response.headers.cseq().map(|cseq| cseq.method.clone())
            }
        }
    }

    /// Mandatory header validation for either variant.
    pub fn validate(&self) -> Result<()> {
        match self {
            Message::Request(request) => request.validate(),
            Message::Response(response) => response.validate(),
        }
    }

    /// Renders either variant in canonical form.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(request) => request.to_bytes(),
            Message::Response(response) => response.to_bytes(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(request) => request.fmt(f),
            Message::Response(response) => response.fmt(f),
        }
    }
}

impl core::convert::From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl core::convert::From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}
