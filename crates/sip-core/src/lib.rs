//! # sipflow-sip-core
//!
//! SIP message model and codec for the sipflow stack: typed headers and
//! URIs, a packet-mode parser, an incremental stream parser, a canonical
//! renderer and an RFC 2617 digest helper.
//!
//! The crate is transport- and transaction-agnostic; the companion crates
//! `sipflow-sip-transport` and `sipflow-transaction-core` build on it.
//!
//! ```rust
//! use sipflow_sip_core::prelude::*;
//!
//! let data = b"OPTIONS sip:alice@atlanta.com SIP/2.0\r\n\
//! Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
//! From: <sip:bob@biloxi.com>;tag=456248\r\n\
//! To: <sip:alice@atlanta.com>\r\n\
//! Call-ID: c1@pc33.atlanta.com\r\n\
//! CSeq: 1 OPTIONS\r\n\
//! Max-Forwards: 70\r\n\r\n";
//!
//! let message = parse_message(data).unwrap();
//! let request = message.as_request().unwrap();
//! assert_eq!(request.method, Method::Options);
//! assert_eq!(request.headers.top_via_hop().unwrap().branch(), Some("z9hG4bK776asdhds"));
//! ```

pub mod auth;
pub mod error;
pub mod parser;
pub mod types;

pub use error::{Error, ParsePhase, Result};
pub use parser::{parse_message, StreamParser, MAX_MESSAGE_SIZE};
pub use types::via::{generate_branch, MAGIC_COOKIE};
pub use types::{
    Address, CSeq, CallId, Header, HeaderName, Headers, Message, Method, Request, Response,
    StatusCode, Uri, Version, Via, ViaHop,
};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::auth::{authorize_request, digest_response, Credentials};
    pub use crate::error::{Error, ParsePhase, Result};
    pub use crate::parser::{parse_message, StreamParser, MAX_MESSAGE_SIZE};
    pub use crate::types::via::{generate_branch, MAGIC_COOKIE};
    pub use crate::types::{
        Address, Allow, AuthParams, Authorization, CSeq, CallId, Contact, ContentLength,
        ContentType, Expires, Header, HeaderName, Headers, Host, MaxForwards, Message, Method,
        Param, ProxyAuthenticate, ProxyAuthorization, RecordRoute, Request, Require, Response,
        Route, SipUri, StatusCode, Supported, TelUri, Timestamp, To, Uri, Version, Via, ViaHop,
        WwwAuthenticate,
    };
    pub use crate::types::from::From as FromHeader;
    pub use crate::types::param::generate_tag;
}
