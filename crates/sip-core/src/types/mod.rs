//! Typed SIP message model: methods, URIs, headers, requests and responses.

pub mod address;
pub mod auth;
pub mod call_id;
pub mod contact;
pub mod content;
pub mod cseq;
pub mod from;
pub mod header;
pub mod message;
pub mod method;
pub mod param;
pub mod route;
pub mod sip_request;
pub mod sip_response;
pub mod status;
pub mod to;
pub mod token_list;
pub mod uri;
pub mod version;
pub mod via;

pub use address::Address;
pub use auth::{AuthParams, Authorization, ProxyAuthenticate, ProxyAuthorization, WwwAuthenticate};
pub use call_id::CallId;
pub use contact::Contact;
pub use content::{ContentLength, ContentType, Expires, MaxForwards, Timestamp};
pub use cseq::CSeq;
pub use header::{Header, HeaderName, Headers};
pub use message::Message;
pub use method::Method;
pub use param::Param;
pub use route::{RecordRoute, Route};
pub use sip_request::Request;
pub use sip_response::Response;
pub use status::StatusCode;
pub use to::To;
pub use token_list::{Allow, Require, Supported};
pub use uri::{Host, SipUri, TelUri, Uri};
pub use version::Version;
pub use via::{Via, ViaHop, MAGIC_COOKIE};
