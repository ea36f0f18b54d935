//! # Transaction matching keys
//!
//! Matching follows [RFC 3261 Section 17.2.3](https://datatracker.ietf.org/doc/html/rfc3261#section-17.2.3):
//! when the topmost Via branch carries the `z9hG4bK` cookie, a server
//! transaction is identified by `(branch, sent-by, method)` with ACK (and
//! CANCEL) folded onto the INVITE method, and a client transaction by
//! `(branch, CSeq method)`. Requests from RFC 2543 peers lack the cookie
//! and fall back to a tuple of dialog-identifying headers; ACKs for 2xx
//! responses in that world can only be matched by the To-tag of the last
//! response, which the layer resolves by scanning (see
//! [`crate::layer::TransactionLayer`]).

use std::fmt;
use serde::{Deserialize, Serialize};

use sipflow_sip_core::{Method, Request, Response};

use crate::error::{Error, Result};

/// Identity of a transaction inside the stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKey {
    /// Server transaction keyed per RFC 3261
    Server {
        /// Via branch parameter
        branch: String,
        /// Topmost Via sent-by, as `host` or `host:port`
        sent_by: String,
        /// Request method, with ACK and CANCEL folded onto INVITE
        method: Method,
    },
    /// Client transaction keyed per RFC 3261
    Client {
        /// Via branch parameter
        branch: String,
        /// CSeq method
        method: Method,
    },
    /// Server transaction keyed per RFC 2543 (no magic cookie)
    Rfc2543 {
        /// Call-ID value
        call_id: String,
        /// From tag, empty when absent
        from_tag: String,
        /// CSeq sequence number
        cseq: u32,
        /// CSeq method, with ACK folded onto INVITE
        method: Method,
        /// Topmost Via sent-by
        via_sent_by: String,
        /// Request URI
        request_uri: String,
    },
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKey::Server {
                branch,
                sent_by,
                method,
            } => write!(f, "server/{}/{}/{}", branch, sent_by, method),
            TransactionKey::Client { branch, method } => {
                write!(f, "client/{}/{}", branch, method)
            }
            TransactionKey::Rfc2543 {
                call_id,
                from_tag,
                cseq,
                method,
                via_sent_by,
                request_uri,
            } => write!(
                f,
                "rfc2543/{}/{}/{}/{}/{}/{}",
                call_id, from_tag, cseq, method, via_sent_by, request_uri
            ),
        }
    }
}

// An ACK is matched against the INVITE transaction it acknowledges. A
// CANCEL also targets an INVITE, but constitutes its own transaction; the
// layer computes the target key separately (see `cancel_target_key`).
fn fold_method(method: &Method) -> Method {
    match method {
        Method::Ack => Method::Invite,
        other => other.clone(),
    }
}

/// The key of the INVITE server transaction a CANCEL aims at: the CANCEL's
/// own key with the method swapped for INVITE (RFC 3261 9.2).
pub fn cancel_target_key(request: &Request) -> Result<TransactionKey> {
    let mut key = server_key(request)?;
    match &mut key {
        TransactionKey::Server { method, .. } => *method = Method::Invite,
        TransactionKey::Rfc2543 { method, .. } => *method = Method::Invite,
        TransactionKey::Client { .. } => unreachable!("server_key never yields a client key"),
    }
    Ok(key)
}

fn sent_by_of(request: &Request) -> Result<String> {
    let hop = request
        .headers
        .top_via_hop()
        .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("Via".to_string())))?;
    Ok(match hop.port {
        Some(port) => format!("{}:{}", hop.host, port),
        None => hop.host.to_string(),
    })
}

/// Computes the server-side key for an inbound request.
pub fn server_key(request: &Request) -> Result<TransactionKey> {
    let hop = request
        .headers
        .top_via_hop()
        .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("Via".to_string())))?;

    if hop.is_rfc3261_branch() {
        return Ok(TransactionKey::Server {
            branch: hop.branch().unwrap_or_default().to_string(),
            sent_by: sent_by_of(request)?,
            method: fold_method(&request.method),
        });
    }

    let call_id = request
        .headers
        .call_id()
        .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("Call-ID".to_string())))?
        .value()
        .to_string();
    let cseq = request
        .headers
        .cseq()
        .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("CSeq".to_string())))?;
    let from_tag = request
        .headers
        .from()
        .and_then(|from| from.tag())
        .unwrap_or_default()
        .to_string();
    Ok(TransactionKey::Rfc2543 {
        call_id,
        from_tag,
        cseq: cseq.seq,
        method: fold_method(&cseq.method),
        via_sent_by: sent_by_of(request)?,
        request_uri: request.uri.to_string(),
    })
}

/// Computes the client-side key for an outbound request.
pub fn client_key(request: &Request) -> Result<TransactionKey> {
    let hop = request
        .headers
        .top_via_hop()
        .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("Via".to_string())))?;
    let branch = hop
        .branch()
        .ok_or_else(|| Error::TransactionNotMatched("request Via has no branch".to_string()))?;
    Ok(TransactionKey::Client {
        branch: branch.to_string(),
        method: fold_method(&request.cseq_method()),
    })
}

/// Computes the client-side key an inbound response matches against:
/// the topmost Via branch plus the CSeq method.
pub fn response_key(response: &Response) -> Result<TransactionKey> {
    let hop = response
        .headers
        .top_via_hop()
        .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("Via".to_string())))?;
    let branch = hop
        .branch()
        .ok_or_else(|| Error::TransactionNotMatched("response Via has no branch".to_string()))?;
    let cseq = response
        .headers
        .cseq()
        .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("CSeq".to_string())))?;
    Ok(TransactionKey::Client {
        branch: branch.to_string(),
        method: fold_method(&cseq.method),
    })
}
