//! # Message envelopes
//!
//! Messages cross the transport boundary wrapped in envelopes:
//!
//! - [`Inbound`] is immutable. It is built by the reading task and carries
//!   the parsed message together with where and how it arrived.
//! - [`Outbound`] is shared and internally locked. The only way to mutate
//!   the message is [`Outbound::access_message`], which holds the write
//!   lock for the duration of the closure so concurrent renderers never
//!   observe torn state.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sipflow_sip_core::{Request, Response};

use crate::error::Error;

/// Transport protocol identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Unreliable datagram transport
    Udp,
    /// Reliable stream transport
    Tcp,
    /// Reliable stream transport over TLS
    Tls,
}

impl Protocol {
    /// Upper-case token used in Via headers.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
        }
    }

    /// True for stream-oriented transports with delivery guarantees.
    pub fn is_reliable(&self) -> bool {
        !matches!(self, Protocol::Udp)
    }

    /// True when the transport encrypts.
    pub fn is_secured(&self) -> bool {
        matches!(self, Protocol::Tls)
    }

    /// True for byte-stream framing (Content-Length mandatory).
    pub fn is_streamed(&self) -> bool {
        !matches!(self, Protocol::Udp)
    }

    /// The port assumed when a message names no port (RFC 3261 19.1.2).
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Udp | Protocol::Tcp => 5060,
            Protocol::Tls => 5061,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(Protocol::Udp),
            "TCP" => Ok(Protocol::Tcp),
            "TLS" => Ok(Protocol::Tls),
            other => Err(Error::InvalidArgument(format!(
                "unknown transport protocol: {}",
                other
            ))),
        }
    }
}

/// An immutable inbound envelope.
#[derive(Debug, Clone)]
pub struct Inbound<T> {
    msg: Arc<T>,
    protocol: Protocol,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    received_at: SystemTime,
    metadata: Arc<HashMap<String, String>>,
}

impl<T> Inbound<T> {
    /// Wraps a freshly parsed message.
    pub fn new(msg: T, protocol: Protocol, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Inbound {
            msg: Arc::new(msg),
            protocol,
            local_addr,
            remote_addr,
            received_at: SystemTime::now(),
            metadata: Arc::new(HashMap::new()),
        }
    }

    /// The wrapped message.
    pub fn message(&self) -> &T {
        &self.msg
    }

    /// Transport protocol the message arrived on.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Local address that accepted the message.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer address the message came from.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// When the message was read off the wire.
    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// Open-ended metadata attached along the inbound path.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Returns the envelope with a metadata entry added.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.metadata).insert(key.into(), value.into());
        self
    }
}

impl<T: Clone> Inbound<T> {
    /// A private copy of the message, for callers that need ownership.
    pub fn clone_message(&self) -> T {
        (*self.msg).clone()
    }
}

/// An inbound request envelope.
pub type InboundRequest = Inbound<Request>;
/// An inbound response envelope.
pub type InboundResponse = Inbound<Response>;

/// Where and how an outbound envelope wants to be sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Transport protocol the caller wants; the manager falls back to its
    /// default transport when unset
    pub protocol: Option<Protocol>,
    /// Local address to send from; updated after the write with the
    /// address the socket actually used
    pub local_addr: Option<SocketAddr>,
    /// Peer address to send to
    pub remote_addr: Option<SocketAddr>,
    /// On reliable transports, only reuse an existing connection; never
    /// dial a new one
    pub no_dial: bool,
}

#[derive(Debug)]
struct OutboundShared<T> {
    msg: RwLock<T>,
    options: RwLock<SendOptions>,
}

/// A mutable outbound envelope, shareable across tasks.
#[derive(Debug, Clone)]
pub struct Outbound<T> {
    shared: Arc<OutboundShared<T>>,
}

impl<T: Clone> Outbound<T> {
    /// Wraps a message with default send options.
    pub fn new(msg: T) -> Self {
        Self::with_options(msg, SendOptions::default())
    }

    /// Wraps a message with explicit send options.
    pub fn with_options(msg: T, options: SendOptions) -> Self {
        Outbound {
            shared: Arc::new(OutboundShared {
                msg: RwLock::new(msg),
                options: RwLock::new(options),
            }),
        }
    }

    /// Mutates the message under the write lock. This is the only writer
    /// path; the lock is held for exactly the closure's duration.
    pub fn access_message<R>(&self, update: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.shared.msg.write();
        update(&mut guard)
    }

    /// Reads the message under the read lock.
    pub fn with_message<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        let guard = self.shared.msg.read();
        read(&guard)
    }

    /// A snapshot copy of the message.
    pub fn message(&self) -> T {
        self.shared.msg.read().clone()
    }

    /// A snapshot of the send options.
    pub fn options(&self) -> SendOptions {
        self.shared.options.read().clone()
    }

    /// Sets the target peer address.
    pub fn set_remote_addr(&self, addr: SocketAddr) {
        self.shared.options.write().remote_addr = Some(addr);
    }

    /// Records the local address the write actually used.
    pub fn set_local_addr(&self, addr: SocketAddr) {
        self.shared.options.write().local_addr = Some(addr);
    }

    /// Selects the transport protocol.
    pub fn set_protocol(&self, protocol: Protocol) {
        self.shared.options.write().protocol = Some(protocol);
    }

    /// Forbids dialing a new connection for this envelope.
    pub fn set_no_dial(&self, no_dial: bool) {
        self.shared.options.write().no_dial = no_dial;
    }
}

/// An outbound request envelope.
pub type OutboundRequest = Outbound<Request>;
/// An outbound response envelope.
pub type OutboundResponse = Outbound<Response>;

#[cfg(test)]
mod tests {
    use super::*;
    use sipflow_sip_core::prelude::*;

    #[test]
    fn protocol_metadata() {
        assert!(Protocol::Tcp.is_reliable());
        assert!(!Protocol::Udp.is_streamed());
        assert_eq!(Protocol::Tls.default_port(), 5061);
        assert_eq!(Protocol::from_str("udp").unwrap(), Protocol::Udp);
        assert!(Protocol::from_str("sctp").is_err());
    }

    #[test]
    fn outbound_access_is_scoped() {
        let request = Request::new(Method::Options, Uri::from_str("sip:a@b.c").unwrap());
        let outbound = Outbound::new(request);
        outbound.access_message(|req| {
            req.headers.push(Header::CallId(CallId::new("c1")));
        });
        assert_eq!(
            outbound.with_message(|req| req.headers.call_id().cloned()).unwrap().value(),
            "c1"
        );
    }

    #[test]
    fn outbound_clones_share_state() {
        let request = Request::new(Method::Options, Uri::from_str("sip:a@b.c").unwrap());
        let outbound = Outbound::new(request);
        let other = outbound.clone();
        other.set_remote_addr("10.0.0.9:5060".parse().unwrap());
        assert_eq!(
            outbound.options().remote_addr,
            Some("10.0.0.9:5060".parse().unwrap())
        );
    }
}
