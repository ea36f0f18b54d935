//! # Transport trait and shared machinery
//!
//! Concrete transports (UDP datagrams, TCP/TLS streams) share everything
//! except the wire itself: outbound Via stamping, size checks, the inbound
//! rewrite/validate/deliver pipeline, response destination selection and
//! error replies. That shared part lives in [`TransportCore`]; a concrete
//! transport contributes a [`RawWriter`] for its socket and a serve loop.

#[cfg(feature = "tcp")]
pub mod stream;
#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
#[cfg(feature = "udp")]
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use sipflow_sip_core::types::uri::Host;
use sipflow_sip_core::{Message, Response, StatusCode};

use crate::envelope::{
    Inbound, InboundRequest, InboundResponse, Outbound, OutboundRequest, OutboundResponse,
    Protocol, SendOptions,
};
use crate::error::{Error, Result};
use crate::interceptor::Interceptors;
use crate::resolver::{response_addrs, DnsResolver, SystemResolver};

/// Conservative path MTU assumed for unreliable transports.
pub const UDP_MTU: usize = 1300;
/// Octets kept in reserve below the MTU (RFC 3261 18.1.1).
pub const MTU_MARGIN: usize = 200;

/// The address a transport writes into the topmost Via of outgoing
/// requests so responses can find their way back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentBy {
    /// Advertised host
    pub host: Host,
    /// Advertised port; when unset the transport's bound port is used
    pub port: Option<u16>,
}

impl fmt::Display for SentBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Events a transport emits to its consumer.
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound request that passed rewrite, validation and interceptors
    Request(InboundRequest),
    /// An inbound response that passed validation and interceptors
    Response(InboundResponse),
    /// A non-fatal inbound failure (parse error, dropped message)
    Error {
        /// What went wrong
        error: Error,
        /// Peer involved, when known
        remote_addr: Option<SocketAddr>,
    },
    /// The transport stopped serving
    Closed,
}

/// Construction knobs shared by all transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Via sent-by override; defaults to the bound local address
    pub sent_by: Option<SentBy>,
    /// Injected DNS
    pub resolver: Arc<dyn DnsResolver>,
    /// Event channel capacity
    pub channel_capacity: usize,
    /// Idle TTL after which a dormant stream connection is closed
    pub idle_ttl: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            sent_by: None,
            resolver: Arc::new(SystemResolver),
            channel_capacity: 100,
            idle_ttl: Duration::from_secs(120),
        }
    }
}

/// A SIP transport: one protocol bound to one local address.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Protocol identity.
    fn protocol(&self) -> Protocol;

    /// Bound local address.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// The Via sent-by identity of this transport.
    fn sent_by(&self) -> SentBy;

    /// Sends a request envelope. The topmost Via must exist; the transport
    /// stamps it with its own transport token and sent-by.
    async fn send_request(&self, request: &OutboundRequest) -> Result<()>;

    /// Sends a response envelope, selecting destinations per RFC 3261
    /// 18.2.2 / RFC 3263 5.
    async fn send_response(&self, response: &OutboundResponse) -> Result<()>;

    /// Stateless reply: builds a response from an inbound request and
    /// sends it back where the request came from.
    async fn respond(&self, request: &InboundRequest, status: StatusCode) -> Result<()>;

    /// Runs the read loop(s) until the transport is closed. Returns
    /// [`Error::TransportClosed`] on an orderly shutdown.
    async fn serve(&self) -> Result<()>;

    /// Marks the transport closing and unblocks its readers and writers.
    async fn close(&self) -> Result<()>;

    /// True once `close` was called.
    fn is_closed(&self) -> bool;

    /// The four interceptor chains of this transport.
    fn interceptors(&self) -> &Interceptors;
}

/// Envelope sending without the rest of the transport surface. Implemented
/// by every transport and by the manager; upper layers hold this.
#[async_trait]
pub trait MessageSender: fmt::Debug + Send + Sync {
    /// Sends a request envelope.
    async fn send_request(&self, request: &OutboundRequest) -> Result<()>;

    /// Sends a response envelope.
    async fn send_response(&self, response: &OutboundResponse) -> Result<()>;
}

/// Raw socket writes, contributed by each concrete transport.
#[async_trait]
pub(crate) trait RawWriter: Send + Sync {
    /// Writes one rendered message to the peer, returning the local
    /// address the socket used. `no_dial` forbids establishing a new
    /// connection on stream transports.
    async fn write_to(&self, bytes: &[u8], remote: SocketAddr, no_dial: bool) -> Result<SocketAddr>;
}

/// State and logic shared by all transports.
pub(crate) struct TransportCore {
    pub(crate) protocol: Protocol,
    pub(crate) local_addr: SocketAddr,
    pub(crate) sent_by: SentBy,
    pub(crate) resolver: Arc<dyn DnsResolver>,
    pub(crate) interceptors: Interceptors,
    pub(crate) events_tx: mpsc::Sender<TransportEvent>,
    pub(crate) closed: AtomicBool,
    pub(crate) closing: Notify,
}

impl TransportCore {
    pub(crate) fn new(
        protocol: Protocol,
        local_addr: SocketAddr,
        config: &TransportConfig,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let sent_by = config.sent_by.clone().unwrap_or(SentBy {
            host: Host::from_ip(local_addr.ip()),
            port: Some(local_addr.port()),
        });
        TransportCore {
            protocol,
            local_addr,
            sent_by,
            resolver: Arc::clone(&config.resolver),
            interceptors: Interceptors::default(),
            events_tx,
            closed: AtomicBool::new(false),
            closing: Notify::new(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::TransportClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closing.notify_waiters();
    }

    // Stamps the topmost Via and renders the request. Unreliable
    // transports refuse messages that will not fit a datagram.
    pub(crate) fn render_request(&self, request: &OutboundRequest) -> Result<Bytes> {
        let protocol = self.protocol;
        let sent_by = self.sent_by.clone();
        let local_port = self.local_addr.port();
        let rendered: Result<Bytes> = request.access_message(|req| {
            let hop = req
                .headers
                .top_via_hop_mut()
                .ok_or_else(|| Error::Core(sipflow_sip_core::Error::MissingHeader("Via".to_string())))?;
            hop.transport = protocol.name().to_string();
            hop.host = sent_by.host.clone();
            // sent-by carries an explicit port whenever one is known; a
            // configured port wins over the bound one.
            hop.port = sent_by.port.or(Some(local_port));
            if protocol.is_streamed() {
                req.ensure_content_length();
            }
            req.validate().map_err(Error::Core)?;
            Ok(req.to_bytes())
        });
        let bytes = rendered?;
        if !protocol.is_reliable() && bytes.len() > UDP_MTU - MTU_MARGIN {
            return Err(Error::MessageTooLarge {
                size: bytes.len(),
                limit: UDP_MTU - MTU_MARGIN,
            });
        }
        Ok(bytes)
    }

    // Renders a response, framing the body on streamed transports.
    pub(crate) fn render_response(&self, response: &OutboundResponse) -> Result<Bytes> {
        let protocol = self.protocol;
        response.access_message(|resp| {
            if protocol.is_streamed() {
                resp.ensure_content_length();
            }
            resp.validate().map_err(Error::Core)?;
            Ok(resp.to_bytes())
        })
    }

    /// Shared send-request path: interceptors, render, resolve the target,
    /// write, record the local address used.
    pub(crate) async fn send_request(
        &self,
        request: &OutboundRequest,
        writer: &dyn RawWriter,
    ) -> Result<()> {
        self.check_open()?;
        if !self.interceptors.outbound_requests.run(request).await? {
            debug!("outbound request dropped by interceptor");
            return Ok(());
        }
        let bytes = self.render_request(request)?;
        let options = request.options();
        let remote = match options.remote_addr {
            Some(remote) => remote,
            None => self.request_target(request).await?,
        };
        let local = writer.write_to(&bytes, remote, options.no_dial).await?;
        request.set_remote_addr(remote);
        request.set_local_addr(local);
        Ok(())
    }

    // Derives a request destination from the request URI when the caller
    // did not name one.
    async fn request_target(&self, request: &OutboundRequest) -> Result<SocketAddr> {
        let (host, port) = request.with_message(|req| match req.uri.as_sip() {
            Some(sip) => Ok((sip.host.clone(), sip.port_or_default())),
            None => Err(Error::InvalidArgument(
                "request URI names no network destination".to_string(),
            )),
        })?;
        match host.as_ip() {
            Some(ip) => Ok(SocketAddr::new(ip, port)),
            None => {
                let name = host.to_string();
                let ips = self
                    .resolver
                    .lookup_host(&name)
                    .await
                    .map_err(|e| Error::Resolve {
                        host: name.clone(),
                        message: e.to_string(),
                    })?;
                ips.first()
                    .map(|ip| SocketAddr::new(*ip, port))
                    .ok_or(Error::Resolve {
                        host: name,
                        message: "no addresses".to_string(),
                    })
            }
        }
    }

    /// Shared send-response path: connection reuse first on reliable
    /// transports, then the RFC 3261 18.2.2 candidate list.
    pub(crate) async fn send_response(
        &self,
        response: &OutboundResponse,
        writer: &dyn RawWriter,
    ) -> Result<()> {
        self.check_open()?;
        if !self.interceptors.outbound_responses.run(response).await? {
            debug!("outbound response dropped by interceptor");
            return Ok(());
        }
        let bytes = self.render_response(response)?;
        let options = response.options();

        // Reuse the connection the request arrived on when there is one.
        if self.protocol.is_reliable() {
            if let Some(remote) = options.remote_addr {
                match writer.write_to(&bytes, remote, true).await {
                    Ok(local) => {
                        response.set_local_addr(local);
                        return Ok(());
                    }
                    Err(e) if e.is_closed() => return Err(e),
                    Err(e) => {
                        debug!(%remote, error = %e, "connection reuse failed, resolving response target");
                    }
                }
            }
        }

        let hop = response.with_message(|resp| resp.headers.top_via_hop().cloned());
        let candidates = match &hop {
            Some(hop) => response_addrs(hop, self.protocol, self.resolver.as_ref()).await?,
            // Without a Via there is nothing to resolve; fall back to the
            // recorded peer, if any.
            None => options.remote_addr.into_iter().collect(),
        };
        if candidates.is_empty() {
            return Err(Error::NoTarget("no response candidates".to_string()));
        }

        let mut failures: Vec<String> = Vec::new();
        for candidate in candidates {
            match writer.write_to(&bytes, candidate, options.no_dial).await {
                Ok(local) => {
                    response.set_remote_addr(candidate);
                    response.set_local_addr(local);
                    return Ok(());
                }
                Err(e) if e.is_closed() => return Err(e),
                Err(e) => failures.push(format!("{}: {}", candidate, e)),
            }
        }
        Err(Error::NoTarget(failures.join("; ")))
    }

    /// Stateless reply to an inbound request.
    pub(crate) async fn respond(
        &self,
        request: &InboundRequest,
        status: StatusCode,
        writer: &dyn RawWriter,
    ) -> Result<()> {
        let response = Response::from_request(status, request.message());
        let outbound = Outbound::with_options(
            response,
            SendOptions {
                protocol: Some(self.protocol),
                local_addr: Some(request.local_addr()),
                remote_addr: Some(request.remote_addr()),
                no_dial: false,
            },
        );
        self.send_response(&outbound, writer).await
    }

    /// Inbound pipeline for one parsed message: Via rewrite and validation
    /// for requests, sent-by check for responses, interceptors, then
    /// emission upward.
    pub(crate) async fn deliver(
        &self,
        message: Message,
        remote: SocketAddr,
        writer: &dyn RawWriter,
    ) -> Result<()> {
        match message {
            Message::Request(mut request) => {
                if let Some(hop) = request.headers.top_via_hop_mut() {
                    hop.rewrite_received(remote);
                }
                if let Err(e) = request.validate() {
                    warn!(%remote, error = %e, "dropping invalid inbound request");
                    let inbound = Inbound::new(request, self.protocol, self.local_addr, remote);
                    let _ = self
                        .respond(&inbound, StatusCode::BAD_REQUEST, writer)
                        .await;
                    self.emit(TransportEvent::Error {
                        error: Error::Core(e),
                        remote_addr: Some(remote),
                    })
                    .await;
                    return Ok(());
                }
                let inbound = Inbound::new(request, self.protocol, self.local_addr, remote);
                if !self.interceptors.inbound_requests.run(&inbound).await? {
                    debug!(%remote, "inbound request dropped by interceptor");
                    return Ok(());
                }
                self.emit(TransportEvent::Request(inbound)).await;
            }
            Message::Response(response) => {
                // RFC 3261 18.1.2: the response must be addressed to us.
                let ours = response
                    .headers
                    .top_via_hop()
                    .is_some_and(|hop| hop.host == self.sent_by.host);
                if !ours {
                    debug!(%remote, "dropping response whose Via sent-by is not ours");
                    return Ok(());
                }
                let inbound = Inbound::new(response, self.protocol, self.local_addr, remote);
                if !self.interceptors.inbound_responses.run(&inbound).await? {
                    debug!(%remote, "inbound response dropped by interceptor");
                    return Ok(());
                }
                self.emit(TransportEvent::Response(inbound)).await;
            }
        }
        Ok(())
    }

    /// Turns a codec failure into a `400`/`413`/`500` reply when the
    /// partial message still carries the routing headers; drops otherwise.
    pub(crate) async fn handle_parse_error(
        &self,
        error: sipflow_sip_core::Error,
        remote: SocketAddr,
        writer: &dyn RawWriter,
    ) {
        let status = if error.is_entity_too_large() {
            StatusCode::REQUEST_ENTITY_TOO_LARGE
        } else if matches!(
            error.root_cause(),
            sipflow_sip_core::Error::InvalidMessage(_)
                | sipflow_sip_core::Error::InvalidHeader { .. }
                | sipflow_sip_core::Error::MissingHeader(_)
                | sipflow_sip_core::Error::InvalidUri(_)
        ) {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::SERVER_INTERNAL_ERROR
        };

        if let Some(Message::Request(partial)) = error.partial_message() {
            let addressable = partial.headers.via().is_some()
                && partial.headers.from().is_some()
                && partial.headers.to().is_some()
                && partial.headers.call_id().is_some()
                && partial.headers.cseq().is_some();
            if addressable {
                let mut request = partial.clone();
                if let Some(hop) = request.headers.top_via_hop_mut() {
                    hop.rewrite_received(remote);
                }
                let inbound = Inbound::new(request, self.protocol, self.local_addr, remote);
                if let Err(e) = self.respond(&inbound, status, writer).await {
                    debug!(%remote, error = %e, "failed to send parse error reply");
                }
            }
        }

        self.emit(TransportEvent::Error {
            error: Error::Core(error),
            remote_addr: Some(remote),
        })
        .await;
    }

    pub(crate) async fn emit(&self, event: TransportEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!("transport event receiver dropped");
        }
    }
}

/// Exponential backoff for temporary read errors: 5 ms doubling up to one
/// minute, reset on success.
pub(crate) struct Backoff {
    delay: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(60);

    pub(crate) fn new() -> Self {
        Backoff {
            delay: Self::INITIAL,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.delay = Self::INITIAL;
    }

    pub(crate) async fn wait(&mut self) {
        tokio::time::sleep(self.delay).await;
        self.delay = (self.delay * 2).min(Self::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        let start = tokio::time::Instant::now();
        backoff.wait().await;
        backoff.wait().await;
        backoff.wait().await;
        // 5 + 10 + 20 ms
        assert_eq!(start.elapsed(), Duration::from_millis(35));
        for _ in 0..20 {
            backoff.wait().await;
        }
        backoff.reset();
        let start = tokio::time::Instant::now();
        backoff.wait().await;
        assert_eq!(start.elapsed(), Duration::from_millis(5));
    }
}
