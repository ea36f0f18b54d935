//! # UDP transport
//!
//! One datagram socket per transport. All reads happen in [`serve`]; no
//! per-peer state is kept. Each datagram must contain one whole message
//! (packet-mode parsing); trailing bytes are ignored and CRLF keep-alives
//! are skipped by the codec.
//!
//! [`serve`]: UdpTransport::serve

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use sipflow_sip_core::{parse_message, StatusCode};

use crate::envelope::{InboundRequest, OutboundRequest, OutboundResponse, Protocol};
use crate::error::{Error, Result};
use crate::interceptor::Interceptors;
use crate::transport::{
    Backoff, MessageSender, RawWriter, SentBy, Transport, TransportConfig, TransportCore,
    TransportEvent,
};

struct UdpInner {
    core: TransportCore,
    socket: UdpSocket,
}

/// UDP transport for SIP messages.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpInner>,
}

impl UdpTransport {
    /// Binds a UDP transport to the given address.
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpInner {
                core: TransportCore::new(Protocol::Udp, local_addr, &config, events_tx),
                socket,
            }),
        };
        Ok((transport, events_rx))
    }
}

#[async_trait]
impl RawWriter for UdpInner {
    async fn write_to(&self, bytes: &[u8], remote: SocketAddr, _no_dial: bool) -> Result<SocketAddr> {
        if self.core.is_closed() {
            return Err(Error::TransportClosed);
        }
        let written = self.socket.send_to(bytes, remote).await?;
        if written != bytes.len() {
            return Err(Error::Io(format!(
                "short datagram write: {} of {} bytes",
                written,
                bytes.len()
            )));
        }
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    fn sent_by(&self) -> SentBy {
        self.inner.core.sent_by.clone()
    }

    async fn send_request(&self, request: &OutboundRequest) -> Result<()> {
        self.inner.core.send_request(request, &*self.inner).await
    }

    async fn send_response(&self, response: &OutboundResponse) -> Result<()> {
        self.inner.core.send_response(response, &*self.inner).await
    }

    async fn respond(&self, request: &InboundRequest, status: StatusCode) -> Result<()> {
        self.inner.core.respond(request, status, &*self.inner).await
    }

    async fn serve(&self) -> Result<()> {
        let inner = &*self.inner;
        let mut buf = vec![0u8; 65_535];
        let mut backoff = Backoff::new();

        loop {
            if inner.core.is_closed() {
                break;
            }
            let received = tokio::select! {
                received = inner.socket.recv_from(&mut buf) => received,
                _ = inner.core.closing.notified() => break,
            };
            match received {
                Ok((len, remote)) => {
                    backoff.reset();
                    debug!(%remote, len, "received datagram");
                    match parse_message(&buf[..len]) {
                        Ok(message) => {
                            // A panic in a handler must not take the whole
                            // transport down; datagram framing is unaffected.
                            let delivery = std::panic::AssertUnwindSafe(
                                inner.core.deliver(message, remote, inner),
                            )
                            .catch_unwind()
                            .await;
                            match delivery {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    warn!(%remote, error = %e, "inbound delivery failed")
                                }
                                Err(_) => error!(%remote, "panic in message handler"),
                            }
                        }
                        Err(e) => {
                            warn!(%remote, error = %e, "failed to parse datagram");
                            inner.core.handle_parse_error(e, remote, inner).await;
                        }
                    }
                }
                Err(e) => {
                    if inner.core.is_closed() {
                        break;
                    }
                    warn!(error = %e, "UDP read error, backing off");
                    backoff.wait().await;
                }
            }
        }

        inner.core.emit(TransportEvent::Closed).await;
        info!("UDP transport on {} stopped", inner.core.local_addr);
        Err(Error::TransportClosed)
    }

    async fn close(&self) -> Result<()> {
        self.inner.core.shutdown();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.core.is_closed()
    }

    fn interceptors(&self) -> &Interceptors {
        &self.inner.core.interceptors
    }
}

#[async_trait]
impl MessageSender for UdpTransport {
    async fn send_request(&self, request: &OutboundRequest) -> Result<()> {
        Transport::send_request(self, request).await
    }

    async fn send_response(&self, response: &OutboundResponse) -> Result<()> {
        Transport::send_response(self, response).await
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.core.local_addr)
    }
}
