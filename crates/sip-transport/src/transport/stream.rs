//! # Generic stream transport
//!
//! TCP and TLS differ only in how a byte stream is produced, so both are
//! instances of [`StreamTransport`] over a [`StreamFactory`]. The
//! transport owns a listener, a pool of connections keyed by peer address
//! with an idle TTL, and dial-on-demand for outbound traffic (honoring the
//! envelope's `no_dial` flag).
//!
//! Framing uses the incremental [`StreamParser`]; a size-cap violation
//! poisons the parser state, so the connection is dropped rather than
//! risk desynchronized framing. Other grammar errors are answered with an
//! error reply and the connection keeps serving.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use sipflow_sip_core::{StatusCode, StreamParser};

use crate::envelope::{InboundRequest, OutboundRequest, OutboundResponse, Protocol};
use crate::error::{Error, Result};
use crate::interceptor::Interceptors;
use crate::transport::{
    Backoff, MessageSender, RawWriter, SentBy, Transport, TransportConfig, TransportCore,
    TransportEvent,
};

/// Produces listeners and streams for one stream-oriented protocol.
///
/// TLS configuration (certificates, verification) lives entirely inside
/// the factory; the transport never sees a handshake.
#[async_trait]
pub trait StreamFactory: Send + Sync + 'static {
    /// The byte stream this factory produces.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    /// The listener this factory produces.
    type Listener: Send + Sync + 'static;

    /// Protocol identity of streams from this factory.
    fn protocol(&self) -> Protocol;

    /// Binds a listener, returning it with its bound address.
    async fn bind(&self, addr: SocketAddr) -> std::io::Result<(Self::Listener, SocketAddr)>;

    /// Accepts one inbound stream, returning it with the peer address.
    async fn accept(&self, listener: &Self::Listener)
        -> std::io::Result<(Self::Stream, SocketAddr)>;

    /// Dials a peer, returning the stream with its local address.
    async fn connect(&self, remote: SocketAddr) -> std::io::Result<(Self::Stream, SocketAddr)>;
}

struct Connection<S> {
    remote: SocketAddr,
    local: SocketAddr,
    writer: Mutex<WriteHalf<S>>,
    last_used: parking_lot::Mutex<Instant>,
    closed: AtomicBool,
    closing: Notify,
}

impl<S: AsyncWrite + Send + Unpin> Connection<S> {
    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // Close exactly once: further closes are no-ops.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closing.notify_waiters();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionNotFound(self.remote));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        self.touch();
        Ok(())
    }
}

struct StreamInner<F: StreamFactory> {
    core: TransportCore,
    factory: F,
    listener: F::Listener,
    connections: DashMap<SocketAddr, Arc<Connection<F::Stream>>>,
    idle_ttl: Duration,
    // Needed to spawn read loops for dialed connections from &self.
    self_ref: OnceLock<Weak<StreamInner<F>>>,
}

/// A stream transport over some [`StreamFactory`].
pub struct StreamTransport<F: StreamFactory> {
    inner: Arc<StreamInner<F>>,
}

impl<F: StreamFactory> Clone for StreamTransport<F> {
    fn clone(&self) -> Self {
        StreamTransport {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: StreamFactory> StreamTransport<F> {
    /// Binds a stream transport with the given factory.
    pub async fn with_factory(
        factory: F,
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let (listener, local_addr) = factory.bind(addr).await?;
        info!("SIP {} transport bound to {}", factory.protocol(), local_addr);

        let inner = Arc::new(StreamInner {
            core: TransportCore::new(factory.protocol(), local_addr, &config, events_tx),
            factory,
            listener,
            connections: DashMap::new(),
            idle_ttl: config.idle_ttl,
            self_ref: OnceLock::new(),
        });
        let _ = inner.self_ref.set(Arc::downgrade(&inner));
        Ok((StreamTransport { inner }, events_rx))
    }

    /// Number of pooled connections, for tests and introspection.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }
}

impl<F: StreamFactory> StreamInner<F> {
    fn register(
        self: &Arc<Self>,
        stream: F::Stream,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Arc<Connection<F::Stream>> {
        let (read_half, write_half) = tokio::io::split(stream);
        let connection = Arc::new(Connection {
            remote,
            local,
            writer: Mutex::new(write_half),
            last_used: parking_lot::Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            closing: Notify::new(),
        });
        self.connections.insert(remote, Arc::clone(&connection));

        let inner = Arc::clone(self);
        let conn = Arc::clone(&connection);
        tokio::spawn(async move {
            inner.read_loop(read_half, conn).await;
        });
        connection
    }

    // Per-connection read loop: feed the incremental parser, deliver
    // messages, answer per-message grammar errors, drop the connection on
    // anything that poisons framing.
    async fn read_loop(self: Arc<Self>, mut reader: ReadHalf<F::Stream>, conn: Arc<Connection<F::Stream>>) {
        let remote = conn.remote;
        let mut parser = StreamParser::new();
        let mut buf = vec![0u8; 8192];

        'serve: loop {
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                _ = conn.closing.notified() => break 'serve,
                _ = self.core.closing.notified() => break 'serve,
            };
            let len = match read {
                Ok(0) => {
                    debug!(%remote, "peer closed connection");
                    break 'serve;
                }
                Ok(len) => len,
                Err(e) => {
                    debug!(%remote, error = %e, "connection read error");
                    break 'serve;
                }
            };
            conn.touch();
            parser.feed(&buf[..len]);

            loop {
                match parser.next_message() {
                    Ok(Some(message)) => {
                        if let Err(e) = self.core.deliver(message, remote, &*self).await {
                            warn!(%remote, error = %e, "inbound delivery failed");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let fatal = e.is_message_too_large() || e.is_entity_too_large();
                        warn!(%remote, error = %e, fatal, "stream parse error");
                        self.core.handle_parse_error(e, remote, &*self).await;
                        if fatal {
                            // Framing can no longer be trusted.
                            break 'serve;
                        }
                    }
                }
            }
        }

        conn.close().await;
        self.connections
            .remove_if(&remote, |_, existing| Arc::ptr_eq(existing, &conn));
    }

    async fn dial(self: &Arc<Self>, remote: SocketAddr) -> Result<Arc<Connection<F::Stream>>> {
        let (stream, local) = self.factory.connect(remote).await?;
        debug!(%remote, %local, "dialed new connection");
        Ok(self.register(stream, remote, local))
    }

    fn upgrade(&self) -> Result<Arc<Self>> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .ok_or(Error::TransportClosed)
    }

    async fn reap_idle(&self) {
        let expired: Vec<Arc<Connection<F::Stream>>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for() > self.idle_ttl)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in expired {
            debug!(remote = %conn.remote, "closing idle connection");
            conn.close().await;
            self.connections
                .remove_if(&conn.remote, |_, existing| Arc::ptr_eq(existing, &conn));
        }
    }

    async fn close_all(&self) {
        let all: Vec<Arc<Connection<F::Stream>>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in all {
            conn.close().await;
        }
        self.connections.clear();
    }
}

#[async_trait]
impl<F: StreamFactory> RawWriter for StreamInner<F> {
    async fn write_to(&self, bytes: &[u8], remote: SocketAddr, no_dial: bool) -> Result<SocketAddr> {
        if self.core.is_closed() {
            return Err(Error::TransportClosed);
        }
        let existing = self
            .connections
            .get(&remote)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|conn| !conn.is_closed());
        let connection = match existing {
            Some(conn) => conn,
            None if no_dial => return Err(Error::ConnectionNotFound(remote)),
            None => self.upgrade()?.dial(remote).await?,
        };
        connection.write(bytes).await?;
        Ok(connection.local)
    }
}

#[async_trait]
impl<F: StreamFactory> Transport for StreamTransport<F> {
    fn protocol(&self) -> Protocol {
        self.inner.core.protocol
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.core.local_addr)
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
        let inner = &self.inner;
        let mut reap_timer = tokio::time::interval(Duration::from_secs(5));
        reap_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut backoff = Backoff::new();

        loop {
            if inner.core.is_closed() {
                break;
            }
            tokio::select! {
                accepted = inner.factory.accept(&inner.listener) => {
                    match accepted {
                        Ok((stream, remote)) => {
                            backoff.reset();
                            debug!(%remote, "accepted connection");
                            inner.register(stream, remote, inner.core.local_addr);
                        }
                        Err(e) => {
                            if inner.core.is_closed() {
                                break;
                            }
                            warn!(error = %e, "accept failed, backing off");
                            backoff.wait().await;
                        }
                    }
                }
                _ = reap_timer.tick() => inner.reap_idle().await,
                _ = inner.core.closing.notified() => break,
            }
        }

        inner.close_all().await;
        inner.core.emit(TransportEvent::Closed).await;
        info!(
            "{} transport on {} stopped",
            inner.core.protocol, inner.core.local_addr
        );
        Err(Error::TransportClosed)
    }

    async fn close(&self) -> Result<()> {
        self.inner.core.shutdown();
        self.inner.close_all().await;
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
impl<F: StreamFactory> MessageSender for StreamTransport<F> {
    async fn send_request(&self, request: &OutboundRequest) -> Result<()> {
        Transport::send_request(self, request).await
    }

    async fn send_response(&self, response: &OutboundResponse) -> Result<()> {
        Transport::send_response(self, response).await
    }
}

impl<F: StreamFactory> std::fmt::Debug for StreamTransport<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StreamTransport({}, {})",
            self.inner.core.protocol, self.inner.core.local_addr
        )
    }
}
