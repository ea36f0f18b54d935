//! TLS instantiation of the generic stream transport.
//!
//! Handshake policy is injected: the caller builds the rustls server and
//! client configurations (certificates, roots, verification) and hands
//! over an acceptor/connector pair. The transport itself only moves SIP
//! bytes over the resulting streams.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::envelope::Protocol;
use crate::error::Result;
use crate::transport::stream::{StreamFactory, StreamTransport};
use crate::transport::{TransportConfig, TransportEvent};

/// TLS streams over TCP, driven by injected rustls configuration.
#[derive(Clone)]
pub struct TlsFactory {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
}

impl TlsFactory {
    /// Wraps an acceptor/connector pair.
    pub fn new(acceptor: TlsAcceptor, connector: TlsConnector) -> Self {
        TlsFactory {
            acceptor,
            connector,
        }
    }

    /// Convenience constructor from raw rustls configurations.
    pub fn from_configs(
        server: Arc<rustls::ServerConfig>,
        client: Arc<rustls::ClientConfig>,
    ) -> Self {
        TlsFactory {
            acceptor: TlsAcceptor::from(server),
            connector: TlsConnector::from(client),
        }
    }
}

#[async_trait]
impl StreamFactory for TlsFactory {
    type Stream = TlsStream<TcpStream>;
    type Listener = TcpListener;

    fn protocol(&self) -> Protocol {
        Protocol::Tls
    }

    async fn bind(&self, addr: SocketAddr) -> std::io::Result<(Self::Listener, SocketAddr)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        Ok((listener, local))
    }

    async fn accept(
        &self,
        listener: &Self::Listener,
    ) -> std::io::Result<(Self::Stream, SocketAddr)> {
        let (tcp, remote) = listener.accept().await?;
        tcp.set_nodelay(true)?;
        let tls = self.acceptor.accept(tcp).await?;
        Ok((TlsStream::Server(tls), remote))
    }

    async fn connect(&self, remote: SocketAddr) -> std::io::Result<(Self::Stream, SocketAddr)> {
        let tcp = TcpStream::connect(remote).await?;
        tcp.set_nodelay(true)?;
        let local = tcp.local_addr()?;
        // Peers are dialed by address; certificate identity is therefore
        // checked against the IP, which the injected client config must
        // be prepared for.
        let server_name = ServerName::IpAddress(remote.ip().into());
        let tls = self.connector.connect(server_name, tcp).await?;
        Ok((TlsStream::Client(tls), local))
    }
}

/// TLS transport for SIP messages.
pub type TlsTransport = StreamTransport<TlsFactory>;

impl TlsTransport {
    /// Binds a TLS transport with the given handshake factory.
    pub async fn bind(
        factory: TlsFactory,
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        StreamTransport::with_factory(factory, addr, config).await
    }
}
