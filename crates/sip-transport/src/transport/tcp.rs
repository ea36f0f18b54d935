//! TCP instantiation of the generic stream transport.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::envelope::Protocol;
use crate::error::Result;
use crate::transport::stream::{StreamFactory, StreamTransport};
use crate::transport::{TransportConfig, TransportEvent};

/// Plain TCP streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpFactory;

#[async_trait]
impl StreamFactory for TcpFactory {
    type Stream = TcpStream;
    type Listener = TcpListener;

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
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
        let (stream, remote) = listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, remote))
    }

    async fn connect(&self, remote: SocketAddr) -> std::io::Result<(Self::Stream, SocketAddr)> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        Ok((stream, local))
    }
}

/// TCP transport for SIP messages.
pub type TcpTransport = StreamTransport<TcpFactory>;

impl TcpTransport {
    /// Binds a TCP transport to the given address.
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        StreamTransport::with_factory(TcpFactory, addr, config).await
    }
}
