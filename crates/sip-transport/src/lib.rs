//! # sipflow-sip-transport
//!
//! SIP transport layer for the sipflow stack: UDP datagram transport,
//! TCP/TLS stream transports with connection pooling, response routing
//! per RFC 3261 18.2.2 / RFC 3263 5, interceptor chains, and a manager
//! multiplexing any number of transports behind one surface.

pub mod envelope;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod resolver;
pub mod transport;

pub use envelope::{
    Inbound, InboundRequest, InboundResponse, Outbound, OutboundRequest, OutboundResponse,
    Protocol, SendOptions,
};
pub use error::{Error, Result};
pub use interceptor::{InterceptAction, Interceptor, InterceptorChain, Interceptors, UnbindHandle};
pub use manager::{TransportKey, TransportManager};
pub use resolver::{response_addrs, DnsResolver, SystemResolver};
pub use transport::{
    MessageSender, SentBy, Transport, TransportConfig, TransportEvent, MTU_MARGIN, UDP_MTU,
};

#[cfg(feature = "tcp")]
pub use transport::stream::{StreamFactory, StreamTransport};
#[cfg(feature = "tcp")]
pub use transport::tcp::TcpTransport;
#[cfg(feature = "tls")]
pub use transport::tls::{TlsFactory, TlsTransport};
#[cfg(feature = "udp")]
pub use transport::udp::UdpTransport;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::envelope::{
        Inbound, InboundRequest, InboundResponse, Outbound, OutboundRequest, OutboundResponse,
        Protocol, SendOptions,
    };
    pub use crate::error::{Error, Result};
    pub use crate::interceptor::{InterceptAction, Interceptor, UnbindHandle};
    pub use crate::manager::{TransportKey, TransportManager};
    pub use crate::resolver::{DnsResolver, SystemResolver};
    pub use crate::transport::{
        MessageSender, SentBy, Transport, TransportConfig, TransportEvent,
    };
    #[cfg(feature = "tcp")]
    pub use crate::transport::tcp::TcpTransport;
    #[cfg(feature = "tls")]
    pub use crate::transport::tls::{TlsFactory, TlsTransport};
    #[cfg(feature = "udp")]
    pub use crate::transport::udp::UdpTransport;
}
