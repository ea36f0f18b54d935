//! # Response routing
//!
//! DNS is injected behind [`DnsResolver`] so hosts can plug in caching or
//! SRV/NAPTR-aware resolvers; the default [`SystemResolver`] uses the
//! operating system's lookup and answers SRV queries with nothing.
//!
//! [`response_addrs`] implements the server response routing order of
//! [RFC 3261 Section 18.2.2](https://datatracker.ietf.org/doc/html/rfc3261#section-18.2.2)
//! and [RFC 3263 Section 5](https://datatracker.ietf.org/doc/html/rfc3263#section-5)
//! over the topmost Via hop: `maddr` first, then `received`/`rport`, then
//! the `sent-by` host via SRV and address lookups.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tracing::debug;

use sipflow_sip_core::types::uri::Host;
use sipflow_sip_core::ViaHop;

use crate::envelope::Protocol;
use crate::error::{Error, Result};

/// Injected name resolution.
#[async_trait]
pub trait DnsResolver: Send + Sync + fmt::Debug {
    /// Resolves a host name to addresses, in preference order.
    async fn lookup_host(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;

    /// Resolves `_service._proto.name` SRV targets to (host, port) pairs,
    /// in priority order. The default implementation knows nothing.
    async fn lookup_srv(
        &self,
        _service: &str,
        _proto: &str,
        _name: &str,
    ) -> std::io::Result<Vec<(String, u16)>> {
        Ok(Vec::new())
    }
}

/// Resolver backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup_host(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

// SRV service/proto labels for a transport.
fn srv_labels(protocol: Protocol) -> (&'static str, &'static str) {
    match protocol {
        Protocol::Udp => ("sip", "udp"),
        Protocol::Tcp => ("sip", "tcp"),
        Protocol::Tls => ("sips", "tcp"),
    }
}

async fn resolve_host(
    resolver: &dyn DnsResolver,
    host: &Host,
    port: u16,
    out: &mut Vec<SocketAddr>,
) -> Result<()> {
    match host {
        Host::Ipv4(ip) => out.push(SocketAddr::new(IpAddr::V4(*ip), port)),
        Host::Ipv6(ip) => out.push(SocketAddr::new(IpAddr::V6(*ip), port)),
        Host::Domain(name) => {
            let ips = resolver
                .lookup_host(name)
                .await
                .map_err(|e| Error::Resolve {
                    host: name.clone(),
                    message: e.to_string(),
                })?;
            out.extend(ips.into_iter().map(|ip| SocketAddr::new(ip, port)));
        }
    }
    Ok(())
}

/// Yields response destinations for the topmost Via hop, in the order they
/// must be tried.
pub async fn response_addrs(
    hop: &ViaHop,
    protocol: Protocol,
    resolver: &dyn DnsResolver,
) -> Result<Vec<SocketAddr>> {
    let mut candidates: Vec<SocketAddr> = Vec::new();

    // The port to use when a candidate source carries none: rport wins,
    // then the sent-by port, then the protocol default.
    let fallback_port = match hop.rport() {
        Some(Some(rport)) => rport,
        _ => hop.port.unwrap_or_else(|| protocol.default_port()),
    };

    // 1. maddr, when present (multicast replies; ttl is the sender's concern).
    if let Some(maddr) = hop.maddr() {
        match maddr.parse::<IpAddr>() {
            Ok(ip) => candidates.push(SocketAddr::new(ip, fallback_port)),
            Err(_) => {
                resolve_host(
                    resolver,
                    &Host::Domain(maddr.to_string()),
                    fallback_port,
                    &mut candidates,
                )
                .await?;
            }
        }
    }

    // 2. received (+ rport).
    if let Some(received) = hop.received() {
        if let Ok(ip) = received.parse::<IpAddr>() {
            candidates.push(SocketAddr::new(ip, fallback_port));
        } else {
            debug!(received, "ignoring unparseable received parameter");
        }
    }

    // 3. sent-by host. For a domain without an explicit port, RFC 3263
    // consults SRV before address records.
    if let Host::Domain(name) = &hop.host {
        if hop.port.is_none() {
            let (service, proto) = srv_labels(protocol);
            if let Ok(targets) = resolver.lookup_srv(service, proto, name).await {
                for (target, port) in targets {
                    let _ = resolve_host(
                        resolver,
                        &Host::Domain(target),
                        port,
                        &mut candidates,
                    )
                    .await;
                }
            }
        }
    }
    let sent_by_port = hop.port.unwrap_or_else(|| protocol.default_port());
    resolve_host(resolver, &hop.host, sent_by_port, &mut candidates).await?;

    candidates.dedup();
    Ok(candidates)
}
