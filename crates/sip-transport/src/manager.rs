//! # Transport manager
//!
//! Tracks a set of transports keyed by `(protocol, local address)` with at
//! most one default, fans their events into a single stream, dispatches
//! outbound envelopes to the matching transport, and rebroadcasts
//! interceptor installations to every tracked transport, present and
//! future.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::envelope::{
    InboundRequest, InboundResponse, OutboundRequest, OutboundResponse, Protocol, SendOptions,
};
use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, UnbindHandle};
use crate::transport::{MessageSender, Transport, TransportEvent};

/// Identity of a tracked transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportKey {
    /// Transport protocol
    pub protocol: Protocol,
    /// Bound local address
    pub local_addr: SocketAddr,
}

// One manager-installed interceptor, to be applied to every transport.
enum ManagedInterceptor {
    InboundRequest(Arc<dyn Interceptor<InboundRequest>>),
    InboundResponse(Arc<dyn Interceptor<InboundResponse>>),
    OutboundRequest(Arc<dyn Interceptor<OutboundRequest>>),
    OutboundResponse(Arc<dyn Interceptor<OutboundResponse>>),
}

impl ManagedInterceptor {
    fn install_into(&self, transport: &dyn Transport) -> u64 {
        let chains = transport.interceptors();
        match self {
            ManagedInterceptor::InboundRequest(i) => chains.inbound_requests.install(Arc::clone(i)),
            ManagedInterceptor::InboundResponse(i) => {
                chains.inbound_responses.install(Arc::clone(i))
            }
            ManagedInterceptor::OutboundRequest(i) => {
                chains.outbound_requests.install(Arc::clone(i))
            }
            ManagedInterceptor::OutboundResponse(i) => {
                chains.outbound_responses.install(Arc::clone(i))
            }
        }
    }

    fn remove_from(&self, transport: &dyn Transport, entry_id: u64) {
        let chains = transport.interceptors();
        match self {
            ManagedInterceptor::InboundRequest(_) => chains.inbound_requests.remove(entry_id),
            ManagedInterceptor::InboundResponse(_) => chains.inbound_responses.remove(entry_id),
            ManagedInterceptor::OutboundRequest(_) => chains.outbound_requests.remove(entry_id),
            ManagedInterceptor::OutboundResponse(_) => chains.outbound_responses.remove(entry_id),
        }
    }
}

struct InstallRecord {
    id: u64,
    interceptor: ManagedInterceptor,
    // (transport, chain entry id) per installation site
    bindings: Vec<(Weak<dyn Transport>, u64)>,
}

struct ManagerInner {
    // Insertion order doubles as the deterministic fallback order.
    transports: RwLock<Vec<(TransportKey, Arc<dyn Transport>)>>,
    default_key: RwLock<Option<TransportKey>>,
    events_tx: mpsc::Sender<TransportEvent>,
    installed: Mutex<Vec<InstallRecord>>,
    next_install_id: AtomicU64,
    closed: AtomicBool,
}

/// A set of transports behind one sending and receiving surface.
#[derive(Clone)]
pub struct TransportManager {
    inner: Arc<ManagerInner>,
}

impl TransportManager {
    /// Creates an empty manager and the fan-in event stream.
    pub fn new(channel_capacity: usize) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(channel_capacity);
        (
            TransportManager {
                inner: Arc::new(ManagerInner {
                    transports: RwLock::new(Vec::new()),
                    default_key: RwLock::new(None),
                    events_tx,
                    installed: Mutex::new(Vec::new()),
                    next_install_id: AtomicU64::new(1),
                    closed: AtomicBool::new(false),
                }),
            },
            events_rx,
        )
    }

    /// Tracks a transport and forwards its events into the manager stream.
    /// The first transport added becomes the default; `make_default`
    /// promotes a later one.
    pub fn add_transport(
        &self,
        transport: Arc<dyn Transport>,
        mut events: mpsc::Receiver<TransportEvent>,
        make_default: bool,
    ) -> Result<TransportKey> {
        let key = TransportKey {
            protocol: transport.protocol(),
            local_addr: transport.local_addr()?,
        };
        {
            let mut transports = self.inner.transports.write();
            if transports.iter().any(|(existing, _)| *existing == key) {
                return Err(Error::InvalidArgument(format!(
                    "transport already tracked: {} {}",
                    key.protocol, key.local_addr
                )));
            }
            transports.push((key, Arc::clone(&transport)));
        }

        // Everything installed so far applies to this transport too.
        {
            let mut installed = self.inner.installed.lock();
            for record in installed.iter_mut() {
                let entry_id = record.interceptor.install_into(transport.as_ref());
                record.bindings.push((Arc::downgrade(&transport), entry_id));
            }
        }

        {
            let mut default_key = self.inner.default_key.write();
            if make_default || default_key.is_none() {
                *default_key = Some(key);
            }
        }

        let events_tx = self.inner.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        info!("tracking {} transport on {}", key.protocol, key.local_addr);
        Ok(key)
    }

    /// The transport tracked under a key.
    pub fn get(&self, key: &TransportKey) -> Option<Arc<dyn Transport>> {
        self.inner
            .transports
            .read()
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, t)| Arc::clone(t))
    }

    /// Number of tracked transports.
    pub fn len(&self) -> usize {
        self.inner.transports.read().len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.transports.read().is_empty()
    }

    // Selection order: the envelope's fully-specified key, the default
    // transport, then the first tracked one.
    fn select(&self, options: &SendOptions) -> Result<Arc<dyn Transport>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed);
        }
        let transports = self.inner.transports.read();
        if let (Some(protocol), Some(local_addr)) = (options.protocol, options.local_addr) {
            let key = TransportKey {
                protocol,
                local_addr,
            };
            if let Some((_, transport)) = transports.iter().find(|(existing, _)| *existing == key) {
                return Ok(Arc::clone(transport));
            }
        }
        if let Some(default_key) = *self.inner.default_key.read() {
            if let Some((_, transport)) =
                transports.iter().find(|(existing, _)| *existing == default_key)
            {
                return Ok(Arc::clone(transport));
            }
        }
        transports
            .first()
            .map(|(_, transport)| Arc::clone(transport))
            .ok_or(Error::NoTransport)
    }

    /// Runs every tracked transport until all have stopped, returning the
    /// joined non-shutdown errors.
    pub async fn serve(&self) -> Result<()> {
        let transports: Vec<Arc<dyn Transport>> = self
            .inner
            .transports
            .read()
            .iter()
            .map(|(_, t)| Arc::clone(t))
            .collect();
        let mut set = JoinSet::new();
        for transport in transports {
            set.spawn(async move { transport.serve().await });
        }

        let mut failures: Vec<String> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_closed() => {}
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(e) => failures.push(format!("serve task failed: {}", e)),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Io(failures.join("; ")))
        }
    }

    /// Signals shutdown and closes every transport.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let transports: Vec<Arc<dyn Transport>> = self
            .inner
            .transports
            .read()
            .iter()
            .map(|(_, t)| Arc::clone(t))
            .collect();
        let mut failures: Vec<String> = Vec::new();
        for transport in transports {
            match transport.close().await {
                Ok(()) => {}
                Err(e) if e.is_closed() => {}
                Err(e) => failures.push(e.to_string()),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Io(failures.join("; ")))
        }
    }

    /// Installs an inbound request interceptor on all tracked transports,
    /// current and future.
    pub fn use_inbound_request_interceptor(
        &self,
        interceptor: Arc<dyn Interceptor<InboundRequest>>,
    ) -> UnbindHandle {
        self.install(ManagedInterceptor::InboundRequest(interceptor))
    }

    /// Installs an inbound response interceptor on all tracked transports.
    pub fn use_inbound_response_interceptor(
        &self,
        interceptor: Arc<dyn Interceptor<InboundResponse>>,
    ) -> UnbindHandle {
        self.install(ManagedInterceptor::InboundResponse(interceptor))
    }

    /// Installs an outbound request interceptor on all tracked transports.
    pub fn use_outbound_request_interceptor(
        &self,
        interceptor: Arc<dyn Interceptor<OutboundRequest>>,
    ) -> UnbindHandle {
        self.install(ManagedInterceptor::OutboundRequest(interceptor))
    }

    /// Installs an outbound response interceptor on all tracked transports.
    pub fn use_outbound_response_interceptor(
        &self,
        interceptor: Arc<dyn Interceptor<OutboundResponse>>,
    ) -> UnbindHandle {
        self.install(ManagedInterceptor::OutboundResponse(interceptor))
    }

    fn install(&self, interceptor: ManagedInterceptor) -> UnbindHandle {
        let id = self.inner.next_install_id.fetch_add(1, Ordering::Relaxed);
        let mut bindings = Vec::new();
        for (_, transport) in self.inner.transports.read().iter() {
            let entry_id = interceptor.install_into(transport.as_ref());
            bindings.push((Arc::downgrade(transport), entry_id));
        }
        self.inner.installed.lock().push(InstallRecord {
            id,
            interceptor,
            bindings,
        });

        let inner = Arc::clone(&self.inner);
        UnbindHandle::new(move || {
            let mut installed = inner.installed.lock();
            if let Some(idx) = installed.iter().position(|record| record.id == id) {
                let record = installed.remove(idx);
                for (weak, entry_id) in &record.bindings {
                    if let Some(transport) = weak.upgrade() {
                        record.interceptor.remove_from(transport.as_ref(), *entry_id);
                    }
                }
                debug!(install_id = id, "interceptor unbound from all transports");
            }
        })
    }
}

#[async_trait]
impl MessageSender for TransportManager {
    async fn send_request(&self, request: &OutboundRequest) -> Result<()> {
        let transport = self.select(&request.options())?;
        transport.send_request(request).await
    }

    async fn send_response(&self, response: &OutboundResponse) -> Result<()> {
        let transport = self.select(&response.options())?;
        match transport.send_response(response).await {
            Err(e) if !e.is_closed() => {
                warn!(error = %e, "response send failed on selected transport");
                Err(e)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transports = self.inner.transports.read();
        let keys: Vec<String> = transports
            .iter()
            .map(|(key, _)| format!("{}/{}", key.protocol, key.local_addr))
            .collect();
        write!(f, "TransportManager({})", keys.join(", "))
    }
}
