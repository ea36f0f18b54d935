//! # Interceptors
//!
//! Every transport carries four interceptor chains, one per direction and
//! message kind. A chain is run before a send reaches the wire and before
//! an inbound envelope is emitted upward; any interceptor can veto the
//! message. Installation returns an [`UnbindHandle`] that removes exactly
//! the installed entry, which is how the manager rebroadcasts and later
//! retracts interceptors across its whole transport set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::envelope::{InboundRequest, InboundResponse, OutboundRequest, OutboundResponse};
use crate::error::Result;

/// Verdict of one interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptAction {
    /// Keep going down the chain and deliver/send the message
    Continue,
    /// Swallow the message silently
    Drop,
}

/// A hook observing (and possibly vetoing) envelopes at one chain point.
///
/// Outbound interceptors receive the shared envelope and may mutate the
/// message through its scoped access method; inbound envelopes are
/// immutable.
#[async_trait]
pub trait Interceptor<T>: Send + Sync {
    /// Inspects one envelope.
    async fn intercept(&self, envelope: &T) -> Result<InterceptAction>;
}

#[async_trait]
impl<T, F> Interceptor<T> for F
where
    T: Sync + 'static,
    F: Fn(&T) -> Result<InterceptAction> + Send + Sync,
{
    async fn intercept(&self, envelope: &T) -> Result<InterceptAction> {
        self(envelope)
    }
}

/// An ordered chain of interceptors for one point.
pub struct InterceptorChain<T> {
    entries: RwLock<Vec<(u64, Arc<dyn Interceptor<T>>)>>,
    next_id: AtomicU64,
}

impl<T> Default for InterceptorChain<T> {
    fn default() -> Self {
        InterceptorChain {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> InterceptorChain<T> {
    /// Appends an interceptor, returning its entry id.
    pub fn install(&self, interceptor: Arc<dyn Interceptor<T>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((id, interceptor));
        id
    }

    /// Removes an entry by id; unknown ids are ignored.
    pub fn remove(&self, id: u64) {
        self.entries.write().retain(|(entry_id, _)| *entry_id != id);
    }

    /// Number of installed interceptors.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Runs the chain over a snapshot of its entries. Returns `false` when
    /// an interceptor dropped the envelope; errors abort the chain.
    pub async fn run(&self, envelope: &T) -> Result<bool> {
        let snapshot: Vec<Arc<dyn Interceptor<T>>> = self
            .entries
            .read()
            .iter()
            .map(|(_, i)| Arc::clone(i))
            .collect();
        for interceptor in snapshot {
            match interceptor.intercept(envelope).await? {
                InterceptAction::Continue => {}
                InterceptAction::Drop => return Ok(false),
            }
        }
        Ok(true)
    }
}

/// The four chains a transport runs: direction x message kind.
#[derive(Default)]
pub struct Interceptors {
    /// Inbound requests, run before delivery upward
    pub inbound_requests: InterceptorChain<InboundRequest>,
    /// Inbound responses, run before delivery upward
    pub inbound_responses: InterceptorChain<InboundResponse>,
    /// Outbound requests, run before the wire write
    pub outbound_requests: InterceptorChain<OutboundRequest>,
    /// Outbound responses, run before the wire write
    pub outbound_responses: InterceptorChain<OutboundResponse>,
}

/// Removes one installed interceptor when invoked. Dropping the handle
/// without calling [`UnbindHandle::unbind`] leaves the interceptor in
/// place.
pub struct UnbindHandle {
    unbind: Option<Box<dyn FnOnce() + Send>>,
}

impl UnbindHandle {
    /// Wraps a removal closure.
    pub fn new(unbind: impl FnOnce() + Send + 'static) -> Self {
        UnbindHandle {
            unbind: Some(Box::new(unbind)),
        }
    }

    /// Removes the interceptor everywhere it was installed.
    pub fn unbind(mut self) {
        if let Some(unbind) = self.unbind.take() {
            unbind();
        }
    }
}

impl std::fmt::Debug for UnbindHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnbindHandle")
            .field("armed", &self.unbind.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Inbound, Protocol};
    use sipflow_sip_core::{Method, Request, Uri};
    use std::str::FromStr;
    use std::sync::atomic::AtomicUsize;

    fn inbound() -> InboundRequest {
        let request = Request::new(Method::Options, Uri::from_str("sip:a@b.c").unwrap());
        Inbound::new(
            request,
            Protocol::Udp,
            "127.0.0.1:5060".parse().unwrap(),
            "127.0.0.1:5070".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn chain_runs_in_order_and_can_drop() {
        let chain: InterceptorChain<InboundRequest> = InterceptorChain::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = Arc::clone(&hits);
        chain.install(Arc::new(move |_: &InboundRequest| -> Result<InterceptAction> {
            hits_a.fetch_add(1, Ordering::SeqCst);
            Ok(InterceptAction::Continue)
        }));
        let dropper = chain.install(Arc::new(|_: &InboundRequest| -> Result<InterceptAction> {
            Ok(InterceptAction::Drop)
        }));
        let hits_b = Arc::clone(&hits);
        chain.install(Arc::new(move |_: &InboundRequest| -> Result<InterceptAction> {
            hits_b.fetch_add(1, Ordering::SeqCst);
            Ok(InterceptAction::Continue)
        }));

        assert!(!chain.run(&inbound()).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        chain.remove(dropper);
        assert!(chain.run(&inbound()).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unbind_handle_removes_entry() {
        let chain = Arc::new(InterceptorChain::<InboundRequest>::default());
        let id = chain.install(Arc::new(|_: &InboundRequest| -> Result<InterceptAction> {
            Ok(InterceptAction::Drop)
        }));
        let chain_for_unbind = Arc::clone(&chain);
        let handle = UnbindHandle::new(move || chain_for_unbind.remove(id));

        assert_eq!(chain.len(), 1);
        handle.unbind();
        assert_eq!(chain.len(), 0);
        assert!(chain.run(&inbound()).await.unwrap());
    }
}
