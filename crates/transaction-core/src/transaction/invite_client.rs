//! # INVITE client transaction
//!
//! [RFC 3261 Section 17.1.1](https://datatracker.ietf.org/doc/html/rfc3261#section-17.1.1):
//!
//! ```text
//! Calling --1xx--> Proceeding --2xx--> Terminated (ACK is the TU's)
//!    |    '--------3xx-6xx--> Completed --Timer D--> Terminated
//!    |  Timer A: retransmit INVITE (unreliable)
//!    '--Timer B--> Terminated (timeout)
//! ```
//!
//! A 2xx ends the transaction immediately; its ACK is generated end to
//! end by the application. A 3xx-6xx is ACKed by the transaction itself,
//! to the same destination the INVITE went to, and retransmitted finals
//! are re-ACKed silently while Completed.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use sipflow_sip_core::{Header, HeaderName, Method, Request, Response};
use sipflow_sip_transport::{
    InboundResponse, MessageSender, Outbound, OutboundRequest,
};

use crate::error::{Error, Result};
use crate::key::client_key;
use crate::snapshot::TransactionSnapshot;
use crate::timer::{schedule, TimerKind, TimerTarget};
use crate::timing::Timings;
use crate::transaction::{TransactionCore, TransactionKind, TransactionState};

pub(crate) struct InviteClientInner {
    core: TransactionCore,
    request_env: OutboundRequest,
    ack_env: RwLock<Option<OutboundRequest>>,
    self_ref: OnceLock<Weak<InviteClientInner>>,
}

impl InviteClientInner {
    fn arm(&self, kind: TimerKind, duration: Duration) {
        if let Some(this) = self.self_ref.get().and_then(Weak::upgrade) {
            let mut timers = self.core.timers.lock();
            schedule(&this, &mut timers, kind, duration);
        }
    }

    // ACK for a non-2xx final response (RFC 3261 17.1.1.3): same
    // Request-URI, branch and From as the INVITE, To taken from the
    // response so its tag is included.
    fn build_ack(&self, response: &Response) -> Request {
        let origin = &self.core.origin;
        let mut ack = Request::new(Method::Ack, origin.uri.clone());
        if let Some(via) = origin.headers.via() {
            if let Some(top) = via.top() {
                ack.headers.push(Header::Via(sipflow_sip_core::Via::single(top.clone())));
            }
        }
        for header in origin.headers.get_all(&HeaderName::Route) {
            ack.headers.push(header.clone());
        }
        if let Some(from) = origin.headers.get(&HeaderName::From) {
            ack.headers.push(from.clone());
        }
        if let Some(to) = response.headers.get(&HeaderName::To) {
            ack.headers.push(to.clone());
        }
        if let Some(call_id) = origin.headers.get(&HeaderName::CallId) {
            ack.headers.push(call_id.clone());
        }
        if let Some(cseq) = origin.headers.cseq() {
            ack.headers.push(Header::CSeq(sipflow_sip_core::CSeq::new(
                cseq.seq,
                Method::Ack,
            )));
        }
        if let Some(max_forwards) = origin.headers.get(&HeaderName::MaxForwards) {
            ack.headers.push(max_forwards.clone());
        }
        ack
    }

    // Sends the ACK for the stored final response, building and caching
    // the envelope on first use. The ACK goes where the INVITE went.
    async fn send_ack(&self, response: &Response) -> Result<()> {
        let envelope = {
            let cached = self.ack_env.read().clone();
            match cached {
                Some(envelope) => envelope,
                None => {
                    let ack = self.build_ack(response);
                    let envelope = Outbound::with_options(ack, self.request_env.options());
                    *self.ack_env.write() = Some(envelope.clone());
                    envelope
                }
            }
        };
        self.core
            .sender
            .send_request(&envelope)
            .await
            .map_err(Error::Transport)
    }
}

/// A client transaction for one INVITE.
#[derive(Clone)]
pub struct InviteClientTransaction {
    inner: Arc<InviteClientInner>,
}

impl InviteClientTransaction {
    /// Builds the transaction around an outbound INVITE envelope. Nothing
    /// is sent until [`send`](Self::send).
    pub fn start(
        request: OutboundRequest,
        sender: Arc<dyn MessageSender>,
        timings: Timings,
    ) -> Result<Self> {
        let origin = request.message();
        if origin.method != Method::Invite {
            return Err(Error::UnhandledMessage(format!(
                "INVITE client transaction for {}",
                origin.method
            )));
        }
        let key = client_key(&origin)?;
        let core = TransactionCore::new(
            key,
            TransactionKind::InviteClient,
            TransactionState::Calling,
            origin,
            sender,
            timings,
            request.options(),
        );
        let transaction = InviteClientTransaction {
            inner: Arc::new(InviteClientInner {
                core,
                request_env: request,
                ack_env: RwLock::new(None),
                self_ref: OnceLock::new(),
            }),
        };
        let _ = transaction
            .inner
            .self_ref
            .set(Arc::downgrade(&transaction.inner));
        Ok(transaction)
    }

    /// Rebuilds a transaction from a snapshot.
    pub fn restore(
        snapshot: &TransactionSnapshot,
        sender: Arc<dyn MessageSender>,
    ) -> Result<Self> {
        if snapshot.kind != TransactionKind::InviteClient {
            return Err(Error::Snapshot(format!(
                "expected INVITE client snapshot, got {:?}",
                snapshot.kind
            )));
        }
        let origin = snapshot.parse_request()?;
        let request_env = Outbound::with_options(origin.clone(), snapshot.send_options.clone());
        let core = TransactionCore::new(
            snapshot.key.clone(),
            TransactionKind::InviteClient,
            snapshot.state,
            origin,
            sender,
            snapshot.timings,
            snapshot.send_options.clone(),
        );
        if let Some(response) = snapshot.parse_last_response()? {
            *core.last_response.write() =
                Some(Outbound::with_options(response, snapshot.send_options.clone()));
        }
        let transaction = InviteClientTransaction {
            inner: Arc::new(InviteClientInner {
                core,
                request_env,
                ack_env: RwLock::new(None),
                self_ref: OnceLock::new(),
            }),
        };
        let _ = transaction
            .inner
            .self_ref
            .set(Arc::downgrade(&transaction.inner));
        for (kind, remaining) in snapshot.remaining_timers() {
            transaction.inner.arm(kind, remaining);
        }
        Ok(transaction)
    }

    /// The matching key.
    pub fn key(&self) -> &crate::key::TransactionKey {
        &self.inner.core.key
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.inner.core.state()
    }

    /// The INVITE this transaction sends.
    pub fn origin(&self) -> &Request {
        &self.inner.core.origin
    }

    /// Registers a state change handler.
    pub fn on_state_changed(&self, handler: impl Fn(TransactionState) + Send + Sync + 'static) {
        self.inner.core.registries.state_changed.on(handler);
    }

    /// Registers an error handler (transport failures, Timer B).
    pub fn on_error(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        self.inner.core.registries.errors.on(handler);
    }

    /// Registers a response handler. Responses seen before the first
    /// handler registers are buffered.
    pub fn on_response(&self, handler: impl Fn(InboundResponse) + Send + Sync + 'static) {
        self.inner.core.registries.responses.on(handler);
    }

    /// Performs the initial send and starts the retransmission and
    /// timeout timers.
    pub async fn send(&self) -> Result<()> {
        let inner = &self.inner;
        let core = &inner.core;
        let _guard = core.fsm.lock().await;
        if core.state() != TransactionState::Calling {
            return Err(Error::TransactionActionNotAllowed {
                action: "send".to_string(),
                state: core.state().to_string(),
            });
        }
        if let Err(e) = core.sender.send_request(&inner.request_env).await {
            let error = Error::Transport(e);
            core.fail(error.clone());
            return Err(error);
        }
        if !core.reliable {
            inner.arm(TimerKind::A, core.timings.t1);
        }
        inner.arm(TimerKind::B, core.timings.timeout());
        Ok(())
    }

    /// Feeds a response matched to this transaction.
    pub async fn recv_response(&self, response: InboundResponse) -> Result<()> {
        let inner = &self.inner;
        let core = &inner.core;
        let _guard = core.fsm.lock().await;
        let status = response.message().status;
        let state = core.state();

        match state {
            TransactionState::Calling | TransactionState::Proceeding => {
                // Keep the response for snapshots and ACK rebuilding; the
                // envelope is never sent, it only carries the message.
                *core.last_response.write() = Some(Outbound::with_options(
                    response.clone_message(),
                    core.options.clone(),
                ));
                if status.is_provisional() {
                    if state == TransactionState::Calling {
                        core.timers.lock().cancel(TimerKind::A);
                        core.transition(TransactionState::Proceeding);
                    }
                    core.registries.responses.emit(response);
                    Ok(())
                } else if status.is_success() {
                    // The ACK for a 2xx is end-to-end and belongs to the
                    // application; the transaction is done.
                    core.registries.responses.emit(response);
                    core.terminate();
                    Ok(())
                } else {
                    let message = response.clone_message();
                    core.registries.responses.emit(response);
                    if let Err(e) = inner.send_ack(&message).await {
                        core.fail(e.clone());
                        return Err(e);
                    }
                    core.transition(TransactionState::Completed);
                    let linger = if core.reliable {
                        Duration::ZERO
                    } else {
                        core.timings.time_d
                    };
                    inner.arm(TimerKind::D, linger);
                    Ok(())
                }
            }
            TransactionState::Completed if status.is_failure() => {
                // Retransmitted final: re-ACK, do not re-deliver.
                let message = response.clone_message();
                if let Err(e) = inner.send_ack(&message).await {
                    core.fail(e.clone());
                    return Err(e);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Forcibly ends the transaction.
    pub async fn terminate(&self) {
        let core = &self.inner.core;
        let _guard = core.fsm.lock().await;
        core.terminate();
    }

    /// Captures the transaction for persistence.
    pub fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot::capture(&self.inner.core)
    }
}

#[async_trait]
impl TimerTarget for InviteClientInner {
    async fn on_timer(&self, kind: TimerKind) {
        let core = &self.core;
        let _guard = core.fsm.lock().await;
        match (kind, core.state()) {
            (TimerKind::A, TransactionState::Calling) => {
                debug!(key = %core.key, "retransmitting INVITE");
                if let Err(e) = core.sender.send_request(&self.request_env).await {
                    core.fail(Error::Transport(e));
                    return;
                }
                // Timer A doubles without a cap (17.1.1.2); Timer B bounds
                // the total number of attempts.
                let next = core
                    .timers
                    .lock()
                    .duration(TimerKind::A)
                    .map(|d| d * 2)
                    .unwrap_or(core.timings.t1);
                self.arm(TimerKind::A, next);
            }
            (TimerKind::B, TransactionState::Calling) => {
                core.fail(Error::TransactionTimedOut);
            }
            (TimerKind::D, TransactionState::Completed) => core.terminate(),
            (kind, state) => {
                debug!(key = %core.key, %kind, %state, "stale timer ignored");
            }
        }
    }
}

impl std::fmt::Debug for InviteClientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InviteClientTransaction({}, {})",
            self.inner.core.key,
            self.state()
        )
    }
}
