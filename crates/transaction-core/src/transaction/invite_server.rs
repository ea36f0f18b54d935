//! # INVITE server transaction
//!
//! [RFC 3261 Section 17.2.1](https://datatracker.ietf.org/doc/html/rfc3261#section-17.2.1)
//! with the [RFC 6026](https://datatracker.ietf.org/doc/html/rfc6026)
//! Accepted state:
//!
//! ```text
//! Proceeding --2xx--> Accepted --Timer L--> Terminated
//! Proceeding --3xx-6xx--> Completed --ACK--> Confirmed --Timer I--> Terminated
//!                          |  Timer G: retransmit final (unreliable)
//!                          '--Timer H--> Terminated (ACK never came)
//! ```
//!
//! The transaction answers `100 Trying` on its own when the application
//! has not produced a provisional response within the grace period, so a
//! retransmitting client quiets down even when the application is slow.
//! ACKs that arrive while in Accepted belong to a 2xx and are handed to
//! the application through the ACK registry, which buffers them until a
//! handler shows up.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use sipflow_sip_core::{Method, Request, Response, StatusCode};
use sipflow_sip_transport::{InboundRequest, MessageSender, Outbound, SendOptions};

use crate::error::{Error, Result};
use crate::key::server_key;
use crate::snapshot::TransactionSnapshot;
use crate::timer::{schedule, TimerKind, TimerTarget};
use crate::timing::Timings;
use crate::transaction::{TransactionCore, TransactionKind, TransactionState};

pub(crate) struct InviteServerInner {
    core: TransactionCore,
    self_ref: OnceLock<Weak<InviteServerInner>>,
}

impl InviteServerInner {
    // Arms a timer against this transaction; harmless after teardown.
    fn arm(&self, kind: TimerKind, duration: Duration) {
        if let Some(this) = self.self_ref.get().and_then(Weak::upgrade) {
            let mut timers = self.core.timers.lock();
            schedule(&this, &mut timers, kind, duration);
        }
    }
}

/// A server transaction for one INVITE.
#[derive(Clone)]
pub struct InviteServerTransaction {
    inner: Arc<InviteServerInner>,
}

impl InviteServerTransaction {
    /// Builds the transaction for a freshly received INVITE and starts the
    /// `100 Trying` grace timer. The caller inserts it into the store and
    /// owns responding.
    pub fn start(
        request: &InboundRequest,
        sender: Arc<dyn MessageSender>,
        timings: Timings,
    ) -> Result<Self> {
        if request.message().method != Method::Invite {
            return Err(Error::UnhandledMessage(format!(
                "INVITE server transaction for {}",
                request.message().method
            )));
        }
        let key = server_key(request.message())?;
        let options = SendOptions {
            protocol: Some(request.protocol()),
            local_addr: Some(request.local_addr()),
            remote_addr: Some(request.remote_addr()),
            no_dial: false,
        };
        let core = TransactionCore::new(
            key,
            TransactionKind::InviteServer,
            TransactionState::Proceeding,
            request.clone_message(),
            sender,
            timings,
            options,
        );
        let transaction = InviteServerTransaction {
            inner: Arc::new(InviteServerInner {
                core,
                self_ref: OnceLock::new(),
            }),
        };
        let _ = transaction
            .inner
            .self_ref
            .set(Arc::downgrade(&transaction.inner));
        transaction.inner.arm(TimerKind::Time100, timings.time_100);
        Ok(transaction)
    }

    /// Rebuilds a transaction from a snapshot, re-arming only timers whose
    /// deadline is still ahead.
    pub fn restore(
        snapshot: &TransactionSnapshot,
        sender: Arc<dyn MessageSender>,
    ) -> Result<Self> {
        if snapshot.kind != TransactionKind::InviteServer {
            return Err(Error::Snapshot(format!(
                "expected invite server snapshot, got {:?}",
                snapshot.kind
            )));
        }
        let core = TransactionCore::new(
            snapshot.key.clone(),
            TransactionKind::InviteServer,
            snapshot.state,
            snapshot.parse_request()?,
            sender,
            snapshot.timings,
            snapshot.send_options.clone(),
        );
        if let Some(response) = snapshot.parse_last_response()? {
            *core.last_response.write() =
                Some(Outbound::with_options(response, snapshot.send_options.clone()));
        }
        let transaction = InviteServerTransaction {
            inner: Arc::new(InviteServerInner {
                core,
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

    /// The INVITE this transaction answers.
    pub fn origin(&self) -> &Request {
        &self.inner.core.origin
    }

    /// The last response sent, if any.
    pub fn last_response(&self) -> Option<Response> {
        self.inner.core.last_response_message()
    }

    /// Registers a state change handler.
    pub fn on_state_changed(&self, handler: impl Fn(TransactionState) + Send + Sync + 'static) {
        self.inner.core.registries.state_changed.on(handler);
    }

    /// Registers an error handler (transport failures, ACK timeout).
    pub fn on_error(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        self.inner.core.registries.errors.on(handler);
    }

    /// Registers a handler for ACKs to a 2xx. ACKs seen before the first
    /// handler registers are buffered.
    pub fn on_ack(&self, handler: impl Fn(InboundRequest) + Send + Sync + 'static) {
        self.inner.core.registries.acks.on(handler);
    }

    /// Registers a handler for a CANCEL aimed at this INVITE.
    pub fn on_cancel(&self, handler: impl Fn(InboundRequest) + Send + Sync + 'static) {
        self.inner.core.registries.cancels.on(handler);
    }

    /// Sends a response from the application, driving the machine.
    pub async fn respond(&self, response: Response) -> Result<()> {
        let core = &self.inner.core;
        let _guard = core.fsm.lock().await;
        core.check_not_terminated("respond")?;
        let status = response.status;
        let state = core.state();

        match state {
            TransactionState::Proceeding if status.is_provisional() => {
                core.timers.lock().cancel(TimerKind::Time100);
                self.send_or_fail(response).await
            }
            TransactionState::Proceeding if status.is_success() => {
                core.timers.lock().cancel(TimerKind::Time100);
                self.send_or_fail(response).await?;
                core.transition(TransactionState::Accepted);
                self.inner.arm(TimerKind::L, core.timings.timeout());
                Ok(())
            }
            // RFC 6026: the TU may pass further 2xx retransmissions (and
            // 2xx from forked branches) while in Accepted.
            TransactionState::Accepted if status.is_success() => {
                self.send_or_fail(response).await
            }
            TransactionState::Proceeding => {
                core.timers.lock().cancel(TimerKind::Time100);
                self.send_or_fail(response).await?;
                core.transition(TransactionState::Completed);
                if !core.reliable {
                    self.inner.arm(TimerKind::G, core.timings.t1);
                }
                self.inner.arm(TimerKind::H, core.timings.timeout());
                Ok(())
            }
            state => Err(Error::TransactionActionNotAllowed {
                action: format!("respond {}", status),
                state: state.to_string(),
            }),
        }
    }

    /// Feeds an INVITE retransmission: the last response is replayed.
    pub async fn recv_request(&self, request: InboundRequest) -> Result<()> {
        let core = &self.inner.core;
        let _guard = core.fsm.lock().await;
        debug!(key = %core.key, from = %request.remote_addr(), "INVITE retransmission");
        match core.state() {
            TransactionState::Proceeding
            | TransactionState::Accepted
            | TransactionState::Completed => {
                if let Err(e) = core.retransmit_response().await {
                    core.fail(e.clone());
                    return Err(e);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Feeds an ACK matched to this transaction.
    pub async fn recv_ack(&self, ack: InboundRequest) -> Result<()> {
        let core = &self.inner.core;
        let _guard = core.fsm.lock().await;
        match core.state() {
            TransactionState::Completed => {
                {
                    let mut timers = core.timers.lock();
                    timers.cancel(TimerKind::G);
                    timers.cancel(TimerKind::H);
                }
                core.transition(TransactionState::Confirmed);
                let linger = if core.reliable {
                    Duration::ZERO
                } else {
                    core.timings.t4
                };
                self.inner.arm(TimerKind::I, linger);
                Ok(())
            }
            // An ACK in Accepted acknowledges a 2xx and belongs to the
            // application; buffered until a handler registers.
            TransactionState::Accepted => {
                core.registries.acks.emit(ack);
                Ok(())
            }
            TransactionState::Confirmed => Ok(()),
            state => Err(Error::TransactionActionNotAllowed {
                action: "ACK".to_string(),
                state: state.to_string(),
            }),
        }
    }

    /// Hands a CANCEL aimed at this INVITE to the application.
    pub fn deliver_cancel(&self, cancel: InboundRequest) {
        self.inner.core.registries.cancels.emit(cancel);
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

    async fn send_or_fail(&self, response: Response) -> Result<()> {
        let core = &self.inner.core;
        match core.send_new_response(response).await {
            Ok(()) => Ok(()),
            Err(e) => {
                core.fail(e.clone());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TimerTarget for InviteServerInner {
    async fn on_timer(&self, kind: TimerKind) {
        let core = &self.core;
        let _guard = core.fsm.lock().await;
        match (kind, core.state()) {
            // The application went quiet: answer 100 Trying ourselves.
            (TimerKind::Time100, TransactionState::Proceeding) => {
                if core.last_response.read().is_none() {
                    let trying = Response::from_request(StatusCode::TRYING, &core.origin);
                    if let Err(e) = core.send_new_response(trying).await {
                        core.fail(e);
                    }
                }
            }
            (TimerKind::G, TransactionState::Completed) => {
                if let Err(e) = core.retransmit_response().await {
                    core.fail(e);
                    return;
                }
                let next = core
                    .timers
                    .lock()
                    .duration(TimerKind::G)
                    .map(|d| (d * 2).min(core.timings.t2))
                    .unwrap_or(core.timings.t1);
                self.arm(TimerKind::G, next);
            }
            (TimerKind::H, TransactionState::Completed) => {
                core.fail(Error::TransactionTimedOut);
            }
            (TimerKind::I, TransactionState::Confirmed)
            | (TimerKind::L, TransactionState::Accepted) => {
                core.terminate();
            }
            // The state moved on before the timer fired.
            (kind, state) => {
                debug!(key = %core.key, %kind, %state, "stale timer ignored");
            }
        }
    }
}

impl std::fmt::Debug for InviteServerTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InviteServerTransaction({}, {})",
            self.inner.core.key,
            self.state()
        )
    }
}
