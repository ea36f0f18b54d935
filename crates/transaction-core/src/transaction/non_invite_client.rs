//! # Non-INVITE client transaction
//!
//! [RFC 3261 Section 17.1.2](https://datatracker.ietf.org/doc/html/rfc3261#section-17.1.2):
//!
//! ```text
//! Trying --1xx--> Proceeding --final--> Completed --Timer K--> Terminated
//!    |   '----------final------------->'
//!    |  Timer E: retransmit (doubling to T2; steady T2 in Proceeding)
//!    '--Timer F--> Terminated (timeout)
//! ```

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use sipflow_sip_core::{Method, Request};
use sipflow_sip_transport::{
    InboundResponse, MessageSender, Outbound, OutboundRequest,
};

use crate::error::{Error, Result};
use crate::key::client_key;
use crate::snapshot::TransactionSnapshot;
use crate::timer::{schedule, TimerKind, TimerTarget};
use crate::timing::Timings;
use crate::transaction::{TransactionCore, TransactionKind, TransactionState};

pub(crate) struct NonInviteClientInner {
    core: TransactionCore,
    request_env: OutboundRequest,
    self_ref: OnceLock<Weak<NonInviteClientInner>>,
}

impl NonInviteClientInner {
    fn arm(&self, kind: TimerKind, duration: Duration) {
        if let Some(this) = self.self_ref.get().and_then(Weak::upgrade) {
            let mut timers = self.core.timers.lock();
            schedule(&this, &mut timers, kind, duration);
        }
    }
}

/// A client transaction for one non-INVITE request.
#[derive(Clone)]
pub struct NonInviteClientTransaction {
    inner: Arc<NonInviteClientInner>,
}

impl NonInviteClientTransaction {
    /// Builds the transaction around an outbound request envelope.
    pub fn start(
        request: OutboundRequest,
        sender: Arc<dyn MessageSender>,
        timings: Timings,
    ) -> Result<Self> {
        let origin = request.message();
        if matches!(origin.method, Method::Invite | Method::Ack) {
            return Err(Error::UnhandledMessage(format!(
                "non-INVITE client transaction for {}",
                origin.method
            )));
        }
        let key = client_key(&origin)?;
        let core = TransactionCore::new(
            key,
            TransactionKind::NonInviteClient,
            TransactionState::Trying,
            origin,
            sender,
            timings,
            request.options(),
        );
        let transaction = NonInviteClientTransaction {
            inner: Arc::new(NonInviteClientInner {
                core,
                request_env: request,
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
        if snapshot.kind != TransactionKind::NonInviteClient {
            return Err(Error::Snapshot(format!(
                "expected non-INVITE client snapshot, got {:?}",
                snapshot.kind
            )));
        }
        let origin = snapshot.parse_request()?;
        let request_env = Outbound::with_options(origin.clone(), snapshot.send_options.clone());
        let core = TransactionCore::new(
            snapshot.key.clone(),
            TransactionKind::NonInviteClient,
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
        let transaction = NonInviteClientTransaction {
            inner: Arc::new(NonInviteClientInner {
                core,
                request_env,
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

    /// The request this transaction sends.
    pub fn origin(&self) -> &Request {
        &self.inner.core.origin
    }

    /// Registers a state change handler.
    pub fn on_state_changed(&self, handler: impl Fn(TransactionState) + Send + Sync + 'static) {
        self.inner.core.registries.state_changed.on(handler);
    }

    /// Registers an error handler (transport failures, Timer F).
    pub fn on_error(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        self.inner.core.registries.errors.on(handler);
    }

    /// Registers a response handler. Responses seen before the first
    /// handler registers are buffered.
    pub fn on_response(&self, handler: impl Fn(InboundResponse) + Send + Sync + 'static) {
        self.inner.core.registries.responses.on(handler);
    }

    /// Performs the initial send and starts Timers E and F.
    pub async fn send(&self) -> Result<()> {
        let inner = &self.inner;
        let core = &inner.core;
        let _guard = core.fsm.lock().await;
        if core.state() != TransactionState::Trying {
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
            inner.arm(TimerKind::E, core.timings.t1);
        }
        inner.arm(TimerKind::F, core.timings.timeout());
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
            TransactionState::Trying | TransactionState::Proceeding => {
                *core.last_response.write() = Some(Outbound::with_options(
                    response.clone_message(),
                    core.options.clone(),
                ));
                if status.is_provisional() {
                    core.transition(TransactionState::Proceeding);
                    core.registries.responses.emit(response);
                } else {
                    core.registries.responses.emit(response);
                    core.transition(TransactionState::Completed);
                    {
                        let mut timers = core.timers.lock();
                        timers.cancel(TimerKind::E);
                        timers.cancel(TimerKind::F);
                    }
                    let linger = if core.reliable {
                        Duration::ZERO
                    } else {
                        core.timings.t4
                    };
                    inner.arm(TimerKind::K, linger);
                }
                Ok(())
            }
            // Retransmitted finals while lingering are absorbed.
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
impl TimerTarget for NonInviteClientInner {
    async fn on_timer(&self, kind: TimerKind) {
        let core = &self.core;
        let _guard = core.fsm.lock().await;
        match (kind, core.state()) {
            (TimerKind::E, state @ (TransactionState::Trying | TransactionState::Proceeding)) => {
                debug!(key = %core.key, "retransmitting request");
                if let Err(e) = core.sender.send_request(&self.request_env).await {
                    core.fail(Error::Transport(e));
                    return;
                }
                // Doubling toward T2 while Trying; steady T2 once a
                // provisional response arrived.
                let next = if state == TransactionState::Trying {
                    core.timers
                        .lock()
                        .duration(TimerKind::E)
                        .map(|d| (d * 2).min(core.timings.t2))
                        .unwrap_or(core.timings.t1)
                } else {
                    core.timings.t2
                };
                self.arm(TimerKind::E, next);
            }
            (TimerKind::F, TransactionState::Trying | TransactionState::Proceeding) => {
                core.fail(Error::TransactionTimedOut);
            }
            (TimerKind::K, TransactionState::Completed) => core.terminate(),
            (kind, state) => {
                debug!(key = %core.key, %kind, %state, "stale timer ignored");
            }
        }
    }
}

impl std::fmt::Debug for NonInviteClientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NonInviteClientTransaction({}, {})",
            self.inner.core.key,
            self.state()
        )
    }
}
