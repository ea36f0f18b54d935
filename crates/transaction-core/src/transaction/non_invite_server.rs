//! # Non-INVITE server transaction
//!
//! [RFC 3261 Section 17.2.2](https://datatracker.ietf.org/doc/html/rfc3261#section-17.2.2):
//!
//! ```text
//! Trying --1xx--> Proceeding --2xx-6xx--> Completed --Timer J--> Terminated
//!        '-------2xx-6xx---------------->'
//! ```
//!
//! Request retransmissions replay the last response; Timer J keeps the
//! transaction absorbing retransmissions for 64*T1 on unreliable
//! transports and not at all on reliable ones.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use sipflow_sip_core::{Method, Request, Response};
use sipflow_sip_transport::{InboundRequest, MessageSender, Outbound, SendOptions};

use crate::error::{Error, Result};
use crate::key::server_key;
use crate::snapshot::TransactionSnapshot;
use crate::timer::{schedule, TimerKind, TimerTarget};
use crate::timing::Timings;
use crate::transaction::{TransactionCore, TransactionKind, TransactionState};

pub(crate) struct NonInviteServerInner {
    core: TransactionCore,
    self_ref: OnceLock<Weak<NonInviteServerInner>>,
}

impl NonInviteServerInner {
    fn arm(&self, kind: TimerKind, duration: Duration) {
        if let Some(this) = self.self_ref.get().and_then(Weak::upgrade) {
            let mut timers = self.core.timers.lock();
            schedule(&this, &mut timers, kind, duration);
        }
    }
}

/// A server transaction for one non-INVITE request.
#[derive(Clone)]
pub struct NonInviteServerTransaction {
    inner: Arc<NonInviteServerInner>,
}

impl NonInviteServerTransaction {
    /// Builds the transaction for a freshly received request.
    pub fn start(
        request: &InboundRequest,
        sender: Arc<dyn MessageSender>,
        timings: Timings,
    ) -> Result<Self> {
        let method = &request.message().method;
        if matches!(method, Method::Invite | Method::Ack) {
            return Err(Error::UnhandledMessage(format!(
                "non-INVITE server transaction for {}",
                method
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
            TransactionKind::NonInviteServer,
            TransactionState::Trying,
            request.clone_message(),
            sender,
            timings,
            options,
        );
        let transaction = NonInviteServerTransaction {
            inner: Arc::new(NonInviteServerInner {
                core,
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
        if snapshot.kind != TransactionKind::NonInviteServer {
            return Err(Error::Snapshot(format!(
                "expected non-INVITE server snapshot, got {:?}",
                snapshot.kind
            )));
        }
        let core = TransactionCore::new(
            snapshot.key.clone(),
            TransactionKind::NonInviteServer,
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
        let transaction = NonInviteServerTransaction {
            inner: Arc::new(NonInviteServerInner {
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

    /// The request this transaction answers.
    pub fn origin(&self) -> &Request {
        &self.inner.core.origin
    }

    /// Registers a state change handler.
    pub fn on_state_changed(&self, handler: impl Fn(TransactionState) + Send + Sync + 'static) {
        self.inner.core.registries.state_changed.on(handler);
    }

    /// Registers an error handler.
    pub fn on_error(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        self.inner.core.registries.errors.on(handler);
    }

    /// Sends a response from the application.
    pub async fn respond(&self, response: Response) -> Result<()> {
        let core = &self.inner.core;
        let _guard = core.fsm.lock().await;
        core.check_not_terminated("respond")?;
        let status = response.status;
        let state = core.state();

        match state {
            TransactionState::Trying | TransactionState::Proceeding => {
                match core.send_new_response(response).await {
                    Ok(()) => {}
                    Err(e) => {
                        core.fail(e.clone());
                        return Err(e);
                    }
                }
                if status.is_provisional() {
                    core.transition(TransactionState::Proceeding);
                } else {
                    core.transition(TransactionState::Completed);
                    let linger = if core.reliable {
                        Duration::ZERO
                    } else {
                        core.timings.timeout()
                    };
                    self.inner.arm(TimerKind::J, linger);
                }
                Ok(())
            }
            state => Err(Error::TransactionActionNotAllowed {
                action: format!("respond {}", status),
                state: state.to_string(),
            }),
        }
    }

    /// Feeds a request retransmission: the last response, if any, is
    /// replayed; in Trying the retransmission is absorbed.
    pub async fn recv_request(&self, request: InboundRequest) -> Result<()> {
        let core = &self.inner.core;
        let _guard = core.fsm.lock().await;
        debug!(key = %core.key, method = %request.message().method, "request retransmission");
        match core.state() {
            TransactionState::Proceeding | TransactionState::Completed => {
                if let Err(e) = core.retransmit_response().await {
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
impl TimerTarget for NonInviteServerInner {
    async fn on_timer(&self, kind: TimerKind) {
        let core = &self.core;
        let _guard = core.fsm.lock().await;
        match (kind, core.state()) {
            (TimerKind::J, TransactionState::Completed) => core.terminate(),
            (kind, state) => {
                debug!(key = %core.key, %kind, %state, "stale timer ignored");
            }
        }
    }
}

impl std::fmt::Debug for NonInviteServerTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NonInviteServerTransaction({}, {})",
            self.inner.core.key,
            self.state()
        )
    }
}
