//! # Transaction machinery
//!
//! The four state machines of RFC 3261 Section 17 share their skeleton:
//! a key, an atomic state cell, the original request, the last response,
//! a timer table, callback registries and a serializing FSM lock. Each
//! concrete machine layers its transition rules on top of this core.
//!
//! Event processing is serialized per transaction: every entry point takes
//! the FSM mutex, re-reads the state and only then acts, so a timer that
//! fires after the state it belonged to has been left is a no-op.

pub mod invite_client;
pub mod invite_server;
pub mod non_invite_client;
pub mod non_invite_server;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use sipflow_sip_core::{Request, Response};
use sipflow_sip_transport::{
    InboundRequest, InboundResponse, MessageSender, Outbound, OutboundResponse, SendOptions,
};

use crate::error::{Error, Result};
use crate::key::TransactionKey;
use crate::registry::CallbackRegistry;
use crate::timer::TimerTable;
use crate::timing::Timings;

/// The states a transaction can be in. Which subset applies depends on the
/// transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Non-INVITE initial state
    Trying,
    /// INVITE client initial state
    Calling,
    /// Provisional response seen or sent
    Proceeding,
    /// INVITE server sent a 2xx (RFC 6026)
    Accepted,
    /// Final non-2xx response sent or received
    Completed,
    /// INVITE server saw the ACK
    Confirmed,
    /// Terminal state; the transaction is dead and its timers stopped
    Terminated,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionState::Trying => "Trying",
            TransactionState::Calling => "Calling",
            TransactionState::Proceeding => "Proceeding",
            TransactionState::Accepted => "Accepted",
            TransactionState::Completed => "Completed",
            TransactionState::Confirmed => "Confirmed",
            TransactionState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// The four transaction families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// RFC 3261 17.2.1 (+ RFC 6026)
    InviteServer,
    /// RFC 3261 17.2.2
    NonInviteServer,
    /// RFC 3261 17.1.1
    InviteClient,
    /// RFC 3261 17.1.2
    NonInviteClient,
}

// Lock-free state cell; transitions still happen under the FSM lock, the
// atomic just makes reads cheap from any thread.
pub(crate) struct AtomicTransactionState(AtomicU8);

impl AtomicTransactionState {
    fn encode(state: TransactionState) -> u8 {
        match state {
            TransactionState::Trying => 0,
            TransactionState::Calling => 1,
            TransactionState::Proceeding => 2,
            TransactionState::Accepted => 3,
            TransactionState::Completed => 4,
            TransactionState::Confirmed => 5,
            TransactionState::Terminated => 6,
        }
    }

    fn decode(raw: u8) -> TransactionState {
        match raw {
            0 => TransactionState::Trying,
            1 => TransactionState::Calling,
            2 => TransactionState::Proceeding,
            3 => TransactionState::Accepted,
            4 => TransactionState::Completed,
            5 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    pub(crate) fn new(state: TransactionState) -> Self {
        AtomicTransactionState(AtomicU8::new(Self::encode(state)))
    }

    pub(crate) fn get(&self) -> TransactionState {
        Self::decode(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: TransactionState) -> TransactionState {
        Self::decode(self.0.swap(Self::encode(state), Ordering::SeqCst))
    }
}

/// Callback registries every transaction carries.
#[derive(Default)]
pub(crate) struct Registries {
    pub(crate) state_changed: CallbackRegistry<TransactionState>,
    pub(crate) errors: CallbackRegistry<Error>,
    pub(crate) acks: CallbackRegistry<InboundRequest>,
    pub(crate) cancels: CallbackRegistry<InboundRequest>,
    pub(crate) responses: CallbackRegistry<InboundResponse>,
}

/// State shared by all four machine types.
pub(crate) struct TransactionCore {
    pub(crate) key: TransactionKey,
    pub(crate) kind: TransactionKind,
    pub(crate) state: AtomicTransactionState,
    pub(crate) origin: Request,
    pub(crate) last_response: RwLock<Option<OutboundResponse>>,
    pub(crate) sender: Arc<dyn MessageSender>,
    pub(crate) timings: Timings,
    pub(crate) reliable: bool,
    pub(crate) options: SendOptions,
    pub(crate) fsm: tokio::sync::Mutex<()>,
    pub(crate) timers: Mutex<TimerTable>,
    pub(crate) registries: Registries,
}

impl TransactionCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: TransactionKey,
        kind: TransactionKind,
        initial: TransactionState,
        origin: Request,
        sender: Arc<dyn MessageSender>,
        timings: Timings,
        options: SendOptions,
    ) -> Self {
        let reliable = options
            .protocol
            .map(|protocol| protocol.is_reliable())
            .unwrap_or(false);
        TransactionCore {
            key,
            kind,
            state: AtomicTransactionState::new(initial),
            origin,
            last_response: RwLock::new(None),
            sender,
            timings,
            reliable,
            options,
            fsm: tokio::sync::Mutex::new(()),
            timers: Mutex::new(TimerTable::default()),
            registries: Registries::default(),
        }
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Moves to a new state and reports the change in transition order.
    pub(crate) fn transition(&self, next: TransactionState) {
        let previous = self.state.set(next);
        if previous != next {
            debug!(key = %self.key, %previous, state = %next, "transaction state change");
            self.registries.state_changed.emit(next);
        }
    }

    /// Terminal entry: stops every timer, then reports Terminated. The
    /// layer's cleanup hook removes the store entry on this callback.
    pub(crate) fn terminate(&self) {
        self.timers.lock().cancel_all();
        self.transition(TransactionState::Terminated);
    }

    pub(crate) fn check_not_terminated(&self, action: &str) -> Result<()> {
        let state = self.state();
        if state == TransactionState::Terminated {
            return Err(Error::TransactionActionNotAllowed {
                action: action.to_string(),
                state: state.to_string(),
            });
        }
        Ok(())
    }

    /// Sends a fresh response, recording its envelope for retransmission.
    pub(crate) async fn send_new_response(&self, response: Response) -> Result<()> {
        let envelope = Outbound::with_options(response, self.options.clone());
        self.sender
            .send_response(&envelope)
            .await
            .map_err(Error::Transport)?;
        *self.last_response.write() = Some(envelope);
        Ok(())
    }

    /// Retransmits the stored response envelope unchanged; a transaction
    /// that has not sent anything yet absorbs the event.
    pub(crate) async fn retransmit_response(&self) -> Result<()> {
        let envelope = self.last_response.read().clone();
        if let Some(envelope) = envelope {
            self.sender
                .send_response(&envelope)
                .await
                .map_err(Error::Transport)?;
        }
        Ok(())
    }

    /// Transport failure path shared by every machine: report the error
    /// and enter Terminated (RFC 3261 17 treats the transport error as the
    /// end of the transaction).
    pub(crate) fn fail(&self, error: Error) {
        self.registries.errors.emit(error);
        self.terminate();
    }

    /// A snapshot of the last response message, when one was sent.
    pub(crate) fn last_response_message(&self) -> Option<Response> {
        self.last_response
            .read()
            .as_ref()
            .map(|envelope| envelope.message())
    }
}
