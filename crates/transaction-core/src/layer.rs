//! # Transaction layer
//!
//! Owns the client and server stores and sits between the transport and
//! the application as a pair of middlewares: inbound messages are matched
//! by key and fed to their machine; misses fall through to the wrapped
//! handler (or draw a `503`/get dropped when there is none). While the
//! layer is closing, requests are answered `503 Service Unavailable` and
//! responses are dropped.
//!
//! Entries remove themselves: every transaction created here gets a state
//! hook that deletes its store entry the moment it reaches Terminated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use sipflow_sip_core::{generate_branch, Method, Response, StatusCode};
use sipflow_sip_transport::{
    InboundRequest, InboundResponse, MessageSender, Outbound, OutboundRequest, SendOptions,
    TransportEvent,
};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::key::{cancel_target_key, response_key, server_key, TransactionKey};
use crate::snapshot::TransactionSnapshot;
use crate::store::TransactionStore;
use crate::timing::Timings;
use crate::transaction::invite_client::InviteClientTransaction;
use crate::transaction::invite_server::InviteServerTransaction;
use crate::transaction::non_invite_client::NonInviteClientTransaction;
use crate::transaction::non_invite_server::NonInviteServerTransaction;
use crate::transaction::{TransactionKind, TransactionState};

/// Application-side request sink the layer wraps.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles one inbound request that matched no transaction.
    async fn handle_request(&self, request: InboundRequest) -> Result<()>;
}

/// Application-side response sink the layer wraps.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Handles one inbound response that matched no transaction.
    async fn handle_response(&self, response: InboundResponse) -> Result<()>;
}

/// Either flavor of server transaction.
#[derive(Clone, Debug)]
pub enum ServerTransaction {
    /// INVITE server machine
    Invite(InviteServerTransaction),
    /// Non-INVITE server machine
    NonInvite(NonInviteServerTransaction),
}

impl ServerTransaction {
    /// The matching key.
    pub fn key(&self) -> &TransactionKey {
        match self {
            ServerTransaction::Invite(tx) => tx.key(),
            ServerTransaction::NonInvite(tx) => tx.key(),
        }
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        match self {
            ServerTransaction::Invite(tx) => tx.state(),
            ServerTransaction::NonInvite(tx) => tx.state(),
        }
    }

    /// Sends a response through the machine.
    pub async fn respond(&self, response: Response) -> Result<()> {
        match self {
            ServerTransaction::Invite(tx) => tx.respond(response).await,
            ServerTransaction::NonInvite(tx) => tx.respond(response).await,
        }
    }

    /// Feeds a request retransmission.
    pub async fn recv_request(&self, request: InboundRequest) -> Result<()> {
        match self {
            ServerTransaction::Invite(tx) => tx.recv_request(request).await,
            ServerTransaction::NonInvite(tx) => tx.recv_request(request).await,
        }
    }

    /// Registers a state change handler.
    pub fn on_state_changed(&self, handler: impl Fn(TransactionState) + Send + Sync + 'static) {
        match self {
            ServerTransaction::Invite(tx) => tx.on_state_changed(handler),
            ServerTransaction::NonInvite(tx) => tx.on_state_changed(handler),
        }
    }

    /// Forcibly ends the transaction.
    pub async fn terminate(&self) {
        match self {
            ServerTransaction::Invite(tx) => tx.terminate().await,
            ServerTransaction::NonInvite(tx) => tx.terminate().await,
        }
    }

    /// Captures the transaction for persistence.
    pub fn snapshot(&self) -> TransactionSnapshot {
        match self {
            ServerTransaction::Invite(tx) => tx.snapshot(),
            ServerTransaction::NonInvite(tx) => tx.snapshot(),
        }
    }

    /// The INVITE machine, when this is one.
    pub fn as_invite(&self) -> Option<&InviteServerTransaction> {
        match self {
            ServerTransaction::Invite(tx) => Some(tx),
            ServerTransaction::NonInvite(_) => None,
        }
    }
}

/// Either flavor of client transaction.
#[derive(Clone, Debug)]
pub enum ClientTransaction {
    /// INVITE client machine
    Invite(InviteClientTransaction),
    /// Non-INVITE client machine
    NonInvite(NonInviteClientTransaction),
}

impl ClientTransaction {
    /// The matching key.
    pub fn key(&self) -> &TransactionKey {
        match self {
            ClientTransaction::Invite(tx) => tx.key(),
            ClientTransaction::NonInvite(tx) => tx.key(),
        }
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        match self {
            ClientTransaction::Invite(tx) => tx.state(),
            ClientTransaction::NonInvite(tx) => tx.state(),
        }
    }

    /// Feeds a response matched to this transaction.
    pub async fn recv_response(&self, response: InboundResponse) -> Result<()> {
        match self {
            ClientTransaction::Invite(tx) => tx.recv_response(response).await,
            ClientTransaction::NonInvite(tx) => tx.recv_response(response).await,
        }
    }

    /// Registers a response handler.
    pub fn on_response(&self, handler: impl Fn(InboundResponse) + Send + Sync + 'static) {
        match self {
            ClientTransaction::Invite(tx) => tx.on_response(handler),
            ClientTransaction::NonInvite(tx) => tx.on_response(handler),
        }
    }

    /// Registers an error handler.
    pub fn on_error(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        match self {
            ClientTransaction::Invite(tx) => tx.on_error(handler),
            ClientTransaction::NonInvite(tx) => tx.on_error(handler),
        }
    }

    /// Registers a state change handler.
    pub fn on_state_changed(&self, handler: impl Fn(TransactionState) + Send + Sync + 'static) {
        match self {
            ClientTransaction::Invite(tx) => tx.on_state_changed(handler),
            ClientTransaction::NonInvite(tx) => tx.on_state_changed(handler),
        }
    }

    /// Forcibly ends the transaction.
    pub async fn terminate(&self) {
        match self {
            ClientTransaction::Invite(tx) => tx.terminate().await,
            ClientTransaction::NonInvite(tx) => tx.terminate().await,
        }
    }

    /// Captures the transaction for persistence.
    pub fn snapshot(&self) -> TransactionSnapshot {
        match self {
            ClientTransaction::Invite(tx) => tx.snapshot(),
            ClientTransaction::NonInvite(tx) => tx.snapshot(),
        }
    }

    async fn send(&self) -> Result<()> {
        match self {
            ClientTransaction::Invite(tx) => tx.send().await,
            ClientTransaction::NonInvite(tx) => tx.send().await,
        }
    }
}

struct LayerInner {
    sender: Arc<dyn MessageSender>,
    timings: Timings,
    client: TransactionStore<ClientTransaction>,
    server: TransactionStore<ServerTransaction>,
    closing: AtomicBool,
}

/// The transaction layer.
#[derive(Clone)]
pub struct TransactionLayer {
    inner: Arc<LayerInner>,
}

impl TransactionLayer {
    /// Creates a layer sending through the given transport surface.
    pub fn new(sender: Arc<dyn MessageSender>, timings: Timings) -> Self {
        TransactionLayer {
            inner: Arc::new(LayerInner {
                sender,
                timings,
                client: TransactionStore::default(),
                server: TransactionStore::default(),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a layer with the process-wide default timings.
    pub fn with_default_timings(sender: Arc<dyn MessageSender>) -> Self {
        Self::new(sender, Timings::global())
    }

    /// Number of live server transactions.
    pub fn server_count(&self) -> usize {
        self.inner.server.len()
    }

    /// Number of live client transactions.
    pub fn client_count(&self) -> usize {
        self.inner.client.len()
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Looks up a live server transaction by key.
    pub fn server_transaction(&self, key: &TransactionKey) -> Result<ServerTransaction> {
        self.inner
            .server
            .load(key)
            .ok_or_else(|| Error::TransactionNotFound(key.to_string()))
    }

    /// Looks up a live client transaction by key.
    pub fn client_transaction(&self, key: &TransactionKey) -> Result<ClientTransaction> {
        self.inner
            .client
            .load(key)
            .ok_or_else(|| Error::TransactionNotFound(key.to_string()))
    }

    /// Creates a server transaction for an inbound request and registers
    /// it in the store. The entry removes itself on Terminated.
    pub fn new_server_transaction(&self, request: &InboundRequest) -> Result<ServerTransaction> {
        if self.is_closing() {
            return Err(Error::TransactionLayerClosed);
        }
        let transaction = match request.message().method {
            Method::Invite => ServerTransaction::Invite(InviteServerTransaction::start(
                request,
                Arc::clone(&self.inner.sender),
                self.inner.timings,
            )?),
            Method::Ack => {
                return Err(Error::UnhandledMessage(
                    "ACK does not open a transaction".to_string(),
                ))
            }
            _ => ServerTransaction::NonInvite(NonInviteServerTransaction::start(
                request,
                Arc::clone(&self.inner.sender),
                self.inner.timings,
            )?),
        };
        self.insert_server(transaction)
    }

    /// Creates a client transaction around an outbound request, sends the
    /// request and starts the timers. A missing Via branch is generated.
    pub async fn new_client_transaction(
        &self,
        request: &OutboundRequest,
    ) -> Result<ClientTransaction> {
        if self.is_closing() {
            return Err(Error::TransactionLayerClosed);
        }
        request.access_message(|req| {
            if let Some(hop) = req.headers.top_via_hop_mut() {
                if hop.branch().is_none() {
                    hop.set_branch(generate_branch());
                }
            }
        });
        let transaction = match request.message().method {
            Method::Invite => ClientTransaction::Invite(InviteClientTransaction::start(
                request.clone(),
                Arc::clone(&self.inner.sender),
                self.inner.timings,
            )?),
            Method::Ack => {
                return Err(Error::UnhandledMessage(
                    "ACK does not open a transaction".to_string(),
                ))
            }
            _ => ClientTransaction::NonInvite(NonInviteClientTransaction::start(
                request.clone(),
                Arc::clone(&self.inner.sender),
                self.inner.timings,
            )?),
        };

        let key = transaction.key().clone();
        if !self.inner.client.store(key.clone(), transaction.clone()) {
            return Err(Error::UnhandledMessage(format!(
                "duplicate client transaction: {}",
                key
            )));
        }
        self.hook_client_cleanup(&transaction, key);
        transaction.send().await?;
        Ok(transaction)
    }

    /// Rebuilds a snapshotted server transaction into the store.
    pub fn restore_server(&self, snapshot: &TransactionSnapshot) -> Result<ServerTransaction> {
        let transaction = match snapshot.kind {
            TransactionKind::InviteServer => ServerTransaction::Invite(
                InviteServerTransaction::restore(snapshot, Arc::clone(&self.inner.sender))?,
            ),
            TransactionKind::NonInviteServer => ServerTransaction::NonInvite(
                NonInviteServerTransaction::restore(snapshot, Arc::clone(&self.inner.sender))?,
            ),
            kind => {
                return Err(Error::Snapshot(format!(
                    "not a server transaction snapshot: {:?}",
                    kind
                )))
            }
        };
        self.insert_server(transaction)
    }

    /// Rebuilds a snapshotted client transaction into the store.
    pub fn restore_client(&self, snapshot: &TransactionSnapshot) -> Result<ClientTransaction> {
        let transaction = match snapshot.kind {
            TransactionKind::InviteClient => ClientTransaction::Invite(
                InviteClientTransaction::restore(snapshot, Arc::clone(&self.inner.sender))?,
            ),
            TransactionKind::NonInviteClient => ClientTransaction::NonInvite(
                NonInviteClientTransaction::restore(snapshot, Arc::clone(&self.inner.sender))?,
            ),
            kind => {
                return Err(Error::Snapshot(format!(
                    "not a client transaction snapshot: {:?}",
                    kind
                )))
            }
        };
        let key = transaction.key().clone();
        if !self.inner.client.store(key.clone(), transaction.clone()) {
            return Err(Error::UnhandledMessage(format!(
                "duplicate client transaction: {}",
                key
            )));
        }
        self.hook_client_cleanup(&transaction, key);
        Ok(transaction)
    }

    /// Wraps an application request handler into the transaction-matching
    /// middleware.
    pub fn request_middleware(
        &self,
        next: Option<Arc<dyn RequestHandler>>,
    ) -> Arc<dyn RequestHandler> {
        Arc::new(RequestMiddleware {
            layer: self.clone(),
            next,
        })
    }

    /// Wraps an application response handler into the transaction-matching
    /// middleware.
    pub fn response_middleware(
        &self,
        next: Option<Arc<dyn ResponseHandler>>,
    ) -> Arc<dyn ResponseHandler> {
        Arc::new(ResponseMiddleware {
            layer: self.clone(),
            next,
        })
    }

    /// Consumes a transport event stream, routing requests and responses
    /// through the middlewares until the stream ends or the transport
    /// reports Closed.
    pub fn serve_events(
        &self,
        mut events: mpsc::Receiver<TransportEvent>,
        request_handler: Option<Arc<dyn RequestHandler>>,
        response_handler: Option<Arc<dyn ResponseHandler>>,
    ) -> tokio::task::JoinHandle<()> {
        let request_middleware = self.request_middleware(request_handler);
        let response_middleware = self.response_middleware(response_handler);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Request(request) => {
                        if let Err(e) = request_middleware.handle_request(request).await {
                            debug!(error = %e, "request middleware error");
                        }
                    }
                    TransportEvent::Response(response) => {
                        if let Err(e) = response_middleware.handle_response(response).await {
                            debug!(error = %e, "response middleware error");
                        }
                    }
                    TransportEvent::Error { error, remote_addr } => {
                        debug!(error = %error, ?remote_addr, "transport reported an error");
                    }
                    TransportEvent::Closed => break,
                }
            }
        })
    }

    /// Marks the layer closing and terminates every live transaction.
    pub async fn close(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        for transaction in self.inner.server.all() {
            transaction.terminate().await;
        }
        for transaction in self.inner.client.all() {
            transaction.terminate().await;
        }
    }

    fn insert_server(&self, transaction: ServerTransaction) -> Result<ServerTransaction> {
        let key = transaction.key().clone();
        if !self.inner.server.store(key.clone(), transaction.clone()) {
            return Err(Error::UnhandledMessage(format!(
                "duplicate server transaction: {}",
                key
            )));
        }
        let inner = Arc::downgrade(&self.inner);
        let cleanup_key = key;
        transaction.on_state_changed(move |state| {
            if state == TransactionState::Terminated {
                if let Some(inner) = Weak::upgrade(&inner) {
                    inner.server.delete(&cleanup_key);
                }
            }
        });
        Ok(transaction)
    }

    fn hook_client_cleanup(&self, transaction: &ClientTransaction, key: TransactionKey) {
        let inner = Arc::downgrade(&self.inner);
        transaction.on_state_changed(move |state| {
            if state == TransactionState::Terminated {
                if let Some(inner) = Weak::upgrade(&inner) {
                    inner.client.delete(&key);
                }
            }
        });
    }

    // Stateless reply used for 503/481; failures only get logged, there
    // is no one to report them to.
    async fn reply(&self, request: &InboundRequest, status: StatusCode) {
        let response = Response::from_request(status, request.message());
        let outbound = Outbound::with_options(
            response,
            SendOptions {
                protocol: Some(request.protocol()),
                local_addr: Some(request.local_addr()),
                remote_addr: Some(request.remote_addr()),
                no_dial: false,
            },
        );
        if let Err(e) = self.inner.sender.send_response(&outbound).await {
            warn!(status = %status, error = %e, "stateless reply failed");
        }
    }

    // RFC 2543 ACK-on-2xx: no branch cookie to match on, so find the
    // INVITE server transaction whose last 2xx carries the ACK's To-tag.
    fn match_rfc2543_ack(&self, ack: &InboundRequest) -> Option<InviteServerTransaction> {
        let ack_to_tag = ack.message().headers.to().and_then(|to| to.tag())?.to_string();
        let ack_call_id = ack.message().headers.call_id()?.value().to_string();
        self.inner.server.all().into_iter().find_map(|transaction| {
            let invite = transaction.as_invite()?;
            let origin_call_id = invite.origin().headers.call_id()?.value().to_string();
            if origin_call_id != ack_call_id {
                return None;
            }
            let last = invite.last_response()?;
            if last.status.is_success() && last.to_tag() == Some(ack_to_tag.as_str()) {
                Some(invite.clone())
            } else {
                None
            }
        })
    }
}

struct RequestMiddleware {
    layer: TransactionLayer,
    next: Option<Arc<dyn RequestHandler>>,
}

#[async_trait]
impl RequestHandler for RequestMiddleware {
    async fn handle_request(&self, request: InboundRequest) -> Result<()> {
        let layer = &self.layer;
        if layer.is_closing() {
            layer.reply(&request, StatusCode::SERVICE_UNAVAILABLE).await;
            return Ok(());
        }

        let method = request.message().method.clone();
        let key = server_key(request.message())?;

        if method == Method::Ack {
            if let Some(ServerTransaction::Invite(tx)) = layer.inner.server.load(&key) {
                return tx.recv_ack(request).await;
            }
            if let Some(tx) = layer.match_rfc2543_ack(&request) {
                return tx.recv_ack(request).await;
            }
            // An ACK for a 2xx is end-to-end: hand it to the application.
            return match &self.next {
                Some(next) => next.handle_request(request).await,
                None => {
                    debug!("dropping unmatched ACK");
                    Ok(())
                }
            };
        }

        if method == Method::Cancel {
            let target = cancel_target_key(request.message())?;
            match layer.inner.server.load(&target) {
                Some(ServerTransaction::Invite(invite)) => {
                    invite.deliver_cancel(request.clone());
                }
                _ => {
                    // Nothing to cancel: answer for the dead transaction.
                    layer
                        .reply(&request, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST)
                        .await;
                    return Err(Error::TransactionNotMatched(format!(
                        "CANCEL target {}",
                        target
                    )));
                }
            }
        }

        if let Some(transaction) = layer.inner.server.load(&key) {
            return transaction.recv_request(request).await;
        }
        match &self.next {
            Some(next) => next.handle_request(request).await,
            None => {
                layer.reply(&request, StatusCode::SERVICE_UNAVAILABLE).await;
                Ok(())
            }
        }
    }
}

struct ResponseMiddleware {
    layer: TransactionLayer,
    next: Option<Arc<dyn ResponseHandler>>,
}

#[async_trait]
impl ResponseHandler for ResponseMiddleware {
    async fn handle_response(&self, response: InboundResponse) -> Result<()> {
        let layer = &self.layer;
        if layer.is_closing() {
            debug!("dropping response while closing");
            return Ok(());
        }
        let key = match response_key(response.message()) {
            Ok(key) => key,
            Err(Error::TransactionNotMatched(reason)) => {
                debug!(reason, "dropping unmatchable response");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if let Some(transaction) = layer.inner.client.load(&key) {
            return transaction.recv_response(response).await;
        }
        match &self.next {
            Some(next) => next.handle_response(response).await,
            None => {
                debug!(key = %key, "dropping response matching no transaction");
                Ok(())
            }
        }
    }
}
