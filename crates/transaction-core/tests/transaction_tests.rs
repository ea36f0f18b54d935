//! State machine tests driven through the layer, with a capturing sender
//! and paused time so retransmission schedules are exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sipflow_sip_core::prelude::*;
use sipflow_sip_transport::prelude::*;
use sipflow_transaction_core::prelude::*;

#[derive(Debug, Default)]
struct MockSender {
    sent: Mutex<Vec<Message>>,
}

impl MockSender {
    fn requests(&self) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.as_request().cloned())
            .collect()
    }

    fn responses(&self) -> Vec<Response> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.as_response().cloned())
            .collect()
    }

    fn count_status(&self, status: StatusCode) -> usize {
        self.responses().iter().filter(|r| r.status == status).count()
    }
}

#[async_trait]
impl MessageSender for MockSender {
    async fn send_request(
        &self,
        request: &OutboundRequest,
    ) -> sipflow_sip_transport::Result<()> {
        self.sent.lock().push(Message::Request(request.message()));
        Ok(())
    }

    async fn send_response(
        &self,
        response: &OutboundResponse,
    ) -> sipflow_sip_transport::Result<()> {
        self.sent.lock().push(Message::Response(response.message()));
        Ok(())
    }
}

fn request(method: Method, branch: &str) -> Request {
    let uri: Uri = "sip:bob@biloxi.example.com".parse().unwrap();
    let mut hop = ViaHop::new(
        "UDP",
        Host::Domain("client.atlanta.example.com".to_string()),
        Some(5060),
    );
    hop.set_branch(branch);
    let mut from = Address::new("sip:alice@atlanta.example.com".parse().unwrap());
    from.set_tag("from-tag-1");
    Request::new(method.clone(), uri.clone())
        .with_header(Header::Via(Via::single(hop)))
        .with_header(Header::From(FromHeader::new(from)))
        .with_header(Header::To(To::new(Address::new(uri))))
        .with_header(Header::CallId(CallId::new("call-1@atlanta")))
        .with_header(Header::CSeq(CSeq::new(1, method)))
        .with_header(Header::MaxForwards(MaxForwards(70)))
}

fn inbound(request: Request) -> InboundRequest {
    Inbound::new(
        request,
        Protocol::Udp,
        "192.0.2.1:5060".parse().unwrap(),
        "198.51.100.7:5070".parse().unwrap(),
    )
}

fn inbound_response(response: Response) -> InboundResponse {
    Inbound::new(
        response,
        Protocol::Udp,
        "192.0.2.1:5060".parse().unwrap(),
        "198.51.100.7:5070".parse().unwrap(),
    )
}

fn layer_with_mock() -> (TransactionLayer, Arc<MockSender>) {
    let sender = Arc::new(MockSender::default());
    let layer = TransactionLayer::new(sender.clone(), Timings::default());
    (layer, sender)
}

// Scenario: INVITE server over UDP, provisional, 2xx, ACK, Timer L.
#[tokio::test(start_paused = true)]
async fn invite_server_happy_path() {
    let (layer, sender) = layer_with_mock();
    let invite = inbound(request(Method::Invite, "z9hG4bKhappy"));
    let tx = layer.new_server_transaction(&invite).unwrap();
    let invite_tx = match &tx {
        ServerTransaction::Invite(tx) => tx.clone(),
        other => panic!("expected INVITE server transaction, got {:?}", other),
    };
    assert_eq!(tx.state(), TransactionState::Proceeding);
    assert_eq!(layer.server_count(), 1);

    // Nobody answered within the grace period: 100 Trying goes out alone.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(sender.count_status(StatusCode::TRYING), 1);

    tx.respond(Response::from_request(StatusCode::RINGING, invite.message()))
        .await
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Proceeding);

    let mut ok = Response::from_request(StatusCode::OK, invite.message());
    ok.set_to_tag("to-tag-99");
    tx.respond(ok).await.unwrap();
    assert_eq!(tx.state(), TransactionState::Accepted);

    // ACK for the 2xx arrives before anyone listens; it must be buffered.
    let mut ack = request(Method::Ack, "z9hG4bKhappy");
    if let Some(to) = ack.headers.to_mut() {
        to.set_tag("to-tag-99");
    }
    layer
        .request_middleware(None)
        .handle_request(inbound(ack))
        .await
        .unwrap();

    let acks = Arc::new(AtomicUsize::new(0));
    let acks_seen = acks.clone();
    invite_tx.on_ack(move |_| {
        acks_seen.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(acks.load(Ordering::SeqCst), 1);

    // Timer L: 64*T1 after the 2xx.
    tokio::time::sleep(Duration::from_secs(33)).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(layer.server_count(), 0);
}

// Scenario: final 486 over UDP retransmits on Timer G until Timer H gives
// up on the ACK.
#[tokio::test(start_paused = true)]
async fn invite_server_retransmits_486_until_timer_h() {
    let (layer, sender) = layer_with_mock();
    let invite = inbound(request(Method::Invite, "z9hG4bKbusy"));
    let tx = layer.new_server_transaction(&invite).unwrap();

    let errors: Arc<Mutex<Vec<sipflow_transaction_core::Error>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_sink = errors.clone();
    if let ServerTransaction::Invite(invite_tx) = &tx {
        invite_tx.on_error(move |e| errors_sink.lock().push(e));
    }

    tx.respond(Response::from_request(StatusCode::BUSY_HERE, invite.message()))
        .await
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Completed);

    tokio::time::sleep(Duration::from_secs(33)).await;

    // G fires at 0.5, 1.5, 3.5, 7.5 then every T2 until H at 32s:
    // one initial send plus ten retransmissions.
    assert_eq!(sender.count_status(StatusCode::BUSY_HERE), 11);
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert!(errors
        .lock()
        .iter()
        .any(|e| matches!(e, sipflow_transaction_core::Error::TransactionTimedOut)));
    assert_eq!(layer.server_count(), 0);
}

// Scenario: the ACK lands first, so the transaction confirms and lingers
// for Timer I instead of timing out.
#[tokio::test(start_paused = true)]
async fn invite_server_ack_confirms_completed() {
    let (layer, sender) = layer_with_mock();
    let invite = inbound(request(Method::Invite, "z9hG4bKconfirm"));
    let tx = layer.new_server_transaction(&invite).unwrap();

    tx.respond(Response::from_request(StatusCode::BUSY_HERE, invite.message()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    let resent = sender.count_status(StatusCode::BUSY_HERE);
    assert!(resent >= 2, "expected at least one Timer G retransmission");

    layer
        .request_middleware(None)
        .handle_request(inbound(request(Method::Ack, "z9hG4bKconfirm")))
        .await
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Confirmed);

    // Retransmissions stop once confirmed.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sender.count_status(StatusCode::BUSY_HERE), resent);

    // Timer I = T4.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
}

// Scenario: RFC 2543 peer, no magic cookie; the ACK for the 2xx matches by
// the To-tag of the last response rather than by branch.
#[tokio::test(start_paused = true)]
async fn rfc2543_ack_matches_by_to_tag() {
    let (layer, _sender) = layer_with_mock();
    let invite = inbound(request(Method::Invite, "1-old-branch"));
    let tx = layer.new_server_transaction(&invite).unwrap();
    let invite_tx = match &tx {
        ServerTransaction::Invite(tx) => tx.clone(),
        other => panic!("expected INVITE server transaction, got {:?}", other),
    };

    let mut ok = Response::from_request(StatusCode::OK, invite.message());
    ok.set_to_tag("tag-2543");
    tx.respond(ok).await.unwrap();

    let acks = Arc::new(AtomicUsize::new(0));
    let acks_seen = acks.clone();
    invite_tx.on_ack(move |_| {
        acks_seen.fetch_add(1, Ordering::SeqCst);
    });

    // The old-world ACK arrives from another hop: different branch and
    // sent-by, so the tuple key cannot match and only the To-tag can.
    let mut ack = request(Method::Ack, "2-old-branch");
    if let Some(hop) = ack.headers.top_via_hop_mut() {
        hop.host = Host::Domain("gw.atlanta.example.com".to_string());
        hop.port = Some(5062);
    }
    if let Some(to) = ack.headers.to_mut() {
        to.set_tag("tag-2543");
    }

    let fallthrough = Arc::new(AtomicUsize::new(0));
    struct Recorder(Arc<AtomicUsize>);
    #[async_trait]
    impl RequestHandler for Recorder {
        async fn handle_request(
            &self,
            _request: InboundRequest,
        ) -> sipflow_transaction_core::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
    layer
        .request_middleware(Some(Arc::new(Recorder(fallthrough.clone()))))
        .handle_request(inbound(ack))
        .await
        .unwrap();

    assert_eq!(acks.load(Ordering::SeqCst), 1, "ACK should reach OnAck");
    assert_eq!(fallthrough.load(Ordering::SeqCst), 0, "ACK must not look new");
}

// Invariant: INVITE client attempts are bounded by doubling under Timer B.
#[tokio::test(start_paused = true)]
async fn invite_client_retransmits_then_times_out() {
    let (layer, sender) = layer_with_mock();
    let outbound = OutboundRequest::new(request(Method::Invite, "z9hG4bKuac1"));
    let tx = layer.new_client_transaction(&outbound).await.unwrap();
    assert_eq!(tx.state(), TransactionState::Calling);

    let errors: Arc<Mutex<Vec<sipflow_transaction_core::Error>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_sink = errors.clone();
    tx.on_error(move |e| errors_sink.lock().push(e));

    tokio::time::sleep(Duration::from_secs(33)).await;

    // Sends at 0, 0.5, 1.5, 3.5, 7.5, 15.5 and 31.5 seconds, then Timer B.
    assert_eq!(sender.requests().len(), 7);
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert!(errors
        .lock()
        .iter()
        .any(|e| matches!(e, sipflow_transaction_core::Error::TransactionTimedOut)));
    assert_eq!(layer.client_count(), 0);
}

// A non-2xx final is ACKed by the transaction itself, and retransmitted
// finals are re-ACKed without being re-delivered.
#[tokio::test(start_paused = true)]
async fn invite_client_acks_non_2xx_finals() {
    let (layer, sender) = layer_with_mock();
    let outbound = OutboundRequest::new(request(Method::Invite, "z9hG4bKuac2"));
    let tx = layer.new_client_transaction(&outbound).await.unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_sink = delivered.clone();
    tx.on_response(move |_| {
        delivered_sink.fetch_add(1, Ordering::SeqCst);
    });

    let busy = Response::from_request(StatusCode::BUSY_HERE, &outbound.message());
    layer
        .response_middleware(None)
        .handle_response(inbound_response(busy.clone()))
        .await
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Completed);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    let acks: Vec<Request> = sender
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Ack)
        .collect();
    assert_eq!(acks.len(), 1);
    assert_eq!(
        acks[0].headers.top_via_hop().unwrap().branch(),
        Some("z9hG4bKuac2"),
        "the ACK belongs to the INVITE transaction"
    );
    assert_eq!(acks[0].headers.cseq().unwrap().method, Method::Ack);

    // Peer retransmits the final: re-ACK, no second delivery.
    layer
        .response_middleware(None)
        .handle_response(inbound_response(busy))
        .await
        .unwrap();
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(
        sender
            .requests()
            .iter()
            .filter(|r| r.method == Method::Ack)
            .count(),
        2
    );

    // Timer D.
    tokio::time::sleep(Duration::from_secs(33)).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn invite_client_2xx_terminates_without_ack() {
    let (layer, sender) = layer_with_mock();
    let outbound = OutboundRequest::new(request(Method::Invite, "z9hG4bKuac3"));
    let tx = layer.new_client_transaction(&outbound).await.unwrap();

    let ok = Response::from_request(StatusCode::OK, &outbound.message());
    layer
        .response_middleware(None)
        .handle_response(inbound_response(ok))
        .await
        .unwrap();

    // The ACK for a 2xx is the application's, not the transaction's.
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert!(sender.requests().iter().all(|r| r.method == Method::Invite));
    assert_eq!(layer.client_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn non_invite_client_full_path() {
    let (layer, sender) = layer_with_mock();
    let outbound = OutboundRequest::new(request(Method::Options, "z9hG4bKnic1"));
    let tx = layer.new_client_transaction(&outbound).await.unwrap();
    assert_eq!(tx.state(), TransactionState::Trying);

    // One Timer E retransmission before anything comes back.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(sender.requests().len(), 2);

    let trying = Response::from_request(StatusCode::TRYING, &outbound.message());
    layer
        .response_middleware(None)
        .handle_response(inbound_response(trying))
        .await
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Proceeding);

    let ok = Response::from_request(StatusCode::OK, &outbound.message());
    layer
        .response_middleware(None)
        .handle_response(inbound_response(ok))
        .await
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Completed);

    // Timer K = T4.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(layer.client_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn non_invite_server_replays_last_response() {
    let (layer, sender) = layer_with_mock();
    let options = inbound(request(Method::Options, "z9hG4bKnis1"));
    let tx = layer.new_server_transaction(&options).unwrap();
    assert_eq!(tx.state(), TransactionState::Trying);

    tx.respond(Response::from_request(StatusCode::OK, options.message()))
        .await
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Completed);

    // A retransmission through the middleware replays the 200.
    layer
        .request_middleware(None)
        .handle_request(inbound(request(Method::Options, "z9hG4bKnis1")))
        .await
        .unwrap();
    assert_eq!(sender.count_status(StatusCode::OK), 2);

    // Timer J.
    tokio::time::sleep(Duration::from_secs(33)).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(layer.server_count(), 0);
}

#[tokio::test]
async fn unmatched_request_without_next_draws_503() {
    let (layer, sender) = layer_with_mock();
    layer
        .request_middleware(None)
        .handle_request(inbound(request(Method::Message, "z9hG4bKmiss")))
        .await
        .unwrap();
    assert_eq!(sender.count_status(StatusCode::SERVICE_UNAVAILABLE), 1);
}

#[tokio::test]
async fn closing_layer_answers_503_and_drops_responses() {
    let (layer, sender) = layer_with_mock();
    layer.close().await;

    layer
        .request_middleware(None)
        .handle_request(inbound(request(Method::Options, "z9hG4bKclosing")))
        .await
        .unwrap();
    assert_eq!(sender.count_status(StatusCode::SERVICE_UNAVAILABLE), 1);

    let stray = Response::from_request(
        StatusCode::OK,
        &request(Method::Options, "z9hG4bKclosing"),
    );
    layer
        .response_middleware(None)
        .handle_response(inbound_response(stray))
        .await
        .unwrap();
    assert!(layer.new_server_transaction(&inbound(request(Method::Options, "z9hG4bKnew")))
        .is_err());
}

#[tokio::test]
async fn cancel_without_target_draws_481() {
    let (layer, sender) = layer_with_mock();
    let result = layer
        .request_middleware(None)
        .handle_request(inbound(request(Method::Cancel, "z9hG4bKnothing")))
        .await;
    assert!(result.is_err());
    assert_eq!(
        sender.count_status(StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_reaches_the_invite_transaction() {
    let (layer, _sender) = layer_with_mock();
    let invite = inbound(request(Method::Invite, "z9hG4bKtarget"));
    let tx = layer.new_server_transaction(&invite).unwrap();
    let cancels = Arc::new(AtomicUsize::new(0));
    if let ServerTransaction::Invite(invite_tx) = &tx {
        let sink = cancels.clone();
        invite_tx.on_cancel(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
    }

    struct CancelResponder(TransactionLayer);
    #[async_trait]
    impl RequestHandler for CancelResponder {
        async fn handle_request(
            &self,
            request: InboundRequest,
        ) -> sipflow_transaction_core::Result<()> {
            // The application opens the CANCEL's own transaction and 200s it.
            let tx = self.0.new_server_transaction(&request)?;
            tx.respond(Response::from_request(StatusCode::OK, request.message()))
                .await
        }
    }
    layer
        .request_middleware(Some(Arc::new(CancelResponder(layer.clone()))))
        .handle_request(inbound(request(Method::Cancel, "z9hG4bKtarget")))
        .await
        .unwrap();
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn snapshot_restores_state_and_future_timers() {
    let (layer, _sender) = layer_with_mock();
    let invite = inbound(request(Method::Invite, "z9hG4bKsnap"));
    let tx = layer.new_server_transaction(&invite).unwrap();
    tx.respond(Response::from_request(StatusCode::BUSY_HERE, invite.message()))
        .await
        .unwrap();

    let json = tx.snapshot().to_json().unwrap();
    drop(tx);
    layer.close().await;

    // A fresh process: new layer, new sender, same snapshot.
    let (restored_layer, restored_sender) = layer_with_mock();
    let snapshot = TransactionSnapshot::from_json(&json).unwrap();
    assert_eq!(snapshot.kind, TransactionKind::InviteServer);
    let restored = restored_layer.restore_server(&snapshot).unwrap();
    assert_eq!(restored.state(), TransactionState::Completed);
    assert_eq!(restored_layer.server_count(), 1);

    // Timer H was persisted with its deadline; it still terminates the
    // transaction, and Timer G keeps retransmitting the stored 486.
    tokio::time::sleep(Duration::from_secs(34)).await;
    assert_eq!(restored.state(), TransactionState::Terminated);
    assert!(restored_sender.count_status(StatusCode::BUSY_HERE) >= 1);
    assert_eq!(restored_layer.server_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn respond_after_termination_is_rejected() {
    let (layer, _sender) = layer_with_mock();
    let options = inbound(request(Method::Options, "z9hG4bKdead"));
    let tx = layer.new_server_transaction(&options).unwrap();
    tx.terminate().await;
    let err = tx
        .respond(Response::from_request(StatusCode::OK, options.message()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        sipflow_transaction_core::Error::TransactionActionNotAllowed { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn duplicate_server_transaction_is_refused() {
    let (layer, _sender) = layer_with_mock();
    let invite = inbound(request(Method::Invite, "z9hG4bKdup"));
    let tx = layer.new_server_transaction(&invite).unwrap();
    assert!(layer.new_server_transaction(&invite).is_err());

    assert!(layer.server_transaction(tx.key()).is_ok());
    let missing = TransactionKey::Client {
        branch: "z9hG4bKnone".to_string(),
        method: Method::Invite,
    };
    assert!(matches!(
        layer.server_transaction(&missing),
        Err(sipflow_transaction_core::Error::TransactionNotFound(_))
    ));
}
