//! Socket-level tests: Via rewriting on inbound requests, error replies
//! for unparseable datagrams, stream framing and connection reuse.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use sipflow_sip_core::prelude::*;
use sipflow_sip_transport::prelude::*;

async fn bind_udp() -> (UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>) {
    let (transport, events) = UdpTransport::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::default(),
    )
    .await
    .unwrap();
    let serving = transport.clone();
    tokio::spawn(async move {
        let _ = serving.serve().await;
    });
    (transport, events)
}

#[tokio::test]
async fn inbound_udp_request_gets_received_and_rport() {
    let (transport, mut events) = bind_udp().await;
    let local = transport.local_addr().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client.local_addr().unwrap();
    let packet = format!(
        "OPTIONS sip:alice@127.0.0.1:{} SIP/2.0\r\n\
Via: SIP/2.0/UDP example.com:5060;branch=z9hG4bK.q;rport\r\n\
From: <sip:bob@example.com>;tag=abc\r\n\
To: <sip:alice@127.0.0.1>\r\n\
Call-ID: c1@x\r\n\
CSeq: 1 OPTIONS\r\n\
Max-Forwards: 70\r\n\r\n",
        local.port()
    );
    client.send_to(packet.as_bytes(), local).await.unwrap();

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    let inbound = match event {
        TransportEvent::Request(inbound) => inbound,
        other => panic!("expected request event, got {:?}", other),
    };
    assert_eq!(inbound.protocol(), Protocol::Udp);
    assert_eq!(inbound.remote_addr(), client_addr);

    let hop = inbound.message().headers.top_via_hop().unwrap();
    assert_eq!(hop.received(), Some("127.0.0.1"));
    assert_eq!(hop.rport(), Some(Some(client_addr.port())));

    // No automatic reply for a well-formed request.
    let mut buf = [0u8; 1024];
    assert!(
        timeout(Duration::from_millis(300), client.recv_from(&mut buf))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn oversized_declared_body_is_answered_with_413() {
    let (transport, mut events) = bind_udp().await;
    let local = transport.local_addr().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = format!(
        "INVITE sip:alice@127.0.0.1 SIP/2.0\r\n\
Via: SIP/2.0/UDP example.com:5060;branch=z9hG4bKbig;rport\r\n\
From: <sip:bob@example.com>;tag=abc\r\n\
To: <sip:alice@127.0.0.1>\r\n\
Call-ID: big1\r\n\
CSeq: 9 INVITE\r\n\
Max-Forwards: 70\r\n\
Content-Length: {}\r\n\r\n",
        MAX_MESSAGE_SIZE + 1
    );
    client.send_to(packet.as_bytes(), local).await.unwrap();

    let mut buf = [0u8; 2048];
    let (len, from) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("413 reply expected")
        .unwrap();
    assert_eq!(from, local);

    let reply = parse_message(&buf[..len]).unwrap();
    let response = reply.as_response().unwrap();
    assert_eq!(response.status, StatusCode::REQUEST_ENTITY_TOO_LARGE);
    assert_eq!(response.headers.call_id().unwrap().value(), "big1");
    assert_eq!(response.headers.cseq().unwrap().seq, 9);
    assert_eq!(
        response.headers.top_via_hop().unwrap().received(),
        Some("127.0.0.1")
    );

    // The parse error is also surfaced as an event.
    let mut saw_error = false;
    while let Ok(Some(event)) = timeout(Duration::from_millis(300), events.recv()).await {
        if matches!(event, TransportEvent::Error { .. }) {
            saw_error = true;
            break;
        }
    }
    assert!(saw_error);
}

#[tokio::test]
async fn unreliable_send_rejects_oversized_requests() {
    let (transport, _events) = bind_udp().await;

    let uri = Uri::sip(Host::Ipv4("127.0.0.1".parse().unwrap()));
    let mut hop = ViaHop::new("UDP", Host::Domain("caller.example.com".to_string()), None);
    hop.set_branch(generate_branch());
    let request = Request::new(Method::Invite, uri.clone())
        .with_header(Header::Via(Via::single(hop)))
        .with_header(Header::From(FromHeader::new(Address::new(uri.clone()))))
        .with_header(Header::To(To::new(Address::new(uri))))
        .with_header(Header::CallId(CallId::new("mtu1")))
        .with_header(Header::CSeq(CSeq::new(1, Method::Invite)))
        .with_header(Header::MaxForwards(MaxForwards(70)))
        .with_body(vec![b'x'; 4096]);

    let outbound = OutboundRequest::new(request);
    outbound.set_remote_addr("127.0.0.1:5060".parse().unwrap());
    let err = Transport::send_request(&transport, &outbound).await.unwrap_err();
    assert!(matches!(
        err,
        sipflow_sip_transport::Error::MessageTooLarge { .. }
    ));
}

#[tokio::test]
async fn outbound_request_via_is_stamped_with_transport_identity() {
    let (server, mut server_events) = bind_udp().await;
    let (client, _client_events) = bind_udp().await;
    let server_addr = server.local_addr().unwrap();
    let client_addr = client.local_addr().unwrap();

    let uri = Uri::sip(Host::Ipv4("127.0.0.1".parse().unwrap()));
    // Caller leaves host/port to the transport; only the branch is theirs.
    let mut hop = ViaHop::new("TCP", Host::Domain("placeholder.invalid".to_string()), None);
    hop.set_branch("z9hG4bKstamp");
    let request = Request::new(Method::Options, uri.clone())
        .with_header(Header::Via(Via::single(hop)))
        .with_header(Header::From(FromHeader::new(Address::new(uri.clone()))))
        .with_header(Header::To(To::new(Address::new(uri))))
        .with_header(Header::CallId(CallId::new("stamp1")))
        .with_header(Header::CSeq(CSeq::new(1, Method::Options)))
        .with_header(Header::MaxForwards(MaxForwards(70)));

    let outbound = OutboundRequest::new(request);
    outbound.set_remote_addr(server_addr);
    Transport::send_request(&client, &outbound).await.unwrap();

    let event = timeout(Duration::from_secs(2), server_events.recv())
        .await
        .unwrap()
        .unwrap();
    let inbound = match event {
        TransportEvent::Request(inbound) => inbound,
        other => panic!("expected request event, got {:?}", other),
    };
    let hop = inbound.message().headers.top_via_hop().unwrap();
    assert_eq!(hop.transport, "UDP");
    assert_eq!(hop.host.to_string(), client_addr.ip().to_string());
    assert_eq!(hop.port, Some(client_addr.port()));
}

#[tokio::test]
async fn tcp_frames_messages_and_reuses_the_connection_for_replies() {
    let (transport, mut events) = TcpTransport::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::default(),
    )
    .await
    .unwrap();
    let local = transport.local_addr().unwrap();
    let serving = transport.clone();
    tokio::spawn(async move {
        let _ = serving.serve().await;
    });

    let mut client = TcpStream::connect(local).await.unwrap();
    let request = "REGISTER sip:registrar.example.com SIP/2.0\r\n\
Via: SIP/2.0/TCP client.example.com:5060;branch=z9hG4bKtcp1\r\n\
From: <sip:bob@example.com>;tag=reg1\r\n\
To: <sip:bob@example.com>\r\n\
Call-ID: tcp-call-1\r\n\
CSeq: 1 REGISTER\r\n\
Max-Forwards: 70\r\n\
Content-Length: 0\r\n\r\n";
    // Split the write to exercise stream reassembly.
    let (a, b) = request.split_at(60);
    client.write_all(a.as_bytes()).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(b.as_bytes()).await.unwrap();

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    let inbound = match event {
        TransportEvent::Request(inbound) => inbound,
        other => panic!("expected request event, got {:?}", other),
    };
    assert_eq!(inbound.protocol(), Protocol::Tcp);
    assert_eq!(transport.connection_count(), 1);

    // Reply goes back over the same connection.
    transport
        .respond(&inbound, StatusCode::OK)
        .await
        .unwrap();
    let mut buf = vec![0u8; 4096];
    let len = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let reply = parse_message(&buf[..len]).unwrap();
    let response = reply.as_response().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.call_id().unwrap().value(), "tcp-call-1");
    // Streamed rendering always frames the body.
    assert_eq!(response.headers.content_length().unwrap().0, 0);
}

#[tokio::test]
async fn manager_selects_declared_transport_and_falls_back_to_default() {
    let (manager, _events) = TransportManager::new(16);
    assert!(matches!(
        manager
            .send_request(&OutboundRequest::new(Request::new(
                Method::Options,
                Uri::sip(Host::Ipv4("127.0.0.1".parse().unwrap())),
            )))
            .await
            .unwrap_err(),
        sipflow_sip_transport::Error::NoTransport
    ));

    let (udp_a, events_a) = UdpTransport::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::default(),
    )
    .await
    .unwrap();
    let (udp_b, events_b) = UdpTransport::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::default(),
    )
    .await
    .unwrap();
    let addr_a = udp_a.local_addr().unwrap();
    let addr_b = udp_b.local_addr().unwrap();
    manager
        .add_transport(Arc::new(udp_a.clone()), events_a, false)
        .unwrap();
    manager
        .add_transport(Arc::new(udp_b.clone()), events_b, false)
        .unwrap();
    for t in [udp_a.clone(), udp_b.clone()] {
        tokio::spawn(async move {
            let _ = t.serve().await;
        });
    }

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let build = |call_id: &str| {
        let uri = Uri::sip(Host::Ipv4("127.0.0.1".parse().unwrap()));
        let mut hop = ViaHop::new("UDP", Host::Domain("mgr.example.com".to_string()), None);
        hop.set_branch(generate_branch());
        let request = Request::new(Method::Options, uri.clone())
            .with_header(Header::Via(Via::single(hop)))
            .with_header(Header::From(FromHeader::new(Address::new(uri.clone()))))
            .with_header(Header::To(To::new(Address::new(uri))))
            .with_header(Header::CallId(CallId::new(call_id)))
            .with_header(Header::CSeq(CSeq::new(1, Method::Options)))
            .with_header(Header::MaxForwards(MaxForwards(70)));
        OutboundRequest::new(request)
    };

    // Declared key picks the non-default transport.
    let declared = build("declared");
    declared.set_protocol(Protocol::Udp);
    declared.set_remote_addr(peer_addr);
    declared.set_local_addr(addr_b);
    manager.send_request(&declared).await.unwrap();
    let mut buf = [0u8; 2048];
    let (len, from) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, addr_b);
    assert!(parse_message(&buf[..len]).is_ok());

    // No declared key: the default (first added) transport is used.
    let fallback = build("fallback");
    fallback.set_remote_addr(peer_addr);
    manager.send_request(&fallback).await.unwrap();
    let (_, from) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, addr_a);
}

#[tokio::test]
async fn manager_interceptors_apply_to_future_transports_and_unbind() {
    let (manager, mut events) = TransportManager::new(16);
    let handle = manager.use_inbound_request_interceptor(Arc::new(
        |_: &InboundRequest| -> sipflow_sip_transport::Result<InterceptAction> {
            Ok(InterceptAction::Drop)
        },
    ));

    // Added after installation, still covered.
    let (udp, udp_events) = UdpTransport::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::default(),
    )
    .await
    .unwrap();
    let local = udp.local_addr().unwrap();
    manager
        .add_transport(Arc::new(udp.clone()), udp_events, true)
        .unwrap();
    let serving = udp.clone();
    tokio::spawn(async move {
        let _ = serving.serve().await;
    });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = "OPTIONS sip:x@127.0.0.1 SIP/2.0\r\n\
Via: SIP/2.0/UDP example.com;branch=z9hG4bKdrop\r\n\
From: <sip:a@example.com>;tag=1\r\n\
To: <sip:x@127.0.0.1>\r\n\
Call-ID: drop1\r\n\
CSeq: 1 OPTIONS\r\n\
Max-Forwards: 70\r\n\r\n";
    client.send_to(packet.as_bytes(), local).await.unwrap();
    assert!(
        timeout(Duration::from_millis(300), events.recv()).await.is_err(),
        "interceptor should have dropped the request"
    );

    handle.unbind();
    client.send_to(packet.as_bytes(), local).await.unwrap();
    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, TransportEvent::Request(_)));
}
