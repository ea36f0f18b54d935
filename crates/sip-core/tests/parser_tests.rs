//! End-to-end parser tests over realistic wire images.

use sipflow_sip_core::prelude::*;

const INVITE: &[u8] = b"INVITE sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@biloxi.com>\r\n\
From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
CSeq: 314159 INVITE\r\n\
Contact: <sip:alice@pc33.atlanta.com>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 18\r\n\
\r\n\
v=0\r\no=alice 0 0\r\n";

#[test]
fn parses_rfc3261_invite() {
    let message = parse_message(INVITE).unwrap();
    let request = message.as_request().unwrap();

    assert_eq!(request.method, Method::Invite);
    assert_eq!(request.uri.to_string(), "sip:bob@biloxi.com");
    assert_eq!(request.version, Version::SIP_2_0);

    let via = request.headers.top_via_hop().unwrap();
    assert_eq!(via.transport, "UDP");
    assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
    assert!(via.is_rfc3261_branch());

    assert_eq!(
        request.headers.from().unwrap().tag(),
        Some("1928301774")
    );
    assert_eq!(request.headers.to().unwrap().tag(), None);
    assert_eq!(
        request.headers.to().unwrap().address().display_name.as_deref(),
        Some("Bob")
    );
    assert_eq!(request.headers.cseq().unwrap().seq, 314159);
    assert_eq!(request.headers.content_length().unwrap().0, 18);
    assert_eq!(&request.body[..], b"v=0\r\no=alice 0 0\r\n");
    assert!(request.validate().is_ok());
}

#[test]
fn parses_response_with_to_tag() {
    let data = b"SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds;received=192.0.2.1\r\n\
To: Bob <sip:bob@biloxi.com>;tag=a6c85cf\r\n\
From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
CSeq: 314159 INVITE\r\n\
Content-Length: 0\r\n\
\r\n";
    let message = parse_message(data).unwrap();
    let response = message.as_response().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.to_tag(), Some("a6c85cf"));
    assert_eq!(
        response.headers.top_via_hop().unwrap().received(),
        Some("192.0.2.1")
    );
    assert_eq!(response.headers.cseq().unwrap().method, Method::Invite);
}

#[test]
fn compact_forms_fold_to_canonical_names() {
    let data = b"MESSAGE sip:carol@chicago.com SIP/2.0\r\n\
v: SIP/2.0/TCP client.chicago.com;branch=z9hG4bKabc\r\n\
f: <sip:alice@atlanta.com>;tag=x1\r\n\
t: <sip:carol@chicago.com>\r\n\
i: msg-1\r\n\
CSeq: 2 MESSAGE\r\n\
Max-Forwards: 70\r\n\
c: text/plain\r\n\
l: 5\r\n\
\r\n\
hello";
    let message = parse_message(data).unwrap();
    let request = message.as_request().unwrap();
    assert!(request.validate().is_ok());
    assert_eq!(request.headers.call_id().unwrap().value(), "msg-1");
    assert_eq!(request.headers.content_type().unwrap().to_string(), "text/plain");
    assert_eq!(&request.body[..], b"hello");

    // Rendering always uses the canonical long names.
    let rendered = request.to_bytes();
    let text = std::str::from_utf8(&rendered).unwrap();
    assert!(text.contains("Call-ID: msg-1\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(!text.contains("\ni:"));
}

#[test]
fn multiple_via_headers_keep_order() {
    let data = b"INVITE sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/UDP proxy.example.com;branch=z9hG4bKtop\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKbottom\r\n\
From: <sip:alice@atlanta.com>;tag=1\r\n\
To: <sip:bob@biloxi.com>\r\n\
Call-ID: c2\r\n\
CSeq: 1 INVITE\r\n\
Max-Forwards: 69\r\n\
\r\n";
    let message = parse_message(data).unwrap();
    let request = message.as_request().unwrap();
    let vias: Vec<_> = request
        .headers
        .get_all(&HeaderName::Via)
        .collect();
    assert_eq!(vias.len(), 2);
    assert_eq!(
        request.headers.top_via_hop().unwrap().branch(),
        Some("z9hG4bKtop")
    );

    // Order survives a render/parse cycle.
    let reparsed = parse_message(&request.to_bytes()).unwrap();
    assert_eq!(
        reparsed.headers().top_via_hop().unwrap().branch(),
        Some("z9hG4bKtop")
    );
}

#[test]
fn comma_separated_via_parses_to_hops() {
    let data = b"ACK sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/UDP a.example.com;branch=z9hG4bKa, SIP/2.0/UDP b.example.com;branch=z9hG4bKb\r\n\
From: <sip:alice@atlanta.com>;tag=1\r\n\
To: <sip:bob@biloxi.com>;tag=2\r\n\
Call-ID: c3\r\n\
CSeq: 1 ACK\r\n\
\r\n";
    let message = parse_message(data).unwrap();
    let via = message.headers().via().unwrap();
    assert_eq!(via.0.len(), 2);
    assert_eq!(via.top().unwrap().branch(), Some("z9hG4bKa"));
}

#[test]
fn rejects_truncated_header_block() {
    let data = b"OPTIONS sip:a@b.c SIP/2.0\r\nCall-ID: c1\r\n";
    let err = parse_message(data).unwrap_err();
    match err {
        Error::Parse { phase, .. } => assert_eq!(phase, ParsePhase::Headers),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn partial_message_keeps_routing_headers() {
    // The broken Expires line arrives after the routing headers; the parse
    // error still exposes enough of the message to address a 400 reply.
    let data = b"OPTIONS sip:a@b.c SIP/2.0\r\n\
Via: SIP/2.0/UDP h.example.com;branch=z9hG4bKx\r\n\
From: <sip:bob@example.com>;tag=abc\r\n\
To: <sip:a@b.c>\r\n\
Call-ID: c9\r\n\
CSeq: 7 OPTIONS\r\n\
Expires: never\r\n\
\r\n";
    let err = parse_message(data).unwrap_err();
    let partial = err.partial_message().expect("partial message");
    assert_eq!(partial.headers().call_id().unwrap().value(), "c9");
    assert_eq!(partial.headers().cseq().unwrap().seq, 7);
    assert!(partial.headers().via().is_some());
}
