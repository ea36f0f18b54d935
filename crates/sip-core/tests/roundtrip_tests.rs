//! Renderer/parser agreement: anything the renderer emits must parse back
//! to an equivalent message, and rendering is idempotent across a cycle.

use proptest::prelude::*;
use std::str::FromStr;

use sipflow_sip_core::prelude::*;

fn base_request(method: Method, seq: u32, branch: &str, tag: &str) -> Request {
    let uri = Uri::from_str("sip:bob@biloxi.com").unwrap();
    let mut hop = ViaHop::new("UDP", Host::Domain("pc33.atlanta.com".to_string()), Some(5060));
    hop.set_branch(branch);
    Request::new(method.clone(), uri.clone())
        .with_header(Header::Via(Via::single(hop)))
        .with_header(Header::From(FromHeader::new({
            let mut a = Address::new(Uri::from_str("sip:alice@atlanta.com").unwrap());
            a.set_tag(tag);
            a
        })))
        .with_header(Header::To(To::new(Address::new(uri))))
        .with_header(Header::CallId(CallId::new("a84b4c76e66710@pc33")))
        .with_header(Header::CSeq(CSeq::new(seq, method)))
        .with_header(Header::MaxForwards(MaxForwards(70)))
}

#[test]
fn request_roundtrip_preserves_structure() {
    let mut request = base_request(Method::Invite, 314159, "z9hG4bK776asdhds", "1928301774")
        .with_body("v=0\r\n");
    request.ensure_content_length();

    let reparsed = parse_message(&request.to_bytes()).unwrap();
    match reparsed {
        Message::Request(parsed) => {
            assert_eq!(parsed.method, request.method);
            assert_eq!(parsed.uri, request.uri);
            assert_eq!(parsed.body, request.body);
            assert_eq!(parsed.headers.cseq(), request.headers.cseq());
            assert_eq!(parsed.headers.from(), request.headers.from());
            assert_eq!(parsed.headers.to(), request.headers.to());
            assert_eq!(parsed.headers.via(), request.headers.via());
            assert_eq!(parsed.headers.call_id(), request.headers.call_id());
        }
        other => panic!("expected request, got {:?}", other),
    }
}

#[test]
fn response_roundtrip_preserves_structure() {
    let request = base_request(Method::Invite, 1, "z9hG4bKabc", "t1");
    let mut response = Response::from_request(StatusCode::RINGING, &request);
    response.set_to_tag("8321234356");
    response.ensure_content_length();

    let reparsed = parse_message(&response.to_bytes()).unwrap();
    let parsed = reparsed.as_response().unwrap();
    assert_eq!(parsed.status, StatusCode::RINGING);
    assert_eq!(parsed.to_tag(), Some("8321234356"));
    assert_eq!(parsed.headers.via(), response.headers.via());
}

proptest! {
    // Rendering is a fixpoint: parse(render(m)) renders to the same bytes.
    #[test]
    fn render_parse_render_is_stable(
        seq in 1u32..1_000_000,
        branch_suffix in "[a-zA-Z0-9]{8,24}",
        tag in "[a-zA-Z0-9]{4,16}",
        body in proptest::collection::vec(any::<u8>(), 0..512),
        invite in any::<bool>(),
    ) {
        let method = if invite { Method::Invite } else { Method::Options };
        let branch = format!("{}{}", MAGIC_COOKIE, branch_suffix);
        let mut request = base_request(method, seq, &branch, &tag).with_body(body);
        request.ensure_content_length();

        let first = request.to_bytes();
        let reparsed = parse_message(&first).unwrap();
        let second = reparsed.to_bytes();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn streamed_render_always_frames_the_body(
        body in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut request = base_request(Method::Message, 1, "z9hG4bKstream", "t2")
            .with_body(body.clone());
        request.ensure_content_length();

        let mut parser = StreamParser::new();
        parser.feed(&request.to_bytes());
        let msg = parser.next_message().unwrap().expect("framed message");
        prop_assert_eq!(&msg.body()[..], &body[..]);
        prop_assert!(parser.next_message().unwrap().is_none());
    }
}
