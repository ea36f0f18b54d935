//! # Digest authentication
//!
//! RFC 2617 MD5 digest computation and the retry flow of
//! [RFC 3261 Section 22](https://datatracker.ietf.org/doc/html/rfc3261#section-22):
//! given a 401/407 challenge, [`authorize_request`] rebuilds the original
//! request with credentials installed, a fresh topmost Via branch and an
//! incremented CSeq, ready to be sent as a new transaction.

use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::types::auth::{AuthParams, Authorization, ProxyAuthorization};
use crate::types::header::Header;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::status::StatusCode;
use crate::types::via::generate_branch;

/// Username and password for a protection domain.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Username within the realm
    pub username: String,
    /// Shared secret
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Computes the RFC 2617 digest response:
/// `MD5(MD5(user:realm:password):nonce:MD5(method:uri))`.
pub fn digest_response(
    credentials: &Credentials,
    realm: &str,
    method: &str,
    uri: &str,
    nonce: &str,
) -> String {
    let a1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, realm, credentials.password
    ));
    let a2 = md5_hex(&format!("{}:{}", method, uri));
    md5_hex(&format!("{}:{}:{}", a1, nonce, a2))
}

/// Answers a 401 or 407 challenge by mutating the original request in
/// place: installs the matching credentials header, regenerates the top
/// Via branch and increments the CSeq sequence number.
pub fn authorize_request(
    request: &mut Request,
    response: &Response,
    credentials: &Credentials,
) -> Result<()> {
    let proxy = match response.status {
        StatusCode::UNAUTHORIZED => false,
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => true,
        status => {
            return Err(Error::InvalidArgument(format!(
                "response {} carries no challenge",
                status
            )))
        }
    };

    let challenge = if proxy {
        response
            .headers
            .iter()
            .find_map(|h| match h {
                Header::ProxyAuthenticate(c) => Some(&c.0),
                _ => None,
            })
            .ok_or_else(|| Error::MissingHeader("Proxy-Authenticate".to_string()))?
    } else {
        response
            .headers
            .iter()
            .find_map(|h| match h {
                Header::WwwAuthenticate(c) => Some(&c.0),
                _ => None,
            })
            .ok_or_else(|| Error::MissingHeader("WWW-Authenticate".to_string()))?
    };

    if !challenge.scheme.eq_ignore_ascii_case("Digest") {
        return Err(Error::InvalidArgument(format!(
            "unsupported auth scheme: {}",
            challenge.scheme
        )));
    }
    if let Some(alg) = challenge.algorithm() {
        if !alg.eq_ignore_ascii_case("MD5") {
            return Err(Error::InvalidArgument(format!(
                "unsupported digest algorithm: {}",
                alg
            )));
        }
    }
    let realm = challenge
        .realm()
        .ok_or_else(|| Error::InvalidArgument("challenge without realm".to_string()))?;
    let nonce = challenge
        .nonce()
        .ok_or_else(|| Error::InvalidArgument("challenge without nonce".to_string()))?;

    let uri = request.uri.to_string();
    let answer = digest_response(
        credentials,
        realm,
        request.method.as_str(),
        &uri,
        nonce,
    );

    let mut params = AuthParams::new("Digest");
    params.set("username", credentials.username.clone());
    params.set("realm", realm.to_string());
    params.set("nonce", nonce.to_string());
    params.set("uri", uri);
    params.set("response", answer);
    params.set("algorithm", "MD5");
    if let Some(opaque) = challenge.get("opaque") {
        params.set("opaque", opaque.to_string());
    }

    if proxy {
        request
            .headers
            .set(Header::ProxyAuthorization(ProxyAuthorization(params)));
    } else {
        request.headers.set(Header::Authorization(Authorization(params)));
    }

    if let Some(hop) = request.headers.top_via_hop_mut() {
        hop.set_branch(generate_branch());
    }
    if let Some(cseq) = request.headers.cseq_mut() {
        cseq.seq += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address::Address;
    use crate::types::auth::WwwAuthenticate;
    use crate::types::call_id::CallId;
    use crate::types::cseq::CSeq;
    use crate::types::from::From;
    use crate::types::header::Header;
    use crate::types::method::Method;
    use crate::types::to::To;
    use crate::types::uri::{Host, Uri};
    use crate::types::via::{Via, ViaHop};
    use std::str::FromStr;

    #[test]
    fn rfc2617_reference_vector() {
        // The example from RFC 2617 section 3.5, adapted to a SIP method.
        let creds = Credentials::new("Mufasa", "Circle Of Life");
        let response = digest_response(
            &creds,
            "testrealm@host.com",
            "GET",
            "/dir/index.html",
            "dcd98b7102dd2f0e8b11d0f600bfb0c093",
        );
        assert_eq!(response, "670fd8c2df070c60b045671b8b24ff02");
    }

    fn challenged_request() -> (Request, Response) {
        let uri = Uri::from_str("sip:bob@biloxi.com").unwrap();
        let mut via_hop = ViaHop::new("UDP", Host::from_str("pc33.atlanta.com").unwrap(), None);
        via_hop.set_branch("z9hG4bKold");
        let request = Request::new(Method::Register, uri.clone())
            .with_header(Header::Via(Via::single(via_hop)))
            .with_header(Header::From(From::new(Address::new(uri.clone()))))
            .with_header(Header::To(To::new(Address::new(uri))))
            .with_header(Header::CallId(CallId::new("c1")))
            .with_header(Header::CSeq(CSeq::new(1, Method::Register)));

        let mut challenge = AuthParams::new("Digest");
        challenge.set("realm", "biloxi.com");
        challenge.set("nonce", "84a4cc6f3082121f32b42a2187831a9e");
        let response = Response::from_request(StatusCode::UNAUTHORIZED, &request)
            .with_header(Header::WwwAuthenticate(WwwAuthenticate(challenge)));
        (request, response)
    }

    #[test]
    fn retry_request_carries_credentials_and_new_branch() {
        let (mut request, response) = challenged_request();
        authorize_request(&mut request, &response, &Credentials::new("bob", "zanzibar"))
            .unwrap();

        let auth = request
            .headers
            .iter()
            .find_map(|h| match h {
                Header::Authorization(a) => Some(&a.0),
                _ => None,
            })
            .unwrap();
        assert_eq!(auth.get("username"), Some("bob"));
        assert_eq!(auth.get("realm"), Some("biloxi.com"));
        assert_eq!(auth.get("uri"), Some("sip:bob@biloxi.com"));
        assert!(auth.get("response").is_some());

        assert_eq!(request.headers.cseq().unwrap().seq, 2);
        let branch = request.headers.top_via_hop().unwrap().branch().unwrap().to_string();
        assert_ne!(branch, "z9hG4bKold");
        assert!(branch.starts_with(crate::types::via::MAGIC_COOKIE));
    }

    #[test]
    fn refuses_non_challenge_responses() {
        let (mut request, _) = challenged_request();
        let ok = Response::from_request(StatusCode::OK, &request);
        assert!(authorize_request(&mut request, &ok, &Credentials::new("b", "p")).is_err());
    }
}
