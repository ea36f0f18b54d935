//! # Message codec
//!
//! Parsing has two entry points with different framing rules:
//!
//! - [`parse_message`] consumes exactly one message from a datagram buffer.
//!   A missing `Content-Length` means the body extends to the end of the
//!   buffer, and anything after the first complete message is ignored.
//! - [`StreamParser`](stream::StreamParser) incrementally parses a byte
//!   stream, where `Content-Length` is mandatory because nothing else can
//!   frame the body.
//!
//! Both share the size cap [`MAX_MESSAGE_SIZE`], which bounds line length
//! and the declared body size. A declared `Content-Length` over the cap
//! fails with `EntityTooLarge` before any body buffer is allocated.

pub mod address;
pub mod headers;
pub mod line;
pub mod stream;
pub mod uri;

use bytes::Bytes;

use crate::error::{Error, ParsePhase, Result};
use crate::types::header::Headers;
use crate::types::message::Message;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use line::StartLine;

pub use stream::StreamParser;

/// Upper bound on a single message: start line, each header line and the
/// declared body must all fit. Must stay above 8 KiB.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Accumulates a message across the three parse phases.
pub(crate) struct MessageBuilder {
    start: StartLine,
    headers: Headers,
}

impl MessageBuilder {
    pub(crate) fn from_start_line(line: &str) -> Result<Self> {
        Ok(MessageBuilder {
            start: line::parse_start_line(line)?,
            headers: Headers::new(),
        })
    }

    /// Unfolds and parses a block of header lines (continuation lines start
    /// with whitespace per RFC 3261 Section 7.3.1).
    pub(crate) fn add_header_lines(&mut self, lines: &[String]) -> Result<()> {
        let mut logical: Vec<String> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.starts_with(' ') || line.starts_with('\t') {
                match logical.last_mut() {
                    Some(prev) => {
                        prev.push(' ');
                        prev.push_str(line.trim_start());
                        continue;
                    }
                    None => {
                        return Err(Error::InvalidMessage(
                            "continuation line without a header".to_string(),
                        ))
                    }
                }
            }
            logical.push(line.clone());
        }
        for line in &logical {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                Error::InvalidMessage(format!("header line without a colon: {:?}", line))
            })?;
            self.headers.push(headers::parse_header(name.trim(), value)?);
        }
        Ok(())
    }

    pub(crate) fn content_length(&self) -> Option<usize> {
        self.headers.content_length().map(|cl| cl.0 as usize)
    }

    /// The message assembled so far, with an empty body. Attached to parse
    /// errors so transports can still address an error reply.
    pub(crate) fn partial(&self) -> Message {
        self.clone().finish(Bytes::new())
    }

    pub(crate) fn finish(self, body: Bytes) -> Message {
        match self.start {
            StartLine::Request {
                method,
                uri,
                version,
            } => Message::Request(Request {
                method,
                uri,
                version,
                headers: self.headers,
                body,
            }),
            StartLine::Status {
                version,
                status,
                reason,
            } => Message::Response(Response {
                status,
                reason,
                version,
                headers: self.headers,
                body,
            }),
        }
    }
}

impl Clone for MessageBuilder {
    fn clone(&self) -> Self {
        MessageBuilder {
            start: self.start.clone(),
            headers: self.headers.clone(),
        }
    }
}

// Finds the next line in `data` starting at `pos`. Accepts both CRLF and
// bare LF endings. Returns the line (without its terminator) and the
// position after it.
fn take_line(data: &[u8], pos: usize) -> Result<Option<(&str, usize)>> {
    let rest = &data[pos..];
    match rest.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            let mut line = &rest[..idx];
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            if line.len() > MAX_MESSAGE_SIZE {
                return Err(Error::MessageTooLarge(line.len()));
            }
            Ok(Some((std::str::from_utf8(line)?, pos + idx + 1)))
        }
        None if rest.len() > MAX_MESSAGE_SIZE => Err(Error::MessageTooLarge(rest.len())),
        None => Ok(None),
    }
}

/// Parses exactly one message from a datagram buffer.
///
/// Leading CRLF sequences are skipped as keep-alives. Trailing bytes after
/// the first complete message are ignored. Without a `Content-Length` the
/// body is the remainder of the buffer.
pub fn parse_message(data: &[u8]) -> Result<Message> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge(data.len()));
    }

    // Skip keep-alive CRLFs before the start line.
    let mut pos = 0;
    while data[pos..].starts_with(b"\r\n") {
        pos += 2;
    }
    while data[pos..].starts_with(b"\n") {
        pos += 1;
    }

    let (start, next) = take_line(data, pos)?
        .ok_or_else(|| Error::parse(ParsePhase::StartLine, Error::InvalidMessage("missing start line".to_string()), None))?;
    pos = next;
    let mut builder = MessageBuilder::from_start_line(start)
        .map_err(|e| Error::parse(ParsePhase::StartLine, e, None))?;

    // Header block, terminated by an empty line.
    let mut lines = Vec::new();
    loop {
        match take_line(data, pos) {
            Ok(Some((line, next))) => {
                pos = next;
                if line.is_empty() {
                    break;
                }
                lines.push(line.to_string());
            }
            Ok(None) => {
                let partial = partial_of(&mut builder, &lines);
                return Err(Error::parse(
                    ParsePhase::Headers,
                    Error::InvalidMessage("unterminated header block".to_string()),
                    partial,
                ));
            }
            Err(e) => {
                let partial = partial_of(&mut builder, &lines);
                return Err(Error::parse(ParsePhase::Headers, e, partial));
            }
        }
    }
    builder
        .add_header_lines(&lines)
        .map_err(|e| Error::parse(ParsePhase::Headers, e, Some(builder.partial())))?;

    let body = match builder.content_length() {
        Some(declared) if declared > MAX_MESSAGE_SIZE => {
            return Err(Error::parse(
                ParsePhase::Headers,
                Error::EntityTooLarge(declared),
                Some(builder.partial()),
            ));
        }
        Some(declared) => {
            if data.len() - pos < declared {
                return Err(Error::parse(
                    ParsePhase::Body,
                    Error::InvalidMessage(format!(
                        "body truncated: declared {}, got {}",
                        declared,
                        data.len() - pos
                    )),
                    Some(builder.partial()),
                ));
            }
            Bytes::copy_from_slice(&data[pos..pos + declared])
        }
        None => Bytes::copy_from_slice(&data[pos..]),
    };

    Ok(builder.finish(body))
}

// Best-effort partial message for error reporting: whatever header lines
// parse cleanly are kept, the rest dropped.
fn partial_of(builder: &mut MessageBuilder, lines: &[String]) -> Option<Message> {
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if let Ok(header) = headers::parse_header(name.trim(), value) {
                builder.headers.push(header);
            }
        }
    }
    Some(builder.partial())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::method::Method;

    const OPTIONS: &[u8] = b"OPTIONS sip:alice@127.0.0.1:5060 SIP/2.0\r\n\
Via: SIP/2.0/UDP example.com:5060;branch=z9hG4bK.q;rport\r\n\
From: <sip:bob@example.com>;tag=abc\r\n\
To: <sip:alice@127.0.0.1>\r\n\
Call-ID: c1@x\r\n\
CSeq: 1 OPTIONS\r\n\
Max-Forwards: 70\r\n\
\r\n";

    #[test]
    fn parses_datagram_without_content_length() {
        let msg = parse_message(OPTIONS).unwrap();
        let req = msg.as_request().unwrap();
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.headers.cseq().unwrap().seq, 1);
        assert!(req.body.is_empty());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn skips_keepalive_crlf() {
        let mut data = b"\r\n\r\n".to_vec();
        data.extend_from_slice(OPTIONS);
        assert!(parse_message(&data).is_ok());
    }

    #[test]
    fn body_is_rest_of_datagram() {
        let mut data = OPTIONS.to_vec();
        data.extend_from_slice(b"hello body");
        let msg = parse_message(&data).unwrap();
        assert_eq!(&msg.body()[..], b"hello body");
    }

    #[test]
    fn folded_header_is_unfolded() {
        let data = b"OPTIONS sip:a@b.c SIP/2.0\r\n\
Subject: first part\r\n second part\r\n\
Call-ID: c1\r\n\r\n";
        let msg = parse_message(data).unwrap();
        let subject = msg
            .headers()
            .get(&crate::types::header::HeaderName::Subject)
            .unwrap();
        assert_eq!(subject.value_string(), "first part second part");
    }

    #[test]
    fn oversized_content_length_fails_early() {
        let data = format!(
            "OPTIONS sip:a@b.c SIP/2.0\r\nVia: SIP/2.0/UDP h.example.com;branch=z9hG4bKx\r\nFrom: <sip:x@y.z>\r\nTo: <sip:x@y.z>\r\nCall-ID: c1\r\nCSeq: 1 OPTIONS\r\nContent-Length: {}\r\n\r\n",
            MAX_MESSAGE_SIZE + 1
        );
        let err = parse_message(data.as_bytes()).unwrap_err();
        assert!(err.is_entity_too_large());
        match &err {
            Error::Parse { phase, partial, .. } => {
                assert_eq!(*phase, ParsePhase::Headers);
                let partial = partial.as_ref().unwrap();
                assert!(partial.headers().call_id().is_some());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn bad_header_reports_headers_phase() {
        let data = b"OPTIONS sip:a@b.c SIP/2.0\r\nCSeq: not-a-cseq\r\n\r\n";
        match parse_message(data).unwrap_err() {
            Error::Parse { phase, .. } => assert_eq!(phase, ParsePhase::Headers),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
