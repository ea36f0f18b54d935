//! Incremental parser for stream-oriented transports.
//!
//! A [`StreamParser`] is fed raw bytes as they arrive and yields complete
//! messages as soon as they can be framed. `Content-Length` is mandatory
//! here: without it the body cannot be delimited, so its absence is a
//! grammar error rather than read-to-end as in packet mode.
//!
//! Recovery: a grammar error in the start line or header block resets the
//! parser to the start-line phase, so subsequent well-formed messages on
//! the same connection remain readable. A size-cap violation is not
//! recoverable since framing can no longer be trusted; callers should drop
//! the connection when [`Error::is_message_too_large`] holds.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, ParsePhase, Result};
use crate::parser::{MessageBuilder, MAX_MESSAGE_SIZE};
use crate::types::message::Message;

enum Phase {
    StartLine,
    Headers {
        builder: MessageBuilder,
        lines: Vec<String>,
        // bytes consumed into `lines`, counted against the size cap
        consumed: usize,
    },
    Body {
        builder: MessageBuilder,
        needed: usize,
    },
}

/// A resumable three-phase message parser over a byte stream.
pub struct StreamParser {
    buf: BytesMut,
    max_size: usize,
    phase: Phase,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// A parser with the default size cap.
    pub fn new() -> Self {
        Self::with_max_size(MAX_MESSAGE_SIZE)
    }

    /// A parser with a custom size cap.
    pub fn with_max_size(max_size: usize) -> Self {
        StreamParser {
            buf: BytesMut::new(),
            max_size,
            phase: Phase::StartLine,
        }
    }

    /// Appends bytes read from the connection.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Tries to produce the next complete message.
    ///
    /// `Ok(None)` means more bytes are needed. Errors are per-message: the
    /// parser has already reset itself and can be polled again, except for
    /// size-cap errors which poison the stream.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::StartLine) {
                Phase::StartLine => {
                    // CRLF keep-alives between messages are skipped silently.
                    loop {
                        if self.buf.starts_with(b"\r\n") {
                            let _ = self.buf.split_to(2);
                        } else if self.buf.starts_with(b"\n") {
                            let _ = self.buf.split_to(1);
                        } else {
                            break;
                        }
                    }
                    let line = match self.take_line()? {
                        Some(line) => line,
                        None => return Ok(None),
                    };
                    match MessageBuilder::from_start_line(&line) {
                        Ok(builder) => {
                            self.phase = Phase::Headers {
                                builder,
                                lines: Vec::new(),
                                consumed: line.len(),
                            };
                        }
                        Err(e) => {
                            // Offending line is consumed; next poll starts clean.
                            return Err(Error::parse(ParsePhase::StartLine, e, None));
                        }
                    }
                }
                Phase::Headers {
                    mut builder,
                    mut lines,
                    mut consumed,
                } => {
                    let line = match self.take_line() {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            if consumed + self.buf.len() > self.max_size {
                                return Err(Error::MessageTooLarge(consumed + self.buf.len()));
                            }
                            self.phase = Phase::Headers {
                                builder,
                                lines,
                                consumed,
                            };
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };

                    if !line.is_empty() {
                        consumed += line.len() + 2;
                        if consumed > self.max_size {
                            return Err(Error::MessageTooLarge(consumed));
                        }
                        lines.push(line);
                        self.phase = Phase::Headers {
                            builder,
                            lines,
                            consumed,
                        };
                        continue;
                    }

                    // Blank line: the header block is complete.
                    if let Err(e) = builder.add_header_lines(&lines) {
                        let partial = builder.partial();
                        return Err(Error::parse(ParsePhase::Headers, e, Some(partial)));
                    }
                    match builder.content_length() {
                        None => {
                            let partial = builder.partial();
                            return Err(Error::parse(
                                ParsePhase::Headers,
                                Error::MissingHeader("Content-Length".to_string()),
                                Some(partial),
                            ));
                        }
                        Some(declared) if declared > self.max_size => {
                            let partial = builder.partial();
                            return Err(Error::parse(
                                ParsePhase::Headers,
                                Error::EntityTooLarge(declared),
                                Some(partial),
                            ));
                        }
                        Some(declared) => {
                            self.phase = Phase::Body {
                                builder,
                                needed: declared,
                            };
                        }
                    }
                }
                Phase::Body { builder, needed } => {
                    if self.buf.len() < needed {
                        self.phase = Phase::Body { builder, needed };
                        return Ok(None);
                    }
                    let body: Bytes = self.buf.split_to(needed).freeze();
                    return Ok(Some(builder.finish(body)));
                }
            }
        }
    }

    // Takes one line out of the buffer, accepting CRLF or bare LF endings.
    fn take_line(&mut self) -> Result<Option<String>> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let raw = self.buf.split_to(idx + 1);
                let mut line = &raw[..idx];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                Ok(Some(std::str::from_utf8(line)?.to_string()))
            }
            None if self.buf.len() > self.max_size => Err(Error::MessageTooLarge(self.buf.len())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER: &str = "REGISTER sip:registrar.biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/TCP bobspc.biloxi.com:5060;branch=z9hG4bKnashds7\r\n\
From: <sip:bob@biloxi.com>;tag=456248\r\n\
To: <sip:bob@biloxi.com>\r\n\
Call-ID: 843817637684230@998sdasdh09\r\n\
CSeq: 1826 REGISTER\r\n\
Max-Forwards: 70\r\n\
Content-Length: 4\r\n\
\r\n\
body";

    #[test]
    fn reassembles_across_partial_reads() {
        let mut parser = StreamParser::new();
        let bytes = REGISTER.as_bytes();
        let split = bytes.len() / 2;
        parser.feed(&bytes[..split]);
        assert!(parser.next_message().unwrap().is_none());
        parser.feed(&bytes[split..]);
        let msg = parser.next_message().unwrap().unwrap();
        assert_eq!(&msg.body()[..], b"body");
        assert!(parser.next_message().unwrap().is_none());
    }

    #[test]
    fn parses_back_to_back_messages_and_keepalives() {
        let mut parser = StreamParser::new();
        let mut data = REGISTER.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n\r\n");
        data.extend_from_slice(REGISTER.as_bytes());
        parser.feed(&data);
        assert!(parser.next_message().unwrap().is_some());
        assert!(parser.next_message().unwrap().is_some());
        assert!(parser.next_message().unwrap().is_none());
    }

    #[test]
    fn missing_content_length_is_a_header_error() {
        let mut parser = StreamParser::new();
        parser.feed(
            b"OPTIONS sip:a@b.c SIP/2.0\r\nCall-ID: c1\r\nCSeq: 1 OPTIONS\r\n\r\n",
        );
        let err = parser.next_message().unwrap_err();
        assert!(matches!(err.root_cause(), Error::MissingHeader(_)));
        // The parser recovered: a following valid message still parses.
        parser.feed(REGISTER.as_bytes());
        assert!(parser.next_message().unwrap().is_some());
    }

    #[test]
    fn grammar_error_resets_to_start_line() {
        let mut parser = StreamParser::new();
        parser.feed(b"OPTIONS sip:a@b.c SIP/2.0\r\nCSeq: broken\r\n\r\n");
        let err = parser.next_message().unwrap_err();
        match &err {
            Error::Parse { phase, partial, .. } => {
                assert_eq!(*phase, ParsePhase::Headers);
                assert!(partial.is_some());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        parser.feed(REGISTER.as_bytes());
        assert!(parser.next_message().unwrap().is_some());
    }

    #[test]
    fn oversized_declared_body_fails_without_buffering() {
        let mut parser = StreamParser::new();
        parser.feed(
            format!(
                "OPTIONS sip:a@b.c SIP/2.0\r\nCall-ID: c1\r\nContent-Length: {}\r\n\r\n",
                MAX_MESSAGE_SIZE + 1
            )
            .as_bytes(),
        );
        assert!(parser.next_message().unwrap_err().is_entity_too_large());
    }

    #[test]
    fn unframed_flood_poisons_the_stream() {
        let mut parser = StreamParser::with_max_size(128);
        parser.feed(&[b'x'; 200]);
        assert!(parser.next_message().unwrap_err().is_message_too_large());
    }
}
