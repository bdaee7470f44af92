//! Incremental RTSP message assembly.
//!
//! Incoming bytes arrive in whatever chunks the transport produces, so the
//! parser keeps explicit per-connection state: which part of the message it
//! is in, the partial buffers for that part, and the message under
//! construction. Reads are bounded per phase; anything pulled past a
//! boundary is handed back to the socket's pushback buffer for the next
//! phase.

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{HeaderStore, Request, Response, StartLine};
use crate::transport::Socket;

/// Bytes pulled per read while hunting for the start-line CRLF.
const START_LINE_READ: usize = 128;
/// Bytes pulled per read while accumulating the header block.
const HEADER_READ: usize = 1024;

/// A fully assembled incoming message.
#[derive(Debug)]
pub(crate) enum IncomingMessage {
    /// Server-initiated request.
    Request(Request),
    /// Response to the oldest in-flight request.
    Response(Response),
}

/// Result of one parser step.
pub(crate) enum Step {
    /// Nothing available to read; come back on the next readable event.
    Idle,
    /// Consumed bytes but the message is not complete yet.
    Progress,
    /// The start line was parsed and the message kind is known.
    Classified { is_response: bool },
    /// A full message was assembled; parse state is reset.
    Complete(IncomingMessage),
}

enum Phase {
    StartLine,
    Headers {
        message: IncomingMessage,
    },
    Body {
        message: IncomingMessage,
        content_length: usize,
    },
}

/// Per-connection incoming-message state machine.
pub(crate) struct IncomingParser {
    phase: Phase,
    line: Vec<u8>,
    block: Vec<u8>,
    body: Vec<u8>,
}

impl Default for IncomingParser {
    fn default() -> Self {
        IncomingParser {
            phase: Phase::StartLine,
            line: Vec::new(),
            block: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl IncomingParser {
    /// Advance the state machine by at most one bounded read.
    pub(crate) fn step(&mut self, socket: &mut Socket, buffer_size: usize) -> Result<Step> {
        match std::mem::replace(&mut self.phase, Phase::StartLine) {
            Phase::StartLine => self.step_start_line(socket),
            Phase::Headers { message } => self.step_headers(socket, message),
            Phase::Body {
                message,
                content_length,
            } => self.step_body(socket, message, content_length, buffer_size),
        }
    }

    /// Drop any partial state and return to awaiting a start line.
    pub(crate) fn reset(&mut self) {
        self.phase = Phase::StartLine;
        self.line.clear();
        self.block.clear();
        self.body.clear();
    }

    /// Whether the message under construction is a server-initiated request.
    pub(crate) fn receiving_request(&self) -> bool {
        matches!(
            &self.phase,
            Phase::Headers {
                message: IncomingMessage::Request(_)
            } | Phase::Body {
                message: IncomingMessage::Request(_),
                ..
            }
        )
    }

    fn step_start_line(&mut self, socket: &mut Socket) -> Result<Step> {
        let mut buf = [0u8; START_LINE_READ];
        let n = match socket.read_nonblocking(&mut buf)? {
            Some(n) => n,
            None => return Ok(Step::Idle),
        };
        self.line.extend_from_slice(&buf[..n]);

        let Some(pos) = find_crlf(&self.line) else {
            return Ok(Step::Progress);
        };
        // Everything past the CRLF belongs to the header block.
        let excess = self.line.split_off(pos + 2);
        if !excess.is_empty() {
            socket.unread(&excess);
        }
        self.line.truncate(pos);
        let text = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();

        match StartLine::classify(&text) {
            Ok(StartLine::Response {
                version,
                status,
                reason,
            }) => {
                let response = Response {
                    version,
                    status,
                    reason,
                    headers: HeaderStore::new(),
                    content: None,
                };
                self.phase = Phase::Headers {
                    message: IncomingMessage::Response(response),
                };
                Ok(Step::Classified { is_response: true })
            }
            Ok(StartLine::Request {
                method,
                uri,
                version,
            }) => {
                let mut request = Request::new(&method, &uri);
                request.version = version;
                self.phase = Phase::Headers {
                    message: IncomingMessage::Request(request),
                };
                Ok(Step::Classified { is_response: false })
            }
            Err(error) => {
                tracing::warn!(line = %text, "malformed start line");
                Err(error)
            }
        }
    }

    fn step_headers(&mut self, socket: &mut Socket, message: IncomingMessage) -> Result<Step> {
        let mut buf = [0u8; HEADER_READ];
        let n = match socket.read_nonblocking(&mut buf)? {
            Some(n) => n,
            None => {
                self.phase = Phase::Headers { message };
                return Ok(Step::Idle);
            }
        };
        self.block.extend_from_slice(&buf[..n]);

        let Some(end) = block_end(&self.block) else {
            self.phase = Phase::Headers { message };
            return Ok(Step::Progress);
        };
        let excess = self.block.split_off(end);
        if !excess.is_empty() {
            socket.unread(&excess);
        }
        let text = String::from_utf8_lossy(&self.block).into_owned();
        self.block.clear();

        let headers = parse_header_block(&text)?;
        let content_length = match headers.get("Content-Length") {
            None => 0,
            Some(value) => value.trim().parse().map_err(|_| RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength,
            })?,
        };

        let message = match message {
            IncomingMessage::Request(mut request) => {
                request.headers = headers;
                IncomingMessage::Request(request)
            }
            IncomingMessage::Response(mut response) => {
                response.headers = headers;
                IncomingMessage::Response(response)
            }
        };
        self.body.clear();
        self.phase = Phase::Body {
            message,
            content_length,
        };
        Ok(Step::Progress)
    }

    fn step_body(
        &mut self,
        socket: &mut Socket,
        message: IncomingMessage,
        content_length: usize,
        buffer_size: usize,
    ) -> Result<Step> {
        let remaining = content_length - self.body.len();
        if remaining == 0 {
            return Ok(Step::Complete(self.complete(message)));
        }

        let want = remaining.min(buffer_size.max(1));
        let mut buf = vec![0u8; want];
        let n = match socket.read_nonblocking(&mut buf)? {
            Some(n) => n,
            None => {
                self.phase = Phase::Body {
                    message,
                    content_length,
                };
                return Ok(Step::Idle);
            }
        };
        self.body.extend_from_slice(&buf[..n]);

        if self.body.len() >= content_length {
            Ok(Step::Complete(self.complete(message)))
        } else {
            self.phase = Phase::Body {
                message,
                content_length,
            };
            Ok(Step::Progress)
        }
    }

    fn complete(&mut self, message: IncomingMessage) -> IncomingMessage {
        let body = std::mem::take(&mut self.body);
        match message {
            IncomingMessage::Request(mut request) => {
                if !body.is_empty() {
                    request.body = Some(body);
                }
                IncomingMessage::Request(request)
            }
            IncomingMessage::Response(mut response) => {
                if !body.is_empty() {
                    response.content = Some(body);
                }
                IncomingMessage::Response(response)
            }
        }
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\r\n")
}

/// End of the header block: either an immediately empty block (`\r\n` right
/// after the start line) or the first `\r\n\r\n`. Returns the offset one
/// past the terminator.
fn block_end(block: &[u8]) -> Option<usize> {
    if block.starts_with(b"\r\n") {
        return Some(2);
    }
    block.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse a complete header block, unfolding continuation lines
/// (RFC 2326 §4.2: a line starting with SP or HT extends the previous
/// header's value).
fn parse_header_block(block: &str) -> Result<HeaderStore> {
    let mut logical: Vec<String> = Vec::new();
    for line in block.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match logical.last_mut() {
                Some(previous) => {
                    previous.push_str(line);
                    continue;
                }
                None => {
                    return Err(RtspError::Parse {
                        kind: ParseErrorKind::InvalidHeader,
                    });
                }
            }
        }
        logical.push(line.to_string());
    }

    let mut headers = HeaderStore::new();
    for line in &logical {
        let Some(colon) = line.find(':') else {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            });
        };
        let name = line[..colon].trim();
        let rest = &line[colon + 1..];
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        if value.is_empty() {
            headers.add_unvalued(name);
        } else {
            headers.add(name, value);
        }
    }
    Ok(headers)
}
