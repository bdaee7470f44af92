//! RTSP message model (RFC 2326).
//!
//! This module covers the text-based RTSP wire format — header storage,
//! request/response types, serialisation, and start-line classification.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - The server may send requests of its own (e.g. ANNOUNCE) on the same
//!   connection, so incoming start lines must be classified before parsing.
//! - The `Session` header carries a server-assigned ID (RFC 2326 §12.37).
//!
//! Line endings are exact CRLF; `Content-Length` counts bytes, not
//! characters.

pub mod headers;
pub mod request;
pub mod response;

pub use headers::HeaderStore;
pub use request::Request;
pub use response::Response;

use crate::error::{ParseErrorKind, Result, RtspError};

/// A classified RTSP start line (RFC 2326 §6.1, §7.1).
///
/// The first line of an incoming message decides everything that follows:
/// a status line means this is the response to the oldest in-flight request,
/// a request line means the server is initiating an exchange of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// Server-initiated request: `METHOD SP URI SP RTSP/x.y`.
    Request {
        method: String,
        uri: String,
        version: String,
    },
    /// Response status line: `RTSP/x.y SP CODE SP REASON`.
    Response {
        version: String,
        status: u16,
        reason: String,
    },
}

impl StartLine {
    /// Classify one start line, split on spaces with a limit of three
    /// tokens.
    ///
    /// If the first token is an `RTSP/x.y` version, the line is a status
    /// line. If the *third* token is, it is a request line. Anything else is
    /// malformed.
    pub fn classify(line: &str) -> Result<Self> {
        let mut tokens = line.splitn(3, ' ');
        let first = tokens.next().unwrap_or("");
        let second = tokens.next().unwrap_or("");
        let third = tokens.next().unwrap_or("");

        if let Some(version) = version_of(first) {
            let status: u16 = second.parse().map_err(|_| RtspError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            })?;
            return Ok(StartLine::Response {
                version,
                status,
                reason: third.to_string(),
            });
        }

        if let Some(version) = version_of(third) {
            if first.is_empty() || second.is_empty() {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::InvalidStartLine,
                });
            }
            return Ok(StartLine::Request {
                method: first.to_string(),
                uri: second.to_string(),
                version,
            });
        }

        Err(RtspError::Parse {
            kind: ParseErrorKind::InvalidStartLine,
        })
    }
}

/// Extract `x.y` from an `RTSP/x.y` token, or `None` if the token is not a
/// well-formed RTSP version.
fn version_of(token: &str) -> Option<String> {
    let rest = token.strip_prefix("RTSP/")?;
    let (major, minor) = rest.split_once('.')?;
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if is_digits(major) && is_digits(minor) {
        Some(rest.to_string())
    } else {
        None
    }
}
