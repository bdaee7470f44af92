//! Error types for the RTSP client library.

use std::fmt;

/// Errors that can occur in the RTSP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Configuration**: [`BadInterface`](Self::BadInterface),
///   [`BadUrl`](Self::BadUrl) — fail client/presentation construction.
/// - **Transport**: [`Io`](Self::Io), [`ConnectFailed`](Self::ConnectFailed),
///   [`ConnectTimeout`](Self::ConnectTimeout), [`Network`](Self::Network),
///   [`ReadTimeout`](Self::ReadTimeout), [`WriteTimeout`](Self::WriteTimeout).
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Lifecycle**: [`Terminated`](Self::Terminated) — the presentation was
///   torn down while the request was still queued or in flight.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unrecognised interface mode in the client configuration.
    #[error("unsupported interface mode: {0}")]
    BadInterface(String),

    /// The presentation URL could not be parsed.
    #[error("invalid RTSP URL: {0}")]
    BadUrl(String),

    /// A recognised configuration option was given an unusable value.
    #[error("invalid value for option {name}: {value}")]
    BadOption { name: String, value: String },

    /// The connection attempt failed outright.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The non-blocking connect did not complete before its deadline.
    #[error("connect timed out")]
    ConnectTimeout,

    /// A blocking read saw no data before its deadline.
    #[error("read timed out")]
    ReadTimeout,

    /// A blocking write could not proceed before its deadline.
    #[error("write timed out")]
    WriteTimeout,

    /// A transport-level failure recorded on the socket (short write,
    /// peer close, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Failed to parse an incoming RTSP message (RFC 2326 §4).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The owning presentation was terminated before the request completed.
    #[error("presentation terminated")]
    Terminated,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Start line matched neither the status-line nor the request-line shape.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Content-Length was present but not a non-negative integer.
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
