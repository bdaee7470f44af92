//! # rtspc — client-side RTSP engine
//!
//! A Rust library for driving many concurrent RTSP (Real Time Streaming
//! Protocol) presentations from one single-threaded, readiness-driven event
//! loop, over TCP (`rtsp://`) or UDP (`rtspu://`).
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Message grammar, method set, CSeq discipline, session lifecycle |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Client         — config, URLs, error sinks  │
//! ├──────────────────────────────────────────────┤
//! │  Presentation   — queues, parser, pipelining │
//! │  Session        — SETUP gating, state machine│
//! ├──────────────────────────────────────────────┤
//! │  EventLoop      — readiness poll, timers     │
//! │  Socket         — TCP/UDP, pushback buffer   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtspc::{Client, ClientConfig, InterfaceMode};
//!
//! let config = ClientConfig {
//!     interface: InterfaceMode::Blocking,
//!     ..ClientConfig::default()
//! };
//! let mut client = Client::new(config).unwrap();
//! let presentation = client.presentation("rtsp://example.com/stream").unwrap();
//! let response = presentation.lock().describe(None, None).unwrap().unwrap();
//! println!("{}", response.text().unwrap_or_default());
//! ```
//!
//! In event-driven mode, submissions return immediately and completions
//! fire from [`Client::run`] / [`Client::run_cycle`] as responses arrive;
//! one client interleaves any number of presentations without blocking any
//! of them.
//!
//! ## Crate layout
//!
//! - [`client`] — [`Client`] facade, [`ClientConfig`], URL handling.
//! - [`event_loop`] — [`EventLoop`], the [`Connection`] trait, scheduled
//!   callbacks.
//! - [`presentation`] — [`Presentation`] protocol engine and the incoming
//!   message parser.
//! - [`session`] — [`Session`] state machine and request buffering.
//! - [`protocol`] — [`Request`], [`Response`], [`HeaderStore`], start-line
//!   classification.
//! - [`transport`] — [`Socket`], the unified TCP/UDP endpoint.
//! - [`reporter`] — [`Reporter`], the configurable error/warning sinks.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod client;
pub mod error;
pub mod event_loop;
pub mod presentation;
pub mod protocol;
pub mod reporter;
pub mod session;
pub mod transport;

pub use client::{Client, ClientConfig, InterfaceMode, DEFAULT_PORT};
pub use error::{Result, RtspError};
pub use event_loop::{AfterId, Connection, EventLoop};
pub use presentation::{
    Completion, FailureHandler, Outcome, Presentation, PresentationState, ReadyHandler,
    ServerRequestHandler,
};
pub use protocol::{HeaderStore, Request, Response};
pub use reporter::Reporter;
pub use session::{Session, SessionState};
pub use transport::{Socket, SocketState, TransportKind};
