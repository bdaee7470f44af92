//! Network transport layer for RTSP signaling.
//!
//! RTSP reaches the server over either transport (RFC 2326 §10.12):
//!
//! - **Stream** (`rtsp://`): one TCP connection per presentation, carrying
//!   requests and responses as a byte stream.
//! - **Datagram** (`rtspu://`): a connected UDP socket, one message per
//!   datagram, with retransmission handled by the presentation layer.
//!
//! Both are wrapped by [`Socket`], which keeps the endpoints non-blocking at
//! the OS level and layers blocking behaviour on top as readiness waits with
//! deadlines. That keeps a single code path for the event loop and the
//! blocking facade.

pub mod socket;

pub use socket::{Socket, SocketState, TransportKind};
