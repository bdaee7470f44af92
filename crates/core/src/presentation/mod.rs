//! Per-endpoint RTSP protocol engine.
//!
//! A [`Presentation`] is the client endpoint for one RTSP resource: it owns
//! the transport connection and every request sent to that resource
//! (RFC 2326 §1.3). It keeps three queues:
//!
//! - **pending** — requests submitted but not yet written;
//! - **active** — requests written and awaiting their response, in send
//!   order (responses match this queue head-first);
//! - **pending responses** — replies to server-initiated requests, waiting
//!   for a writable socket.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialised -> Initializing -> Initialized
//!     Initialized -> SendingRequest -> ReceivingResponse -> Initialized
//!     Initialized -> ReceivingRequest -> SendingResponse -> Initialized
//! ```
//!
//! In event-driven mode the event loop drives everything through the
//! [`Connection`] entry points; submission only queues. In blocking mode
//! `send_request` performs the whole transaction synchronously on the same
//! wire layer.
//!
//! Request completion is a single tagged outcome: the callback receives
//! [`Outcome::Success`] with the response or [`Outcome::Failure`] with the
//! error, plus the presentation itself for follow-up requests. Callbacks
//! must use that reference rather than locking their own presentation
//! handle again.

mod parser;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::client::{ClientConfig, InterfaceMode};
use crate::error::{Result, RtspError};
use crate::event_loop::Connection;
use crate::protocol::{Request, Response};
use crate::reporter::Reporter;
use crate::transport::{Socket, TransportKind};
use parser::{IncomingMessage, IncomingParser, Step};

/// Default `Accept` header for DESCRIBE requests (RFC 2326 §10.2).
const DESCRIBE_ACCEPT: &str = "application/sdp, application/rtsl, application/mheg";

/// Tagged completion of one request.
#[derive(Debug)]
pub enum Outcome {
    Success(Response),
    Failure(RtspError),
}

impl Outcome {
    /// The response, if the request succeeded at the transport level.
    pub fn response(self) -> Option<Response> {
        match self {
            Outcome::Success(response) => Some(response),
            Outcome::Failure(_) => None,
        }
    }
}

/// Per-request completion sink.
pub type Completion = Box<dyn FnOnce(Outcome, &mut Presentation)>;

/// Callback invoked for every server-initiated request.
pub type ServerRequestHandler = Box<dyn FnMut(Request, &mut Presentation)>;

/// Callback invoked once the presentation's connection is established.
pub type ReadyHandler = Box<dyn FnOnce(&mut Presentation)>;

/// Callback invoked if the connection could not be established.
pub type FailureHandler = Box<dyn FnOnce(RtspError, &mut Presentation)>;

/// Protocol-engine state, driven by the event loop (or walked through
/// synchronously by the blocking facade).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationState {
    Uninitialised,
    Initializing,
    Initialized,
    SendingRequest,
    ReceivingResponse,
    ReceivingRequest,
    SendingResponse,
}

/// A request that has been submitted, with its dispatch bookkeeping.
struct InFlight {
    request: Request,
    /// Serialised bytes, captured at first dispatch so a retransmission
    /// sends exactly what went out the first time.
    wire: Vec<u8>,
    sent_at: Option<Instant>,
    /// Set as soon as the first bytes of this request's response start line
    /// have been parsed; suppresses retransmission.
    acknowledged: bool,
    completion: Option<Completion>,
}

impl InFlight {
    fn new(request: Request, completion: Option<Completion>) -> Self {
        InFlight {
            request,
            wire: Vec::new(),
            sent_at: None,
            acknowledged: false,
            completion,
        }
    }

    fn wire_bytes(&mut self) -> &[u8] {
        if self.wire.is_empty() {
            self.wire = self.request.serialize();
        }
        &self.wire
    }
}

/// Client endpoint for one RTSP resource.
pub struct Presentation {
    kind: TransportKind,
    host: String,
    port: u16,
    uri: String,
    socket: Socket,
    state: PresentationState,
    next_cseq: u32,
    pipelining: bool,
    buffer_size: usize,
    timeout: std::time::Duration,
    blocking: bool,
    pending: VecDeque<InFlight>,
    pending_responses: VecDeque<Response>,
    active: VecDeque<InFlight>,
    parser: IncomingParser,
    on_server_request: Option<ServerRequestHandler>,
    on_ready: Option<ReadyHandler>,
    on_failure: Option<FailureHandler>,
    reporter: Arc<Reporter>,
}

impl Presentation {
    pub(crate) fn new(
        kind: TransportKind,
        host: &str,
        port: u16,
        uri: &str,
        config: &ClientConfig,
        reporter: Arc<Reporter>,
    ) -> Self {
        Presentation {
            kind,
            host: host.to_string(),
            port,
            uri: uri.to_string(),
            socket: Socket::new(kind, host, port, reporter.clone()),
            state: PresentationState::Uninitialised,
            next_cseq: 1,
            pipelining: config.pipelining,
            buffer_size: config.buffer_size,
            timeout: config.timeout,
            blocking: config.interface == InterfaceMode::Blocking,
            pending: VecDeque::new(),
            pending_responses: VecDeque::new(),
            active: VecDeque::new(),
            parser: IncomingParser::default(),
            on_server_request: None,
            on_ready: None,
            on_failure: None,
            reporter,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> PresentationState {
        self.state
    }

    pub fn pipelining(&self) -> bool {
        self.pipelining
    }

    /// Toggle pipelining. When on, one writable event drains the whole
    /// pending queue in a single write; responses still match in order.
    pub fn set_pipelining(&mut self, pipelining: bool) {
        self.pipelining = pipelining;
    }

    /// CSeq the next outbound request will carry, unless it pre-set one.
    pub fn next_cseq(&self) -> u32 {
        self.next_cseq
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Install the handler for server-initiated requests. The handler may
    /// answer through [`send_response`](Self::send_response).
    pub fn set_server_request_handler(
        &mut self,
        handler: impl FnMut(Request, &mut Presentation) + 'static,
    ) {
        self.on_server_request = Some(Box::new(handler));
    }

    /// Install a callback invoked once the connection is established
    /// (event-driven mode).
    pub fn set_ready_handler(&mut self, handler: impl FnOnce(&mut Presentation) + 'static) {
        self.on_ready = Some(Box::new(handler));
    }

    /// Install a callback invoked if the connection cannot be established
    /// (event-driven mode).
    pub fn set_failure_handler(
        &mut self,
        handler: impl FnOnce(RtspError, &mut Presentation) + 'static,
    ) {
        self.on_failure = Some(Box::new(handler));
    }

    /// DESCRIBE the presentation (RFC 2326 §10.2). A default `Accept`
    /// header offering SDP is added if none is set.
    pub fn describe(
        &mut self,
        target: Option<&str>,
        completion: Option<Completion>,
    ) -> Result<Option<Response>> {
        let uri = self.resolve_target(target);
        self.send_request(Request::new("DESCRIBE", &uri), completion)
    }

    /// OPTIONS (RFC 2326 §10.1).
    pub fn options(
        &mut self,
        target: Option<&str>,
        completion: Option<Completion>,
    ) -> Result<Option<Response>> {
        let uri = self.resolve_target(target);
        self.send_request(Request::new("OPTIONS", &uri), completion)
    }

    /// ANNOUNCE a description to the server (RFC 2326 §10.3).
    pub fn announce(
        &mut self,
        target: Option<&str>,
        body: Option<Vec<u8>>,
        completion: Option<Completion>,
    ) -> Result<Option<Response>> {
        let uri = self.resolve_target(target);
        let mut request = Request::new("ANNOUNCE", &uri);
        request.body = body;
        self.send_request(request, completion)
    }

    /// GET_PARAMETER (RFC 2326 §10.8). With no body this doubles as a
    /// keepalive.
    pub fn get_parameter(
        &mut self,
        target: Option<&str>,
        body: Option<Vec<u8>>,
        completion: Option<Completion>,
    ) -> Result<Option<Response>> {
        let uri = self.resolve_target(target);
        let mut request = Request::new("GET_PARAMETER", &uri);
        request.body = body;
        self.send_request(request, completion)
    }

    /// SET_PARAMETER (RFC 2326 §10.9).
    pub fn set_parameter(
        &mut self,
        target: Option<&str>,
        body: Option<Vec<u8>>,
        completion: Option<Completion>,
    ) -> Result<Option<Response>> {
        let uri = self.resolve_target(target);
        let mut request = Request::new("SET_PARAMETER", &uri);
        request.body = body;
        self.send_request(request, completion)
    }

    /// Submit a request.
    ///
    /// Event-driven mode queues it and returns `Ok(None)`; completion
    /// arrives through the request's callback. Blocking mode performs the
    /// whole transaction and returns `Ok(Some(response))`.
    ///
    /// A missing CSeq header is filled from the presentation counter (which
    /// then advances); a pre-set CSeq is respected. An empty target URI is
    /// replaced with the presentation's own.
    pub fn send_request(
        &mut self,
        mut request: Request,
        completion: Option<Completion>,
    ) -> Result<Option<Response>> {
        if request.uri.is_empty() {
            request.uri = self.uri.clone();
        }
        if request.method == "DESCRIBE" && !request.headers.is_set("Accept") {
            request.headers.add("Accept", DESCRIBE_ACCEPT);
        }
        if !request.headers.is_set("CSeq") {
            request.headers.set("CSeq", &self.next_cseq.to_string());
            self.next_cseq += 1;
        }
        if let Some(body) = &request.body
            && !request.headers.is_set("Content-Length")
        {
            request.headers.set("Content-Length", &body.len().to_string());
        }
        tracing::debug!(
            method = %request.method,
            uri = %request.uri,
            cseq = ?request.cseq(),
            "request submitted"
        );

        if self.blocking {
            let response = self.transact_blocking(&request)?;
            if let Some(callback) = completion {
                callback(Outcome::Success(response.clone()), self);
            }
            Ok(Some(response))
        } else {
            self.pending.push_back(InFlight::new(request, completion));
            Ok(None)
        }
    }

    /// Reply to a server-initiated request.
    pub fn send_response(&mut self, response: Response) -> Result<()> {
        if self.blocking {
            let wire = response.serialize();
            self.socket.write_blocking(&wire, self.timeout)?;
            Ok(())
        } else {
            self.pending_responses.push_back(response);
            Ok(())
        }
    }

    /// Tear the presentation down: every queued and in-flight request fails
    /// with [`RtspError::Terminated`], the socket closes, and no further
    /// callbacks are invoked.
    pub fn terminate(&mut self) {
        tracing::info!(host = %self.host, port = self.port, "presentation terminated");
        self.parser.reset();
        self.fail_queued();
        self.socket.disconnect();
        self.state = PresentationState::Uninitialised;
    }

    fn resolve_target(&self, target: Option<&str>) -> String {
        match target {
            None | Some("") | Some("*") => self.uri.clone(),
            Some(target) => target.to_string(),
        }
    }

    // ---- blocking facade ----------------------------------------------

    fn ensure_connected_blocking(&mut self) -> Result<()> {
        if self.socket.is_connected() {
            return Ok(());
        }
        self.state = PresentationState::Initializing;
        tracing::info!(host = %self.host, port = self.port, kind = ?self.kind, "connecting");
        match self.socket.connect_blocking(self.timeout) {
            Ok(()) => {
                self.state = PresentationState::Initialized;
                Ok(())
            }
            Err(error) => {
                self.state = PresentationState::Uninitialised;
                Err(error)
            }
        }
    }

    /// Write the request and read until its response is fully assembled.
    ///
    /// On a datagram transport, if the response deadline passes with no
    /// bytes at all, the identical request bytes are sent once more before
    /// reading resumes.
    fn transact_blocking(&mut self, request: &Request) -> Result<Response> {
        self.ensure_connected_blocking()?;
        let wire = request.serialize();
        self.state = PresentationState::SendingRequest;
        if let Err(error) = self.socket.write_blocking(&wire, self.timeout) {
            self.state = PresentationState::Uninitialised;
            return Err(error);
        }
        self.state = PresentationState::ReceivingResponse;

        let mut retransmitted = false;
        loop {
            match self.parser.step(&mut self.socket, self.buffer_size) {
                Ok(Step::Idle) => {
                    if !self.socket.wait_readable(self.timeout)? {
                        if self.kind == TransportKind::Datagram && !retransmitted {
                            retransmitted = true;
                            tracing::debug!(
                                cseq = ?request.cseq(),
                                "no response within timeout, retransmitting"
                            );
                            self.socket.write_blocking(&wire, self.timeout)?;
                            continue;
                        }
                        self.socket.record_error("Read timed out");
                        self.state = PresentationState::Initialized;
                        return Err(RtspError::ReadTimeout);
                    }
                    if !self.socket.buffer_incoming()? {
                        let message = self
                            .socket
                            .last_error()
                            .unwrap_or_else(|| "connection closed".to_string());
                        self.state = PresentationState::Uninitialised;
                        return Err(RtspError::Network(message));
                    }
                }
                Ok(Step::Progress) | Ok(Step::Classified { .. }) => {}
                Ok(Step::Complete(IncomingMessage::Response(response))) => {
                    tracing::debug!(status = response.status, "response received");
                    self.state = PresentationState::Initialized;
                    return Ok(response);
                }
                Ok(Step::Complete(IncomingMessage::Request(server_request))) => {
                    self.state = PresentationState::ReceivingRequest;
                    self.deliver_server_request(server_request);
                    self.state = PresentationState::ReceivingResponse;
                }
                Err(error) => {
                    self.reporter.error(&error.to_string());
                    self.parser.reset();
                    self.state = PresentationState::Initialized;
                    return Err(error);
                }
            }
        }
    }

    // ---- event-driven internals ---------------------------------------

    fn handle_readable(&mut self) {
        let open = match self.socket.buffer_incoming() {
            Ok(open) => open,
            Err(_) => {
                self.connection_lost();
                return;
            }
        };
        self.pump();
        if !open {
            self.connection_lost();
        }
    }

    fn pump(&mut self) {
        loop {
            match self.parser.step(&mut self.socket, self.buffer_size) {
                Ok(Step::Idle) => break,
                Ok(Step::Progress) => {}
                Ok(Step::Classified { is_response }) => {
                    if is_response {
                        self.state = PresentationState::ReceivingResponse;
                        if let Some(head) = self.active.front_mut() {
                            head.acknowledged = true;
                        }
                    } else {
                        self.state = PresentationState::ReceivingRequest;
                    }
                }
                Ok(Step::Complete(message)) => self.finalize(message),
                Err(error) => {
                    self.parse_failure(error);
                    break;
                }
            }
        }
    }

    fn finalize(&mut self, message: IncomingMessage) {
        match message {
            IncomingMessage::Response(response) => {
                tracing::debug!(
                    status = response.status,
                    cseq = ?response.cseq(),
                    "response received"
                );
                match self.active.pop_front() {
                    Some(inflight) => {
                        if let (Some(sent), Some(echoed)) =
                            (inflight.request.cseq(), response.cseq())
                            && sent != echoed
                        {
                            tracing::warn!(
                                sent,
                                echoed,
                                "response CSeq does not match the oldest request in flight"
                            );
                        }
                        self.complete(inflight, Outcome::Success(response));
                    }
                    None => self
                        .reporter
                        .warning("response arrived with no request in flight"),
                }
                if self.active.is_empty() {
                    self.state = PresentationState::Initialized;
                }
            }
            IncomingMessage::Request(request) => {
                self.deliver_server_request(request);
                self.state = if self.active.is_empty() {
                    PresentationState::Initialized
                } else {
                    PresentationState::ReceivingResponse
                };
            }
        }
    }

    fn deliver_server_request(&mut self, request: Request) {
        tracing::debug!(
            method = %request.method,
            cseq = ?request.cseq(),
            "server request received"
        );
        // Keep client CSeqs ahead of the server's numbering on this
        // connection.
        self.next_cseq += 1;
        if let Some(mut handler) = self.on_server_request.take() {
            handler(request, self);
            if self.on_server_request.is_none() {
                self.on_server_request = Some(handler);
            }
        } else {
            self.reporter
                .warning(&format!("unhandled server request: {}", request.method));
        }
    }

    fn parse_failure(&mut self, error: RtspError) {
        self.reporter.error(&error.to_string());
        let receiving_request = self.parser.receiving_request();
        self.parser.reset();
        if !receiving_request
            && let Some(inflight) = self.active.pop_front()
        {
            self.complete(inflight, Outcome::Failure(error));
        }
        self.state = if self.active.is_empty() {
            PresentationState::Initialized
        } else {
            PresentationState::ReceivingResponse
        };
    }

    fn connection_lost(&mut self) {
        let message = self
            .socket
            .last_error()
            .unwrap_or_else(|| "network error".to_string());
        tracing::info!(host = %self.host, port = self.port, error = %message, "connection lost");
        self.parser.reset();
        if let Some(inflight) = self.active.pop_front() {
            self.complete(inflight, Outcome::Failure(RtspError::Network(message)));
        }
        self.fail_queued();
        self.socket.disconnect();
        self.state = PresentationState::Uninitialised;
    }

    fn fail_queued(&mut self) {
        while let Some(inflight) = self.active.pop_front() {
            self.complete(inflight, Outcome::Failure(RtspError::Terminated));
        }
        while let Some(inflight) = self.pending.pop_front() {
            self.complete(inflight, Outcome::Failure(RtspError::Terminated));
        }
        self.pending_responses.clear();
    }

    fn complete(&mut self, inflight: InFlight, outcome: Outcome) {
        if let Some(callback) = inflight.completion {
            callback(outcome, self);
        }
    }

    /// One writer pass: a pending response first, then datagram
    /// retransmissions, then pending requests (all of them under
    /// pipelining, one otherwise).
    fn dispatch(&mut self) {
        if let Some(response) = self.pending_responses.pop_front() {
            self.state = PresentationState::SendingResponse;
            let wire = response.serialize();
            match self.socket.write_nonblocking(&wire) {
                Ok(Some(_)) => {
                    tracing::debug!(status = response.status, "response sent");
                    self.state = PresentationState::Initialized;
                }
                Ok(None) => {
                    self.pending_responses.push_front(response);
                    return;
                }
                Err(_) => {
                    self.connection_lost();
                    return;
                }
            }
        }

        if self.kind == TransportKind::Datagram && self.retransmit_expired().is_err() {
            self.connection_lost();
            return;
        }

        if self.pipelining {
            self.dispatch_pipelined();
        } else {
            self.dispatch_single();
        }
    }

    fn dispatch_pipelined(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.state = PresentationState::SendingRequest;
        let mut burst: Vec<u8> = Vec::new();
        let mut dispatched: Vec<InFlight> = Vec::new();
        while let Some(mut inflight) = self.pending.pop_front() {
            burst.extend_from_slice(inflight.wire_bytes());
            dispatched.push(inflight);
        }
        match self.socket.write_nonblocking(&burst) {
            Ok(Some(_)) => {
                let now = Instant::now();
                for mut inflight in dispatched {
                    inflight.sent_at = Some(now);
                    tracing::debug!(
                        method = %inflight.request.method,
                        cseq = ?inflight.request.cseq(),
                        "request dispatched"
                    );
                    self.active.push_back(inflight);
                }
                self.state = PresentationState::ReceivingResponse;
            }
            Ok(None) => {
                for inflight in dispatched.into_iter().rev() {
                    self.pending.push_front(inflight);
                }
                self.restore_idle_state();
            }
            Err(_) => {
                for inflight in dispatched {
                    self.active.push_back(inflight);
                }
                self.connection_lost();
            }
        }
    }

    fn dispatch_single(&mut self) {
        // Without pipelining the next request waits for the previous
        // response.
        if !self.active.is_empty() || self.pending.is_empty() {
            return;
        }
        let Some(mut inflight) = self.pending.pop_front() else {
            return;
        };
        self.state = PresentationState::SendingRequest;
        match self.socket.write_nonblocking(inflight.wire_bytes()) {
            Ok(Some(_)) => {
                inflight.sent_at = Some(Instant::now());
                tracing::debug!(
                    method = %inflight.request.method,
                    cseq = ?inflight.request.cseq(),
                    "request dispatched"
                );
                self.active.push_back(inflight);
                self.state = PresentationState::ReceivingResponse;
            }
            Ok(None) => {
                self.pending.push_front(inflight);
                self.restore_idle_state();
            }
            Err(_) => {
                self.active.push_back(inflight);
                self.connection_lost();
            }
        }
    }

    /// Re-send every unacknowledged active request older than the timeout.
    fn retransmit_expired(&mut self) -> Result<()> {
        let now = Instant::now();
        for i in 0..self.active.len() {
            let due = {
                let inflight = &self.active[i];
                !inflight.acknowledged
                    && inflight
                        .sent_at
                        .is_some_and(|sent| now.duration_since(sent) > self.timeout)
            };
            if !due {
                continue;
            }
            let wire = self.active[i].wire.clone();
            tracing::debug!(
                cseq = ?self.active[i].request.cseq(),
                "retransmitting unacknowledged request"
            );
            match self.socket.write_nonblocking(&wire) {
                Ok(Some(_)) => self.active[i].sent_at = Some(now),
                Ok(None) => break,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn restore_idle_state(&mut self) {
        self.state = if self.active.is_empty() {
            PresentationState::Initialized
        } else {
            PresentationState::ReceivingResponse
        };
    }

    fn has_outbound_work(&self) -> bool {
        if !self.pending_responses.is_empty() {
            return true;
        }
        if !self.pending.is_empty() && (self.pipelining || self.active.is_empty()) {
            return true;
        }
        if self.kind == TransportKind::Datagram {
            let now = Instant::now();
            return self.active.iter().any(|inflight| {
                !inflight.acknowledged
                    && inflight
                        .sent_at
                        .is_some_and(|sent| now.duration_since(sent) > self.timeout)
            });
        }
        false
    }
}

impl Connection for Presentation {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    fn open(&mut self) -> Result<()> {
        self.state = PresentationState::Initializing;
        tracing::info!(host = %self.host, port = self.port, kind = ?self.kind, "connecting");
        self.socket.connect_start(self.timeout)
    }

    fn on_connected(&mut self) {
        tracing::info!(host = %self.host, port = self.port, "connected");
        self.state = PresentationState::Initialized;
        if let Some(handler) = self.on_ready.take() {
            handler(self);
        }
    }

    fn on_connect_failed(&mut self, error: RtspError) {
        tracing::warn!(host = %self.host, port = self.port, error = %error, "connect failed");
        let message = error.to_string();
        self.state = PresentationState::Uninitialised;
        if let Some(handler) = self.on_failure.take() {
            handler(error, self);
        }
        while let Some(inflight) = self.pending.pop_front() {
            self.complete(
                inflight,
                Outcome::Failure(RtspError::ConnectFailed(message.clone())),
            );
        }
        self.pending_responses.clear();
        self.socket.disconnect();
    }

    fn on_readable(&mut self) {
        self.handle_readable();
    }

    fn on_writable(&mut self) {
        self.dispatch();
    }

    fn wants_write(&self) -> bool {
        self.has_outbound_work()
    }
}

#[cfg(test)]
pub(crate) fn test_udp_presentation(
    pipelining: bool,
) -> (Presentation, std::net::UdpSocket) {
    use std::time::Duration;

    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let config = ClientConfig {
        pipelining,
        timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    };
    let mut presentation = Presentation::new(
        TransportKind::Datagram,
        "127.0.0.1",
        peer.local_addr().unwrap().port(),
        "rtspu://127.0.0.1/test",
        &config,
        Arc::new(Reporter::default()),
    );
    presentation
        .socket
        .connect_start(Duration::from_secs(1))
        .unwrap();
    presentation.state = PresentationState::Initialized;
    peer.connect(presentation.socket.local_addr().unwrap()).unwrap();
    (presentation, peer)
}
