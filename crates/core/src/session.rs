//! RTSP session lifecycle (RFC 2326 §3, §12.37), client side.
//!
//! A session is created by SETUP and identified by the `Session` header the
//! server returns. Until that response arrives the session is `Inactive`
//! and every request submitted through it is buffered — nothing touches the
//! wire. Once the id is known the buffer drains in submission order, each
//! request annotated with the `Session` header, and later requests pass
//! straight through.
//!
//! ## Lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! SETUP response   -> Ready
//! PLAY success     -> Playing
//! PAUSE success    -> Paused
//! RECORD success   -> Recording
//! TEARDOWN success -> Inactive (id cleared)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::presentation::{Completion, Outcome, Presentation};
use crate::protocol::{Request, Response};

/// Session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// SETUP sent (or not yet sent); no server id. Requests buffer here.
    Inactive,
    /// Server assigned an id; requests pass through.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; PLAY resumes.
    Paused,
    /// Client-to-server media recording in progress.
    Recording,
}

struct SessionInner {
    state: SessionState,
    id: Option<String>,
    uri: String,
    queue: VecDeque<(Request, Option<Completion>)>,
}

/// A server-identified session within a presentation.
///
/// Holds a non-owning handle to its presentation; terminating the
/// presentation does not consult the session.
pub struct Session {
    presentation: Arc<Mutex<Presentation>>,
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    /// Issue SETUP for `uri` on the presentation and return the session,
    /// initially `Inactive`.
    ///
    /// When the SETUP response arrives, the server's `Session` id is
    /// recorded (the value before any `;timeout=` parameter), the session
    /// becomes `Ready`, and buffered requests drain in submission order.
    /// `completion` (if given) runs after that internal handling, with the
    /// same outcome.
    pub fn setup(
        presentation: &Arc<Mutex<Presentation>>,
        uri: &str,
        headers: &[(&str, &str)],
        completion: Option<Completion>,
    ) -> Result<Session> {
        let inner = Arc::new(Mutex::new(SessionInner {
            state: SessionState::Inactive,
            id: None,
            uri: uri.to_string(),
            queue: VecDeque::new(),
        }));
        let session = Session {
            presentation: presentation.clone(),
            inner: inner.clone(),
        };

        let mut request = Request::new("SETUP", uri);
        for (name, value) in headers {
            request.headers.add(name, value);
        }

        let hook = inner.clone();
        let internal: Completion = Box::new(move |outcome, presentation| match outcome {
            Outcome::Success(response) => {
                Session::on_setup_response(&hook, &response, presentation);
                if let Some(user) = completion {
                    user(Outcome::Success(response), presentation);
                }
            }
            Outcome::Failure(error) => {
                tracing::warn!(error = %error, "session setup failed");
                if let Some(user) = completion {
                    user(Outcome::Failure(error), presentation);
                }
            }
        });
        presentation.lock().send_request(request, Some(internal))?;
        Ok(session)
    }

    /// PLAY (RFC 2326 §10.5): start media delivery.
    pub fn play(&self) -> Result<()> {
        self.transition("PLAY", SessionState::Playing)
    }

    /// PAUSE (RFC 2326 §10.6): suspend delivery.
    pub fn pause(&self) -> Result<()> {
        self.transition("PAUSE", SessionState::Paused)
    }

    /// RECORD (RFC 2326 §10.11): start sending media to the server.
    pub fn record(&self) -> Result<()> {
        self.transition("RECORD", SessionState::Recording)
    }

    /// TEARDOWN (RFC 2326 §10.7): destroy the session on the server. On
    /// success the state returns to `Inactive` and the id is dropped.
    pub fn teardown(&self) -> Result<()> {
        self.transition("TEARDOWN", SessionState::Inactive)
    }

    /// Submit an arbitrary request within this session. Buffered while
    /// `Inactive`, annotated with the `Session` header otherwise.
    pub fn send_request(&self, request: Request, completion: Option<Completion>) -> Result<()> {
        self.submit(request, completion)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// The server-assigned session id, once SETUP has completed.
    pub fn id(&self) -> Option<String> {
        self.inner.lock().id.clone()
    }

    pub fn uri(&self) -> String {
        self.inner.lock().uri.clone()
    }

    fn on_setup_response(
        inner: &Arc<Mutex<SessionInner>>,
        response: &Response,
        presentation: &mut Presentation,
    ) {
        if !response.is_ok() {
            tracing::warn!(status = response.status, "setup refused by server");
            return;
        }
        let (id, drained) = {
            let mut session = inner.lock();
            session.id = response
                .headers
                .get("Session")
                .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
            session.state = SessionState::Ready;
            tracing::info!(session_id = ?session.id, uri = %session.uri, "session ready");
            let drained: Vec<_> = session.queue.drain(..).collect();
            (session.id.clone(), drained)
        };
        for (mut request, completion) in drained {
            if let Some(id) = &id {
                request.headers.set("Session", id);
            }
            if let Err(error) = presentation.send_request(request, completion) {
                tracing::warn!(error = %error, "failed to submit buffered session request");
            }
        }
    }

    fn transition(&self, method: &str, target: SessionState) -> Result<()> {
        let uri = self.inner.lock().uri.clone();
        let request = Request::new(method, &uri);
        let inner = self.inner.clone();
        let method_name = request.method.clone();
        let completion: Completion = Box::new(move |outcome, _| {
            if let Outcome::Success(response) = outcome
                && response.is_ok()
            {
                let mut session = inner.lock();
                session.state = target;
                if target == SessionState::Inactive {
                    session.id = None;
                }
                tracing::debug!(method = %method_name, state = ?target, "session state changed");
            }
        });
        self.submit(request, Some(completion))
    }

    fn submit(&self, mut request: Request, completion: Option<Completion>) -> Result<()> {
        {
            let mut session = self.inner.lock();
            if session.state == SessionState::Inactive {
                tracing::debug!(method = %request.method, "session inactive, buffering request");
                session.queue.push_back((request, completion));
                return Ok(());
            }
            if let Some(id) = &session.id {
                request.headers.set("Session", id);
            }
        }
        self.presentation
            .lock()
            .send_request(request, completion)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event_loop::Connection;
    use crate::presentation::test_udp_presentation;

    fn recv_string(peer: &std::net::UdpSocket) -> String {
        let mut buf = [0u8; 65536];
        let n = peer.recv(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn feed(
        presentation: &Arc<Mutex<Presentation>>,
        peer: &std::net::UdpSocket,
        bytes: &[u8],
    ) {
        peer.send(bytes).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        presentation.lock().on_readable();
    }

    #[test]
    fn requests_buffer_until_setup_assigns_an_id() {
        let (raw, peer) = test_udp_presentation(false);
        let presentation = Arc::new(Mutex::new(raw));

        let session = Session::setup(
            &presentation,
            "rtspu://127.0.0.1/test/track1",
            &[("Transport", "RTP/AVP;unicast;client_port=9000-9001")],
            None,
        )
        .unwrap();
        assert_eq!(session.state(), SessionState::Inactive);

        // buffered, not written: only SETUP is queued on the presentation
        session.play().unwrap();
        assert_eq!(presentation.lock().pending_len(), 1);

        presentation.lock().on_writable();
        let setup = recv_string(&peer);
        assert!(setup.starts_with("SETUP rtspu://127.0.0.1/test/track1 RTSP/1.0\r\n"));
        assert!(setup.contains("Transport: RTP/AVP;unicast;client_port=9000-9001\r\n"));
        assert!(!setup.contains("PLAY"));

        feed(
            &presentation,
            &peer,
            b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: ABC123;timeout=60\r\n\r\n",
        );
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.id().as_deref(), Some("ABC123"));

        // the buffered PLAY drained with the session id attached
        assert_eq!(presentation.lock().pending_len(), 1);
        presentation.lock().on_writable();
        let play = recv_string(&peer);
        assert!(play.starts_with("PLAY rtspu://127.0.0.1/test/track1 RTSP/1.0\r\n"));
        assert!(play.contains("Session: ABC123\r\n"));

        feed(&presentation, &peer, b"RTSP/1.0 200 OK\r\nCSeq: 2\r\n\r\n");
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[test]
    fn state_follows_method_successes() {
        let (raw, peer) = test_udp_presentation(false);
        let presentation = Arc::new(Mutex::new(raw));
        let session = Session::setup(&presentation, "rtspu://127.0.0.1/test", &[], None).unwrap();

        let mut cseq = 1;
        let mut exchange = |expect_method: &str| {
            presentation.lock().on_writable();
            let sent = recv_string(&peer);
            assert!(sent.starts_with(expect_method));
            let reply = format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n");
            feed(&presentation, &peer, reply.as_bytes());
            cseq += 1;
        };

        exchange("SETUP");
        assert_eq!(session.state(), SessionState::Ready);

        session.play().unwrap();
        exchange("PLAY");
        assert_eq!(session.state(), SessionState::Playing);

        session.pause().unwrap();
        exchange("PAUSE");
        assert_eq!(session.state(), SessionState::Paused);

        session.record().unwrap();
        exchange("RECORD");
        assert_eq!(session.state(), SessionState::Recording);

        session.teardown().unwrap();
        exchange("TEARDOWN");
        assert_eq!(session.state(), SessionState::Inactive);
        assert_eq!(session.id(), None);
    }

    #[test]
    fn failed_method_leaves_the_state_alone() {
        let (raw, peer) = test_udp_presentation(false);
        let presentation = Arc::new(Mutex::new(raw));
        let session = Session::setup(&presentation, "rtspu://127.0.0.1/test", &[], None).unwrap();

        presentation.lock().on_writable();
        recv_string(&peer);
        feed(
            &presentation,
            &peer,
            b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: S1\r\n\r\n",
        );
        assert_eq!(session.state(), SessionState::Ready);

        session.play().unwrap();
        presentation.lock().on_writable();
        recv_string(&peer);
        feed(
            &presentation,
            &peer,
            b"RTSP/1.0 454 Session Not Found\r\nCSeq: 2\r\n\r\n",
        );
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn setup_refusal_keeps_the_session_inactive_and_buffered() {
        let (raw, peer) = test_udp_presentation(false);
        let presentation = Arc::new(Mutex::new(raw));
        let session = Session::setup(&presentation, "rtspu://127.0.0.1/test", &[], None).unwrap();
        session.play().unwrap();

        presentation.lock().on_writable();
        recv_string(&peer);
        feed(
            &presentation,
            &peer,
            b"RTSP/1.0 461 Unsupported Transport\r\nCSeq: 1\r\n\r\n",
        );

        assert_eq!(session.state(), SessionState::Inactive);
        assert_eq!(session.id(), None);
        // the buffered PLAY did not leak onto the wire
        assert_eq!(presentation.lock().pending_len(), 0);
    }
}
