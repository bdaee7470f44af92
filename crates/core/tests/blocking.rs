//! Integration tests for the blocking facade: scripted loopback servers
//! answering DESCRIBE, the full OPTIONS → DESCRIBE → SETUP → PLAY →
//! TEARDOWN handshake, and UDP retransmission.

use std::cell::Cell;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use rtspc::{Client, ClientConfig, InterfaceMode, Session, SessionState};

/// Read one RTSP message: start line, headers, and a Content-Length body if
/// one is announced.
fn read_message(reader: &mut BufReader<TcpStream>) -> std::io::Result<String> {
    let mut text = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        text.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }
    if let Some(len) = header_value(&text, "content-length").and_then(|v| v.parse::<usize>().ok())
        && len > 0
    {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        text.push_str(&String::from_utf8_lossy(&body));
    }
    Ok(text)
}

fn header_value(message: &str, name: &str) -> Option<String> {
    message
        .lines()
        .find(|line| line.to_lowercase().starts_with(&format!("{name}:")))
        .and_then(|line| line.split(':').nth(1))
        .map(|value| value.trim().to_string())
}

fn blocking_client(timeout: Duration) -> Client {
    Client::new(ClientConfig {
        interface: InterfaceMode::Blocking,
        timeout,
        ..ClientConfig::default()
    })
    .expect("client")
}

#[test]
fn blocking_describe_returns_the_parsed_response() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Archive\r\n";

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let request = read_message(&mut reader).unwrap();
        assert!(request.starts_with(&format!(
            "DESCRIBE rtsp://127.0.0.1:{port}/archive RTSP/1.0\r\n"
        )));
        assert!(request.contains("CSeq: 1\r\n"));
        assert!(
            request.contains("Accept: application/sdp, application/rtsl, application/mheg\r\n")
        );
        let response = format!(
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
            sdp.len(),
            sdp
        );
        stream.write_all(response.as_bytes()).unwrap();
    });

    let mut client = blocking_client(Duration::from_secs(2));
    let presentation = client
        .presentation(&format!("rtsp://127.0.0.1:{port}/archive"))
        .unwrap();
    let response = presentation.lock().describe(None, None).unwrap().unwrap();

    assert_eq!(response.version, "1.0");
    assert_eq!(response.status, 200);
    assert_eq!(response.reason, "OK");
    assert!(response.is_ok());
    assert_eq!(response.headers.get("Content-Type"), Some("application/sdp"));
    assert_eq!(response.text().as_deref(), Some(sdp));
    server.join().unwrap();
}

#[test]
fn full_handshake_with_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let sdp = "v=0\r\ns=Live\r\nm=video 0 RTP/AVP 96\r\n";

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut seen: Vec<String> = Vec::new();
        loop {
            let message = read_message(&mut reader).unwrap();
            if message.is_empty() {
                break;
            }
            let method = message.split(' ').next().unwrap_or("").to_string();
            let cseq = header_value(&message, "cseq").unwrap_or_default();
            let response = match method.as_str() {
                "OPTIONS" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nPublic: OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN\r\n\r\n"
                ),
                "DESCRIBE" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
                    sdp.len(),
                    sdp
                ),
                "SETUP" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nSession: 0AF3G2;timeout=60\r\nTransport: RTP/AVP;unicast;client_port=9000-9001;server_port=5000-5001\r\n\r\n"
                ),
                "PLAY" | "TEARDOWN" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nSession: 0AF3G2\r\n\r\n"
                ),
                _ => format!("RTSP/1.0 501 Not Implemented\r\nCSeq: {cseq}\r\n\r\n"),
            };
            stream.write_all(response.as_bytes()).unwrap();
            let done = method == "TEARDOWN";
            seen.push(message);
            if done {
                break;
            }
        }
        seen
    });

    let base = format!("rtsp://127.0.0.1:{port}/live");
    let mut client = blocking_client(Duration::from_secs(2));
    let presentation = client.presentation(&base).unwrap();

    let options = presentation.lock().options(None, None).unwrap().unwrap();
    assert!(options.headers.get("Public").unwrap().contains("DESCRIBE"));

    let describe = presentation.lock().describe(None, None).unwrap().unwrap();
    assert_eq!(describe.text().as_deref(), Some(sdp));

    let track = format!("{base}/track1");
    let session = Session::setup(
        &presentation,
        &track,
        &[("Transport", "RTP/AVP;unicast;client_port=9000-9001")],
        None,
    )
    .unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.id().as_deref(), Some("0AF3G2"));

    session.play().unwrap();
    assert_eq!(session.state(), SessionState::Playing);

    session.teardown().unwrap();
    assert_eq!(session.state(), SessionState::Inactive);

    let seen = server.join().unwrap();
    assert_eq!(seen.len(), 5);
    let play = &seen[3];
    assert!(play.starts_with(&format!("PLAY {track} RTSP/1.0\r\n")));
    assert!(play.contains("Session: 0AF3G2\r\n"));
    assert_eq!(header_value(play, "cseq").as_deref(), Some("4"));
}

#[test]
fn udp_describe_retransmits_identical_bytes_then_resolves_once() {
    let server_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    server_socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let port = server_socket.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut buf = [0u8; 65536];
        let (n, from) = server_socket.recv_from(&mut buf).unwrap();
        let first = buf[..n].to_vec();
        // stay silent: the client has to send the same bytes again
        let (n, _) = server_socket.recv_from(&mut buf).unwrap();
        assert_eq!(first, buf[..n].to_vec());
        let cseq = header_value(&String::from_utf8_lossy(&first), "cseq").unwrap();
        let response = format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n");
        server_socket.send_to(response.as_bytes(), from).unwrap();
    });

    let mut client = blocking_client(Duration::from_millis(300));
    let presentation = client
        .presentation(&format!("rtspu://127.0.0.1:{port}/live"))
        .unwrap();

    let completions = Rc::new(Cell::new(0u32));
    let counter = completions.clone();
    let response = presentation
        .lock()
        .describe(
            None,
            Some(Box::new(move |_, _| counter.set(counter.get() + 1))),
        )
        .unwrap()
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(completions.get(), 1);
    server.join().unwrap();
}
