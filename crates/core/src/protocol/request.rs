use crate::protocol::HeaderStore;

/// An outbound (or server-initiated incoming) RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Built with the chaining helpers, then handed to
/// [`Presentation::send_request`](crate::Presentation::send_request):
///
/// ```
/// use rtspc::protocol::Request;
///
/// let req = Request::new("SET_PARAMETER", "rtsp://h/a")
///     .with_header("Content-Type", "text/parameters")
///     .with_body(b"barparam: barstuff\r\n".to_vec());
/// assert!(String::from_utf8(req.serialize()).unwrap().contains("Content-Length: 20\r\n"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.), uppercase.
    pub method: String,
    /// Request-URI: absolute (`rtsp://host:port/stream`) or `*`.
    pub uri: String,
    /// Protocol version without the `RTSP/` prefix; `1.0` unless set.
    pub version: String,
    /// Headers in insertion order.
    pub headers: HeaderStore,
    /// Message body, if any. `Content-Length` is derived from it on
    /// serialisation.
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: &str, uri: &str) -> Self {
        Request {
            method: method.to_ascii_uppercase(),
            uri: uri.to_string(),
            version: "1.0".to_string(),
            headers: HeaderStore::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// The CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.headers.get("CSeq")?.trim().parse().ok()
    }

    /// Serialise to the RTSP text wire format.
    ///
    /// If a body is present and no `Content-Length` header was set, one is
    /// appended with the body's byte length (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut head = format!("{} {} RTSP/{}\r\n", self.method, self.uri, self.version);
        self.headers.serialise_into(&mut head);
        if let Some(body) = &self.body
            && !self.headers.is_set("Content-Length")
        {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}
