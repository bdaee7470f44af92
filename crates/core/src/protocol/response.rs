use crate::protocol::HeaderStore;

/// An RTSP response (RFC 2326 §7).
///
/// Parsed incrementally off the wire by the presentation's incoming state
/// machine, or built locally when replying to a server-initiated request:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Protocol version without the `RTSP/` prefix.
    pub version: String,
    /// Numeric status code from the status line.
    pub status: u16,
    /// Reason phrase from the status line.
    pub reason: String,
    /// Headers in arrival order.
    pub headers: HeaderStore,
    /// Body, present when the response carried a non-zero Content-Length.
    pub content: Option<Vec<u8>>,
}

impl Response {
    pub fn new(status: u16, reason: &str) -> Self {
        Response {
            version: "1.0".to_string(),
            status,
            reason: reason.to_string(),
            headers: HeaderStore::new(),
            content: None,
        }
    }

    /// 200 OK — success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// Whether the status code is in the 2xx success range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    /// The CSeq header echoed from the request (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.headers.get("CSeq")?.trim().parse().ok()
    }

    /// Body decoded as UTF-8, for text payloads such as SDP.
    pub fn text(&self) -> Option<String> {
        self.content
            .as_ref()
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    /// Serialise to the RTSP text wire format.
    ///
    /// If content is present and no `Content-Length` header was set, one is
    /// appended with the content's byte length (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut head = format!("RTSP/{} {} {}\r\n", self.version, self.status, self.reason);
        self.headers.serialise_into(&mut head);
        if let Some(content) = &self.content
            && !self.headers.is_set("Content-Length")
        {
            head.push_str(&format!("Content-Length: {}\r\n", content.len()));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        if let Some(content) = &self.content {
            out.extend_from_slice(content);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_content() {
        let resp = Response::ok().add_header("CSeq", "1");
        let s = String::from_utf8(resp.serialize()).unwrap();
        assert_eq!(s, "RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n");
    }

    #[test]
    fn serialize_with_content() {
        let resp = Response::ok()
            .add_header("CSeq", "2")
            .with_content(b"v=0\r\n".to_vec());
        let s = String::from_utf8(resp.serialize()).unwrap();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }

    #[test]
    fn ok_covers_the_2xx_range() {
        assert!(Response::new(200, "OK").is_ok());
        assert!(Response::new(250, "Low on Storage Space").is_ok());
        assert!(!Response::new(199, "").is_ok());
        assert!(!Response::new(300, "Multiple Choices").is_ok());
        assert!(!Response::new(454, "Session Not Found").is_ok());
    }
}
