use crate::error::{CaptureError, ParseErrorKind};

/// An RTSP response (RFC 2326 §7).
///
/// Responses from the camera are read with [`parse`](Self::parse). The
/// builder side ([`new`](Self::new), [`add_header`](Self::add_header),
/// [`with_body`](Self::with_body), [`serialize`](Self::serialize)) is used
/// to answer the rare requests a camera sends to its client:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// `Content-Length` is computed automatically when a body is present.
#[derive(Debug, Clone)]
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// 200 OK, success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 501 Not Implemented: the method is not supported by this client.
    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }

    /// Parse a response head (status line + headers, up to the blank line)
    /// and attach an already-read body.
    pub fn parse(head: &str, body: Option<String>) -> crate::error::Result<Self> {
        let mut lines = head.lines();

        let status_line = lines.next().ok_or(CaptureError::Protocol {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("RTSP/") {
            return Err(CaptureError::Protocol {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        }
        let status_code = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or(CaptureError::Protocol {
                kind: ParseErrorKind::InvalidStatusLine,
            })?;
        let status_text = parts.next().unwrap_or_default().trim().to_string();

        let headers = super::parse_headers(lines)?;

        Ok(RtspResponse {
            status_code,
            status_text,
            headers,
            body,
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values of a repeatable header (e.g. `WWW-Authenticate`).
    pub fn get_headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Declared body length, 0 when absent.
    pub fn content_length(&self) -> crate::error::Result<usize> {
        match self.get_header("Content-Length") {
            Some(value) => value.trim().parse().map_err(|_| CaptureError::Protocol {
                kind: ParseErrorKind::InvalidContentLength,
            }),
            None => Ok(0),
        }
    }

    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }
}
