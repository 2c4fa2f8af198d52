//! RTSP client protocol (RFC 2326).
//!
//! This module handles the text side of RTSP: building requests, parsing
//! responses, parsing the SDP returned by DESCRIBE, and authentication.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! ```text
//! DESCRIBE rtsp://camera/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Methods issued by the client
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate interleaved TCP channels per media |
//! | PLAY | §10.5 | Start media delivery |
//! | GET_PARAMETER | §10.8 | Keepalive |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod auth;
pub mod request;
pub mod response;
pub mod sdp;

pub use request::RtspRequest;
pub use response::RtspResponse;
pub use sdp::{MediaDescription, SessionDescription};

use crate::error::{CaptureError, ParseErrorKind};

/// `Require` tag for ONVIF audio back-channel negotiation.
pub const BACKCHANNEL_REQUIRE: &str = "www.onvif.org/ver20/backchannel";

/// Parse header lines up to the first empty line.
fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> crate::error::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();

    for line in lines {
        if line.is_empty() {
            break;
        }

        let colon_pos = line.find(':').ok_or(CaptureError::Protocol {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();

        headers.push((name, value));
    }

    Ok(headers)
}

/// Session id and timeout from a `Session` header (RFC 2326 §12.37).
///
/// `"12345678;timeout=60"` -> `("12345678", Some(60))`.
pub fn parse_session_header(value: &str) -> (String, Option<u64>) {
    let mut parts = value.split(';');
    let id = parts.next().unwrap_or_default().trim().to_string();
    let timeout = parts
        .filter_map(|p| p.trim().strip_prefix("timeout="))
        .find_map(|t| t.trim().parse().ok());
    (id, timeout)
}
