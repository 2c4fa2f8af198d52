//! RTSP interleaved framing (RFC 2326 §10.12).
//!
//! With `Transport: RTP/AVP/TCP;interleaved=0-1`, RTP and RTCP share the
//! RTSP connection. Binary data is framed as
//!
//! ```text
//! '$' | channel (1 byte) | length (2 bytes, big-endian) | data
//! ```
//!
//! and RTSP messages (responses to our requests, or requests from the
//! camera) appear in between as ordinary text.

use std::io::{self, BufRead, Write};

use bytes::Bytes;

use crate::error::{CaptureError, ParseErrorKind, Result};
use crate::protocol::{RtspRequest, RtspResponse};

const MAGIC: u8 = b'$';

/// Upper bound for an RTSP message head.
const MAX_HEAD_LEN: usize = 64 * 1024;

/// Upper bound for an RTSP message body.
const MAX_BODY_LEN: usize = 1024 * 1024;

/// One unit read off an interleaved connection.
#[derive(Debug)]
pub enum Frame {
    Data { channel: u8, payload: Bytes },
    Response(RtspResponse),
    Request(RtspRequest),
}

/// Read the next frame. Blank lines between messages are skipped.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Frame> {
    loop {
        let first = match reader.fill_buf()?.first() {
            Some(&b) => b,
            None => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed").into());
            }
        };

        match first {
            MAGIC => return read_data(reader),
            b'\r' | b'\n' => reader.consume(1),
            _ => return read_message(reader),
        }
    }
}

fn read_data<R: BufRead>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let channel = header[1];
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Frame::Data {
        channel,
        payload: Bytes::from(payload),
    })
}

fn read_message<R: BufRead>(reader: &mut R) -> Result<Frame> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated RTSP message").into());
        }
        head.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
        if head.len() > MAX_HEAD_LEN {
            return Err(CaptureError::Protocol {
                kind: ParseErrorKind::InvalidHeader,
            });
        }
    }

    if head.starts_with("RTSP/") {
        let response = RtspResponse::parse(&head, None)?;
        let body = read_body(reader, response.content_length()?)?;
        Ok(Frame::Response(RtspResponse { body, ..response }))
    } else {
        let request = RtspRequest::parse(&head)?;
        let len = match request.get_header("Content-Length") {
            Some(v) => v.trim().parse().map_err(|_| CaptureError::Protocol {
                kind: ParseErrorKind::InvalidContentLength,
            })?,
            None => 0,
        };
        // Requests from the camera are answered without looking at the body.
        read_body(reader, len)?;
        Ok(Frame::Request(request))
    }
}

fn read_body<R: BufRead>(reader: &mut R, len: usize) -> Result<Option<String>> {
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_BODY_LEN {
        return Err(CaptureError::Protocol {
            kind: ParseErrorKind::InvalidContentLength,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(String::from_utf8_lossy(&body).into_owned()))
}

/// Write one interleaved data frame.
pub fn write_frame<W: Write>(writer: &mut W, channel: u8, payload: &[u8]) -> io::Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "interleaved payload exceeds 65535 bytes")
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(MAGIC);
    frame.push(channel);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)
}
