//! Error types for the capture core.

use std::fmt;

/// Errors that abort a negotiation pass or a session-level operation.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Negotiation**: [`Connect`](Self::Connect), [`Describe`](Self::Describe),
///   [`Setup`](Self::Setup), [`Play`](Self::Play),
///   [`Unauthorized`](Self::Unauthorized), [`NoMedia`](Self::NoMedia).
/// - **Codec configuration**: [`ParameterSet`](Self::ParameterSet), fatal
///   because the stream dimensions are required downstream.
/// - **Protocol**: [`Protocol`](Self::Protocol), malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io), socket failures after negotiation.
/// - **Lifecycle**: [`InvalidState`](Self::InvalidState).
///
/// Per-packet failures never surface here; see [`DepacketizeError`] and
/// [`DecodeError`].
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The RTSP URL could not be parsed or uses an unsupported scheme.
    #[error("invalid RTSP url: {0}")]
    InvalidUrl(String),

    /// TCP connect or the initial OPTIONS exchange failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// DESCRIBE was rejected or returned an unusable session description.
    #[error("DESCRIBE failed: {0}")]
    Describe(String),

    /// SETUP of a selected media failed at the transport level.
    #[error("SETUP failed for {media}: {reason}")]
    Setup { media: String, reason: String },

    /// PLAY was rejected by the camera.
    #[error("PLAY failed: {0}")]
    Play(String),

    /// The camera rejected our credentials (or offered no usable scheme).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Negotiation completed but no media could be wired.
    #[error("no usable media advertised by the camera")]
    NoMedia,

    /// Codec parameter sets could not be parsed.
    #[error("parameter set error: {0}")]
    ParameterSet(#[from] ParameterSetError),

    /// Failed to parse an RTSP message.
    #[error("RTSP parse error: {kind}")]
    Protocol { kind: ParseErrorKind },

    /// Operation not allowed in the session's current state.
    #[error("invalid session state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    /// JPEG encoding of a snapshot failed.
    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] image::ImageError),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a number or the body was truncated.
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
        }
    }
}

/// Failure to extract or parse codec parameter sets.
#[derive(Debug, thiserror::Error)]
pub enum ParameterSetError {
    /// The session description did not carry the named parameter set.
    #[error("{0} missing from session description")]
    Missing(&'static str),

    /// The parameter set was present but not valid base64 / hex.
    #[error("{name} has invalid encoding")]
    Encoding { name: &'static str },

    /// The parameter set ended before the named field could be read.
    #[error("{name} truncated while reading {field}")]
    Truncated {
        name: &'static str,
        field: &'static str,
    },

    /// A field held a value outside what this parser supports.
    #[error("{name} has unsupported {field} = {value}")]
    Unsupported {
        name: &'static str,
        field: &'static str,
        value: u32,
    },
}

/// Per-packet depacketization failure. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepacketizeError {
    /// A continuation fragment arrived without the fragment that starts it,
    /// e.g. the stream was joined mid-unit or the start was lost.
    #[error("received a non-starting fragment without any previous fragment")]
    NonStartingPacketAndNoPrevious,

    /// The packet carried no payload bytes.
    #[error("empty payload")]
    EmptyPayload,

    /// The payload type in the NAL/AU header is not handled.
    #[error("unsupported packetization type {0}")]
    UnsupportedType(u8),

    /// The payload structure was inconsistent with its own length fields.
    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    /// The pending access unit exceeded the reassembly limit and was dropped.
    #[error("access unit exceeds {0} bytes")]
    TooLarge(usize),
}

impl DepacketizeError {
    /// Conditions that occur in normal operation (joining mid-stream,
    /// tolerated loss) and must not be reported as failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NonStartingPacketAndNoPrevious | Self::EmptyPayload)
    }
}

/// Failure of an on-demand decode request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The access unit was empty.
    #[error("empty access unit")]
    EmptyInput,

    /// No native decoder is active (never configured, or already closed).
    #[error("no decoder configured, it might already be closed")]
    NoDecoderConfigured,

    /// The codec accepted the input but has no picture yet (reference
    /// buffering). Callers retry with the next access unit.
    #[error("decoder produced no picture for this input")]
    EmptyFrame,

    /// The native codec rejected the input or failed internally.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
}

/// Convenience alias for `Result<T, CaptureError>`.
pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_depacketize_errors() {
        assert!(DepacketizeError::NonStartingPacketAndNoPrevious.is_benign());
        assert!(DepacketizeError::EmptyPayload.is_benign());
        assert!(!DepacketizeError::UnsupportedType(25).is_benign());
        assert!(!DepacketizeError::Malformed("short").is_benign());
    }

    #[test]
    fn parameter_set_error_converts() {
        let err: CaptureError = ParameterSetError::Missing("SPS").into();
        assert_eq!(
            err.to_string(),
            "parameter set error: SPS missing from session description"
        );
    }
}
