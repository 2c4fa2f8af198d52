//! Media codecs: RTP depacketization, parameter sets and access-unit framing.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame arrives as one or more RTP packets. Every packet
//! carries a 12-byte fixed header ([`rtp::RtpPacket`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping): for loss detection.
//! - **Timestamp** (32-bit): media clock, 90 kHz for video.
//! - **SSRC** (32-bit): identifies the sender.
//! - **Marker bit**: set on the last packet of an access unit (video).
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Direction |
//! |-------|--------|-----|-----------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | receive |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | receive |
//! | G.711 mu-law | [`g711`] | [RFC 3551](https://tools.ietf.org/html/rfc3551) | receive + back-channel send |
//! | AAC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | receive |

pub mod aac;
pub mod annexb;
mod assembler;
pub mod framer;
pub mod g711;
pub mod h264;
pub mod h265;
pub mod rtp;
pub mod sps;

use bytes::Bytes;

use crate::error::DepacketizeError;
use rtp::RtpPacket;

pub use assembler::{MAX_ACCESS_UNIT_SIZE, MAX_NALUS_PER_ACCESS_UNIT};

/// Units reassembled from one or more RTP packets sharing a timestamp.
///
/// For video these are the NAL units of one access unit, in decoding order.
/// For AAC they are the raw access units carried by the packet(s). For
/// G.711 there is exactly one unit: the packet's samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub units: Vec<Bytes>,
    /// RTP timestamp shared by the packets that formed this unit.
    pub rtp_timestamp: u32,
}

/// Codec-specific RTP depacketizer.
///
/// One instance exists per negotiated media; it is fed packets in
/// receive order by that media's worker and never shared.
pub trait Depacketizer: Send {
    /// Feed one RTP packet.
    ///
    /// Returns `Ok(Some(_))` once a complete access unit is available,
    /// `Ok(None)` when more packets are needed, and an error when the packet
    /// had to be discarded. Errors are per-packet and never poison the
    /// depacketizer; it resynchronizes on the next unit boundary.
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError>;

    /// Drop any partially reassembled state (called on sequence gaps).
    fn reset(&mut self);
}

/// Codec-specific RTP packetizer for the outbound back-channel.
pub trait Packetizer: Send {
    /// Split encoded media into complete RTP packets (header + payload),
    /// advancing the RTP timestamp by the media duration of each packet.
    fn packetize(&mut self, encoded_data: &[u8]) -> Vec<Vec<u8>>;

    /// Codec name as it appears in `a=rtpmap`.
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;
}
