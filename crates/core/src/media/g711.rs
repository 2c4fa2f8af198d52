//! G.711 mu-law (PCMU) over RTP: RFC 3551 §4.5.14.
//!
//! One byte per sample at 8 kHz, so the payload is passed through verbatim
//! and the RTP timestamp advances by the payload length.

use super::rtp::{RtpHeader, RtpPacket, build_packet};
use super::{AccessUnit, Depacketizer, Packetizer};
use crate::error::DepacketizeError;

/// Static payload type for PCMU.
pub const PAYLOAD_TYPE_PCMU: u8 = 0;

/// G.711 clock rate.
pub const CLOCK_RATE: u32 = 8000;

/// Samples per outbound packet (20 ms).
pub const SAMPLES_PER_PACKET: usize = 160;

/// Passes each packet's samples through as one unit.
#[derive(Debug, Default)]
pub struct G711Depacketizer;

impl G711Depacketizer {
    pub fn new() -> Self {
        Self
    }
}

impl Depacketizer for G711Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError> {
        if packet.payload.is_empty() {
            return Err(DepacketizeError::EmptyPayload);
        }
        Ok(Some(AccessUnit {
            units: vec![packet.payload.clone()],
            rtp_timestamp: packet.timestamp,
        }))
    }

    fn reset(&mut self) {}
}

/// Packetizes raw mu-law samples into 20 ms RTP packets for the back-channel.
///
/// The first packet of a talk spurt carries the marker bit (RFC 3551 §4.1).
#[derive(Debug)]
pub struct G711Packetizer {
    header: RtpHeader,
    talk_spurt: bool,
}

impl G711Packetizer {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            talk_spurt: true,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            talk_spurt: true,
        }
    }

    /// Mark the next packet as the start of a new talk spurt.
    pub fn begin_talk_spurt(&mut self) {
        self.talk_spurt = true;
    }
}

impl Packetizer for G711Packetizer {
    fn packetize(&mut self, encoded_data: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::with_capacity(encoded_data.len().div_ceil(SAMPLES_PER_PACKET));
        for chunk in encoded_data.chunks(SAMPLES_PER_PACKET) {
            let marker = std::mem::take(&mut self.talk_spurt);
            packets.push(build_packet(&mut self.header, marker, chunk));
            self.header.advance_timestamp(chunk.len() as u32);
        }

        tracing::trace!(
            samples = encoded_data.len(),
            rtp_packets = packets.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "mu-law samples packetized"
        );
        packets
    }

    fn codec_name(&self) -> &'static str {
        "PCMU"
    }

    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }
}
