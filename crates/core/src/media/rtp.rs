use bytes::Bytes;

use crate::error::DepacketizeError;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            CSRC (0..15 entries), extension, payload ...       |
/// ```
///
/// Incoming packets are parsed into an [`RtpPacket`], which keeps both the
/// payload and the complete packet bytes (the latter is what the
/// back-channel replays).
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Payload with CSRCs, header extension and padding removed.
    pub payload: Bytes,
    /// The whole packet as received.
    pub raw: Bytes,
}

const FIXED_HEADER_LEN: usize = 12;

impl RtpPacket {
    /// Parse a packet. `raw` is retained; `payload` is a zero-copy slice of it.
    pub fn parse(raw: Bytes) -> Result<Self, DepacketizeError> {
        if raw.len() < FIXED_HEADER_LEN {
            return Err(DepacketizeError::Malformed("RTP packet shorter than fixed header"));
        }

        let version = raw[0] >> 6;
        if version != 2 {
            return Err(DepacketizeError::Malformed("RTP version is not 2"));
        }
        let padding = raw[0] & 0x20 != 0;
        let extension = raw[0] & 0x10 != 0;
        let csrc_count = (raw[0] & 0x0f) as usize;
        let marker = raw[1] & 0x80 != 0;
        let payload_type = raw[1] & 0x7f;
        let sequence = u16::from_be_bytes([raw[2], raw[3]]);
        let timestamp = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let ssrc = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);

        let mut start = FIXED_HEADER_LEN + csrc_count * 4;
        if extension {
            // profile (16) + length in 32-bit words (16) + extension body
            if raw.len() < start + 4 {
                return Err(DepacketizeError::Malformed("truncated RTP header extension"));
            }
            let words = u16::from_be_bytes([raw[start + 2], raw[start + 3]]) as usize;
            start += 4 + words * 4;
        }

        let mut end = raw.len();
        if padding {
            let pad = raw[raw.len() - 1] as usize;
            if pad == 0 || pad > end {
                return Err(DepacketizeError::Malformed("invalid RTP padding length"));
            }
            end -= pad;
        }

        if start > end {
            return Err(DepacketizeError::Malformed("RTP header exceeds packet length"));
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: raw.slice(start..end),
            raw,
        })
    }
}

/// Outgoing RTP header state (RFC 3550 §5.1), used by the back-channel
/// packetizer.
///
/// Manages:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp**: stored as u64 internally; the lower 32 bits go on the wire.
/// - **SSRC**: randomly generated per RFC 3550 §8.1 to avoid collisions.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::new(pt, rand::random::<u32>())
    }

    /// Current sequence number (before the next [`write`](Self::write) call).
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Current timestamp (internal u64 representation).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    pub fn write(&mut self, marker: bool) -> [u8; 12] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | self.pt;

        let mut header = [0u8; 12];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&(self.timestamp as u32).to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Advance the RTP timestamp by the given increment (in clock ticks).
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// Build a complete RTP packet from a header state and payload.
pub fn build_packet(header: &mut RtpHeader, marker: bool, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(FIXED_HEADER_LEN + payload.len());
    packet.extend_from_slice(&header.write(marker));
    packet.extend_from_slice(payload);
    packet
}

/// Test helper: a parsed packet with the given fields and payload.
#[cfg(test)]
pub(crate) fn test_packet(sequence: u16, timestamp: u32, marker: bool, payload: &[u8]) -> RtpPacket {
    let mut header = RtpHeader::new(96, 0x0102_0304);
    header.sequence = sequence;
    header.timestamp = timestamp as u64;
    let raw = Bytes::from(build_packet(&mut header, marker, payload));
    RtpPacket::parse(raw).expect("well-formed test packet")
}
