//! H.265 (HEVC) RTP depacketizer: RFC 7798.
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264).
//!   The NAL type is in bits 1..6 of the first byte:
//!   ```text
//!   [F|  Type(6)  |LayerId(6)|TID(3)]
//!   ```
//! - **Aggregation Packet** (type 48) replaces STAP-A.
//! - **Fragmentation Unit** (type 49) keeps the 2-byte payload header and
//!   adds a third byte `[S|E|FuType(6)]`.
//! - **Parameter sets** travel as separate `sprop-vps`, `sprop-sps` and
//!   `sprop-pps` fmtp attributes (RFC 7798 §7.1).

use base64::prelude::{BASE64_STANDARD, Engine as _};
use bytes::Bytes;

use super::assembler::{NalAssembler, split_aggregate};
use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};
use crate::error::{DepacketizeError, ParameterSetError};

pub const NAL_BLA_W_LP: u8 = 16;
pub const NAL_IDR_W_RADL: u8 = 19;
pub const NAL_IDR_N_LP: u8 = 20;
pub const NAL_CRA: u8 = 21;
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;

const AGGREGATION: u8 = 48;
const FRAGMENTATION: u8 = 49;
const PACI: u8 = 50;

/// Access unit delimiter NAL (pic_type = 2, any slice type).
pub const AUD_NAL: [u8; 3] = [0x46, 0x01, 0x50];

/// NAL unit type from the 2-byte header.
pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| (b >> 1) & 0x3f)
}

/// IRAP pictures a decoder can start from.
pub fn is_random_access(nal_type: u8) -> bool {
    matches!(nal_type, NAL_IDR_W_RADL | NAL_IDR_N_LP | NAL_CRA)
}

/// H.265 RTP depacketizer (RFC 7798), without DONL fields.
#[derive(Debug, Default)]
pub struct H265Depacketizer {
    assembler: NalAssembler,
}

impl H265Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_fragment(&mut self, payload: &Bytes) -> Result<(), DepacketizeError> {
        if payload.len() < 3 {
            return Err(DepacketizeError::Malformed("FU shorter than its headers"));
        }
        let fu_header = payload[2];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let fu_type = fu_header & 0x3f;
        let data = &payload[3..];

        if start {
            if end {
                return Err(DepacketizeError::Malformed("FU with both start and end bits"));
            }
            let header = [(payload[0] & 0x81) | (fu_type << 1), payload[1]];
            self.assembler.start_fragment(&header, data)?;
        } else {
            self.assembler.continue_fragment(data)?;
        }

        if end {
            self.assembler.finish_fragment()?;
        }
        Ok(())
    }
}

impl Depacketizer for H265Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError> {
        let payload = &packet.payload;
        if payload.is_empty() {
            return Err(DepacketizeError::EmptyPayload);
        }
        if payload.len() < 2 {
            return Err(DepacketizeError::Malformed("payload shorter than NAL header"));
        }
        self.assembler.begin_packet(packet.timestamp);

        match nal_type(payload) {
            FRAGMENTATION => self.handle_fragment(payload)?,
            AGGREGATION => {
                self.assembler.abandon_fragment();
                for nal in split_aggregate(&payload[2..])? {
                    self.assembler.push_unit(nal)?;
                }
            }
            t @ (PACI | 51..=63) => return Err(DepacketizeError::UnsupportedType(t)),
            _ => {
                self.assembler.abandon_fragment();
                self.assembler.push_unit(payload.clone())?;
            }
        }

        if !packet.marker {
            return Ok(None);
        }
        let unit = self.assembler.finish_access_unit();
        if let Some(au) = &unit {
            tracing::trace!(
                units = au.units.len(),
                ts = au.rtp_timestamp,
                "H.265 access unit complete"
            );
        }
        Ok(unit)
    }

    fn reset(&mut self) {
        self.assembler.reset();
    }
}

/// Parameter sets decoded from `sprop-vps` / `sprop-sps` / `sprop-pps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    pub vps: Vec<u8>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl ParameterSets {
    /// Decode the three fmtp values. All three are required.
    pub fn from_fmtp(
        vps: Option<&str>,
        sps: Option<&str>,
        pps: Option<&str>,
    ) -> Result<Self, ParameterSetError> {
        Ok(Self {
            vps: decode_sprop(vps, "VPS")?,
            sps: decode_sprop(sps, "SPS")?,
            pps: decode_sprop(pps, "PPS")?,
        })
    }
}

fn decode_sprop(value: Option<&str>, name: &'static str) -> Result<Vec<u8>, ParameterSetError> {
    // A value may list several NALs; the first one is the active set.
    let first = value
        .and_then(|v| v.split(',').map(str::trim).find(|p| !p.is_empty()))
        .ok_or(ParameterSetError::Missing(name))?;
    let nal = BASE64_STANDARD
        .decode(first)
        .map_err(|_| ParameterSetError::Encoding { name })?;
    if nal.len() < 2 {
        return Err(ParameterSetError::Truncated {
            name,
            field: "nal_unit_header",
        });
    }
    Ok(nal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::test_packet;

    fn fu(start: bool, end: bool, nal_type: u8, data: &[u8]) -> Vec<u8> {
        let mut header = nal_type;
        if start {
            header |= 0x80;
        }
        if end {
            header |= 0x40;
        }
        let mut payload = vec![FRAGMENTATION << 1, 0x01, header];
        payload.extend_from_slice(data);
        payload
    }

    #[test]
    fn nal_type_from_header() {
        assert_eq!(nal_type(&[0x40, 0x01]), NAL_VPS);
        assert_eq!(nal_type(&[0x42, 0x01]), NAL_SPS);
        assert_eq!(nal_type(&[0x44, 0x01]), NAL_PPS);
        assert_eq!(nal_type(&[0x26, 0x01]), NAL_IDR_W_RADL);
        assert_eq!(nal_type(&AUD_NAL), NAL_AUD);
    }

    #[test]
    fn fragmented_unit_rebuilds_header() {
        let mut d = H265Depacketizer::new();
        assert_eq!(
            d.depacketize(&test_packet(1, 0, false, &fu(true, false, NAL_IDR_W_RADL, &[0xAA]))),
            Ok(None)
        );
        assert_eq!(
            d.depacketize(&test_packet(2, 0, false, &fu(false, false, NAL_IDR_W_RADL, &[0xBB]))),
            Ok(None)
        );
        let au = d
            .depacketize(&test_packet(3, 0, true, &fu(false, true, NAL_IDR_W_RADL, &[0xCC])))
            .unwrap()
            .unwrap();
        assert_eq!(au.units.len(), 1);
        assert_eq!(&au.units[0][..], &[0x26, 0x01, 0xAA, 0xBB, 0xCC]);
        assert_eq!(nal_type(&au.units[0]), NAL_IDR_W_RADL);
    }

    #[test]
    fn aggregation_packet() {
        let mut d = H265Depacketizer::new();
        let payload = [
            AGGREGATION << 1,
            0x01,
            0x00,
            0x03,
            0x40,
            0x01,
            0x0c,
            0x00,
            0x03,
            0x42,
            0x01,
            0x01,
        ];
        let au = d
            .depacketize(&test_packet(1, 0, true, &payload))
            .unwrap()
            .unwrap();
        assert_eq!(au.units.len(), 2);
        assert_eq!(nal_type(&au.units[0]), NAL_VPS);
        assert_eq!(nal_type(&au.units[1]), NAL_SPS);
    }

    #[test]
    fn orphan_fragment_is_benign() {
        let mut d = H265Depacketizer::new();
        let err = d
            .depacketize(&test_packet(1, 0, true, &fu(false, true, 1, &[0])))
            .unwrap_err();
        assert!(err.is_benign());
    }

    #[test]
    fn paci_unsupported() {
        let mut d = H265Depacketizer::new();
        assert_eq!(
            d.depacketize(&test_packet(1, 0, true, &[PACI << 1, 0x01, 0x00])),
            Err(DepacketizeError::UnsupportedType(PACI))
        );
    }

    #[test]
    fn parameter_sets_from_fmtp() {
        let sets =
            ParameterSets::from_fmtp(Some("QAEMAf8="), Some("QgEBAWA="), Some("RAHA8vA=")).unwrap();
        assert_eq!(nal_type(&sets.vps), NAL_VPS);
        assert_eq!(nal_type(&sets.sps), NAL_SPS);
        assert_eq!(nal_type(&sets.pps), NAL_PPS);

        assert!(matches!(
            ParameterSets::from_fmtp(None, Some("QgEBAWA="), Some("RAHA8vA=")),
            Err(ParameterSetError::Missing("VPS"))
        ));
    }
}
