use base64::prelude::{BASE64_STANDARD, Engine as _};
use bytes::Bytes;

use super::assembler::{NalAssembler, split_aggregate};
use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};
use crate::error::{DepacketizeError, ParameterSetError};

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

const STAP_A: u8 = 24;
const STAP_B: u8 = 25;
const MTAP16: u8 = 26;
const MTAP24: u8 = 27;
const FU_A: u8 = 28;
const FU_B: u8 = 29;

/// Access unit delimiter NAL (primary_pic_type = 7, any slice type).
pub const AUD_NAL: [u8; 2] = [0x09, 0xF0];

/// NAL unit type from the first header byte.
pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| b & 0x1f)
}

/// H.264 RTP depacketizer (RFC 6184), non-interleaved mode.
///
/// Handles the three packetization structures cameras actually send:
///
/// - **Single NAL Unit** (§5.6, types 1–23): the payload is one NAL.
/// - **STAP-A** (§5.7.1, type 24): several NALs, each prefixed with a
///   16-bit size.
/// - **FU-A** (§5.8, type 28): one NAL split across packets. The first
///   fragment has S set, the last has E set; the original NAL header is
///   rebuilt from the FU indicator's F/NRI and the FU header's type:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]
///   FU header:     [S|E|R|NAL_Type]
///   ```
///
/// STAP-B, MTAP and FU-B only exist in interleaved mode and are rejected.
/// The access unit is emitted on the packet carrying the RTP marker bit.
#[derive(Debug, Default)]
pub struct H264Depacketizer {
    assembler: NalAssembler,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_fu_a(&mut self, payload: &Bytes) -> Result<(), DepacketizeError> {
        if payload.len() < 2 {
            return Err(DepacketizeError::Malformed("FU-A shorter than its headers"));
        }
        let indicator = payload[0];
        let header = payload[1];
        let start = header & 0x80 != 0;
        let end = header & 0x40 != 0;
        let data = &payload[2..];

        if start {
            if end {
                return Err(DepacketizeError::Malformed("FU-A with both start and end bits"));
            }
            let nal_header = (indicator & 0xE0) | (header & 0x1F);
            self.assembler.start_fragment(&[nal_header], data)?;
        } else {
            self.assembler.continue_fragment(data)?;
        }

        if end {
            self.assembler.finish_fragment()?;
        }
        Ok(())
    }
}

impl Depacketizer for H264Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError> {
        let payload = &packet.payload;
        if payload.is_empty() {
            return Err(DepacketizeError::EmptyPayload);
        }
        self.assembler.begin_packet(packet.timestamp);

        match nal_type(payload) {
            FU_A => self.handle_fu_a(payload)?,
            STAP_A => {
                self.assembler.abandon_fragment();
                for nal in split_aggregate(&payload[1..])? {
                    self.assembler.push_unit(nal)?;
                }
            }
            t @ (STAP_B | MTAP16 | MTAP24 | FU_B) => {
                return Err(DepacketizeError::UnsupportedType(t));
            }
            1..=23 => {
                self.assembler.abandon_fragment();
                self.assembler.push_unit(payload.clone())?;
            }
            t => return Err(DepacketizeError::UnsupportedType(t)),
        }

        if !packet.marker {
            return Ok(None);
        }
        let unit = self.assembler.finish_access_unit();
        if let Some(au) = &unit {
            tracing::trace!(
                units = au.units.len(),
                ts = au.rtp_timestamp,
                "H.264 access unit complete"
            );
        }
        Ok(unit)
    }

    fn reset(&mut self) {
        self.assembler.reset();
    }
}

/// Decode `sprop-parameter-sets` (RFC 6184 §8.1): comma-separated base64
/// NAL units. Returns `(sps, pps)`; both must be present.
pub fn parse_sprop_parameter_sets(value: &str) -> Result<(Vec<u8>, Vec<u8>), ParameterSetError> {
    let mut sps = None;
    let mut pps = None;

    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let nal = BASE64_STANDARD
            .decode(part)
            .map_err(|_| ParameterSetError::Encoding {
                name: "sprop-parameter-sets",
            })?;
        match nal_type(&nal) {
            NAL_SPS if sps.is_none() => sps = Some(nal),
            NAL_PPS if pps.is_none() => pps = Some(nal),
            other => {
                tracing::debug!(nal_type = other, "ignoring extra parameter set NAL");
            }
        }
    }

    match (sps, pps) {
        (Some(sps), Some(pps)) => Ok((sps, pps)),
        (None, _) => Err(ParameterSetError::Missing("SPS")),
        (_, None) => Err(ParameterSetError::Missing("PPS")),
    }
}
