//! Turns reassembled video access units into self-contained Annex-B packets.
//!
//! Every emitted packet starts with an access unit delimiter. Keyframes
//! (H.264 IDR, H.265 IDR/CRA) additionally carry the current parameter
//! sets right after the delimiter, so a consumer can start decoding from
//! any keyframe without out-of-band configuration:
//!
//! ```text
//! H.264 keyframe:  AUD SPS PPS <slices...>
//! H.265 keyframe:  AUD VPS SPS PPS <slices...>
//! otherwise:       AUD <slices...>
//! ```
//!
//! Parameter sets found inside an access unit replace the stored copies and
//! are removed from the unit, so they are never emitted twice.

use std::time::Duration;

use bytes::Bytes;

use super::{annexb, h264, h265};
use crate::stream::Codec;

/// One framed video access unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedUnit {
    pub is_key_frame: bool,
    /// Annex-B byte stream, 4-byte start codes.
    pub data: Bytes,
    pub pts: Duration,
    /// Always equal to `pts`; no reordering happens at this layer.
    pub dts: Duration,
}

/// Codec-specific framing state, chosen once at negotiation.
#[derive(Debug, Clone)]
pub enum AccessUnitFramer {
    H264 {
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    H265 {
        vps: Vec<u8>,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
}

impl AccessUnitFramer {
    pub fn h264(sps: Vec<u8>, pps: Vec<u8>) -> Self {
        Self::H264 { sps, pps }
    }

    pub fn h265(vps: Vec<u8>, sps: Vec<u8>, pps: Vec<u8>) -> Self {
        Self::H265 { vps, sps, pps }
    }

    pub fn codec(&self) -> Codec {
        match self {
            Self::H264 { .. } => Codec::H264,
            Self::H265 { .. } => Codec::H265,
        }
    }

    /// Frame one access unit. Returns `None` when nothing decodable remains
    /// after delimiters and parameter sets are stripped.
    pub fn frame(&mut self, units: Vec<Bytes>, pts: Duration) -> Option<FramedUnit> {
        let (is_key_frame, data) = match self {
            Self::H264 { sps, pps } => frame_h264(sps, pps, units)?,
            Self::H265 { vps, sps, pps } => frame_h265(vps, sps, pps, units)?,
        };
        Some(FramedUnit {
            is_key_frame,
            data: Bytes::from(data),
            pts,
            dts: pts,
        })
    }
}

fn replace_if_changed(stored: &mut Vec<u8>, nal: &[u8], name: &'static str) {
    if stored.as_slice() != nal {
        tracing::debug!(parameter_set = name, len = nal.len(), "in-band parameter set update");
        *stored = nal.to_vec();
    }
}

fn frame_h264(sps: &mut Vec<u8>, pps: &mut Vec<u8>, units: Vec<Bytes>) -> Option<(bool, Vec<u8>)> {
    let mut idr_present = false;
    let mut slice_present = false;
    let mut filtered = Vec::with_capacity(units.len());

    for nal in units {
        match h264::nal_type(&nal) {
            h264::NAL_AUD => continue,
            h264::NAL_SPS => {
                replace_if_changed(sps, &nal, "SPS");
                continue;
            }
            h264::NAL_PPS => {
                replace_if_changed(pps, &nal, "PPS");
                continue;
            }
            h264::NAL_IDR => idr_present = true,
            h264::NAL_SLICE => slice_present = true,
            _ => {}
        }
        filtered.push(nal);
    }

    if !idr_present && !slice_present {
        return None;
    }

    let mut out: Vec<&[u8]> = Vec::with_capacity(filtered.len() + 3);
    out.push(&h264::AUD_NAL);
    if idr_present {
        out.push(sps.as_slice());
        out.push(pps.as_slice());
    }
    out.extend(filtered.iter().map(|b| b.as_ref()));
    Some((idr_present, annexb::marshal(&out)))
}

fn frame_h265(
    vps: &mut Vec<u8>,
    sps: &mut Vec<u8>,
    pps: &mut Vec<u8>,
    units: Vec<Bytes>,
) -> Option<(bool, Vec<u8>)> {
    let mut random_access = false;
    let mut filtered = Vec::with_capacity(units.len());

    for nal in units {
        match h265::nal_type(&nal) {
            h265::NAL_AUD => continue,
            h265::NAL_VPS => {
                replace_if_changed(vps, &nal, "VPS");
                continue;
            }
            h265::NAL_SPS => {
                replace_if_changed(sps, &nal, "SPS");
                continue;
            }
            h265::NAL_PPS => {
                replace_if_changed(pps, &nal, "PPS");
                continue;
            }
            t if h265::is_random_access(t) => random_access = true,
            _ => {}
        }
        filtered.push(nal);
    }

    if filtered.is_empty() {
        return None;
    }

    let mut out: Vec<&[u8]> = Vec::with_capacity(filtered.len() + 4);
    out.push(&h265::AUD_NAL);
    if random_access {
        out.push(vps.as_slice());
        out.push(sps.as_slice());
        out.push(pps.as_slice());
    }
    out.extend(filtered.iter().map(|b| b.as_ref()));
    Some((random_access, annexb::marshal(&out)))
}
