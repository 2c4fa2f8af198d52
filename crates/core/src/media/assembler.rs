use bytes::{Bytes, BytesMut};

use super::AccessUnit;
use crate::error::DepacketizeError;

/// Upper bound on a reassembled access unit, in bytes.
pub const MAX_ACCESS_UNIT_SIZE: usize = 8 * 1024 * 1024;

/// Upper bound on NAL units per access unit.
pub const MAX_NALUS_PER_ACCESS_UNIT: usize = 32;

/// Fragment and access-unit bookkeeping shared by the H.264 and H.265
/// depacketizers. The codec modules only differ in how they read NAL and
/// fragmentation headers.
#[derive(Debug, Default)]
pub(crate) struct NalAssembler {
    fragment: BytesMut,
    fragmenting: bool,
    units: Vec<Bytes>,
    size: usize,
    timestamp: Option<u32>,
}

impl NalAssembler {
    /// Called before handling a packet's payload.
    ///
    /// A timestamp change with units still pending means the packet carrying
    /// the marker bit was lost; those units can never form a complete access
    /// unit and are discarded.
    pub fn begin_packet(&mut self, timestamp: u32) {
        if self.timestamp.is_some_and(|ts| ts != timestamp) && !self.units.is_empty() {
            tracing::debug!(
                dropped_units = self.units.len(),
                "access unit ended without marker, discarding"
            );
            self.units.clear();
            self.size = 0;
        }
        self.timestamp = Some(timestamp);
    }

    /// Start a fragmented NAL with its reconstructed header.
    pub fn start_fragment(&mut self, header: &[u8], data: &[u8]) -> Result<(), DepacketizeError> {
        if self.fragmenting {
            tracing::debug!(
                bytes = self.fragment.len(),
                "new fragment start while previous fragment incomplete, discarding"
            );
        }
        self.fragment.clear();
        self.fragment.extend_from_slice(header);
        self.fragment.extend_from_slice(data);
        self.fragmenting = true;
        self.check_fragment_size()
    }

    /// Append a continuation fragment.
    pub fn continue_fragment(&mut self, data: &[u8]) -> Result<(), DepacketizeError> {
        if !self.fragmenting {
            return Err(DepacketizeError::NonStartingPacketAndNoPrevious);
        }
        self.fragment.extend_from_slice(data);
        self.check_fragment_size()
    }

    /// Complete the current fragmented NAL and add it to the access unit.
    pub fn finish_fragment(&mut self) -> Result<(), DepacketizeError> {
        self.fragmenting = false;
        let nal = self.fragment.split().freeze();
        self.push_unit(nal)
    }

    /// Whether a fragmented NAL is in progress.
    pub fn is_fragmenting(&self) -> bool {
        self.fragmenting
    }

    /// Discard an in-progress fragment (a non-fragment packet interrupted it).
    pub fn abandon_fragment(&mut self) {
        if self.fragmenting {
            tracing::debug!(
                bytes = self.fragment.len(),
                "fragment interrupted by unfragmented packet, discarding"
            );
            self.fragment.clear();
            self.fragmenting = false;
        }
    }

    /// Add a complete NAL unit to the pending access unit.
    pub fn push_unit(&mut self, nal: Bytes) -> Result<(), DepacketizeError> {
        if nal.is_empty() {
            return Ok(());
        }
        if self.units.len() >= MAX_NALUS_PER_ACCESS_UNIT {
            self.reset();
            return Err(DepacketizeError::Malformed("too many NAL units in access unit"));
        }
        if self.size + nal.len() > MAX_ACCESS_UNIT_SIZE {
            self.reset();
            return Err(DepacketizeError::TooLarge(MAX_ACCESS_UNIT_SIZE));
        }
        self.size += nal.len();
        self.units.push(nal);
        Ok(())
    }

    /// Emit the pending access unit (on the marker bit).
    pub fn finish_access_unit(&mut self) -> Option<AccessUnit> {
        self.abandon_fragment();
        if self.units.is_empty() {
            return None;
        }
        self.size = 0;
        Some(AccessUnit {
            units: std::mem::take(&mut self.units),
            rtp_timestamp: self.timestamp.unwrap_or_default(),
        })
    }

    pub fn reset(&mut self) {
        self.fragment.clear();
        self.fragmenting = false;
        self.units.clear();
        self.size = 0;
    }

    fn check_fragment_size(&mut self) -> Result<(), DepacketizeError> {
        if self.size + self.fragment.len() > MAX_ACCESS_UNIT_SIZE {
            self.reset();
            return Err(DepacketizeError::TooLarge(MAX_ACCESS_UNIT_SIZE));
        }
        Ok(())
    }
}

/// Split a length-prefixed aggregation payload (STAP-A / AP) into NAL units.
pub(crate) fn split_aggregate(mut payload: &[u8]) -> Result<Vec<Bytes>, DepacketizeError> {
    let mut units = Vec::new();
    while !payload.is_empty() {
        if payload.len() < 2 {
            return Err(DepacketizeError::Malformed("aggregation unit size truncated"));
        }
        let size = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        payload = &payload[2..];
        if size == 0 {
            // Some encoders pad aggregation packets with zero bytes.
            break;
        }
        if size > payload.len() {
            return Err(DepacketizeError::Malformed("aggregation unit exceeds payload"));
        }
        units.push(Bytes::copy_from_slice(&payload[..size]));
        payload = &payload[size..];
    }
    if units.is_empty() {
        return Err(DepacketizeError::Malformed("aggregation packet without units"));
    }
    Ok(units)
}
