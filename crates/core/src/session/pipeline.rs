use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::negotiator::{MediaPlan, MediaWiring};
use super::timeline::Timeline;
use crate::media::aac::{self, AudioSpecificConfig};
use crate::media::framer::AccessUnitFramer;
use crate::media::rtp::RtpPacket;
use crate::media::{AccessUnit, Depacketizer};
use crate::sink::PacketSink;
use crate::stream::{Codec, Packet};

/// How reassembled units become a packet payload.
enum Framing {
    Video(AccessUnitFramer),
    /// Units concatenated as-is (G.711).
    Raw,
    /// One ADTS frame per unit.
    Adts(AudioSpecificConfig),
}

/// Per-media packet handler: RTP → depacketizer → framing → sink.
///
/// Owned by exactly one delivery worker, which feeds it packets in receive
/// order.
pub struct MediaPipeline {
    stream_index: usize,
    codec: Codec,
    depacketizer: Box<dyn Depacketizer>,
    framing: Framing,
    timeline: Timeline,
    last_sequence: Option<u16>,
    sink: Arc<PacketSink>,
    cancel: CancellationToken,
}

impl MediaPipeline {
    pub fn new(
        stream_index: usize,
        plan: &MediaPlan,
        sink: Arc<PacketSink>,
        cancel: CancellationToken,
    ) -> Self {
        let framing = match (&plan.wiring, plan.wiring.framer()) {
            (_, Some(framer)) => Framing::Video(framer),
            (MediaWiring::Aac(format), None) => Framing::Adts(format.config),
            _ => Framing::Raw,
        };
        Self {
            stream_index,
            codec: plan.codec(),
            depacketizer: plan.wiring.depacketizer(),
            framing,
            timeline: Timeline::new(plan.clock_rate),
            last_sequence: None,
            sink,
            cancel,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Handle one RTP packet as received on this media's channel.
    ///
    /// Every failure is absorbed here; the packet simply produces nothing.
    pub fn handle(&mut self, raw: Bytes) {
        if self.cancel.is_cancelled() {
            return;
        }

        let packet = match RtpPacket::parse(raw) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::debug!(stream_index = self.stream_index, error = %err, "dropping malformed RTP packet");
                return;
            }
        };
        self.track_sequence(packet.sequence);

        let unit = match self.depacketizer.depacketize(&packet) {
            Ok(Some(unit)) => unit,
            Ok(None) => return,
            Err(err) if err.is_benign() => {
                tracing::trace!(stream_index = self.stream_index, error = %err, "packet discarded");
                return;
            }
            Err(err) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    codec = %self.codec,
                    sequence = packet.sequence,
                    error = %err,
                    "depacketization failed"
                );
                return;
            }
        };

        if let Some(out) = self.frame(unit, &packet) {
            self.sink.accept(out, &self.cancel);
        }
    }

    fn track_sequence(&mut self, sequence: u16) {
        if let Some(prev) = self.last_sequence {
            let expected = prev.wrapping_add(1);
            if sequence != expected {
                tracing::debug!(
                    stream_index = self.stream_index,
                    expected,
                    got = sequence,
                    "RTP sequence gap, resetting depacketizer"
                );
                self.depacketizer.reset();
            }
        }
        self.last_sequence = Some(sequence);
    }

    fn frame(&mut self, unit: AccessUnit, packet: &RtpPacket) -> Option<Packet> {
        let pts = self.timeline.advance(unit.rtp_timestamp);
        let (is_key_frame, data) = match &mut self.framing {
            Framing::Video(framer) => {
                let framed = framer.frame(unit.units, pts)?;
                (framed.is_key_frame, framed.data)
            }
            Framing::Raw => (false, concat(unit.units)),
            Framing::Adts(config) => match aac::write_adts(config, &unit.units) {
                Ok(adts) => (false, Bytes::from(adts)),
                Err(err) => {
                    tracing::debug!(stream_index = self.stream_index, error = %err, "ADTS framing failed");
                    return None;
                }
            },
        };

        Some(Packet {
            stream_index: self.stream_index,
            codec: self.codec,
            is_key_frame,
            data,
            pts,
            dts: pts,
            raw_frame: packet.raw.clone(),
        })
    }
}

fn concat(mut units: Vec<Bytes>) -> Bytes {
    if units.len() == 1 {
        return units.swap_remove(0);
    }
    units.concat().into()
}
