//! Where framed packets go: the downstream queue, the snapshot slot and the
//! liveness counters a supervisor watches.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::CaptureConfig;
use crate::decoder::FrameDecoder;
use crate::error::DecodeError;
use crate::snapshot;
use crate::stream::Packet;

/// Downstream consumer of framed packets.
///
/// Called from the per-media delivery threads. Implementations must return
/// promptly; buffering and drop policy are theirs to decide.
pub trait PacketQueue: Send + Sync {
    fn write_packet(&self, packet: Packet);
}

/// Bounded in-memory queue that drops the newest packet when full.
#[derive(Debug)]
pub struct BoundedQueue {
    tx: Sender<Packet>,
    rx: Receiver<Packet>,
    dropped: AtomicU64,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// A receiving end; clones share the same queue.
    pub fn receiver(&self) -> Receiver<Packet> {
        self.rx.clone()
    }

    /// Packets discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl PacketQueue for BoundedQueue {
    fn write_packet(&self, packet: Packet) {
        match self.tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(p)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    stream_index = p.stream_index,
                    dropped,
                    "packet queue full, dropping packet"
                );
            }
            // Unreachable while `self.rx` is alive.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Holds the latest base64 JPEG snapshot.
#[derive(Debug, Default)]
pub struct SnapshotSlot {
    latest: RwLock<Option<String>>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, encoded: String) {
        *self.latest.write() = Some(encoded);
    }

    pub fn latest(&self) -> Option<String> {
        self.latest.read().clone()
    }
}

/// Keyframe counter (wrapping at 1000) and last-activity time.
#[derive(Debug, Default)]
pub struct Liveness {
    counter: AtomicU64,
    last_activity: AtomicI64,
}

impl Liveness {
    pub const COUNTER_MODULUS: u64 = 1000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record one keyframe arrival.
    pub fn record(&self) {
        let _ = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some((c + 1) % Self::COUNTER_MODULUS)
            });
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        self.last_activity.store(now, Ordering::Relaxed);
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Unix seconds of the last keyframe, 0 if none yet.
    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }
}

/// The external collaborators a session delivers into.
#[derive(Clone)]
pub struct SinkTargets {
    pub queue: Arc<dyn PacketQueue>,
    pub snapshots: Arc<SnapshotSlot>,
    pub liveness: Arc<Liveness>,
}

impl SinkTargets {
    /// Targets with a fresh snapshot slot and liveness counters.
    pub fn new(queue: Arc<dyn PacketQueue>) -> Self {
        Self {
            queue,
            snapshots: Arc::new(SnapshotSlot::new()),
            liveness: Arc::new(Liveness::new()),
        }
    }
}

/// Hands packets to the queue and does the keyframe side work.
pub struct PacketSink {
    targets: SinkTargets,
    decoder: Arc<FrameDecoder>,
    primary_video: Option<usize>,
    snapshots_enabled: bool,
    snapshot_quality: u8,
}

impl PacketSink {
    pub fn new(
        targets: SinkTargets,
        decoder: Arc<FrameDecoder>,
        primary_video: Option<usize>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            targets,
            decoder,
            primary_video,
            snapshots_enabled: config.snapshots_enabled,
            snapshot_quality: config.snapshot_quality,
        }
    }

    /// Deliver one packet.
    ///
    /// Primary-video keyframes also refresh the snapshot (when enabled) and,
    /// unless `cancel` fired meanwhile, advance the liveness counters.
    pub fn accept(&self, packet: Packet, cancel: &CancellationToken) {
        let primary_keyframe =
            packet.is_key_frame && self.primary_video == Some(packet.stream_index);
        let snapshot_input = (primary_keyframe && self.snapshots_enabled).then(|| packet.data.clone());

        self.targets.queue.write_packet(packet);

        if let Some(data) = snapshot_input {
            self.refresh_snapshot(&data);
        }

        if cancel.is_cancelled() {
            return;
        }
        if primary_keyframe {
            self.targets.liveness.record();
        }
    }

    fn refresh_snapshot(&self, access_unit: &[u8]) {
        let picture = match self.decoder.decode(access_unit) {
            Ok(picture) => picture,
            Err(DecodeError::EmptyFrame | DecodeError::NoDecoderConfigured) => return,
            Err(err) => {
                tracing::debug!(error = %err, "snapshot decode failed");
                return;
            }
        };
        match snapshot::encode_base64(&picture, self.snapshot_quality) {
            Ok(encoded) => self.targets.snapshots.publish(encoded),
            Err(err) => tracing::warn!(error = %err, "snapshot encoding failed"),
        }
    }
}
