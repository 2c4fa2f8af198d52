//! Capture session: negotiation, wiring and delivery for one camera.
//!
//! A [`Session`] is built by [`Session::connect`], which runs the whole
//! negotiation pass:
//!
//! ```text
//! OPTIONS   -> advertised methods (keepalive choice)
//! DESCRIBE  -> SDP, media selection (negotiator)
//! SETUP     -> one per selected media, interleaved channels 2i / 2i+1
//! ```
//!
//! The resulting session is `Ready`: streams are registered, depacketizers,
//! framer and decoder are wired, but nothing flows until
//! [`Session::start`] issues PLAY and spawns the delivery threads.
//!
//! ## Lifecycle
//!
//! ```text
//! connect()     Disconnected -> Negotiating -> Ready
//! start()       Ready -> Playing
//! close()       * -> Closed           (also on connection loss or cancel)
//! ```
//!
//! Nothing here retries. A closed session stays closed; the supervisor
//! builds a new one.

mod delivery;
pub mod negotiator;
pub mod pipeline;
pub mod state;
pub mod timeline;

use std::sync::Arc;
use std::thread;

use tokio_util::sync::CancellationToken;

use crate::config::CaptureConfig;
use crate::decoder::FrameDecoder;
use crate::error::{CaptureError, Result};
use crate::sink::{PacketSink, SinkTargets};
use crate::stream::{Stream, StreamFilter, filter_streams};
use crate::transport::tcp::{self, Channels, RequestWriter, RtspConnection};
use crate::transport::channels_for;
use delivery::{Delivery, Keepalive};
use negotiator::MediaPlan;
use pipeline::MediaPipeline;

pub(crate) use delivery::spawn_reader;
pub use state::SessionState;
use state::StateCell;

/// One RTSP capture session against a camera.
pub struct Session {
    config: CaptureConfig,
    state: Arc<StateCell>,
    streams: Vec<Stream>,
    /// Media that were set up, parallel to `streams`.
    media: Vec<(Channels, MediaPlan)>,
    /// Held until `start` hands the read half to the reader thread.
    connection: Option<RtspConnection>,
    writer: RequestWriter,
    aggregate_url: String,
    decoder: Arc<FrameDecoder>,
    cancel: CancellationToken,
    delivery: Option<Delivery>,
}

impl Session {
    /// Connect, describe and set up the camera's media.
    ///
    /// Missing video or audio is tolerated; a session with no usable media
    /// at all fails with [`CaptureError::NoMedia`]. Parameter-set failures
    /// and transport errors abort the pass.
    pub fn connect(config: &CaptureConfig) -> Result<Self> {
        let state = Arc::new(StateCell::new());
        state.transition(SessionState::Negotiating)?;

        let mut conn = RtspConnection::connect(config)?;
        conn.options()?;
        let (sdp, base) = conn.describe(false)?;
        tracing::debug!(medias = sdp.medias.len(), base = %base, "session description received");

        let plans = negotiator::plan_capture(&sdp, &base)?;
        if plans.is_empty() {
            return Err(CaptureError::NoMedia);
        }

        let mut streams = Vec::with_capacity(plans.len());
        let mut media = Vec::with_capacity(plans.len());
        for plan in plans {
            let requested = channels_for(media.len());
            let Some(granted) = conn.setup(&plan.control_url, requested, false)? else {
                tracing::warn!(codec = %plan.codec(), "media skipped after SETUP refusal");
                continue;
            };
            let stream = plan.stream(streams.len());
            tracing::info!(
                stream_index = stream.index,
                codec = %stream.codec,
                channel = granted.rtp,
                "stream registered"
            );
            streams.push(stream);
            media.push((granted, plan));
        }
        if media.is_empty() {
            return Err(CaptureError::NoMedia);
        }

        let decoder = match streams.iter().find(|s| s.is_video) {
            Some(video) => match FrameDecoder::new(video.codec) {
                Ok(decoder) => decoder,
                Err(err) => {
                    tracing::info!(codec = %video.codec, error = %err, "snapshots unavailable");
                    FrameDecoder::unconfigured()
                }
            },
            None => FrameDecoder::unconfigured(),
        };

        state.transition(SessionState::Ready)?;
        Ok(Self {
            config: config.clone(),
            state,
            streams,
            media,
            writer: conn.writer(),
            aggregate_url: conn.aggregate_url().to_string(),
            connection: Some(conn),
            decoder: Arc::new(decoder),
            cancel: CancellationToken::new(),
            delivery: None,
        })
    }

    /// Start delivery into `targets`: wire the per-media pipelines, wait the
    /// settle delay, PLAY, then spawn the reader, workers and keepalive.
    pub fn start(&mut self, targets: SinkTargets) -> Result<()> {
        let found = self.state();
        if found != SessionState::Ready {
            return Err(CaptureError::InvalidState {
                expected: "Ready",
                found: found.name(),
            });
        }
        let Some(mut conn) = self.connection.take() else {
            return Err(CaptureError::InvalidState {
                expected: "Ready",
                found: "started",
            });
        };

        let primary_video = self.streams.iter().find(|s| s.is_video).map(|s| s.index);
        let sink = Arc::new(PacketSink::new(
            targets,
            self.decoder.clone(),
            primary_video,
            &self.config,
        ));
        let pipelines = self
            .media
            .iter()
            .zip(&self.streams)
            .map(|((channels, plan), stream)| {
                (
                    channels.rtp,
                    MediaPipeline::new(stream.index, plan, sink.clone(), self.cancel.clone()),
                )
            })
            .collect();

        if !self.config.settle_delay.is_zero() {
            thread::sleep(self.config.settle_delay);
        }
        if let Err(err) = conn.play() {
            self.state.close();
            return Err(err);
        }

        let keepalive = self.config.keepalive.then(|| Keepalive {
            method: conn.keepalive_method(),
            url: self.aggregate_url.clone(),
            interval: tcp::keepalive_interval(conn.session_timeout()),
        });
        let (reader, writer) = conn.into_reader();
        let delivery = Delivery::start(
            reader,
            writer,
            pipelines,
            keepalive,
            self.cancel.clone(),
            self.state.clone(),
        )?;
        self.delivery = Some(delivery);
        self.state.transition(SessionState::Playing)?;
        tracing::info!(streams = self.streams.len(), "capture playing");
        Ok(())
    }

    /// All registered streams, in index order.
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn filtered_streams(&self, filter: StreamFilter) -> Vec<Stream> {
        filter_streams(&self.streams, filter)
    }

    pub fn video_streams(&self) -> Vec<Stream> {
        self.filtered_streams(StreamFilter::Video)
    }

    pub fn audio_streams(&self) -> Vec<Stream> {
        self.filtered_streams(StreamFilter::Audio)
    }

    /// Decoder for the active video codec. Unconfigured when the session has
    /// no video or no native backend.
    pub fn decoder(&self) -> Arc<FrameDecoder> {
        self.decoder.clone()
    }

    /// Token polled by the packet handlers. Cancelling it stops new
    /// processing and collapses the session to `Closed`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            self.state.close();
        }
        self.state.get()
    }

    /// Stop delivery, TEARDOWN (best effort) and release the decoder.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        let was_open = self.state.close();
        self.cancel.cancel();
        if was_open {
            tcp::send_teardown(&self.writer, &self.aggregate_url);
        }
        self.writer.shutdown();
        self.connection.take();
        if let Some(delivery) = self.delivery.take() {
            delivery.join();
        }
        self.decoder.close();
        if was_open {
            tracing::info!("capture session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.aggregate_url)
            .field("state", &self.state.get())
            .field("streams", &self.streams)
            .finish()
    }
}
