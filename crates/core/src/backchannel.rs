//! Outbound audio to the camera (ONVIF back-channel, talk-back).
//!
//! The back-channel is its own negotiation pass on its own connection:
//! DESCRIBE and SETUP carry `Require: www.onvif.org/ver20/backchannel`, and
//! only a camera-receive (`a=sendonly`) PCMU media is selected. Audio then
//! flows camera-ward as interleaved RTP on that media's channel.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::media::Packetizer;
use crate::media::g711::G711Packetizer;
use crate::session::negotiator;
use crate::session::spawn_reader;
use crate::stream::{Packet, Stream};
use crate::transport::tcp::{self, Channels, RequestWriter, RtspConnection};
use crate::transport::channels_for;

/// Result of a back-channel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The frame(s) went out on the wire.
    Sent,
    /// No back-channel media is set up; nothing was sent.
    Unsupported,
}

struct Outbound {
    stream: Stream,
    channels: Channels,
    packetizer: Mutex<G711Packetizer>,
}

/// Writer for the camera's audio back-channel.
pub struct BackChannelWriter {
    outbound: Option<Outbound>,
    connection: Option<RtspConnection>,
    writer: RequestWriter,
    aggregate_url: String,
    settle_delay: std::time::Duration,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl BackChannelWriter {
    /// Negotiate the back-channel. A camera without one is not an error;
    /// check [`has_back_channel`](Self::has_back_channel).
    pub fn connect(config: &CaptureConfig) -> Result<Self> {
        let mut conn = RtspConnection::connect(config)?;
        conn.options()?;
        let (sdp, base) = conn.describe(true)?;

        let mut outbound = None;
        match negotiator::plan_back_channel(&sdp, &base) {
            Some(plan) => {
                if let Some(channels) = conn.setup(&plan.control_url, channels_for(0), true)? {
                    tracing::info!(
                        payload_type = plan.payload_type,
                        channel = channels.rtp,
                        "back-channel set up"
                    );
                    outbound = Some(Outbound {
                        stream: plan.stream(0),
                        channels,
                        packetizer: Mutex::new(G711Packetizer::with_random_ssrc(plan.payload_type)),
                    });
                }
            }
            None => tracing::info!("camera offers no back-channel"),
        }

        Ok(Self {
            outbound,
            writer: conn.writer(),
            aggregate_url: conn.aggregate_url().to_string(),
            connection: Some(conn),
            settle_delay: config.settle_delay,
            cancel: CancellationToken::new(),
            reader: None,
            closed: false,
        })
    }

    pub fn has_back_channel(&self) -> bool {
        self.outbound.is_some()
    }

    /// The back-channel stream entry, if one was set up.
    pub fn stream(&self) -> Option<&Stream> {
        self.outbound.as_ref().map(|o| &o.stream)
    }

    /// Wait the settle delay, then PLAY. A no-op without a back-channel.
    pub fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(CaptureError::InvalidState {
                expected: "Ready",
                found: "Closed",
            });
        }
        if self.outbound.is_none() {
            return Ok(());
        }
        let Some(mut conn) = self.connection.take() else {
            return Err(CaptureError::InvalidState {
                expected: "Ready",
                found: "Playing",
            });
        };

        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }
        conn.play()?;

        // Keep reading so keepalive replies and RTCP never back up the socket.
        let (reader, writer) = conn.into_reader();
        self.reader = Some(spawn_reader(
            reader,
            writer,
            HashMap::new(),
            self.cancel.clone(),
            None,
        )?);
        tracing::info!("back-channel playing");
        Ok(())
    }

    /// Replay a packet's retained RTP frame on the back-channel verbatim.
    ///
    /// Returns [`WriteOutcome::Unsupported`] when there is no back-channel
    /// or the packet carries no frame.
    pub fn write_packet(&self, packet: &Packet) -> Result<WriteOutcome> {
        let Some(outbound) = self.writable()? else {
            return Ok(WriteOutcome::Unsupported);
        };
        if packet.raw_frame.is_empty() {
            tracing::debug!(stream_index = packet.stream_index, "packet has no transport frame to replay");
            return Ok(WriteOutcome::Unsupported);
        }
        self.writer.send_data(outbound.channels.rtp, &packet.raw_frame)?;
        Ok(WriteOutcome::Sent)
    }

    /// Packetize raw mu-law samples (8 kHz) and send them.
    pub fn write_samples(&self, samples: &[u8]) -> Result<WriteOutcome> {
        let Some(outbound) = self.writable()? else {
            return Ok(WriteOutcome::Unsupported);
        };
        let packets = outbound.packetizer.lock().packetize(samples);
        for rtp in &packets {
            self.writer.send_data(outbound.channels.rtp, rtp)?;
        }
        Ok(WriteOutcome::Sent)
    }

    fn writable(&self) -> Result<Option<&Outbound>> {
        let Some(outbound) = &self.outbound else {
            return Ok(None);
        };
        if self.closed {
            return Err(CaptureError::InvalidState {
                expected: "Playing",
                found: "Closed",
            });
        }
        if self.reader.is_none() {
            return Err(CaptureError::InvalidState {
                expected: "Playing",
                found: "Ready",
            });
        }
        Ok(Some(outbound))
    }

    /// TEARDOWN (best effort) and close the connection. Idempotent.
    pub fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        self.cancel.cancel();
        if self.outbound.is_some() {
            tcp::send_teardown(&self.writer, &self.aggregate_url);
        }
        self.writer.shutdown();
        self.connection.take();
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            tracing::error!("back-channel reader panicked");
        }
        tracing::debug!("back-channel closed");
    }
}

impl Drop for BackChannelWriter {
    fn drop(&mut self) {
        self.close();
    }
}
