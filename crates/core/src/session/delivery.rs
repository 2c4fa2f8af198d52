//! Threads that run a playing session.
//!
//! - one **reader** owns the read half of the connection and demultiplexes
//!   interleaved frames by channel,
//! - one **worker** per media drains its channel queue into a
//!   [`MediaPipeline`], so media never wait on each other,
//! - an optional **keepalive** thread refreshes the RTSP session.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tokio_util::sync::CancellationToken;

use super::pipeline::MediaPipeline;
use super::state::StateCell;
use crate::error::{CaptureError, Result};
use crate::protocol::RtspRequest;
use crate::transport::interleaved::{self, Frame};
use crate::transport::tcp::{self, RequestWriter};

/// Packets buffered per media between the reader and its worker.
const MEDIA_QUEUE_DEPTH: usize = 256;

/// Keepalive parameters.
pub(crate) struct Keepalive {
    pub method: &'static str,
    pub url: String,
    pub interval: Duration,
}

/// Running delivery threads.
pub(crate) struct Delivery {
    threads: Vec<JoinHandle<()>>,
    keepalive_stop: Option<Sender<()>>,
}

impl Delivery {
    /// Spawn the reader, one worker per pipeline (keyed by its RTP channel)
    /// and, if requested, the keepalive thread.
    pub(crate) fn start(
        reader: BufReader<TcpStream>,
        writer: RequestWriter,
        pipelines: Vec<(u8, MediaPipeline)>,
        keepalive: Option<Keepalive>,
        cancel: CancellationToken,
        state: Arc<StateCell>,
    ) -> Result<Self> {
        let mut threads = Vec::with_capacity(pipelines.len() + 2);
        let mut routes = HashMap::with_capacity(pipelines.len());

        for (channel, pipeline) in pipelines {
            let (tx, rx) = crossbeam_channel::bounded(MEDIA_QUEUE_DEPTH);
            routes.insert(channel, tx);
            let name = format!("capture-media-{}", pipeline.stream_index());
            threads.push(spawn(name, move || run_worker(pipeline, rx))?);
        }

        threads.push(spawn_reader(reader, writer.clone(), routes, cancel, Some(state))?);

        let mut keepalive_stop = None;
        if let Some(keepalive) = keepalive {
            let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
            keepalive_stop = Some(stop_tx);
            threads.push(spawn("capture-keepalive".into(), move || {
                run_keepalive(writer, keepalive, stop_rx)
            })?);
        }

        Ok(Self {
            threads,
            keepalive_stop,
        })
    }

    /// Stop the keepalive and wait for all threads. The connection must
    /// already be shut down so the reader unblocks.
    pub(crate) fn join(mut self) {
        self.keepalive_stop.take();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("capture").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "delivery thread panicked");
            }
        }
    }
}

fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(CaptureError::Io)
}

/// Spawn the connection reader.
///
/// Data frames go to `routes` by channel; frames on unknown channels
/// (RTCP, media we did not set up) are dropped. Camera requests are
/// answered `501`. When the connection fails outside of a requested
/// shutdown, `cancel` fires and `state` (if any) moves to `Closed`.
pub(crate) fn spawn_reader(
    mut reader: BufReader<TcpStream>,
    writer: RequestWriter,
    routes: HashMap<u8, Sender<Bytes>>,
    cancel: CancellationToken,
    state: Option<Arc<StateCell>>,
) -> Result<JoinHandle<()>> {
    // Media may pause for longer than any request timeout; shutdown
    // unblocks the read instead.
    reader.get_ref().set_read_timeout(None)?;

    spawn("capture-reader".into(), move || {
        let reason = loop {
            let frame = match interleaved::read_frame(&mut reader) {
                Ok(frame) => frame,
                Err(err) => break err,
            };
            match frame {
                Frame::Data { channel, payload } => match routes.get(&channel) {
                    Some(tx) => match tx.try_send(payload) {
                        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::debug!(channel, "media queue full, dropping RTP packet");
                        }
                    },
                    None => tracing::trace!(channel, "frame on unrouted channel"),
                },
                Frame::Response(response) => {
                    tracing::trace!(status = response.status_code, cseq = ?response.cseq(), "keepalive response");
                }
                Frame::Request(request) => {
                    if let Err(err) = tcp::answer_camera_request(&writer, &request) {
                        break CaptureError::Io(err);
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            tracing::debug!("reader stopped");
            return;
        }
        tracing::warn!(error = %reason, "camera connection lost");
        cancel.cancel();
        if let Some(state) = state {
            state.close();
        }
    })
}

fn run_worker(mut pipeline: MediaPipeline, rx: Receiver<Bytes>) {
    for raw in rx.iter() {
        pipeline.handle(raw);
    }
    tracing::debug!(stream_index = pipeline.stream_index(), "media worker finished");
}

fn run_keepalive(writer: RequestWriter, keepalive: Keepalive, stop: Receiver<()>) {
    tracing::debug!(
        method = keepalive.method,
        interval_secs = keepalive.interval.as_secs(),
        "keepalive started"
    );
    loop {
        match stop.recv_timeout(keepalive.interval) {
            Err(RecvTimeoutError::Timeout) => {
                if let Err(err) = writer.send(RtspRequest::new(keepalive.method, &keepalive.url)) {
                    tracing::warn!(error = %err, "keepalive failed");
                    return;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
