//! Stream registry entries and the packets produced for each of them.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Codec of a negotiated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
    /// G.711 mu-law, 8 kHz.
    PcmMulaw,
    /// MPEG-4 AAC, framed as ADTS.
    Aac,
}

impl Codec {
    /// Name used in the stream catalog and on packets.
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::H265 => "H265",
            Self::PcmMulaw => "PCM_MULAW",
            Self::Aac => "AAC",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }

    pub fn is_audio(&self) -> bool {
        !self.is_video()
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One negotiated media stream.
///
/// Created once during negotiation and read-only afterwards. The index is
/// the stream's position in the session's registry and is never reused
/// while the session is alive.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub index: usize,
    pub codec: Codec,
    pub is_video: bool,
    pub is_audio: bool,
    pub is_back_channel: bool,
    /// Luma width in pixels (video only, 0 otherwise).
    pub width: u32,
    /// Luma height in pixels (video only, 0 otherwise).
    pub height: u32,
    /// Frame rate from the SPS timing info; 0 when the SPS carries none.
    pub fps: f64,
    /// Audio sample rate in Hz (audio only, 0 otherwise).
    pub sample_rate: u32,
    /// Audio channel count (audio only, 0 otherwise).
    pub channels: u8,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub vps: Vec<u8>,
}

impl Stream {
    pub(crate) fn video(index: usize, codec: Codec, params: VideoParameters) -> Self {
        Self {
            index,
            codec,
            is_video: true,
            is_audio: false,
            is_back_channel: false,
            width: params.width,
            height: params.height,
            fps: params.fps,
            sample_rate: 0,
            channels: 0,
            sps: params.sps,
            pps: params.pps,
            vps: params.vps,
        }
    }

    pub(crate) fn audio(
        index: usize,
        codec: Codec,
        sample_rate: u32,
        channels: u8,
        is_back_channel: bool,
    ) -> Self {
        Self {
            index,
            codec,
            is_video: false,
            is_audio: true,
            is_back_channel,
            width: 0,
            height: 0,
            fps: 0.0,
            sample_rate,
            channels,
            sps: Vec::new(),
            pps: Vec::new(),
            vps: Vec::new(),
        }
    }
}

/// Parameter sets and derived picture geometry of a video stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoParameters {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub vps: Vec<u8>,
}

/// Filter for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFilter {
    All,
    Video,
    Audio,
}

/// Returns the streams matching `filter`, in index order.
pub fn filter_streams(streams: &[Stream], filter: StreamFilter) -> Vec<Stream> {
    streams
        .iter()
        .filter(|s| match filter {
            StreamFilter::All => true,
            StreamFilter::Video => s.is_video,
            StreamFilter::Audio => s.is_audio,
        })
        .cloned()
        .collect()
}

/// A framed, self-contained media packet handed to the downstream queue.
///
/// Video payloads are Annex-B (keyframes carry their parameter sets), AAC
/// payloads are ADTS, G.711 payloads are the raw mu-law samples.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub codec: Codec,
    pub is_key_frame: bool,
    pub data: Bytes,
    pub pts: Duration,
    pub dts: Duration,
    /// The complete RTP packet this payload ended on, exactly as received.
    /// Replayed verbatim by the back-channel.
    pub raw_frame: Bytes,
}

impl Packet {
    pub fn is_video(&self) -> bool {
        self.codec.is_video()
    }

    pub fn is_audio(&self) -> bool {
        self.codec.is_audio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Stream> {
        vec![
            Stream::video(
                0,
                Codec::H264,
                VideoParameters {
                    width: 640,
                    height: 480,
                    ..Default::default()
                },
            ),
            Stream::audio(1, Codec::PcmMulaw, 8000, 1, false),
        ]
    }

    #[test]
    fn filter_by_kind() {
        let streams = catalog();
        assert_eq!(filter_streams(&streams, StreamFilter::All).len(), 2);

        let video = filter_streams(&streams, StreamFilter::Video);
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].codec, Codec::H264);

        let audio = filter_streams(&streams, StreamFilter::Audio);
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].index, 1);
    }

    #[test]
    fn codec_names() {
        assert_eq!(Codec::PcmMulaw.to_string(), "PCM_MULAW");
        assert!(Codec::H265.is_video());
        assert!(Codec::Aac.is_audio());
    }
}
