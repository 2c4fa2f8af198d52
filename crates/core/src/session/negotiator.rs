//! Media selection: turns a DESCRIBE answer into the list of media to SETUP.
//!
//! Preferences are fixed:
//!
//! | Role | First choice | Fallback |
//! |------|--------------|----------|
//! | video | H.264 | H.265 |
//! | forward audio | PCMU | AAC (`mpeg4-generic`) |
//! | back-channel | PCMU | none |
//!
//! H.264 and H.265 are never wired together, even when both are offered.

use crate::error::{ParameterSetError, Result};
use crate::media::aac::{AacDepacketizer, AacFormat};
use crate::media::framer::AccessUnitFramer;
use crate::media::g711::{self, G711Depacketizer};
use crate::media::h264::{self, H264Depacketizer};
use crate::media::h265::{self, H265Depacketizer};
use crate::media::{Depacketizer, sps};
use crate::protocol::sdp::{MediaDescription, MediaKind, resolve_control};
use crate::protocol::SessionDescription;
use crate::stream::{Codec, Stream, VideoParameters};

const H264_CLOCK_RATE: u32 = 90_000;

/// How a selected media is depacketized and framed.
#[derive(Debug, Clone)]
pub enum MediaWiring {
    H264(VideoParameters),
    H265(VideoParameters),
    G711,
    Aac(AacFormat),
}

impl MediaWiring {
    pub fn codec(&self) -> Codec {
        match self {
            Self::H264(_) => Codec::H264,
            Self::H265(_) => Codec::H265,
            Self::G711 => Codec::PcmMulaw,
            Self::Aac(_) => Codec::Aac,
        }
    }

    /// A fresh depacketizer for this media.
    pub fn depacketizer(&self) -> Box<dyn Depacketizer> {
        match self {
            Self::H264(_) => Box::new(H264Depacketizer::new()),
            Self::H265(_) => Box::new(H265Depacketizer::new()),
            Self::G711 => Box::new(G711Depacketizer::new()),
            Self::Aac(format) => Box::new(AacDepacketizer::new(format.layout)),
        }
    }

    /// The video framer, seeded with the out-of-band parameter sets.
    pub fn framer(&self) -> Option<AccessUnitFramer> {
        match self {
            Self::H264(p) => Some(AccessUnitFramer::h264(p.sps.clone(), p.pps.clone())),
            Self::H265(p) => Some(AccessUnitFramer::h265(
                p.vps.clone(),
                p.sps.clone(),
                p.pps.clone(),
            )),
            Self::G711 | Self::Aac(_) => None,
        }
    }
}

/// One media chosen for SETUP.
#[derive(Debug, Clone)]
pub struct MediaPlan {
    /// SETUP target.
    pub control_url: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub is_back_channel: bool,
    pub wiring: MediaWiring,
    /// Audio channel count from the rtpmap or decoder config.
    pub channels: u8,
}

impl MediaPlan {
    pub fn codec(&self) -> Codec {
        self.wiring.codec()
    }

    /// Registry entry for this media at `index`.
    pub fn stream(&self, index: usize) -> Stream {
        match &self.wiring {
            MediaWiring::H264(p) => Stream::video(index, Codec::H264, p.clone()),
            MediaWiring::H265(p) => Stream::video(index, Codec::H265, p.clone()),
            MediaWiring::G711 => Stream::audio(
                index,
                Codec::PcmMulaw,
                self.clock_rate,
                self.channels,
                self.is_back_channel,
            ),
            MediaWiring::Aac(format) => Stream::audio(
                index,
                Codec::Aac,
                format.config.sample_rate,
                format.config.channels(),
                self.is_back_channel,
            ),
        }
    }
}

/// Select the forward media of a capture pass: at most one video and at
/// most one audio media, video first.
///
/// A parameter-set failure on the selected video media aborts the pass. An
/// unusable AAC configuration only drops the audio media.
pub fn plan_capture(sdp: &SessionDescription, base: &str) -> Result<Vec<MediaPlan>> {
    let forward: Vec<&MediaDescription> =
        sdp.medias.iter().filter(|m| !m.is_back_channel()).collect();

    let mut plans = Vec::with_capacity(2);
    match select_video(&forward, base)? {
        Some(video) => plans.push(video),
        None => tracing::info!("no supported video media offered"),
    }
    match select_audio(&forward, base) {
        Some(audio) => plans.push(audio),
        None => tracing::info!("no supported audio media offered"),
    }
    Ok(plans)
}

/// Select the back-channel media (PCMU only), if the camera offers one.
pub fn plan_back_channel(sdp: &SessionDescription, base: &str) -> Option<MediaPlan> {
    sdp.medias
        .iter()
        .filter(|m| m.kind == MediaKind::Audio && m.is_back_channel())
        .find_map(|m| {
            let format = m.find_format("PCMU")?;
            Some(MediaPlan {
                control_url: resolve_control(base, m.control.as_deref()),
                payload_type: format.payload_type,
                clock_rate: format.clock_rate,
                is_back_channel: true,
                wiring: MediaWiring::G711,
                channels: format.channels.unwrap_or(1),
            })
        })
}

fn select_video(medias: &[&MediaDescription], base: &str) -> Result<Option<MediaPlan>> {
    let videos = || medias.iter().filter(|m| m.kind == MediaKind::Video);

    if let Some((media, format)) = videos().find_map(|m| Some((m, m.find_format("H264")?))) {
        let pt = format.payload_type;
        let sprop = media
            .fmtp_value(pt, "sprop-parameter-sets")
            .ok_or(ParameterSetError::Missing("sprop-parameter-sets"))?;
        let (sps_nal, pps_nal) = h264::parse_sprop_parameter_sets(&sprop)?;
        let info = sps::parse_h264_sps(&sps_nal)?;
        tracing::info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            "selected H264 video"
        );
        return Ok(Some(MediaPlan {
            control_url: resolve_control(base, media.control.as_deref()),
            payload_type: pt,
            clock_rate: nonzero_clock(format.clock_rate, H264_CLOCK_RATE),
            is_back_channel: false,
            wiring: MediaWiring::H264(VideoParameters {
                width: info.width,
                height: info.height,
                fps: info.fps,
                sps: sps_nal,
                pps: pps_nal,
                vps: Vec::new(),
            }),
            channels: 0,
        }));
    }

    if let Some((media, format)) = videos().find_map(|m| Some((m, m.find_format("H265")?))) {
        let pt = format.payload_type;
        let sets = h265::ParameterSets::from_fmtp(
            media.fmtp_value(pt, "sprop-vps").as_deref(),
            media.fmtp_value(pt, "sprop-sps").as_deref(),
            media.fmtp_value(pt, "sprop-pps").as_deref(),
        )?;
        let info = sps::parse_h265_sps(&sets.sps)?;
        tracing::info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            "selected H265 video"
        );
        return Ok(Some(MediaPlan {
            control_url: resolve_control(base, media.control.as_deref()),
            payload_type: pt,
            clock_rate: nonzero_clock(format.clock_rate, H264_CLOCK_RATE),
            is_back_channel: false,
            wiring: MediaWiring::H265(VideoParameters {
                width: info.width,
                height: info.height,
                fps: info.fps,
                sps: sets.sps,
                pps: sets.pps,
                vps: sets.vps,
            }),
            channels: 0,
        }));
    }

    Ok(None)
}

fn select_audio(medias: &[&MediaDescription], base: &str) -> Option<MediaPlan> {
    let audios = || medias.iter().filter(|m| m.kind == MediaKind::Audio);

    if let Some((media, format)) = audios().find_map(|m| Some((m, m.find_format("PCMU")?))) {
        tracing::info!(payload_type = format.payload_type, "selected PCMU audio");
        return Some(MediaPlan {
            control_url: resolve_control(base, media.control.as_deref()),
            payload_type: format.payload_type,
            clock_rate: nonzero_clock(format.clock_rate, g711::CLOCK_RATE),
            is_back_channel: false,
            wiring: MediaWiring::G711,
            channels: format.channels.unwrap_or(1),
        });
    }

    for media in audios() {
        let Some(format) = media.find_format("MPEG4-GENERIC") else {
            continue;
        };
        match AacFormat::from_fmtp(&media.fmtp(format.payload_type)) {
            Ok(aac) => {
                tracing::info!(
                    sample_rate = aac.config.sample_rate,
                    channels = aac.config.channels(),
                    "selected AAC audio"
                );
                return Some(MediaPlan {
                    control_url: resolve_control(base, media.control.as_deref()),
                    payload_type: format.payload_type,
                    clock_rate: nonzero_clock(format.clock_rate, aac.config.sample_rate),
                    is_back_channel: false,
                    channels: aac.config.channels(),
                    wiring: MediaWiring::Aac(aac),
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping AAC media with unusable config");
            }
        }
    }
    None
}

fn nonzero_clock(clock_rate: u32, default: u32) -> u32 {
    if clock_rate == 0 { default } else { clock_rate }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::media::sps::tests::h264_sps;
    use base64::prelude::{BASE64_STANDARD, Engine as _};

    fn h264_sdp(extra_media: &str) -> String {
        let sps = BASE64_STANDARD.encode(h264_sps(640, 480, None));
        format!(
            "v=0\r\ns=cam\r\na=control:*\r\n\
             m=video 0 RTP/AVP 96\r\n\
             a=rtpmap:96 H264/90000\r\n\
             a=fmtp:96 packetization-mode=1;sprop-parameter-sets={sps},aM48gA==\r\n\
             a=control:trackID=1\r\n{extra_media}"
        )
    }

    const PCMU_MEDIA: &str = "m=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=control:trackID=2\r\n";
    const BACKCHANNEL_MEDIA: &str =
        "m=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=sendonly\r\na=control:trackID=3\r\n";

    #[test]
    fn h264_and_pcmu_become_streams_zero_and_one() {
        let sdp = SessionDescription::parse(&h264_sdp(PCMU_MEDIA));
        let plans = plan_capture(&sdp, "rtsp://cam/live/").unwrap();
        let streams: Vec<Stream> = plans.iter().enumerate().map(|(i, p)| p.stream(i)).collect();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].index, 0);
        assert_eq!(streams[0].codec, Codec::H264);
        assert!(streams[0].is_video);
        assert_eq!((streams[0].width, streams[0].height), (640, 480));
        assert_eq!(streams[1].index, 1);
        assert_eq!(streams[1].codec.name(), "PCM_MULAW");
        assert!(streams[1].is_audio);
        assert_eq!(streams[1].sample_rate, 8000);

        assert_eq!(plans[0].control_url, "rtsp://cam/live/trackID=1");
        assert_eq!(plans[1].control_url, "rtsp://cam/live/trackID=2");
    }

    #[test]
    fn back_channel_excluded_from_capture() {
        let sdp = SessionDescription::parse(&h264_sdp(BACKCHANNEL_MEDIA));
        let plans = plan_capture(&sdp, "rtsp://cam/live").unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].codec(), Codec::H264);

        let back = plan_back_channel(&sdp, "rtsp://cam/live").unwrap();
        assert!(back.is_back_channel);
        assert_eq!(back.control_url, "rtsp://cam/live/trackID=3");
        assert!(back.stream(0).is_back_channel);
    }

    #[test]
    fn no_back_channel_offered() {
        let sdp = SessionDescription::parse(&h264_sdp(PCMU_MEDIA));
        assert!(plan_back_channel(&sdp, "rtsp://cam/live").is_none());
    }

    #[test]
    fn bad_sps_is_fatal() {
        let sdp = SessionDescription::parse(
            "v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n\
             a=fmtp:96 sprop-parameter-sets=Zw==,aM48gA==\r\n",
        );
        assert!(matches!(
            plan_capture(&sdp, "rtsp://cam"),
            Err(CaptureError::ParameterSet(_))
        ));
    }

    #[test]
    fn missing_sprop_is_fatal() {
        let sdp = SessionDescription::parse("v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n");
        assert!(matches!(
            plan_capture(&sdp, "rtsp://cam"),
            Err(CaptureError::ParameterSet(ParameterSetError::Missing(_)))
        ));
    }

    #[test]
    fn audio_only_and_aac_fallback() {
        let sdp = SessionDescription::parse(
            "v=0\r\nm=audio 0 RTP/AVP 97\r\n\
             a=rtpmap:97 MPEG4-GENERIC/16000/1\r\n\
             a=fmtp:97 streamtype=5;mode=AAC-hbr;config=1408;sizelength=13;indexlength=3;indexdeltalength=3\r\n\
             a=control:audio\r\n",
        );
        let plans = plan_capture(&sdp, "rtsp://cam/s").unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].codec(), Codec::Aac);
        let stream = plans[0].stream(0);
        assert_eq!(stream.sample_rate, 16000);
        assert_eq!(stream.channels, 1);
        assert_eq!(plans[0].clock_rate, 16000);
    }

    #[test]
    fn broken_aac_config_drops_only_audio() {
        let sdp = SessionDescription::parse(&h264_sdp(
            "m=audio 0 RTP/AVP 97\r\na=rtpmap:97 MPEG4-GENERIC/16000\r\na=fmtp:97 mode=AAC-hbr;config=zz\r\n",
        ));
        let plans = plan_capture(&sdp, "rtsp://cam").unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].codec(), Codec::H264);
    }

    #[test]
    fn unsupported_media_only() {
        let sdp = SessionDescription::parse(
            "v=0\r\nm=video 0 RTP/AVP 26\r\na=rtpmap:26 JPEG/90000\r\n",
        );
        assert!(plan_capture(&sdp, "rtsp://cam").unwrap().is_empty());
    }
}
