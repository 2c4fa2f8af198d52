//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Parses the body of a DESCRIBE response. Only the parts needed to select
//! and set up media are kept:
//!
//! ```text
//! v=0
//! o=- 0 0 IN IP4 192.168.1.10
//! s=Camera
//! a=control:*
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHp...,aM4...
//! a=control:trackID=1                           ← per-media control URL
//! m=audio 0 RTP/AVP 0
//! a=control:trackID=2
//! m=audio 0 RTP/AVP 0                           ← ONVIF back-channel
//! a=sendonly
//! a=control:trackID=3
//! ```
//!
//! A media marked `a=sendonly` by the camera is one the camera receives
//! on, i.e. an audio back-channel.

/// Parsed session description.
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub session_name: String,
    /// Session-level `a=control` attribute, if any.
    pub control: Option<String>,
    pub medias: Vec<MediaDescription>,
}

/// Media type from the `m=` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Other(String),
}

/// Stream direction attribute (RFC 4566 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

/// An `a=rtpmap` attribute, or the implied mapping of a static payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

/// One `m=` section.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub kind: MediaKind,
    pub protocol: String,
    pub payload_types: Vec<u8>,
    pub rtpmaps: Vec<RtpMap>,
    /// `a=fmtp` parameters per payload type, raw.
    pub fmtps: Vec<(u8, String)>,
    pub control: Option<String>,
    pub direction: Direction,
}

impl MediaDescription {
    fn new(kind: MediaKind, protocol: &str, payload_types: Vec<u8>) -> Self {
        Self {
            kind,
            protocol: protocol.to_string(),
            payload_types,
            rtpmaps: Vec::new(),
            fmtps: Vec::new(),
            control: None,
            direction: Direction::default(),
        }
    }

    /// Whether the camera expects us to send on this media.
    pub fn is_back_channel(&self) -> bool {
        self.direction == Direction::SendOnly
    }

    /// Codec mapping for a payload type, falling back to the static
    /// assignments of RFC 3551 §6 for types without an `a=rtpmap`.
    pub fn rtpmap(&self, payload_type: u8) -> Option<RtpMap> {
        if let Some(map) = self.rtpmaps.iter().find(|m| m.payload_type == payload_type) {
            return Some(map.clone());
        }
        let (encoding, clock_rate) = match payload_type {
            0 => ("PCMU", 8000),
            8 => ("PCMA", 8000),
            _ => return None,
        };
        Some(RtpMap {
            payload_type,
            encoding: encoding.to_string(),
            clock_rate,
            channels: Some(1),
        })
    }

    /// All payload types of this media with their codec mapping, in `m=` order.
    pub fn formats(&self) -> impl Iterator<Item = RtpMap> + '_ {
        self.payload_types.iter().filter_map(|&pt| self.rtpmap(pt))
    }

    /// First format whose encoding name matches (case-insensitive).
    pub fn find_format(&self, encoding: &str) -> Option<RtpMap> {
        self.formats()
            .find(|f| f.encoding.eq_ignore_ascii_case(encoding))
    }

    /// `a=fmtp` parameters for a payload type as `(key, value)` pairs.
    /// Keys are lower-cased; empty segments (trailing `;`) are skipped.
    pub fn fmtp(&self, payload_type: u8) -> Vec<(String, String)> {
        self.fmtps
            .iter()
            .filter(|(pt, _)| *pt == payload_type)
            .flat_map(|(_, params)| params.split(';'))
            .filter_map(|p| {
                let p = p.trim();
                let (key, value) = p.split_once('=')?;
                Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect()
    }

    /// Single `a=fmtp` parameter value.
    pub fn fmtp_value(&self, payload_type: u8, key: &str) -> Option<String> {
        self.fmtp(payload_type)
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }
}

impl SessionDescription {
    /// Parse an SDP body. Unknown lines are ignored; malformed `m=` lines
    /// drop that media section.
    pub fn parse(body: &str) -> Self {
        let mut sdp = SessionDescription::default();
        let mut current: Option<MediaDescription> = None;
        let mut skipping_media = false;

        for line in body.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            if key == "m" {
                if let Some(media) = current.take() {
                    sdp.medias.push(media);
                }
                current = parse_media_line(value);
                skipping_media = current.is_none();
                if skipping_media {
                    tracing::debug!(line, "ignoring unparseable media line");
                }
                continue;
            }

            if skipping_media {
                continue;
            }

            match (key, current.as_mut()) {
                ("s", None) => sdp.session_name = value.to_string(),
                ("a", None) => {
                    if let Some(control) = value.strip_prefix("control:") {
                        sdp.control = Some(control.trim().to_string());
                    }
                }
                ("a", Some(media)) => apply_media_attribute(media, value),
                _ => {}
            }
        }

        if let Some(media) = current.take() {
            sdp.medias.push(media);
        }

        sdp
    }
}

fn parse_media_line(value: &str) -> Option<MediaDescription> {
    let mut parts = value.split_whitespace();
    let kind = match parts.next()? {
        "video" => MediaKind::Video,
        "audio" => MediaKind::Audio,
        other => MediaKind::Other(other.to_string()),
    };
    let _port = parts.next()?;
    let protocol = parts.next()?;
    let payload_types = parts.filter_map(|pt| pt.parse().ok()).collect();
    Some(MediaDescription::new(kind, protocol, payload_types))
}

fn apply_media_attribute(media: &mut MediaDescription, attr: &str) {
    match attr {
        "sendonly" => media.direction = Direction::SendOnly,
        "recvonly" => media.direction = Direction::RecvOnly,
        "sendrecv" => media.direction = Direction::SendRecv,
        "inactive" => media.direction = Direction::Inactive,
        _ => {}
    }

    if let Some(control) = attr.strip_prefix("control:") {
        media.control = Some(control.trim().to_string());
    } else if let Some(rtpmap) = attr.strip_prefix("rtpmap:") {
        if let Some(map) = parse_rtpmap(rtpmap) {
            media.rtpmaps.push(map);
        }
    } else if let Some(fmtp) = attr.strip_prefix("fmtp:") {
        if let Some((pt, params)) = fmtp.split_once(' ')
            && let Ok(pt) = pt.trim().parse()
        {
            media.fmtps.push((pt, params.trim().to_string()));
        }
    }
}

/// `96 H264/90000` or `97 MPEG4-GENERIC/16000/2`.
fn parse_rtpmap(value: &str) -> Option<RtpMap> {
    let (pt, rest) = value.trim().split_once(' ')?;
    let mut parts = rest.trim().split('/');
    let encoding = parts.next()?.to_string();
    let clock_rate = parts.next()?.trim().parse().ok()?;
    let channels = parts.next().and_then(|c| c.trim().parse().ok());
    Some(RtpMap {
        payload_type: pt.parse().ok()?,
        encoding,
        clock_rate,
        channels,
    })
}

/// Resolve a media `a=control` value against the session base URL.
///
/// Absolute controls are used as-is, `*` (or none) means the base itself,
/// anything else is appended to the base with a single `/`.
pub fn resolve_control(base: &str, control: Option<&str>) -> String {
    match control {
        None | Some("*") | Some("") => base.to_string(),
        Some(c) if c.starts_with("rtsp://") || c.starts_with("rtsps://") => c.to_string(),
        Some(c) => {
            if base.ends_with('/') {
                format!("{}{}", base, c)
            } else {
                format!("{}/{}", base, c)
            }
        }
    }
}
