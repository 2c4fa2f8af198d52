//! MPEG-4 AAC over RTP (RFC 3640, `mpeg4-generic`) and ADTS framing.
//!
//! ## RTP payload (RFC 3640 §3.2)
//!
//! ```text
//! +---------+-----------+-----------+---------------+
//! | AU-headers-length (16) | AU-headers | padding | AUs |
//! +---------+-----------+-----------+---------------+
//! ```
//!
//! Each AU header holds `sizeLength` bits of AU size followed by
//! `indexLength` (first header) or `indexDeltaLength` (subsequent headers)
//! bits of index. The lengths come from the SDP fmtp line; cameras use
//! AAC-hbr (13/3/3) or AAC-lbr (6/2/2).
//!
//! An AU larger than one packet is fragmented: every fragment carries a
//! single AU header with the full AU size and the same RTP timestamp, and
//! the last fragment has the marker bit.
//!
//! ## ADTS (ISO/IEC 13818-7 §6.2)
//!
//! Each access unit is emitted behind a 7-byte header (no CRC):
//!
//! ```text
//! syncword(12)=0xFFF id(1)=0 layer(2)=0 protection_absent(1)=1
//! profile(2) sampling_frequency_index(4) private(1) channel_config(3)
//! original(1) home(1) copyright_id(1) copyright_start(1)
//! frame_length(13) buffer_fullness(11)=0x7FF raw_blocks(2)=0
//! ```

use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{Bytes, BytesMut};

use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};
use crate::error::{DepacketizeError, ParameterSetError};

/// Sample rates addressed by `samplingFrequencyIndex` (ISO/IEC 14496-3 §1.6.3.3).
const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

const ADTS_HEADER_LEN: usize = 7;

/// Largest value of the 13-bit ADTS frame_length field.
const MAX_ADTS_FRAME_LEN: usize = (1 << 13) - 1;

/// Decoded `AudioSpecificConfig` (ISO/IEC 14496-3 §1.6.2.1), limited to
/// what ADTS can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type; 2 is AAC-LC.
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub sample_rate: u32,
    pub channel_config: u8,
}

impl AudioSpecificConfig {
    pub fn parse(raw: &[u8]) -> Result<Self, ParameterSetError> {
        const NAME: &str = "AudioSpecificConfig";
        let truncated = |field| ParameterSetError::Truncated { name: NAME, field };

        let mut r = BitReader::endian(raw, BigEndian);
        let object_type = r
            .read::<u8>(5)
            .map_err(|_| truncated("audio_object_type"))?;
        // ADTS carries the profile in 2 bits: object types 1 through 4 only.
        if !(1..=4).contains(&object_type) {
            return Err(ParameterSetError::Unsupported {
                name: NAME,
                field: "audio_object_type",
                value: object_type.into(),
            });
        }

        let sampling_frequency_index = r
            .read::<u8>(4)
            .map_err(|_| truncated("sampling_frequency_index"))?;
        let sample_rate = *SAMPLE_RATES
            .get(usize::from(sampling_frequency_index))
            .ok_or(ParameterSetError::Unsupported {
                name: NAME,
                field: "sampling_frequency_index",
                value: sampling_frequency_index.into(),
            })?;

        let channel_config = r
            .read::<u8>(4)
            .map_err(|_| truncated("channel_configuration"))?;
        if !(1..=7).contains(&channel_config) {
            return Err(ParameterSetError::Unsupported {
                name: NAME,
                field: "channel_configuration",
                value: channel_config.into(),
            });
        }

        Ok(Self {
            object_type,
            sampling_frequency_index,
            sample_rate,
            channel_config,
        })
    }

    /// Channel count implied by the channel configuration.
    pub fn channels(&self) -> u8 {
        match self.channel_config {
            7 => 8,
            c => c,
        }
    }
}

/// Bit widths of the AU header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuHeaderLayout {
    pub size_length: u32,
    pub index_length: u32,
    pub index_delta_length: u32,
}

impl AuHeaderLayout {
    pub const AAC_HBR: Self = Self {
        size_length: 13,
        index_length: 3,
        index_delta_length: 3,
    };

    pub const AAC_LBR: Self = Self {
        size_length: 6,
        index_length: 2,
        index_delta_length: 2,
    };
}

/// Negotiated AAC format: decoder config plus AU header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacFormat {
    pub config: AudioSpecificConfig,
    pub layout: AuHeaderLayout,
}

impl AacFormat {
    /// Build from `a=fmtp` parameters (keys already lowercased).
    ///
    /// `config` is required. The field lengths default to the `mode`'s
    /// values when they are not given explicitly.
    pub fn from_fmtp(params: &[(String, String)]) -> Result<Self, ParameterSetError> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let config_hex = get("config").ok_or(ParameterSetError::Missing("AAC config"))?;
        let raw = hex::decode(config_hex).map_err(|_| ParameterSetError::Encoding {
            name: "AAC config",
        })?;
        let config = AudioSpecificConfig::parse(&raw)?;

        let defaults = match get("mode") {
            Some(m) if m.eq_ignore_ascii_case("aac-lbr") => AuHeaderLayout::AAC_LBR,
            _ => AuHeaderLayout::AAC_HBR,
        };
        let field = |key: &'static str, default: u32| -> Result<u32, ParameterSetError> {
            match get(key) {
                None => Ok(default),
                Some(v) => v
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n <= 16)
                    .ok_or(ParameterSetError::Encoding { name: key }),
            }
        };
        let layout = AuHeaderLayout {
            size_length: field("sizelength", defaults.size_length)?,
            index_length: field("indexlength", defaults.index_length)?,
            index_delta_length: field("indexdeltalength", defaults.index_delta_length)?,
        };
        if layout.size_length == 0 {
            return Err(ParameterSetError::Unsupported {
                name: "AAC fmtp",
                field: "sizelength",
                value: 0,
            });
        }

        Ok(Self { config, layout })
    }
}

#[derive(Debug)]
struct Fragment {
    timestamp: u32,
    expected: usize,
    buf: BytesMut,
}

/// RFC 3640 depacketizer. Yields one or more AUs per packet, or one
/// reassembled AU at the end of a fragmented run.
#[derive(Debug)]
pub struct AacDepacketizer {
    layout: AuHeaderLayout,
    fragment: Option<Fragment>,
}

impl AacDepacketizer {
    pub fn new(layout: AuHeaderLayout) -> Self {
        Self {
            layout,
            fragment: None,
        }
    }

    /// AU sizes from the AU-header section.
    fn au_sizes(&self, headers: &[u8], header_bits: usize) -> Result<Vec<usize>, DepacketizeError> {
        let mut r = BitReader::endian(headers, BigEndian);
        let mut sizes = Vec::new();
        let mut consumed = 0usize;
        loop {
            let index_bits = if sizes.is_empty() {
                self.layout.index_length
            } else {
                self.layout.index_delta_length
            };
            let needed = (self.layout.size_length + index_bits) as usize;
            if consumed + needed > header_bits {
                break;
            }
            let size = r
                .read::<u32>(self.layout.size_length)
                .map_err(|_| DepacketizeError::Malformed("AU header truncated"))?;
            r.skip(index_bits)
                .map_err(|_| DepacketizeError::Malformed("AU header truncated"))?;
            consumed += needed;
            sizes.push(size as usize);
        }
        if sizes.is_empty() {
            return Err(DepacketizeError::Malformed("packet without AU headers"));
        }
        Ok(sizes)
    }

    fn push_fragment(
        &mut self,
        packet: &RtpPacket,
        expected: usize,
        data: &[u8],
    ) -> Result<Option<AccessUnit>, DepacketizeError> {
        let continues = self
            .fragment
            .as_ref()
            .is_some_and(|f| f.timestamp == packet.timestamp && f.expected == expected);
        if !continues {
            if self.fragment.is_some() {
                tracing::debug!("AAC fragment run interrupted, discarding");
            }
            self.fragment = Some(Fragment {
                timestamp: packet.timestamp,
                expected,
                buf: BytesMut::with_capacity(expected),
            });
        }

        let Some(fragment) = self.fragment.as_mut() else {
            return Ok(None);
        };
        fragment.buf.extend_from_slice(data);
        let have = fragment.buf.len();

        if have > expected {
            self.fragment = None;
            return Err(DepacketizeError::Malformed("AAC fragments exceed AU size"));
        }
        if have < expected {
            if packet.marker {
                self.fragment = None;
                return Err(DepacketizeError::Malformed("AAC fragment run ended short"));
            }
            return Ok(None);
        }

        let Some(done) = self.fragment.take() else {
            return Ok(None);
        };
        Ok(Some(AccessUnit {
            units: vec![done.buf.freeze()],
            rtp_timestamp: done.timestamp,
        }))
    }
}

impl Depacketizer for AacDepacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError> {
        let payload = &packet.payload;
        if payload.is_empty() {
            return Err(DepacketizeError::EmptyPayload);
        }
        if payload.len() < 2 {
            return Err(DepacketizeError::Malformed("missing AU-headers-length"));
        }
        let header_bits = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
        let header_bytes = header_bits.div_ceil(8);
        if payload.len() < 2 + header_bytes {
            return Err(DepacketizeError::Malformed("AU headers exceed payload"));
        }
        let sizes = self.au_sizes(&payload[2..2 + header_bytes], header_bits)?;
        let data = payload.slice(2 + header_bytes..);

        if sizes.len() == 1 && sizes[0] > data.len() {
            return self.push_fragment(packet, sizes[0], &data);
        }
        if self.fragment.take().is_some() {
            tracing::debug!("AAC fragment run not completed, discarding");
        }

        let mut units = Vec::with_capacity(sizes.len());
        let mut offset = 0usize;
        for size in sizes {
            if offset + size > data.len() {
                return Err(DepacketizeError::Malformed("AU exceeds payload"));
            }
            units.push(data.slice(offset..offset + size));
            offset += size;
        }

        Ok(Some(AccessUnit {
            units,
            rtp_timestamp: packet.timestamp,
        }))
    }

    fn reset(&mut self) {
        self.fragment = None;
    }
}

/// Build the 7-byte ADTS header for one access unit of `au_len` bytes.
pub fn adts_header(
    config: &AudioSpecificConfig,
    au_len: usize,
) -> Result<[u8; ADTS_HEADER_LEN], DepacketizeError> {
    let frame_len = au_len + ADTS_HEADER_LEN;
    if frame_len > MAX_ADTS_FRAME_LEN {
        return Err(DepacketizeError::TooLarge(MAX_ADTS_FRAME_LEN));
    }
    let profile = config.object_type - 1;
    let sf = config.sampling_frequency_index;
    let ch = config.channel_config;
    let len = frame_len as u16;

    Ok([
        0xFF,
        0xF1,
        (profile << 6) | (sf << 2) | (ch >> 2),
        ((ch & 0x03) << 6) | (len >> 11) as u8,
        (len >> 3) as u8,
        (((len & 0x07) as u8) << 5) | 0x1F,
        0xFC,
    ])
}

/// Frame every access unit independently as ADTS, concatenated.
pub fn write_adts(
    config: &AudioSpecificConfig,
    units: &[Bytes],
) -> Result<Vec<u8>, DepacketizeError> {
    let total = units.iter().map(|u| u.len() + ADTS_HEADER_LEN).sum();
    let mut out = Vec::with_capacity(total);
    for unit in units {
        out.extend_from_slice(&adts_header(config, unit.len())?);
        out.extend_from_slice(unit);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::test_packet;

    fn params(s: &str) -> Vec<(String, String)> {
        s.split(';')
            .filter_map(|p| p.trim().split_once('='))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect()
    }

    fn lc_48k_mono() -> AudioSpecificConfig {
        AudioSpecificConfig::parse(&[0x11, 0x88]).unwrap()
    }

    #[test]
    fn parse_audio_specific_config() {
        let c = lc_48k_mono();
        assert_eq!(c.object_type, 2);
        assert_eq!(c.sample_rate, 48_000);
        assert_eq!(c.channels(), 1);

        let stereo_16k = AudioSpecificConfig::parse(&[0x14, 0x10]).unwrap();
        assert_eq!(stereo_16k.sample_rate, 16_000);
        assert_eq!(stereo_16k.channels(), 2);
    }

    #[test]
    fn rejects_unsupported_object_type() {
        // object type 5 (SBR)
        assert!(matches!(
            AudioSpecificConfig::parse(&[0x29, 0x88]),
            Err(ParameterSetError::Unsupported { .. })
        ));
        assert!(matches!(
            AudioSpecificConfig::parse(&[0x11]),
            Err(ParameterSetError::Truncated { .. })
        ));
    }

    #[test]
    fn format_from_fmtp() {
        let f = AacFormat::from_fmtp(&params(
            "streamtype=5;profile-level-id=1;mode=AAC-hbr;SizeLength=13;IndexLength=3;IndexDeltaLength=3;config=1188",
        ))
        .unwrap();
        assert_eq!(f.layout, AuHeaderLayout::AAC_HBR);
        assert_eq!(f.config.sample_rate, 48_000);

        let lbr = AacFormat::from_fmtp(&params("mode=AAC-lbr;config=1188")).unwrap();
        assert_eq!(lbr.layout, AuHeaderLayout::AAC_LBR);

        assert!(matches!(
            AacFormat::from_fmtp(&params("mode=AAC-hbr")),
            Err(ParameterSetError::Missing(_))
        ));
        assert!(matches!(
            AacFormat::from_fmtp(&params("config=zz")),
            Err(ParameterSetError::Encoding { .. })
        ));
    }

    #[test]
    fn depacketize_multiple_aus() {
        let mut d = AacDepacketizer::new(AuHeaderLayout::AAC_HBR);
        // Two AU headers (32 bits): sizes 3 and 2, index 0.
        let payload = [
            0x00, 0x20, //
            0x00, 0x18, // size 3
            0x00, 0x10, // size 2
            1, 2, 3, 4, 5,
        ];
        let au = d
            .depacketize(&test_packet(1, 1024, true, &payload))
            .unwrap()
            .unwrap();
        assert_eq!(au.units.len(), 2);
        assert_eq!(&au.units[0][..], &[1, 2, 3]);
        assert_eq!(&au.units[1][..], &[4, 5]);
        assert_eq!(au.rtp_timestamp, 1024);
    }

    #[test]
    fn depacketize_fragmented_au() {
        let mut d = AacDepacketizer::new(AuHeaderLayout::AAC_HBR);
        // One AU header announcing 5 bytes, spread over two packets.
        let first = [0x00, 0x10, 0x00, 0x28, 1, 2, 3];
        let second = [0x00, 0x10, 0x00, 0x28, 4, 5];
        assert_eq!(d.depacketize(&test_packet(1, 0, false, &first)), Ok(None));
        let au = d
            .depacketize(&test_packet(2, 0, true, &second))
            .unwrap()
            .unwrap();
        assert_eq!(au.units, vec![Bytes::from_static(&[1, 2, 3, 4, 5])]);
    }

    #[test]
    fn depacketize_fragment_ending_short() {
        let mut d = AacDepacketizer::new(AuHeaderLayout::AAC_HBR);
        let first = [0x00, 0x10, 0x00, 0x28, 1, 2];
        let last = [0x00, 0x10, 0x00, 0x28, 3];
        assert_eq!(d.depacketize(&test_packet(1, 0, false, &first)), Ok(None));
        assert!(d.depacketize(&test_packet(2, 0, true, &last)).is_err());
    }

    #[test]
    fn adts_frames_encode_config() {
        let config = lc_48k_mono();
        let units = vec![
            Bytes::from_static(&[0xAA; 10]),
            Bytes::from_static(&[0xBB; 300]),
            Bytes::from_static(&[0xCC; 1]),
        ];
        let out = write_adts(&config, &units).unwrap();

        let mut offset = 0;
        let mut frames = 0;
        while offset < out.len() {
            let h = &out[offset..offset + ADTS_HEADER_LEN];
            assert_eq!(h[0], 0xFF);
            assert_eq!(h[1] & 0xF6, 0xF0, "syncword, MPEG-4, layer 0");
            assert_eq!(h[1] & 0x01, 0x01, "protection absent");
            let profile = h[2] >> 6;
            let sf_index = (h[2] >> 2) & 0x0F;
            let channels = ((h[2] & 0x01) << 2) | (h[3] >> 6);
            assert_eq!((profile, sf_index, channels), (1, 3, 1));

            let frame_len = (usize::from(h[3] & 0x03) << 11)
                | (usize::from(h[4]) << 3)
                | usize::from(h[5] >> 5);
            assert_eq!(frame_len, units[frames].len() + ADTS_HEADER_LEN);
            offset += frame_len;
            frames += 1;
        }
        assert_eq!(frames, units.len());
    }

    #[test]
    fn adts_rejects_oversized_unit() {
        let config = lc_48k_mono();
        assert!(adts_header(&config, MAX_ADTS_FRAME_LEN).is_err());
    }
}
