use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::{VideoDecoder, VideoFrame};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};

use super::{NativeCodec, YCbCrImage};
use crate::error::DecodeError;
use crate::stream::Codec;

/// libavcodec H.264 / HEVC decoder with a reusable output picture.
pub(crate) struct FfmpegCodec {
    decoder: VideoDecoder,
    picture: YCbCrImage,
    frame_count: i64,
}

/// Layouts the plane copy understands: 8-bit planar 4:2:0.
const PLANAR_420: [&str; 2] = ["yuv420p", "yuvj420p"];

impl FfmpegCodec {
    pub(crate) fn new(codec: Codec) -> Result<Self, DecodeError> {
        let name = match codec {
            Codec::H264 => "h264",
            Codec::H265 => "hevc",
            other => {
                return Err(DecodeError::DecodeFailed(format!(
                    "{other} is not a video codec"
                )));
            }
        };
        let decoder = VideoDecoder::builder(name)
            .and_then(|b| b.time_base(TimeBase::new(1, 90_000)).build())
            .map_err(|e| DecodeError::DecodeFailed(format!("unable to open {name} decoder: {e}")))?;

        tracing::debug!(codec = name, "native decoder opened");
        Ok(Self {
            decoder,
            picture: YCbCrImage::default(),
            frame_count: 0,
        })
    }

    fn next_pts(&mut self) -> Timestamp {
        self.frame_count += 1;
        Timestamp::new(self.frame_count, TimeBase::new(1, 90_000))
    }

    /// Take every frame the decoder has ready, keeping the newest.
    fn drain(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        let mut newest = None;
        loop {
            match self.decoder.take() {
                Ok(Some(frame)) => newest = Some(frame),
                Ok(None) => return Ok(newest),
                Err(e) => return Err(DecodeError::DecodeFailed(format!("take failed: {e}"))),
            }
        }
    }
}

impl NativeCodec for FfmpegCodec {
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<&YCbCrImage>, DecodeError> {
        let pts = self.next_pts();
        let packet = PacketMut::from(access_unit).with_pts(pts).freeze();

        // Frames held back by reordering must leave before the decoder
        // accepts more input.
        let mut newest = self.drain()?;
        match self.decoder.try_push(packet) {
            Ok(()) => {}
            Err(e) if e.is_again() => {
                tracing::debug!("decoder still full, access unit skipped");
            }
            Err(e) => return Err(DecodeError::DecodeFailed(format!("push failed: {e}"))),
        }
        if let Some(frame) = self.drain()? {
            newest = Some(frame);
        }
        let Some(frame) = newest else {
            return Ok(None);
        };

        let format = frame.pixel_format().name();
        let planes = frame.planes();
        if !is_planar_420(format) || planes.len() < 3 {
            return Err(DecodeError::DecodeFailed(format!(
                "unsupported pixel format {format}"
            )));
        }

        self.picture.reshape(frame.width(), frame.height());
        let (w, h) = (self.picture.width, self.picture.height);
        let (cw, ch) = (self.picture.chroma_width(), self.picture.chroma_height());
        copy_plane(&mut self.picture.y, planes[0].data(), planes[0].line_size(), w, h)?;
        copy_plane(&mut self.picture.cb, planes[1].data(), planes[1].line_size(), cw, ch)?;
        copy_plane(&mut self.picture.cr, planes[2].data(), planes[2].line_size(), cw, ch)?;

        Ok(Some(&self.picture))
    }
}

fn is_planar_420(format: &str) -> bool {
    PLANAR_420.contains(&format)
}

/// Copy a stride-padded plane into a tightly packed one.
fn copy_plane(
    dst: &mut [u8],
    src: &[u8],
    stride: usize,
    width: usize,
    height: usize,
) -> Result<(), DecodeError> {
    if width == 0 || height == 0 {
        return Ok(());
    }
    if stride < width || src.len() < stride * (height.saturating_sub(1)) + width {
        return Err(DecodeError::DecodeFailed("plane smaller than picture".into()));
    }
    if stride == width {
        dst.copy_from_slice(&src[..width * height]);
        return Ok(());
    }
    for (row, out) in dst.chunks_exact_mut(width).enumerate() {
        let start = row * stride;
        out.copy_from_slice(&src[start..start + width]);
    }
    Ok(())
}
