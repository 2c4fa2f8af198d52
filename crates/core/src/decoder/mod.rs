//! On-demand video decoding for snapshots.
//!
//! [`FrameDecoder`] wraps exactly one native codec context behind a lock.
//! The context keeps reference pictures between calls, so two decodes must
//! never overlap; every call takes the lock before looking at anything else
//! and releases it on every return path.
//!
//! The native codec is pluggable through [`NativeCodec`]. With the `ffmpeg`
//! feature, [`FrameDecoder::new`] builds one on libavcodec; without it the
//! session still runs, but decode requests report
//! [`DecodeError::NoDecoderConfigured`].

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

use parking_lot::Mutex;

use crate::error::DecodeError;
use crate::stream::Codec;

/// Planar 4:2:0 picture with tightly packed planes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YCbCrImage {
    pub width: usize,
    pub height: usize,
    /// `width * height` luma samples.
    pub y: Vec<u8>,
    /// `chroma_width() * chroma_height()` samples.
    pub cb: Vec<u8>,
    pub cr: Vec<u8>,
}

impl YCbCrImage {
    pub fn chroma_width(&self) -> usize {
        self.width.div_ceil(2)
    }

    pub fn chroma_height(&self) -> usize {
        self.height.div_ceil(2)
    }

    /// Resize the planes for a new geometry, reusing allocations.
    pub fn reshape(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        let chroma = self.chroma_width() * self.chroma_height();
        self.y.resize(width * height, 0);
        self.cb.resize(chroma, 0);
        self.cr.resize(chroma, 0);
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Single-plane 8-bit grayscale picture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// A native codec context.
///
/// Implementations own their output picture and overwrite it on every
/// call; the returned reference is only valid until the next `decode`.
pub trait NativeCodec: Send {
    /// Feed one Annex-B access unit.
    ///
    /// `Ok(None)` means the codec accepted the input but has no picture to
    /// show yet.
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<&YCbCrImage>, DecodeError>;
}

struct DecoderHandle {
    codec: Codec,
    native: Box<dyn NativeCodec>,
}

/// Serialized access to the session's single video decoder.
pub struct FrameDecoder {
    inner: Mutex<Option<DecoderHandle>>,
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("codec", &self.codec())
            .finish()
    }
}

impl FrameDecoder {
    /// Create a decoder for `codec` on the built-in native backend.
    #[cfg(feature = "ffmpeg")]
    pub fn new(codec: Codec) -> Result<Self, DecodeError> {
        let native = ffmpeg::FfmpegCodec::new(codec)?;
        Ok(Self::with_native(codec, Box::new(native)))
    }

    /// Without a native backend no decoder can be created.
    #[cfg(not(feature = "ffmpeg"))]
    pub fn new(codec: Codec) -> Result<Self, DecodeError> {
        tracing::debug!(%codec, "built without a native decoder");
        Err(DecodeError::NoDecoderConfigured)
    }

    /// Wrap an externally provided codec context.
    pub fn with_native(codec: Codec, native: Box<dyn NativeCodec>) -> Self {
        Self {
            inner: Mutex::new(Some(DecoderHandle { codec, native })),
        }
    }

    /// A decoder with nothing behind it; every request reports
    /// [`DecodeError::NoDecoderConfigured`].
    pub fn unconfigured() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Codec of the active context, if any.
    pub fn codec(&self) -> Option<Codec> {
        self.inner.lock().as_ref().map(|h| h.codec)
    }

    /// Decode one access unit into a planar picture.
    pub fn decode(&self, access_unit: &[u8]) -> Result<YCbCrImage, DecodeError> {
        let mut guard = self.inner.lock();
        let handle = guard.as_mut().ok_or(DecodeError::NoDecoderConfigured)?;
        if access_unit.is_empty() {
            return Err(DecodeError::EmptyInput);
        }
        match handle.native.decode(access_unit)? {
            Some(picture) if !picture.is_empty() => Ok(picture.clone()),
            _ => Err(DecodeError::EmptyFrame),
        }
    }

    /// Decode one access unit and return a copy of its luma plane.
    ///
    /// The copy is independent of the codec's reusable buffer, so it stays
    /// valid across later decodes.
    pub fn decode_gray(&self, access_unit: &[u8]) -> Result<GrayImage, DecodeError> {
        let mut guard = self.inner.lock();
        let handle = guard.as_mut().ok_or(DecodeError::NoDecoderConfigured)?;
        if access_unit.is_empty() {
            return Err(DecodeError::EmptyInput);
        }
        match handle.native.decode(access_unit)? {
            Some(picture) if !picture.is_empty() => Ok(GrayImage {
                width: picture.width,
                height: picture.height,
                pixels: picture.y.to_vec(),
            }),
            _ => Err(DecodeError::EmptyFrame),
        }
    }

    /// Release the native context. Returns `false` if it was already
    /// released.
    pub fn close(&self) -> bool {
        let released = self.inner.lock().take();
        match released {
            Some(handle) => {
                tracing::debug!(codec = %handle.codec, "decoder released");
                true
            }
            None => false,
        }
    }
}
