//! Snapshot encoding: decoded picture → RGB → JPEG → base64.

use base64::prelude::{BASE64_STANDARD, Engine as _};
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;

use crate::decoder::YCbCrImage;
use crate::error::Result;

/// Convert a 4:2:0 picture to packed RGB8 (BT.601, full range).
pub fn to_rgb(picture: &YCbCrImage) -> Vec<u8> {
    let (w, h) = (picture.width, picture.height);
    let cw = picture.chroma_width();
    let mut rgb = Vec::with_capacity(w * h * 3);

    for row in 0..h {
        for col in 0..w {
            let y = f32::from(picture.y[row * w + col]);
            let ci = (row / 2) * cw + col / 2;
            let cb = f32::from(picture.cb[ci]) - 128.0;
            let cr = f32::from(picture.cr[ci]) - 128.0;

            let r = y + 1.402 * cr;
            let g = y - 0.344_136 * cb - 0.714_136 * cr;
            let b = y + 1.772 * cb;
            rgb.push(r.round().clamp(0.0, 255.0) as u8);
            rgb.push(g.round().clamp(0.0, 255.0) as u8);
            rgb.push(b.round().clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

/// Encode a picture as JPEG at the given quality (1–100).
pub fn encode_jpeg(picture: &YCbCrImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = to_rgb(picture);
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &rgb,
        picture.width as u32,
        picture.height as u32,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

/// JPEG-encode and base64 (standard alphabet) a picture for the snapshot slot.
pub fn encode_base64(picture: &YCbCrImage, quality: u8) -> Result<String> {
    let jpeg = encode_jpeg(picture, quality)?;
    Ok(BASE64_STANDARD.encode(jpeg))
}
