//! Sequence parameter set parsing: picture size and frame rate.
//!
//! Only the fields needed to reach the cropping window and the VUI timing
//! info are interpreted; everything else is read and discarded.
//!
//! Frame rate:
//! - H.264: `time_scale / (2 * num_units_in_tick)` (field-based ticks).
//! - H.265: `time_scale / num_units_in_tick`.
//!
//! A missing or unreadable VUI gives `fps = 0.0` rather than an error, since
//! many cameras ship truncated or vendor-padded VUI sections.

use std::io::Cursor;

use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::error::ParameterSetError;

/// Geometry and timing derived from an SPS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpsInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Strip emulation prevention bytes (`00 00 03` → `00 00`).
pub fn to_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0usize;
    for &b in nal {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// Bit reader over an RBSP with Exp-Golomb helpers and field-named errors.
struct RbspReader {
    bits: BitReader<Cursor<Vec<u8>>, BigEndian>,
    name: &'static str,
}

impl RbspReader {
    fn new(nal: &[u8], header_len: usize, name: &'static str) -> Result<Self, ParameterSetError> {
        if nal.len() <= header_len {
            return Err(ParameterSetError::Truncated {
                name,
                field: "nal_unit_header",
            });
        }
        Ok(Self {
            bits: BitReader::endian(Cursor::new(to_rbsp(&nal[header_len..])), BigEndian),
            name,
        })
    }

    fn truncated(&self, field: &'static str) -> ParameterSetError {
        ParameterSetError::Truncated {
            name: self.name,
            field,
        }
    }

    fn u(&mut self, n: u32, field: &'static str) -> Result<u32, ParameterSetError> {
        if n == 0 {
            return Ok(0);
        }
        self.bits.read::<u32>(n).map_err(|_| self.truncated(field))
    }

    fn flag(&mut self, field: &'static str) -> Result<bool, ParameterSetError> {
        self.bits.read_bit().map_err(|_| self.truncated(field))
    }

    fn skip(&mut self, n: u32, field: &'static str) -> Result<(), ParameterSetError> {
        self.bits.skip(n).map_err(|_| self.truncated(field))
    }

    fn ue(&mut self, field: &'static str) -> Result<u32, ParameterSetError> {
        let mut leading_zeros = 0u32;
        while !self.flag(field)? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(ParameterSetError::Unsupported {
                    name: self.name,
                    field,
                    value: leading_zeros,
                });
            }
        }
        let suffix = self.u(leading_zeros, field)?;
        Ok(((1u64 << leading_zeros) - 1 + u64::from(suffix)) as u32)
    }

    fn se(&mut self, field: &'static str) -> Result<i32, ParameterSetError> {
        let k = self.ue(field)?;
        let magnitude = k.div_ceil(2) as i32;
        Ok(if k % 2 == 1 { magnitude } else { -magnitude })
    }

    /// Bounded `ue(v)` for loop counts and table sizes.
    fn ue_max(&mut self, field: &'static str, max: u32) -> Result<u32, ParameterSetError> {
        let v = self.ue(field)?;
        if v > max {
            return Err(ParameterSetError::Unsupported {
                name: self.name,
                field,
                value: v,
            });
        }
        Ok(v)
    }
}

/// `(SubWidthC, SubHeightC)` for a chroma format, or `None` when the
/// chroma array type is 0 (monochrome or separate planes).
fn chroma_subsampling(chroma_format_idc: u32, separate_colour_plane: bool) -> Option<(u32, u32)> {
    if separate_colour_plane {
        return None;
    }
    match chroma_format_idc {
        1 => Some((2, 2)),
        2 => Some((2, 1)),
        3 => Some((1, 1)),
        _ => None,
    }
}

const H264_HIGH_PROFILES: [u32; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Parse an H.264 SPS NAL unit (ITU-T H.264 §7.3.2.1.1).
pub fn parse_h264_sps(nal: &[u8]) -> Result<SpsInfo, ParameterSetError> {
    let mut r = RbspReader::new(nal, 1, "SPS")?;

    let profile_idc = r.u(8, "profile_idc")?;
    r.skip(8, "constraint_flags")?;
    r.skip(8, "level_idc")?;
    r.ue_max("seq_parameter_set_id", 31)?;

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if H264_HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = r.ue_max("chroma_format_idc", 3)?;
        if chroma_format_idc == 3 {
            separate_colour_plane = r.flag("separate_colour_plane_flag")?;
        }
        r.ue("bit_depth_luma_minus8")?;
        r.ue("bit_depth_chroma_minus8")?;
        r.flag("qpprime_y_zero_transform_bypass_flag")?;
        if r.flag("seq_scaling_matrix_present_flag")? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.flag("seq_scaling_list_present_flag")? {
                    skip_h264_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    r.ue_max("log2_max_frame_num_minus4", 12)?;
    match r.ue_max("pic_order_cnt_type", 2)? {
        0 => {
            r.ue_max("log2_max_pic_order_cnt_lsb_minus4", 12)?;
        }
        1 => {
            r.flag("delta_pic_order_always_zero_flag")?;
            r.se("offset_for_non_ref_pic")?;
            r.se("offset_for_top_to_bottom_field")?;
            let cycle = r.ue_max("num_ref_frames_in_pic_order_cnt_cycle", 255)?;
            for _ in 0..cycle {
                r.se("offset_for_ref_frame")?;
            }
        }
        _ => {}
    }
    r.ue("max_num_ref_frames")?;
    r.flag("gaps_in_frame_num_value_allowed_flag")?;

    let width_mbs = r.ue_max("pic_width_in_mbs_minus1", 1023)? + 1;
    let height_map_units = r.ue_max("pic_height_in_map_units_minus1", 1023)? + 1;
    let frame_mbs_only = r.flag("frame_mbs_only_flag")?;
    if !frame_mbs_only {
        r.flag("mb_adaptive_frame_field_flag")?;
    }
    r.flag("direct_8x8_inference_flag")?;

    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let mut width = width_mbs * 16;
    let mut height = field_factor * height_map_units * 16;

    if r.flag("frame_cropping_flag")? {
        let left = r.ue("frame_crop_left_offset")?;
        let right = r.ue("frame_crop_right_offset")?;
        let top = r.ue("frame_crop_top_offset")?;
        let bottom = r.ue("frame_crop_bottom_offset")?;
        let (crop_x, crop_y) = match chroma_subsampling(chroma_format_idc, separate_colour_plane) {
            Some((sub_w, sub_h)) => (sub_w, sub_h * field_factor),
            None => (1, field_factor),
        };
        width = cropped("SPS", "frame_crop_left_offset", width, crop_x, left, right)?;
        height = cropped("SPS", "frame_crop_top_offset", height, crop_y, top, bottom)?;
    }

    let fps = if r.flag("vui_parameters_present_flag").unwrap_or(false) {
        h264_vui_fps(&mut r).unwrap_or(0.0)
    } else {
        0.0
    };

    tracing::debug!(width, height, fps, profile_idc, "parsed H.264 SPS");
    Ok(SpsInfo { width, height, fps })
}

/// Apply a pair of crop offsets (in chroma units) to a picture dimension.
/// The window must leave at least one sample.
fn cropped(
    name: &'static str,
    field: &'static str,
    full: u32,
    unit: u32,
    lo: u32,
    hi: u32,
) -> Result<u32, ParameterSetError> {
    lo.checked_add(hi)
        .and_then(|offsets| offsets.checked_mul(unit))
        .and_then(|crop| full.checked_sub(crop))
        .filter(|&remaining| remaining > 0)
        .ok_or(ParameterSetError::Unsupported {
            name,
            field,
            value: lo.saturating_add(hi),
        })
}

fn skip_h264_scaling_list(r: &mut RbspReader, size: usize) -> Result<(), ParameterSetError> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.se("delta_scale")?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

fn h264_vui_fps(r: &mut RbspReader) -> Result<f64, ParameterSetError> {
    skip_common_vui_prefix(r)?;
    if !r.flag("timing_info_present_flag")? {
        return Ok(0.0);
    }
    let num_units_in_tick = r.u(32, "num_units_in_tick")?;
    let time_scale = r.u(32, "time_scale")?;
    if num_units_in_tick == 0 {
        return Ok(0.0);
    }
    Ok(f64::from(time_scale) / (2.0 * f64::from(num_units_in_tick)))
}

/// VUI fields shared by H.264 and H.265 up to (not including) the
/// codec-specific part.
fn skip_common_vui_prefix(r: &mut RbspReader) -> Result<(), ParameterSetError> {
    const EXTENDED_SAR: u32 = 255;
    if r.flag("aspect_ratio_info_present_flag")? && r.u(8, "aspect_ratio_idc")? == EXTENDED_SAR {
        r.skip(32, "sar")?;
    }
    if r.flag("overscan_info_present_flag")? {
        r.flag("overscan_appropriate_flag")?;
    }
    if r.flag("video_signal_type_present_flag")? {
        r.skip(4, "video_format")?;
        if r.flag("colour_description_present_flag")? {
            r.skip(24, "colour_description")?;
        }
    }
    if r.flag("chroma_loc_info_present_flag")? {
        r.ue("chroma_sample_loc_type_top_field")?;
        r.ue("chroma_sample_loc_type_bottom_field")?;
    }
    Ok(())
}

/// Parse an H.265 SPS NAL unit (ITU-T H.265 §7.3.2.2).
pub fn parse_h265_sps(nal: &[u8]) -> Result<SpsInfo, ParameterSetError> {
    let mut r = RbspReader::new(nal, 2, "SPS")?;

    r.skip(4, "sps_video_parameter_set_id")?;
    let max_sub_layers_minus1 = r.u(3, "sps_max_sub_layers_minus1")?;
    r.flag("sps_temporal_id_nesting_flag")?;
    skip_profile_tier_level(&mut r, max_sub_layers_minus1)?;

    r.ue_max("sps_seq_parameter_set_id", 15)?;
    let chroma_format_idc = r.ue_max("chroma_format_idc", 3)?;
    let mut separate_colour_plane = false;
    if chroma_format_idc == 3 {
        separate_colour_plane = r.flag("separate_colour_plane_flag")?;
    }
    let mut width = r.ue("pic_width_in_luma_samples")?;
    let mut height = r.ue("pic_height_in_luma_samples")?;

    if r.flag("conformance_window_flag")? {
        let left = r.ue("conf_win_left_offset")?;
        let right = r.ue("conf_win_right_offset")?;
        let top = r.ue("conf_win_top_offset")?;
        let bottom = r.ue("conf_win_bottom_offset")?;
        let (sub_w, sub_h) =
            chroma_subsampling(chroma_format_idc, separate_colour_plane).unwrap_or((1, 1));
        width = cropped("SPS", "conf_win_left_offset", width, sub_w, left, right)?;
        height = cropped("SPS", "conf_win_top_offset", height, sub_h, top, bottom)?;
    }

    r.ue("bit_depth_luma_minus8")?;
    r.ue("bit_depth_chroma_minus8")?;
    let log2_max_poc_lsb = r.ue_max("log2_max_pic_order_cnt_lsb_minus4", 12)? + 4;

    let ordering_info_present = r.flag("sps_sub_layer_ordering_info_present_flag")?;
    let first = if ordering_info_present {
        0
    } else {
        max_sub_layers_minus1
    };
    for _ in first..=max_sub_layers_minus1 {
        r.ue("sps_max_dec_pic_buffering_minus1")?;
        r.ue("sps_max_num_reorder_pics")?;
        r.ue("sps_max_latency_increase_plus1")?;
    }

    r.ue("log2_min_luma_coding_block_size_minus3")?;
    r.ue("log2_diff_max_min_luma_coding_block_size")?;
    r.ue("log2_min_luma_transform_block_size_minus2")?;
    r.ue("log2_diff_max_min_luma_transform_block_size")?;
    r.ue("max_transform_hierarchy_depth_inter")?;
    r.ue("max_transform_hierarchy_depth_intra")?;

    let fps = match h265_tail_fps(&mut r, log2_max_poc_lsb) {
        Ok(fps) => fps,
        Err(err) => {
            tracing::debug!(error = %err, "H.265 SPS timing info unreadable");
            0.0
        }
    };

    tracing::debug!(width, height, fps, "parsed H.265 SPS");
    Ok(SpsInfo { width, height, fps })
}

/// Everything after the transform block sizes, up to the VUI timing info.
fn h265_tail_fps(r: &mut RbspReader, log2_max_poc_lsb: u32) -> Result<f64, ParameterSetError> {
    if r.flag("scaling_list_enabled_flag")? && r.flag("sps_scaling_list_data_present_flag")? {
        skip_h265_scaling_list_data(r)?;
    }
    r.flag("amp_enabled_flag")?;
    r.flag("sample_adaptive_offset_enabled_flag")?;
    if r.flag("pcm_enabled_flag")? {
        r.skip(8, "pcm_sample_bit_depths")?;
        r.ue("log2_min_pcm_luma_coding_block_size_minus3")?;
        r.ue("log2_diff_max_min_pcm_luma_coding_block_size")?;
        r.flag("pcm_loop_filter_disabled_flag")?;
    }

    let num_sets = r.ue_max("num_short_term_ref_pic_sets", 64)? as usize;
    let mut delta_pocs = Vec::with_capacity(num_sets);
    for idx in 0..num_sets {
        let count = skip_st_ref_pic_set(r, idx, &delta_pocs)?;
        delta_pocs.push(count);
    }

    if r.flag("long_term_ref_pics_present_flag")? {
        let n = r.ue_max("num_long_term_ref_pics_sps", 32)?;
        for _ in 0..n {
            r.skip(log2_max_poc_lsb, "lt_ref_pic_poc_lsb_sps")?;
            r.flag("used_by_curr_pic_lt_sps_flag")?;
        }
    }
    r.flag("sps_temporal_mvp_enabled_flag")?;
    r.flag("strong_intra_smoothing_enabled_flag")?;

    if !r.flag("vui_parameters_present_flag")? {
        return Ok(0.0);
    }
    skip_common_vui_prefix(r)?;
    r.flag("neutral_chroma_indication_flag")?;
    r.flag("field_seq_flag")?;
    r.flag("frame_field_info_present_flag")?;
    if r.flag("default_display_window_flag")? {
        for _ in 0..4 {
            r.ue("def_disp_win_offset")?;
        }
    }
    if !r.flag("vui_timing_info_present_flag")? {
        return Ok(0.0);
    }
    let num_units_in_tick = r.u(32, "vui_num_units_in_tick")?;
    let time_scale = r.u(32, "vui_time_scale")?;
    if num_units_in_tick == 0 {
        return Ok(0.0);
    }
    Ok(f64::from(time_scale) / f64::from(num_units_in_tick))
}

fn skip_profile_tier_level(
    r: &mut RbspReader,
    max_sub_layers_minus1: u32,
) -> Result<(), ParameterSetError> {
    // general_profile_space .. general_inbld_flag: 2+1+5+32+4+43+1 bits
    r.skip(88, "general_profile")?;
    r.skip(8, "general_level_idc")?;

    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    for i in 0..max_sub_layers_minus1 as usize {
        profile_present[i] = r.flag("sub_layer_profile_present_flag")?;
        level_present[i] = r.flag("sub_layer_level_present_flag")?;
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            r.skip(2, "reserved_zero_2bits")?;
        }
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if profile_present[i] {
            r.skip(88, "sub_layer_profile")?;
        }
        if level_present[i] {
            r.skip(8, "sub_layer_level_idc")?;
        }
    }
    Ok(())
}

fn skip_h265_scaling_list_data(r: &mut RbspReader) -> Result<(), ParameterSetError> {
    for size_id in 0..4u32 {
        let step = if size_id == 3 { 3 } else { 1 };
        for _matrix_id in (0..6).step_by(step) {
            if !r.flag("scaling_list_pred_mode_flag")? {
                r.ue("scaling_list_pred_matrix_id_delta")?;
                continue;
            }
            let coef_num = 64.min(1u32 << (4 + (size_id << 1)));
            if size_id > 1 {
                r.se("scaling_list_dc_coef_minus8")?;
            }
            for _ in 0..coef_num {
                r.se("scaling_list_delta_coef")?;
            }
        }
    }
    Ok(())
}

/// Skip `st_ref_pic_set(idx)` and return its NumDeltaPocs.
fn skip_st_ref_pic_set(
    r: &mut RbspReader,
    idx: usize,
    delta_pocs: &[u32],
) -> Result<u32, ParameterSetError> {
    let inter_prediction = idx != 0 && r.flag("inter_ref_pic_set_prediction_flag")?;
    if inter_prediction {
        // In the SPS, delta_idx_minus1 is absent and the reference is idx - 1.
        let ref_delta_pocs = delta_pocs[idx - 1];
        r.flag("delta_rps_sign")?;
        r.ue("abs_delta_rps_minus1")?;
        let mut count = 0;
        for _ in 0..=ref_delta_pocs {
            let used = r.flag("used_by_curr_pic_flag")?;
            let use_delta = used || r.flag("use_delta_flag")?;
            if use_delta {
                count += 1;
            }
        }
        return Ok(count);
    }

    let negative = r.ue_max("num_negative_pics", 16)?;
    let positive = r.ue_max("num_positive_pics", 16)?;
    for _ in 0..negative + positive {
        r.ue("delta_poc_minus1")?;
        r.flag("used_by_curr_pic_flag")?;
    }
    Ok(negative + positive)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal bit writer for building parameter sets in tests.
    #[derive(Default)]
    pub(crate) struct BitBuilder {
        bits: Vec<bool>,
    }

    impl BitBuilder {
        pub fn u(&mut self, n: u32, v: u32) -> &mut Self {
            for i in (0..n).rev() {
                self.bits.push((v >> i) & 1 == 1);
            }
            self
        }

        pub fn flag(&mut self, b: bool) -> &mut Self {
            self.bits.push(b);
            self
        }

        pub fn ue(&mut self, v: u32) -> &mut Self {
            let code = u64::from(v) + 1;
            let len = 64 - code.leading_zeros();
            for _ in 0..len - 1 {
                self.bits.push(false);
            }
            for i in (0..len).rev() {
                self.bits.push((code >> i) & 1 == 1);
            }
            self
        }

        /// rbsp_trailing_bits, then emulation prevention.
        pub fn finish(&mut self, header: &[u8]) -> Vec<u8> {
            self.bits.push(true);
            while self.bits.len() % 8 != 0 {
                self.bits.push(false);
            }
            let rbsp: Vec<u8> = self
                .bits
                .chunks(8)
                .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
                .collect();
            let mut out = header.to_vec();
            let mut zeros = 0;
            for b in rbsp {
                if zeros >= 2 && b <= 3 {
                    out.push(3);
                    zeros = 0;
                }
                zeros = if b == 0 { zeros + 1 } else { 0 };
                out.push(b);
            }
            out
        }
    }

    /// Baseline H.264 SPS for the given size, optionally with VUI timing.
    pub(crate) fn h264_sps(width: u32, height: u32, timing: Option<(u32, u32)>) -> Vec<u8> {
        let mut b = BitBuilder::default();
        b.u(8, 66).u(8, 0).u(8, 30); // baseline, level 3.0
        b.ue(0); // sps id
        b.ue(0); // log2_max_frame_num_minus4
        b.ue(2); // poc type
        b.ue(1); // max_num_ref_frames
        b.flag(false);
        b.ue(width.div_ceil(16) - 1);
        b.ue(height.div_ceil(16) - 1);
        b.flag(true); // frame_mbs_only
        b.flag(true); // direct_8x8
        let crop_bottom = (height.div_ceil(16) * 16 - height) / 2;
        if crop_bottom > 0 {
            b.flag(true).ue(0).ue(0).ue(0).ue(crop_bottom);
        } else {
            b.flag(false);
        }
        match timing {
            Some((num_units_in_tick, time_scale)) => {
                b.flag(true); // vui present
                b.flag(false).flag(false).flag(false).flag(false);
                b.flag(true).u(32, num_units_in_tick).u(32, time_scale).flag(true);
                b.flag(false).flag(false).flag(false).flag(false);
            }
            None => {
                b.flag(false);
            }
        }
        b.finish(&[0x67])
    }

    #[test]
    fn rbsp_removes_emulation_prevention() {
        assert_eq!(to_rbsp(&[0, 0, 3, 1, 0, 0, 3]), vec![0, 0, 1, 0, 0]);
        assert_eq!(to_rbsp(&[0, 3, 0]), vec![0, 3, 0]);
    }

    #[test]
    fn exp_golomb() {
        let mut b = BitBuilder::default();
        b.ue(0).ue(1).ue(2).ue(7).ue(255).ue(1).ue(2);
        let nal = b.finish(&[0x67]);
        let mut r = RbspReader::new(&nal, 1, "SPS").unwrap();
        assert_eq!(r.ue("a").unwrap(), 0);
        assert_eq!(r.ue("b").unwrap(), 1);
        assert_eq!(r.ue("c").unwrap(), 2);
        assert_eq!(r.ue("d").unwrap(), 7);
        assert_eq!(r.ue("e").unwrap(), 255);
        assert_eq!(r.se("f").unwrap(), 1);
        assert_eq!(r.se("g").unwrap(), -1);
    }

    #[test]
    fn h264_dimensions() {
        let info = parse_h264_sps(&h264_sps(640, 480, None)).unwrap();
        assert_eq!((info.width, info.height), (640, 480));
        assert_eq!(info.fps, 0.0);
    }

    #[test]
    fn h264_cropped_1080p_with_timing() {
        let info = parse_h264_sps(&h264_sps(1920, 1080, Some((1, 50)))).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.fps, 25.0);
    }

    #[test]
    fn h264_truncated() {
        assert!(matches!(
            parse_h264_sps(&[0x67, 0x42]),
            Err(ParameterSetError::Truncated { .. })
        ));
        assert!(parse_h264_sps(&[0x67]).is_err());
    }

    /// 640x480 baseline SPS with an explicit cropping window.
    fn h264_sps_cropped(left: u32, right: u32, top: u32, bottom: u32) -> Vec<u8> {
        let mut b = BitBuilder::default();
        b.u(8, 66).u(8, 0).u(8, 30);
        b.ue(0).ue(0).ue(2).ue(1).flag(false);
        b.ue(39).ue(29); // 40x30 macroblocks
        b.flag(true).flag(true);
        b.flag(true).ue(left).ue(right).ue(top).ue(bottom);
        b.flag(false);
        b.finish(&[0x67])
    }

    #[test]
    fn h264_crop_window_applied() {
        let info = parse_h264_sps(&h264_sps_cropped(4, 4, 0, 8)).unwrap();
        assert_eq!((info.width, info.height), (624, 464));
    }

    #[test]
    fn h264_oversized_crop_is_rejected() {
        assert!(matches!(
            parse_h264_sps(&h264_sps_cropped(u32::MAX - 1, 10, 0, 0)),
            Err(ParameterSetError::Unsupported { field: "frame_crop_left_offset", .. })
        ));
        // Fits in u32 but crops away the whole picture.
        assert!(matches!(
            parse_h264_sps(&h264_sps_cropped(0, 0, 120, 120)),
            Err(ParameterSetError::Unsupported { field: "frame_crop_top_offset", .. })
        ));
    }

    fn h265_sps(width: u32, height: u32, timing: Option<(u32, u32)>) -> Vec<u8> {
        h265_sps_windowed(width, height, None, timing)
    }

    fn h265_sps_windowed(
        width: u32,
        height: u32,
        window: Option<[u32; 4]>,
        timing: Option<(u32, u32)>,
    ) -> Vec<u8> {
        let mut b = BitBuilder::default();
        b.u(4, 0).u(3, 0).flag(true); // vps id, max_sub_layers_minus1, nesting
        b.u(2, 0).flag(false).u(5, 1).u(32, 0x6000_0000); // main profile
        b.u(4, 0b1001).u(32, 0).u(12, 0); // 4 flags + 44 reserved bits
        b.u(8, 93); // level 3.1
        b.ue(0); // sps id
        b.ue(1); // 4:2:0
        b.ue(width).ue(height);
        match window {
            Some([left, right, top, bottom]) => {
                b.flag(true).ue(left).ue(right).ue(top).ue(bottom);
            }
            None => {
                b.flag(false);
            }
        }
        b.ue(0).ue(0); // bit depths
        b.ue(4); // log2_max_poc_lsb_minus4
        b.flag(true).ue(4).ue(0).ue(0); // ordering info
        b.ue(0).ue(3).ue(0).ue(3).ue(0).ue(0);
        b.flag(false); // scaling list
        b.flag(false).flag(true).flag(false); // amp, sao, pcm
        b.ue(2); // two short-term sets
        b.ue(1).ue(0).ue(0).flag(true); // set 0: one negative pic
        b.flag(true).flag(false).ue(0).flag(true).flag(true); // set 1: predicted from set 0
        b.flag(false); // long term
        b.flag(true).flag(true); // tmvp, strong intra smoothing
        match timing {
            Some((num_units_in_tick, time_scale)) => {
                b.flag(true);
                b.flag(false).flag(false).flag(false).flag(false);
                b.flag(false).flag(false).flag(false).flag(false);
                b.flag(true).u(32, num_units_in_tick).u(32, time_scale);
                b.flag(false).flag(false).flag(false);
            }
            None => {
                b.flag(false);
            }
        }
        b.finish(&[0x42, 0x01])
    }

    #[test]
    fn h265_dimensions_and_timing() {
        let info = parse_h265_sps(&h265_sps(1280, 720, Some((1, 30)))).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.fps, 30.0);
    }

    #[test]
    fn h265_without_vui() {
        let info = parse_h265_sps(&h265_sps(2560, 1440, None)).unwrap();
        assert_eq!((info.width, info.height), (2560, 1440));
        assert_eq!(info.fps, 0.0);
    }

    #[test]
    fn h265_conformance_window() {
        let sps = h265_sps_windowed(1920, 1088, Some([0, 0, 0, 4]), None);
        let info = parse_h265_sps(&sps).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
    }

    #[test]
    fn h265_oversized_conformance_window_is_rejected() {
        let sps = h265_sps_windowed(1920, 1080, Some([u32::MAX - 1, 10, 0, 0]), None);
        assert!(matches!(
            parse_h265_sps(&sps),
            Err(ParameterSetError::Unsupported { field: "conf_win_left_offset", .. })
        ));
    }
}
