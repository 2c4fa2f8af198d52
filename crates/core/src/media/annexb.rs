//! Annex-B byte stream framing (ITU-T H.264 Annex B, shared by H.265).
//!
//! NAL units are delimited by start codes:
//! - 4-byte: `0x00 0x00 0x00 0x01`
//! - 3-byte: `0x00 0x00 0x01`
//!
//! We always write 4-byte start codes; [`split`] accepts both.

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Concatenate NAL units, each prefixed with a 4-byte start code.
pub fn marshal<T: AsRef<[u8]>>(units: &[T]) -> Vec<u8> {
    let len = units.iter().map(|u| START_CODE.len() + u.as_ref().len()).sum();
    let mut out = Vec::with_capacity(len);
    for unit in units {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(unit.as_ref());
    }
    out
}

/// Split an Annex-B stream into NAL units, excluding start codes.
///
/// The start code length is tracked per NAL so that boundaries between
/// adjacent NALs are computed correctly when 3-byte and 4-byte start codes
/// are mixed. Bytes before the first start code are ignored.
pub fn split(data: &[u8]) -> Vec<&[u8]> {
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == START_CODE {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nal_units = Vec::with_capacity(start_entries.len());
    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = if idx + 1 < start_entries.len() {
            let (next_start, next_sc_len) = start_entries[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };

        if start < end {
            nal_units.push(&data[start..end]);
        }
    }

    nal_units
}
