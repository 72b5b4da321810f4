//! WAV container layout.
//!
//! The header carries the classic 18-byte format record (extension size
//! zero), so a standard header is 46 bytes:
//!
//! ```text
//! [0-3]    "RIFF"
//! [4-7]    data_size + header_size - 8   (patched on finalize)
//! [8-11]   "WAVE"
//! [12-15]  "fmt "
//! [16-19]  18 (format record size)
//! [20-21]  format tag (1 = PCM, 3 = IEEE float)
//! [22-23]  channels
//! [24-27]  sample_rate
//! [28-31]  avg_bytes_per_sec
//! [32-33]  block_align
//! [34-35]  bits_per_sample
//! [36-37]  0 (extension size)
//! [38-41]  "data"
//! [42-45]  data_size                     (patched on finalize)
//! ```
//!
//! Extensible formats do not fit the fixed record; they are written as raw
//! samples with no header at all.

use crate::models::audio_format::AudioFormat;

/// Size of the fixed format record written into the `fmt ` chunk.
pub const FORMAT_RECORD_SIZE: u32 = 18;

/// Size of the standard header in bytes.
pub const WAV_HEADER_SIZE: usize = 46;

/// Offset of the RIFF total-size field.
pub const RIFF_SIZE_OFFSET: u64 = 4;

/// Bytes not counted by the RIFF size field ("RIFF" tag and the field itself).
pub const RIFF_PREAMBLE_SIZE: u32 = 8;

/// Generate the provisional header with both size fields set to zero.
///
/// Returns `None` for formats that need the extensible record.
pub fn generate_wav_header(format: &AudioFormat) -> Option<[u8; WAV_HEADER_SIZE]> {
    if !format.is_file_representable() {
        return None;
    }

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&0u32.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&FORMAT_RECORD_SIZE.to_le_bytes());
    header[20..22].copy_from_slice(&format.tag().code().to_le_bytes());
    header[22..24].copy_from_slice(&format.channels().to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate().to_le_bytes());
    header[28..32].copy_from_slice(&format.avg_bytes_per_sec().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample().to_le_bytes());
    header[36..38].copy_from_slice(&0u16.to_le_bytes());

    // data sub-chunk
    header[38..42].copy_from_slice(b"data");
    header[42..46].copy_from_slice(&0u32.to_le_bytes());

    Some(header)
}

/// Offset of the data-size field: the last four bytes of the header.
pub fn data_size_offset(header_size: u32) -> u64 {
    (header_size - 4) as u64
}

/// Value of the RIFF total-size field for a finished file.
pub fn riff_size(data_size: u32, header_size: u32) -> u32 {
    data_size + (header_size - RIFF_PREAMBLE_SIZE)
}

/// Largest data size for which both patched size fields stay representable.
pub fn max_data_size(header_size: u32) -> u32 {
    u32::MAX - header_size.saturating_sub(RIFF_PREAMBLE_SIZE)
}
