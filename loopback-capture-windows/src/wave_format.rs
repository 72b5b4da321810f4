//! Conversions between [`AudioFormat`] and the `WAVEFORMATEX` family.

use std::mem::size_of;
use std::ptr;

use windows::core::GUID;
use windows::Win32::Media::Audio::{WAVEFORMATEX, WAVEFORMATEXTENSIBLE, WAVEFORMATEXTENSIBLE_0};
use windows::Win32::Media::KernelStreaming::KSDATAFORMAT_SUBTYPE_PCM;
use windows::Win32::Media::Multimedia::KSDATAFORMAT_SUBTYPE_IEEE_FLOAT;
use windows::Win32::System::Com::CoTaskMemFree;

use loopback_capture_core::models::audio_format::{AudioFormat, ExtensibleFields, FormatTag, SampleKind};
use loopback_capture_core::models::error::CaptureError;

/// Bytes following `WAVEFORMATEX` in an extensible record.
const EXTENSIBLE_EXTRA_SIZE: u16 = (size_of::<WAVEFORMATEXTENSIBLE>() - size_of::<WAVEFORMATEX>()) as u16;

/// An owned wave format record that can be handed to WASAPI by pointer.
pub struct WaveFormat {
    record: WAVEFORMATEXTENSIBLE,
}

impl WaveFormat {
    pub fn from_audio_format(format: &AudioFormat) -> Self {
        let base = WAVEFORMATEX {
            wFormatTag: format.tag().code(),
            nChannels: format.channels(),
            nSamplesPerSec: format.sample_rate(),
            nAvgBytesPerSec: format.avg_bytes_per_sec(),
            nBlockAlign: format.block_align(),
            wBitsPerSample: format.bits_per_sample(),
            cbSize: 0,
        };

        let record = match format.extensible_fields() {
            Some(fields) => WAVEFORMATEXTENSIBLE {
                Format: WAVEFORMATEX {
                    cbSize: EXTENSIBLE_EXTRA_SIZE,
                    ..base
                },
                Samples: WAVEFORMATEXTENSIBLE_0 {
                    wValidBitsPerSample: fields.valid_bits_per_sample,
                },
                dwChannelMask: fields.channel_mask,
                SubFormat: subformat_guid(fields.subtype),
            },
            None => WAVEFORMATEXTENSIBLE {
                Format: base,
                Samples: WAVEFORMATEXTENSIBLE_0 { wValidBitsPerSample: 0 },
                dwChannelMask: 0,
                SubFormat: GUID::zeroed(),
            },
        };
        Self { record }
    }

    pub fn as_ptr(&self) -> *const WAVEFORMATEX {
        ptr::addr_of!(self.record).cast()
    }
}

/// A wave format allocated by WASAPI with `CoTaskMemAlloc`, freed on drop.
pub struct TaskMemFormat(*mut WAVEFORMATEX);

impl TaskMemFormat {
    /// Take ownership of a pointer returned by `GetMixFormat` or `IsFormatSupported`.
    ///
    /// # Safety
    /// `raw` must be null or a `CoTaskMemAlloc` allocation holding a valid record.
    pub unsafe fn from_raw(raw: *mut WAVEFORMATEX) -> Option<Self> {
        (!raw.is_null()).then_some(Self(raw))
    }

    pub fn to_audio_format(&self) -> Result<AudioFormat, CaptureError> {
        // SAFETY: non-null and valid per `from_raw`.
        unsafe { audio_format_from_ptr(self.0) }
    }
}

impl Drop for TaskMemFormat {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
    }
}

/// Read a wave format record of any supported tag.
///
/// # Safety
/// `raw` must point to a valid record; if it is extensible, to the full
/// `WAVEFORMATEXTENSIBLE`.
pub unsafe fn audio_format_from_ptr(raw: *const WAVEFORMATEX) -> Result<AudioFormat, CaptureError> {
    let base = ptr::read_unaligned(raw);
    let code = base.wFormatTag;
    let channels = base.nChannels;
    let sample_rate = base.nSamplesPerSec;
    let bits = base.wBitsPerSample;

    let tag = FormatTag::from_code(code).ok_or_else(|| {
        CaptureError::FormatNegotiationFailed(format!("unsupported wave format tag 0x{:04x}", code))
    })?;

    let format = match tag {
        FormatTag::Pcm => AudioFormat::pcm(channels, sample_rate, bits),
        FormatTag::Float => AudioFormat::float(channels, sample_rate, bits),
        FormatTag::Extensible => {
            if base.cbSize < EXTENSIBLE_EXTRA_SIZE {
                return Err(CaptureError::FormatNegotiationFailed(format!(
                    "extensible record too short ({} extra bytes)",
                    base.cbSize
                )));
            }
            let ext = ptr::read_unaligned(raw.cast::<WAVEFORMATEXTENSIBLE>());
            let sub_format = ext.SubFormat;
            let subtype = sample_kind_from_guid(&sub_format).ok_or_else(|| {
                CaptureError::FormatNegotiationFailed(format!("unsupported sub-format {:?}", sub_format))
            })?;
            AudioFormat::extensible(
                channels,
                sample_rate,
                bits,
                ExtensibleFields {
                    channel_mask: ext.dwChannelMask,
                    valid_bits_per_sample: ext.Samples.wValidBitsPerSample,
                    subtype,
                },
            )
        }
    };

    format
        .validate()
        .map_err(CaptureError::FormatNegotiationFailed)?;
    Ok(format)
}

fn subformat_guid(kind: SampleKind) -> GUID {
    match kind {
        SampleKind::Pcm => KSDATAFORMAT_SUBTYPE_PCM,
        SampleKind::Float => KSDATAFORMAT_SUBTYPE_IEEE_FLOAT,
    }
}

fn sample_kind_from_guid(guid: &GUID) -> Option<SampleKind> {
    if *guid == KSDATAFORMAT_SUBTYPE_PCM {
        Some(SampleKind::Pcm)
    } else if *guid == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT {
        Some(SampleKind::Float)
    } else {
        None
    }
}
