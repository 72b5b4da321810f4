use serde::Serialize;

/// Wire format tag of a sample format record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    /// Integer PCM (`WAVE_FORMAT_PCM`).
    Pcm,
    /// IEEE float (`WAVE_FORMAT_IEEE_FLOAT`).
    Float,
    /// Extensible record with a subtype and channel mask (`WAVE_FORMAT_EXTENSIBLE`).
    Extensible,
}

impl FormatTag {
    pub const PCM_CODE: u16 = 0x0001;
    pub const FLOAT_CODE: u16 = 0x0003;
    pub const EXTENSIBLE_CODE: u16 = 0xFFFE;

    /// Numeric tag as written into a format record.
    pub fn code(self) -> u16 {
        match self {
            Self::Pcm => Self::PCM_CODE,
            Self::Float => Self::FLOAT_CODE,
            Self::Extensible => Self::EXTENSIBLE_CODE,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            Self::PCM_CODE => Some(Self::Pcm),
            Self::FLOAT_CODE => Some(Self::Float),
            Self::EXTENSIBLE_CODE => Some(Self::Extensible),
            _ => None,
        }
    }
}

/// Sample encoding, independent of how the record is tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Pcm,
    Float,
}

/// Fields only present on extensible format records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExtensibleFields {
    pub channel_mask: u32,
    pub valid_bits_per_sample: u16,
    pub subtype: SampleKind,
}

/// An interleaved audio sample format.
///
/// `block_align` and `avg_bytes_per_sec` are always derived from the
/// channel count, sample rate and bit depth; there is no way to set them
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AudioFormat {
    tag: FormatTag,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    extensible: Option<ExtensibleFields>,
}

impl AudioFormat {
    /// Integer PCM.
    pub fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            tag: FormatTag::Pcm,
            channels,
            sample_rate,
            bits_per_sample,
            extensible: None,
        }
    }

    /// IEEE float (32- or 64-bit).
    pub fn float(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            tag: FormatTag::Float,
            channels,
            sample_rate,
            bits_per_sample,
            extensible: None,
        }
    }

    /// Extensible record, as most shared-mode mix formats are reported.
    pub fn extensible(channels: u16, sample_rate: u32, bits_per_sample: u16, fields: ExtensibleFields) -> Self {
        Self {
            tag: FormatTag::Extensible,
            channels,
            sample_rate,
            bits_per_sample,
            extensible: Some(fields),
        }
    }

    pub fn tag(&self) -> FormatTag {
        self.tag
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn extensible_fields(&self) -> Option<&ExtensibleFields> {
        self.extensible.as_ref()
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u16 {
        self.bits_per_sample / 8 * self.channels
    }

    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Sample encoding, resolving the subtype of extensible records.
    pub fn sample_kind(&self) -> SampleKind {
        match (self.tag, self.extensible) {
            (FormatTag::Pcm, _) => SampleKind::Pcm,
            (FormatTag::Float, _) => SampleKind::Float,
            (FormatTag::Extensible, Some(fields)) => fields.subtype,
            (FormatTag::Extensible, None) => SampleKind::Pcm,
        }
    }

    pub fn is_float(&self) -> bool {
        self.sample_kind() == SampleKind::Float
    }

    /// Whether the format fits the fixed 18-byte record of a classic WAV header.
    pub fn is_file_representable(&self) -> bool {
        self.tag != FormatTag::Extensible
    }

    /// Field-by-field comparison used to decide whether resampling is needed.
    pub fn is_identical_to(&self, other: &AudioFormat) -> bool {
        self.tag == other.tag
            && self.channels == other.channels
            && self.sample_rate == other.sample_rate
            && self.bits_per_sample == other.bits_per_sample
            && self.block_align() == other.block_align()
            && self.avg_bytes_per_sec() == other.avg_bytes_per_sec()
            && self.extensible == other.extensible
    }

    /// Number of bytes occupied by `frames` frames.
    pub fn bytes_for_frames(&self, frames: u32) -> u64 {
        frames as u64 * self.block_align() as u64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 {
            return Err("channel count must be positive".into());
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(format!("unsupported bits per sample: {}", self.bits_per_sample));
        }
        Ok(())
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.sample_kind() {
            SampleKind::Pcm => "pcm",
            SampleKind::Float => "float",
        };
        write!(
            f,
            "{}-bit {} {} ch @ {} Hz{}",
            self.bits_per_sample,
            kind,
            self.channels,
            self.sample_rate,
            if self.tag == FormatTag::Extensible { " (extensible)" } else { "" }
        )
    }
}

impl Default for AudioFormat {
    /// 16-bit stereo PCM at 44.1 kHz, the format requested from the loopback client.
    fn default() -> Self {
        Self::pcm(2, 44100, 16)
    }
}
