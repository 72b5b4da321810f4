use crate::models::audio_format::{AudioFormat, SampleKind};
use crate::models::error::CaptureError;

/// Full description of an audio media type handed to a transform.
///
/// Channel mask and valid bits are only set when they differ from what the
/// rest of the description implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaTypeDescription {
    pub subtype: SampleKind,
    pub channels: u16,
    pub sample_rate: u32,
    pub block_align: u16,
    pub avg_bytes_per_sec: u32,
    pub bits_per_sample: u16,
    pub all_samples_independent: bool,
    pub channel_mask: Option<u32>,
    pub valid_bits_per_sample: Option<u16>,
}

impl MediaTypeDescription {
    pub fn describe(format: &AudioFormat) -> Self {
        let extensible = format.extensible_fields();
        Self {
            subtype: format.sample_kind(),
            channels: format.channels(),
            sample_rate: format.sample_rate(),
            block_align: format.block_align(),
            avg_bytes_per_sec: format.avg_bytes_per_sec(),
            bits_per_sample: format.bits_per_sample(),
            all_samples_independent: true,
            channel_mask: extensible.map(|f| f.channel_mask).filter(|mask| *mask != 0),
            valid_bits_per_sample: extensible
                .map(|f| f.valid_bits_per_sample)
                .filter(|bits| *bits != format.bits_per_sample()),
        }
    }
}

/// Stream-level commands sent to a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMessage {
    Flush,
    BeginStreaming,
    StartOfStream,
    EndOfStream,
    Drain,
    EndStreaming,
}

/// Result of pulling output from a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutput {
    /// Bytes copied into the destination.
    Produced(usize),
    /// Not enough input buffered yet; not an error.
    NeedMoreInput,
}

/// A generic sample-format/rate conversion service.
pub trait MediaTransform: Send {
    fn process_message(&mut self, message: TransformMessage) -> Result<(), CaptureError>;

    fn process_input(&mut self, data: &[u8]) -> Result<(), CaptureError>;

    fn process_output(&mut self, dst: &mut [u8]) -> Result<TransformOutput, CaptureError>;
}

/// Creates configured transforms. Present only where the platform offers one.
pub trait TransformFactory: Send + Sync {
    /// `quality` is the half filter length, 1..=60.
    fn create(
        &self,
        input: &MediaTypeDescription,
        output: &MediaTypeDescription,
        quality: u32,
    ) -> Result<Box<dyn MediaTransform>, CaptureError>;
}
