use crate::models::audio_format::{AudioFormat, SampleKind};
use crate::models::error::CaptureError;
use crate::traits::media_transform::{
    MediaTransform, MediaTypeDescription, TransformFactory, TransformMessage, TransformOutput,
};

const I16_SCALE: f64 = 32768.0;

/// Converts captured frames into the output endpoint's format.
///
/// Built once per session, and only when the capture and output formats
/// differ. Prefers the platform transform; the linear fallback covers
/// 16-bit PCM to float conversions when no transform is available.
pub enum Resampler {
    Transform(TransformResampler),
    Linear(LinearResampler),
}

impl Resampler {
    /// Build the resampler for a capture/output format pair.
    ///
    /// Returns `Ok(None)` when the formats are identical and frames can be
    /// passed through unmodified.
    pub fn build(
        input: &AudioFormat,
        output: &AudioFormat,
        factory: Option<&dyn TransformFactory>,
        quality: u32,
    ) -> Result<Option<Self>, CaptureError> {
        if input.is_identical_to(output) {
            log::debug!("Capture and output formats match ({}), no resampler needed", input);
            return Ok(None);
        }

        if let Some(factory) = factory {
            match TransformResampler::new(factory, input, output, quality) {
                Ok(transform) => {
                    log::info!(
                        "Using transform resampler {} -> {} (quality {})",
                        input,
                        output,
                        quality
                    );
                    return Ok(Some(Self::Transform(transform)));
                }
                Err(e) => log::warn!("Transform resampler unavailable, trying linear fallback: {}", e),
            }
        }

        let linear = LinearResampler::new(input, output)?;
        log::info!("Using linear resampler {} -> {}", input, output);
        Ok(Some(Self::Linear(linear)))
    }

    /// Start-of-stream sequence, sent before the first frame is pushed.
    pub fn begin(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Transform(transform) => transform.begin(),
            Self::Linear(_) => Ok(()),
        }
    }

    /// Convert `frames` frames from `src` into `dst`, writing at most
    /// `capacity_frames` output frames. Returns the frames produced.
    pub fn process(
        &mut self,
        src: &[u8],
        frames: u32,
        dst: &mut [u8],
        capacity_frames: u32,
    ) -> Result<u32, CaptureError> {
        match self {
            Self::Transform(transform) => transform.process(src, frames, dst, capacity_frames),
            Self::Linear(linear) => linear.process(src, frames, dst, capacity_frames),
        }
    }

    /// End-of-stream sequence, sent during teardown.
    pub fn end(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Transform(transform) => transform.end(),
            Self::Linear(_) => Ok(()),
        }
    }

    pub fn is_transform(&self) -> bool {
        matches!(self, Self::Transform(_))
    }
}

/// Resampler backed by a platform media transform.
pub struct TransformResampler {
    transform: Box<dyn MediaTransform>,
    input_block_align: usize,
    output_block_align: usize,
    streaming: bool,
}

impl TransformResampler {
    pub fn new(
        factory: &dyn TransformFactory,
        input: &AudioFormat,
        output: &AudioFormat,
        quality: u32,
    ) -> Result<Self, CaptureError> {
        let transform = factory.create(
            &MediaTypeDescription::describe(input),
            &MediaTypeDescription::describe(output),
            quality,
        )?;
        Ok(Self {
            transform,
            input_block_align: input.block_align() as usize,
            output_block_align: output.block_align() as usize,
            streaming: false,
        })
    }

    pub fn begin(&mut self) -> Result<(), CaptureError> {
        if self.streaming {
            return Ok(());
        }
        for message in [
            TransformMessage::Flush,
            TransformMessage::BeginStreaming,
            TransformMessage::StartOfStream,
        ] {
            self.transform.process_message(message)?;
        }
        self.streaming = true;
        Ok(())
    }

    pub fn process(
        &mut self,
        src: &[u8],
        frames: u32,
        dst: &mut [u8],
        capacity_frames: u32,
    ) -> Result<u32, CaptureError> {
        let input_len = (frames as usize * self.input_block_align).min(src.len());
        if input_len == 0 {
            return Ok(0);
        }
        self.transform.process_input(&src[..input_len])?;

        let capacity = (capacity_frames as usize * self.output_block_align).min(dst.len());
        let mut written = 0;
        while written < capacity {
            match self.transform.process_output(&mut dst[written..capacity])? {
                TransformOutput::Produced(0) | TransformOutput::NeedMoreInput => break,
                TransformOutput::Produced(bytes) => written += bytes.min(capacity - written),
            }
        }

        Ok((written / self.output_block_align) as u32)
    }

    pub fn end(&mut self) -> Result<(), CaptureError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        for message in [
            TransformMessage::EndOfStream,
            TransformMessage::Drain,
            TransformMessage::EndStreaming,
        ] {
            self.transform.process_message(message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinearMode {
    /// 32-bit float destination, any rate ratio.
    Interpolate,
    /// 64-bit float destination at the source rate.
    Widen,
}

/// Linear-interpolation fallback from 16-bit PCM to float.
///
/// Source samples are normalized as `i16 / 32768.0`. For output frame `i`
/// the source position is `i / ratio`; the two neighbouring frames are
/// blended by its fractional part, with the upper neighbour clamped to the
/// last source frame.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    mode: LinearMode,
    channels: usize,
    ratio: f64,
    input_block_align: usize,
    output_block_align: usize,
}

impl LinearResampler {
    pub fn new(input: &AudioFormat, output: &AudioFormat) -> Result<Self, CaptureError> {
        if input.sample_kind() != SampleKind::Pcm || input.bits_per_sample() != 16 {
            return Err(CaptureError::ResamplerInitFailed(format!(
                "linear fallback needs 16-bit PCM input, got {}",
                input
            )));
        }
        if input.channels() != output.channels() {
            return Err(CaptureError::ResamplerInitFailed(format!(
                "linear fallback cannot remap {} to {} channels",
                input.channels(),
                output.channels()
            )));
        }
        if output.sample_kind() != SampleKind::Float {
            return Err(CaptureError::ResamplerInitFailed(format!(
                "linear fallback only produces float output, got {}",
                output
            )));
        }

        let mode = match output.bits_per_sample() {
            32 => LinearMode::Interpolate,
            64 if input.sample_rate() == output.sample_rate() => LinearMode::Widen,
            64 => {
                return Err(CaptureError::ResamplerInitFailed(format!(
                    "linear fallback cannot change rate for 64-bit output ({} -> {} Hz)",
                    input.sample_rate(),
                    output.sample_rate()
                )))
            }
            bits => {
                return Err(CaptureError::ResamplerInitFailed(format!(
                    "unsupported float width: {} bits",
                    bits
                )))
            }
        };

        Ok(Self {
            mode,
            channels: input.channels() as usize,
            ratio: output.sample_rate() as f64 / input.sample_rate() as f64,
            input_block_align: input.block_align() as usize,
            output_block_align: output.block_align() as usize,
        })
    }

    /// Output rate divided by input rate.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn process(
        &mut self,
        src: &[u8],
        frames: u32,
        dst: &mut [u8],
        capacity_frames: u32,
    ) -> Result<u32, CaptureError> {
        let source_frames = (frames as usize).min(src.len() / self.input_block_align);
        if source_frames == 0 {
            return Ok(0);
        }

        let wanted = match self.mode {
            LinearMode::Interpolate => (source_frames as f64 * self.ratio).floor() as usize,
            LinearMode::Widen => source_frames,
        };
        let out_frames = wanted
            .min(capacity_frames as usize)
            .min(dst.len() / self.output_block_align);

        let sample = |frame: usize, channel: usize| -> f64 {
            let at = (frame * self.channels + channel) * 2;
            i16::from_le_bytes([src[at], src[at + 1]]) as f64 / I16_SCALE
        };

        match self.mode {
            LinearMode::Interpolate => {
                let last = source_frames - 1;
                for i in 0..out_frames {
                    let real_pos = i as f64 / self.ratio;
                    let lower = (real_pos.floor() as usize).min(last);
                    let upper = (lower + 1).min(last);
                    let frac = real_pos - lower as f64;
                    for channel in 0..self.channels {
                        let a = sample(lower, channel);
                        let b = sample(upper, channel);
                        let value = (a + (b - a) * frac) as f32;
                        let at = (i * self.channels + channel) * 4;
                        dst[at..at + 4].copy_from_slice(&value.to_le_bytes());
                    }
                }
            }
            LinearMode::Widen => {
                for i in 0..out_frames {
                    for channel in 0..self.channels {
                        let at = (i * self.channels + channel) * 8;
                        dst[at..at + 8].copy_from_slice(&sample(i, channel).to_le_bytes());
                    }
                }
            }
        }

        Ok(out_frames as u32)
    }
}
