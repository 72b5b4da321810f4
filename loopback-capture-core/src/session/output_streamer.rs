use crate::models::audio_format::AudioFormat;
use crate::models::error::CaptureError;
use crate::models::negotiated::NegotiatedFormats;
use crate::processing::resampler::Resampler;
use crate::traits::media_transform::TransformFactory;
use crate::traits::render_endpoint::RenderEndpoint;

/// A playback endpoint together with the format negotiated for it.
pub struct OutputTarget {
    pub endpoint: Box<dyn RenderEndpoint>,
    pub formats: NegotiatedFormats,
}

/// What happened to one packet on the live path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Frames committed to the endpoint (after resampling).
    Rendered(u32),
    /// Not enough free space; the packet only went to the file.
    Skipped,
}

/// Re-streams captured frames to an independently clocked playback endpoint.
///
/// Never blocks on the endpoint: a packet that does not fit into the free
/// part of the endpoint buffer is skipped for playback.
pub struct OutputStreamer {
    endpoint: Box<dyn RenderEndpoint>,
    input_format: AudioFormat,
    output_format: AudioFormat,
    resampler: Option<Resampler>,
    started: bool,
}

impl OutputStreamer {
    /// Fails with `ResamplerInitFailed` when the formats differ and no
    /// resampler can bridge them.
    pub fn new(
        target: OutputTarget,
        input_format: &AudioFormat,
        factory: Option<&dyn TransformFactory>,
        quality: u32,
    ) -> Result<Self, CaptureError> {
        let output_format = target.formats.output_format;
        let resampler = Resampler::build(input_format, &output_format, factory, quality)?;
        Ok(Self {
            endpoint: target.endpoint,
            input_format: *input_format,
            output_format,
            resampler,
            started: false,
        })
    }

    pub fn output_format(&self) -> &AudioFormat {
        &self.output_format
    }

    pub fn has_resampler(&self) -> bool {
        self.resampler.is_some()
    }

    fn ratio(&self) -> f64 {
        self.output_format.sample_rate() as f64 / self.input_format.sample_rate() as f64
    }

    /// Push one packet's worth of captured frames.
    pub fn render(&mut self, data: &[u8], frames: u32) -> Result<RenderOutcome, CaptureError> {
        if !self.started {
            self.endpoint.start()?;
            if let Some(resampler) = self.resampler.as_mut() {
                resampler.begin()?;
            }
            self.started = true;
            log::debug!("Live output started ({})", self.output_format);
        }

        let buffer_size = self.endpoint.buffer_size()?;
        let padding = self.endpoint.current_padding()?;
        let free = buffer_size.saturating_sub(padding);
        if free < frames {
            log::trace!("Output buffer has {} free frames, skipping {} frames", free, frames);
            return Ok(RenderOutcome::Skipped);
        }

        // one extra frame absorbs rounding in the rate conversion
        let reserve = ((frames as f64 * self.ratio()) as u32 + 1).min(free);
        let output_block_align = self.output_format.block_align() as usize;
        let input_block_align = self.input_format.block_align() as usize;

        let produced = {
            let buffer = self.endpoint.get_buffer(reserve)?;
            match self.resampler.as_mut() {
                Some(resampler) => resampler.process(data, frames, buffer, reserve),
                None => {
                    let copy_frames = (frames as usize)
                        .min(reserve as usize)
                        .min(data.len() / input_block_align)
                        .min(buffer.len() / output_block_align);
                    let len = copy_frames * output_block_align;
                    buffer[..len].copy_from_slice(&data[..len]);
                    Ok(copy_frames as u32)
                }
            }
        };

        match produced {
            Ok(written) => {
                self.endpoint.release_buffer(written)?;
                Ok(RenderOutcome::Rendered(written))
            }
            Err(e) => {
                if let Err(release_error) = self.endpoint.release_buffer(0) {
                    log::error!("Failed to release output buffer: {}", release_error);
                }
                Err(e)
            }
        }
    }

    /// Stop, flush and restart playback after a stale-packet discard.
    pub fn resync(&mut self) -> Result<(), CaptureError> {
        if !self.started {
            return Ok(());
        }
        self.endpoint.stop()?;
        self.endpoint.reset()?;
        self.endpoint.start()?;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        self.endpoint.stop()
    }

    /// Send the resampler its end-of-stream sequence.
    pub fn end_stream(&mut self) -> Result<(), CaptureError> {
        match self.resampler.as_mut() {
            Some(resampler) => resampler.end(),
            None => Ok(()),
        }
    }
}
