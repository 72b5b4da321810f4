//! Media Foundation audio resampler (`CLSID_CResamplerMediaObject`) as a
//! [`TransformFactory`].

use std::mem::ManuallyDrop;
use std::sync::Arc;

use windows::core::{IUnknown, Interface, GUID};
use windows::Win32::Media::MediaFoundation::{
    IMFMediaType, IMFSample, IMFTransform, IWMResamplerProps, MFAudioFormat_Float, MFAudioFormat_PCM,
    MFCreateMediaType, MFCreateMemoryBuffer, MFCreateSample, MFMediaType_Audio, MFShutdown, MFStartup,
    CLSID_CResamplerMediaObject, MFSTARTUP_NOSOCKET, MFT_MESSAGE_COMMAND_DRAIN, MFT_MESSAGE_COMMAND_FLUSH,
    MFT_MESSAGE_NOTIFY_BEGIN_STREAMING, MFT_MESSAGE_NOTIFY_END_OF_STREAM, MFT_MESSAGE_NOTIFY_END_STREAMING,
    MFT_MESSAGE_NOTIFY_START_OF_STREAM, MFT_MESSAGE_TYPE, MFT_OUTPUT_DATA_BUFFER, MF_E_TRANSFORM_NEED_MORE_INPUT,
    MF_MT_ALL_SAMPLES_INDEPENDENT, MF_MT_AUDIO_AVG_BYTES_PER_SECOND, MF_MT_AUDIO_BITS_PER_SAMPLE,
    MF_MT_AUDIO_BLOCK_ALIGNMENT, MF_MT_AUDIO_CHANNEL_MASK, MF_MT_AUDIO_NUM_CHANNELS, MF_MT_AUDIO_SAMPLES_PER_SECOND,
    MF_MT_AUDIO_VALID_BITS_PER_SAMPLE, MF_MT_MAJOR_TYPE, MF_MT_SUBTYPE, MF_VERSION,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_INPROC_SERVER};

use loopback_capture_core::models::audio_format::SampleKind;
use loopback_capture_core::models::error::{CaptureError, CapturePhase};
use loopback_capture_core::traits::media_transform::{
    MediaTransform, MediaTypeDescription, TransformFactory, TransformMessage, TransformOutput,
};

/// Keeps Media Foundation started while any resampler is alive.
struct MediaFoundation;

impl MediaFoundation {
    fn start() -> Result<Arc<Self>, CaptureError> {
        unsafe { MFStartup(MF_VERSION, MFSTARTUP_NOSOCKET) }
            .map_err(|e| CaptureError::ResamplerInitFailed(format!("MFStartup failed: {}", e)))?;
        Ok(Arc::new(Self))
    }
}

impl Drop for MediaFoundation {
    fn drop(&mut self) {
        if let Err(e) = unsafe { MFShutdown() } {
            log::warn!("MFShutdown failed: {}", e);
        }
    }
}

/// Creates Media Foundation resamplers.
pub struct MfResamplerFactory {
    runtime: Arc<MediaFoundation>,
}

impl MfResamplerFactory {
    /// Start Media Foundation. Fails where the platform has no MF runtime
    /// (N editions without the media feature pack).
    pub fn new() -> Result<Self, CaptureError> {
        Ok(Self {
            runtime: MediaFoundation::start()?,
        })
    }
}

impl TransformFactory for MfResamplerFactory {
    fn create(
        &self,
        input: &MediaTypeDescription,
        output: &MediaTypeDescription,
        quality: u32,
    ) -> Result<Box<dyn MediaTransform>, CaptureError> {
        let init = |what: &str, e: windows::core::Error| CaptureError::ResamplerInitFailed(format!("{} failed: {}", what, e));

        let unknown: IUnknown = unsafe { CoCreateInstance(&CLSID_CResamplerMediaObject, None, CLSCTX_INPROC_SERVER) }
            .map_err(|e| init("CoCreateInstance(CResamplerMediaObject)", e))?;
        let transform: IMFTransform = unknown.cast().map_err(|e| init("QueryInterface(IMFTransform)", e))?;
        let props: IWMResamplerProps = unknown.cast().map_err(|e| init("QueryInterface(IWMResamplerProps)", e))?;
        unsafe { props.SetHalfFilterLength(quality as i32) }.map_err(|e| init("SetHalfFilterLength", e))?;

        let input_type = media_type(input).map_err(|e| init("input media type", e))?;
        unsafe { transform.SetInputType(0, &input_type, 0) }.map_err(|e| init("SetInputType", e))?;
        let output_type = media_type(output).map_err(|e| init("output media type", e))?;
        unsafe { transform.SetOutputType(0, &output_type, 0) }.map_err(|e| init("SetOutputType", e))?;

        log::debug!(
            "Media Foundation resampler {} Hz -> {} Hz, half filter length {}",
            input.sample_rate,
            output.sample_rate,
            quality
        );
        Ok(Box::new(MfResampler {
            transform,
            _runtime: Arc::clone(&self.runtime),
        }))
    }
}

fn media_type(description: &MediaTypeDescription) -> windows::core::Result<IMFMediaType> {
    let subtype: GUID = match description.subtype {
        SampleKind::Pcm => MFAudioFormat_PCM,
        SampleKind::Float => MFAudioFormat_Float,
    };
    unsafe {
        let media_type = MFCreateMediaType()?;
        media_type.SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Audio)?;
        media_type.SetGUID(&MF_MT_SUBTYPE, &subtype)?;
        media_type.SetUINT32(&MF_MT_AUDIO_NUM_CHANNELS, description.channels as u32)?;
        media_type.SetUINT32(&MF_MT_AUDIO_SAMPLES_PER_SECOND, description.sample_rate)?;
        media_type.SetUINT32(&MF_MT_AUDIO_BLOCK_ALIGNMENT, description.block_align as u32)?;
        media_type.SetUINT32(&MF_MT_AUDIO_AVG_BYTES_PER_SECOND, description.avg_bytes_per_sec)?;
        media_type.SetUINT32(&MF_MT_AUDIO_BITS_PER_SAMPLE, description.bits_per_sample as u32)?;
        media_type.SetUINT32(&MF_MT_ALL_SAMPLES_INDEPENDENT, description.all_samples_independent as u32)?;
        if let Some(mask) = description.channel_mask {
            media_type.SetUINT32(&MF_MT_AUDIO_CHANNEL_MASK, mask)?;
        }
        if let Some(bits) = description.valid_bits_per_sample {
            media_type.SetUINT32(&MF_MT_AUDIO_VALID_BITS_PER_SAMPLE, bits as u32)?;
        }
        Ok(media_type)
    }
}

struct MfResampler {
    transform: IMFTransform,
    _runtime: Arc<MediaFoundation>,
}

// SAFETY: the resampler DMO is free-threaded; one streamer owns it.
unsafe impl Send for MfResampler {}

impl MfResampler {
    fn render_error(what: &str, e: windows::core::Error) -> CaptureError {
        CaptureError::device(CapturePhase::Render, format!("{} failed: {}", what, e))
    }
}

impl MediaTransform for MfResampler {
    fn process_message(&mut self, message: TransformMessage) -> Result<(), CaptureError> {
        let message_type: MFT_MESSAGE_TYPE = match message {
            TransformMessage::Flush => MFT_MESSAGE_COMMAND_FLUSH,
            TransformMessage::BeginStreaming => MFT_MESSAGE_NOTIFY_BEGIN_STREAMING,
            TransformMessage::StartOfStream => MFT_MESSAGE_NOTIFY_START_OF_STREAM,
            TransformMessage::EndOfStream => MFT_MESSAGE_NOTIFY_END_OF_STREAM,
            TransformMessage::Drain => MFT_MESSAGE_COMMAND_DRAIN,
            TransformMessage::EndStreaming => MFT_MESSAGE_NOTIFY_END_STREAMING,
        };
        unsafe { self.transform.ProcessMessage(message_type, 0) }
            .map_err(|e| Self::render_error(&format!("ProcessMessage({:?})", message), e))
    }

    fn process_input(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let sample = unsafe {
            let buffer = MFCreateMemoryBuffer(data.len() as u32).map_err(|e| Self::render_error("MFCreateMemoryBuffer", e))?;
            let mut dst: *mut u8 = std::ptr::null_mut();
            buffer.Lock(&mut dst, None, None).map_err(|e| Self::render_error("IMFMediaBuffer::Lock", e))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            buffer.Unlock().map_err(|e| Self::render_error("IMFMediaBuffer::Unlock", e))?;
            buffer
                .SetCurrentLength(data.len() as u32)
                .map_err(|e| Self::render_error("SetCurrentLength", e))?;

            let sample: IMFSample = MFCreateSample().map_err(|e| Self::render_error("MFCreateSample", e))?;
            sample.AddBuffer(&buffer).map_err(|e| Self::render_error("AddBuffer", e))?;
            sample
        };
        unsafe { self.transform.ProcessInput(0, &sample, 0) }.map_err(|e| Self::render_error("ProcessInput", e))
    }

    fn process_output(&mut self, dst: &mut [u8]) -> Result<TransformOutput, CaptureError> {
        if dst.is_empty() {
            return Ok(TransformOutput::Produced(0));
        }

        let (sample, buffer) = unsafe {
            let buffer = MFCreateMemoryBuffer(dst.len() as u32).map_err(|e| Self::render_error("MFCreateMemoryBuffer", e))?;
            let sample: IMFSample = MFCreateSample().map_err(|e| Self::render_error("MFCreateSample", e))?;
            sample.AddBuffer(&buffer).map_err(|e| Self::render_error("AddBuffer", e))?;
            (sample, buffer)
        };

        let mut output = [MFT_OUTPUT_DATA_BUFFER {
            dwStreamID: 0,
            pSample: ManuallyDrop::new(Some(sample)),
            dwStatus: 0,
            pEvents: ManuallyDrop::new(None),
        }];
        let mut status = 0u32;
        let result = unsafe { self.transform.ProcessOutput(0, &mut output, &mut status) };
        for slot in output.iter_mut() {
            unsafe {
                ManuallyDrop::drop(&mut slot.pSample);
                ManuallyDrop::drop(&mut slot.pEvents);
            }
        }

        match result {
            Ok(()) => {}
            Err(e) if e.code() == MF_E_TRANSFORM_NEED_MORE_INPUT => return Ok(TransformOutput::NeedMoreInput),
            Err(e) => return Err(Self::render_error("ProcessOutput", e)),
        }

        unsafe {
            let produced = buffer
                .GetCurrentLength()
                .map_err(|e| Self::render_error("GetCurrentLength", e))? as usize;
            let produced = produced.min(dst.len());
            let mut src: *mut u8 = std::ptr::null_mut();
            buffer.Lock(&mut src, None, None).map_err(|e| Self::render_error("IMFMediaBuffer::Lock", e))?;
            std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), produced);
            buffer.Unlock().map_err(|e| Self::render_error("IMFMediaBuffer::Unlock", e))?;
            Ok(TransformOutput::Produced(produced))
        }
    }
}
