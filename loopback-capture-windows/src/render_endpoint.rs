//! Shared-mode render client used as the live re-stream target.

use windows::Win32::Foundation::{S_FALSE, S_OK};
use windows::Win32::Media::Audio::{IAudioClient, IAudioRenderClient, IMMDevice, AUDCLNT_SHAREMODE_SHARED, WAVEFORMATEX};
use windows::Win32::System::Com::CLSCTX_ALL;

use loopback_capture_core::models::audio_format::AudioFormat;
use loopback_capture_core::models::error::{CaptureError, CapturePhase};
use loopback_capture_core::models::negotiated::NegotiatedFormats;
use loopback_capture_core::processing::negotiation::{choose_output_format, desired_output_format, FormatSupport};
use loopback_capture_core::session::output_streamer::OutputTarget;
use loopback_capture_core::traits::render_endpoint::RenderEndpoint;

use crate::wave_format::{TaskMemFormat, WaveFormat};

/// An initialized render client.
pub struct WasapiRenderEndpoint {
    audio_client: IAudioClient,
    render_client: IAudioRenderClient,
    block_align: usize,
}

// SAFETY: MTA interfaces, owned and used by one session at a time.
unsafe impl Send for WasapiRenderEndpoint {}

impl WasapiRenderEndpoint {
    /// Negotiate a format with `device`, initialize a shared-mode client in it
    /// and return the endpoint ready to be handed to a capturer.
    pub fn open(device: &IMMDevice) -> Result<OutputTarget, CaptureError> {
        let audio_client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("Activate failed: {}", e)))?;

        let formats = negotiate(&audio_client)?;
        let wave_format = WaveFormat::from_audio_format(&formats.output_format);

        unsafe { audio_client.Initialize(AUDCLNT_SHAREMODE_SHARED, 0, 0, 0, wave_format.as_ptr(), None) }
            .map_err(|e| {
                CaptureError::FormatNegotiationFailed(format!("IAudioClient::Initialize (render) failed: {}", e))
            })?;

        let render_client: IAudioRenderClient = unsafe { audio_client.GetService() }
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("GetService failed: {}", e)))?;

        let endpoint = Self {
            audio_client,
            render_client,
            block_align: formats.output_format.block_align() as usize,
        };
        Ok(OutputTarget {
            endpoint: Box::new(endpoint),
            formats,
        })
    }
}

/// Ask the endpoint about the desired format and settle on one.
fn negotiate(audio_client: &IAudioClient) -> Result<NegotiatedFormats, CaptureError> {
    let mix_ptr = unsafe { audio_client.GetMixFormat() }
        .map_err(|e| CaptureError::FormatNegotiationFailed(format!("GetMixFormat failed: {}", e)))?;
    // SAFETY: GetMixFormat returns a CoTaskMemAlloc'd record.
    let mix_format = unsafe { TaskMemFormat::from_raw(mix_ptr) }
        .ok_or_else(|| CaptureError::FormatNegotiationFailed("endpoint reported no mix format".into()))?
        .to_audio_format()?;
    log::debug!("Endpoint mix format: {}", mix_format);

    let desired = desired_output_format();
    let support = query_support(audio_client, &desired)?;
    Ok(choose_output_format(desired, mix_format, support))
}

fn query_support(audio_client: &IAudioClient, desired: &AudioFormat) -> Result<FormatSupport, CaptureError> {
    let wave_format = WaveFormat::from_audio_format(desired);
    let mut closest_ptr: *mut WAVEFORMATEX = std::ptr::null_mut();
    let hr = unsafe { audio_client.IsFormatSupported(AUDCLNT_SHAREMODE_SHARED, wave_format.as_ptr(), Some(&mut closest_ptr)) };
    // SAFETY: a non-null closest match is a CoTaskMemAlloc'd record owned by us.
    let closest = unsafe { TaskMemFormat::from_raw(closest_ptr) };

    if hr == S_OK {
        return Ok(FormatSupport::Supported);
    }
    match closest {
        Some(closest) if hr == S_FALSE => Ok(FormatSupport::ClosestMatch(closest.to_audio_format()?)),
        _ => {
            log::debug!("Desired format {} rejected by endpoint: {}", desired, hr.message());
            Ok(FormatSupport::Unsupported)
        }
    }
}

impl RenderEndpoint for WasapiRenderEndpoint {
    fn start(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Start() }
            .map_err(|e| CaptureError::device(CapturePhase::Render, format!("IAudioClient::Start failed: {}", e)))
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Stop() }
            .map_err(|e| CaptureError::device(CapturePhase::Render, format!("IAudioClient::Stop failed: {}", e)))
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Reset() }
            .map_err(|e| CaptureError::device(CapturePhase::Render, format!("IAudioClient::Reset failed: {}", e)))
    }

    fn current_padding(&mut self) -> Result<u32, CaptureError> {
        unsafe { self.audio_client.GetCurrentPadding() }
            .map_err(|e| CaptureError::device(CapturePhase::Render, format!("GetCurrentPadding failed: {}", e)))
    }

    fn buffer_size(&mut self) -> Result<u32, CaptureError> {
        unsafe { self.audio_client.GetBufferSize() }
            .map_err(|e| CaptureError::device(CapturePhase::Render, format!("GetBufferSize failed: {}", e)))
    }

    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8], CaptureError> {
        let buffer_ptr = unsafe { self.render_client.GetBuffer(frames) }
            .map_err(|e| CaptureError::device(CapturePhase::Render, format!("GetBuffer failed: {}", e)))?;
        let len = frames as usize * self.block_align;
        if buffer_ptr.is_null() || len == 0 {
            return Ok(&mut []);
        }
        // SAFETY: WASAPI guarantees `frames * block_align` writable bytes until ReleaseBuffer.
        Ok(unsafe { std::slice::from_raw_parts_mut(buffer_ptr, len) })
    }

    fn release_buffer(&mut self, frames_written: u32) -> Result<(), CaptureError> {
        unsafe { self.render_client.ReleaseBuffer(frames_written, 0) }
            .map_err(|e| CaptureError::device(CapturePhase::Render, format!("ReleaseBuffer failed: {}", e)))
    }
}
