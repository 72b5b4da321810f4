//! Asynchronous activation of a process-loopback capture client.
//!
//! `ActivateAudioInterfaceAsync` on `VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK`
//! returns immediately; the completion handler below runs on an MTA worker,
//! finishes initializing the client and hands the ready source (or the
//! failure) to [`CaptureEvents::on_activation_complete`].

use std::mem::size_of;
use std::sync::Arc;

use windows::core::{IUnknown, Interface, Ref};
use windows::Win32::Media::Audio::{
    ActivateAudioInterfaceAsync, IActivateAudioInterfaceAsyncOperation, IActivateAudioInterfaceCompletionHandler,
    IActivateAudioInterfaceCompletionHandler_Impl, IAudioCaptureClient, IAudioClient, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_EVENTCALLBACK, AUDCLNT_STREAMFLAGS_LOOPBACK,
    AUDIOCLIENT_ACTIVATION_PARAMS, AUDIOCLIENT_ACTIVATION_PARAMS_0, AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
    AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS, PROCESS_LOOPBACK_MODE_EXCLUDE_TARGET_PROCESS_TREE,
    PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE, VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
};
use windows::Win32::System::Variant::VT_BLOB;
use windows_core::implement;

use loopback_capture_core::models::audio_format::AudioFormat;
use loopback_capture_core::models::config::LoopbackMode;
use loopback_capture_core::models::error::CaptureError;
use loopback_capture_core::traits::capture_events::{ActivationRequest, CaptureActivator, CaptureEvents};
use loopback_capture_core::traits::capture_source::CaptureSource;

use crate::capture_source::{EventHandle, WasapiCaptureSource};
use crate::wave_format::WaveFormat;

/// Requested capture buffer, 100 ms in 100 ns units.
const BUFFER_DURATION_HNS: i64 = 1_000_000;

/// Activates loopback clients scoped to a process tree.
#[derive(Debug, Default)]
pub struct ProcessLoopbackActivator;

impl ProcessLoopbackActivator {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureActivator for ProcessLoopbackActivator {
    fn activate(&self, request: ActivationRequest, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError> {
        let loopback_mode = match request.loopback_mode {
            LoopbackMode::IncludeTree => PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
            LoopbackMode::ExcludeTree => PROCESS_LOOPBACK_MODE_EXCLUDE_TARGET_PROCESS_TREE,
        };

        let mut activation_params = AUDIOCLIENT_ACTIVATION_PARAMS {
            ActivationType: AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
            Anonymous: AUDIOCLIENT_ACTIVATION_PARAMS_0 {
                ProcessLoopbackParams: AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS {
                    TargetProcessId: request.process_id,
                    ProcessLoopbackMode: loopback_mode,
                },
            },
        };

        // VT_BLOB wrapping the activation parameters; only read during the call.
        let activation_prop = windows_core::imp::PROPVARIANT {
            Anonymous: windows_core::imp::PROPVARIANT_0 {
                Anonymous: windows_core::imp::PROPVARIANT_0_0 {
                    vt: VT_BLOB.0,
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: windows_core::imp::PROPVARIANT_0_0_0 {
                        blob: windows_core::imp::BLOB {
                            cbSize: size_of::<AUDIOCLIENT_ACTIVATION_PARAMS>() as u32,
                            pBlobData: (&mut activation_params as *mut AUDIOCLIENT_ACTIVATION_PARAMS).cast::<u8>(),
                        },
                    },
                },
            },
        };
        let activation_prop_ptr =
            (&activation_prop as *const windows_core::imp::PROPVARIANT).cast::<windows_core::PROPVARIANT>();

        let handler: IActivateAudioInterfaceCompletionHandler = ActivationHandler {
            events,
            capture_format: request.capture_format,
        }
        .into();

        log::debug!(
            "Requesting process loopback activation for pid {} ({:?})",
            request.process_id,
            request.loopback_mode
        );

        // The handler keeps itself alive through the operation; the returned
        // operation object is not needed.
        unsafe {
            ActivateAudioInterfaceAsync(
                VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
                &IAudioClient::IID,
                Some(activation_prop_ptr),
                &handler,
            )
        }
        .map_err(|e| CaptureError::ActivationFailed(format!("ActivateAudioInterfaceAsync failed: {}", e)))?;

        Ok(())
    }
}

#[implement(IActivateAudioInterfaceCompletionHandler)]
struct ActivationHandler {
    events: Arc<dyn CaptureEvents>,
    capture_format: AudioFormat,
}

impl ActivationHandler {
    fn finish_activation(
        &self,
        operation: Option<&IActivateAudioInterfaceAsyncOperation>,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        let operation =
            operation.ok_or_else(|| CaptureError::ActivationFailed("completion without an operation".into()))?;

        let mut activate_result = Default::default();
        let mut activated_interface: Option<IUnknown> = None;
        unsafe { operation.GetActivateResult(&mut activate_result, &mut activated_interface) }
            .map_err(|e| CaptureError::ActivationFailed(format!("GetActivateResult failed: {}", e)))?;
        activate_result
            .ok()
            .map_err(|e| CaptureError::ActivationFailed(format!("activation returned failure HRESULT: {}", e)))?;

        let audio_client: IAudioClient = activated_interface
            .ok_or_else(|| CaptureError::ActivationFailed("activation returned no interface".into()))?
            .cast()
            .map_err(|e| CaptureError::ActivationFailed(format!("activated interface is not IAudioClient: {}", e)))?;

        let wave_format = WaveFormat::from_audio_format(&self.capture_format);
        unsafe {
            audio_client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
                BUFFER_DURATION_HNS,
                0,
                wave_format.as_ptr(),
                None,
            )
        }
        .map_err(|e| CaptureError::ActivationFailed(format!("IAudioClient::Initialize (loopback) failed: {}", e)))?;

        let event = EventHandle::new()?;
        unsafe { audio_client.SetEventHandle(event.raw()) }
            .map_err(|e| CaptureError::ActivationFailed(format!("SetEventHandle failed: {}", e)))?;

        let capture_client: IAudioCaptureClient = unsafe { audio_client.GetService() }
            .map_err(|e| CaptureError::ActivationFailed(format!("GetService failed: {}", e)))?;

        log::info!("Process loopback client ready ({})", self.capture_format);
        Ok(Box::new(WasapiCaptureSource::new(
            audio_client,
            capture_client,
            self.capture_format.block_align(),
            event,
        )))
    }
}

impl IActivateAudioInterfaceCompletionHandler_Impl for ActivationHandler_Impl {
    fn ActivateCompleted(&self, operation: Ref<'_, IActivateAudioInterfaceAsyncOperation>) -> windows::core::Result<()> {
        let result = self.finish_activation(operation.as_ref());
        if let Err(e) = &result {
            log::error!("Process loopback activation failed: {}", e);
        }
        self.events.on_activation_complete(result);
        Ok(())
    }
}
