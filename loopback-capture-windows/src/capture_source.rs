//! WASAPI capture client wrapped as a [`CaptureSource`].
//!
//! The client is initialized with `AUDCLNT_STREAMFLAGS_EVENTCALLBACK`; a small
//! waiter thread turns the buffer event into
//! [`CaptureEvents::on_packet_ready`] calls once notifications are enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use windows::core::w;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY, AUDCLNT_BUFFERFLAGS_SILENT,
    AUDCLNT_BUFFERFLAGS_TIMESTAMP_ERROR,
};
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, CreateEventW, SetEvent, WaitForSingleObject,
};

use loopback_capture_core::models::error::{CaptureError, CapturePhase};
use loopback_capture_core::traits::capture_events::CaptureEvents;
use loopback_capture_core::traits::capture_source::{CapturePacket, CaptureSource, PacketFlags, PacketRelease};

use crate::clock::qpc_position_to_duration;

/// Upper bound on one wait, so a stop is noticed even without a final event.
const EVENT_WAIT_MS: u32 = 100;

/// Auto-reset Win32 event, closed on drop.
pub(crate) struct EventHandle(HANDLE);

// SAFETY: event handles are process-wide kernel objects usable from any thread.
unsafe impl Send for EventHandle {}
unsafe impl Sync for EventHandle {}

impl EventHandle {
    pub(crate) fn new() -> Result<Self, CaptureError> {
        let handle = unsafe { CreateEventW(None, false, false, None) }
            .map_err(|e| CaptureError::ActivationFailed(format!("CreateEventW failed: {}", e)))?;
        Ok(Self(handle))
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.0
    }

    fn signal(&self) {
        if let Err(e) = unsafe { SetEvent(self.0) } {
            log::warn!("SetEvent failed: {}", e);
        }
    }

    fn wait(&self, timeout_ms: u32) -> bool {
        unsafe { WaitForSingleObject(self.0, timeout_ms) == WAIT_OBJECT_0 }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Hands leased buffers back through `ReleaseBuffer`.
struct BufferRelease {
    capture_client: IAudioCaptureClient,
}

impl PacketRelease for BufferRelease {
    fn release(&mut self, frames: u32) -> Result<(), CaptureError> {
        unsafe { self.capture_client.ReleaseBuffer(frames) }
            .map_err(|e| CaptureError::device(CapturePhase::Drain, format!("ReleaseBuffer failed: {}", e)))
    }
}

/// Thread forwarding buffer events to the capturer.
struct NotificationWaiter {
    running: Arc<AtomicBool>,
    event: Arc<EventHandle>,
    handle: Option<thread::JoinHandle<()>>,
}

impl NotificationWaiter {
    fn spawn(event: Arc<EventHandle>, events: Arc<dyn CaptureEvents>) -> Result<Self, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let wait_event = Arc::clone(&event);

        let handle = thread::Builder::new()
            .name("loopback-packet-events".into())
            .spawn(move || {
                // MMCSS registration for real-time priority
                let mut task_index = 0u32;
                let mmcss = unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) };
                if let Err(e) = &mmcss {
                    log::debug!("MMCSS registration failed: {}", e);
                }

                while flag.load(Ordering::SeqCst) {
                    if wait_event.wait(EVENT_WAIT_MS) && flag.load(Ordering::SeqCst) {
                        events.on_packet_ready();
                    }
                }

                if let Ok(task) = mmcss {
                    unsafe {
                        let _ = AvRevertMmThreadCharacteristics(task);
                    }
                }
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn packet event thread: {}", e)))?;

        Ok(Self {
            running,
            event,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.event.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NotificationWaiter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// An activated process-loopback stream.
pub struct WasapiCaptureSource {
    audio_client: IAudioClient,
    release: BufferRelease,
    block_align: usize,
    event: Arc<EventHandle>,
    waiter: Option<NotificationWaiter>,
}

// SAFETY: the interfaces come from the multithreaded apartment and are used
// by one owner at a time; the session moves the source between threads but
// never shares it.
unsafe impl Send for WasapiCaptureSource {}

impl WasapiCaptureSource {
    /// Wrap an initialized client whose buffer event is already `event`.
    pub(crate) fn new(
        audio_client: IAudioClient,
        capture_client: IAudioCaptureClient,
        block_align: u16,
        event: EventHandle,
    ) -> Self {
        Self {
            audio_client,
            release: BufferRelease { capture_client },
            block_align: block_align as usize,
            event: Arc::new(event),
            waiter: None,
        }
    }
}

impl CaptureSource for WasapiCaptureSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Start() }
            .map_err(|e| CaptureError::device(CapturePhase::Start, format!("IAudioClient::Start failed: {}", e)))
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(mut waiter) = self.waiter.take() {
            waiter.stop();
        }
        unsafe { self.audio_client.Stop() }
            .map_err(|e| CaptureError::device(CapturePhase::Finalize, format!("IAudioClient::Stop failed: {}", e)))
    }

    fn next_packet_frames(&mut self) -> Result<u32, CaptureError> {
        unsafe { self.release.capture_client.GetNextPacketSize() }
            .map_err(|e| CaptureError::device(CapturePhase::Drain, format!("GetNextPacketSize failed: {}", e)))
    }

    fn acquire_packet(&mut self) -> Result<CapturePacket<'_>, CaptureError> {
        let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
        let mut frames = 0u32;
        let mut raw_flags = 0u32;
        let mut device_position = 0u64;
        let mut qpc_position = 0u64;

        unsafe {
            self.release.capture_client.GetBuffer(
                &mut buffer_ptr,
                &mut frames,
                &mut raw_flags,
                Some(&mut device_position),
                Some(&mut qpc_position),
            )
        }
        .map_err(|e| CaptureError::device(CapturePhase::Drain, format!("GetBuffer failed: {}", e)))?;

        let len = frames as usize * self.block_align;
        let data: &[u8] = if buffer_ptr.is_null() || len == 0 {
            &[]
        } else {
            // SAFETY: WASAPI guarantees `frames * block_align` readable bytes until ReleaseBuffer.
            unsafe { std::slice::from_raw_parts(buffer_ptr, len) }
        };

        let flags = PacketFlags {
            silent: raw_flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0,
            data_discontinuity: raw_flags & AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32 != 0,
            timestamp_error: raw_flags & AUDCLNT_BUFFERFLAGS_TIMESTAMP_ERROR.0 as u32 != 0,
        };

        Ok(CapturePacket::new(
            data,
            frames,
            device_position,
            qpc_position_to_duration(qpc_position),
            flags,
            &mut self.release,
        ))
    }

    fn enable_notifications(&mut self, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError> {
        if let Some(mut previous) = self.waiter.take() {
            previous.stop();
        }
        self.waiter = Some(NotificationWaiter::spawn(Arc::clone(&self.event), events)?);
        Ok(())
    }
}
