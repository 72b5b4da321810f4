//! Wires the WASAPI backend into a capturer and drives one timed capture.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use loopback_capture_core::models::error::CaptureError;
use loopback_capture_core::models::state::CaptureState;
use loopback_capture_core::models::summary::CaptureSummary;
use loopback_capture_core::session::capture_session::CaptureBackend;
use loopback_capture_core::session::output_streamer::OutputTarget;
use loopback_capture_core::session::task_driven::TaskDrivenCapturer;
use loopback_capture_core::session::thread_driven::ThreadDrivenCapturer;
use loopback_capture_core::traits::capture_delegate::CaptureDelegate;
use loopback_capture_core::traits::media_transform::TransformFactory;

use crate::cli::{Args, Scheduling};
use crate::clock::QpcClock;
use crate::device_enumerator::DeviceEnumerator;
use crate::media_transform::MfResamplerFactory;
use crate::process_loopback::ProcessLoopbackActivator;
use crate::render_endpoint::WasapiRenderEndpoint;

/// Joins the multithreaded apartment for the lifetime of the guard.
struct ComApartment;

impl ComApartment {
    fn enter() -> Result<Self, CaptureError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(|e| CaptureError::Unknown(format!("CoInitializeEx failed: {}", e)))?;
        Ok(Self)
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// Logs lifecycle notifications.
struct LoggingDelegate;

impl CaptureDelegate for LoggingDelegate {
    fn on_state_changed(&self, state: CaptureState) {
        log::debug!("Capture state: {}", state);
    }

    fn on_error(&self, error: &CaptureError) {
        log::error!("Capture failed: {}", error);
    }

    fn on_capture_finished(&self, summary: &CaptureSummary) {
        log::info!(
            "Finished {} ({:.2} s, {:?})",
            summary.file_path.display(),
            summary.duration_secs(),
            summary.stop_reason
        );
    }
}

/// Run one capture as described by `args` and return its summary.
pub fn run(args: &Args) -> Result<CaptureSummary, CaptureError> {
    let _apartment = ComApartment::enter()?;

    let config = args.configuration();
    let transform_factory: Option<Arc<dyn TransformFactory>> = match MfResamplerFactory::new() {
        Ok(factory) => Some(Arc::new(factory)),
        Err(e) => {
            log::warn!("Media Foundation unavailable, using linear resampling: {}", e);
            None
        }
    };
    let backend = CaptureBackend {
        activator: Arc::new(ProcessLoopbackActivator::new()),
        clock: Arc::new(QpcClock::new()?),
        output: open_output(&args.endpoint),
        transform_factory,
    };

    match args.scheduling {
        Scheduling::Sync => run_thread_driven(ThreadDrivenCapturer::new(config, backend)?, args.capture_duration()),
        Scheduling::Async => run_task_driven(TaskDrivenCapturer::new(config, backend)?, args.capture_duration()),
    }
}

/// Find and open the live output endpoint; any failure means file-only capture.
fn open_output(name_substring: &str) -> Option<OutputTarget> {
    let device = match DeviceEnumerator::new().and_then(|e| e.find_render_device(name_substring)) {
        Ok(Some(device)) => device,
        Ok(None) => {
            log::warn!("No playback endpoint matches \"{}\"; capturing to file only", name_substring);
            return None;
        }
        Err(e) => {
            log::warn!("Endpoint enumeration failed, capturing to file only: {}", e);
            return None;
        }
    };

    log::info!("Re-streaming to \"{}\"", device.name);
    match WasapiRenderEndpoint::open(&device.device) {
        Ok(target) => Some(target),
        Err(e) => {
            log::warn!("Live output disabled: {}", e);
            None
        }
    }
}

fn run_thread_driven(capturer: ThreadDrivenCapturer, duration: Duration) -> Result<CaptureSummary, CaptureError> {
    let capturer = Arc::new(capturer);
    capturer.set_delegate(Arc::new(LoggingDelegate));

    let (cancel, cancelled) = mpsc::channel::<()>();
    let stopper = Arc::clone(&capturer);
    let timer = thread::Builder::new()
        .name("loopback-capture-timer".into())
        .spawn(move || {
            stopper.stop_after(duration, &cancelled);
        })
        .map_err(|e| CaptureError::Unknown(format!("failed to spawn timer thread: {}", e)))?;

    let result = capturer.start_capture();
    let _ = cancel.send(());
    let _ = timer.join();

    // A drain failure leaves the session waiting for a stop to finalize it.
    if result.is_err() && capturer.state() == CaptureState::Error {
        match capturer.stop_capture() {
            Ok(Some(summary)) => log::warn!(
                "Partial capture finalized: {} bytes in {}",
                summary.data_size,
                summary.file_path.display()
            ),
            Ok(None) => {}
            Err(e) => log::warn!("Teardown after failure did not run: {}", e),
        }
    }
    result
}

fn run_task_driven(capturer: TaskDrivenCapturer, duration: Duration) -> Result<CaptureSummary, CaptureError> {
    capturer.set_delegate(Arc::new(LoggingDelegate));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CaptureError::Unknown(format!("failed to build tokio runtime: {}", e)))?;

    runtime.block_on(async {
        capturer.start_capture().await?;
        tokio::select! {
            finished = capturer.finished() => finished,
            _ = tokio::time::sleep(duration) => {
                log::info!("Capture duration elapsed, stopping");
                capturer
                    .stop_capture()
                    .await?
                    .ok_or_else(|| CaptureError::Unknown("capture ended without a summary".into()))
            }
        }
    })
}
