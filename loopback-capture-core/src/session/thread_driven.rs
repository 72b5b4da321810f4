use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::models::summary::{CaptureSummary, StopReason};
use crate::session::activation::{ActivationResult, ActivationSlot};
use crate::session::capture_session::{CaptureBackend, CaptureSession, DrainStatus, SessionSetup};
use crate::session::control::CaptureControl;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_events::CaptureEvents;

/// How often a timed stop rechecks a capture that is still activating.
const TIMED_STOP_RETRY: Duration = Duration::from_millis(10);

/// Wakes the drain thread when packets arrive or a stop is accepted.
struct PacketSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl PacketSignal {
    fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn notify(&self) {
        *self.pending.lock() = true;
        self.cond.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if !*pending {
            self.cond.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }
}

struct ThreadShared {
    setup: SessionSetup,
    control: CaptureControl,
    activation: ActivationSlot,
    signal: PacketSignal,
}

impl CaptureEvents for ThreadShared {
    fn on_activation_complete(&self, result: ActivationResult) {
        self.activation.complete(result);
    }

    fn on_packet_ready(&self) {
        self.signal.notify();
    }

    fn on_stop_requested(&self) {
        self.signal.notify();
    }
}

/// Capturer whose drain loop runs on one dedicated thread.
///
/// `start_capture` blocks the calling thread until the capture ends;
/// `stop_capture` is called from another thread (a timer, a signal handler).
pub struct ThreadDrivenCapturer {
    shared: Arc<ThreadShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadDrivenCapturer {
    pub fn new(config: CaptureConfiguration, backend: CaptureBackend) -> Result<Self, CaptureError> {
        Ok(Self {
            shared: Arc::new(ThreadShared {
                setup: SessionSetup::new(config, backend)?,
                control: CaptureControl::new(),
                activation: ActivationSlot::default(),
                signal: PacketSignal::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CaptureDelegate>) {
        self.shared.control.set_delegate(delegate);
    }

    pub fn state(&self) -> CaptureState {
        self.shared.control.state()
    }

    /// Activate, start the drain thread and block until capture ends.
    ///
    /// Returns the summary once teardown has run, or the error that moved
    /// the session to `Error`. Must not be called from an async runtime.
    pub fn start_capture(&self) -> Result<CaptureSummary, CaptureError> {
        let shared = &self.shared;
        let control = &shared.control;
        control.claim_start("StartCapture")?;

        let events: Arc<dyn CaptureEvents> = self.shared.clone();
        let pending = shared.activation.arm();
        if let Err(e) = shared.setup.activate(Arc::clone(&events)) {
            shared.activation.disarm();
            return Err(control.fail(e));
        }

        let source = pending.wait().map_err(|e| control.fail(e))?;
        let mut session = shared.setup.open(source).map_err(|e| control.fail(e))?;
        control.transition(CaptureState::Initialized);

        if let Err(e) = session.enable_notifications(events) {
            return Err(control.fail(session.abandon(e)));
        }
        control.transition(CaptureState::Starting);
        if let Err(e) = session.start() {
            return Err(control.fail(session.abandon(e)));
        }

        {
            let mut worker = self.worker.lock();
            control.transition(CaptureState::Capturing);
            let drain_shared = Arc::clone(shared);
            let handle = thread::Builder::new()
                .name("loopback-capture".into())
                .spawn(move || run_drain_thread(drain_shared, session))
                .map_err(|e| control.fail(CaptureError::Unknown(format!("failed to spawn capture thread: {}", e))))?;
            *worker = Some(handle);
        }

        control.wait_for_outcome_or_error()
    }

    /// Request a stop and wait for teardown.
    ///
    /// Returns `None` when stopping from `Error` with no session left to finalize.
    pub fn stop_capture(&self) -> Result<Option<CaptureSummary>, CaptureError> {
        let control = &self.shared.control;
        control.begin_stop("StopCapture")?;
        self.shared.on_stop_requested();

        let worker = self.worker.lock().take();
        let Some(handle) = worker else {
            control.transition(CaptureState::Stopped);
            return Ok(None);
        };

        let outcome = control.wait_for_outcome();
        if handle.join().is_err() {
            log::error!("Capture thread panicked");
        }
        outcome.map(Some)
    }

    /// Stop the capture once `duration` has elapsed, unless `cancel` fires first.
    ///
    /// Meant for a timer thread running alongside `start_capture`. While the
    /// capture is still activating the stop is held back and retried. Returns
    /// whether this call stopped the capture.
    pub fn stop_after(&self, duration: Duration, cancel: &Receiver<()>) -> bool {
        if cancel.recv_timeout(duration) != Err(RecvTimeoutError::Timeout) {
            return false;
        }
        log::info!("Capture duration elapsed, stopping");

        loop {
            match self.state() {
                CaptureState::Uninitialized | CaptureState::Initialized | CaptureState::Starting => {
                    if cancel.recv_timeout(TIMED_STOP_RETRY) != Err(RecvTimeoutError::Timeout) {
                        return false;
                    }
                }
                CaptureState::Capturing => match self.stop_capture() {
                    Ok(_) => return true,
                    Err(e) => log::debug!("Timed stop not applied: {}", e),
                },
                CaptureState::Stopping | CaptureState::Stopped | CaptureState::Error => return false,
            }
        }
    }
}

impl Drop for ThreadDrivenCapturer {
    fn drop(&mut self) {
        let Some(handle) = self.worker.get_mut().take() else {
            return;
        };
        if self.shared.control.begin_stop("Drop").is_ok() {
            self.shared.on_stop_requested();
        }
        if handle.join().is_err() {
            log::error!("Capture thread panicked");
        }
    }
}

fn run_drain_thread(shared: Arc<ThreadShared>, mut session: CaptureSession) {
    let control = &shared.control;
    let idle_poll_interval = shared.setup.config.idle_poll_interval;

    let stop_reason = loop {
        match session.drain_available(control) {
            Ok(DrainStatus::Idle) => shared.signal.wait(idle_poll_interval),
            Ok(DrainStatus::Stopping) => break StopReason::Requested,
            Ok(DrainStatus::SizeLimit) => {
                if control.begin_stop("SizeLimit").is_ok() {
                    break StopReason::SizeLimit;
                }
                break StopReason::Requested;
            }
            Err(e) => {
                control.fail(e);
                control.wait_for_stop_request();
                break StopReason::Failed;
            }
        }
    };

    let outcome = session.finish(stop_reason);
    match &outcome {
        Ok(_) => control.transition(CaptureState::Stopped),
        Err(e) => {
            control.fail(e.clone());
        }
    }
    control.publish(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::LoopbackMode;
    use crate::test_support::{
        read_u32, temp_file_path, ManualClock, RecordingDelegate, ScriptedActivator, ScriptedCaptureSource,
        ScriptedPacket, SourceFeed,
    };
    use crate::traits::clock::CaptureClock;
    use std::fs;

    fn capturer(name: &str, activator: ScriptedActivator) -> (ThreadDrivenCapturer, CaptureConfiguration) {
        let config = CaptureConfiguration::new(4242, LoopbackMode::IncludeTree, temp_file_path(name));
        let backend = CaptureBackend {
            activator: Arc::new(activator),
            clock: Arc::new(ManualClock::default()),
            output: None,
            transform_factory: None,
        };
        (ThreadDrivenCapturer::new(config.clone(), backend).unwrap(), config)
    }

    fn wait_for_state(capturer: &ThreadDrivenCapturer, state: CaptureState) {
        for _ in 0..500 {
            if capturer.state() == state {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("capturer never reached {state}, still {}", capturer.state());
    }

    fn wait_for_queue_drained(feed: &SourceFeed) {
        for _ in 0..500 {
            if feed.queued() == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("packets were never drained");
    }

    #[test]
    fn capture_until_stopped() {
        let (source, feed) = ScriptedCaptureSource::new();
        let (capturer, config) = capturer("thread_capture.wav", ScriptedActivator::succeeding(source));
        let capturer = Arc::new(capturer);
        let delegate = Arc::new(RecordingDelegate::default());
        capturer.set_delegate(delegate.clone());

        let running = Arc::clone(&capturer);
        let handle = thread::spawn(move || running.start_capture());

        wait_for_state(&capturer, CaptureState::Capturing);
        for _ in 0..3 {
            feed.push(ScriptedPacket::new(100, 4, Duration::ZERO));
        }
        wait_for_queue_drained(&feed);

        let stopped = capturer.stop_capture().unwrap().unwrap();
        let started = handle.join().unwrap().unwrap();
        assert_eq!(stopped, started);
        assert_eq!(stopped.data_size, 1200);
        assert_eq!(stopped.stop_reason, StopReason::Requested);
        assert_eq!(capturer.state(), CaptureState::Stopped);
        assert!(feed.is_started() && feed.is_stopped());

        let file_data = fs::read(&config.output_file).unwrap();
        assert_eq!(read_u32(&file_data, 42), 1200);
        assert_eq!(read_u32(&file_data, 4), 1200 + 46 - 8);

        assert_eq!(
            delegate.states(),
            vec![
                CaptureState::Initialized,
                CaptureState::Starting,
                CaptureState::Capturing,
                CaptureState::Stopping,
                CaptureState::Stopped,
            ]
        );
        assert_eq!(delegate.summaries().len(), 1);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn timed_stop_waits_for_capture_to_start() {
        let (source, _feed) = ScriptedCaptureSource::new();
        let (capturer, config) = capturer("thread_timed_stop.wav", ScriptedActivator::succeeding(source));
        let capturer = Arc::new(capturer);

        // the timer fires before start_capture has even been called
        let (_cancel, cancelled) = std::sync::mpsc::channel::<()>();
        let stopper = Arc::clone(&capturer);
        let timer = thread::spawn(move || stopper.stop_after(Duration::ZERO, &cancelled));
        thread::sleep(Duration::from_millis(30));

        let summary = capturer.start_capture().unwrap();
        assert!(timer.join().unwrap());
        assert_eq!(summary.stop_reason, StopReason::Requested);
        assert_eq!(capturer.state(), CaptureState::Stopped);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn cancelled_timed_stop_does_nothing() {
        let (source, _feed) = ScriptedCaptureSource::new();
        let (capturer, _config) = capturer("thread_timed_cancel.wav", ScriptedActivator::succeeding(source));

        let (cancel, cancelled) = std::sync::mpsc::channel::<()>();
        cancel.send(()).unwrap();
        assert!(!capturer.stop_after(Duration::from_secs(60), &cancelled));
        assert_eq!(capturer.state(), CaptureState::Uninitialized);
    }

    #[test]
    fn stop_from_idle_states_is_rejected() {
        let (source, _feed) = ScriptedCaptureSource::new();
        let (capturer, config) = capturer("thread_never_started.wav", ScriptedActivator::succeeding(source));

        let err = capturer.stop_capture().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidState {
                state: CaptureState::Uninitialized,
                ..
            }
        ));
        assert!(!config.output_file.exists());
    }

    #[test]
    fn start_while_capturing_is_rejected() {
        let (source, _feed) = ScriptedCaptureSource::new();
        let (capturer, config) = capturer("thread_double_start.wav", ScriptedActivator::succeeding(source));
        let capturer = Arc::new(capturer);

        let running = Arc::clone(&capturer);
        let handle = thread::spawn(move || running.start_capture());
        wait_for_state(&capturer, CaptureState::Capturing);

        let err = capturer.start_capture().unwrap_err();
        assert_eq!(
            err,
            CaptureError::InvalidState {
                operation: "StartCapture",
                state: CaptureState::Capturing,
            }
        );

        capturer.stop_capture().unwrap();
        handle.join().unwrap().unwrap();

        // a second stop fails fast and leaves the file untouched
        let before = fs::read(&config.output_file).unwrap();
        let err = capturer.stop_capture().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidState {
                state: CaptureState::Stopped,
                ..
            }
        ));
        assert_eq!(fs::read(&config.output_file).unwrap(), before);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn activation_failure_enters_error() {
        let (capturer, config) = capturer(
            "thread_activation_failure.wav",
            ScriptedActivator::failing(CaptureError::ActivationFailed("access denied".into())),
        );

        let err = capturer.start_capture().unwrap_err();
        assert_eq!(err, CaptureError::ActivationFailed("access denied".into()));
        assert_eq!(capturer.state(), CaptureState::Error);
        assert!(!config.output_file.exists());

        // stop from Error with nothing to finalize
        assert_eq!(capturer.stop_capture().unwrap(), None);
        assert_eq!(capturer.state(), CaptureState::Stopped);
    }

    #[test]
    fn start_failure_still_patches_the_header() {
        let (source, feed) = ScriptedCaptureSource::new();
        feed.fail_start(CaptureError::device(crate::models::error::CapturePhase::Start, "device busy"));
        let (capturer, config) = capturer("thread_start_failure.wav", ScriptedActivator::succeeding(source));

        let err = capturer.start_capture().unwrap_err();
        assert!(matches!(err, CaptureError::Device { .. }));
        assert_eq!(capturer.state(), CaptureState::Error);

        let file_data = fs::read(&config.output_file).unwrap();
        assert_eq!(file_data.len(), 46);
        assert_eq!(read_u32(&file_data, 42), 0);
        assert_eq!(read_u32(&file_data, 4), 38);

        assert_eq!(capturer.stop_capture().unwrap(), None);
        assert_eq!(capturer.state(), CaptureState::Stopped);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn refused_activation_request_enters_error() {
        let (capturer, _config) = capturer("thread_refused.wav", ScriptedActivator::refusing());
        assert!(matches!(
            capturer.start_capture(),
            Err(CaptureError::ActivationFailed(_))
        ));
        assert_eq!(capturer.state(), CaptureState::Error);
    }

    #[test]
    fn drain_failure_surfaces_and_stop_finalizes() {
        let (source, feed) = ScriptedCaptureSource::new();
        let (capturer, config) = capturer("thread_drain_failure.wav", ScriptedActivator::succeeding(source));
        let capturer = Arc::new(capturer);

        let running = Arc::clone(&capturer);
        let handle = thread::spawn(move || running.start_capture());
        wait_for_state(&capturer, CaptureState::Capturing);

        feed.push(ScriptedPacket::new(10, 4, Duration::ZERO));
        wait_for_queue_drained(&feed);
        feed.fail_next_query(CaptureError::device(
            crate::models::error::CapturePhase::Drain,
            "device removed",
        ));
        feed.notify();

        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, CaptureError::Device { .. }));
        assert_eq!(capturer.state(), CaptureState::Error);

        let summary = capturer.stop_capture().unwrap().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Failed);
        assert_eq!(summary.data_size, 40);
        assert_eq!(capturer.state(), CaptureState::Stopped);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn size_limit_stops_on_its_own() {
        let (source, feed) = ScriptedCaptureSource::new();
        let config = CaptureConfiguration::new(4242, LoopbackMode::ExcludeTree, temp_file_path("thread_size_limit.wav"));
        let clock = Arc::new(ManualClock::default());
        // a packet larger than the container can ever hold
        feed.push(ScriptedPacket::without_data(u32::MAX / 4, clock.now()));
        let backend = CaptureBackend {
            activator: Arc::new(ScriptedActivator::succeeding(source)),
            clock,
            output: None,
            transform_factory: None,
        };
        let capturer = ThreadDrivenCapturer::new(config.clone(), backend).unwrap();

        let summary = capturer.start_capture().unwrap();
        assert_eq!(summary.stop_reason, StopReason::SizeLimit);
        assert_eq!(summary.data_size, 0);
        assert_eq!(capturer.state(), CaptureState::Stopped);
        assert!(capturer.stop_capture().is_err());
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let (source, _feed) = ScriptedCaptureSource::new();
        let backend = CaptureBackend {
            activator: Arc::new(ScriptedActivator::succeeding(source)),
            clock: Arc::new(ManualClock::default()),
            output: None,
            transform_factory: None,
        };
        let result = ThreadDrivenCapturer::new(CaptureConfiguration::default(), backend);
        assert!(matches!(result, Err(CaptureError::ConfigurationFailed(_))));
    }
}
