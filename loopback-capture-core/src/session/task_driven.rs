use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::models::summary::{CaptureSummary, StopReason};
use crate::session::activation::{ActivationResult, ActivationSlot};
use crate::session::capture_session::{CaptureBackend, CaptureSession, DrainStatus, SessionSetup};
use crate::session::control::CaptureControl;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_events::CaptureEvents;

/// Work items re-entering the serial capture queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkItem {
    PacketReady,
    Stop,
}

struct TaskShared {
    setup: SessionSetup,
    control: CaptureControl,
    activation: ActivationSlot,
    queue: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    finished: Notify,
}

impl TaskShared {
    fn enqueue(&self, item: WorkItem) {
        if let Some(queue) = self.queue.lock().as_ref() {
            if queue.send(item).is_err() {
                log::debug!("Capture queue closed, dropping {:?}", item);
            }
        }
    }

    fn publish(&self, outcome: Result<CaptureSummary, CaptureError>) {
        self.queue.lock().take();
        self.control.publish(outcome);
        self.finished.notify_waiters();
    }
}

impl CaptureEvents for TaskShared {
    fn on_activation_complete(&self, result: ActivationResult) {
        self.activation.complete(result);
    }

    fn on_packet_ready(&self) {
        self.enqueue(WorkItem::PacketReady);
    }

    fn on_stop_requested(&self) {
        self.enqueue(WorkItem::Stop);
    }
}

/// Capturer driven by callbacks on a tokio runtime.
///
/// Each packet-ready signal becomes a work item on a serial queue, and each
/// drain pass runs on the blocking pool, so no task ever waits for audio.
pub struct TaskDrivenCapturer {
    shared: Arc<TaskShared>,
}

impl TaskDrivenCapturer {
    pub fn new(config: CaptureConfiguration, backend: CaptureBackend) -> Result<Self, CaptureError> {
        Ok(Self {
            shared: Arc::new(TaskShared {
                setup: SessionSetup::new(config, backend)?,
                control: CaptureControl::new(),
                activation: ActivationSlot::default(),
                queue: Mutex::new(None),
                finished: Notify::new(),
            }),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CaptureDelegate>) {
        self.shared.control.set_delegate(delegate);
    }

    pub fn state(&self) -> CaptureState {
        self.shared.control.state()
    }

    /// Activate and start capturing. Resolves once the state is `Capturing`.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start_capture(&self) -> Result<(), CaptureError> {
        let shared = &self.shared;
        let control = &shared.control;
        control.claim_start("StartCapture")?;

        let events: Arc<dyn CaptureEvents> = self.shared.clone();
        let pending = shared.activation.arm();
        if let Err(e) = shared.setup.activate(Arc::clone(&events)) {
            shared.activation.disarm();
            return Err(control.fail(e));
        }

        let source = pending.await.map_err(|e| control.fail(e))?;
        let mut session = shared.setup.open(source).map_err(|e| control.fail(e))?;
        control.transition(CaptureState::Initialized);

        let (sender, receiver) = mpsc::unbounded_channel();
        *shared.queue.lock() = Some(sender);

        if let Err(e) = session.enable_notifications(events) {
            shared.queue.lock().take();
            return Err(control.fail(session.abandon(e)));
        }
        control.transition(CaptureState::Starting);
        if let Err(e) = session.start() {
            shared.queue.lock().take();
            return Err(control.fail(session.abandon(e)));
        }
        control.transition(CaptureState::Capturing);

        tokio::spawn(run_work_queue(Arc::clone(shared), session, receiver));
        // pick up anything buffered before notifications were wired
        shared.enqueue(WorkItem::PacketReady);
        Ok(())
    }

    /// Request a stop and wait for teardown.
    ///
    /// Returns `None` when stopping from `Error` with no session left to finalize.
    pub async fn stop_capture(&self) -> Result<Option<CaptureSummary>, CaptureError> {
        let control = &self.shared.control;
        control.begin_stop("StopCapture")?;

        if self.shared.queue.lock().is_none() {
            control.transition(CaptureState::Stopped);
            return Ok(None);
        }

        self.shared.on_stop_requested();
        self.finished().await.map(Some)
    }

    /// Wait for the outcome of teardown, whether requested or triggered by
    /// the container size limit.
    pub async fn finished(&self) -> Result<CaptureSummary, CaptureError> {
        loop {
            let notified = self.shared.finished.notified();
            if let Some(outcome) = self.shared.control.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

async fn run_work_queue(
    shared: Arc<TaskShared>,
    session: CaptureSession,
    mut receiver: mpsc::UnboundedReceiver<WorkItem>,
) {
    let mut session = Some(session);
    let mut failed = false;

    while let Some(item) = receiver.recv().await {
        let stop_reason = match item {
            WorkItem::PacketReady => {
                if !shared.control.is_capturing() {
                    continue;
                }
                let Some(current) = session.take() else {
                    break;
                };

                let drain_shared = Arc::clone(&shared);
                let joined = tokio::task::spawn_blocking(move || {
                    let mut current = current;
                    let status = current.drain_available(&drain_shared.control);
                    (current, status)
                })
                .await;

                let (current, status) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        let error = shared.control.fail(CaptureError::Unknown(format!("drain task failed: {}", e)));
                        shared.publish(Err(error));
                        return;
                    }
                };
                session = Some(current);

                match status {
                    Ok(DrainStatus::Idle) | Ok(DrainStatus::Stopping) => continue,
                    Ok(DrainStatus::SizeLimit) => {
                        if shared.control.begin_stop("SizeLimit").is_err() {
                            continue;
                        }
                        StopReason::SizeLimit
                    }
                    Err(e) => {
                        shared.control.fail(e);
                        failed = true;
                        continue;
                    }
                }
            }
            WorkItem::Stop => {
                if failed {
                    StopReason::Failed
                } else {
                    StopReason::Requested
                }
            }
        };

        let Some(current) = session.take() else {
            break;
        };
        let outcome = tokio::task::spawn_blocking(move || current.finish(stop_reason))
            .await
            .unwrap_or_else(|e| Err(CaptureError::Unknown(format!("teardown task failed: {}", e))));

        match &outcome {
            Ok(_) => shared.control.transition(CaptureState::Stopped),
            Err(e) => {
                shared.control.fail(e.clone());
            }
        }
        shared.publish(outcome);
        return;
    }

    log::debug!("Capture work queue closed");
}
