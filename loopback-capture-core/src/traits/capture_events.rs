use std::sync::Arc;

use crate::models::audio_format::AudioFormat;
use crate::models::config::LoopbackMode;
use crate::models::error::CaptureError;
use crate::traits::capture_source::CaptureSource;

/// Completion-handler capability shared by both capturer variants.
///
/// The platform calls back into these from its own threads: the activation
/// completion from an MTA worker, packet readiness from the event that the
/// capture client signals.
pub trait CaptureEvents: Send + Sync {
    /// Asynchronous activation finished. Called exactly once per activation.
    fn on_activation_complete(&self, result: Result<Box<dyn CaptureSource>, CaptureError>);

    /// The capture source has buffered at least one new packet.
    fn on_packet_ready(&self);

    /// A stop was accepted by the state machine; teardown should run.
    fn on_stop_requested(&self);
}

/// What to activate: a loopback interface scoped to a process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRequest {
    pub process_id: u32,
    pub loopback_mode: LoopbackMode,
    /// Format the loopback client is initialized with.
    pub capture_format: AudioFormat,
}

/// Starts asynchronous activation of a capture interface.
///
/// Implementations return immediately and later report the outcome through
/// [`CaptureEvents::on_activation_complete`]. An `Err` return means the
/// request was never issued and no completion will follow.
pub trait CaptureActivator: Send + Sync {
    fn activate(&self, request: ActivationRequest, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError>;
}
