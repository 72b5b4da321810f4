use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::models::summary::CaptureSummary;

/// Observer for capture lifecycle notifications.
///
/// Methods are called from whichever context drives the transition (the
/// caller, the drain thread or a work-queue task), never from the UI thread.
pub trait CaptureDelegate: Send + Sync {
    /// Called after every state transition.
    fn on_state_changed(&self, state: CaptureState);

    /// Called when a terminal failure moves the session to `Error`.
    fn on_error(&self, error: &CaptureError);

    /// Called when teardown has finalized the file.
    fn on_capture_finished(&self, summary: &CaptureSummary);
}
