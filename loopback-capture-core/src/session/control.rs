use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::models::summary::CaptureSummary;
use crate::traits::capture_delegate::CaptureDelegate;

/// Internal mutable state, protected by `parking_lot::Mutex`.
struct ControlState {
    state: CaptureState,
    /// Set by the first accepted `StartCapture`; a session is never started twice.
    start_claimed: bool,
    last_error: Option<CaptureError>,
    outcome: Option<Result<CaptureSummary, CaptureError>>,
}

/// The capture state machine shared by the controlling context and the
/// drain context.
///
/// Every transition happens under one lock, so a stop request is visible to
/// the drain loop the next time it checks [`is_capturing`](Self::is_capturing).
/// Delegate callbacks run after the lock is released.
pub struct CaptureControl {
    inner: Mutex<ControlState>,
    changed: Condvar,
    delegate: Mutex<Option<Arc<dyn CaptureDelegate>>>,
}

impl CaptureControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlState {
                state: CaptureState::Uninitialized,
                start_claimed: false,
                last_error: None,
                outcome: None,
            }),
            changed: Condvar::new(),
            delegate: Mutex::new(None),
        }
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CaptureDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.lock().state.is_capturing()
    }

    pub fn last_error(&self) -> Option<CaptureError> {
        self.inner.lock().last_error.clone()
    }

    /// Accept a `StartCapture`, or reject it without side effects.
    pub fn claim_start(&self, operation: &'static str) -> Result<(), CaptureError> {
        let mut inner = self.inner.lock();
        if !inner.state.can_start() || inner.start_claimed {
            return Err(CaptureError::InvalidState {
                operation,
                state: inner.state,
            });
        }
        inner.start_claimed = true;
        Ok(())
    }

    pub fn transition(&self, to: CaptureState) {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.state = to;
            from
        };
        self.changed.notify_all();
        log::info!("Capture state {} -> {}", from, to);
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(to);
        }
    }

    /// Accept a `StopCapture` (legal from `Capturing` or `Error`) and move to
    /// `Stopping`. Returns the state the stop was accepted from.
    pub fn begin_stop(&self, operation: &'static str) -> Result<CaptureState, CaptureError> {
        let from = {
            let mut inner = self.inner.lock();
            if !inner.state.can_stop() {
                return Err(CaptureError::InvalidState {
                    operation,
                    state: inner.state,
                });
            }
            let from = inner.state;
            inner.state = CaptureState::Stopping;
            from
        };
        self.changed.notify_all();
        log::info!("Capture state {} -> {}", from, CaptureState::Stopping);
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(CaptureState::Stopping);
        }
        Ok(from)
    }

    /// Record a terminal failure and move to `Error`. Returns the error so
    /// callers can write `return Err(control.fail(e))`.
    pub fn fail(&self, error: CaptureError) -> CaptureError {
        let entered = {
            let mut inner = self.inner.lock();
            if inner.state.can_fail() {
                inner.state = CaptureState::Error;
                inner.last_error = Some(error.clone());
                true
            } else {
                false
            }
        };

        if !entered {
            log::warn!("Ignoring failure after capture ended: {}", error);
            return error;
        }

        self.changed.notify_all();
        log::error!("Capture failed: {}", error);
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(CaptureState::Error);
            delegate.on_error(&error);
        }
        error
    }

    /// Publish the result of teardown and wake every waiter.
    pub fn publish(&self, outcome: Result<CaptureSummary, CaptureError>) {
        if let (Ok(summary), Some(delegate)) = (&outcome, self.delegate()) {
            delegate.on_capture_finished(summary);
        }
        self.inner.lock().outcome = Some(outcome);
        self.changed.notify_all();
    }

    pub fn outcome(&self) -> Option<Result<CaptureSummary, CaptureError>> {
        self.inner.lock().outcome.clone()
    }

    /// Block until teardown has published its result.
    pub fn wait_for_outcome(&self) -> Result<CaptureSummary, CaptureError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = inner.outcome.clone() {
                return outcome;
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Block until teardown has published its result, or until the session
    /// enters `Error` without one.
    pub fn wait_for_outcome_or_error(&self) -> Result<CaptureSummary, CaptureError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = inner.outcome.clone() {
                return outcome;
            }
            if inner.state == CaptureState::Error {
                let error = inner
                    .last_error
                    .clone()
                    .unwrap_or_else(|| CaptureError::Unknown("capture failed".into()));
                return Err(error);
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Block until a stop has been accepted.
    pub fn wait_for_stop_request(&self) {
        let mut inner = self.inner.lock();
        while inner.state != CaptureState::Stopping {
            self.changed.wait(&mut inner);
        }
    }

    fn delegate(&self) -> Option<Arc<dyn CaptureDelegate>> {
        self.delegate.lock().clone()
    }
}

impl Default for CaptureControl {
    fn default() -> Self {
        Self::new()
    }
}
