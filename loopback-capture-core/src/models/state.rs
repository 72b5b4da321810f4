use std::fmt;

use serde::Serialize;

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// uninitialized → initialized → starting → capturing → stopping → stopped
///        └──────────────┴────────────┴──────────┴─→ error ─→ stopping
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Uninitialized,
    Initialized,
    Starting,
    Capturing,
    Stopping,
    Stopped,
    Error,
}

impl CaptureState {
    /// `StartCapture` is accepted only before any capture has begun.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Initialized)
    }

    /// `StopCapture` is accepted while capturing, or to clean up after an error.
    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Capturing | Self::Error)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    /// States from which a failure may still move the session to `Error`.
    pub fn can_fail(&self) -> bool {
        !matches!(self, Self::Stopped | Self::Error)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Capturing => "capturing",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_only_legal_before_capture() {
        assert!(CaptureState::Uninitialized.can_start());
        assert!(CaptureState::Initialized.can_start());
        for state in [
            CaptureState::Starting,
            CaptureState::Capturing,
            CaptureState::Stopping,
            CaptureState::Stopped,
            CaptureState::Error,
        ] {
            assert!(!state.can_start(), "{state} should reject start");
        }
    }

    #[test]
    fn stop_is_legal_from_capturing_or_error() {
        assert!(CaptureState::Capturing.can_stop());
        assert!(CaptureState::Error.can_stop());
        for state in [
            CaptureState::Uninitialized,
            CaptureState::Initialized,
            CaptureState::Starting,
            CaptureState::Stopping,
            CaptureState::Stopped,
        ] {
            assert!(!state.can_stop(), "{state} should reject stop");
        }
    }

    #[test]
    fn error_and_stopped_do_not_fail_again() {
        assert!(!CaptureState::Error.can_fail());
        assert!(!CaptureState::Stopped.can_fail());
        assert!(CaptureState::Stopping.can_fail());
    }
}
