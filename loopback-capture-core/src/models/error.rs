use std::fmt;

use thiserror::Error;

use super::state::CaptureState;

/// Phase of a capture session in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapturePhase {
    Activation,
    Header,
    Start,
    Drain,
    Render,
    Finalize,
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Activation => "activation",
            Self::Header => "header",
            Self::Start => "start",
            Self::Drain => "drain",
            Self::Render => "render",
            Self::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by capture operations.
///
/// Recoverable conditions (stale packets, backpressure skips, reaching the
/// container size limit) never appear here; they are counted in
/// [`CaptureStatistics`](super::summary::CaptureStatistics) instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    #[error("activation failed: {0}")]
    ActivationFailed(String),

    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),

    #[error("resampler initialization failed: {0}")]
    ResamplerInitFailed(String),

    #[error("I/O error during {phase}: {message}")]
    Io { phase: CapturePhase, message: String },

    #[error("device error during {phase}: {message}")]
    Device { phase: CapturePhase, message: String },

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub fn io(phase: CapturePhase, error: impl fmt::Display) -> Self {
        Self::Io {
            phase,
            message: error.to_string(),
        }
    }

    pub fn device(phase: CapturePhase, error: impl fmt::Display) -> Self {
        Self::Device {
            phase,
            message: error.to_string(),
        }
    }

    /// Phase the error is attributed to, if any.
    pub fn phase(&self) -> Option<CapturePhase> {
        match self {
            Self::Io { phase, .. } | Self::Device { phase, .. } => Some(*phase),
            Self::ActivationFailed(_) => Some(CapturePhase::Activation),
            _ => None,
        }
    }
}
