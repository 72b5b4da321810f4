//! Performance-counter clock on the same time base as WASAPI packet timestamps.

use std::time::Duration;

use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};

use loopback_capture_core::models::error::{CaptureError, CapturePhase};
use loopback_capture_core::traits::clock::CaptureClock;

/// Reads `QueryPerformanceCounter`.
///
/// `IAudioCaptureClient::GetBuffer` reports capture positions as performance
/// counter values scaled to 100 ns units, so both sides agree on "now".
pub struct QpcClock {
    frequency: u64,
}

impl QpcClock {
    pub fn new() -> Result<Self, CaptureError> {
        let mut frequency = 0i64;
        unsafe { QueryPerformanceFrequency(&mut frequency) }
            .map_err(|e| CaptureError::device(CapturePhase::Start, format!("QueryPerformanceFrequency failed: {}", e)))?;
        if frequency <= 0 {
            return Err(CaptureError::device(CapturePhase::Start, "performance counter is unavailable"));
        }
        Ok(Self {
            frequency: frequency as u64,
        })
    }
}

impl CaptureClock for QpcClock {
    fn now(&self) -> Duration {
        let mut ticks = 0i64;
        if let Err(e) = unsafe { QueryPerformanceCounter(&mut ticks) } {
            log::error!("QueryPerformanceCounter failed: {}", e);
            return Duration::ZERO;
        }
        let nanos = ticks.max(0) as u128 * 1_000_000_000 / self.frequency as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// Convert a WASAPI QPC position (100 ns units) to the clock's time base.
pub fn qpc_position_to_duration(position: u64) -> Duration {
    Duration::from_nanos(position.saturating_mul(100))
}
