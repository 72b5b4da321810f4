use std::time::Duration;

/// Monotonic clock sharing a time base with packet capture timestamps.
pub trait CaptureClock: Send + Sync {
    fn now(&self) -> Duration;
}
