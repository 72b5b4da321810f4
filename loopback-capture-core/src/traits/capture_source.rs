use std::sync::Arc;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::traits::capture_events::CaptureEvents;

/// Per-packet flags reported by the capture source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// The buffer should be treated as silence regardless of its contents.
    pub silent: bool,
    /// The packet is not contiguous with the previous one.
    pub data_discontinuity: bool,
    /// The capture timestamp could not be recorded reliably.
    pub timestamp_error: bool,
}

/// Returns an acquired packet buffer to its capture source.
pub trait PacketRelease {
    fn release(&mut self, frames: u32) -> Result<(), CaptureError>;
}

/// A leased capture buffer.
///
/// The bytes are only valid while the lease is alive. Call [`release`](Self::release)
/// to hand the buffer back and observe failures; a lease dropped without an
/// explicit release (an early return, a failed write) releases itself. Either
/// way the buffer is returned exactly once.
pub struct CapturePacket<'a> {
    data: &'a [u8],
    frames: u32,
    device_position: u64,
    capture_time: Duration,
    flags: PacketFlags,
    releaser: Option<&'a mut dyn PacketRelease>,
}

impl<'a> CapturePacket<'a> {
    pub fn new(
        data: &'a [u8],
        frames: u32,
        device_position: u64,
        capture_time: Duration,
        flags: PacketFlags,
        releaser: &'a mut dyn PacketRelease,
    ) -> Self {
        Self {
            data,
            frames,
            device_position,
            capture_time,
            flags,
            releaser: Some(releaser),
        }
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Frames since the start of the stream, up to the first frame of this packet.
    pub fn device_position(&self) -> u64 {
        self.device_position
    }

    /// Time at which the first frame was buffered, on the [`CaptureClock`](super::clock::CaptureClock) time base.
    pub fn capture_time(&self) -> Duration {
        self.capture_time
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    /// Hand the buffer back to the capture source.
    pub fn release(mut self) -> Result<(), CaptureError> {
        match self.releaser.take() {
            Some(releaser) => releaser.release(self.frames),
            None => Ok(()),
        }
    }
}

impl Drop for CapturePacket<'_> {
    fn drop(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            if let Err(e) = releaser.release(self.frames) {
                log::error!("Failed to release capture packet of {} frames: {}", self.frames, e);
            }
        }
    }
}

/// An activated loopback capture interface.
///
/// Owned exclusively by one capture session for its whole lifetime.
pub trait CaptureSource: Send {
    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Frames in the next queued packet, or 0 when nothing is buffered.
    fn next_packet_frames(&mut self) -> Result<u32, CaptureError>;

    /// Lease the next queued packet.
    fn acquire_packet(&mut self) -> Result<CapturePacket<'_>, CaptureError>;

    /// Ask the source to call [`CaptureEvents::on_packet_ready`] whenever new packets are buffered.
    fn enable_notifications(&mut self, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError>;
}
