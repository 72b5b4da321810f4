use crate::models::error::CaptureError;

/// A shared-mode playback endpoint that receives the live re-stream.
///
/// Independently clocked from the capture source; its buffer is filled with
/// a reserve/commit pair: [`get_buffer`](Self::get_buffer) followed by exactly
/// one [`release_buffer`](Self::release_buffer).
pub trait RenderEndpoint: Send {
    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Flush everything queued for playback. Only valid while stopped.
    fn reset(&mut self) -> Result<(), CaptureError>;

    /// Frames queued but not yet played.
    fn current_padding(&mut self) -> Result<u32, CaptureError>;

    /// Total buffer capacity in frames.
    fn buffer_size(&mut self) -> Result<u32, CaptureError>;

    /// Reserve space for `frames` frames and return it as bytes.
    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8], CaptureError>;

    /// Commit the first `frames_written` frames of the reserved space.
    fn release_buffer(&mut self, frames_written: u32) -> Result<(), CaptureError>;
}
