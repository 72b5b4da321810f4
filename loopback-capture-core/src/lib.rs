//! # loopback-capture-core
//!
//! Platform-agnostic process loopback capture pipeline.
//!
//! Drains a loopback capture source, writes the stream into a WAV container
//! whose sizes are patched at the end, and optionally re-streams it to a
//! second playback endpoint through a resampler. Platform backends implement
//! the collaborator traits and plug into either capturer.
//!
//! ## Architecture
//!
//! ```text
//! loopback-capture-core (this crate)
//! ├── traits/       ← CaptureSource, CaptureActivator, CaptureEvents, RenderEndpoint,
//! │                   MediaTransform, CaptureClock, CaptureDelegate
//! ├── models/       ← AudioFormat, CaptureState, CaptureError, CaptureConfiguration, CaptureSummary
//! ├── processing/   ← WAV header layout, Resampler, output format negotiation
//! ├── storage/      ← ContainerWriter
//! └── session/      ← CaptureControl, CaptureSession (drain loop), OutputStreamer,
//!                     activation promise, ThreadDrivenCapturer, TaskDrivenCapturer
//! ```
//!
//! ## Data flow
//!
//! ```text
//! [CaptureSource] → packet lease → [ContainerWriter]
//!                                └→ [Resampler] → [RenderEndpoint]
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use models::audio_format::{AudioFormat, ExtensibleFields, FormatTag, SampleKind};
pub use models::config::{CaptureConfiguration, LoopbackMode};
pub use models::error::{CaptureError, CapturePhase};
pub use models::negotiated::{FormatChoice, NegotiatedFormats};
pub use models::state::CaptureState;
pub use models::summary::{CaptureStatistics, CaptureSummary, StopReason};
pub use processing::negotiation::{choose_output_format, desired_output_format, FormatSupport};
pub use session::activation::{activation_channel, ActivationResolver, PendingActivation};
pub use session::capture_session::CaptureBackend;
pub use session::output_streamer::OutputTarget;
pub use session::task_driven::TaskDrivenCapturer;
pub use session::thread_driven::ThreadDrivenCapturer;
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::capture_events::{ActivationRequest, CaptureActivator, CaptureEvents};
pub use traits::capture_source::{CapturePacket, CaptureSource, PacketFlags, PacketRelease};
pub use traits::clock::CaptureClock;
pub use traits::media_transform::{
    MediaTransform, MediaTypeDescription, TransformFactory, TransformMessage, TransformOutput,
};
pub use traits::render_endpoint::RenderEndpoint;
