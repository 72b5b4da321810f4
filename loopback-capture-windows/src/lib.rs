//! # loopback-capture-windows
//!
//! Windows WASAPI backend for loopback-capture-core.
//!
//! Provides:
//! - `ProcessLoopbackActivator`: asynchronous process-loopback activation
//! - `WasapiCaptureSource`: event-driven `IAudioCaptureClient` packet leasing
//! - `WasapiRenderEndpoint`: shared-mode render client with format negotiation
//! - `MfResamplerFactory`: Media Foundation resampler transform
//! - `QpcClock`: performance counter clock matching packet timestamps
//! - `DeviceEnumerator`: render endpoint lookup by friendly name
//! - `cli`: argument model and logging setup for the `loopback-capture` binary
//!
//! ## Platform Requirements
//! - Windows 10 build 20348+ (or Windows 11) for process loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use loopback_capture_core::{CaptureBackend, CaptureConfiguration, LoopbackMode, ThreadDrivenCapturer};
//! use loopback_capture_windows::{ProcessLoopbackActivator, QpcClock};
//!
//! let backend = CaptureBackend {
//!     activator: Arc::new(ProcessLoopbackActivator::new()),
//!     clock: Arc::new(QpcClock::new()?),
//!     output: None,
//!     transform_factory: None,
//! };
//! let config = CaptureConfiguration::new(pid, LoopbackMode::IncludeTree, "capture.wav");
//! let capturer = ThreadDrivenCapturer::new(config, backend)?;
//! ```

pub mod cli;

#[cfg(target_os = "windows")]
pub mod capture_source;
#[cfg(target_os = "windows")]
pub mod clock;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod media_transform;
#[cfg(target_os = "windows")]
pub mod process_loopback;
#[cfg(target_os = "windows")]
pub mod render_endpoint;
#[cfg(target_os = "windows")]
pub mod runner;
#[cfg(target_os = "windows")]
pub mod wave_format;

#[cfg(target_os = "windows")]
pub use capture_source::WasapiCaptureSource;
#[cfg(target_os = "windows")]
pub use clock::QpcClock;
#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use media_transform::MfResamplerFactory;
#[cfg(target_os = "windows")]
pub use process_loopback::ProcessLoopbackActivator;
#[cfg(target_os = "windows")]
pub use render_endpoint::WasapiRenderEndpoint;
