use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use super::audio_format::AudioFormat;

/// Which processes contribute to the captured mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopbackMode {
    /// The target process and its descendants only.
    IncludeTree,
    /// Everything except the target process and its descendants.
    ExcludeTree,
}

/// Configuration for a capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfiguration {
    /// Target process id (must be non-zero).
    pub process_id: u32,

    /// Include or exclude the target's process tree.
    pub loopback_mode: LoopbackMode,

    /// WAV (or raw, for extensible formats) destination, truncated on start.
    pub output_file: PathBuf,

    /// Format requested from the loopback client (default: 16-bit stereo 44.1 kHz PCM).
    pub capture_format: AudioFormat,

    /// Packets older than this are discarded together with everything queued behind them.
    pub staleness_threshold: Duration,

    /// Sleep between empty polls in the dedicated-thread model.
    pub idle_poll_interval: Duration,

    /// Half filter length handed to the transform resampler (1 = lowest latency, 60 = best quality).
    pub resampler_quality: u32,
}

impl CaptureConfiguration {
    pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_millis(15);
    pub const DEFAULT_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);
    pub const MAX_RESAMPLER_QUALITY: u32 = 60;

    pub fn new(process_id: u32, loopback_mode: LoopbackMode, output_file: impl Into<PathBuf>) -> Self {
        Self {
            process_id,
            loopback_mode,
            output_file: output_file.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.process_id == 0 {
            return Err("process id must be positive".into());
        }
        self.capture_format
            .validate()
            .map_err(|e| format!("invalid capture format: {}", e))?;
        if self.staleness_threshold.is_zero() {
            return Err("staleness threshold must be positive".into());
        }
        if !(1..=Self::MAX_RESAMPLER_QUALITY).contains(&self.resampler_quality) {
            return Err(format!(
                "resampler quality must be within 1..={}, got {}",
                Self::MAX_RESAMPLER_QUALITY,
                self.resampler_quality
            ));
        }
        Ok(())
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            process_id: 0,
            loopback_mode: LoopbackMode::IncludeTree,
            output_file: PathBuf::from("capture.wav"),
            capture_format: AudioFormat::default(),
            staleness_threshold: Self::DEFAULT_STALENESS_THRESHOLD,
            idle_poll_interval: Self::DEFAULT_IDLE_POLL_INTERVAL,
            resampler_quality: Self::MAX_RESAMPLER_QUALITY,
        }
    }
}
