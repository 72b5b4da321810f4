use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::audio_format::AudioFormat;

/// Why a capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `StopCapture` was requested.
    Requested,
    /// The container reached its maximum representable data size.
    SizeLimit,
    /// Teardown after a terminal failure.
    Failed,
}

/// Counters collected by the drain loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStatistics {
    pub packets_captured: u64,
    pub frames_captured: u64,
    pub bytes_written: u64,
    /// Number of times a stale packet triggered a discard-and-resync.
    pub stale_resyncs: u64,
    pub packets_discarded: u64,
    pub frames_discarded: u64,
    /// Packets captured to file but dropped from live playback for lack of space.
    pub packets_skipped: u64,
    pub frames_skipped: u64,
    pub frames_rendered: u64,
    pub timestamp_errors: u64,
    pub silent_packets: u64,
}

/// Result returned when a capture session is torn down.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSummary {
    pub file_path: PathBuf,
    pub capture_format: AudioFormat,
    pub output_format: Option<AudioFormat>,
    /// Bytes of header preceding the sample data (0 for headerless files).
    pub header_size: u32,
    pub data_size: u32,
    pub stop_reason: StopReason,
    pub statistics: CaptureStatistics,
    /// SHA-256 of the finalized file, hex encoded.
    pub checksum: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CaptureSummary {
    /// Captured duration derived from the data size.
    pub fn duration_secs(&self) -> f64 {
        let bytes_per_sec = self.capture_format.avg_bytes_per_sec();
        if bytes_per_sec == 0 {
            return 0.0;
        }
        self.data_size as f64 / bytes_per_sec as f64
    }
}
