//! Command-line interface for loopback-capture.
//!
//! Handles argument parsing and logging configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use loopback_capture_core::models::config::{CaptureConfiguration, LoopbackMode};

/// Which processes contribute to the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TreeMode {
    /// The target process and its children
    #[value(name = "includetree")]
    IncludeTree,
    /// Everything except the target process and its children
    #[value(name = "excludetree")]
    ExcludeTree,
}

impl From<TreeMode> for LoopbackMode {
    fn from(mode: TreeMode) -> Self {
        match mode {
            TreeMode::IncludeTree => LoopbackMode::IncludeTree,
            TreeMode::ExcludeTree => LoopbackMode::ExcludeTree,
        }
    }
}

/// How the capture pipeline is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scheduling {
    /// Dedicated drain thread; the main thread blocks until capture ends
    #[value(name = "Sync")]
    Sync,
    /// Work items on the tokio runtime, one per packet-ready signal
    #[value(name = "Async")]
    Async,
}

/// Capture one process tree's audio to a WAV file while re-streaming it live
/// to another playback endpoint.
#[derive(Parser, Debug)]
#[command(name = "loopback-capture")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target process id
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub pid: u32,

    /// Capture the process tree or everything but it
    #[arg(value_enum, ignore_case = true)]
    pub mode: TreeMode,

    /// Destination file (truncated if it exists)
    pub output_file: PathBuf,

    /// Substring of the friendly name of the playback endpoint to re-stream to
    pub endpoint: String,

    /// Scheduling model
    #[arg(value_enum, ignore_case = true)]
    pub scheduling: Scheduling,

    /// Seconds to capture before stopping
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,

    /// Resampler half filter length (1 = lowest latency, 60 = best quality)
    #[arg(long, default_value_t = CaptureConfiguration::MAX_RESAMPLER_QUALITY,
          value_parser = clap::value_parser!(u32).range(1..=CaptureConfiguration::MAX_RESAMPLER_QUALITY as i64))]
    pub quality: u32,

    /// Print the capture summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace (per packet)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    pub fn capture_duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    /// Session configuration for these arguments; everything else keeps its default.
    pub fn configuration(&self) -> CaptureConfiguration {
        CaptureConfiguration {
            resampler_quality: self.quality,
            ..CaptureConfiguration::new(self.pid, self.mode.into(), self.output_file.clone())
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("loopback_capture", args.log_level());
    builder.filter_module("loopback_capture_core", args.log_level());
    builder.filter_module("loopback_capture_windows", args.log_level());

    // RUST_LOG still wins
    builder.parse_default_env();

    builder.format_timestamp_millis().init();
}
