//! loopback-capture: record a process tree's audio to a WAV file while
//! re-streaming it to another playback endpoint.

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use loopback_capture_windows::cli::{self, Args};

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Bad or missing arguments only mean there is nothing to do.
            let _ = e.print();
            if !matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                println!();
                let _ = Args::command().print_help();
            }
            return ExitCode::SUCCESS;
        }
    };
    cli::init_logging(&args);

    capture(&args)
}

#[cfg(target_os = "windows")]
fn capture(args: &Args) -> ExitCode {
    use loopback_capture_core::models::summary::StopReason;

    log::info!(
        "Capturing pid {} ({:?}) to {} for {} s",
        args.pid,
        args.mode,
        args.output_file.display(),
        args.duration
    );

    let summary = match loopback_capture_windows::runner::run(args) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Capture failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!(
            "Captured {:.2} s ({} bytes) to {}",
            summary.duration_secs(),
            summary.data_size,
            summary.file_path.display()
        );
        println!("Capture format: {}", summary.capture_format);
        match summary.output_format {
            Some(format) => println!("Live output:    {}", format),
            None => println!("Live output:    none"),
        }
        let stats = &summary.statistics;
        println!(
            "Packets: {} captured, {} discarded in {} resyncs, {} skipped on output",
            stats.packets_captured, stats.packets_discarded, stats.stale_resyncs, stats.packets_skipped
        );
        println!("SHA-256: {}", summary.checksum);
    }

    if summary.stop_reason == StopReason::Failed {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(not(target_os = "windows"))]
fn capture(_args: &Args) -> ExitCode {
    eprintln!("Process loopback capture requires Windows 10 build 20348 or later.");
    ExitCode::FAILURE
}
