use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::audio_format::AudioFormat;
use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::summary::{CaptureStatistics, CaptureSummary, StopReason};
use crate::session::control::CaptureControl;
use crate::session::output_streamer::{OutputStreamer, OutputTarget, RenderOutcome};
use crate::storage::container_writer::ContainerWriter;
use crate::traits::capture_events::{ActivationRequest, CaptureActivator, CaptureEvents};
use crate::traits::capture_source::CaptureSource;
use crate::traits::clock::CaptureClock;
use crate::traits::media_transform::TransformFactory;

/// Platform services a capturer is built from.
pub struct CaptureBackend {
    pub activator: Arc<dyn CaptureActivator>,
    pub clock: Arc<dyn CaptureClock>,
    /// Live playback target; `None` captures to file only.
    pub output: Option<OutputTarget>,
    /// Preferred resampler; without one the linear fallback is used.
    pub transform_factory: Option<Arc<dyn TransformFactory>>,
}

/// Why a drain pass returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Every buffered packet was processed.
    Idle,
    /// The next packet would overflow the container.
    SizeLimit,
    /// The state machine left `Capturing`.
    Stopping,
}

/// One capture invocation: the capture source, the container file and the
/// optional live output, owned by a single drain context.
pub struct CaptureSession {
    source: Box<dyn CaptureSource>,
    capture_format: AudioFormat,
    writer: ContainerWriter,
    output: Option<OutputStreamer>,
    clock: Arc<dyn CaptureClock>,
    staleness_threshold: Duration,
    previous_capture_time: Option<Duration>,
    silence: Vec<u8>,
    padded: Vec<u8>,
    statistics: CaptureStatistics,
    started_at: DateTime<Utc>,
}

impl CaptureSession {
    /// Open the container file and set up live output around an activated source.
    ///
    /// A live output that cannot be bridged is dropped with a warning; the
    /// session then captures to file only.
    pub fn open(
        source: Box<dyn CaptureSource>,
        config: &CaptureConfiguration,
        output: Option<OutputTarget>,
        transform_factory: Option<&dyn TransformFactory>,
        clock: Arc<dyn CaptureClock>,
    ) -> Result<Self, CaptureError> {
        let writer = ContainerWriter::create(&config.output_file, &config.capture_format)?;

        let output = match output {
            Some(target) => {
                match OutputStreamer::new(target, &config.capture_format, transform_factory, config.resampler_quality) {
                    Ok(streamer) => Some(streamer),
                    Err(e) => {
                        log::warn!("Live output disabled, capturing to file only: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            source,
            capture_format: config.capture_format,
            writer,
            output,
            clock,
            staleness_threshold: config.staleness_threshold,
            previous_capture_time: None,
            silence: Vec::new(),
            padded: Vec::new(),
            statistics: CaptureStatistics::default(),
            started_at: Utc::now(),
        })
    }

    pub fn enable_notifications(&mut self, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError> {
        self.source.enable_notifications(events)
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.source.start()?;
        self.started_at = Utc::now();
        Ok(())
    }

    pub fn statistics(&self) -> &CaptureStatistics {
        &self.statistics
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Drain every packet currently buffered by the capture source.
    pub fn drain_available(&mut self, control: &CaptureControl) -> Result<DrainStatus, CaptureError> {
        loop {
            if !control.is_capturing() {
                return Ok(DrainStatus::Stopping);
            }

            let frames = self.source.next_packet_frames()?;
            if frames == 0 {
                return Ok(DrainStatus::Idle);
            }

            let len = self.capture_format.bytes_for_frames(frames);
            if self.writer.would_overflow(len) {
                log::info!(
                    "Container limit reached at {} data bytes, stopping capture",
                    self.writer.data_size()
                );
                return Ok(DrainStatus::SizeLimit);
            }

            self.process_packet()?;
        }
    }

    fn process_packet(&mut self) -> Result<(), CaptureError> {
        let packet = self.source.acquire_packet()?;
        let frames = packet.frames();
        let flags = packet.flags();
        let capture_time = packet.capture_time();

        if flags.timestamp_error {
            self.statistics.timestamp_errors += 1;
            log::debug!("Packet at position {} has an unreliable timestamp", packet.device_position());
        } else {
            let age = self.clock.now().saturating_sub(capture_time);
            if age > self.staleness_threshold {
                packet.release()?;
                return self.discard_and_resync(frames, age);
            }
        }

        if flags.data_discontinuity {
            log::debug!("Data discontinuity at position {}", packet.device_position());
        }
        if let Some(previous) = self.previous_capture_time {
            log::trace!(
                "{} frames, {:?} after previous packet",
                frames,
                capture_time.saturating_sub(previous)
            );
        }
        self.previous_capture_time = Some(capture_time);

        let len = self.capture_format.bytes_for_frames(frames) as usize;
        let data = if flags.silent {
            self.statistics.silent_packets += 1;
            if self.silence.len() < len {
                self.silence.resize(len, 0);
            }
            &self.silence[..len]
        } else {
            let bytes = packet.data();
            if bytes.len() < len {
                log::warn!(
                    "Packet of {} frames carries {} of {} bytes, padding with silence",
                    frames,
                    bytes.len(),
                    len
                );
                self.padded.clear();
                self.padded.extend_from_slice(bytes);
                self.padded.resize(len, 0);
                &self.padded[..]
            } else {
                &bytes[..len]
            }
        };

        self.writer.write(data)?;

        if let Some(output) = self.output.as_mut() {
            match output.render(data, frames)? {
                RenderOutcome::Rendered(rendered) => self.statistics.frames_rendered += rendered as u64,
                RenderOutcome::Skipped => {
                    self.statistics.packets_skipped += 1;
                    self.statistics.frames_skipped += frames as u64;
                }
            }
        }

        self.statistics.packets_captured += 1;
        self.statistics.frames_captured += frames as u64;
        self.statistics.bytes_written += data.len() as u64;

        packet.release()
    }

    /// Drop everything queued behind a stale packet and restart playback.
    fn discard_and_resync(&mut self, stale_frames: u32, age: Duration) -> Result<(), CaptureError> {
        let mut packets = 1u64;
        let mut frames = stale_frames as u64;
        while self.source.next_packet_frames()? > 0 {
            let packet = self.source.acquire_packet()?;
            frames += packet.frames() as u64;
            packet.release()?;
            packets += 1;
        }

        self.statistics.stale_resyncs += 1;
        self.statistics.packets_discarded += packets;
        self.statistics.frames_discarded += frames;
        self.previous_capture_time = None;

        log::warn!(
            "Stale packet ({:?} old), discarded {} packets ({} frames)",
            age,
            packets,
            frames
        );

        if let Some(output) = self.output.as_mut() {
            output.resync()?;
        }
        Ok(())
    }

    /// Finalize the container after start-up failed, then hand the error back.
    pub fn abandon(self, error: CaptureError) -> CaptureError {
        match self.finish(StopReason::Failed) {
            Ok(summary) => log::warn!(
                "Start failed, finalized {} ({} data bytes)",
                summary.file_path.display(),
                summary.data_size
            ),
            Err(e) => log::warn!("Start failed and the container could not be finalized: {}", e),
        }
        error
    }

    /// Tear down: stop the source and the output, patch the header, end the
    /// resampler stream. Finalize errors are returned; the others are logged.
    pub fn finish(mut self, stop_reason: StopReason) -> Result<CaptureSummary, CaptureError> {
        if let Err(e) = self.source.stop() {
            log::warn!("Failed to stop capture source: {}", e);
        }
        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.stop() {
                log::warn!("Failed to stop output endpoint: {}", e);
            }
        }

        let checksum = self.writer.finalize()?;

        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.end_stream() {
                log::warn!("Failed to end resampler stream: {}", e);
            }
        }

        let summary = CaptureSummary {
            file_path: self.writer.file_path().to_path_buf(),
            capture_format: self.capture_format,
            output_format: self.output.as_ref().map(|output| *output.output_format()),
            header_size: self.writer.header_size(),
            data_size: self.writer.data_size(),
            stop_reason,
            statistics: self.statistics,
            checksum,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        log::info!(
            "Capture finished ({:?}): {} packets, {} bytes, {} stale resyncs, {} skipped",
            summary.stop_reason,
            summary.statistics.packets_captured,
            summary.data_size,
            summary.statistics.stale_resyncs,
            summary.statistics.packets_skipped
        );

        Ok(summary)
    }
}

/// Configuration and backend shared by both capturer variants.
pub(crate) struct SessionSetup {
    pub config: CaptureConfiguration,
    activator: Arc<dyn CaptureActivator>,
    clock: Arc<dyn CaptureClock>,
    transform_factory: Option<Arc<dyn TransformFactory>>,
    output: Mutex<Option<OutputTarget>>,
}

impl SessionSetup {
    pub fn new(config: CaptureConfiguration, backend: CaptureBackend) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(Self {
            config,
            activator: backend.activator,
            clock: backend.clock,
            transform_factory: backend.transform_factory,
            output: Mutex::new(backend.output),
        })
    }

    pub fn activate(&self, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError> {
        let request = ActivationRequest {
            process_id: self.config.process_id,
            loopback_mode: self.config.loopback_mode,
            capture_format: self.config.capture_format,
        };
        log::info!(
            "Activating loopback capture for process {} ({:?})",
            request.process_id,
            request.loopback_mode
        );
        self.activator.activate(request, events)
    }

    /// Build the session; the output target is handed over exactly once.
    pub fn open(&self, source: Box<dyn CaptureSource>) -> Result<CaptureSession, CaptureError> {
        let output = self.output.lock().take();
        CaptureSession::open(
            source,
            &self.config,
            output,
            self.transform_factory.as_deref(),
            Arc::clone(&self.clock),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::LoopbackMode;
    use crate::models::negotiated::{FormatChoice, NegotiatedFormats};
    use crate::models::state::CaptureState;
    use crate::test_support::{
        read_u32, temp_file_path, EndpointCall, ManualClock, RecordingRenderEndpoint, ScriptedCaptureSource,
        ScriptedPacket,
    };
    use std::fs;

    fn config(name: &str) -> CaptureConfiguration {
        CaptureConfiguration::new(4242, LoopbackMode::IncludeTree, temp_file_path(name))
    }

    fn capturing() -> CaptureControl {
        let control = CaptureControl::new();
        control.transition(CaptureState::Capturing);
        control
    }

    fn output_target(endpoint: RecordingRenderEndpoint) -> OutputTarget {
        OutputTarget {
            endpoint: Box::new(endpoint),
            formats: NegotiatedFormats {
                output_format: AudioFormat::pcm(2, 44100, 16),
                choice: FormatChoice::Desired,
            },
        }
    }

    #[test]
    fn three_packets_without_output() {
        let config = config("session_three_packets.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        for _ in 0..3 {
            feed.push(ScriptedPacket::new(100, 4, clock.now()));
        }

        let mut session = CaptureSession::open(Box::new(source), &config, None, None, clock).unwrap();
        assert!(!session.has_output());
        assert_eq!(session.drain_available(&capturing()).unwrap(), DrainStatus::Idle);

        let summary = session.finish(StopReason::Requested).unwrap();
        assert_eq!(summary.data_size, 1200);
        assert_eq!(summary.header_size, 46);
        assert_eq!(summary.statistics.packets_captured, 3);
        assert_eq!(feed.released(), vec![100, 100, 100]);
        assert!(feed.is_stopped());

        let file_data = fs::read(&config.output_file).unwrap();
        assert_eq!(file_data.len(), 46 + 1200);
        assert_eq!(read_u32(&file_data, 42), 1200);
        assert_eq!(read_u32(&file_data, 4), 1200 + 46 - 8);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn passthrough_round_trip_preserves_frames() {
        let config = config("session_round_trip.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        let (endpoint, log) = RecordingRenderEndpoint::new(&config.capture_format, 4096);

        let payload: Vec<u8> = (0..64 * 4).map(|i| (i % 251) as u8).collect();
        feed.push(ScriptedPacket::with_data(payload.clone(), 4, clock.now()));

        let mut session =
            CaptureSession::open(Box::new(source), &config, Some(output_target(endpoint)), None, clock).unwrap();
        session.drain_available(&capturing()).unwrap();
        let summary = session.finish(StopReason::Requested).unwrap();

        assert_eq!(summary.statistics.frames_captured, 64);
        assert_eq!(summary.statistics.frames_rendered, 64);
        assert_eq!(log.rendered(), payload);

        let file_data = fs::read(&config.output_file).unwrap();
        assert_eq!(&file_data[46..], payload.as_slice());
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn stale_packet_discards_queue_and_resyncs_output() {
        let config = config("session_stale.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        let (endpoint, log) = RecordingRenderEndpoint::new(&config.capture_format, 4096);

        let mut session = CaptureSession::open(
            Box::new(source),
            &config,
            Some(output_target(endpoint)),
            None,
            clock.clone(),
        )
        .unwrap();
        let control = capturing();

        // one fresh packet starts the endpoint
        feed.push(ScriptedPacket::new(10, 4, clock.now()));
        session.drain_available(&control).unwrap();

        // three queued packets, the first one 20 ms old
        let captured_at = clock.now();
        for _ in 0..3 {
            feed.push(ScriptedPacket::new(10, 4, captured_at));
        }
        clock.advance(Duration::from_millis(20));
        session.drain_available(&control).unwrap();

        assert_eq!(session.statistics().stale_resyncs, 1);
        assert_eq!(session.statistics().packets_discarded, 3);
        assert_eq!(session.statistics().frames_discarded, 30);
        assert_eq!(feed.queued(), 0);
        assert_eq!(feed.released(), vec![10, 10, 10, 10]);

        let calls = log.calls();
        assert_eq!(
            &calls[calls.len() - 3..],
            &[EndpointCall::Stop, EndpointCall::Reset, EndpointCall::Start]
        );

        // the next fresh packet is processed normally
        feed.push(ScriptedPacket::new(10, 4, clock.now()));
        session.drain_available(&control).unwrap();
        let summary = session.finish(StopReason::Requested).unwrap();
        assert_eq!(summary.data_size, 80);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn timestamp_error_skips_staleness_check() {
        let config = config("session_timestamp_error.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        clock.advance(Duration::from_secs(1));
        feed.push(ScriptedPacket::new(10, 4, Duration::ZERO).timestamp_error());

        let mut session = CaptureSession::open(Box::new(source), &config, None, None, clock).unwrap();
        session.drain_available(&capturing()).unwrap();

        assert_eq!(session.statistics().timestamp_errors, 1);
        assert_eq!(session.statistics().stale_resyncs, 0);
        assert_eq!(session.statistics().bytes_written, 40);
        session.finish(StopReason::Requested).unwrap();
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn silent_packet_is_written_as_zeros() {
        let config = config("session_silent.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        feed.push(ScriptedPacket::with_data(vec![0x55; 40], 4, clock.now()).silent());

        let mut session = CaptureSession::open(Box::new(source), &config, None, None, clock).unwrap();
        session.drain_available(&capturing()).unwrap();
        let summary = session.finish(StopReason::Requested).unwrap();
        assert_eq!(summary.statistics.silent_packets, 1);

        let file_data = fs::read(&config.output_file).unwrap();
        assert_eq!(&file_data[46..], &[0u8; 40]);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn short_packet_is_padded_to_its_frame_count() {
        let config = config("session_short_packet.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        feed.push(ScriptedPacket::with_data(vec![0x11; 24], 4, clock.now()).announcing(10));

        let mut session = CaptureSession::open(Box::new(source), &config, None, None, clock).unwrap();
        session.drain_available(&capturing()).unwrap();
        let summary = session.finish(StopReason::Requested).unwrap();

        assert_eq!(summary.statistics.frames_captured, 10);
        assert_eq!(summary.statistics.bytes_written, 40);
        assert_eq!(summary.data_size, 40);
        assert_eq!(feed.released(), vec![10]);

        let file_data = fs::read(&config.output_file).unwrap();
        assert_eq!(&file_data[46..70], &[0x11u8; 24]);
        assert_eq!(&file_data[70..], &[0u8; 16]);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn backpressure_skip_still_captures_to_file() {
        let config = config("session_backpressure.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        let (endpoint, log) = RecordingRenderEndpoint::new(&config.capture_format, 100);
        log.set_padding(60);
        feed.push(ScriptedPacket::new(50, 4, clock.now()));

        let mut session =
            CaptureSession::open(Box::new(source), &config, Some(output_target(endpoint)), None, clock).unwrap();
        session.drain_available(&capturing()).unwrap();

        assert_eq!(session.statistics().packets_skipped, 1);
        assert_eq!(session.statistics().frames_skipped, 50);
        assert_eq!(session.statistics().bytes_written, 200);
        assert!(!log.calls().iter().any(|call| matches!(call, EndpointCall::GetBuffer(_))));

        let summary = session.finish(StopReason::Requested).unwrap();
        assert_eq!(summary.data_size, 200);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn drain_stops_at_container_limit() {
        let config = config("session_limit.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        feed.push(ScriptedPacket::new(2, 4, clock.now()));
        feed.push(ScriptedPacket::new(2, 4, clock.now()));

        let mut session = CaptureSession::open(Box::new(source), &config, None, None, clock).unwrap();
        session.writer = ContainerWriter::create(&config.output_file, &config.capture_format)
            .unwrap()
            .with_max_data_size(12);

        assert_eq!(session.drain_available(&capturing()).unwrap(), DrainStatus::SizeLimit);
        // the packet that did not fit is still queued and was never acquired
        assert_eq!(feed.queued(), 1);
        assert_eq!(feed.released(), vec![2]);

        let summary = session.finish(StopReason::SizeLimit).unwrap();
        assert_eq!(summary.data_size, 8);
        assert_eq!(summary.stop_reason, StopReason::SizeLimit);
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn drain_returns_once_stopping() {
        let config = config("session_stopping.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        feed.push(ScriptedPacket::new(10, 4, clock.now()));

        let mut session = CaptureSession::open(Box::new(source), &config, None, None, clock).unwrap();
        let control = capturing();
        control.begin_stop("StopCapture").unwrap();

        assert_eq!(session.drain_available(&control).unwrap(), DrainStatus::Stopping);
        assert_eq!(feed.queued(), 1);
        session.finish(StopReason::Requested).unwrap();
        fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn failed_write_still_releases_packet() {
        let config = config("session_release_on_error.wav");
        let (source, feed) = ScriptedCaptureSource::new();
        let clock = Arc::new(ManualClock::default());
        feed.push(ScriptedPacket::new(10, 4, clock.now()));

        let mut session = CaptureSession::open(Box::new(source), &config, None, None, clock).unwrap();
        session.writer.finalize().unwrap();

        assert!(session.drain_available(&capturing()).is_err());
        assert_eq!(feed.released(), vec![10]);
        fs::remove_file(&config.output_file).ok();
    }
}
