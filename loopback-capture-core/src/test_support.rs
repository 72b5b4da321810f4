//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_format::AudioFormat;
use crate::models::error::{CaptureError, CapturePhase};
use crate::models::state::CaptureState;
use crate::models::summary::CaptureSummary;
use crate::session::activation::ActivationResult;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_events::{ActivationRequest, CaptureActivator, CaptureEvents};
use crate::traits::capture_source::{CapturePacket, CaptureSource, PacketFlags, PacketRelease};
use crate::traits::clock::CaptureClock;
use crate::traits::media_transform::{
    MediaTransform, MediaTypeDescription, TransformFactory, TransformMessage, TransformOutput,
};
use crate::traits::render_endpoint::RenderEndpoint;

pub fn temp_file_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("loopback_capture_test_{}", name))
}

pub fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

// --- capture source ---

#[derive(Debug, Clone)]
pub struct ScriptedPacket {
    data: Vec<u8>,
    frames: u32,
    capture_time: Duration,
    flags: PacketFlags,
}

impl ScriptedPacket {
    /// `frames` frames of zeroed samples.
    pub fn new(frames: u32, block_align: usize, capture_time: Duration) -> Self {
        Self::with_data(vec![0; frames as usize * block_align], block_align, capture_time)
    }

    pub fn with_data(data: Vec<u8>, block_align: usize, capture_time: Duration) -> Self {
        Self {
            frames: (data.len() / block_align) as u32,
            data,
            capture_time,
            flags: PacketFlags::default(),
        }
    }

    /// Announces `frames` frames but carries no bytes; only useful for
    /// packets that are never acquired.
    pub fn without_data(frames: u32, capture_time: Duration) -> Self {
        Self {
            data: Vec::new(),
            frames,
            capture_time,
            flags: PacketFlags::default(),
        }
    }

    /// Claims `frames` frames regardless of how many bytes it carries.
    pub fn announcing(mut self, frames: u32) -> Self {
        self.frames = frames;
        self
    }

    pub fn silent(mut self) -> Self {
        self.flags.silent = true;
        self
    }

    pub fn timestamp_error(mut self) -> Self {
        self.flags.timestamp_error = true;
        self
    }
}

#[derive(Default)]
struct FeedState {
    queue: VecDeque<ScriptedPacket>,
    released: Vec<u32>,
    position: u64,
    started: bool,
    stopped: bool,
    query_error: Option<CaptureError>,
    start_error: Option<CaptureError>,
    events: Option<Arc<dyn CaptureEvents>>,
}

/// Test-side handle feeding a [`ScriptedCaptureSource`].
#[derive(Clone)]
pub struct SourceFeed(Arc<Mutex<FeedState>>);

impl SourceFeed {
    /// Queue a packet and signal readiness if notifications are enabled.
    pub fn push(&self, packet: ScriptedPacket) {
        let events = {
            let mut feed = self.0.lock();
            feed.queue.push_back(packet);
            feed.events.clone()
        };
        if let Some(events) = events {
            events.on_packet_ready();
        }
    }

    pub fn notify(&self) {
        let events = self.0.lock().events.clone();
        if let Some(events) = events {
            events.on_packet_ready();
        }
    }

    /// Make the next frame-count query fail.
    pub fn fail_next_query(&self, error: CaptureError) {
        self.0.lock().query_error = Some(error);
    }

    /// Make `start` fail.
    pub fn fail_start(&self, error: CaptureError) {
        self.0.lock().start_error = Some(error);
    }

    pub fn released(&self) -> Vec<u32> {
        self.0.lock().released.clone()
    }

    pub fn queued(&self) -> usize {
        self.0.lock().queue.len()
    }

    pub fn is_started(&self) -> bool {
        self.0.lock().started
    }

    pub fn is_stopped(&self) -> bool {
        self.0.lock().stopped
    }
}

struct FeedRelease(Arc<Mutex<FeedState>>);

impl PacketRelease for FeedRelease {
    fn release(&mut self, frames: u32) -> Result<(), CaptureError> {
        self.0.lock().released.push(frames);
        Ok(())
    }
}

pub struct ScriptedCaptureSource {
    feed: Arc<Mutex<FeedState>>,
    current: Option<ScriptedPacket>,
    releaser: FeedRelease,
}

impl ScriptedCaptureSource {
    pub fn new() -> (Self, SourceFeed) {
        let feed = Arc::new(Mutex::new(FeedState::default()));
        let source = Self {
            feed: Arc::clone(&feed),
            current: None,
            releaser: FeedRelease(Arc::clone(&feed)),
        };
        (source, SourceFeed(feed))
    }
}

impl CaptureSource for ScriptedCaptureSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        let mut feed = self.feed.lock();
        if let Some(error) = feed.start_error.take() {
            return Err(error);
        }
        feed.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.feed.lock().stopped = true;
        Ok(())
    }

    fn next_packet_frames(&mut self) -> Result<u32, CaptureError> {
        let mut feed = self.feed.lock();
        if let Some(error) = feed.query_error.take() {
            return Err(error);
        }
        Ok(feed.queue.front().map_or(0, |packet| packet.frames))
    }

    fn acquire_packet(&mut self) -> Result<CapturePacket<'_>, CaptureError> {
        let (packet, position) = {
            let mut feed = self.feed.lock();
            let packet = feed
                .queue
                .pop_front()
                .ok_or_else(|| CaptureError::device(CapturePhase::Drain, "no packet queued"))?;
            let position = feed.position;
            feed.position += packet.frames as u64;
            (packet, position)
        };

        let current = self.current.insert(packet);
        Ok(CapturePacket::new(
            &current.data,
            current.frames,
            position,
            current.capture_time,
            current.flags,
            &mut self.releaser,
        ))
    }

    fn enable_notifications(&mut self, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError> {
        self.feed.lock().events = Some(events);
        Ok(())
    }
}

// --- activation ---

/// Completes activation from another thread, like the platform's MTA callback.
pub struct ScriptedActivator {
    result: Mutex<Option<ActivationResult>>,
    refuse: bool,
}

impl ScriptedActivator {
    pub fn succeeding(source: ScriptedCaptureSource) -> Self {
        let source: Box<dyn CaptureSource> = Box::new(source);
        Self {
            result: Mutex::new(Some(Ok(source))),
            refuse: false,
        }
    }

    pub fn failing(error: CaptureError) -> Self {
        Self {
            result: Mutex::new(Some(Err(error))),
            refuse: false,
        }
    }

    /// Rejects the request itself; no completion follows.
    pub fn refusing() -> Self {
        Self {
            result: Mutex::new(None),
            refuse: true,
        }
    }
}

impl CaptureActivator for ScriptedActivator {
    fn activate(&self, _request: ActivationRequest, events: Arc<dyn CaptureEvents>) -> Result<(), CaptureError> {
        if self.refuse {
            return Err(CaptureError::ActivationFailed("request refused".into()));
        }
        let result = self
            .result
            .lock()
            .take()
            .unwrap_or_else(|| Err(CaptureError::ActivationFailed("already activated".into())));
        thread::spawn(move || events.on_activation_complete(result));
        Ok(())
    }
}

// --- render endpoint ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointCall {
    Start,
    Stop,
    Reset,
    GetBuffer(u32),
    Release(u32),
}

#[derive(Default)]
struct EndpointState {
    calls: Vec<EndpointCall>,
    padding: u32,
    buffer_size: u32,
    rendered: Vec<u8>,
}

#[derive(Clone)]
pub struct EndpointLog(Arc<Mutex<EndpointState>>);

impl EndpointLog {
    pub fn calls(&self) -> Vec<EndpointCall> {
        self.0.lock().calls.clone()
    }

    /// Bytes committed through `release_buffer`.
    pub fn rendered(&self) -> Vec<u8> {
        self.0.lock().rendered.clone()
    }

    pub fn set_padding(&self, padding: u32) {
        self.0.lock().padding = padding;
    }
}

pub struct RecordingRenderEndpoint {
    log: EndpointLog,
    block_align: usize,
    scratch: Vec<u8>,
}

impl RecordingRenderEndpoint {
    pub fn new(format: &AudioFormat, buffer_size: u32) -> (Self, EndpointLog) {
        let log = EndpointLog(Arc::new(Mutex::new(EndpointState {
            buffer_size,
            ..Default::default()
        })));
        let endpoint = Self {
            log: log.clone(),
            block_align: format.block_align() as usize,
            scratch: Vec::new(),
        };
        (endpoint, log)
    }

    fn record(&self, call: EndpointCall) {
        self.log.0.lock().calls.push(call);
    }
}

impl RenderEndpoint for RecordingRenderEndpoint {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.record(EndpointCall::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.record(EndpointCall::Stop);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        self.record(EndpointCall::Reset);
        Ok(())
    }

    fn current_padding(&mut self) -> Result<u32, CaptureError> {
        Ok(self.log.0.lock().padding)
    }

    fn buffer_size(&mut self) -> Result<u32, CaptureError> {
        Ok(self.log.0.lock().buffer_size)
    }

    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8], CaptureError> {
        self.record(EndpointCall::GetBuffer(frames));
        self.scratch = vec![0; frames as usize * self.block_align];
        Ok(&mut self.scratch)
    }

    fn release_buffer(&mut self, frames_written: u32) -> Result<(), CaptureError> {
        self.record(EndpointCall::Release(frames_written));
        let len = frames_written as usize * self.block_align;
        self.log.0.lock().rendered.extend_from_slice(&self.scratch[..len]);
        Ok(())
    }
}

// --- media transform ---

#[derive(Default)]
struct TransformState {
    messages: Vec<TransformMessage>,
    quality: Option<u32>,
    input_bytes: usize,
}

#[derive(Clone, Default)]
pub struct TransformLog(Arc<Mutex<TransformState>>);

impl TransformLog {
    pub fn messages(&self) -> Vec<TransformMessage> {
        self.0.lock().messages.clone()
    }

    pub fn quality(&self) -> Option<u32> {
        self.0.lock().quality
    }

    pub fn input_bytes(&self) -> usize {
        self.0.lock().input_bytes
    }
}

/// Emits one zero byte of output per byte of input.
struct ScriptedTransform {
    log: TransformLog,
    need_more_input: bool,
    fail_input: bool,
    pending: usize,
}

impl MediaTransform for ScriptedTransform {
    fn process_message(&mut self, message: TransformMessage) -> Result<(), CaptureError> {
        self.log.0.lock().messages.push(message);
        Ok(())
    }

    fn process_input(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        if self.fail_input {
            return Err(CaptureError::device(CapturePhase::Render, "input rejected"));
        }
        self.log.0.lock().input_bytes += data.len();
        self.pending += data.len();
        Ok(())
    }

    fn process_output(&mut self, dst: &mut [u8]) -> Result<TransformOutput, CaptureError> {
        if self.need_more_input || self.pending == 0 {
            return Ok(TransformOutput::NeedMoreInput);
        }
        let len = self.pending.min(dst.len());
        dst[..len].fill(0);
        self.pending -= len;
        Ok(TransformOutput::Produced(len))
    }
}

pub struct ScriptedTransformFactory {
    log: TransformLog,
    need_more_input: bool,
    fail_create: bool,
    fail_input: bool,
}

impl ScriptedTransformFactory {
    pub fn new(log: TransformLog) -> Self {
        Self {
            log,
            need_more_input: false,
            fail_create: false,
            fail_input: false,
        }
    }

    pub fn needing_more_input(mut self) -> Self {
        self.need_more_input = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_input(mut self) -> Self {
        self.fail_input = true;
        self
    }
}

impl TransformFactory for ScriptedTransformFactory {
    fn create(
        &self,
        _input: &MediaTypeDescription,
        _output: &MediaTypeDescription,
        quality: u32,
    ) -> Result<Box<dyn MediaTransform>, CaptureError> {
        if self.fail_create {
            return Err(CaptureError::ResamplerInitFailed("transform unavailable".into()));
        }
        self.log.0.lock().quality = Some(quality);
        Ok(Box::new(ScriptedTransform {
            log: self.log.clone(),
            need_more_input: self.need_more_input,
            fail_input: self.fail_input,
            pending: 0,
        }))
    }
}

// --- clock and delegate ---

#[derive(Default)]
pub struct ManualClock(Mutex<Duration>);

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl CaptureClock for ManualClock {
    fn now(&self) -> Duration {
        *self.0.lock()
    }
}

#[derive(Default)]
pub struct RecordingDelegate {
    states: Mutex<Vec<CaptureState>>,
    errors: Mutex<Vec<CaptureError>>,
    summaries: Mutex<Vec<CaptureSummary>>,
}

impl RecordingDelegate {
    pub fn states(&self) -> Vec<CaptureState> {
        self.states.lock().clone()
    }

    pub fn errors(&self) -> Vec<CaptureError> {
        self.errors.lock().clone()
    }

    pub fn summaries(&self) -> Vec<CaptureSummary> {
        self.summaries.lock().clone()
    }
}

impl CaptureDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: CaptureState) {
        self.states.lock().push(state);
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.clone());
    }

    fn on_capture_finished(&self, summary: &CaptureSummary) {
        self.summaries.lock().push(summary.clone());
    }
}
