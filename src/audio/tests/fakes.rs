//! In-memory stand-ins for the capability interfaces.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::audio::demuxer::Frame;
use crate::audio::{
    AudioOutputDevice, DecoderFactory, FrameDecoder, OutputDeviceFactory, PlaybackBuffer,
    PlaybackEvent, PlaybackOrchestrator,
};
use crate::config::{EngineSettings, Watermarks};
use crate::error::PlaybackError;
use crate::models::{AudioFormat, PcmSpec, PlayableItem, PlaybackState, TrackRef};
use crate::queue::NextItemProvider;
use crate::stream::{ByteStream, StreamProvider};

/// MPEG-1 Layer III, 128 kbps, 44.1 kHz, stereo, no padding
pub const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
pub const FRAME_LEN: usize = 417;
/// Playing time of one synthetic frame
pub const FRAME_DURATION: Duration = Duration::from_micros(26_122);

pub fn synth_frame() -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&FRAME_HEADER);
    frame
}

pub fn synth_stream(frames: usize) -> Vec<u8> {
    synth_frame().repeat(frames)
}

/// Small buffer and watermarks; the background ticker effectively never
/// fires so tests drive `tick()` themselves.
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        buffer_capacity: Duration::from_secs(2),
        watermarks: Watermarks {
            low: Duration::from_millis(50),
            high: Duration::from_millis(200),
        },
        tick_interval: Duration::from_secs(3600),
        read_ahead_bytes: 4096,
        flow_control_sleep: Duration::from_millis(5),
        max_resync_bytes: 64 * 1024,
        initial_volume: 100,
    }
}

pub fn item(sequence: u64, track_id: &str) -> Arc<PlayableItem> {
    Arc::new(PlayableItem::new(sequence, TrackRef::new(track_id)))
}

/// Decoder that emits one frame's worth of constant samples
pub struct FakeDecoder {
    format: AudioFormat,
    value: f32,
}

impl FrameDecoder for FakeDecoder {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn decompress(&mut self, frame: &Frame, out: &mut [f32]) -> Result<usize, PlaybackError> {
        let samples = frame.header.samples_per_frame() * frame.header.channels() as usize;
        let n = samples.min(out.len());
        out[..n].iter_mut().for_each(|s| *s = self.value);
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FakeDecoderFactory {
    pub value: f32,
}

impl Default for FakeDecoderFactory {
    fn default() -> Self {
        Self { value: 0.5 }
    }
}

impl DecoderFactory for FakeDecoderFactory {
    fn create(&self, first: &Frame) -> Result<Box<dyn FrameDecoder>, PlaybackError> {
        Ok(Box::new(FakeDecoder {
            format: first.header.audio_format(),
            value: self.value,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Init(PcmSpec),
    Play,
    Pause,
    Stop,
}

/// Test-side view of every device the fake factory hands out
#[derive(Clone, Default)]
pub struct DeviceHandle {
    calls: Arc<Mutex<Vec<DeviceCall>>>,
    buffer: Arc<Mutex<Option<Arc<PlaybackBuffer>>>>,
    fault: Arc<Mutex<Option<PlaybackError>>>,
    blocking_threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl DeviceHandle {
    /// Threads that ran `init` or `stop`
    pub fn blocking_threads(&self) -> Vec<ThreadId> {
        self.blocking_threads.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &DeviceCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Consume everything currently buffered, as the audio callback would
    pub fn drain_all(&self) -> Vec<f32> {
        let buffer = self.buffer.lock().unwrap().clone();
        let Some(buffer) = buffer else {
            return Vec::new();
        };
        let mut out = vec![0.0; buffer.buffered_samples()];
        let n = buffer.read(&mut out);
        out.truncate(n);
        out
    }

    pub fn buffer_spec(&self) -> Option<PcmSpec> {
        self.buffer.lock().unwrap().as_ref().map(|b| b.spec())
    }

    pub fn inject_fault(&self, reason: &str) {
        *self.fault.lock().unwrap() = Some(PlaybackError::DeviceFailure(reason.to_string()));
    }
}

pub struct FakeOutputDevice {
    handle: DeviceHandle,
    forced_spec: Option<PcmSpec>,
    fail_init: bool,
}

impl FakeOutputDevice {
    fn record(&self, call: DeviceCall) {
        if matches!(call, DeviceCall::Init(_) | DeviceCall::Stop) {
            self.handle
                .blocking_threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
        }
        self.handle.calls.lock().unwrap().push(call);
    }
}

impl AudioOutputDevice for FakeOutputDevice {
    fn negotiate(&mut self, requested: PcmSpec) -> Result<PcmSpec, PlaybackError> {
        Ok(self.forced_spec.unwrap_or(requested))
    }

    fn init(&mut self, spec: PcmSpec, source: Arc<PlaybackBuffer>) -> Result<(), PlaybackError> {
        if self.fail_init {
            return Err(PlaybackError::DeviceFailure("no output device".to_string()));
        }
        self.record(DeviceCall::Init(spec));
        *self.handle.buffer.lock().unwrap() = Some(source);
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        self.record(DeviceCall::Play);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        self.record(DeviceCall::Pause);
        Ok(())
    }

    fn stop(&mut self) {
        self.record(DeviceCall::Stop);
    }

    fn take_fault(&mut self) -> Option<PlaybackError> {
        self.handle.fault.lock().unwrap().take()
    }
}

#[derive(Clone, Default)]
pub struct FakeOutputFactory {
    pub handle: DeviceHandle,
    pub forced_spec: Option<PcmSpec>,
    pub fail_init: bool,
}

impl OutputDeviceFactory for FakeOutputFactory {
    fn create(&self) -> Result<Box<dyn AudioOutputDevice>, PlaybackError> {
        Ok(Box::new(FakeOutputDevice {
            handle: self.handle.clone(),
            forced_spec: self.forced_spec,
            fail_init: self.fail_init,
        }))
    }
}

/// Endless stream of synthetic frames
pub struct RepeatingFrames {
    frame: Vec<u8>,
    pos: usize,
}

impl RepeatingFrames {
    pub fn new() -> Self {
        Self {
            frame: synth_frame(),
            pos: 0,
        }
    }
}

impl AsyncRead for RepeatingFrames {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        while buf.remaining() > 0 {
            let chunk = &this.frame[this.pos..];
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
            this.pos = (this.pos + n) % this.frame.len();
        }
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    /// Serve these bytes, then end
    Bytes(Vec<u8>),
    /// Never ends
    Endless,
    /// Serve these bytes, then wait forever for more
    Stall(Vec<u8>),
    /// Opening fails
    Fail(String),
}

/// Stream provider answering each track id from a script
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, Script>>,
    writers: Mutex<Vec<DuplexStream>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, track_id: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(track_id.to_string(), script);
        self
    }
}

#[async_trait]
impl StreamProvider for ScriptedProvider {
    async fn open(
        &self,
        track: &TrackRef,
        _cancel: CancellationToken,
    ) -> Result<ByteStream, PlaybackError> {
        let script = self.scripts.lock().unwrap().get(&track.track_id).cloned();
        let fail = |reason: &str| PlaybackError::StreamOpenFailure {
            track: track.track_id.clone(),
            reason: reason.to_string(),
        };

        match script {
            Some(Script::Bytes(bytes)) => Ok(Box::new(io::Cursor::new(bytes))),
            Some(Script::Endless) => Ok(Box::new(RepeatingFrames::new())),
            Some(Script::Stall(bytes)) => {
                let (mut writer, reader) = tokio::io::duplex(bytes.len() + 1);
                writer
                    .write_all(&bytes)
                    .await
                    .map_err(|e| fail(&e.to_string()))?;
                // keep the writer open so the reader never sees EOF
                self.writers.lock().unwrap().push(writer);
                Ok(Box::new(reader))
            }
            Some(Script::Fail(reason)) => Err(fail(&reason)),
            None => Err(fail("unknown track")),
        }
    }
}

/// Fixed list of follow-up items, in order
pub struct ListNextItems(pub Vec<Arc<PlayableItem>>);

impl NextItemProvider for ListNextItems {
    fn next_after(&self, current: &PlayableItem) -> Option<Arc<PlayableItem>> {
        self.0
            .iter()
            .find(|item| item.sequence() > current.sequence() && !item.is_completed())
            .cloned()
    }
}

pub type EventLog = Arc<Mutex<Vec<PlaybackEvent>>>;

pub fn record_events(orchestrator: &PlaybackOrchestrator) -> EventLog {
    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    orchestrator.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    log
}

pub fn position_of(log: &EventLog, event: &PlaybackEvent) -> Option<usize> {
    log.lock().unwrap().iter().position(|e| e == event)
}

const WAIT_STEP: Duration = Duration::from_millis(5);
const WAIT_STEPS: usize = 1000;

pub async fn wait_fully_processed(orchestrator: &PlaybackOrchestrator) {
    for _ in 0..WAIT_STEPS {
        if orchestrator.is_fully_processed().await {
            return;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    panic!("stream was never fully processed");
}

pub async fn wait_buffered(orchestrator: &PlaybackOrchestrator, at_least: Duration) {
    for _ in 0..WAIT_STEPS {
        if orchestrator.buffered_duration().await >= at_least {
            return;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    panic!("buffer never reached {:?}", at_least);
}

pub async fn wait_state(orchestrator: &PlaybackOrchestrator, state: PlaybackState) {
    for _ in 0..WAIT_STEPS {
        if orchestrator.state() == state {
            return;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    panic!("never reached {:?}, stuck in {:?}", state, orchestrator.state());
}

pub async fn wait_event(log: &EventLog, event: &PlaybackEvent) {
    for _ in 0..WAIT_STEPS {
        if position_of(log, event).is_some() {
            return;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    panic!("event {:?} never arrived", event);
}
