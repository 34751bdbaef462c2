//! Playback orchestration.
//!
//! One [`PlaybackOrchestrator`] owns the playback state machine. Each call to
//! `play` starts a fresh attempt: a stream is opened, the first frame picks
//! the decoder and output format, and a background task feeds the
//! playback buffer. A periodic supervisory tick moves between Buffering and
//! Playing based on how much audio is buffered and detects the natural end
//! of a track.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::audio::demuxer::{Demuxed, EndOfStream, Frame, FrameDemuxer};
use crate::audio::reader::FrameReader;
use crate::audio::resampler::PcmAdapter;
use crate::audio::{
    AudioOutputDevice, DecoderFactory, FrameDecoder, OutputDeviceFactory, PlaybackBuffer,
    VolumeControl, SCRATCH_SAMPLES,
};
use crate::config::{EngineSettings, Watermarks};
use crate::error::PlaybackError;
use crate::logging::OperationTimer;
use crate::models::{Intent, PcmSpec, PlayableItem, PlaybackState, PlaybackStatus};
use crate::queue::NextItemProvider;
use crate::stream::StreamProvider;

const SLOW_OPEN_THRESHOLD: Duration = Duration::from_secs(2);

/// Notifications published by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    StateChanged {
        state: PlaybackState,
        intent: Intent,
        sequence: Option<u64>,
    },
    SessionStarted {
        sequence: u64,
    },
    /// The decode task of an attempt has been joined and its device released
    SessionDisposed {
        sequence: u64,
    },
    TrackCompleted {
        sequence: u64,
    },
    PlaybackFailed {
        sequence: u64,
        message: String,
    },
}

impl PlaybackEvent {
    pub fn sequence(&self) -> Option<u64> {
        match self {
            PlaybackEvent::StateChanged { sequence, .. } => *sequence,
            PlaybackEvent::SessionStarted { sequence }
            | PlaybackEvent::SessionDisposed { sequence }
            | PlaybackEvent::TrackCompleted { sequence }
            | PlaybackEvent::PlaybackFailed { sequence, .. } => Some(*sequence),
        }
    }
}

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&PlaybackEvent) + Send + Sync>;

/// Buffer fill level as seen by one supervisory pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub buffered: Duration,
    pub fully_processed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    StartPlaying,
    Rebuffer,
    Complete,
}

/// Decide the automatic transition for the current state, if any.
///
/// A fully processed stream is promoted to Playing even below the high
/// watermark so that short tracks and tails still play out.
pub fn supervise(
    state: PlaybackState,
    snapshot: BufferSnapshot,
    watermarks: Watermarks,
) -> Option<Decision> {
    let drained = snapshot.buffered.is_zero();
    match state {
        PlaybackState::Buffering | PlaybackState::Playing if snapshot.fully_processed && drained => {
            Some(Decision::Complete)
        }
        PlaybackState::Buffering
            if snapshot.buffered > watermarks.high || snapshot.fully_processed =>
        {
            Some(Decision::StartPlaying)
        }
        PlaybackState::Playing
            if !snapshot.fully_processed && snapshot.buffered < watermarks.low =>
        {
            Some(Decision::Rebuffer)
        }
        _ => None,
    }
}

struct Attempt {
    generation: u64,
    token: CancellationToken,
}

/// Everything belonging to one playback attempt
struct Session {
    item: Arc<PlayableItem>,
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
    fully_processed: Arc<AtomicBool>,
    buffer: Arc<PlaybackBuffer>,
    device: Box<dyn AudioOutputDevice>,
}

impl Session {
    fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            buffered: self.buffer.buffered_duration(),
            fully_processed: self.fully_processed.load(Ordering::Acquire),
        }
    }
}

struct Inner {
    state: PlaybackState,
    current: Option<Arc<PlayableItem>>,
    session: Option<Session>,
}

struct Shared {
    settings: EngineSettings,
    streams: Arc<dyn StreamProvider>,
    decoders: Arc<dyn DecoderFactory>,
    outputs: Arc<dyn OutputDeviceFactory>,
    next_items: Option<Arc<dyn NextItemProvider>>,
    volume: VolumeControl,
    state: AtomicU8,
    attempt: StdMutex<Attempt>,
    inner: Mutex<Inner>,
    listeners: StdMutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
}

/// Streaming playback engine with a watermark-driven state machine.
///
/// Must be created inside a tokio runtime; the supervisory ticker and the
/// decode tasks are spawned on it.
pub struct PlaybackOrchestrator {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

impl PlaybackOrchestrator {
    pub fn new(
        settings: EngineSettings,
        streams: Arc<dyn StreamProvider>,
        decoders: Arc<dyn DecoderFactory>,
        outputs: Arc<dyn OutputDeviceFactory>,
        next_items: Option<Arc<dyn NextItemProvider>>,
    ) -> Self {
        let volume = VolumeControl::new(settings.initial_volume);
        let tick_interval = settings.tick_interval.max(Duration::from_millis(1));

        let shared = Arc::new(Shared {
            settings,
            streams,
            decoders,
            outputs,
            next_items,
            volume,
            state: AtomicU8::new(PlaybackState::Stopped.to_u8()),
            attempt: StdMutex::new(Attempt {
                generation: 0,
                token: CancellationToken::new(),
            }),
            inner: Mutex::new(Inner {
                state: PlaybackState::Stopped,
                current: None,
                session: None,
            }),
            listeners: StdMutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        });

        let shutdown = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(Arc::downgrade(&shared), tick_interval, shutdown.clone()));

        Self {
            shared,
            shutdown,
            ticker: StdMutex::new(Some(ticker)),
        }
    }

    /// Stop whatever is playing and start `item`.
    ///
    /// Open, decoder and device failures are returned after the
    /// orchestrator has gone back to Stopped. A call that gets superseded
    /// by a later `play`/`stop` returns `Ok`.
    pub async fn play(&self, item: Arc<PlayableItem>, intent: Intent) -> Result<(), PlaybackError> {
        let (generation, token) = self.shared.begin_attempt();
        let mut guard = self.shared.inner.lock().await;
        self.shared.play_locked(&mut guard, item, intent, generation, token).await
    }

    /// Like `play`, but the current item counts as finished.
    pub async fn skip_to(&self, item: Arc<PlayableItem>) -> Result<(), PlaybackError> {
        let (generation, token) = self.shared.begin_attempt();
        let mut guard = self.shared.inner.lock().await;
        if token.is_cancelled() {
            return Ok(());
        }
        if let Some(current) = guard.current.as_ref() {
            if current.mark_completed() {
                debug!("Skipped past item {}", current.sequence());
            }
        }
        self.shared.play_locked(&mut guard, item, Intent::User, generation, token).await
    }

    pub async fn pause(&self) -> Result<(), PlaybackError> {
        self.shared.pause().await
    }

    pub async fn resume(&self) -> Result<(), PlaybackError> {
        self.shared.resume().await
    }

    /// Stop playback. Calling it again, or while stopped, does nothing.
    pub async fn stop(&self) {
        self.shared.stop().await
    }

    /// Run one supervisory pass. The ticker calls this on every interval.
    pub async fn tick(&self) {
        self.shared.tick().await
    }

    pub fn set_volume(&self, volume: i32) -> Result<(), PlaybackError> {
        self.shared.volume.set(volume)?;
        debug!("Volume set to {}", volume);
        Ok(())
    }

    pub fn volume(&self) -> u8 {
        self.shared.volume.get()
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    pub async fn current_item(&self) -> Option<Arc<PlayableItem>> {
        self.shared.inner.lock().await.current.clone()
    }

    pub async fn buffered_duration(&self) -> Duration {
        let inner = self.shared.inner.lock().await;
        inner
            .session
            .as_ref()
            .map(|s| s.buffer.buffered_duration())
            .unwrap_or_default()
    }

    pub async fn is_fully_processed(&self) -> bool {
        let inner = self.shared.inner.lock().await;
        inner
            .session
            .as_ref()
            .map(|s| s.fully_processed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub async fn status(&self) -> PlaybackStatus {
        let inner = self.shared.inner.lock().await;
        let snapshot = inner.session.as_ref().map(Session::snapshot);
        PlaybackStatus {
            state: inner.state,
            current_track: inner.current.as_ref().map(|item| item.track().clone()),
            current_sequence: inner.current.as_ref().map(|item| item.sequence()),
            volume: self.volume(),
            buffered: snapshot.map(|s| s.buffered).unwrap_or_default(),
            fully_processed: snapshot.map(|s| s.fully_processed).unwrap_or(false),
        }
    }

    /// Register an event listener. Listeners run synchronously on the task
    /// that made the change and must not block.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PlaybackEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn on_state_changed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(PlaybackState, Intent) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::StateChanged { state, intent, .. } = event {
                callback(*state, *intent);
            }
        })
    }

    /// Stop playback and end the supervisory ticker.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shutdown.cancel();
        let ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(ticker) = ticker {
            let _ = ticker.await;
        }
        debug!("Playback orchestrator shut down");
    }
}

impl Drop for PlaybackOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.shared
            .attempt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .token
            .cancel();
    }
}

async fn run_ticker(shared: Weak<Shared>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match shared.upgrade() {
            Some(shared) => shared.tick().await,
            None => break,
        }
    }
    trace!("Supervisory ticker stopped");
}

impl Shared {
    /// Cancel the attempt in flight and hand out a fresh token for a new one
    fn begin_attempt(&self) -> (u64, CancellationToken) {
        let mut attempt = self.attempt.lock().unwrap_or_else(|e| e.into_inner());
        attempt.token.cancel();
        attempt.generation += 1;
        attempt.token = CancellationToken::new();
        (attempt.generation, attempt.token.clone())
    }

    /// Start a follow-up attempt unless someone else started one since
    /// `generation`.
    fn continue_attempt(&self, generation: u64) -> Option<(u64, CancellationToken)> {
        let mut attempt = self.attempt.lock().unwrap_or_else(|e| e.into_inner());
        if attempt.generation != generation {
            return None;
        }
        attempt.generation += 1;
        attempt.token = CancellationToken::new();
        Some((attempt.generation, attempt.token.clone()))
    }

    fn emit(&self, event: PlaybackEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn transition(&self, inner: &mut Inner, state: PlaybackState, intent: Intent) {
        if inner.state == state {
            return;
        }
        let sequence = inner.current.as_ref().map(|item| item.sequence());
        info!("{} -> {} ({}, item {:?})", inner.state, state, intent, sequence);
        inner.state = state;
        self.state.store(state.to_u8(), Ordering::Release);
        self.emit(PlaybackEvent::StateChanged {
            state,
            intent,
            sequence,
        });
    }

    async fn play_locked(
        &self,
        inner: &mut Inner,
        item: Arc<PlayableItem>,
        intent: Intent,
        generation: u64,
        token: CancellationToken,
    ) -> Result<(), PlaybackError> {
        if token.is_cancelled() {
            debug!("Play of item {} superseded", item.sequence());
            return Ok(());
        }

        self.end_session(inner, intent).await;
        inner.current = Some(Arc::clone(&item));
        self.transition(inner, PlaybackState::Buffering, intent);

        match self.start_session(&item, generation, token.clone()).await {
            Ok(session) => {
                inner.session = Some(session);
                self.emit(PlaybackEvent::SessionStarted {
                    sequence: item.sequence(),
                });
                Ok(())
            }
            Err(_) if token.is_cancelled() => {
                debug!("Opening item {} cancelled", item.sequence());
                self.transition(inner, PlaybackState::Stopped, intent);
                inner.current = None;
                Ok(())
            }
            Err(e) => {
                self.fail(inner, e.clone()).await;
                Err(e)
            }
        }
    }

    async fn start_session(
        &self,
        item: &Arc<PlayableItem>,
        generation: u64,
        token: CancellationToken,
    ) -> Result<Session, PlaybackError> {
        let track = item.track();
        let timer = OperationTimer::new(format!("open stream {}", track.track_id));
        let stream = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(PlaybackError::StreamOpenFailure {
                    track: track.track_id.clone(),
                    reason: "cancelled".to_string(),
                });
            }
            result = self.streams.open(track, token.clone()) => result?,
        };
        timer.finish_with_threshold(SLOW_OPEN_THRESHOLD);

        let reader = FrameReader::new(stream, self.settings.read_ahead_bytes, token.clone());
        let mut demuxer = FrameDemuxer::new(reader, self.settings.max_resync_bytes);
        let first = match demuxer.next_frame().await {
            Demuxed::Frame(frame) => frame,
            Demuxed::EndOfStream(reason) => {
                return Err(PlaybackError::UnsupportedFormat(format!(
                    "no MPEG audio frame found ({:?})",
                    reason
                )));
            }
        };

        let decoder = self.decoders.create(&first)?;
        let format = *decoder.format();
        info!("Streaming '{}' [{}]", track.display_name(), format.format_description());

        let (device, buffer, spec) = self.open_output(format.pcm()).await?;

        let fully_processed = Arc::new(AtomicBool::new(false));
        let decode = DecodeLoop {
            sequence: item.sequence(),
            demuxer,
            decoder,
            adapter: PcmAdapter::new(format.pcm(), spec),
            buffer: Arc::clone(&buffer),
            fully_processed: Arc::clone(&fully_processed),
            token: token.clone(),
            pending: Some(first),
            scratch: vec![0.0; SCRATCH_SAMPLES],
            margin: self.settings.fill_margin(),
            pause: self.settings.flow_control_sleep,
        };
        let task = tokio::spawn(decode.run());

        Ok(Session {
            item: Arc::clone(item),
            generation,
            token,
            task,
            fully_processed,
            buffer,
            device,
        })
    }

    /// Create and start an output device for `native` PCM. Device setup
    /// waits on the output thread, so it runs on the blocking pool.
    async fn open_output(
        &self,
        native: PcmSpec,
    ) -> Result<(Box<dyn AudioOutputDevice>, Arc<PlaybackBuffer>, PcmSpec), PlaybackError> {
        let outputs = Arc::clone(&self.outputs);
        let capacity = self.settings.buffer_capacity;
        let volume = self.volume.clone();

        tokio::task::spawn_blocking(move || -> Result<_, PlaybackError> {
            let mut device = outputs.create()?;
            let spec = device.negotiate(native)?;
            let buffer = Arc::new(PlaybackBuffer::new(spec, capacity, volume));
            if let Err(e) = device.init(spec, Arc::clone(&buffer)) {
                device.stop();
                return Err(e);
            }
            Ok((device, buffer, spec))
        })
        .await
        .map_err(|e| PlaybackError::DeviceFailure(format!("Output setup task failed: {}", e)))?
    }

    /// Cancel the decode task, release the device and wait for the task
    /// to finish. Nothing belonging to the session survives this call.
    async fn dispose(&self, session: Session) {
        let Session {
            item,
            token,
            task,
            mut device,
            ..
        } = session;

        token.cancel();
        let released = tokio::task::spawn_blocking(move || device.stop()).await;
        if released.is_err() {
            error!("Releasing the output device for item {} panicked", item.sequence());
        }
        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Decode task for item {} panicked", item.sequence());
            }
        }
        debug!("Disposed session for item {}", item.sequence());
        self.emit(PlaybackEvent::SessionDisposed {
            sequence: item.sequence(),
        });
    }

    async fn end_session(&self, inner: &mut Inner, intent: Intent) {
        if let Some(session) = inner.session.take() {
            self.dispose(session).await;
        }
        self.transition(inner, PlaybackState::Stopped, intent);
        inner.current = None;
    }

    async fn fail(&self, inner: &mut Inner, error: PlaybackError) {
        let sequence = inner.current.as_ref().map(|item| item.sequence());
        error!("Playback of item {:?} failed: {}", sequence, error);

        if let Some(session) = inner.session.take() {
            self.dispose(session).await;
        }
        self.transition(inner, PlaybackState::Stopped, Intent::Auto);
        inner.current = None;

        if let Some(sequence) = sequence {
            self.emit(PlaybackEvent::PlaybackFailed {
                sequence,
                message: error.to_string(),
            });
        }
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if !matches!(inner.state, PlaybackState::Buffering | PlaybackState::Playing) {
            return Ok(());
        }

        if let Some(session) = inner.session.as_mut() {
            if let Err(e) = session.device.pause() {
                self.fail(inner, e.clone()).await;
                return Err(e);
            }
        }
        self.transition(inner, PlaybackState::Paused, Intent::User);
        Ok(())
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.state != PlaybackState::Paused {
            return Ok(());
        }
        let Some(session) = inner.session.as_mut() else {
            return Ok(());
        };

        let snapshot = session.snapshot();
        if !snapshot.fully_processed && snapshot.buffered < self.settings.watermarks.low {
            self.transition(inner, PlaybackState::Buffering, Intent::User);
            return Ok(());
        }

        if let Err(e) = session.device.play() {
            self.fail(inner, e.clone()).await;
            return Err(e);
        }
        self.transition(inner, PlaybackState::Playing, Intent::User);
        Ok(())
    }

    async fn stop(&self) {
        self.begin_attempt();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.state == PlaybackState::Stopped && inner.session.is_none() {
            return;
        }
        self.end_session(inner, Intent::User).await;
    }

    async fn tick(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(session) = inner.session.as_mut() else {
            return;
        };

        if let Some(fault) = session.device.take_fault() {
            self.fail(inner, fault).await;
            return;
        }

        let snapshot = session.snapshot();
        let Some(decision) = supervise(inner.state, snapshot, self.settings.watermarks) else {
            return;
        };

        match decision {
            Decision::StartPlaying => {
                if let Err(e) = session.device.play() {
                    self.fail(inner, e).await;
                    return;
                }
                debug!("Buffered {:.2}s, starting output", snapshot.buffered.as_secs_f64());
                self.transition(inner, PlaybackState::Playing, Intent::Auto);
            }
            Decision::Rebuffer => {
                if let Err(e) = session.device.pause() {
                    self.fail(inner, e).await;
                    return;
                }
                warn!("Buffer low ({:.2}s), rebuffering", snapshot.buffered.as_secs_f64());
                self.transition(inner, PlaybackState::Buffering, Intent::Auto);
            }
            Decision::Complete => self.complete(inner).await,
        }
    }

    /// Natural end of the current track: tear it down and move on to the
    /// next unplayed item, if there is one.
    async fn complete(&self, inner: &mut Inner) {
        let Some(session) = inner.session.take() else {
            return;
        };
        let item = Arc::clone(&session.item);
        let generation = session.generation;

        item.mark_completed();
        self.dispose(session).await;
        self.transition(inner, PlaybackState::Stopped, Intent::Auto);
        inner.current = None;
        info!("Finished '{}'", item.track().display_name());
        self.emit(PlaybackEvent::TrackCompleted {
            sequence: item.sequence(),
        });

        let next = self
            .next_items
            .as_ref()
            .and_then(|provider| provider.next_after(&item));
        let Some(next) = next else {
            info!("Nothing left to play");
            return;
        };
        let Some((generation, token)) = self.continue_attempt(generation) else {
            return;
        };

        if let Err(e) = self.play_locked(inner, next, Intent::Auto, generation, token).await {
            warn!("Auto-advance failed: {}", e);
        }
    }
}

/// Fetch -> demux -> decode -> buffer pipeline of one attempt
struct DecodeLoop {
    sequence: u64,
    demuxer: FrameDemuxer,
    decoder: Box<dyn FrameDecoder>,
    adapter: PcmAdapter,
    buffer: Arc<PlaybackBuffer>,
    fully_processed: Arc<AtomicBool>,
    token: CancellationToken,
    /// First frame, already consumed while creating the decoder
    pending: Option<Frame>,
    scratch: Vec<f32>,
    margin: Duration,
    pause: Duration,
}

impl DecodeLoop {
    async fn run(mut self) {
        let mut skipped = 0u64;

        loop {
            if self.token.is_cancelled() {
                break;
            }

            if self.buffer.is_nearly_full(self.margin) {
                trace!("Buffer nearly full, decode paused");
                if !pause_for(&self.token, self.pause).await {
                    break;
                }
                continue;
            }

            let frame = match self.pending.take() {
                Some(frame) => frame,
                None => match self.demuxer.next_frame().await {
                    Demuxed::Frame(frame) => frame,
                    Demuxed::EndOfStream(reason) => {
                        if !self.token.is_cancelled() {
                            self.finish(reason);
                        }
                        break;
                    }
                },
            };

            let written = match self.decoder.decompress(&frame, &mut self.scratch) {
                Ok(written) => written,
                Err(e) => {
                    skipped += 1;
                    debug!("Skipping frame {}: {}", self.demuxer.frames(), e);
                    continue;
                }
            };

            let pcm = self.adapter.process(&self.scratch[..written]);
            if !write_all(&self.buffer, pcm, &self.token, self.pause).await {
                break;
            }
        }

        if skipped > 0 {
            debug!("Item {}: {} undecodable frames skipped", self.sequence, skipped);
        }
    }

    fn finish(&self, reason: EndOfStream) {
        match reason {
            EndOfStream::Exhausted => {}
            EndOfStream::Truncated { missing } => {
                debug!("Item {}: final frame truncated ({} bytes missing)", self.sequence, missing);
            }
            EndOfStream::Desync { scanned } => {
                debug!("Item {}: {}", self.sequence, PlaybackError::DecodeDesync { scanned });
            }
            EndOfStream::ReadFailed(message) => {
                warn!("Item {}: stream read failed, ending track: {}", self.sequence, message);
            }
        }
        info!(
            "Item {} fully processed ({} frames, {} bytes)",
            self.sequence,
            self.demuxer.frames(),
            self.demuxer.bytes_read()
        );
        self.fully_processed.store(true, Ordering::Release);
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause_for(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn write_all(
    buffer: &PlaybackBuffer,
    mut data: &[f32],
    token: &CancellationToken,
    pause: Duration,
) -> bool {
    loop {
        let written = buffer.write(data);
        data = &data[written..];
        if data.is_empty() {
            return true;
        }
        if !pause_for(token, pause).await {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(secs: f64, fully_processed: bool) -> BufferSnapshot {
        BufferSnapshot {
            buffered: Duration::from_secs_f64(secs),
            fully_processed,
        }
    }

    fn apply(state: PlaybackState, decision: Option<Decision>) -> PlaybackState {
        match decision {
            Some(Decision::StartPlaying) => PlaybackState::Playing,
            Some(Decision::Rebuffer) => PlaybackState::Buffering,
            Some(Decision::Complete) => PlaybackState::Stopped,
            None => state,
        }
    }

    #[test]
    fn test_watermark_sequence() {
        let watermarks = Watermarks::default();
        let mut state = PlaybackState::Buffering;
        let mut seen = Vec::new();

        for secs in [0.2, 0.6, 4.5, 0.1] {
            state = apply(state, supervise(state, snapshot(secs, false), watermarks));
            seen.push(state);
        }

        assert_eq!(
            seen,
            vec![
                PlaybackState::Buffering,
                PlaybackState::Buffering,
                PlaybackState::Playing,
                PlaybackState::Buffering,
            ]
        );
    }

    #[test]
    fn test_exactly_at_watermarks_holds_state() {
        let watermarks = Watermarks::default();
        assert_eq!(
            supervise(PlaybackState::Buffering, snapshot(4.0, false), watermarks),
            None
        );
        assert_eq!(
            supervise(PlaybackState::Playing, snapshot(0.5, false), watermarks),
            None
        );
    }

    #[test]
    fn test_fully_processed_stream() {
        let watermarks = Watermarks::default();

        // short stream plays out even below the high watermark
        assert_eq!(
            supervise(PlaybackState::Buffering, snapshot(1.0, true), watermarks),
            Some(Decision::StartPlaying)
        );
        // tail below the low watermark is not rebuffered
        assert_eq!(
            supervise(PlaybackState::Playing, snapshot(0.1, true), watermarks),
            None
        );
        assert_eq!(
            supervise(PlaybackState::Playing, snapshot(0.0, true), watermarks),
            Some(Decision::Complete)
        );
        assert_eq!(
            supervise(PlaybackState::Buffering, snapshot(0.0, true), watermarks),
            Some(Decision::Complete)
        );
    }

    #[test]
    fn test_paused_and_stopped_are_left_alone() {
        let watermarks = Watermarks::default();
        for state in [PlaybackState::Paused, PlaybackState::Stopped] {
            assert_eq!(supervise(state, snapshot(0.0, true), watermarks), None);
            assert_eq!(supervise(state, snapshot(10.0, false), watermarks), None);
        }
    }

    #[test]
    fn test_event_sequence_accessor() {
        let event = PlaybackEvent::StateChanged {
            state: PlaybackState::Stopped,
            intent: Intent::User,
            sequence: None,
        };
        assert_eq!(event.sequence(), None);
        assert_eq!(PlaybackEvent::TrackCompleted { sequence: 4 }.sequence(), Some(4));
    }
}
