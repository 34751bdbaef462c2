//! High-level player wiring the queue, the orchestrator and the event
//! journal together.

use std::sync::{Arc, Mutex, Weak};

use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{
    DecoderFactory, OutputDeviceFactory, PlaybackEvent, PlaybackOrchestrator,
    SymphoniaDecoderFactory,
};
use crate::config::{EngineSettings, PlayerConfig};
use crate::error::PlayerError;
use crate::logging::EventJournal;
use crate::models::{Intent, PlayableItem, PlaybackState, PlaybackStatus, TrackRef};
use crate::queue::{NextItemProvider, PlaybackQueue};
use crate::stream::{FileStreamProvider, StreamProvider};

/// What to do when an item cannot be played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stay stopped and let the user decide
    Stop,
    /// Mark the failed item completed and move on to the next one
    SkipToNext,
}

impl FailurePolicy {
    pub fn from_config(config: &PlayerConfig) -> Self {
        if config.advance_on_failure {
            FailurePolicy::SkipToNext
        } else {
            FailurePolicy::Stop
        }
    }
}

pub struct Player {
    orchestrator: Arc<PlaybackOrchestrator>,
    queue: Arc<Mutex<PlaybackQueue>>,
    journal: EventJournal,
    policy: FailurePolicy,
    failure_task: Option<JoinHandle<()>>,
}

impl Player {
    /// Must be called inside a tokio runtime.
    pub fn new(
        settings: EngineSettings,
        policy: FailurePolicy,
        streams: Arc<dyn StreamProvider>,
        decoders: Arc<dyn DecoderFactory>,
        outputs: Arc<dyn OutputDeviceFactory>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(PlaybackQueue::new()));
        let next_items: Arc<dyn NextItemProvider> = queue.clone();
        let orchestrator = Arc::new(PlaybackOrchestrator::new(
            settings,
            streams,
            decoders,
            outputs,
            Some(next_items),
        ));

        let journal = EventJournal::new();
        let recorder = journal.clone();
        orchestrator.subscribe(move |event| recorder.record(event));

        let failure_task = match policy {
            FailurePolicy::Stop => None,
            FailurePolicy::SkipToNext => {
                let (failed_tx, failed_rx) = mpsc::unbounded_channel();
                orchestrator.subscribe(move |event| {
                    if let PlaybackEvent::PlaybackFailed { sequence, .. } = event {
                        let _ = failed_tx.send(*sequence);
                    }
                });
                Some(tokio::spawn(skip_failed_items(
                    Arc::downgrade(&orchestrator),
                    Arc::clone(&queue),
                    failed_rx,
                )))
            }
        };

        Self {
            orchestrator,
            queue,
            journal,
            policy,
            failure_task,
        }
    }

    /// Player streaming from `config.library_root` through the symphonia
    /// decoders.
    pub fn from_config(
        config: &PlayerConfig,
        outputs: Arc<dyn OutputDeviceFactory>,
    ) -> Result<Self, PlayerError> {
        let settings = EngineSettings::from_config(config)?;
        Ok(Self::new(
            settings,
            FailurePolicy::from_config(config),
            Arc::new(FileStreamProvider::new(config.library_root.clone())),
            Arc::new(SymphoniaDecoderFactory),
            outputs,
        ))
    }

    /// Append a track. Starts playing it right away when nothing is playing.
    pub async fn enqueue(&self, track: TrackRef) -> Result<u64, PlayerError> {
        let sequence = self.lock_queue().enqueue(track);
        self.autoplay(sequence).await?;
        Ok(sequence)
    }

    pub async fn enqueue_many(&self, tracks: Vec<TrackRef>) -> Result<Vec<u64>, PlayerError> {
        let sequences = self.lock_queue().enqueue_many(tracks);
        if let Some(&first) = sequences.first() {
            self.autoplay(first).await?;
        }
        Ok(sequences)
    }

    async fn autoplay(&self, sequence: u64) -> Result<(), PlayerError> {
        if self.orchestrator.state() != PlaybackState::Stopped {
            return Ok(());
        }
        let item = self.lock_queue().get(sequence);
        if let Some(item) = item {
            self.orchestrator.play(item, Intent::User).await?;
        }
        Ok(())
    }

    /// Skip forward. The item being left counts as finished.
    pub async fn next(&self) -> Result<(), PlayerError> {
        let current = self.orchestrator.current_item().await;
        let target = self.lock_queue().next(current.as_deref())?;
        info!("Skipping to '{}'", target.track().display_name());
        self.orchestrator.skip_to(target).await?;
        Ok(())
    }

    /// Go back one item and continue forward playback from there
    pub async fn previous(&self) -> Result<(), PlayerError> {
        let current = self.orchestrator.current_item().await;
        let target = self.lock_queue().previous(current.as_deref())?;
        info!("Back to '{}'", target.track().display_name());
        self.orchestrator.play(target, Intent::User).await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        Ok(self.orchestrator.pause().await?)
    }

    pub async fn resume(&self) -> Result<(), PlayerError> {
        Ok(self.orchestrator.resume().await?)
    }

    pub async fn stop(&self) {
        self.orchestrator.stop().await
    }

    pub fn set_volume(&self, volume: i32) -> Result<(), PlayerError> {
        Ok(self.orchestrator.set_volume(volume)?)
    }

    pub fn volume(&self) -> u8 {
        self.orchestrator.volume()
    }

    pub fn state(&self) -> PlaybackState {
        self.orchestrator.state()
    }

    pub async fn status(&self) -> PlaybackStatus {
        self.orchestrator.status().await
    }

    pub fn queue_items(&self) -> Vec<Arc<PlayableItem>> {
        self.lock_queue().items()
    }

    pub fn watch_queue(&self) -> watch::Receiver<Vec<Arc<PlayableItem>>> {
        self.lock_queue().subscribe()
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn orchestrator(&self) -> &PlaybackOrchestrator {
        &self.orchestrator
    }

    pub async fn shutdown(&mut self) {
        if let Some(task) = self.failure_task.take() {
            task.abort();
        }
        self.orchestrator.shutdown().await;
        info!("Player shut down");
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, PlaybackQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(task) = self.failure_task.take() {
            task.abort();
        }
    }
}

/// Moves past items that failed to play, one failure event at a time. A
/// failing follow-up item produces another event, so this keeps going
/// until something plays or the queue runs out.
async fn skip_failed_items(
    orchestrator: Weak<PlaybackOrchestrator>,
    queue: Arc<Mutex<PlaybackQueue>>,
    mut failed: mpsc::UnboundedReceiver<u64>,
) {
    while let Some(sequence) = failed.recv().await {
        let next = {
            let queue = queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.get(sequence).and_then(|item| {
                item.mark_completed();
                queue.next_after(Some(item.as_ref()))
            })
        };
        let Some(next) = next else {
            continue;
        };
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        // the user may have started something else in the meantime
        if orchestrator.state() != PlaybackState::Stopped {
            continue;
        }

        warn!("Item {} failed, moving on to item {}", sequence, next.sequence());
        if let Err(e) = orchestrator.play(next, Intent::Auto).await {
            warn!("Follow-up item failed too: {}", e);
        }
    }
}
