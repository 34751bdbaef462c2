use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::audio::PlaybackEvent;
use crate::models::PlaybackState;

const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Initialize logging with the level from `STREAMPLAY_LOG_LEVEL`
/// (default `info`).
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let level = std::env::var("STREAMPLAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_with_level(&level)
}

pub fn init_with_level(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = env_logger::Builder::new();

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder.filter_level(parse_level(level));
    builder.try_init()?;

    info!("Logging initialized with level: {}", level);
    Ok(())
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// One recorded playback event
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub event: PlaybackEvent,
}

/// Bounded in-memory history of playback events.
///
/// Cloning shares the same history, so one handle can be registered as an
/// orchestrator listener while another is queried.
#[derive(Clone)]
pub struct EventJournal {
    entries: Arc<Mutex<VecDeque<JournalEntry>>>,
    max_entries: usize,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_entries: max_entries.max(1),
        }
    }

    /// Log an event and keep it in the history
    pub fn record(&self, event: &PlaybackEvent) {
        log_event(event);

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(JournalEntry {
            timestamp: Utc::now(),
            event: event.clone(),
        });
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// The last `count` entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<JournalEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("Event journal cleared");
    }

    pub fn statistics(&self) -> JournalStatistics {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = JournalStatistics {
            total_events: entries.len(),
            ..JournalStatistics::default()
        };

        for entry in entries.iter() {
            match entry.event {
                PlaybackEvent::StateChanged { .. } => stats.transitions += 1,
                PlaybackEvent::PlaybackFailed { .. } => stats.failures += 1,
                PlaybackEvent::TrackCompleted { .. } => stats.completed += 1,
                PlaybackEvent::SessionDisposed { .. } => stats.disposed += 1,
                PlaybackEvent::SessionStarted { .. } => stats.started += 1,
            }
        }
        stats
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new()
    }
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::StateChanged {
            state: PlaybackState::Buffering,
            intent,
            sequence,
        } => debug!("Buffering item {:?} ({})", sequence, intent),
        PlaybackEvent::StateChanged { .. } => trace!("{:?}", event),
        PlaybackEvent::SessionStarted { sequence } => debug!("Session started for item {}", sequence),
        PlaybackEvent::SessionDisposed { sequence } => trace!("Session disposed for item {}", sequence),
        PlaybackEvent::TrackCompleted { sequence } => info!("Item {} completed", sequence),
        PlaybackEvent::PlaybackFailed { sequence, message } => {
            error!("Item {} failed: {}", sequence, message)
        }
    }
}

/// Counts of journalled events by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalStatistics {
    pub total_events: usize,
    pub transitions: usize,
    pub started: usize,
    pub failures: usize,
    pub completed: usize,
    pub disposed: usize,
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: String) -> Self {
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.elapsed();
        trace!("Completed '{}' in {}ms", self.operation_name, duration.as_millis());
        duration
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "'{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            debug!("Completed '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}
