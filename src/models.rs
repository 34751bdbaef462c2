use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Opaque identifiers of a track in the remote catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub track_id: String,
    pub release_id: Option<String>,
    pub title: Option<String>,
}

impl TrackRef {
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            release_id: None,
            title: None,
        }
    }

    pub fn with_release(mut self, release_id: impl Into<String>) -> Self {
        self.release_id = Some(release_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Get the display name for this track (title or track id)
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.track_id)
    }
}

/// An enqueued track. Shared between the queue and the orchestrator as
/// `Arc<PlayableItem>`; only the completion flag ever changes.
#[derive(Debug)]
pub struct PlayableItem {
    sequence: u64,
    track: TrackRef,
    completed: AtomicBool,
}

impl PlayableItem {
    pub fn new(sequence: u64, track: TrackRef) -> Self {
        Self {
            sequence,
            track,
            completed: AtomicBool::new(false),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn track(&self) -> &TrackRef {
        &self.track
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Mark the item completed. Returns `true` only for the call that
    /// actually flipped the flag.
    pub fn mark_completed(&self) -> bool {
        !self.completed.swap(true, Ordering::AcqRel)
    }

    /// Clear the completion flag so the item becomes playable again.
    pub fn reopen(&self) {
        self.completed.store(false, Ordering::Release);
    }
}

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Buffering,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Get a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Buffering => "Buffering",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Buffering => 1,
            PlaybackState::Playing => 2,
            PlaybackState::Paused => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Buffering,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }

    /// Whether a playback attempt is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who caused a state transition. Diagnostic only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Intent {
    User,
    Auto,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::User => "user",
            Intent::Auto => "auto",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format of a compressed stream, taken from its first frame header
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Bits per second
    pub bit_rate: u32,
    /// Bytes in one compressed frame, header included
    pub frame_length: usize,
}

impl AudioFormat {
    pub fn pcm(&self) -> PcmSpec {
        PcmSpec::new(self.sample_rate, self.channel_count)
    }

    /// Get a human-readable format description
    pub fn format_description(&self) -> String {
        format!(
            "{} kbps - {} Hz - {} channel{}",
            self.bit_rate / 1000,
            self.sample_rate,
            self.channel_count,
            if self.channel_count == 1 { "" } else { "s" }
        )
    }
}

/// Shape of interleaved PCM data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmSpec {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    pub fn samples_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize
    }

    pub fn samples_for(&self, duration: Duration) -> usize {
        let samples = (duration.as_secs_f64() * self.samples_per_second() as f64).round() as usize;
        // keep whole frames
        samples - samples % self.channels.max(1) as usize
    }

    pub fn duration_of(&self, samples: usize) -> Duration {
        let per_second = self.samples_per_second();
        if per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples as f64 / per_second as f64)
        }
    }
}

/// Point-in-time view of the player, for status displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub current_track: Option<TrackRef>,
    pub current_sequence: Option<u64>,
    pub volume: u8,
    pub buffered: Duration,
    pub fully_processed: bool,
}

impl PlaybackStatus {
    pub fn stopped(volume: u8) -> Self {
        Self {
            state: PlaybackState::Stopped,
            current_track: None,
            current_sequence: None,
            volume,
            buffered: Duration::ZERO,
            fully_processed: false,
        }
    }

    /// Format buffered audio as seconds with one decimal
    pub fn buffered_formatted(&self) -> String {
        format!("{:.1}s", self.buffered.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_ref_builders() {
        let track = TrackRef::new("trk-42").with_release("rel-7").with_title("Song");
        assert_eq!(track.track_id, "trk-42");
        assert_eq!(track.release_id.as_deref(), Some("rel-7"));
        assert_eq!(track.display_name(), "Song");

        let untitled = TrackRef::new("trk-43");
        assert_eq!(untitled.display_name(), "trk-43");
    }

    #[test]
    fn test_mark_completed_is_exactly_once() {
        let item = PlayableItem::new(1, TrackRef::new("a"));
        assert!(!item.is_completed());
        assert!(item.mark_completed());
        assert!(!item.mark_completed());
        assert!(item.is_completed());

        item.reopen();
        assert!(!item.is_completed());
    }

    #[test]
    fn test_playback_state_round_trips_through_u8() {
        for state in [
            PlaybackState::Stopped,
            PlaybackState::Buffering,
            PlaybackState::Playing,
            PlaybackState::Paused,
        ] {
            assert_eq!(PlaybackState::from_u8(state.to_u8()), state);
        }
        assert_eq!(PlaybackState::Buffering.to_string(), "Buffering");
        assert!(!PlaybackState::Stopped.is_active());
        assert!(PlaybackState::Paused.is_active());
    }

    #[test]
    fn test_pcm_spec_durations() {
        let spec = PcmSpec::new(44100, 2);
        assert_eq!(spec.samples_per_second(), 88200);
        assert_eq!(spec.samples_for(Duration::from_secs(1)), 88200);
        assert_eq!(spec.samples_for(Duration::from_millis(500)), 44100);
        assert!((spec.duration_of(44100).as_secs_f64() - 0.5).abs() < 1e-9);

        // odd sample counts round down to whole frames
        let mono_rate = PcmSpec::new(3, 2);
        assert_eq!(mono_rate.samples_for(Duration::from_millis(500)), 2);
    }

    #[test]
    fn test_audio_format_description() {
        let format = AudioFormat {
            sample_rate: 44100,
            channel_count: 2,
            bit_rate: 128_000,
            frame_length: 417,
        };
        assert_eq!(format.format_description(), "128 kbps - 44100 Hz - 2 channels");
        assert_eq!(format.pcm(), PcmSpec::new(44100, 2));
    }

    #[test]
    fn test_status_serialization() {
        let status = PlaybackStatus::stopped(80);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"Stopped\""));
        assert!(json.contains("\"volume\":80"));
        assert_eq!(status.buffered_formatted(), "0.0s");
    }
}
