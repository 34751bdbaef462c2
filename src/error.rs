use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Playback(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::Queue(err) => err.user_message(),
            PlayerError::Io(err) => format!("System error: {}", err),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlayerError::Playback(err) => err.recovery_suggestions(),
            PlayerError::Config(err) => err.recovery_suggestions(),
            PlayerError::Queue(err) => err.recovery_suggestions(),
            PlayerError::Io(_) => vec!["Try the operation again".to_string()],
        }
    }

    /// Check if this error allows playback to continue with another item
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Playback(err) => err.is_recoverable(),
            PlayerError::Config(err) => err.is_recoverable(),
            PlayerError::Queue(err) => err.is_recoverable(),
            PlayerError::Io(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Playback(PlaybackError::DecodeDesync { .. }) => ErrorSeverity::Info,
            PlayerError::Playback(PlaybackError::FrameDecode(_)) => ErrorSeverity::Info,
            PlayerError::Playback(PlaybackError::InvalidVolume { .. }) => ErrorSeverity::Warning,
            PlayerError::Playback(PlaybackError::DeviceFailure(_)) => ErrorSeverity::Critical,
            PlayerError::Playback(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::Queue(_) => ErrorSeverity::Info,
            PlayerError::Io(_) => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Errors raised by the streaming playback pipeline.
///
/// Cancellation is deliberately absent: a cancelled attempt ends quietly.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    #[error("Failed to open stream for track {track}: {reason}")]
    StreamOpenFailure { track: String, reason: String },

    #[error("Lost frame sync after scanning {scanned} bytes")]
    DecodeDesync { scanned: usize },

    #[error("Invalid volume: {volume} (expected 0-100)")]
    InvalidVolume { volume: i32 },

    #[error("Audio device failure: {0}")]
    DeviceFailure(String),

    #[error("Unsupported stream format: {0}")]
    UnsupportedFormat(String),

    #[error("Frame decode failed: {0}")]
    FrameDecode(String),
}

impl PlaybackError {
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::StreamOpenFailure { track, reason } => {
                format!("Could not start streaming '{}': {}", track, reason)
            }
            PlaybackError::DecodeDesync { .. } => {
                "The audio stream ended with unreadable data".to_string()
            }
            PlaybackError::InvalidVolume { volume } => {
                format!("Volume {} is out of range - use a value between 0 and 100", volume)
            }
            PlaybackError::DeviceFailure(msg) => {
                format!("Audio output failed: {}", msg)
            }
            PlaybackError::UnsupportedFormat(msg) => {
                format!("This stream cannot be played: {}", msg)
            }
            PlaybackError::FrameDecode(msg) => {
                format!("Part of the stream could not be decoded: {}", msg)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlaybackError::StreamOpenFailure { .. } => vec![
                "Check your network connection".to_string(),
                "Verify that you are still signed in".to_string(),
                "Skip to the next track with 'next'".to_string(),
            ],
            PlaybackError::DecodeDesync { .. } => vec![
                "The download may be incomplete - try playing the track again".to_string(),
            ],
            PlaybackError::InvalidVolume { .. } => vec![
                "Use 'vol <0-100>'".to_string(),
            ],
            PlaybackError::DeviceFailure(_) => vec![
                "Check that your audio device is connected and powered on".to_string(),
                "Select a different output device with --device".to_string(),
                "Close applications holding exclusive audio access".to_string(),
            ],
            PlaybackError::UnsupportedFormat(_) => vec![
                "Only MPEG audio streams (MP1/MP2/MP3) are supported".to_string(),
            ],
            PlaybackError::FrameDecode(_) => vec![
                "Playback continues with the next readable frame".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            PlaybackError::StreamOpenFailure { .. } => true, // next item may open
            PlaybackError::DecodeDesync { .. } => true,
            PlaybackError::InvalidVolume { .. } => true,
            PlaybackError::DeviceFailure(_) => false,
            PlaybackError::UnsupportedFormat(_) => true,
            PlaybackError::FrameDecode(_) => true,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::Invalid(msg) => {
                format!("Configuration values are inconsistent: {}", msg)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
                "Try creating the directory manually: ~/.config/streamplay/".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Configuration will use default values".to_string(),
            ],
            ConfigError::DeserializationError(_) => vec![
                "Delete the configuration file to reset to defaults".to_string(),
                "Check the configuration file format manually".to_string(),
            ],
            ConfigError::Invalid(_) => vec![
                "Watermarks must satisfy 0 < low < high < buffer capacity".to_string(),
                "Delete the configuration file to reset to defaults".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true // defaults are always available
    }
}

/// Queue navigation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is empty")]
    EmptyQueue,

    #[error("No further items in queue")]
    EndOfQueue,

    #[error("Already at the start of the queue")]
    StartOfQueue,
}

impl QueueError {
    pub fn user_message(&self) -> String {
        match self {
            QueueError::EmptyQueue => "No tracks in queue - add some first".to_string(),
            QueueError::EndOfQueue => "There is nothing left to play".to_string(),
            QueueError::StartOfQueue => "This is the first track in the queue".to_string(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            QueueError::EmptyQueue | QueueError::EndOfQueue => vec![
                "Use 'add <track>' to enqueue more tracks".to_string(),
            ],
            QueueError::StartOfQueue => vec![
                "Use 'next' to move forward".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true
    }
}
