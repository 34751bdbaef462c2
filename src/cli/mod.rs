use crate::models::{PlayableItem, PlaybackStatus, TrackRef};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Streaming audio player
#[derive(Debug, Parser)]
#[command(name = "streamplay")]
#[command(about = "Streams MPEG audio through a buffered, watermark-driven playback engine")]
#[command(version)]
pub struct Cli {
    /// Tracks to enqueue: paths relative to the library root, or absolute
    pub tracks: Vec<String>,

    /// Configuration file (default: ~/.config/streamplay/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output device name
    #[arg(long)]
    pub device: Option<String>,

    /// Initial volume (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn tracks(&self) -> Vec<TrackRef> {
        self.tracks.iter().map(|t| track_from_arg(t)).collect()
    }
}

/// Interactive console commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
    Next,
    Prev,
    Volume(u8),
    Status,
    Queue,
    Add(TrackRef),
    Help,
    Quit,
}

/// Expand tilde (~) in a track argument and build its reference
pub fn track_from_arg(arg: &str) -> TrackRef {
    let expanded = if let Some(rest) = arg.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest).to_string_lossy().into_owned())
            .unwrap_or_else(|| arg.to_string())
    } else {
        arg.to_string()
    };
    let title = std::path::Path::new(&expanded)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned());

    let track = TrackRef::new(expanded);
    match title {
        Some(title) => track.with_title(title),
        None => track,
    }
}

/// Parse one line of console input
pub fn parse_command(input: &str) -> Result<Command, ParseError> {
    let mut args = input.split_whitespace();
    let Some(name) = args.next() else {
        return Err(ParseError::EmptyCommand);
    };
    let rest: Vec<&str> = args.collect();

    match name.to_lowercase().as_str() {
        "pause" => Ok(Command::Pause),
        "resume" | "play" => Ok(Command::Resume),
        "stop" => Ok(Command::Stop),
        "next" | "skip" => Ok(Command::Next),
        "prev" | "previous" => Ok(Command::Prev),
        "status" => Ok(Command::Status),
        "queue" | "list" => Ok(Command::Queue),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "vol" | "volume" => {
            let value = rest.first().ok_or_else(|| ParseError::MissingArgument {
                command: "vol".to_string(),
                argument: "level".to_string(),
            })?;
            match value.parse::<u8>() {
                Ok(level) if level <= 100 => Ok(Command::Volume(level)),
                _ => Err(ParseError::InvalidArgument {
                    argument: "volume level".to_string(),
                    value: value.to_string(),
                    expected: "0-100".to_string(),
                }),
            }
        }
        "add" => {
            if rest.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "add".to_string(),
                    argument: "track".to_string(),
                });
            }
            Ok(Command::Add(track_from_arg(&rest.join(" "))))
        }
        other => Err(ParseError::UnknownCommand {
            command: other.to_string(),
        }),
    }
}

pub fn help_text() -> &'static str {
    "Commands:
  pause           - Pause playback
  resume          - Resume playback
  stop            - Stop playback
  next            - Skip to the next track
  prev            - Go back one track
  vol <0-100>     - Set volume
  status          - Show player status
  queue           - List queued tracks
  add <track>     - Enqueue a track
  help            - Show this help message
  quit            - Exit the player"
}

pub fn format_status(status: &PlaybackStatus) -> String {
    let track = match (&status.current_track, status.current_sequence) {
        (Some(track), Some(sequence)) => format!("#{} {}", sequence, truncate(track.display_name(), 48)),
        _ => "-".to_string(),
    };
    format!(
        "{:<9} | {} | buffered {}{} | volume {}%",
        status.state,
        track,
        status.buffered_formatted(),
        if status.fully_processed { " (complete)" } else { "" },
        status.volume
    )
}

pub fn format_queue(items: &[Arc<PlayableItem>], current: Option<u64>) -> String {
    if items.is_empty() {
        return "Queue is empty".to_string();
    }
    items
        .iter()
        .map(|item| {
            let marker = if Some(item.sequence()) == current {
                '>'
            } else if item.is_completed() {
                'x'
            } else {
                ' '
            };
            format!("{} {:>3}. {}", marker, item.sequence(), item.track().display_name())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },
}
