use clap::Parser;
use log::{error, info, log, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use stream_player::audio::{CpalOutputFactory, DeviceManager, PlaybackEvent};
use stream_player::cli::{self, Cli, Command};
use stream_player::config::{ConfigManager, PlayerConfig};
use stream_player::logging;
use stream_player::player::Player;
use stream_player::PlayerError;

/// Interactive front-end owning the player and the persisted configuration
struct AppController {
    player: Player,
    config_manager: ConfigManager,
}

impl AppController {
    fn new(cli: &Cli) -> Result<Self, PlayerError> {
        let config_manager = match &cli.config {
            Some(path) => ConfigManager::with_path(path.clone())?,
            None => ConfigManager::new()?,
        };

        // command-line overrides apply to this session only
        let mut config: PlayerConfig = config_manager.get_config().clone();
        if let Some(volume) = cli.volume {
            config.default_volume = volume;
        }
        if let Some(device) = &cli.device {
            config.preferred_device = Some(device.clone());
        }

        let outputs = Arc::new(CpalOutputFactory::new(config.preferred_device.as_deref()));
        let player = Player::from_config(&config, outputs)?;
        info!(
            "Player ready (library root: {}, policy: {:?})",
            config.library_root.display(),
            player.policy()
        );

        Ok(Self {
            player,
            config_manager,
        })
    }

    /// Returns false when the user asked to quit
    async fn execute_command(&mut self, command: Command) -> Result<bool, PlayerError> {
        match command {
            Command::Pause => self.player.pause().await?,
            Command::Resume => self.player.resume().await?,
            Command::Stop => self.player.stop().await,
            Command::Next => self.player.next().await?,
            Command::Prev => self.player.previous().await?,
            Command::Volume(level) => {
                self.player.set_volume(level as i32)?;
                println!("Volume: {}%", level);
            }
            Command::Status => println!("{}", cli::format_status(&self.player.status().await)),
            Command::Queue => {
                let current = self.player.status().await.current_sequence;
                println!("{}", cli::format_queue(&self.player.queue_items(), current));
            }
            Command::Add(track) => {
                let sequence = self.player.enqueue(track).await?;
                println!("Enqueued as #{}", sequence);
            }
            Command::Help => println!("{}", cli::help_text()),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    async fn run_interactive_mode(&mut self) -> Result<(), PlayerError> {
        println!("streamplay {}", env!("CARGO_PKG_VERSION"));
        println!("Type 'help' for available commands, 'quit' to exit.");

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown_flag);
        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nReceived interrupt signal. Shutting down...");
            flag.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }

        let (notice_tx, mut notices) = mpsc::unbounded_channel::<PlaybackEvent>();
        self.player.orchestrator().subscribe(move |event| {
            if matches!(
                event,
                PlaybackEvent::SessionStarted { .. } | PlaybackEvent::PlaybackFailed { .. }
            ) {
                let _ = notice_tx.send(event.clone());
            }
        });

        // stdin is read on its own thread so the loop stays responsive
        let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if line_tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut poll = tokio::time::interval(Duration::from_millis(100));
        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                biased;

                line = lines.recv() => {
                    let Some(line) = line else {
                        break;
                    };
                    if line.is_empty() {
                        continue;
                    }
                    match cli::parse_command(&line) {
                        Ok(command) => match self.execute_command(command).await {
                            Ok(true) => {}
                            Ok(false) => break,
                            Err(e) => report_error(&e),
                        },
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            println!("Type 'help' for available commands.");
                        }
                    }
                }

                Some(event) = notices.recv() => self.announce(&event),

                _ = poll.tick() => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn announce(&self, event: &PlaybackEvent) {
        let name = |sequence: u64| {
            self.player
                .queue_items()
                .into_iter()
                .find(|item| item.sequence() == sequence)
                .map(|item| item.track().display_name().to_string())
                .unwrap_or_else(|| format!("#{}", sequence))
        };
        match event {
            PlaybackEvent::SessionStarted { sequence } => println!("Now playing: {}", name(*sequence)),
            PlaybackEvent::PlaybackFailed { sequence, message } => {
                println!("Could not play {}: {}", name(*sequence), message)
            }
            _ => {}
        }
    }

    async fn shutdown(&mut self) {
        println!("Shutting down...");
        let volume = self.player.volume();
        self.player.shutdown().await;

        if let Err(e) = self.config_manager.set_volume(volume) {
            warn!("Could not save configuration: {}", e);
        }
        println!("Goodbye!");
    }
}

fn report_error(error: &PlayerError) {
    log!(error.severity().log_level(), "{}", error);
    eprintln!("[{}] {}", error.severity().as_str(), error.user_message());
    for suggestion in error.recovery_suggestions() {
        eprintln!("  - {}", suggestion);
    }
}

fn list_devices() -> Result<(), PlayerError> {
    let manager = DeviceManager::new();
    let devices = manager.list_devices()?;
    if devices.is_empty() {
        println!("No output devices found");
        return Ok(());
    }
    for name in devices {
        match manager.resolve(Some(&name)).and_then(|d| manager.capabilities(&d)) {
            Ok(caps) => println!(
                "{} (up to {} channels, default {} Hz)",
                name, caps.max_channels, caps.default_spec.sample_rate
            ),
            Err(_) => println!("{}", name),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logged = match &cli.log_level {
        Some(level) => logging::init_with_level(level),
        None => logging::init(),
    };
    if let Err(e) = logged {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    if cli.list_devices {
        if let Err(e) = list_devices() {
            report_error(&e);
            std::process::exit(1);
        }
        return;
    }

    let mut app = match AppController::new(&cli) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            report_error(&e);
            std::process::exit(1);
        }
    };

    let tracks = cli.tracks();
    if !tracks.is_empty() {
        if let Err(e) = app.player.enqueue_many(tracks).await {
            report_error(&e);
        }
    }

    if let Err(e) = app.run_interactive_mode().await {
        report_error(&e);
        std::process::exit(1);
    }
    info!("Application shutdown complete");
}
