use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use crate::audio::{AudioOutputDevice, OutputDeviceFactory, PlaybackBuffer};
use crate::error::PlaybackError;
use crate::models::PcmSpec;

/// Information about an output device's capabilities
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub name: String,
    pub supported_sample_rates: Vec<u32>,
    pub max_channels: u16,
    pub default_spec: PcmSpec,
}

/// Enumerates output devices and resolves the one to play on
pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn list_devices(&self) -> Result<Vec<String>, PlaybackError> {
        let devices = self
            .host
            .output_devices()
            .map_err(|e| PlaybackError::DeviceFailure(format!("Failed to enumerate devices: {}", e)))?;

        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    /// Find a device by name, falling back to the default output device
    pub fn resolve(&self, preferred: Option<&str>) -> Result<Device, PlaybackError> {
        if let Some(name) = preferred {
            let found = self
                .host
                .output_devices()
                .ok()
                .and_then(|mut devices| devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)));
            match found {
                Some(device) => return Ok(device),
                None => log::warn!("Output device '{}' not found, using default", name),
            }
        }

        self.host
            .default_output_device()
            .ok_or_else(|| PlaybackError::DeviceFailure("No default output device available".to_string()))
    }

    pub fn capabilities(&self, device: &Device) -> Result<DeviceCapabilities, PlaybackError> {
        let name = device
            .name()
            .map_err(|e| PlaybackError::DeviceFailure(format!("Failed to get device name: {}", e)))?;
        let default_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::DeviceFailure(format!("No default config for {}: {}", name, e)))?;

        let mut supported_sample_rates = Vec::new();
        let mut max_channels = default_config.channels();
        if let Ok(ranges) = device.supported_output_configs() {
            for range in ranges {
                for rate in COMMON_RATES {
                    if (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&rate)
                        && !supported_sample_rates.contains(&rate)
                    {
                        supported_sample_rates.push(rate);
                    }
                }
                max_channels = max_channels.max(range.channels());
            }
        }
        supported_sample_rates.sort_unstable();

        Ok(DeviceCapabilities {
            name,
            supported_sample_rates,
            max_channels,
            default_spec: PcmSpec::new(default_config.sample_rate().0, default_config.channels()),
        })
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

const COMMON_RATES: [u32; 10] = [8000, 11025, 16000, 22050, 24000, 32000, 44100, 48000, 88200, 96000];

/// Supported configuration as (channels, min rate, max rate, format)
type ConfigRange = (u16, u32, u32, SampleFormat);

/// Keep the requested shape if any range supports it, else use the
/// device default.
fn choose_config(
    requested: PcmSpec,
    ranges: &[ConfigRange],
    default: (PcmSpec, SampleFormat),
) -> (PcmSpec, SampleFormat) {
    let playable = |format: &SampleFormat| {
        matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
    };

    ranges
        .iter()
        .filter(|(_, _, _, format)| playable(format))
        .filter(|(channels, min, max, _)| {
            *channels == requested.channels && (*min..=*max).contains(&requested.sample_rate)
        })
        // prefer f32 to skip a conversion
        .min_by_key(|(_, _, _, format)| *format != SampleFormat::F32)
        .map(|(_, _, _, format)| (requested, *format))
        .unwrap_or(default)
}

enum DeviceCommand {
    Play,
    Pause,
    Stop,
}

/// cpal output stream driven from a dedicated thread.
///
/// cpal streams are not `Send`, so the stream is built and owned by the
/// `audio-output` thread and controlled through a command channel.
pub struct CpalOutputDevice {
    device: Device,
    sample_format: SampleFormat,
    commands: Option<Sender<DeviceCommand>>,
    thread: Option<JoinHandle<()>>,
    fault: Arc<Mutex<Option<String>>>,
}

impl CpalOutputDevice {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            sample_format: SampleFormat::F32,
            commands: None,
            thread: None,
            fault: Arc::new(Mutex::new(None)),
        }
    }

    fn send(&self, command: DeviceCommand) -> Result<(), PlaybackError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| PlaybackError::DeviceFailure("Output stream not initialised".to_string()))?;
        commands
            .send(command)
            .map_err(|_| PlaybackError::DeviceFailure("Audio output thread has exited".to_string()))
    }
}

impl AudioOutputDevice for CpalOutputDevice {
    fn negotiate(&mut self, requested: PcmSpec) -> Result<PcmSpec, PlaybackError> {
        let default_config = self
            .device
            .default_output_config()
            .map_err(|e| PlaybackError::DeviceFailure(format!("Failed to get default config: {}", e)))?;
        let default = (
            PcmSpec::new(default_config.sample_rate().0, default_config.channels()),
            default_config.sample_format(),
        );

        let ranges: Vec<ConfigRange> = self
            .device
            .supported_output_configs()
            .map(|ranges| {
                ranges
                    .map(|r| (r.channels(), r.min_sample_rate().0, r.max_sample_rate().0, r.sample_format()))
                    .collect()
            })
            .unwrap_or_default();

        let (spec, format) = choose_config(requested, &ranges, default);
        if spec != requested {
            log::warn!(
                "Device cannot play {} Hz/{} ch, using {} Hz/{} ch",
                requested.sample_rate,
                requested.channels,
                spec.sample_rate,
                spec.channels
            );
        }
        self.sample_format = format;
        Ok(spec)
    }

    fn init(&mut self, spec: PcmSpec, source: Arc<PlaybackBuffer>) -> Result<(), PlaybackError> {
        self.stop();

        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let device = self.device.clone();
        let sample_format = self.sample_format;
        let fault = Arc::clone(&self.fault);
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    SampleFormat::F32 => build_stream::<f32>(&device, &config, source, fault.clone()),
                    SampleFormat::I16 => build_stream::<i16>(&device, &config, source, fault.clone()),
                    SampleFormat::U16 => build_stream::<u16>(&device, &config, source, fault.clone()),
                    other => Err(format!("Unsupported sample format: {:?}", other)),
                };

                let stream = match stream {
                    Ok(stream) => {
                        // some hosts start streams on creation
                        let _ = stream.pause();
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                run_commands(&stream, command_rx, &fault);
                let _ = stream.pause();
            })
            .map_err(|e| PlaybackError::DeviceFailure(format!("Failed to create audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::debug!(
                    "Output stream ready: {} Hz, {} ch, {:?}",
                    spec.sample_rate,
                    spec.channels,
                    sample_format
                );
                self.commands = Some(command_tx);
                self.thread = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(PlaybackError::DeviceFailure(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(PlaybackError::DeviceFailure("Audio output thread exited during setup".to_string()))
            }
        }
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        self.send(DeviceCommand::Play)
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        self.send(DeviceCommand::Pause)
    }

    fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(DeviceCommand::Stop);
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Audio output thread panicked");
            }
        }
    }

    fn take_fault(&mut self) -> Option<PlaybackError> {
        self.fault
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(PlaybackError::DeviceFailure)
    }
}

impl Drop for CpalOutputDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_commands(stream: &Stream, commands: Receiver<DeviceCommand>, fault: &Mutex<Option<String>>) {
    // a dropped sender also ends the loop
    while let Ok(command) = commands.recv() {
        let result = match command {
            DeviceCommand::Play => stream.play().map_err(|e| e.to_string()),
            DeviceCommand::Pause => stream.pause().map_err(|e| e.to_string()),
            DeviceCommand::Stop => break,
        };
        if let Err(e) = result {
            log::error!("Audio stream command failed: {}", e);
            *fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(e);
        }
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    source: Arc<PlaybackBuffer>,
    fault: Arc<Mutex<Option<String>>>,
) -> Result<Stream, String>
where
    T: SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let read = source.read(&mut scratch[..data.len()]);

                // underrun is played as silence
                for (i, sample) in data.iter_mut().enumerate() {
                    let value = if i < read { scratch[i] } else { 0.0 };
                    *sample = cpal::Sample::from_sample(value);
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                *fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| format!("Failed to build output stream: {}", e))
}

/// Opens cpal output devices, honouring a preferred device name
#[derive(Debug, Clone, Default)]
pub struct CpalOutputFactory {
    preferred: Option<String>,
}

impl CpalOutputFactory {
    pub fn new(preferred: Option<&str>) -> Self {
        Self {
            preferred: preferred.map(str::to_string),
        }
    }
}

impl OutputDeviceFactory for CpalOutputFactory {
    fn create(&self) -> Result<Box<dyn AudioOutputDevice>, PlaybackError> {
        let device = DeviceManager::new().resolve(self.preferred.as_deref())?;
        Ok(Box::new(CpalOutputDevice::new(device)))
    }
}
