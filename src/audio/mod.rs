pub mod buffer;
pub mod decoders;
pub mod demuxer;
pub mod device;
pub mod engine;
pub mod reader;
pub mod resampler;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

use crate::error::PlaybackError;
use crate::models::{AudioFormat, PcmSpec};

pub use buffer::{PlaybackBuffer, VolumeControl};
pub use decoders::{SymphoniaDecoderFactory, SymphoniaFrameDecoder};
pub use demuxer::{Demuxed, EndOfStream, Frame, FrameDemuxer, FrameHeader};
pub use device::{CpalOutputDevice, CpalOutputFactory, DeviceCapabilities, DeviceManager};
pub use engine::{
    supervise, BufferSnapshot, Decision, ListenerId, PlaybackEvent, PlaybackOrchestrator,
};
pub use reader::FrameReader;
pub use resampler::{LinearResampler, PcmAdapter};

/// Most PCM frames any supported layer decodes from one compressed frame
pub const MAX_SAMPLES_PER_FRAME: usize = 1152;

/// Scratch space handed to `FrameDecoder::decompress`, in samples
pub const SCRATCH_SAMPLES: usize = 4 * MAX_SAMPLES_PER_FRAME * 2;

/// Stateful decompressor bound to the format of one stream
pub trait FrameDecoder: Send {
    /// Format discovered from the first frame
    fn format(&self) -> &AudioFormat;

    /// Decode one frame into interleaved samples. Never writes past
    /// `out.len()`; returns the number of samples written.
    fn decompress(&mut self, frame: &Frame, out: &mut [f32]) -> Result<usize, PlaybackError>;
}

pub trait DecoderFactory: Send + Sync {
    fn create(&self, first: &Frame) -> Result<Box<dyn FrameDecoder>, PlaybackError>;
}

/// Real-time output device pulling samples from a [`PlaybackBuffer`].
///
/// `negotiate`, `init` and `stop` may block on the output thread and are
/// called from the blocking pool. `play` and `pause` must return promptly.
pub trait AudioOutputDevice: Send {
    /// Pick the PCM shape the device will actually run at.
    fn negotiate(&mut self, requested: PcmSpec) -> Result<PcmSpec, PlaybackError> {
        Ok(requested)
    }

    fn init(&mut self, spec: PcmSpec, source: Arc<PlaybackBuffer>) -> Result<(), PlaybackError>;

    fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self) -> Result<(), PlaybackError>;

    /// Release the device. Safe to call more than once.
    fn stop(&mut self);

    /// Failure reported asynchronously since the last call, if any
    fn take_fault(&mut self) -> Option<PlaybackError> {
        None
    }
}

pub trait OutputDeviceFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AudioOutputDevice>, PlaybackError>;
}
