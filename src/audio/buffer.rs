use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PlaybackError;
use crate::models::PcmSpec;

/// Shared output volume as a percentage, 0-100.
///
/// Cloning shares the same value, so a control handed to every new
/// playback buffer keeps the volume across tracks.
#[derive(Debug, Clone)]
pub struct VolumeControl {
    percent: Arc<AtomicU32>,
}

impl VolumeControl {
    pub fn new(percent: u8) -> Self {
        Self {
            percent: Arc::new(AtomicU32::new(percent.min(100) as u32)),
        }
    }

    /// Set the volume; anything outside 0-100 is rejected unchanged.
    pub fn set(&self, volume: i32) -> Result<(), PlaybackError> {
        if !(0..=100).contains(&volume) {
            return Err(PlaybackError::InvalidVolume { volume });
        }
        self.percent.store(volume as u32, Ordering::Release);
        Ok(())
    }

    pub fn get(&self) -> u8 {
        self.percent.load(Ordering::Acquire) as u8
    }

    /// Linear gain for the current volume
    pub fn gain(&self) -> f32 {
        self.get() as f32 / 100.0
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Bounded ring of interleaved PCM samples between the decode loop and
/// the audio device callback.
///
/// Exactly one thread may call `write` and exactly one may call `read` or
/// `clear`. Counters only ever grow (wrapping), so the whole capacity is
/// usable and `buffered_samples() <= capacity_samples()` always holds.
pub struct PlaybackBuffer {
    slots: Box<[UnsafeCell<f32>]>,
    capacity: usize,
    read_count: AtomicUsize,
    write_count: AtomicUsize,
    spec: PcmSpec,
    volume: VolumeControl,
}

// Slots are only touched by the single producer (unpublished range) and the
// single consumer (published range); the counters order those accesses.
unsafe impl Sync for PlaybackBuffer {}

impl PlaybackBuffer {
    pub fn new(spec: PcmSpec, capacity: Duration, volume: VolumeControl) -> Self {
        let capacity = spec.samples_for(capacity).max(spec.channels.max(1) as usize);
        let slots = (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();
        Self {
            slots,
            capacity,
            read_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
            spec,
            volume,
        }
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    pub fn capacity_samples(&self) -> usize {
        self.capacity
    }

    pub fn capacity_duration(&self) -> Duration {
        self.spec.duration_of(self.capacity)
    }

    pub fn buffered_samples(&self) -> usize {
        let written = self.write_count.load(Ordering::Acquire);
        let read = self.read_count.load(Ordering::Acquire);
        written.wrapping_sub(read).min(self.capacity)
    }

    pub fn buffered_duration(&self) -> Duration {
        self.spec.duration_of(self.buffered_samples())
    }

    pub fn free_samples(&self) -> usize {
        self.capacity - self.buffered_samples()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered_samples() == 0
    }

    /// True when less than `margin` worth of audio still fits.
    pub fn is_nearly_full(&self, margin: Duration) -> bool {
        self.free_samples() < self.spec.samples_for(margin)
    }

    /// Append samples without blocking. Returns how many were accepted.
    pub fn write(&self, data: &[f32]) -> usize {
        let write = self.write_count.load(Ordering::Relaxed);
        let read = self.read_count.load(Ordering::Acquire);
        let free = self.capacity - write.wrapping_sub(read);
        let n = data.len().min(free);
        if n == 0 {
            return 0;
        }

        let start = write % self.capacity;
        let first = n.min(self.capacity - start);
        for (slot, sample) in self.slots[start..start + first].iter().zip(&data[..first]) {
            unsafe { *slot.get() = *sample };
        }
        for (slot, sample) in self.slots[..n - first].iter().zip(&data[first..n]) {
            unsafe { *slot.get() = *sample };
        }

        self.write_count.store(write.wrapping_add(n), Ordering::Release);
        n
    }

    /// Drain up to `out.len()` samples with the current volume applied.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let read = self.read_count.load(Ordering::Relaxed);
        let write = self.write_count.load(Ordering::Acquire);
        let n = out.len().min(write.wrapping_sub(read));
        if n == 0 {
            return 0;
        }

        let gain = self.volume.gain();
        let start = read % self.capacity;
        let first = n.min(self.capacity - start);
        for (sample, slot) in out[..first].iter_mut().zip(&self.slots[start..start + first]) {
            *sample = unsafe { *slot.get() } * gain;
        }
        for (sample, slot) in out[first..n].iter_mut().zip(&self.slots[..n - first]) {
            *sample = unsafe { *slot.get() } * gain;
        }

        self.read_count.store(read.wrapping_add(n), Ordering::Release);
        n
    }

    /// Discard everything buffered. Consumer side only.
    pub fn clear(&self) {
        let write = self.write_count.load(Ordering::Acquire);
        self.read_count.store(write, Ordering::Release);
    }

    pub fn set_volume(&self, volume: i32) -> Result<(), PlaybackError> {
        self.volume.set(volume)
    }

    pub fn volume(&self) -> u8 {
        self.volume.get()
    }
}

impl std::fmt::Debug for PlaybackBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackBuffer")
            .field("spec", &self.spec)
            .field("capacity", &self.capacity)
            .field("buffered", &self.buffered_samples())
            .field("volume", &self.volume.get())
            .finish()
    }
}
