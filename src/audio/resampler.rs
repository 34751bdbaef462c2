//! PCM shape conversion between the decoded stream and the output device.
//!
//! Used only when the device refuses the stream's native rate or channel
//! count. Linear interpolation keeps continuity across successive blocks.

use crate::models::PcmSpec;

/// Streaming linear-interpolation resampler over interleaved f32 frames
#[derive(Debug, Clone)]
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    /// Source frames consumed per output frame
    step: f64,
    /// Read position in source frames, relative to `last_frame`
    pos: f64,
    /// Final input frame of the previous block
    last_frame: Vec<f32>,
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Self {
        let step = if dst_rate == 0 {
            0.0
        } else {
            src_rate as f64 / dst_rate as f64
        };
        Self {
            src_rate,
            dst_rate,
            channels,
            step,
            pos: 0.0,
            last_frame: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.last_frame.clear();
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.src_rate, self.dst_rate)
    }

    /// Resample one block, appending the result to `out`.
    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let ch = self.channels;
        if ch == 0 || self.src_rate == 0 || self.dst_rate == 0 {
            return;
        }
        let in_frames = input.len() / ch;
        if in_frames == 0 {
            return;
        }

        // frame 0 is the carried-over frame (silence on the first block)
        let frame_at = |index: usize, c: usize| -> f32 {
            if index == 0 {
                self.last_frame.get(c).copied().unwrap_or(0.0)
            } else {
                input[(index - 1) * ch + c]
            }
        };

        let total_frames = in_frames + 1;
        let expected = (in_frames as f64 / self.step).ceil() as usize + 2;
        out.reserve(expected * ch);

        let mut pos = self.pos;
        while pos + 1.0 <= (total_frames - 1) as f64 {
            let i = pos.floor() as usize;
            let frac = (pos - i as f64) as f32;
            for c in 0..ch {
                let s0 = frame_at(i, c);
                let s1 = frame_at(i + 1, c);
                out.push(s0 + (s1 - s0) * frac);
            }
            pos += self.step;
        }

        self.last_frame.clear();
        self.last_frame
            .extend_from_slice(&input[(in_frames - 1) * ch..in_frames * ch]);
        self.pos = (pos - in_frames as f64).max(0.0);
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(input, &mut out);
        out
    }
}

/// Convert interleaved samples between channel counts. Mono is duplicated
/// into every output channel, a stereo downmix averages, anything else
/// truncates or pads with silence.
pub fn remap_channels(input: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    if from == 0 || to == 0 {
        return;
    }
    let frames = input.len() / from;
    out.reserve(frames * to);

    for frame in input.chunks_exact(from) {
        match (from, to) {
            (a, b) if a == b => out.extend_from_slice(frame),
            (1, _) => out.extend(std::iter::repeat(frame[0]).take(to)),
            (_, 1) => out.push(frame.iter().sum::<f32>() / from as f32),
            _ => {
                let keep = from.min(to);
                out.extend_from_slice(&frame[..keep]);
                out.extend(std::iter::repeat(0.0).take(to - keep));
            }
        }
    }
}

/// Converts decoded PCM into the shape the output device runs at
#[derive(Debug)]
pub struct PcmAdapter {
    from: PcmSpec,
    to: PcmSpec,
    resampler: Option<LinearResampler>,
    remapped: Vec<f32>,
    output: Vec<f32>,
}

impl PcmAdapter {
    pub fn new(from: PcmSpec, to: PcmSpec) -> Self {
        let resampler = (from.sample_rate != to.sample_rate)
            .then(|| LinearResampler::new(from.sample_rate, to.sample_rate, to.channels as usize));
        if from != to {
            log::info!(
                "Converting {} Hz/{} ch to {} Hz/{} ch for output",
                from.sample_rate,
                from.channels,
                to.sample_rate,
                to.channels
            );
        }
        Self {
            from,
            to,
            resampler,
            remapped: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from == self.to
    }

    pub fn output_spec(&self) -> PcmSpec {
        self.to
    }

    /// Convert one decoded block. The returned slice is valid until the
    /// next call.
    pub fn process<'a>(&'a mut self, input: &'a [f32]) -> &'a [f32] {
        if self.is_passthrough() {
            return input;
        }

        let channels_differ = self.from.channels != self.to.channels;
        if channels_differ {
            self.remapped.clear();
            remap_channels(
                input,
                self.from.channels as usize,
                self.to.channels as usize,
                &mut self.remapped,
            );
        }

        match self.resampler.as_mut() {
            Some(resampler) => {
                self.output.clear();
                let source = if channels_differ { &self.remapped[..] } else { input };
                resampler.process_into(source, &mut self.output);
                &self.output
            }
            None => &self.remapped,
        }
    }
}
