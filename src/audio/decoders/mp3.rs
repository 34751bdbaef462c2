use symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_MP1, CODEC_TYPE_MP2,
    CODEC_TYPE_MP3,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use crate::audio::demuxer::{Frame, FrameHeader, Layer};
use crate::audio::{DecoderFactory, FrameDecoder};
use crate::error::PlaybackError;
use crate::models::AudioFormat;

/// MPEG audio frame decoder backed by symphonia's MP1/MP2/MP3 codecs.
///
/// Fed one demuxed frame per packet; the codec keeps its own state (bit
/// reservoir, synthesis filter) between frames of the same stream.
pub struct SymphoniaFrameDecoder {
    decoder: Box<dyn Decoder>,
    format: AudioFormat,
    sample_buf: Option<SampleBuffer<f32>>,
    timestamp: u64,
}

impl SymphoniaFrameDecoder {
    pub fn new(first: &FrameHeader) -> Result<Self, PlaybackError> {
        let format = first.audio_format();
        let channels = if format.channel_count == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        };

        let mut params = CodecParameters::new();
        params
            .for_codec(codec_for(first.layer))
            .with_sample_rate(format.sample_rate)
            .with_channels(channels)
            .with_max_frames_per_packet(first.samples_per_frame() as u64);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::UnsupportedFormat(format!("no decoder for {:?}: {}", first.layer, e)))?;

        log::debug!("Created {:?} decoder: {}", first.layer, format.format_description());

        Ok(Self {
            decoder,
            format,
            sample_buf: None,
            timestamp: 0,
        })
    }
}

fn codec_for(layer: Layer) -> CodecType {
    match layer {
        Layer::Layer1 => CODEC_TYPE_MP1,
        Layer::Layer2 => CODEC_TYPE_MP2,
        Layer::Layer3 => CODEC_TYPE_MP3,
    }
}

impl FrameDecoder for SymphoniaFrameDecoder {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn decompress(&mut self, frame: &Frame, out: &mut [f32]) -> Result<usize, PlaybackError> {
        let duration = frame.header.samples_per_frame() as u64;
        let packet = Packet::new_from_slice(0, self.timestamp, duration, &frame.data);
        self.timestamp += duration;

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Err(PlaybackError::FrameDecode("decoder reset".to_string()));
            }
            Err(e) => return Err(PlaybackError::FrameDecode(e.to_string())),
        };

        let spec: SignalSpec = *decoded.spec();
        let capacity = decoded.capacity() as u64;
        let sample_buf = match &mut self.sample_buf {
            Some(buf) if buf.capacity() >= capacity as usize * spec.channels.count() => buf,
            slot => slot.insert(SampleBuffer::new(capacity, spec)),
        };
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();
        let n = samples.len().min(out.len());
        if n < samples.len() {
            log::warn!("Dropping {} samples that do not fit the scratch buffer", samples.len() - n);
        }
        out[..n].copy_from_slice(&samples[..n]);
        Ok(n)
    }
}

/// Builds a [`SymphoniaFrameDecoder`] from the first frame of each stream
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoderFactory;

impl DecoderFactory for SymphoniaDecoderFactory {
    fn create(&self, first: &Frame) -> Result<Box<dyn FrameDecoder>, PlaybackError> {
        Ok(Box::new(SymphoniaFrameDecoder::new(&first.header)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_frame(header: [u8; 4]) -> Frame {
        let parsed = FrameHeader::parse(header).unwrap();
        let mut data = vec![0u8; parsed.frame_length()];
        data[..4].copy_from_slice(&header);
        Frame { header: parsed, data }
    }

    #[test]
    fn test_factory_binds_format_from_first_frame() {
        let frame = silent_frame([0xFF, 0xFB, 0x90, 0x00]);
        let decoder = SymphoniaDecoderFactory.create(&frame).unwrap();

        let format = decoder.format();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.channel_count, 2);
        assert_eq!(format.bit_rate, 128_000);
        assert_eq!(format.frame_length, 417);
    }

    #[test]
    fn test_codec_selection_by_layer() {
        assert_eq!(codec_for(Layer::Layer1), CODEC_TYPE_MP1);
        assert_eq!(codec_for(Layer::Layer2), CODEC_TYPE_MP2);
        assert_eq!(codec_for(Layer::Layer3), CODEC_TYPE_MP3);
    }

    #[test]
    fn test_decompress_respects_output_bound() {
        let frame = silent_frame([0xFF, 0xFB, 0x90, 0x00]);
        let mut decoder = SymphoniaDecoderFactory.create(&frame).unwrap();

        let mut small = vec![0.0f32; 100];
        for _ in 0..3 {
            match decoder.decompress(&frame, &mut small) {
                Ok(n) => assert!(n <= small.len()),
                Err(PlaybackError::FrameDecode(_)) => {}
                Err(other) => panic!("Unexpected error: {}", other),
            }
        }

        let mut scratch = vec![0.0f32; crate::audio::SCRATCH_SAMPLES];
        if let Ok(n) = decoder.decompress(&frame, &mut scratch) {
            assert!(n <= crate::audio::MAX_SAMPLES_PER_FRAME * 2);
        }
    }
}
