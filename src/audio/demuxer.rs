//! MPEG audio frame demuxing.
//!
//! Splits a raw MPEG-1/2/2.5 layer I-III elementary stream into whole
//! frames. Anything that stops the stream from yielding another frame
//! (exhaustion, a truncated tail, lost sync or a failed read) ends the
//! stream instead of raising an error.

use crate::audio::reader::FrameReader;
use crate::models::AudioFormat;

const HEADER_LEN: usize = 4;
const ID3V2_HEADER_LEN: usize = 10;

const BITRATES_V1_L1: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const BITRATES_V1_L2: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATES_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Layer1,
    Layer2,
    Layer3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

/// Decoded 4-byte MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    /// Bits per second
    pub bitrate: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channel_mode: ChannelMode,
}

impl FrameHeader {
    /// Parse a header, rejecting reserved and free-format encodings.
    pub fn parse(bytes: [u8; 4]) -> Option<FrameHeader> {
        if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };

        let layer = match (bytes[1] >> 1) & 0b11 {
            0b01 => Layer::Layer3,
            0b10 => Layer::Layer2,
            0b11 => Layer::Layer1,
            _ => return None,
        };

        let bitrate_index = (bytes[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let table = match (version, layer) {
            (MpegVersion::Mpeg1, Layer::Layer1) => &BITRATES_V1_L1,
            (MpegVersion::Mpeg1, Layer::Layer2) => &BITRATES_V1_L2,
            (MpegVersion::Mpeg1, Layer::Layer3) => &BITRATES_V1_L3,
            (_, Layer::Layer1) => &BITRATES_V2_L1,
            _ => &BITRATES_V2_L23,
        };
        let bitrate = table[bitrate_index] * 1000;

        let base_rate = match (bytes[2] >> 2) & 0b11 {
            0 => 44100,
            1 => 48000,
            2 => 32000,
            _ => return None,
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        let padding = (bytes[2] >> 1) & 1 == 1;
        let channel_mode = match bytes[3] >> 6 {
            0b00 => ChannelMode::Stereo,
            0b01 => ChannelMode::JointStereo,
            0b10 => ChannelMode::DualChannel,
            _ => ChannelMode::Mono,
        };

        Some(FrameHeader {
            version,
            layer,
            bitrate,
            sample_rate,
            padding,
            channel_mode,
        })
    }

    /// Length of the whole frame in bytes, header included
    pub fn frame_length(&self) -> usize {
        let bitrate = self.bitrate as usize;
        let rate = self.sample_rate as usize;
        let pad = self.padding as usize;
        match (self.layer, self.version) {
            (Layer::Layer1, _) => (12 * bitrate / rate + pad) * 4,
            (Layer::Layer2, _) | (Layer::Layer3, MpegVersion::Mpeg1) => 144 * bitrate / rate + pad,
            (Layer::Layer3, _) => 72 * bitrate / rate + pad,
        }
    }

    pub fn samples_per_frame(&self) -> usize {
        match (self.layer, self.version) {
            (Layer::Layer1, _) => 384,
            (Layer::Layer2, _) | (Layer::Layer3, MpegVersion::Mpeg1) => 1152,
            (Layer::Layer3, _) => 576,
        }
    }

    pub fn channels(&self) -> u16 {
        if self.channel_mode == ChannelMode::Mono {
            1
        } else {
            2
        }
    }

    /// Whether `other` can belong to the same stream. Bitrate and padding
    /// vary per frame; stereo and joint stereo may alternate.
    pub fn same_stream(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate == other.sample_rate
            && self.channels() == other.channels()
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channel_count: self.channels(),
            bit_rate: self.bitrate,
            frame_length: self.frame_length(),
        }
    }
}

/// One complete compressed frame. `data` starts with the 4 header bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub data: Vec<u8>,
}

/// Why a stream stopped producing frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOfStream {
    Exhausted,
    Truncated { missing: usize },
    Desync { scanned: usize },
    ReadFailed(String),
}

#[derive(Debug)]
pub enum Demuxed {
    Frame(Frame),
    EndOfStream(EndOfStream),
}

pub struct FrameDemuxer {
    reader: FrameReader,
    max_resync_bytes: usize,
    started: bool,
    /// Header of the first frame; later frames must match it
    first: Option<FrameHeader>,
    frames: u64,
}

impl FrameDemuxer {
    pub fn new(reader: FrameReader, max_resync_bytes: usize) -> Self {
        Self {
            reader,
            max_resync_bytes,
            started: false,
            first: None,
            frames: 0,
        }
    }

    /// Number of frames returned so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes_read(&self) -> u64 {
        self.reader.position()
    }

    pub async fn next_frame(&mut self) -> Demuxed {
        match self.demux().await {
            Ok(frame) => {
                self.frames += 1;
                Demuxed::Frame(frame)
            }
            Err(end) => {
                log::debug!(
                    "Stream ended after {} frames ({} bytes): {:?}",
                    self.frames,
                    self.reader.position(),
                    end
                );
                Demuxed::EndOfStream(end)
            }
        }
    }

    async fn demux(&mut self) -> Result<Frame, EndOfStream> {
        let mut header = [0u8; HEADER_LEN];
        if self.fill(&mut header).await? < HEADER_LEN {
            return Err(EndOfStream::Exhausted);
        }

        if !self.started {
            self.started = true;
            if &header[..3] == b"ID3" {
                self.skip_id3(header).await?;
                if self.fill(&mut header).await? < HEADER_LEN {
                    return Err(EndOfStream::Exhausted);
                }
            }
        }

        let mut scanned = 0;
        let parsed = loop {
            match FrameHeader::parse(header) {
                Some(parsed) if self.first.map_or(true, |first| first.same_stream(&parsed)) => {
                    break parsed;
                }
                Some(parsed) => log::trace!(
                    "Ignoring {} Hz {} ch header inside a {:?} stream",
                    parsed.sample_rate,
                    parsed.channels(),
                    self.first.map(|first| (first.sample_rate, first.channels()))
                ),
                None => {}
            }
            if scanned >= self.max_resync_bytes {
                return Err(EndOfStream::Desync { scanned });
            }
            header.rotate_left(1);
            if self.fill(&mut header[HEADER_LEN - 1..]).await? == 0 {
                return Err(if scanned == 0 {
                    EndOfStream::Exhausted
                } else {
                    EndOfStream::Desync { scanned }
                });
            }
            scanned += 1;
        };

        if scanned > 0 {
            log::debug!("Resynchronised after skipping {} bytes", scanned);
        }
        if self.first.is_none() {
            self.first = Some(parsed);
        }

        let length = parsed.frame_length();
        let mut data = vec![0u8; length.max(HEADER_LEN)];
        data[..HEADER_LEN].copy_from_slice(&header);
        let body = self.fill(&mut data[HEADER_LEN..]).await?;
        let expected = data.len() - HEADER_LEN;
        if body < expected {
            return Err(EndOfStream::Truncated {
                missing: expected - body,
            });
        }

        Ok(Frame {
            header: parsed,
            data,
        })
    }

    async fn skip_id3(&mut self, first: [u8; 4]) -> Result<(), EndOfStream> {
        let mut rest = [0u8; ID3V2_HEADER_LEN - HEADER_LEN];
        if self.fill(&mut rest).await? < rest.len() {
            return Err(EndOfStream::Exhausted);
        }

        // first[3] is the major version, rest = [revision, flags, size x4]
        let flags = rest[1];
        let size = rest[2..6]
            .iter()
            .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7F) as usize);
        let footer = if first[3] >= 4 && flags & 0x10 != 0 {
            ID3V2_HEADER_LEN
        } else {
            0
        };

        let mut remaining = size + footer;
        log::debug!("Skipping {} byte ID3v2 tag", remaining);
        let mut scratch = [0u8; 1024];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            let n = self.fill(&mut scratch[..chunk]).await?;
            if n < chunk {
                return Err(EndOfStream::Exhausted);
            }
            remaining -= n;
        }
        Ok(())
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize, EndOfStream> {
        self.reader.read(buf).await.map_err(|e| {
            log::warn!("Stream read failed at byte {}: {}", self.reader.position(), e);
            EndOfStream::ReadFailed(e.to_string())
        })
    }
}
