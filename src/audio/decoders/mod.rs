pub mod mp3;

pub use mp3::{SymphoniaDecoderFactory, SymphoniaFrameDecoder};
