//! # wavpack
//!
//! A pure Rust WavPack lossless encoder and decoder.
//!
//! ## Features
//!
//! - Bit-exact lossless round trip for 8, 16, 24 and 32-bit integer PCM
//! - Mono, stereo and multichannel streams split into channel groups
//! - 0 to 16 decorrelation passes, joint stereo and extended-integer packing
//! - Per-block checksums and an optional trailing MD5 of the audio
//! - Optional RIFF/WAVE header wrapping
//! - Parallel coding of independent channel groups (`parallel` feature)
//!
//! ## Example
//!
//! ```no_run
//! use wavpack::{encode, WavPackDecoder};
//! use wavpack_core::{MemorySource, PcmSpec};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! // Encoding
//! let spec = PcmSpec::new(44100, 2, 16);
//! let mut source = MemorySource::new(spec, vec![0; 44100 * 2]).unwrap();
//! let output = File::create("output.wv").unwrap();
//! encode(output, &mut source, 22050, 5).unwrap();
//!
//! // Decoding
//! let file = File::open("output.wv").unwrap();
//! let mut decoder = WavPackDecoder::open(BufReader::new(file)).unwrap();
//! while let Some(frame) = decoder.next_frame().unwrap() {
//!     // Process decoded audio samples
//! }
//! decoder.verify_integrity().unwrap();
//! ```

pub mod block;
pub mod config;
pub mod decoder;
pub mod decorrelation;
pub mod encoder;
pub mod entropy;
pub mod error;
pub mod extended;
pub mod header;
pub mod riff;
pub mod stereo;
pub mod subblock;
pub mod tables;

pub use config::{DecoderConfig, EncoderConfig};
pub use decoder::WavPackDecoder;
pub use encoder::{encode, encode_with_config, WavPackEncoder};
pub use error::{Result, WavPackError};
pub use header::{BlockFlags, BlockHeader};
