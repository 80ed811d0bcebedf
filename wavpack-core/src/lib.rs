//! # WavPack Core
//!
//! Building blocks shared by the WavPack codec crates:
//! - Error handling types
//! - A little-endian bit cursor with bounded substreams and a single checkpoint
//! - PCM frame and stream description types, and the [`PcmSource`] trait

pub mod bitstream;
pub mod error;
pub mod sample;

pub use bitstream::{BitReader, BitWriter};
pub use error::{BitstreamError, Error, Result};
pub use sample::{ChannelMask, MemorySource, PcmFrame, PcmSource, PcmSpec};
