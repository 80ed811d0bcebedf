//! PCM sample frames exchanged with the codec.
//!
//! Samples are signed integers held in `i32` regardless of bit depth, interleaved by
//! channel. Byte conversion follows RIFF/WAVE conventions: little-endian, 8-bit
//! samples unsigned with a 128 offset, wider samples signed.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker position bitmask, as used by `WAVE_FORMAT_EXTENSIBLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelMask(pub u32);

impl ChannelMask {
    /// Front left.
    pub const FRONT_LEFT: u32 = 0x1;
    /// Front right.
    pub const FRONT_RIGHT: u32 = 0x2;
    /// Front center.
    pub const FRONT_CENTER: u32 = 0x4;
    /// Low-frequency effects.
    pub const LOW_FREQUENCY: u32 = 0x8;
    /// Back left.
    pub const BACK_LEFT: u32 = 0x10;
    /// Back right.
    pub const BACK_RIGHT: u32 = 0x20;
    /// Back center.
    pub const BACK_CENTER: u32 = 0x100;

    /// Mono: a single front-center speaker.
    pub const MONO: ChannelMask = ChannelMask(Self::FRONT_CENTER);
    /// Front left and right.
    pub const STEREO: ChannelMask = ChannelMask(Self::FRONT_LEFT | Self::FRONT_RIGHT);

    /// The conventional mask for a channel count.
    pub fn default_for(channels: u16) -> Self {
        match channels {
            1 => Self::MONO,
            2 => Self::STEREO,
            3 => ChannelMask(0x7),
            4 => ChannelMask(0x33),
            5 => ChannelMask(0x37),
            6 => ChannelMask(0x3F),
            n if n < 32 => ChannelMask((1u32 << n) - 1),
            _ => ChannelMask(0),
        }
    }

    /// Raw mask bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Number of speaker positions set.
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Description of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmSpec {
    /// Samples per second.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Speaker layout.
    pub channel_mask: ChannelMask,
    /// Bits per sample (8, 16, 24 or 32).
    pub bits_per_sample: u16,
}

impl PcmSpec {
    /// Create a spec with the conventional mask for `channels`.
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            channel_mask: ChannelMask::default_for(channels),
            bits_per_sample,
        }
    }

    /// Replace the channel mask.
    pub fn with_channel_mask(mut self, mask: ChannelMask) -> Self {
        self.channel_mask = mask;
        self
    }

    /// Bytes per sample in RIFF/WAVE layout.
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Smallest representable sample.
    pub fn min_sample(&self) -> i64 {
        -(1i64 << (self.bits_per_sample.clamp(1, 32) - 1))
    }

    /// Largest representable sample.
    pub fn max_sample(&self) -> i64 {
        (1i64 << (self.bits_per_sample.clamp(1, 32) - 1)) - 1
    }
}

/// A run of interleaved PCM samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    spec: PcmSpec,
    samples: Vec<i32>,
}

impl PcmFrame {
    /// Create a frame from interleaved samples.
    ///
    /// Fails if the sample count is not a multiple of the channel count.
    pub fn new(spec: PcmSpec, samples: Vec<i32>) -> Result<Self> {
        if spec.channels == 0 {
            return Err(Error::invalid_param("frame with zero channels"));
        }
        if samples.len() % spec.channels as usize != 0 {
            return Err(Error::invalid_param(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                spec.channels
            )));
        }
        Ok(Self { spec, samples })
    }

    /// An empty frame, used to signal end of stream.
    pub fn empty(spec: PcmSpec) -> Self {
        Self {
            spec,
            samples: Vec::new(),
        }
    }

    /// Interleave per-channel sample vectors.
    pub fn from_channels(spec: PcmSpec, channels: &[Vec<i32>]) -> Result<Self> {
        if channels.len() != spec.channels as usize {
            return Err(Error::invalid_param(format!(
                "expected {} channels, got {}",
                spec.channels,
                channels.len()
            )));
        }
        let frames = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(Error::invalid_param("channels differ in length"));
        }

        let mut samples = Vec::with_capacity(frames * channels.len());
        for i in 0..frames {
            samples.extend(channels.iter().map(|c| c[i]));
        }
        Ok(Self { spec, samples })
    }

    /// Stream description.
    pub fn spec(&self) -> &PcmSpec {
        &self.spec
    }

    /// Number of channels.
    pub fn channels(&self) -> u16 {
        self.spec.channels
    }

    /// Bits per sample.
    pub fn bits_per_sample(&self) -> u16 {
        self.spec.bits_per_sample
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.spec.channels.max(1) as usize
    }

    /// Check if the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    /// Take the interleaved samples.
    pub fn into_samples(self) -> Vec<i32> {
        self.samples
    }

    /// Copy out one channel.
    pub fn channel(&self, index: usize) -> Vec<i32> {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.spec.channels.max(1) as usize)
            .copied()
            .collect()
    }

    /// Split into per-channel vectors.
    pub fn deinterleave(&self) -> Vec<Vec<i32>> {
        (0..self.spec.channels as usize)
            .map(|c| self.channel(c))
            .collect()
    }

    /// Serialize as RIFF/WAVE PCM bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let width = self.spec.bytes_per_sample();
        let mut out = vec![0u8; self.samples.len() * width];
        for (chunk, &s) in out.chunks_exact_mut(width).zip(&self.samples) {
            match width {
                1 => chunk[0] = (s + 128) as u8,
                2 => LittleEndian::write_i16(chunk, s as i16),
                3 => LittleEndian::write_i24(chunk, s),
                _ => LittleEndian::write_i32(chunk, s),
            }
        }
        out
    }

    /// Parse RIFF/WAVE PCM bytes.
    pub fn from_le_bytes(spec: PcmSpec, bytes: &[u8]) -> Result<Self> {
        let width = spec.bytes_per_sample();
        if width == 0 || bytes.len() % spec.block_align().max(1) != 0 {
            return Err(Error::invalid_param("byte count is not a whole number of frames"));
        }
        let samples = bytes
            .chunks_exact(width)
            .map(|chunk| match width {
                1 => chunk[0] as i32 - 128,
                2 => LittleEndian::read_i16(chunk) as i32,
                3 => LittleEndian::read_i24(chunk),
                _ => LittleEndian::read_i32(chunk),
            })
            .collect();
        Self::new(spec, samples)
    }
}

/// A producer of PCM frames.
pub trait PcmSource {
    /// Stream description; constant for the life of the source.
    fn spec(&self) -> PcmSpec;

    /// Read up to `max_frames` samples per channel.
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    fn read_frames(&mut self, max_frames: usize) -> Result<Option<PcmFrame>>;
}

/// A [`PcmSource`] over interleaved samples held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    spec: PcmSpec,
    samples: Vec<i32>,
    position: usize,
}

impl MemorySource {
    /// Wrap interleaved samples.
    pub fn new(spec: PcmSpec, samples: Vec<i32>) -> Result<Self> {
        let frame = PcmFrame::new(spec, samples)?;
        Ok(Self {
            spec,
            samples: frame.into_samples(),
            position: 0,
        })
    }
}

impl PcmSource for MemorySource {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn read_frames(&mut self, max_frames: usize) -> Result<Option<PcmFrame>> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }
        let channels = self.spec.channels as usize;
        let end = (self.position + max_frames.max(1) * channels).min(self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        PcmFrame::new(self.spec, chunk).map(Some)
    }
}
