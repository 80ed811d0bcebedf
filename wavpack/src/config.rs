//! Encoder and decoder settings.

use crate::error::{Result, WavPackError};
use serde::{Deserialize, Serialize};

/// Pass counts with a built-in term table.
pub const SUPPORTED_PASS_COUNTS: [usize; 6] = [0, 1, 2, 5, 10, 16];

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Samples per channel in each block.
    pub block_size: usize,
    /// Decorrelation passes per block; one of [`SUPPORTED_PASS_COUNTS`].
    pub correlation_passes: usize,
    /// Store channel pairs as mid/side.
    pub joint_stereo: bool,
    /// Append a block carrying the MD5 of the PCM.
    pub write_md5: bool,
    /// Store a RIFF/WAVE header and trailer alongside the audio.
    pub wrap_riff: bool,
    /// Encode the channel groups of a block in parallel.
    pub parallel_groups: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            block_size: 22050,
            correlation_passes: 5,
            joint_stereo: true,
            write_md5: true,
            wrap_riff: false,
            parallel_groups: true,
        }
    }
}

impl EncoderConfig {
    /// Set the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the number of decorrelation passes.
    pub fn with_correlation_passes(mut self, passes: usize) -> Self {
        self.correlation_passes = passes;
        self
    }

    /// Enable or disable mid/side coding.
    pub fn with_joint_stereo(mut self, enabled: bool) -> Self {
        self.joint_stereo = enabled;
        self
    }

    /// Enable or disable the trailing MD5 block.
    pub fn with_md5(mut self, enabled: bool) -> Self {
        self.write_md5 = enabled;
        self
    }

    /// Enable or disable RIFF wrapping.
    pub fn with_riff_wrapper(mut self, enabled: bool) -> Self {
        self.wrap_riff = enabled;
        self
    }

    /// Enable or disable parallel group encoding.
    pub fn with_parallel_groups(mut self, enabled: bool) -> Self {
        self.parallel_groups = enabled;
        self
    }

    /// Check the settings before any output is produced.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > u32::MAX as usize {
            return Err(WavPackError::InvalidParameter(format!(
                "block size {} out of range",
                self.block_size
            )));
        }
        if !SUPPORTED_PASS_COUNTS.contains(&self.correlation_passes) {
            return Err(WavPackError::InvalidParameter(format!(
                "{} correlation passes; expected one of {:?}",
                self.correlation_passes, SUPPORTED_PASS_COUNTS
            )));
        }
        Ok(())
    }
}

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Reject blocks whose checksum does not match.
    pub verify_crc: bool,
    /// Decode the channel groups of a block in parallel.
    pub parallel_groups: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            verify_crc: true,
            parallel_groups: true,
        }
    }
}

impl DecoderConfig {
    /// Enable or disable checksum verification.
    pub fn with_crc_verification(mut self, enabled: bool) -> Self {
        self.verify_crc = enabled;
        self
    }

    /// Enable or disable parallel group decoding.
    pub fn with_parallel_groups(mut self, enabled: bool) -> Self {
        self.parallel_groups = enabled;
        self
    }
}
