//! WavPack codec error types.

use thiserror::Error;

/// WavPack codec error.
#[derive(Debug, Error)]
pub enum WavPackError {
    /// Bad magic, inconsistent size accounting, or a structurally invalid field.
    #[error("Malformed block: {0}")]
    MalformedBlock(String),

    /// A sub-block required for decoding is absent.
    #[error("Missing required sub-block: {0}")]
    MissingSubBlock(&'static str),

    /// A decorrelation term outside {1..8, 17, 18, -1, -2, -3}, or a cross-channel
    /// term in a single-channel block.
    #[error("Unsupported decorrelation term: {0}")]
    UnsupportedTerm(i32),

    /// More decorrelation passes than the format allows.
    #[error("Invalid decorrelation pass count: {0}")]
    InvalidPassCount(usize),

    /// Sample-rate code 15 with no sample-rate or RIFF sub-block to recover it from.
    #[error("Sample rate is not encoded in any supported form")]
    UnsupportedSampleRateEncoding,

    /// Read past the end of the stream or of a bounded region.
    #[error("Truncated stream")]
    Truncated,

    /// Per-block checksum disagrees with the decoded samples.
    #[error("Block CRC mismatch: stored {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch { expected: u32, computed: u32 },

    /// The trailing MD5 digest disagrees with the decoded PCM.
    #[error("MD5 mismatch: stored {expected}, computed {computed}")]
    IntegrityMismatch { expected: String, computed: String },

    /// The encoder's sink cannot seek back to patch block headers.
    #[error("Output does not support seeking")]
    SeekUnsupported,

    /// Caller supplied an unusable parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WavPackError {
    /// Create a malformed-block error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        WavPackError::MalformedBlock(msg.into())
    }

    /// Whether the stream must be abandoned after this error.
    ///
    /// Only an MD5 integrity mismatch leaves the decoded output usable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WavPackError::IntegrityMismatch { .. })
    }
}

impl From<wavpack_core::Error> for WavPackError {
    fn from(err: wavpack_core::Error) -> Self {
        if err.is_truncation() {
            return WavPackError::Truncated;
        }
        match err {
            wavpack_core::Error::Io(e) => WavPackError::Io(e),
            wavpack_core::Error::InvalidParameter(msg) => WavPackError::InvalidParameter(msg),
            other => WavPackError::MalformedBlock(other.to_string()),
        }
    }
}

/// WavPack result type.
pub type Result<T> = std::result::Result<T, WavPackError>;

#[cfg(test)]
mod tests {
    use super::*;
    use wavpack_core::BitstreamError;

    #[test]
    fn test_core_error_mapping() {
        let err: WavPackError = wavpack_core::Error::from(BitstreamError::UnexpectedEnd).into();
        assert!(matches!(err, WavPackError::Truncated));

        let err: WavPackError = wavpack_core::Error::from(BitstreamError::MarkAlreadySet).into();
        assert!(matches!(err, WavPackError::MalformedBlock(_)));
    }

    #[test]
    fn test_is_fatal() {
        assert!(WavPackError::Truncated.is_fatal());
        assert!(WavPackError::SeekUnsupported.is_fatal());
        let mismatch = WavPackError::IntegrityMismatch {
            expected: "00".into(),
            computed: "11".into(),
        };
        assert!(!mismatch.is_fatal());
    }
}
