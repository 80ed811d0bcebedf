//! Error types shared by the WavPack crates.
//!
//! The bit cursor and PCM helpers report failures through [`Error`]; the codec crate
//! maps these onto its own taxonomy.

use thiserror::Error;

/// Main error type for the core crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bitstream access errors.
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Bitstream access errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitstreamError {
    /// Unexpected end of bitstream.
    #[error("Unexpected end of bitstream")]
    UnexpectedEnd,

    /// A substream was requested that extends past the end of its parent.
    #[error("Substream of {requested} bytes exceeds the {available} remaining")]
    SubstreamOverrun { requested: usize, available: usize },

    /// Field wider than the cursor supports.
    #[error("Cannot access {0} bits in a single field")]
    FieldTooWide(u32),

    /// `mark()` called while a mark is already held.
    #[error("Nested mark: a checkpoint is already held")]
    MarkAlreadySet,

    /// `rewind()` or `unmark()` called without a mark.
    #[error("No checkpoint to rewind to")]
    NoMark,

    /// A unary run longer than the caller allowed.
    #[error("Unary run exceeds {0} bits")]
    UnaryOverflow(u32),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Check if this error means the data ran out.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            Error::Bitstream(BitstreamError::UnexpectedEnd)
                | Error::Bitstream(BitstreamError::SubstreamOverrun { .. })
        ) || matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
