//! Sub-block records inside a block payload.
//!
//! Each record starts with one id byte (5-bit function, then the non-decoder,
//! odd-size and large flags, least significant bit first) followed by an 8-bit or
//! 24-bit length counted in 16-bit words. Odd-sized payloads carry one pad byte.

use crate::error::{Result, WavPackError};
use wavpack_core::{BitReader, BitWriter};

const FLAG_NONDECODER: u8 = 0x20;
const FLAG_ODD_SIZE: u8 = 0x40;
const FLAG_LARGE: u8 = 0x80;
const FUNCTION_MASK: u8 = 0x1f;

/// Largest payload a small (8-bit length) record can hold.
const SMALL_MAX_BYTES: usize = 255 * 2;

/// Largest payload a large (24-bit length) record can hold.
const LARGE_MAX_BYTES: usize = 0x00FF_FFFF * 2;

/// Sub-block meaning, keyed by function code and the non-decoder flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubBlockId {
    /// Decorrelation terms and deltas.
    Terms,
    /// Decorrelation weights.
    Weights,
    /// Decorrelation history samples.
    Samples,
    /// Entropy medians.
    Entropy,
    /// Extended-integer descriptor.
    ExtendedIntegers,
    /// Residual bitstream.
    Bitstream,
    /// Channel count and mask.
    ChannelInfo,
    /// Wrapped RIFF header bytes.
    RiffHeader,
    /// Wrapped RIFF trailer bytes.
    RiffTrailer,
    /// MD5 of the decoded PCM.
    Md5,
    /// Sample rate for rates outside the header table.
    SampleRate,
    /// Anything else; skipped by the decoder.
    Unknown { function: u8, nondecoder: bool },
}

impl SubBlockId {
    /// Classify an id byte's function/flag pair.
    pub fn from_parts(function: u8, nondecoder: bool) -> Self {
        match (function, nondecoder) {
            (2, false) => SubBlockId::Terms,
            (3, false) => SubBlockId::Weights,
            (4, false) => SubBlockId::Samples,
            (5, false) => SubBlockId::Entropy,
            (9, false) => SubBlockId::ExtendedIntegers,
            (10, false) => SubBlockId::Bitstream,
            // accepted with either flag; written as decoder data
            (13, _) => SubBlockId::ChannelInfo,
            (1, true) => SubBlockId::RiffHeader,
            (2, true) => SubBlockId::RiffTrailer,
            (6, true) => SubBlockId::Md5,
            (7, true) => SubBlockId::SampleRate,
            (function, nondecoder) => SubBlockId::Unknown {
                function,
                nondecoder,
            },
        }
    }

    /// Function code and non-decoder flag for writing.
    pub fn parts(&self) -> (u8, bool) {
        match *self {
            SubBlockId::Terms => (2, false),
            SubBlockId::Weights => (3, false),
            SubBlockId::Samples => (4, false),
            SubBlockId::Entropy => (5, false),
            SubBlockId::ExtendedIntegers => (9, false),
            SubBlockId::Bitstream => (10, false),
            SubBlockId::ChannelInfo => (13, false),
            SubBlockId::RiffHeader => (1, true),
            SubBlockId::RiffTrailer => (2, true),
            SubBlockId::Md5 => (6, true),
            SubBlockId::SampleRate => (7, true),
            SubBlockId::Unknown {
                function,
                nondecoder,
            } => (function & FUNCTION_MASK, nondecoder),
        }
    }
}

/// One parsed sub-block, borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBlock<'a> {
    pub id: SubBlockId,
    /// Payload without the pad byte.
    pub data: &'a [u8],
}

impl<'a> SubBlock<'a> {
    /// A bit reader over the payload.
    pub fn reader(&self) -> BitReader<'a> {
        BitReader::new(self.data)
    }
}

/// Iterator over the sub-blocks of a block payload.
///
/// Yields an error (and then stops) if a record's length runs past the payload.
pub struct SubBlocks<'a> {
    reader: BitReader<'a>,
    failed: bool,
}

impl<'a> SubBlocks<'a> {
    /// Iterate the records in `payload`.
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(payload),
            failed: false,
        }
    }

    fn parse_next(&mut self) -> Result<SubBlock<'a>> {
        let overrun = |_| WavPackError::malformed("sub-block runs past the end of its block");

        let function = self.reader.read_bits(5).map_err(overrun)? as u8;
        let nondecoder = self.reader.read_bit().map_err(overrun)?;
        let odd_size = self.reader.read_bit().map_err(overrun)?;
        let large = self.reader.read_bit().map_err(overrun)?;
        let words = self
            .reader
            .read_bits(if large { 24 } else { 8 })
            .map_err(overrun)? as usize;

        let padded = words * 2;
        if odd_size && padded == 0 {
            return Err(WavPackError::malformed("odd-size flag on an empty sub-block"));
        }
        let region = self.reader.substream(padded).map_err(overrun)?;
        let bytes = region.remaining_bytes();
        let data = if odd_size { &bytes[..padded - 1] } else { bytes };

        let id = SubBlockId::from_parts(function, nondecoder);
        tracing::trace!(?id, len = data.len(), "sub-block");
        Ok(SubBlock { id, data })
    }
}

impl<'a> Iterator for SubBlocks<'a> {
    type Item = Result<SubBlock<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_eof() {
            return None;
        }
        let item = self.parse_next();
        self.failed = item.is_err();
        Some(item)
    }
}

/// Bytes a record with a `len`-byte payload occupies, header included.
pub fn encoded_len(len: usize) -> usize {
    let padded = len + (len & 1);
    if padded > SMALL_MAX_BYTES {
        4 + padded
    } else {
        2 + padded
    }
}

/// Append one record to `out`.
pub fn write_sub_block(out: &mut BitWriter, id: SubBlockId, payload: &[u8]) -> Result<()> {
    if payload.len() > LARGE_MAX_BYTES {
        return Err(WavPackError::InvalidParameter(format!(
            "sub-block payload of {} bytes is too large",
            payload.len()
        )));
    }

    let (function, nondecoder) = id.parts();
    let odd = payload.len() % 2 == 1;
    let words = payload.len().div_ceil(2);
    let large = words * 2 > SMALL_MAX_BYTES;

    let mut id_byte = function & FUNCTION_MASK;
    if nondecoder {
        id_byte |= FLAG_NONDECODER;
    }
    if odd {
        id_byte |= FLAG_ODD_SIZE;
    }
    if large {
        id_byte |= FLAG_LARGE;
    }

    out.byte_align();
    out.write_u8(id_byte);
    out.write_bits(words as u32, if large { 24 } else { 8 });
    out.write_bytes(payload);
    if odd {
        out.write_u8(0);
    }
    Ok(())
}
