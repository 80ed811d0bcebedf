//! Bitstream reading and writing utilities.
//!
//! WavPack packs every field little-endian: multi-byte values store their low byte
//! first and, within a byte, the first field occupies the least significant bits.
//! The reader and writer here follow that order for every operation, so a 32-bit
//! flag word read with [`BitReader::read_bits`] and one assembled field by field
//! decode to the same value.

use crate::error::{BitstreamError, Result};

/// A checkpoint in a [`BitReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    byte_pos: usize,
    bit_pos: u8,
}

/// A little-endian bitstream reader over a byte slice.
///
/// A reader never reads past the end of its slice: every access past the limit fails
/// with [`BitstreamError::UnexpectedEnd`]. Bounded views of the remaining bytes are
/// produced with [`BitReader::substream`].
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
    mark: Option<Checkpoint>,
}

impl<'a> BitReader<'a> {
    /// Create a new bit reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
            mark: None,
        }
    }

    /// Get the total number of bits in the stream.
    pub fn total_bits(&self) -> usize {
        self.data.len() * 8
    }

    /// Get the current bit position in the stream.
    pub fn position(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// Get the number of remaining bits.
    pub fn remaining_bits(&self) -> usize {
        self.total_bits().saturating_sub(self.position())
    }

    /// Check if we've reached the end of the stream.
    pub fn is_eof(&self) -> bool {
        self.byte_pos >= self.data.len()
    }

    /// Check if the stream is byte-aligned.
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// Skip to the next byte boundary.
    pub fn byte_align(&mut self) {
        if self.bit_pos != 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self
            .data
            .get(self.byte_pos)
            .ok_or(BitstreamError::UnexpectedEnd)?;

        let bit = (byte >> self.bit_pos) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(bit != 0)
    }

    /// Read up to 32 bits as an unsigned integer.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(BitstreamError::FieldTooWide(n).into());
        }
        self.read_bits_u64(n).map(|v| v as u32)
    }

    /// Read up to 64 bits as an unsigned integer.
    pub fn read_bits_u64(&mut self, n: u32) -> Result<u64> {
        if n == 0 {
            return Ok(0);
        }
        if n > 64 {
            return Err(BitstreamError::FieldTooWide(n).into());
        }
        if self.remaining_bits() < n as usize {
            return Err(BitstreamError::UnexpectedEnd.into());
        }

        let mut value: u64 = 0;
        let mut filled = 0u32;
        while filled < n {
            let available = 8 - self.bit_pos as u32;
            let take = available.min(n - filled);
            let chunk = (self.data[self.byte_pos] >> self.bit_pos) as u64 & ((1u64 << take) - 1);
            value |= chunk << filled;
            filled += take;

            self.bit_pos += take as u8;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }

        Ok(value)
    }

    /// Read a two's complement signed field of `n` bits (1..=64).
    pub fn read_signed(&mut self, n: u32) -> Result<i64> {
        if n == 0 {
            return Err(BitstreamError::FieldTooWide(0).into());
        }
        let raw = self.read_bits_u64(n)?;
        let shift = 64 - n;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Count bits until `stop_bit` is read; the stop bit is consumed.
    pub fn read_unary(&mut self, stop_bit: bool) -> Result<u32> {
        let mut count = 0u32;
        while self.read_bit()? != stop_bit {
            count += 1;
        }
        Ok(count)
    }

    /// Like [`BitReader::read_unary`], failing once the run exceeds `limit` bits.
    pub fn read_unary_limited(&mut self, stop_bit: bool, limit: u32) -> Result<u32> {
        let mut count = 0u32;
        while self.read_bit()? != stop_bit {
            count += 1;
            if count > limit {
                return Err(BitstreamError::UnaryOverflow(limit).into());
            }
        }
        Ok(count)
    }

    /// Read a byte-aligned unsigned 8-bit value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8).map(|v| v as u8)
    }

    /// Read an unsigned 16-bit value (little-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_bits(16).map(|v| v as u16)
    }

    /// Read an unsigned 32-bit value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_bits(32)
    }

    /// Skip a number of bits.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining_bits() < n {
            return Err(BitstreamError::UnexpectedEnd.into());
        }

        let new_pos = self.position() + n;
        self.byte_pos = new_pos / 8;
        self.bit_pos = (new_pos % 8) as u8;

        Ok(())
    }

    /// Read `len` whole bytes, starting at the next byte boundary.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.byte_align();
        let end = self
            .byte_pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(BitstreamError::UnexpectedEnd)?;
        let bytes = &self.data[self.byte_pos..end];
        self.byte_pos = end;
        Ok(bytes)
    }

    /// Split off a bounded reader over the next `len` bytes.
    ///
    /// The parent advances past the substream. Reads beyond the substream's own end
    /// fail even if the parent still holds data.
    pub fn substream(&mut self, len: usize) -> Result<BitReader<'a>> {
        self.byte_align();
        let available = self.data.len().saturating_sub(self.byte_pos);
        if len > available {
            return Err(BitstreamError::SubstreamOverrun {
                requested: len,
                available,
            }
            .into());
        }
        let bytes = self.read_bytes(len)?;
        Ok(BitReader::new(bytes))
    }

    /// Remember the current position.
    ///
    /// Only one checkpoint is held at a time; a second `mark()` before `unmark()`
    /// fails with [`BitstreamError::MarkAlreadySet`].
    pub fn mark(&mut self) -> Result<()> {
        if self.mark.is_some() {
            return Err(BitstreamError::MarkAlreadySet.into());
        }
        self.mark = Some(Checkpoint {
            byte_pos: self.byte_pos,
            bit_pos: self.bit_pos,
        });
        Ok(())
    }

    /// Return to the held checkpoint, keeping it.
    pub fn rewind(&mut self) -> Result<()> {
        let checkpoint = self.mark.ok_or(BitstreamError::NoMark)?;
        self.byte_pos = checkpoint.byte_pos;
        self.bit_pos = checkpoint.bit_pos;
        Ok(())
    }

    /// Drop the held checkpoint.
    pub fn unmark(&mut self) -> Result<()> {
        self.mark.take().map(|_| ()).ok_or(BitstreamError::NoMark.into())
    }

    /// Check whether a checkpoint is held.
    pub fn is_marked(&self) -> bool {
        self.mark.is_some()
    }

    /// Get the underlying byte slice from the current position.
    pub fn remaining_bytes(&self) -> &'a [u8] {
        if self.bit_pos == 0 {
            &self.data[self.byte_pos.min(self.data.len())..]
        } else {
            &self.data[(self.byte_pos + 1).min(self.data.len())..]
        }
    }
}

/// A little-endian bitstream writer.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_pos: u8,
}

impl BitWriter {
    /// Create a new bit writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new bit writer with capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            bit_pos: 0,
        }
    }

    /// Get the current bit position.
    pub fn position(&self) -> usize {
        if self.bit_pos == 0 {
            self.data.len() * 8
        } else {
            (self.data.len() - 1) * 8 + self.bit_pos as usize
        }
    }

    /// Check if the writer is byte-aligned.
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// Write a single bit.
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits_u64(bit as u64, 1);
    }

    /// Write the low `n` bits (up to 32) of `value`.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        self.write_bits_u64(value as u64, n.min(32));
    }

    /// Write the low `n` bits (up to 64) of `value`.
    pub fn write_bits_u64(&mut self, value: u64, n: u32) {
        let n = n.min(64);
        let mut written = 0u32;
        while written < n {
            if self.bit_pos == 0 {
                self.data.push(0);
            }
            let room = 8 - self.bit_pos as u32;
            let take = room.min(n - written);
            let chunk = ((value >> written) & ((1u64 << take) - 1)) as u8;
            if let Some(last) = self.data.last_mut() {
                *last |= chunk << self.bit_pos;
            }
            written += take;
            self.bit_pos = ((self.bit_pos as u32 + take) % 8) as u8;
        }
    }

    /// Write a two's complement signed field of `n` bits.
    pub fn write_signed(&mut self, value: i64, n: u32) {
        self.write_bits_u64(value as u64, n);
    }

    /// Write `count` bits that differ from `stop_bit`, then `stop_bit`.
    pub fn write_unary(&mut self, stop_bit: bool, count: u32) {
        for _ in 0..count {
            self.write_bit(!stop_bit);
        }
        self.write_bit(stop_bit);
    }

    /// Write an unsigned 8-bit value.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u32, 8);
    }

    /// Write an unsigned 16-bit value (little-endian).
    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u32, 16);
    }

    /// Write an unsigned 32-bit value (little-endian).
    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value, 32);
    }

    /// Write whole bytes, starting at the next byte boundary.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.byte_align();
        self.data.extend_from_slice(bytes);
    }

    /// Align to byte boundary by writing zero bits.
    pub fn byte_align(&mut self) {
        self.bit_pos = 0;
    }

    /// Get the written data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of whole or partial bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the written data, consuming the writer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
