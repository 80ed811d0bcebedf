//! Extended integers: low bits shared by every sample of a block.
//!
//! A block whose samples all end in the same pattern of low bits is stored shifted
//! right, and the pattern is restored after decorrelation. Three patterns exist:
//! all zeros, all ones, or a copy of the lowest kept bit.

use crate::error::{Result, WavPackError};

/// Widest shift a block may declare.
pub const MAX_SHIFT: u8 = 31;

/// The extended-integer descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedIntegers {
    /// Bits sent verbatim; unused by integer PCM and always written as zero.
    pub sent: u8,
    /// Low bits restored as zeros.
    pub zeros: u8,
    /// Low bits restored as ones.
    pub ones: u8,
    /// Low bits restored as copies of the lowest kept bit.
    pub dups: u8,
}

impl ExtendedIntegers {
    /// Find the pattern that removes the most bits from `channels`.
    ///
    /// Zero fill is preferred, then one fill, then duplicated bits. Returns `None`
    /// when no low bits can be removed.
    pub fn detect(channels: &[&[i64]]) -> Option<Self> {
        let samples = || channels.iter().flat_map(|c| c.iter().copied());
        if samples().all(|s| s == 0) {
            return None;
        }

        let zeros = samples()
            .filter(|&s| s != 0)
            .map(|s| s.trailing_zeros())
            .min()
            .map_or(0, |k| k.min(MAX_SHIFT as u32) as u8);
        if zeros > 0 {
            return Some(Self {
                zeros,
                ..Self::default()
            });
        }

        let ones = samples()
            .map(|s| s.trailing_ones())
            .min()
            .map_or(0, |k| k.min(MAX_SHIFT as u32) as u8);
        if ones > 0 {
            return Some(Self {
                ones,
                ..Self::default()
            });
        }

        // one kept bit plus `dups` copies of it
        let dups = samples()
            .map(|s| if s & 1 == 0 { s.trailing_zeros() } else { s.trailing_ones() })
            .min()
            .map_or(0, |run| run.saturating_sub(1).min(MAX_SHIFT as u32) as u8);
        if dups > 0 {
            return Some(Self {
                dups,
                ..Self::default()
            });
        }
        None
    }

    /// Parse the four-byte payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let [sent, zeros, ones, dups] = match data {
            [a, b, c, d, ..] => [*a, *b, *c, *d],
            _ => {
                return Err(WavPackError::malformed(format!(
                    "extended-integer sub-block holds {} bytes",
                    data.len()
                )))
            }
        };
        let ext = Self {
            sent,
            zeros,
            ones,
            dups,
        };
        if ext.shift() > MAX_SHIFT {
            return Err(WavPackError::malformed(format!(
                "extended-integer shift of {} bits",
                ext.shift()
            )));
        }
        Ok(ext)
    }

    /// Serialize the payload.
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.sent, self.zeros, self.ones, self.dups]
    }

    /// Bits removed from each sample by the active pattern.
    pub fn shift(&self) -> u8 {
        if self.zeros > 0 {
            self.zeros
        } else if self.ones > 0 {
            self.ones
        } else {
            self.dups
        }
    }

    /// Drop the shared low bits.
    pub fn remove(&self, samples: &mut [i64]) {
        let k = self.shift();
        for s in samples.iter_mut() {
            *s >>= k;
        }
    }

    /// Restore the shared low bits.
    pub fn restore(&self, samples: &mut [i64]) {
        let k = self.shift() as u32;
        if k == 0 {
            return;
        }
        let mask = (1i64 << k) - 1;
        for s in samples.iter_mut() {
            let shifted = s.wrapping_shl(k);
            *s = if self.zeros > 0 {
                shifted
            } else if self.ones > 0 || *s & 1 == 1 {
                shifted | mask
            } else {
                shifted
            };
        }
    }
}
