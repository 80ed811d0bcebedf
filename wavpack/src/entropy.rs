//! Adaptive residual coder.
//!
//! Each channel tracks three medians (fixed point, 4 fractional bits). A residual's
//! magnitude falls into a bucket sized by the medians: bucket 0 is `m0>>4 + 1` wide,
//! bucket 1 is `m1>>4 + 1` wide and every later bucket `m2>>4 + 1`. The bucket index
//! is sent as a unary count whose low bit announces whether the next bucket index is
//! non-zero; a zero announced that way costs no unary bits at all. The position
//! within the bucket uses a truncated binary code, and a sign bit follows.
//!
//! While both channels' first medians sit below 2 and no announcement is pending,
//! a run of exact zeros is sent as a single Elias-gamma length, after which all
//! medians restart from zero.

use crate::error::{Result, WavPackError};
use crate::tables::{exp2, log2};
use wavpack_core::{BitReader, BitWriter};

/// Unary counts at this length continue with an Elias-gamma extension.
const UNARY_ESCAPE: u64 = 16;

/// Longest Elias-gamma prefix a valid stream can contain.
const MAX_EGC_PREFIX: u32 = 64;

/// Three running magnitude estimates for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Medians(pub [i64; 3]);

impl Medians {
    #[inline]
    fn width(&self, level: usize) -> i64 {
        (self.0[level] >> 4).saturating_add(1)
    }

    #[inline]
    fn grow(&mut self, level: usize) {
        let (bias, shift) = [(128, 7), (64, 6), (32, 5)][level];
        let m = self.0[level];
        self.0[level] = m.saturating_add((m.saturating_add(bias) >> shift).saturating_mul(5));
    }

    #[inline]
    fn decay(&mut self, level: usize) {
        let (bias, shift) = [(126, 7), (62, 6), (30, 5)][level];
        let m = self.0[level];
        self.0[level] = m.saturating_sub((m.saturating_add(bias) >> shift).saturating_mul(2));
    }

    /// Enter bucket `index`: returns its base magnitude and the largest offset
    /// within it, then adapts the medians.
    pub fn bucket(&mut self, index: u64) -> (i64, i64) {
        let w0 = self.width(0);
        let w1 = self.width(1);
        let w2 = self.width(2);
        match index {
            0 => {
                let add = self.0[0] >> 4;
                self.decay(0);
                (0, add)
            }
            1 => {
                let add = self.0[1] >> 4;
                self.grow(0);
                self.decay(1);
                (w0, add)
            }
            2 => {
                let add = self.0[2] >> 4;
                self.grow(0);
                self.grow(1);
                self.decay(2);
                (w0.saturating_add(w1), add)
            }
            n => {
                let add = self.0[2] >> 4;
                self.grow(0);
                self.grow(1);
                self.grow(2);
                let extra = i64::try_from(n - 2).unwrap_or(i64::MAX);
                (w0.saturating_add(w1).saturating_add(w2.saturating_mul(extra)), add)
            }
        }
    }

    /// Bucket index holding magnitude `u`, without adapting.
    pub fn bucket_index(&self, u: i64) -> u64 {
        let w0 = self.width(0);
        if u < w0 {
            return 0;
        }
        let u = u - w0;
        let w1 = self.width(1);
        if u < w1 {
            return 1;
        }
        2 + ((u - w1) / self.width(2)) as u64
    }
}

/// Entropy state of one channel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntropyState {
    pub medians: [Medians; 2],
}

impl EntropyState {
    /// Parse the entropy sub-block; single-channel blocks leave the second channel
    /// at zero.
    pub fn parse(data: &[u8], stereo: bool) -> Result<Self> {
        let channels = if stereo { 2 } else { 1 };
        if data.len() < channels * 6 {
            return Err(WavPackError::malformed(format!(
                "entropy sub-block holds {} bytes, need {}",
                data.len(),
                channels * 6
            )));
        }

        let mut reader = BitReader::new(data);
        let mut state = Self::default();
        for medians in state.medians.iter_mut().take(channels) {
            for m in medians.0.iter_mut() {
                *m = exp2(reader.read_signed(16)? as i32);
            }
        }
        Ok(state)
    }

    /// Serialize the medians, replacing each with its stored precision.
    pub fn write(&mut self, stereo: bool) -> Vec<u8> {
        let channels = if stereo { 2 } else { 1 };
        let mut out = Vec::with_capacity(channels * 6);
        for medians in self.medians.iter_mut().take(channels) {
            for m in medians.0.iter_mut() {
                let stored = log2(*m);
                *m = exp2(stored);
                out.extend_from_slice(&(stored as i16).to_le_bytes());
            }
        }
        out
    }

    fn zero_run_allowed(&self) -> bool {
        self.medians[0].0[0] < 2 && self.medians[1].0[0] < 2
    }

    fn reset(&mut self) {
        self.medians = [Medians::default(); 2];
    }
}

/// Holding flags carried between consecutive residuals.
#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    zero: bool,
    one: bool,
}

fn read_egc(reader: &mut BitReader<'_>) -> Result<u64> {
    let prefix = reader.read_unary_limited(false, MAX_EGC_PREFIX)?;
    if prefix > 1 {
        let low = reader.read_bits_u64(prefix - 1)?;
        Ok((1u64 << (prefix - 1)) | low)
    } else {
        Ok(prefix as u64)
    }
}

fn write_egc(writer: &mut BitWriter, value: u64) {
    if value < 2 {
        writer.write_unary(false, value as u32);
    } else {
        let bits = 64 - value.leading_zeros();
        writer.write_unary(false, bits);
        writer.write_bits_u64(value, bits - 1);
    }
}

fn read_count(reader: &mut BitReader<'_>) -> Result<u64> {
    let count = reader.read_unary(false)? as u64;
    if count == UNARY_ESCAPE {
        Ok(count.saturating_add(read_egc(reader)?))
    } else {
        Ok(count)
    }
}

fn write_count(writer: &mut BitWriter, count: u64) {
    if count < UNARY_ESCAPE {
        writer.write_unary(false, count as u32);
    } else {
        writer.write_unary(false, UNARY_ESCAPE as u32);
        write_egc(writer, count - UNARY_ESCAPE);
    }
}

/// Truncated binary code for an offset in `0..=add`.
fn read_offset(reader: &mut BitReader<'_>, add: i64) -> Result<i64> {
    if add < 1 {
        return Ok(0);
    }
    let add = add as u64;
    let p = 63 - add.leading_zeros();
    let e = (1u64 << (p + 1)) - add - 1;
    let r = reader.read_bits_u64(p)?;
    let value = if r >= e {
        (r * 2 - e) + reader.read_bit()? as u64
    } else {
        r
    };
    Ok(i64::try_from(value).unwrap_or(i64::MAX))
}

fn write_offset(writer: &mut BitWriter, offset: i64, add: i64) {
    if add < 1 {
        return;
    }
    let (add, offset) = (add as u64, offset as u64);
    let p = 63 - add.leading_zeros();
    let e = (1u64 << (p + 1)) - add - 1;
    if offset < e {
        writer.write_bits_u64(offset, p);
    } else {
        writer.write_bits_u64((offset + e) >> 1, p);
        writer.write_bit((offset + e) & 1 == 1);
    }
}

fn read_residual(
    reader: &mut BitReader<'_>,
    holding: &mut Holding,
    medians: &mut Medians,
) -> Result<i64> {
    let index = if holding.zero {
        holding.zero = false;
        0
    } else {
        let count = read_count(reader)?;
        let index = if holding.one {
            (count >> 1) + 1
        } else {
            count >> 1
        };
        holding.one = count & 1 == 1;
        holding.zero = !holding.one;
        index
    };

    let (base, add) = medians.bucket(index);
    let magnitude = base.saturating_add(read_offset(reader, add)?);
    if reader.read_bit()? {
        Ok(!magnitude)
    } else {
        Ok(magnitude)
    }
}

/// Decode `samples_per_channel` residuals for each of `channels` (1 or 2)
/// interleaved channels.
pub fn decode_residuals(
    reader: &mut BitReader<'_>,
    state: &mut EntropyState,
    channels: usize,
    samples_per_channel: usize,
) -> Result<Vec<Vec<i64>>> {
    let total = samples_per_channel * channels;
    let mut out = vec![Vec::with_capacity(samples_per_channel); channels];
    let mut holding = Holding::default();
    let mut i = 0;

    while i < total {
        if !holding.zero && !holding.one && state.zero_run_allowed() {
            let run = read_egc(reader)?;
            if run > 0 {
                let run = usize::try_from(run).unwrap_or(usize::MAX);
                if run > total - i {
                    return Err(WavPackError::malformed(format!(
                        "zero run of {} exceeds the {} residuals left",
                        run,
                        total - i
                    )));
                }
                for _ in 0..run {
                    out[i % channels].push(0);
                    i += 1;
                }
                state.reset();
            }
            if i == total {
                break;
            }
        }
        let residual = read_residual(reader, &mut holding, &mut state.medians[i % channels])?;
        out[i % channels].push(residual);
        i += 1;
    }
    Ok(out)
}

/// A residual whose bucket index is known but not yet written.
#[derive(Debug, Clone, Copy)]
struct Coded {
    index: u64,
    offset: i64,
    add: i64,
    negative: bool,
    holding_one: bool,
}

impl Coded {
    fn classify(medians: &mut Medians, value: i64) -> Self {
        let negative = value < 0;
        let magnitude = if negative { !value } else { value };
        let index = medians.bucket_index(magnitude);
        let (base, add) = medians.bucket(index);
        Self {
            index,
            offset: magnitude - base,
            add,
            negative,
            holding_one: false,
        }
    }

    fn write_tail(&self, writer: &mut BitWriter) {
        write_offset(writer, self.offset, self.add);
        writer.write_bit(self.negative);
    }

    /// Write the unary count, announcing whether the next index is non-zero.
    fn flush(&self, writer: &mut BitWriter, next_nonzero: bool) {
        let count = 2 * (self.index - self.holding_one as u64) + next_nonzero as u64;
        write_count(writer, count);
        self.write_tail(writer);
    }
}

/// Encode interleaved residuals of one or two channels.
///
/// The medians adapt exactly as [`decode_residuals`] will adapt them.
pub fn encode_residuals(
    writer: &mut BitWriter,
    state: &mut EntropyState,
    channels: &[Vec<i64>],
) -> Result<()> {
    let count = channels.len();
    if count == 0 || count > 2 {
        return Err(WavPackError::InvalidParameter(format!(
            "residual coder takes 1 or 2 channels, got {}",
            count
        )));
    }
    let per_channel = channels[0].len();
    if channels.iter().any(|c| c.len() != per_channel) {
        return Err(WavPackError::InvalidParameter("channels differ in length".into()));
    }

    let total = per_channel * count;
    let sample = |i: usize| channels[i % count][i / count];
    let mut pending: Option<Coded> = None;
    let mut i = 0;

    while i < total {
        if pending.is_none() && state.zero_run_allowed() {
            let run = (i..total).take_while(|&j| sample(j) == 0).count();
            write_egc(writer, run as u64);
            if run > 0 {
                state.reset();
                i += run;
                if i == total {
                    break;
                }
            }
            pending = Some(Coded::classify(&mut state.medians[i % count], sample(i)));
            i += 1;
            continue;
        }

        let mut coded = Coded::classify(&mut state.medians[i % count], sample(i));
        match pending.take() {
            Some(previous) => {
                let nonzero = coded.index > 0;
                previous.flush(writer, nonzero);
                if nonzero {
                    coded.holding_one = true;
                    pending = Some(coded);
                } else {
                    coded.write_tail(writer);
                }
            }
            None => pending = Some(coded),
        }
        i += 1;
    }

    if let Some(previous) = pending {
        previous.flush(writer, false);
    }
    Ok(())
}
