//! Decorrelation passes.
//!
//! A block carries up to [`MAX_PASSES`] passes, each a weighted predictor with its own
//! history. The encoder applies them in stored order, turning samples into residuals;
//! the decoder undoes them starting from the last stored pass. Pass state (weights
//! and history) is written at the start of every block, quantized, so both sides
//! begin each block from identical values.

use crate::error::{Result, WavPackError};
use crate::tables::{exp2, log2};
use wavpack_core::BitReader;

/// Most passes a block may declare.
pub const MAX_PASSES: usize = 16;

/// Cross-channel weights stay within this magnitude.
pub const MAX_CROSS_WEIGHT: i32 = 1024;

/// Largest delta representable in the terms sub-block.
pub const MAX_DELTA: u8 = 7;

const HISTORY: usize = 8;

/// A prediction rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    /// Predict from the sample `n` positions back (1..=8).
    Lag(u8),
    /// Linear extrapolation, `2*s[-1] - s[-2]` (term 17).
    Extrapolate,
    /// Damped extrapolation, `(3*s[-1] - s[-2]) >> 1` (term 18).
    HalfExtrapolate,
    /// Left from the previous right, right from the current left (term -1).
    CrossLeft,
    /// Right from the previous left, left from the current right (term -2).
    CrossRight,
    /// Each channel from the other's previous sample (term -3).
    CrossBoth,
}

impl Term {
    /// Decode a stored term number.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1..=8 => Ok(Term::Lag(code as u8)),
            17 => Ok(Term::Extrapolate),
            18 => Ok(Term::HalfExtrapolate),
            -1 => Ok(Term::CrossLeft),
            -2 => Ok(Term::CrossRight),
            -3 => Ok(Term::CrossBoth),
            other => Err(WavPackError::UnsupportedTerm(other)),
        }
    }

    /// The stored term number.
    pub fn code(&self) -> i32 {
        match *self {
            Term::Lag(n) => n as i32,
            Term::Extrapolate => 17,
            Term::HalfExtrapolate => 18,
            Term::CrossLeft => -1,
            Term::CrossRight => -2,
            Term::CrossBoth => -3,
        }
    }

    /// Whether the term predicts one channel from the other.
    pub fn is_cross_channel(&self) -> bool {
        matches!(self, Term::CrossLeft | Term::CrossRight | Term::CrossBoth)
    }

    /// History samples per channel the term keeps.
    pub fn history_len(&self) -> usize {
        match *self {
            Term::Lag(n) => n as usize,
            Term::Extrapolate | Term::HalfExtrapolate => 2,
            Term::CrossLeft | Term::CrossRight | Term::CrossBoth => 1,
        }
    }
}

/// Fixed-point multiply by `weight / 1024`, rounded.
#[inline]
pub fn apply_weight(weight: i32, sample: i64) -> i64 {
    (weight as i64).wrapping_mul(sample).wrapping_add(512) >> 10
}

/// Weight adjustment after predicting `result` from `source`.
#[inline]
pub fn update_weight(source: i64, result: i64, delta: i32) -> i32 {
    if source == 0 || result == 0 {
        0
    } else if (source ^ result) >= 0 {
        delta
    } else {
        -delta
    }
}

/// Expand a stored 8-bit weight.
pub fn restore_weight(stored: i8) -> i32 {
    let weight = (stored as i32) << 3;
    if weight > 0 {
        weight + ((weight + 64) >> 7)
    } else {
        weight
    }
}

/// Compress a weight into its stored 8-bit form.
pub fn store_weight(weight: i32) -> i8 {
    let mut weight = weight.clamp(-MAX_CROSS_WEIGHT, MAX_CROSS_WEIGHT);
    if weight > 0 {
        weight -= (weight + 64) >> 7;
    }
    ((weight + 4) >> 3) as i8
}

#[inline]
fn update_cross(weight: &mut i32, source: i64, result: i64, delta: i32) {
    *weight = (*weight + update_weight(source, result, delta))
        .clamp(-MAX_CROSS_WEIGHT, MAX_CROSS_WEIGHT);
}

#[inline]
fn extrapolate(term: Term, history: &[i64; HISTORY]) -> i64 {
    match term {
        Term::Extrapolate => history[0].wrapping_mul(2).wrapping_sub(history[1]),
        _ => history[0].wrapping_mul(3).wrapping_sub(history[1]) >> 1,
    }
}

/// One decorrelation pass and its running state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecorrelationPass {
    pub term: Term,
    pub delta: u8,
    pub weight_a: i32,
    pub weight_b: i32,
    /// History for the first channel. Lag terms keep it oldest first; extrapolation
    /// terms keep the newest sample at index 0.
    pub samples_a: [i64; HISTORY],
    pub samples_b: [i64; HISTORY],
}

impl DecorrelationPass {
    /// A pass with zero weights and history.
    pub fn new(term: Term, delta: u8) -> Self {
        Self {
            term,
            delta: delta.min(MAX_DELTA),
            weight_a: 0,
            weight_b: 0,
            samples_a: [0; HISTORY],
            samples_b: [0; HISTORY],
        }
    }

    /// Undo this pass on one channel, turning residuals back into samples.
    pub fn decode_mono(&mut self, buffer: &mut [i64]) -> Result<()> {
        let delta = self.delta as i32;
        decode_channel(self.term, delta, &mut self.weight_a, &mut self.samples_a, buffer)
    }

    /// Apply this pass to one channel, turning samples into residuals.
    pub fn encode_mono(&mut self, buffer: &mut [i64]) -> Result<()> {
        let delta = self.delta as i32;
        encode_channel(self.term, delta, &mut self.weight_a, &mut self.samples_a, buffer)
    }

    /// Undo this pass on a channel pair.
    pub fn decode_stereo(&mut self, left: &mut [i64], right: &mut [i64]) -> Result<()> {
        let delta = self.delta as i32;
        match self.term {
            Term::CrossLeft => {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let prev_right = self.samples_a[0];
                    let new_left = l.wrapping_add(apply_weight(self.weight_a, prev_right));
                    update_cross(&mut self.weight_a, prev_right, *l, delta);
                    let new_right = r.wrapping_add(apply_weight(self.weight_b, new_left));
                    update_cross(&mut self.weight_b, new_left, *r, delta);
                    self.samples_a[0] = new_right;
                    *l = new_left;
                    *r = new_right;
                }
            }
            Term::CrossRight => {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let prev_left = self.samples_b[0];
                    let new_right = r.wrapping_add(apply_weight(self.weight_b, prev_left));
                    update_cross(&mut self.weight_b, prev_left, *r, delta);
                    let new_left = l.wrapping_add(apply_weight(self.weight_a, new_right));
                    update_cross(&mut self.weight_a, new_right, *l, delta);
                    self.samples_b[0] = new_left;
                    *l = new_left;
                    *r = new_right;
                }
            }
            Term::CrossBoth => {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let prev_right = self.samples_a[0];
                    let prev_left = self.samples_b[0];
                    let new_left = l.wrapping_add(apply_weight(self.weight_a, prev_right));
                    update_cross(&mut self.weight_a, prev_right, *l, delta);
                    let new_right = r.wrapping_add(apply_weight(self.weight_b, prev_left));
                    update_cross(&mut self.weight_b, prev_left, *r, delta);
                    self.samples_b[0] = new_left;
                    self.samples_a[0] = new_right;
                    *l = new_left;
                    *r = new_right;
                }
            }
            term => {
                decode_channel(term, delta, &mut self.weight_a, &mut self.samples_a, left)?;
                decode_channel(term, delta, &mut self.weight_b, &mut self.samples_b, right)?;
            }
        }
        Ok(())
    }

    /// Apply this pass to a channel pair.
    pub fn encode_stereo(&mut self, left: &mut [i64], right: &mut [i64]) -> Result<()> {
        let delta = self.delta as i32;
        match self.term {
            Term::CrossLeft => {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let (sample_left, sample_right) = (*l, *r);
                    let prev_right = self.samples_a[0];
                    let res_left = sample_left.wrapping_sub(apply_weight(self.weight_a, prev_right));
                    update_cross(&mut self.weight_a, prev_right, res_left, delta);
                    let res_right =
                        sample_right.wrapping_sub(apply_weight(self.weight_b, sample_left));
                    update_cross(&mut self.weight_b, sample_left, res_right, delta);
                    self.samples_a[0] = sample_right;
                    *l = res_left;
                    *r = res_right;
                }
            }
            Term::CrossRight => {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let (sample_left, sample_right) = (*l, *r);
                    let prev_left = self.samples_b[0];
                    let res_right = sample_right.wrapping_sub(apply_weight(self.weight_b, prev_left));
                    update_cross(&mut self.weight_b, prev_left, res_right, delta);
                    let res_left =
                        sample_left.wrapping_sub(apply_weight(self.weight_a, sample_right));
                    update_cross(&mut self.weight_a, sample_right, res_left, delta);
                    self.samples_b[0] = sample_left;
                    *l = res_left;
                    *r = res_right;
                }
            }
            Term::CrossBoth => {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let (sample_left, sample_right) = (*l, *r);
                    let prev_right = self.samples_a[0];
                    let prev_left = self.samples_b[0];
                    let res_left = sample_left.wrapping_sub(apply_weight(self.weight_a, prev_right));
                    update_cross(&mut self.weight_a, prev_right, res_left, delta);
                    let res_right = sample_right.wrapping_sub(apply_weight(self.weight_b, prev_left));
                    update_cross(&mut self.weight_b, prev_left, res_right, delta);
                    self.samples_b[0] = sample_left;
                    self.samples_a[0] = sample_right;
                    *l = res_left;
                    *r = res_right;
                }
            }
            term => {
                encode_channel(term, delta, &mut self.weight_a, &mut self.samples_a, left)?;
                encode_channel(term, delta, &mut self.weight_b, &mut self.samples_b, right)?;
            }
        }
        Ok(())
    }
}

fn decode_channel(
    term: Term,
    delta: i32,
    weight: &mut i32,
    history: &mut [i64; HISTORY],
    buffer: &mut [i64],
) -> Result<()> {
    match term {
        Term::Lag(n) => {
            let n = n as usize;
            let mut m = 0;
            for x in buffer.iter_mut() {
                let source = history[m];
                let sample = x.wrapping_add(apply_weight(*weight, source));
                history[(m + n) % HISTORY] = sample;
                *weight = weight.wrapping_add(update_weight(source, *x, delta));
                *x = sample;
                m = (m + 1) % HISTORY;
            }
            history.rotate_left(m);
        }
        Term::Extrapolate | Term::HalfExtrapolate => {
            for x in buffer.iter_mut() {
                let source = extrapolate(term, history);
                let sample = x.wrapping_add(apply_weight(*weight, source));
                history[1] = history[0];
                history[0] = sample;
                *weight = weight.wrapping_add(update_weight(source, *x, delta));
                *x = sample;
            }
        }
        cross => return Err(WavPackError::UnsupportedTerm(cross.code())),
    }
    Ok(())
}

fn encode_channel(
    term: Term,
    delta: i32,
    weight: &mut i32,
    history: &mut [i64; HISTORY],
    buffer: &mut [i64],
) -> Result<()> {
    match term {
        Term::Lag(n) => {
            let n = n as usize;
            let mut m = 0;
            for x in buffer.iter_mut() {
                let source = history[m];
                let residual = x.wrapping_sub(apply_weight(*weight, source));
                history[(m + n) % HISTORY] = *x;
                *weight = weight.wrapping_add(update_weight(source, residual, delta));
                *x = residual;
                m = (m + 1) % HISTORY;
            }
            history.rotate_left(m);
        }
        Term::Extrapolate | Term::HalfExtrapolate => {
            for x in buffer.iter_mut() {
                let source = extrapolate(term, history);
                let residual = x.wrapping_sub(apply_weight(*weight, source));
                history[1] = history[0];
                history[0] = *x;
                *weight = weight.wrapping_add(update_weight(source, residual, delta));
                *x = residual;
            }
        }
        cross => return Err(WavPackError::UnsupportedTerm(cross.code())),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sub-block payloads
// ---------------------------------------------------------------------------

/// Parse the terms sub-block into fresh passes, in stored order.
pub fn parse_terms(data: &[u8]) -> Result<Vec<DecorrelationPass>> {
    if data.len() > MAX_PASSES {
        return Err(WavPackError::InvalidPassCount(data.len()));
    }
    data.iter()
        .map(|&byte| {
            let term = Term::from_code((byte & 0x1f) as i32 - 5)?;
            Ok(DecorrelationPass::new(term, byte >> 5))
        })
        .collect()
}

/// Serialize pass terms and deltas.
pub fn write_terms(passes: &[DecorrelationPass]) -> Vec<u8> {
    passes
        .iter()
        .map(|p| (((p.term.code() + 5) as u8) & 0x1f) | (p.delta.min(MAX_DELTA) << 5))
        .collect()
}

/// Load stored weights into `passes`.
///
/// Passes without a stored weight keep a weight of zero.
pub fn parse_weights(data: &[u8], passes: &mut [DecorrelationPass], stereo: bool) -> Result<()> {
    let per_pass = if stereo { 2 } else { 1 };
    if stereo && data.len() % 2 != 0 {
        return Err(WavPackError::malformed("odd weight count in a stereo block"));
    }
    let count = data.len() / per_pass;
    if count > passes.len() {
        return Err(WavPackError::malformed(format!(
            "{} weights for {} passes",
            count,
            passes.len()
        )));
    }

    for (pass, chunk) in passes.iter_mut().zip(data.chunks_exact(per_pass)) {
        pass.weight_a = restore_weight(chunk[0] as i8);
        if stereo {
            pass.weight_b = restore_weight(chunk[1] as i8);
        }
    }
    Ok(())
}

/// Serialize weights, replacing each with its stored precision.
pub fn write_weights(passes: &mut [DecorrelationPass], stereo: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(passes.len() * 2);
    for pass in passes.iter_mut() {
        let a = store_weight(pass.weight_a);
        pass.weight_a = restore_weight(a);
        out.push(a as u8);
        if stereo {
            let b = store_weight(pass.weight_b);
            pass.weight_b = restore_weight(b);
            out.push(b as u8);
        }
    }
    out
}

/// History slots a pass stores, as (channel, index) pairs in write order.
fn history_layout(term: Term, stereo: bool) -> Vec<(usize, usize)> {
    match term {
        Term::Extrapolate | Term::HalfExtrapolate => {
            let mut slots = vec![(0, 0), (0, 1)];
            if stereo {
                slots.extend([(1, 0), (1, 1)]);
            }
            slots
        }
        Term::Lag(n) => (0..n as usize)
            .flat_map(|m| {
                let channels = if stereo { 2 } else { 1 };
                (0..channels).map(move |c| (c, m))
            })
            .collect(),
        Term::CrossLeft | Term::CrossRight | Term::CrossBoth => vec![(0, 0), (1, 0)],
    }
}

/// Load stored history into `passes`.
///
/// A pass whose history does not fit in the remaining bytes, and every pass after
/// it, keeps zero history.
pub fn parse_samples(data: &[u8], passes: &mut [DecorrelationPass], stereo: bool) -> Result<()> {
    if data.len() % 2 != 0 {
        return Err(WavPackError::malformed("odd-length decorrelation samples"));
    }
    let mut reader = BitReader::new(data);

    for pass in passes.iter_mut() {
        if !stereo && pass.term.is_cross_channel() {
            return Err(WavPackError::UnsupportedTerm(pass.term.code()));
        }
        let slots = history_layout(pass.term, stereo);
        if reader.remaining_bits() < slots.len() * 16 {
            break;
        }
        for (channel, index) in slots {
            let value = exp2(reader.read_signed(16)? as i32);
            if channel == 0 {
                pass.samples_a[index] = value;
            } else {
                pass.samples_b[index] = value;
            }
        }
    }
    Ok(())
}

/// Serialize history, replacing each value with its stored precision.
pub fn write_samples(passes: &mut [DecorrelationPass], stereo: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for pass in passes.iter_mut() {
        for (channel, index) in history_layout(pass.term, stereo) {
            let slot = if channel == 0 {
                &mut pass.samples_a[index]
            } else {
                &mut pass.samples_b[index]
            };
            let stored = log2(*slot);
            *slot = exp2(stored);
            out.extend_from_slice(&(stored as i16).to_le_bytes());
        }
    }
    out
}

/// Run every pass in reverse stored order over a single channel.
pub fn decode_passes_mono(passes: &mut [DecorrelationPass], buffer: &mut [i64]) -> Result<()> {
    for pass in passes.iter_mut().rev() {
        pass.decode_mono(buffer)?;
    }
    Ok(())
}

/// Run every pass in reverse stored order over a channel pair.
pub fn decode_passes_stereo(
    passes: &mut [DecorrelationPass],
    left: &mut [i64],
    right: &mut [i64],
) -> Result<()> {
    for pass in passes.iter_mut().rev() {
        pass.decode_stereo(left, right)?;
    }
    Ok(())
}

/// Run every pass in stored order over a single channel.
pub fn encode_passes_mono(passes: &mut [DecorrelationPass], buffer: &mut [i64]) -> Result<()> {
    for pass in passes.iter_mut() {
        pass.encode_mono(buffer)?;
    }
    Ok(())
}

/// Run every pass in stored order over a channel pair.
pub fn encode_passes_stereo(
    passes: &mut [DecorrelationPass],
    left: &mut [i64],
    right: &mut [i64],
) -> Result<()> {
    for pass in passes.iter_mut() {
        pass.encode_stereo(left, right)?;
    }
    Ok(())
}
