//! Per-block coding of one channel group.
//!
//! A block holds one or two channels. Decoding walks its sub-blocks, rebuilds the
//! pass and entropy state they carry, decodes the residuals and undoes the
//! transforms in order: decorrelation, joint stereo, then extended integers.
//! Encoding runs the same steps forward and emits the sub-blocks in canonical
//! order, followed by any non-decoder metadata.

use crate::decorrelation::{self, DecorrelationPass};
use crate::entropy::{self, EntropyState, Medians};
use crate::error::{Result, WavPackError};
use crate::extended::ExtendedIntegers;
use crate::header::{
    sample_rate_code, BlockFlags, BlockHeader, HEADER_SIZE, HEADER_SIZE_AFTER_FIELD,
    UNKNOWN_TOTAL_SAMPLES, VERSION,
};
use crate::stereo;
use crate::subblock::{self, SubBlockId, SubBlocks};
use wavpack_core::{BitReader, BitWriter, ChannelMask};

/// Largest value the max-magnitude field holds.
const MAX_MAGNITUDE: u8 = 31;

/// Seed of the block checksum.
const CRC_SEED: u32 = 0xFFFF_FFFF;

/// Checksum over channel-interleaved samples.
pub fn block_crc(channels: &[&[i64]]) -> u32 {
    let frames = channels.first().map_or(0, |c| c.len());
    let mut crc = CRC_SEED;
    for i in 0..frames {
        for channel in channels {
            crc = crc.wrapping_mul(3).wrapping_add(channel[i] as u32);
        }
    }
    crc
}

/// Bit length of the largest magnitude, capped at the field width.
fn max_magnitude(channels: &[&[i64]]) -> u8 {
    let bits = channels
        .iter()
        .flat_map(|c| c.iter())
        .map(|s| 64 - s.unsigned_abs().leading_zeros())
        .max()
        .unwrap_or(0);
    bits.min(MAX_MAGNITUDE as u32) as u8
}

/// Channel count and speaker mask carried by the channel-info sub-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channels: u16,
    pub mask: ChannelMask,
}

impl ChannelInfo {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (&count, mask_bytes) = data
            .split_first()
            .ok_or_else(|| WavPackError::malformed("empty channel-info sub-block"))?;
        let mask = mask_bytes
            .iter()
            .take(4)
            .enumerate()
            .fold(0u32, |mask, (i, &b)| mask | (b as u32) << (8 * i));
        Ok(Self {
            channels: count as u16,
            mask: ChannelMask(mask),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.channels.min(255) as u8];
        let mut mask = self.mask.bits();
        while mask != 0 {
            out.push(mask as u8);
            mask >>= 8;
        }
        out
    }
}

/// Parse a sample-rate sub-block (3 or 4 little-endian bytes).
pub fn parse_sample_rate(data: &[u8]) -> Result<u32> {
    if !(3..=4).contains(&data.len()) {
        return Err(WavPackError::malformed(format!(
            "sample-rate sub-block holds {} bytes",
            data.len()
        )));
    }
    Ok(data
        .iter()
        .enumerate()
        .fold(0u32, |rate, (i, &b)| rate | (b as u32) << (8 * i)))
}

/// Serialize a sample rate in the shortest of the 3 or 4 byte forms.
pub fn sample_rate_bytes(rate: u32) -> Vec<u8> {
    let bytes = rate.to_le_bytes();
    if rate < 1 << 24 {
        bytes[..3].to_vec()
    } else {
        bytes.to_vec()
    }
}

/// Everything one block yields.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    pub header: BlockHeader,
    /// One channel for mono blocks, two otherwise; empty for metadata-only blocks.
    pub channels: Vec<Vec<i64>>,
    pub channel_info: Option<ChannelInfo>,
    pub sample_rate: Option<u32>,
    pub riff_header: Option<Vec<u8>>,
    pub riff_trailer: Option<Vec<u8>>,
    pub md5: Option<[u8; 16]>,
}

/// Decode one block's payload.
pub fn decode_block(header: BlockHeader, payload: &[u8], verify_crc: bool) -> Result<DecodedBlock> {
    let single = header.flags.is_single_channel();
    let stereo = !single;

    let mut passes: Option<Vec<DecorrelationPass>> = None;
    let mut weights_seen = false;
    let mut samples_seen = false;
    let mut entropy: Option<EntropyState> = None;
    let mut extended: Option<ExtendedIntegers> = None;
    let mut bitstream: Option<&[u8]> = None;

    let mut block = DecodedBlock {
        header,
        channels: Vec::new(),
        channel_info: None,
        sample_rate: None,
        riff_header: None,
        riff_trailer: None,
        md5: None,
    };

    for sub_block in SubBlocks::new(payload) {
        let sub_block = sub_block?;
        match sub_block.id {
            SubBlockId::Terms => passes = Some(decorrelation::parse_terms(sub_block.data)?),
            SubBlockId::Weights => {
                let passes = passes
                    .as_mut()
                    .ok_or_else(|| WavPackError::malformed("weights before terms"))?;
                decorrelation::parse_weights(sub_block.data, passes, stereo)?;
                weights_seen = true;
            }
            SubBlockId::Samples => {
                let passes = passes
                    .as_mut()
                    .ok_or_else(|| WavPackError::malformed("samples before terms"))?;
                decorrelation::parse_samples(sub_block.data, passes, stereo)?;
                samples_seen = true;
            }
            SubBlockId::Entropy => entropy = Some(EntropyState::parse(sub_block.data, stereo)?),
            SubBlockId::ExtendedIntegers => {
                extended = Some(ExtendedIntegers::parse(sub_block.data)?)
            }
            SubBlockId::Bitstream => {
                if entropy.is_none() {
                    return Err(WavPackError::malformed("bitstream before entropy medians"));
                }
                bitstream = Some(sub_block.data);
            }
            SubBlockId::ChannelInfo => block.channel_info = Some(ChannelInfo::parse(sub_block.data)?),
            SubBlockId::SampleRate => block.sample_rate = Some(parse_sample_rate(sub_block.data)?),
            SubBlockId::RiffHeader => block.riff_header = Some(sub_block.data.to_vec()),
            SubBlockId::RiffTrailer => block.riff_trailer = Some(sub_block.data.to_vec()),
            SubBlockId::Md5 => {
                let digest: [u8; 16] = sub_block
                    .data
                    .try_into()
                    .map_err(|_| WavPackError::malformed("MD5 sub-block is not 16 bytes"))?;
                block.md5 = Some(digest);
            }
            SubBlockId::Unknown {
                function,
                nondecoder,
            } => {
                if nondecoder {
                    tracing::trace!(function, "skipping non-decoder sub-block");
                } else {
                    tracing::warn!(function, "ignoring unknown decoder sub-block");
                }
            }
        }
    }

    let frames = block.header.block_samples as usize;
    if frames == 0 {
        return Ok(block);
    }

    let mut passes = passes.ok_or(WavPackError::MissingSubBlock("decorrelation terms"))?;
    if !weights_seen {
        return Err(WavPackError::MissingSubBlock("decorrelation weights"));
    }
    if !samples_seen {
        return Err(WavPackError::MissingSubBlock("decorrelation samples"));
    }
    let mut entropy = entropy.ok_or(WavPackError::MissingSubBlock("entropy medians"))?;
    let bitstream = bitstream.ok_or(WavPackError::MissingSubBlock("residual bitstream"))?;
    if block.header.flags.extended_integers && extended.is_none() {
        return Err(WavPackError::MissingSubBlock("extended integers"));
    }

    let mut reader = BitReader::new(bitstream);
    let mut channels =
        entropy::decode_residuals(&mut reader, &mut entropy, if single { 1 } else { 2 }, frames)?;

    if let [left, right] = channels.as_mut_slice() {
        decorrelation::decode_passes_stereo(&mut passes, left, right)?;
        if block.header.flags.joint_stereo {
            stereo::undo_joint_stereo(left, right);
        }
    } else {
        decorrelation::decode_passes_mono(&mut passes, &mut channels[0])?;
    }

    if block.header.flags.false_stereo {
        let copy = channels[0].clone();
        channels.push(copy);
    }

    if verify_crc {
        let views: Vec<&[i64]> = channels.iter().map(Vec::as_slice).collect();
        let computed = block_crc(&views);
        if computed != block.header.crc {
            return Err(WavPackError::CrcMismatch {
                expected: block.header.crc,
                computed,
            });
        }
    }

    if let Some(ext) = extended.filter(|_| block.header.flags.extended_integers) {
        for channel in channels.iter_mut() {
            ext.restore(channel);
        }
    }

    tracing::trace!(
        block_index = block.header.block_index,
        frames,
        passes = passes.len(),
        "decoded block"
    );
    block.channels = channels;
    Ok(block)
}

/// Codec state of one channel group, carried from block to block by the encoder.
#[derive(Debug, Clone)]
pub struct GroupState {
    pub passes: Vec<DecorrelationPass>,
    pub entropy: EntropyState,
}

impl GroupState {
    /// Fresh state for `terms` (stored order), each with `delta`.
    pub fn new(terms: &[decorrelation::Term], delta: u8) -> Self {
        Self {
            passes: terms
                .iter()
                .map(|&term| DecorrelationPass::new(term, delta))
                .collect(),
            entropy: EntropyState::default(),
        }
    }
}

/// Where a block sits in the stream.
#[derive(Debug, Clone, Copy)]
pub struct BlockPosition {
    pub block_index: u32,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub initial: bool,
    pub last: bool,
}

impl BlockPosition {
    fn flags(&self) -> BlockFlags {
        BlockFlags {
            bytes_per_sample_code: ((self.bits_per_sample.clamp(8, 32) / 8) - 1) as u8,
            initial_block: self.initial,
            final_block: self.last,
            sample_rate_code: sample_rate_code(self.sample_rate),
            ..BlockFlags::default()
        }
    }
}

/// A serialized block.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub bytes: Vec<u8>,
    /// Offset within `bytes` of the stored RIFF header payload, if one was written.
    pub riff_header_offset: Option<usize>,
}

fn assemble(
    mut header: BlockHeader,
    mut payload: BitWriter,
    metadata: &[(SubBlockId, Vec<u8>)],
) -> Result<EncodedBlock> {
    let mut riff_header_offset = None;
    for (id, data) in metadata {
        subblock::write_sub_block(&mut payload, *id, data)?;
        if *id == SubBlockId::RiffHeader {
            let padded = data.len() + (data.len() & 1);
            riff_header_offset = Some(HEADER_SIZE + payload.len() - padded);
        }
    }

    let payload = payload.into_data();
    header.block_size = u32::try_from(payload.len())
        .ok()
        .and_then(|len| len.checked_add(HEADER_SIZE_AFTER_FIELD))
        .ok_or_else(|| WavPackError::InvalidParameter("block payload too large".into()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(EncodedBlock {
        bytes,
        riff_header_offset,
    })
}

fn base_header(position: &BlockPosition, block_samples: u32, flags: BlockFlags, crc: u32) -> BlockHeader {
    BlockHeader {
        block_size: HEADER_SIZE_AFTER_FIELD,
        version: VERSION,
        track: 0,
        index: 0,
        total_samples: UNKNOWN_TOTAL_SAMPLES,
        block_index: position.block_index,
        block_samples,
        flags,
        crc,
    }
}

/// Encode one or two channels of one group.
///
/// `state` advances to the state the next block of this group starts from.
/// `metadata` sub-blocks are appended after the codec data.
pub fn encode_block(
    position: &BlockPosition,
    state: &mut GroupState,
    mut channels: Vec<Vec<i64>>,
    joint_stereo: bool,
    metadata: &[(SubBlockId, Vec<u8>)],
) -> Result<EncodedBlock> {
    if channels.is_empty() || channels.len() > 2 {
        return Err(WavPackError::InvalidParameter(format!(
            "a block holds 1 or 2 channels, got {}",
            channels.len()
        )));
    }
    let frames = channels[0].len();
    let block_samples = u32::try_from(frames)
        .map_err(|_| WavPackError::InvalidParameter("block too long".into()))?;

    let mut flags = position.flags();
    if channels.len() == 1 {
        flags.mono = true;
    } else if channels[0] == channels[1] {
        flags.false_stereo = true;
        channels.truncate(1);
    }
    let stereo = channels.len() == 2;

    let extended = {
        let views: Vec<&[i64]> = channels.iter().map(Vec::as_slice).collect();
        flags.max_magnitude = max_magnitude(&views);
        ExtendedIntegers::detect(&views)
    };
    if let Some(ext) = extended {
        flags.extended_integers = true;
        for channel in channels.iter_mut() {
            ext.remove(channel);
        }
    }

    let crc = match channels.as_slice() {
        [mono] if flags.false_stereo => block_crc(&[mono.as_slice(), mono.as_slice()]),
        _ => block_crc(&channels.iter().map(Vec::as_slice).collect::<Vec<_>>()),
    };

    // single-channel blocks run only the passes that need no second channel
    let mut active: Vec<DecorrelationPass> = state
        .passes
        .iter()
        .filter(|p| stereo || !p.term.is_cross_channel())
        .cloned()
        .collect();
    flags.cross_channel = active.iter().any(|p| p.term.is_cross_channel());
    flags.joint_stereo = stereo && joint_stereo;

    let mut entropy = if stereo {
        state.entropy
    } else {
        EntropyState {
            medians: [state.entropy.medians[0], Medians::default()],
        }
    };

    let mut payload = BitWriter::with_capacity(frames * channels.len() * 2);
    subblock::write_sub_block(&mut payload, SubBlockId::Terms, &decorrelation::write_terms(&active))?;
    subblock::write_sub_block(
        &mut payload,
        SubBlockId::Weights,
        &decorrelation::write_weights(&mut active, stereo),
    )?;
    subblock::write_sub_block(
        &mut payload,
        SubBlockId::Samples,
        &decorrelation::write_samples(&mut active, stereo),
    )?;
    if let Some(ext) = extended {
        subblock::write_sub_block(&mut payload, SubBlockId::ExtendedIntegers, &ext.to_bytes())?;
    }
    subblock::write_sub_block(&mut payload, SubBlockId::Entropy, &entropy.write(stereo))?;

    if let [left, right] = channels.as_mut_slice() {
        if flags.joint_stereo {
            stereo::joint_stereo(left, right);
        }
        decorrelation::encode_passes_stereo(&mut active, left, right)?;
    } else {
        decorrelation::encode_passes_mono(&mut active, &mut channels[0])?;
    }

    let mut residuals = BitWriter::with_capacity(frames * channels.len());
    entropy::encode_residuals(&mut residuals, &mut entropy, &channels)?;
    subblock::write_sub_block(&mut payload, SubBlockId::Bitstream, residuals.data())?;

    let mut updated = active.into_iter();
    for pass in state
        .passes
        .iter_mut()
        .filter(|p| stereo || !p.term.is_cross_channel())
    {
        if let Some(next) = updated.next() {
            *pass = next;
        }
    }
    state.entropy.medians[0] = entropy.medians[0];
    if stereo {
        state.entropy.medians[1] = entropy.medians[1];
    }

    let header = base_header(position, block_samples, flags, crc);
    tracing::trace!(
        block_index = position.block_index,
        frames,
        mono = flags.mono,
        false_stereo = flags.false_stereo,
        "encoded block"
    );
    assemble(header, payload, metadata)
}

/// A block with no audio, carrying only non-decoder metadata.
pub fn encode_metadata_block(
    position: &BlockPosition,
    mono: bool,
    metadata: &[(SubBlockId, Vec<u8>)],
) -> Result<EncodedBlock> {
    let mut flags = position.flags();
    flags.mono = mono;
    let header = base_header(position, 0, flags, CRC_SEED);
    assemble(header, BitWriter::new(), metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorrelation::Term;
    use crate::header::BlockHeader;

    fn position() -> BlockPosition {
        BlockPosition {
            block_index: 0,
            bits_per_sample: 16,
            sample_rate: 44100,
            initial: true,
            last: true,
        }
    }

    fn split(bytes: &[u8]) -> (BlockHeader, &[u8]) {
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = BlockHeader::parse(&raw).unwrap();
        assert_eq!(header.payload_len(), bytes.len() - HEADER_SIZE);
        (header, &bytes[HEADER_SIZE..])
    }

    fn ramp(len: usize, scale: i64) -> Vec<i64> {
        (0..len as i64).map(|i| ((i * scale) % 3001) - 1500).collect()
    }

    fn stereo_terms() -> Vec<Term> {
        [18, 18, 2, 17, 3, -1, -2, -3]
            .iter()
            .map(|&c| Term::from_code(c).unwrap())
            .collect()
    }

    #[test]
    fn test_stereo_blocks_round_trip_with_carried_state() {
        let mut state = GroupState::new(&stereo_terms(), 2);
        for block_number in 0..3u32 {
            let left = ramp(500, 7 + block_number as i64);
            let right = ramp(500, 11);
            let mut pos = position();
            pos.block_index = block_number * 500;
            let encoded =
                encode_block(&pos, &mut state, vec![left.clone(), right.clone()], true, &[])
                    .unwrap();

            let (header, payload) = split(&encoded.bytes);
            assert!(header.flags.joint_stereo);
            assert!(header.flags.cross_channel);
            let decoded = decode_block(header, payload, true).unwrap();
            assert_eq!(decoded.channels, vec![left, right]);
        }
    }

    #[test]
    fn test_false_stereo_drops_cross_terms() {
        let mut state = GroupState::new(&stereo_terms(), 2);
        let wave = ramp(300, 5);
        let encoded =
            encode_block(&position(), &mut state, vec![wave.clone(), wave.clone()], true, &[])
                .unwrap();
        let (header, payload) = split(&encoded.bytes);
        assert!(header.flags.false_stereo);
        assert!(!header.flags.cross_channel);
        assert!(!header.flags.joint_stereo);

        let decoded = decode_block(header, payload, true).unwrap();
        assert_eq!(decoded.channels, vec![wave.clone(), wave]);
    }

    #[test]
    fn test_mono_block_with_extended_integers() {
        let terms = [Term::HalfExtrapolate, Term::Extrapolate];
        let mut state = GroupState::new(&terms, 2);
        let samples: Vec<i64> = ramp(256, 13).iter().map(|s| s << 3).collect();
        let encoded = encode_block(&position(), &mut state, vec![samples.clone()], true, &[]).unwrap();
        let (header, payload) = split(&encoded.bytes);
        assert!(header.flags.mono);
        assert!(header.flags.extended_integers);

        let decoded = decode_block(header, payload, true).unwrap();
        assert_eq!(decoded.channels, vec![samples]);
    }

    #[test]
    fn test_crc_mismatch_is_reported() {
        let mut state = GroupState::new(&[Term::Lag(1)], 2);
        let encoded = encode_block(&position(), &mut state, vec![ramp(64, 3)], true, &[]).unwrap();
        let (mut header, payload) = split(&encoded.bytes);
        header.crc ^= 1;
        assert!(matches!(
            decode_block(header.clone(), payload, true),
            Err(WavPackError::CrcMismatch { .. })
        ));
        assert!(decode_block(header, payload, false).is_ok());
    }

    #[test]
    fn test_missing_bitstream() {
        let mut w = BitWriter::new();
        subblock::write_sub_block(&mut w, SubBlockId::Terms, &[]).unwrap();
        subblock::write_sub_block(&mut w, SubBlockId::Weights, &[]).unwrap();
        subblock::write_sub_block(&mut w, SubBlockId::Samples, &[]).unwrap();
        subblock::write_sub_block(&mut w, SubBlockId::Entropy, &[0; 6]).unwrap();
        let payload = w.into_data();

        let mut header = base_header(&position(), 10, position().flags(), CRC_SEED);
        header.flags.mono = true;
        assert!(matches!(
            decode_block(header, &payload, true),
            Err(WavPackError::MissingSubBlock("residual bitstream"))
        ));
    }

    #[test]
    fn test_weights_before_terms() {
        let mut w = BitWriter::new();
        subblock::write_sub_block(&mut w, SubBlockId::Weights, &[1, 2]).unwrap();
        let payload = w.into_data();
        let header = base_header(&position(), 10, position().flags(), CRC_SEED);
        assert!(matches!(
            decode_block(header, &payload, true),
            Err(WavPackError::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_metadata_block() {
        let digest = vec![7u8; 16];
        let encoded =
            encode_metadata_block(&position(), false, &[(SubBlockId::Md5, digest.clone())])
                .unwrap();
        let (header, payload) = split(&encoded.bytes);
        assert_eq!(header.block_samples, 0);
        let decoded = decode_block(header, payload, true).unwrap();
        assert!(decoded.channels.is_empty());
        assert_eq!(decoded.md5.map(|d| d.to_vec()), Some(digest));
    }

    #[test]
    fn test_riff_header_offset() {
        let riff = b"RIFF0000WAVEfmt ".to_vec();
        let mut state = GroupState::new(&[], 2);
        let encoded = encode_block(
            &position(),
            &mut state,
            vec![vec![1, 2, 3]],
            true,
            &[(SubBlockId::RiffHeader, riff.clone())],
        )
        .unwrap();
        let offset = encoded.riff_header_offset.unwrap();
        assert_eq!(&encoded.bytes[offset..offset + riff.len()], &riff[..]);
    }

    #[test]
    fn test_channel_info_and_rate_payloads() {
        let info = ChannelInfo {
            channels: 6,
            mask: ChannelMask(0x3F),
        };
        assert_eq!(info.to_bytes(), vec![6, 0x3F]);
        assert_eq!(ChannelInfo::parse(&info.to_bytes()).unwrap(), info);

        assert_eq!(sample_rate_bytes(12345).len(), 3);
        assert_eq!(parse_sample_rate(&sample_rate_bytes(12345)).unwrap(), 12345);
        assert_eq!(parse_sample_rate(&sample_rate_bytes(20_000_000)).unwrap(), 20_000_000);
        assert!(parse_sample_rate(&[1, 2]).is_err());
    }

    #[test]
    fn test_crc_and_magnitude() {
        assert_eq!(block_crc(&[]), CRC_SEED);
        let left = [1i64, -1];
        let right = [2i64, 0];
        let expected = CRC_SEED
            .wrapping_mul(3)
            .wrapping_add(1)
            .wrapping_mul(3)
            .wrapping_add(2)
            .wrapping_mul(3)
            .wrapping_add(u32::MAX)
            .wrapping_mul(3);
        assert_eq!(block_crc(&[&left[..], &right[..]]), expected);
        let samples: &[i64] = &[0, 5, -9];
        assert_eq!(max_magnitude(&[samples]), 4);
    }
}
