//! Stream decoder.
//!
//! Blocks come in sequences: one block per channel group, from the block flagged
//! initial to the block flagged final, all covering the same samples. The decoder
//! reads a whole sequence, decodes its blocks (in parallel when enabled), and joins
//! their channels into one interleaved [`PcmFrame`].

use crate::block::{self, DecodedBlock};
use crate::config::DecoderConfig;
use crate::error::{Result, WavPackError};
use crate::header::{read_full, sample_rate_from_code, BlockHeader, UNKNOWN_TOTAL_SAMPLES};
use crate::riff;
use md5::{Digest, Md5};
use std::io::Read;
use wavpack_core::{ChannelMask, PcmFrame, PcmSpec};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A raw block awaiting decode.
struct RawBlock {
    header: BlockHeader,
    payload: Vec<u8>,
}

/// Decoder over a stream of blocks.
pub struct WavPackDecoder<R: Read> {
    reader: R,
    config: DecoderConfig,
    spec: PcmSpec,
    total_samples: Option<u32>,
    riff_header: Option<Vec<u8>>,
    riff_trailer: Option<Vec<u8>>,
    md5_stored: Option<[u8; 16]>,
    md5: Md5,
    md5_computed: Option<[u8; 16]>,
    /// Decoded samples not yet handed out, interleaved.
    buffered: Vec<i32>,
    buffered_pos: usize,
    /// Frames decoded so far; the next sequence must start here.
    decoded_frames: u64,
    finished: bool,
}

impl<R: Read> WavPackDecoder<R> {
    /// Open a stream with the default configuration.
    pub fn open(reader: R) -> Result<Self> {
        Self::new(reader, DecoderConfig::default())
    }

    /// Open a stream, decoding its first sequence to learn the format.
    pub fn new(mut reader: R, config: DecoderConfig) -> Result<Self> {
        let first = read_sequence(&mut reader)?
            .ok_or_else(|| WavPackError::malformed("stream holds no blocks"))?;
        let decoded = decode_sequence(first, &config)?;

        let lead = &decoded[0];
        let bits_per_sample = lead.header.flags.bits_per_sample();
        let stored_format = lead
            .riff_header
            .as_deref()
            .map(riff::parse_format)
            .transpose()?;

        let sample_rate = match sample_rate_from_code(lead.header.flags.sample_rate_code) {
            Some(rate) => rate,
            None => lead
                .sample_rate
                .or(stored_format.map(|f| f.sample_rate))
                .ok_or(WavPackError::UnsupportedSampleRateEncoding)?,
        };

        let block_channels: usize = decoded
            .iter()
            .map(|b| b.header.flags.output_channels())
            .sum();
        let (channels, channel_mask) = match lead.channel_info {
            Some(info) => (info.channels, info.mask),
            None => {
                let channels = u16::try_from(block_channels)
                    .map_err(|_| WavPackError::malformed("too many channel blocks"))?;
                (channels, ChannelMask::default_for(channels))
            }
        };

        let total_samples = match lead.header.total_samples {
            UNKNOWN_TOTAL_SAMPLES => None,
            n => Some(n),
        };

        let spec = PcmSpec {
            sample_rate,
            channels,
            channel_mask,
            bits_per_sample,
        };
        tracing::debug!(
            sample_rate,
            channels,
            bits_per_sample,
            mask = %channel_mask,
            total_samples = ?total_samples,
            "opened stream"
        );

        let mut decoder = Self {
            reader,
            config,
            spec,
            total_samples,
            riff_header: lead.riff_header.clone(),
            riff_trailer: None,
            md5_stored: None,
            md5: Md5::new(),
            md5_computed: None,
            buffered: Vec::new(),
            buffered_pos: 0,
            decoded_frames: 0,
            finished: false,
        };
        decoder.absorb(decoded)?;
        Ok(decoder)
    }

    /// Stream description.
    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.spec.channels
    }

    pub fn channel_mask(&self) -> ChannelMask {
        self.spec.channel_mask
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.spec.bits_per_sample
    }

    /// Samples per channel, if the stream was finalized.
    pub fn total_samples(&self) -> Option<u32> {
        self.total_samples
    }

    /// Stored RIFF/WAVE header, if the stream carries one.
    pub fn riff_header(&self) -> Option<&[u8]> {
        self.riff_header.as_deref()
    }

    /// Stored RIFF/WAVE trailer; known once the stream has been read to the end.
    pub fn riff_trailer(&self) -> Option<&[u8]> {
        self.riff_trailer.as_deref()
    }

    /// MD5 stored in the stream; known once the stream has been read to the end.
    pub fn md5_stored(&self) -> Option<[u8; 16]> {
        self.md5_stored
    }

    /// MD5 of everything decoded; available at end of stream.
    pub fn md5_computed(&self) -> Option<[u8; 16]> {
        self.md5_computed
    }

    /// Whether every sample has been handed out.
    pub fn is_finished(&self) -> bool {
        self.finished && self.buffered_pos >= self.buffered.len()
    }

    /// Decode the next sequence of blocks.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        while self.buffered_pos >= self.buffered.len() {
            if !self.fill()? {
                return Ok(None);
            }
        }
        let samples = self.buffered.split_off(self.buffered_pos);
        self.buffered.clear();
        self.buffered_pos = 0;
        PcmFrame::new(self.spec, samples).map(Some).map_err(Into::into)
    }

    /// Read up to `byte_count` bytes worth of whole frames.
    ///
    /// At least one frame is returned while audio remains, even if `byte_count` is
    /// smaller than a frame. The result is empty only at end of stream.
    pub fn read(&mut self, byte_count: usize) -> Result<PcmFrame> {
        let channels = self.spec.channels.max(1) as usize;
        let wanted = (byte_count / self.spec.block_align().max(1)).max(1) * channels;

        while self.buffered.len() - self.buffered_pos < wanted {
            if !self.fill()? {
                break;
            }
        }

        let available = self.buffered.len() - self.buffered_pos;
        let take = wanted.min(available);
        let end = self.buffered_pos + take;
        let samples = self.buffered[self.buffered_pos..end].to_vec();
        self.buffered_pos = end;
        if self.buffered_pos == self.buffered.len() {
            self.buffered.clear();
            self.buffered_pos = 0;
        }
        PcmFrame::new(self.spec, samples).map_err(Into::into)
    }

    /// Read to the end of the stream and compare the stored MD5 with the decoded one.
    ///
    /// Remaining audio is decoded and discarded. Streams without a stored MD5 pass.
    pub fn verify_integrity(&mut self) -> Result<()> {
        while self.fill()? {
            self.buffered.clear();
            self.buffered_pos = 0;
        }
        match (self.md5_stored, self.md5_computed) {
            (Some(expected), Some(computed)) if expected != computed => {
                Err(WavPackError::IntegrityMismatch {
                    expected: hex(&expected),
                    computed: hex(&computed),
                })
            }
            _ => Ok(()),
        }
    }

    /// Release the stream.
    pub fn close(self) -> R {
        tracing::debug!(finished = self.finished, "closing decoder");
        self.reader
    }

    /// Decode one more sequence into the buffer. Returns `false` at end of stream.
    fn fill(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        match read_sequence(&mut self.reader)? {
            Some(blocks) => {
                let decoded = decode_sequence(blocks, &self.config)?;
                self.absorb(decoded)?;
                Ok(true)
            }
            None => {
                if let Some(total) = self.total_samples {
                    if self.decoded_frames < u64::from(total) {
                        tracing::debug!(
                            decoded = self.decoded_frames,
                            total,
                            "stream ended before its last block"
                        );
                        return Err(WavPackError::Truncated);
                    }
                }
                self.finish();
                Ok(false)
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        let digest = std::mem::take(&mut self.md5).finalize();
        let mut computed = [0u8; 16];
        computed.copy_from_slice(&digest);
        self.md5_computed = Some(computed);
        if let Some(expected) = self.md5_stored {
            if expected == computed {
                tracing::debug!("MD5 verified");
            } else {
                tracing::warn!(
                    expected = %hex(&expected),
                    computed = %hex(&computed),
                    "decoded audio does not match the stored MD5"
                );
            }
        }
    }

    /// Join a decoded sequence's channels into the output buffer.
    fn absorb(&mut self, decoded: Vec<DecodedBlock>) -> Result<()> {
        let block_index = u64::from(decoded[0].header.block_index);
        if block_index != self.decoded_frames {
            return Err(WavPackError::malformed(format!(
                "sequence starts at sample {}, expected {}",
                block_index, self.decoded_frames
            )));
        }

        for block in &decoded {
            if let Some(digest) = block.md5 {
                self.md5_stored = Some(digest);
            }
            if let Some(trailer) = &block.riff_trailer {
                self.riff_trailer = Some(trailer.clone());
            }
        }

        let frames = decoded[0].header.block_samples as usize;
        if frames == 0 {
            return Ok(());
        }
        let channels: Vec<&Vec<i64>> = decoded.iter().flat_map(|b| b.channels.iter()).collect();
        if channels.len() != self.spec.channels as usize {
            return Err(WavPackError::malformed(format!(
                "sequence decodes to {} channels, stream has {}",
                channels.len(),
                self.spec.channels
            )));
        }

        let start = self.buffered.len();
        self.buffered.reserve(frames * channels.len());
        for i in 0..frames {
            for channel in &channels {
                let sample = i32::try_from(channel[i])
                    .map_err(|_| WavPackError::malformed("decoded sample exceeds 32 bits"))?;
                self.buffered.push(sample);
            }
        }

        let fresh = PcmFrame::new(self.spec, self.buffered[start..].to_vec())?;
        self.md5.update(fresh.to_le_bytes());
        self.decoded_frames += frames as u64;
        tracing::debug!(
            block_index = decoded[0].header.block_index,
            frames,
            blocks = decoded.len(),
            "decoded sequence"
        );
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Read blocks up to and including the next final block.
///
/// Returns `Ok(None)` at a clean end of stream; an end of stream inside a
/// sequence is [`WavPackError::Truncated`].
fn read_sequence<R: Read>(reader: &mut R) -> Result<Option<Vec<RawBlock>>> {
    let mut blocks: Vec<RawBlock> = Vec::new();
    loop {
        let header = match BlockHeader::read(reader)? {
            Some(header) => header,
            None if blocks.is_empty() => return Ok(None),
            None => return Err(WavPackError::Truncated),
        };

        match blocks.first() {
            None if !header.flags.initial_block => {
                return Err(WavPackError::malformed("sequence does not start with an initial block"))
            }
            Some(_) if header.flags.initial_block => {
                return Err(WavPackError::malformed("initial block inside a sequence"))
            }
            Some(first)
                if first.header.block_index != header.block_index
                    || first.header.block_samples != header.block_samples =>
            {
                return Err(WavPackError::malformed("blocks of one sequence cover different samples"))
            }
            _ => {}
        }

        let mut payload = vec![0u8; header.payload_len()];
        if read_full(reader, &mut payload)? != payload.len() {
            return Err(WavPackError::Truncated);
        }

        let last = header.flags.final_block;
        blocks.push(RawBlock { header, payload });
        if last {
            return Ok(Some(blocks));
        }
    }
}

fn decode_sequence(blocks: Vec<RawBlock>, config: &DecoderConfig) -> Result<Vec<DecodedBlock>> {
    let decode = |raw: RawBlock| block::decode_block(raw.header, &raw.payload, config.verify_crc);

    #[cfg(feature = "parallel")]
    {
        if config.parallel_groups && blocks.len() > 1 {
            return blocks.into_par_iter().map(decode).collect();
        }
    }

    blocks.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::encoder::WavPackEncoder;
    use std::io::Cursor;

    fn encode(spec: PcmSpec, samples: Vec<i32>, config: EncoderConfig) -> Vec<u8> {
        let mut encoder = WavPackEncoder::new(Cursor::new(Vec::new()), spec, config).unwrap();
        encoder.write_frame(&PcmFrame::new(spec, samples).unwrap()).unwrap();
        encoder.finish().unwrap().into_inner()
    }

    fn tone(frames: usize, channels: usize) -> Vec<i32> {
        (0..frames * channels)
            .map(|i| (((i / channels) as f64 * 0.05 + (i % channels) as f64).sin() * 9000.0) as i32)
            .collect()
    }

    #[test]
    fn test_read_respects_byte_hint() {
        let spec = PcmSpec::new(44100, 2, 16);
        let samples = tone(1000, 2);
        let bytes = encode(spec, samples.clone(), EncoderConfig::default().with_block_size(300));

        let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.total_samples(), Some(1000));

        let mut out = Vec::new();
        loop {
            let frame = decoder.read(400).unwrap();
            if frame.is_empty() {
                break;
            }
            assert!(frame.frame_count() <= 100);
            out.extend_from_slice(frame.samples());
        }
        assert_eq!(out, samples);
        assert!(decoder.is_finished());
        assert!(decoder.verify_integrity().is_ok());
    }

    #[test]
    fn test_tiny_hint_still_progresses() {
        let spec = PcmSpec::new(8000, 1, 8);
        let samples: Vec<i32> = (0..50).map(|i| (i % 17) - 8).collect();
        let bytes = encode(spec, samples.clone(), EncoderConfig::default());

        let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
        let frame = decoder.read(0).unwrap();
        assert_eq!(frame.samples(), &samples[..1]);
    }

    #[test]
    fn test_next_frame_per_sequence() {
        let spec = PcmSpec::new(48000, 1, 24);
        let samples = tone(700, 1);
        let bytes = encode(spec, samples.clone(), EncoderConfig::default().with_block_size(256));

        let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
        let mut sizes = Vec::new();
        let mut out = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            sizes.push(frame.frame_count());
            out.extend(frame.into_samples());
        }
        assert_eq!(sizes, vec![256, 256, 188]);
        assert_eq!(out, samples);
        assert!(decoder.md5_stored().is_some());
        assert_eq!(decoder.md5_stored(), decoder.md5_computed());
    }

    /// Byte ranges of each block in an encoded stream.
    fn block_spans(bytes: &[u8]) -> Vec<std::ops::Range<usize>> {
        let mut spans = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let mut raw = [0u8; crate::header::HEADER_SIZE];
            raw.copy_from_slice(&bytes[offset..offset + crate::header::HEADER_SIZE]);
            let header = BlockHeader::parse(&raw).unwrap();
            let end = offset + crate::header::HEADER_SIZE + header.payload_len();
            spans.push(offset..end);
            offset = end;
        }
        spans
    }

    #[test]
    fn test_missing_sequence_is_rejected() {
        let spec = PcmSpec::new(44100, 1, 16);
        let samples = tone(1000, 1);
        let bytes = encode(spec, samples, EncoderConfig::default().with_block_size(256));
        let spans = block_spans(&bytes);
        assert!(spans.len() >= 4);

        let mut gapped = bytes[spans[0].clone()].to_vec();
        gapped.extend_from_slice(&bytes[spans[2].start..]);

        let mut decoder = WavPackDecoder::open(Cursor::new(gapped)).unwrap();
        assert_eq!(decoder.next_frame().unwrap().unwrap().frame_count(), 256);
        assert!(matches!(decoder.next_frame(), Err(WavPackError::MalformedBlock(_))));
    }

    #[test]
    fn test_stream_without_trailer_still_completes() {
        let spec = PcmSpec::new(44100, 1, 16);
        let samples = tone(600, 1);
        let bytes = encode(spec, samples.clone(), EncoderConfig::default().with_block_size(256));
        let spans = block_spans(&bytes);

        // drop the trailing zero-sample MD5 block; every audio sample is still present
        let audio_end = spans[spans.len() - 2].end;
        let mut decoder = WavPackDecoder::open(Cursor::new(bytes[..audio_end].to_vec())).unwrap();
        let mut out = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            out.extend(frame.into_samples());
        }
        assert_eq!(out, samples);
        assert!(decoder.md5_stored().is_none());
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            WavPackDecoder::open(Cursor::new(Vec::<u8>::new())),
            Err(WavPackError::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
