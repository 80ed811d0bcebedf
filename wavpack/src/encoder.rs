//! Stream encoder.
//!
//! Samples are buffered until a block's worth is available, split into channel
//! groups and coded one block per group. Each group keeps its own decorrelation and
//! entropy state for the life of the stream. On [`WavPackEncoder::finish`] the
//! remaining samples are flushed, the MD5 block is appended and every block header
//! is patched with the final sample count.

use crate::block::{self, BlockPosition, ChannelInfo, EncodedBlock, GroupState};
use crate::config::EncoderConfig;
use crate::decorrelation::{Term, MAX_DELTA};
use crate::error::{Result, WavPackError};
use crate::header::{sample_rate_code, CUSTOM_SAMPLE_RATE, TOTAL_SAMPLES_OFFSET};
use crate::riff;
use crate::subblock::SubBlockId;
use byteorder::{LittleEndian, WriteBytesExt};
use md5::{Digest, Md5};
use std::io::{Seek, SeekFrom, Write};
use wavpack_core::{ChannelMask, PcmFrame, PcmSource, PcmSpec};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Weight step used by every built-in pass.
const DEFAULT_DELTA: u8 = 2;

/// Term tables in stored order, keyed by pass count.
const PASS_TABLES: [(usize, &[i32]); 6] = [
    (0, &[]),
    (1, &[18]),
    (2, &[17, 18]),
    (5, &[18, 18, 2, 17, 3]),
    (10, &[18, 18, 18, -2, 2, 3, 5, -1, 17, 4]),
    (16, &[18, 18, 2, 3, -2, 18, 2, 4, 7, 5, 3, 6, 8, -1, 18, 2]),
];

/// Terms for `passes` passes over a group of `channels` channels.
///
/// Single-channel groups replace cross-channel terms with term 17.
pub fn pass_terms(passes: usize, channels: usize) -> Result<Vec<Term>> {
    let (_, codes) = PASS_TABLES
        .iter()
        .find(|(count, _)| *count == passes)
        .ok_or_else(|| {
            WavPackError::InvalidParameter(format!("no term table for {} passes", passes))
        })?;
    codes
        .iter()
        .map(|&code| {
            if channels == 1 && code < 0 {
                Ok(Term::Extrapolate)
            } else {
                Term::from_code(code)
            }
        })
        .collect()
}

/// Group sizes, in channel order, for a channel count and speaker mask.
pub fn channel_groups(channels: u16, mask: ChannelMask) -> Vec<usize> {
    match (channels, mask.bits()) {
        (1, _) => vec![1],
        (2, _) => vec![2],
        (3, 0x7) => vec![2, 1],
        (4, 0x33) => vec![2, 2],
        (4, 0x107) => vec![2, 1, 1],
        (5, 0x37) => vec![2, 1, 2],
        (6, 0x3F) => vec![2, 1, 1, 2],
        (n, _) => vec![1; n as usize],
    }
}

struct Group {
    channels: usize,
    state: GroupState,
}

/// Streaming encoder writing to a seekable sink.
pub struct WavPackEncoder<W: Write + Seek> {
    sink: W,
    spec: PcmSpec,
    config: EncoderConfig,
    groups: Vec<Group>,
    /// Interleaved samples waiting for a full block.
    pending: Vec<i32>,
    samples_written: u64,
    /// Sink position of every block written so far.
    block_offsets: Vec<u64>,
    position: u64,
    riff_header_offset: Option<u64>,
    md5: Md5,
}

impl<W: Write + Seek> WavPackEncoder<W> {
    /// Create an encoder. Nothing is written until a block fills.
    pub fn new(mut sink: W, spec: PcmSpec, config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        if spec.channels == 0 || spec.channels > 255 {
            return Err(WavPackError::InvalidParameter(format!(
                "{} channels not supported",
                spec.channels
            )));
        }
        if ![8, 16, 24, 32].contains(&spec.bits_per_sample) {
            return Err(WavPackError::InvalidParameter(format!(
                "{} bits per sample not supported",
                spec.bits_per_sample
            )));
        }
        if spec.sample_rate == 0 {
            return Err(WavPackError::InvalidParameter("sample rate of zero".into()));
        }

        let groups = channel_groups(spec.channels, spec.channel_mask)
            .into_iter()
            .map(|size| {
                let terms = pass_terms(config.correlation_passes, size)?;
                Ok(Group {
                    channels: size,
                    state: GroupState::new(&terms, DEFAULT_DELTA.min(MAX_DELTA)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let position = sink
            .stream_position()
            .map_err(|_| WavPackError::SeekUnsupported)?;
        tracing::debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits_per_sample = spec.bits_per_sample,
            groups = groups.len(),
            passes = config.correlation_passes,
            "starting encoder"
        );

        Ok(Self {
            sink,
            spec,
            pending: Vec::with_capacity(config.block_size * spec.channels as usize),
            config,
            groups,
            samples_written: 0,
            block_offsets: Vec::new(),
            position,
            riff_header_offset: None,
            md5: Md5::new(),
        })
    }

    /// Stream description.
    pub fn spec(&self) -> &PcmSpec {
        &self.spec
    }

    /// Samples per channel encoded into blocks so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Queue a frame, writing every block it completes.
    pub fn write_frame(&mut self, frame: &PcmFrame) -> Result<()> {
        let spec = frame.spec();
        if spec.channels != self.spec.channels || spec.bits_per_sample != self.spec.bits_per_sample
        {
            return Err(WavPackError::InvalidParameter(format!(
                "frame is {} ch / {} bit, stream is {} ch / {} bit",
                spec.channels, spec.bits_per_sample, self.spec.channels, self.spec.bits_per_sample
            )));
        }
        let (min, max) = (self.spec.min_sample(), self.spec.max_sample());
        if let Some(&bad) = frame
            .samples()
            .iter()
            .find(|&&s| (s as i64) < min || (s as i64) > max)
        {
            return Err(WavPackError::InvalidParameter(format!(
                "sample {} outside the {}-bit range",
                bad, self.spec.bits_per_sample
            )));
        }

        self.md5.update(frame.to_le_bytes());
        self.pending.extend_from_slice(frame.samples());

        let block_len = self.config.block_size * self.spec.channels as usize;
        if self.pending.len() >= block_len {
            let pending = std::mem::take(&mut self.pending);
            let mut chunks = pending.chunks_exact(block_len);
            for chunk in &mut chunks {
                self.write_sequence(chunk)?;
            }
            self.pending = chunks.remainder().to_vec();
        }
        Ok(())
    }

    /// Flush, append the trailing metadata block and patch the headers.
    ///
    /// Fails with [`WavPackError::SeekUnsupported`] if the sink cannot seek back.
    pub fn finish(mut self) -> Result<W> {
        if !self.pending.is_empty() || self.block_offsets.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.write_sequence(&pending)?;
        }

        let data_bytes = self.data_bytes()?;
        let mut metadata = Vec::new();
        if self.config.write_md5 {
            let digest = std::mem::take(&mut self.md5).finalize();
            metadata.push((SubBlockId::Md5, digest.to_vec()));
        }
        if self.config.wrap_riff {
            let trailer = riff::build_trailer(data_bytes);
            if !trailer.is_empty() {
                metadata.push((SubBlockId::RiffTrailer, trailer));
            }
        }
        if !metadata.is_empty() {
            let position = BlockPosition {
                block_index: self.block_index()?,
                bits_per_sample: self.spec.bits_per_sample,
                sample_rate: self.spec.sample_rate,
                initial: true,
                last: true,
            };
            let encoded = block::encode_metadata_block(&position, self.spec.channels == 1, &metadata)?;
            self.emit(encoded)?;
        }

        self.patch(data_bytes)?;
        self.sink.flush()?;
        tracing::debug!(
            samples = self.samples_written,
            blocks = self.block_offsets.len(),
            bytes = self.position,
            "encoder finished"
        );
        Ok(self.sink)
    }

    fn block_index(&self) -> Result<u32> {
        u32::try_from(self.samples_written)
            .ok()
            .filter(|&n| n != u32::MAX)
            .ok_or_else(|| WavPackError::InvalidParameter("stream too long".into()))
    }

    fn data_bytes(&self) -> Result<u32> {
        u32::try_from(self.samples_written * self.spec.block_align() as u64)
            .map_err(|_| WavPackError::InvalidParameter("audio too long for a RIFF header".into()))
    }

    /// Encode one block per group for the interleaved `samples`.
    fn write_sequence(&mut self, samples: &[i32]) -> Result<()> {
        let channels = self.spec.channels as usize;
        let frames = samples.len() / channels;
        let block_index = self.block_index()?;
        let first_in_stream = self.block_offsets.is_empty();

        let mut per_channel: Vec<Vec<i64>> = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (c, &s) in frame.iter().enumerate() {
                per_channel[c].push(s as i64);
            }
        }

        let group_count = self.groups.len();
        let initial_metadata = self.initial_metadata(first_in_stream, frames);
        let mut jobs = Vec::with_capacity(group_count);
        let mut remaining = per_channel.into_iter();
        for (i, group) in self.groups.iter_mut().enumerate() {
            let data: Vec<Vec<i64>> = remaining.by_ref().take(group.channels).collect();
            let position = BlockPosition {
                block_index,
                bits_per_sample: self.spec.bits_per_sample,
                sample_rate: self.spec.sample_rate,
                initial: i == 0,
                last: i + 1 == group_count,
            };
            let metadata = if i == 0 { initial_metadata.clone() } else { Vec::new() };
            jobs.push((position, &mut group.state, data, metadata));
        }

        let joint_stereo = self.config.joint_stereo;
        let run = |(position, state, data, metadata): (
            BlockPosition,
            &mut GroupState,
            Vec<Vec<i64>>,
            Vec<(SubBlockId, Vec<u8>)>,
        )| block::encode_block(&position, state, data, joint_stereo, &metadata);

        #[cfg(feature = "parallel")]
        let encoded: Vec<EncodedBlock> = if self.config.parallel_groups && group_count > 1 {
            jobs.into_par_iter().map(run).collect::<Result<_>>()?
        } else {
            jobs.into_iter().map(run).collect::<Result<_>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let encoded: Vec<EncodedBlock> = jobs.into_iter().map(run).collect::<Result<_>>()?;

        for block in encoded {
            self.emit(block)?;
        }
        self.samples_written += frames as u64;
        tracing::debug!(block_index, frames, groups = group_count, "wrote sequence");
        Ok(())
    }

    /// Non-decoder sub-blocks for the first block of a sequence.
    fn initial_metadata(&self, first_in_stream: bool, frames: usize) -> Vec<(SubBlockId, Vec<u8>)> {
        let mut metadata = Vec::new();
        let plain = matches!(
            (self.spec.channels, self.spec.channel_mask),
            (1, ChannelMask::MONO) | (2, ChannelMask::STEREO)
        );
        if !plain {
            let info = ChannelInfo {
                channels: self.spec.channels,
                mask: self.spec.channel_mask,
            };
            metadata.push((SubBlockId::ChannelInfo, info.to_bytes()));
        }
        if sample_rate_code(self.spec.sample_rate) == CUSTOM_SAMPLE_RATE {
            metadata.push((SubBlockId::SampleRate, block::sample_rate_bytes(self.spec.sample_rate)));
        }
        if first_in_stream && self.config.wrap_riff {
            // sizes are patched in `finish`
            let guess = (frames * self.spec.block_align()) as u32;
            metadata.push((SubBlockId::RiffHeader, riff::build_header(&self.spec, guess)));
        }
        metadata
    }

    fn emit(&mut self, block: EncodedBlock) -> Result<()> {
        if let Some(offset) = block.riff_header_offset {
            self.riff_header_offset = Some(self.position + offset as u64);
        }
        self.sink.write_all(&block.bytes)?;
        self.block_offsets.push(self.position);
        self.position += block.bytes.len() as u64;
        Ok(())
    }

    /// Write the final sample count into every header and finalize the RIFF header.
    fn patch(&mut self, data_bytes: u32) -> Result<()> {
        let total = self.block_index()?;
        for &offset in &self.block_offsets {
            self.sink
                .seek(SeekFrom::Start(offset + TOTAL_SAMPLES_OFFSET))
                .map_err(|_| WavPackError::SeekUnsupported)?;
            self.sink.write_u32::<LittleEndian>(total)?;
        }
        if let Some(offset) = self.riff_header_offset {
            self.sink
                .seek(SeekFrom::Start(offset))
                .map_err(|_| WavPackError::SeekUnsupported)?;
            self.sink.write_all(&riff::build_header(&self.spec, data_bytes))?;
        }
        self.sink
            .seek(SeekFrom::Start(self.position))
            .map_err(|_| WavPackError::SeekUnsupported)?;
        Ok(())
    }
}

/// Encode everything `source` produces with the given block size and pass count.
pub fn encode<W, S>(sink: W, source: &mut S, block_size: usize, correlation_passes: usize) -> Result<W>
where
    W: Write + Seek,
    S: PcmSource + ?Sized,
{
    let config = EncoderConfig::default()
        .with_block_size(block_size)
        .with_correlation_passes(correlation_passes);
    encode_with_config(sink, source, config)
}

/// Encode everything `source` produces.
pub fn encode_with_config<W, S>(sink: W, source: &mut S, config: EncoderConfig) -> Result<W>
where
    W: Write + Seek,
    S: PcmSource + ?Sized,
{
    let block_size = config.block_size;
    let mut encoder = WavPackEncoder::new(sink, source.spec(), config)?;
    while let Some(frame) = source.read_frames(block_size)? {
        encoder.write_frame(&frame)?;
    }
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::WavPackDecoder;
    use std::io::Cursor;
    use wavpack_core::MemorySource;

    #[test]
    fn test_pass_tables() {
        assert!(pass_terms(0, 2).unwrap().is_empty());
        assert_eq!(pass_terms(1, 2).unwrap(), vec![Term::HalfExtrapolate]);
        let stereo = pass_terms(10, 2).unwrap();
        assert_eq!(stereo.len(), 10);
        assert_eq!(stereo[3], Term::CrossRight);
        let mono = pass_terms(10, 1).unwrap();
        assert!(mono.iter().all(|t| !t.is_cross_channel()));
        assert_eq!(mono[3], Term::Extrapolate);
        assert!(pass_terms(4, 1).is_err());
    }

    #[test]
    fn test_channel_groups() {
        assert_eq!(channel_groups(1, ChannelMask::MONO), vec![1]);
        assert_eq!(channel_groups(2, ChannelMask::STEREO), vec![2]);
        assert_eq!(channel_groups(6, ChannelMask(0x3F)), vec![2, 1, 1, 2]);
        assert_eq!(channel_groups(4, ChannelMask(0x107)), vec![2, 1, 1]);
        assert_eq!(channel_groups(3, ChannelMask(0x103)), vec![1, 1, 1]);
    }

    #[test]
    fn test_total_samples_patched() {
        let spec = PcmSpec::new(44100, 2, 16);
        let samples: Vec<i32> = (0..2000).map(|i| (i % 200) * 10 - 1000).collect();
        let mut source = MemorySource::new(spec, samples).unwrap();
        let bytes = encode(Cursor::new(Vec::new()), &mut source, 256, 2)
            .unwrap()
            .into_inner();

        let decoder = WavPackDecoder::open(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(decoder.total_samples(), Some(1000));
        assert_eq!(&bytes[12..16], &1000u32.to_le_bytes());
    }

    #[test]
    fn test_rejects_bad_input() {
        let spec = PcmSpec::new(44100, 1, 16);
        assert!(WavPackEncoder::new(
            Cursor::new(Vec::new()),
            PcmSpec::new(44100, 1, 12),
            EncoderConfig::default()
        )
        .is_err());

        let mut encoder =
            WavPackEncoder::new(Cursor::new(Vec::new()), spec, EncoderConfig::default()).unwrap();
        let loud = PcmFrame::new(spec, vec![40000]).unwrap();
        assert!(matches!(
            encoder.write_frame(&loud),
            Err(WavPackError::InvalidParameter(_))
        ));
        let stereo = PcmFrame::new(PcmSpec::new(44100, 2, 16), vec![1, 2]).unwrap();
        assert!(encoder.write_frame(&stereo).is_err());
    }

    #[test]
    fn test_empty_stream() {
        let spec = PcmSpec::new(44100, 2, 16);
        let encoder =
            WavPackEncoder::new(Cursor::new(Vec::new()), spec, EncoderConfig::default()).unwrap();
        let bytes = encoder.finish().unwrap().into_inner();

        let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.total_samples(), Some(0));
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(decoder.verify_integrity().is_ok());
    }
}
