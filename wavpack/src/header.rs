//! Block header parsing and serialization.
//!
//! Every block opens with a fixed 32-byte header:
//!
//! ```text
//! offset  size  field
//!      0     4  "wvpk"
//!      4     4  block_size (bytes following this field)
//!      8     2  version
//!     10     1  track number
//!     11     1  index number
//!     12     4  total samples (0xFFFFFFFF = unknown)
//!     16     4  block index
//!     20     4  block samples
//!     24     4  flags
//!     28     4  CRC
//! ```
//!
//! All fields are little-endian. The flag word packs its fields from the least
//! significant bit upward.

use crate::error::{Result, WavPackError};
use std::io::Read;
use wavpack_core::{BitReader, BitWriter};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Bytes counted by `block_size` that belong to the header itself.
pub const HEADER_SIZE_AFTER_FIELD: u32 = 24;

/// Block magic.
pub const MAGIC: [u8; 4] = *b"wvpk";

/// Stream version written by the encoder.
pub const VERSION: u16 = 0x0410;

/// Oldest stream version the decoder accepts.
pub const MIN_VERSION: u16 = 0x0402;

/// `total_samples` value meaning "not known yet".
pub const UNKNOWN_TOTAL_SAMPLES: u32 = 0xFFFF_FFFF;

/// Byte offset of `total_samples` within the header.
pub const TOTAL_SAMPLES_OFFSET: u64 = 12;

/// Sample rates addressable by the 4-bit rate code.
pub const SAMPLE_RATES: [u32; 15] = [
    6000, 8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200,
    96000, 192000,
];

/// Rate code meaning "carried elsewhere".
pub const CUSTOM_SAMPLE_RATE: u8 = 15;

/// Look up the rate code for a sample rate.
pub fn sample_rate_code(rate: u32) -> u8 {
    SAMPLE_RATES
        .iter()
        .position(|&r| r == rate)
        .map_or(CUSTOM_SAMPLE_RATE, |i| i as u8)
}

/// Sample rate for a code, or `None` for code 15.
pub fn sample_rate_from_code(code: u8) -> Option<u32> {
    SAMPLE_RATES.get(code as usize).copied()
}

/// The packed flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags {
    /// Bytes per sample minus one (0..=3).
    pub bytes_per_sample_code: u8,
    pub mono: bool,
    pub hybrid: bool,
    pub joint_stereo: bool,
    pub cross_channel: bool,
    pub hybrid_noise_shaping: bool,
    pub floating_point: bool,
    pub extended_integers: bool,
    pub hybrid_controls_bitrate: bool,
    pub hybrid_noise_balanced: bool,
    pub initial_block: bool,
    pub final_block: bool,
    /// Left shift applied to all samples (5 bits).
    pub left_shift: u8,
    /// Bit length of the largest magnitude in the block (5 bits).
    pub max_magnitude: u8,
    /// Index into [`SAMPLE_RATES`], or 15.
    pub sample_rate_code: u8,
    /// Two reserved bits.
    pub reserved: u8,
    pub use_iir: bool,
    pub false_stereo: bool,
    /// Top bit; must be clear.
    pub reserved_high: bool,
}

impl BlockFlags {
    /// Unpack a flag word.
    pub fn from_bits(word: u32) -> Self {
        let mut shift = 0u32;
        let mut field = |n: u32| {
            let value = (word >> shift) & ((1 << n) - 1);
            shift += n;
            value as u8
        };
        Self {
            bytes_per_sample_code: field(2),
            mono: field(1) != 0,
            hybrid: field(1) != 0,
            joint_stereo: field(1) != 0,
            cross_channel: field(1) != 0,
            hybrid_noise_shaping: field(1) != 0,
            floating_point: field(1) != 0,
            extended_integers: field(1) != 0,
            hybrid_controls_bitrate: field(1) != 0,
            hybrid_noise_balanced: field(1) != 0,
            initial_block: field(1) != 0,
            final_block: field(1) != 0,
            left_shift: field(5),
            max_magnitude: field(5),
            sample_rate_code: field(4),
            reserved: field(2),
            use_iir: field(1) != 0,
            false_stereo: field(1) != 0,
            reserved_high: field(1) != 0,
        }
    }

    /// Pack into a flag word.
    pub fn to_bits(&self) -> u32 {
        let mut word = 0u32;
        let mut shift = 0u32;
        let mut put = |value: u32, n: u32| {
            word |= (value & ((1 << n) - 1)) << shift;
            shift += n;
        };
        put(self.bytes_per_sample_code as u32, 2);
        for bit in [
            self.mono,
            self.hybrid,
            self.joint_stereo,
            self.cross_channel,
            self.hybrid_noise_shaping,
            self.floating_point,
            self.extended_integers,
            self.hybrid_controls_bitrate,
            self.hybrid_noise_balanced,
            self.initial_block,
            self.final_block,
        ] {
            put(bit as u32, 1);
        }
        put(self.left_shift as u32, 5);
        put(self.max_magnitude as u32, 5);
        put(self.sample_rate_code as u32, 4);
        put(self.reserved as u32, 2);
        put(self.use_iir as u32, 1);
        put(self.false_stereo as u32, 1);
        put(self.reserved_high as u32, 1);
        word
    }

    /// Bits per sample implied by the byte-count code.
    pub fn bits_per_sample(&self) -> u16 {
        (self.bytes_per_sample_code as u16 + 1) * 8
    }

    /// Whether the block decodes to a single channel of residuals.
    pub fn is_single_channel(&self) -> bool {
        self.mono || self.false_stereo
    }

    /// Channels the block contributes to the output.
    pub fn output_channels(&self) -> usize {
        if self.mono {
            1
        } else {
            2
        }
    }
}

/// A parsed block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Byte count after the `block_size` field: 24 plus all sub-blocks.
    pub block_size: u32,
    pub version: u16,
    pub track: u8,
    pub index: u8,
    pub total_samples: u32,
    /// Index of this block's first sample within the stream.
    pub block_index: u32,
    /// Samples per channel in this block.
    pub block_samples: u32,
    pub flags: BlockFlags,
    pub crc: u32,
}

impl BlockHeader {
    /// Payload length following the header.
    pub fn payload_len(&self) -> usize {
        self.block_size.saturating_sub(HEADER_SIZE_AFTER_FIELD) as usize
    }

    /// Parse and validate a header.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[0..4] != MAGIC {
            return Err(WavPackError::malformed(format!(
                "bad magic {:02x?}",
                &bytes[0..4]
            )));
        }

        let mut r = BitReader::new(&bytes[4..]);
        let header = Self {
            block_size: r.read_u32()?,
            version: r.read_u16()?,
            track: r.read_u8()?,
            index: r.read_u8()?,
            total_samples: r.read_u32()?,
            block_index: r.read_u32()?,
            block_samples: r.read_u32()?,
            flags: BlockFlags::from_bits(r.read_u32()?),
            crc: r.read_u32()?,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.block_size < HEADER_SIZE_AFTER_FIELD || self.block_size % 2 != 0 {
            return Err(WavPackError::malformed(format!(
                "invalid block size {}",
                self.block_size
            )));
        }
        if !(MIN_VERSION..=VERSION).contains(&self.version) {
            return Err(WavPackError::malformed(format!(
                "unsupported stream version {:#x}",
                self.version
            )));
        }
        if self.flags.reserved_high {
            return Err(WavPackError::malformed("reserved flag bit set"));
        }
        if self.flags.hybrid {
            return Err(WavPackError::malformed("hybrid (lossy) blocks are not supported"));
        }
        if self.flags.floating_point {
            return Err(WavPackError::malformed("floating-point blocks are not supported"));
        }
        Ok(())
    }

    /// Read the next header, or `None` at a clean end of stream.
    pub fn read<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut bytes = [0u8; HEADER_SIZE];
        let filled = read_full(reader, &mut bytes)?;
        match filled {
            0 => Ok(None),
            HEADER_SIZE => Self::parse(&bytes).map(Some),
            _ => Err(WavPackError::Truncated),
        }
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut w = BitWriter::with_capacity(HEADER_SIZE);
        w.write_bytes(&MAGIC);
        w.write_u32(self.block_size);
        w.write_u16(self.version);
        w.write_u8(self.track);
        w.write_u8(self.index);
        w.write_u32(self.total_samples);
        w.write_u32(self.block_index);
        w.write_u32(self.block_samples);
        w.write_u32(self.flags.to_bits());
        w.write_u32(self.crc);

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(w.data());
        out
    }
}

/// Fill `buf` from `reader`, returning how many bytes arrived before end of stream.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            block_size: 24 + 64,
            version: VERSION,
            track: 0,
            index: 0,
            total_samples: 44100,
            block_index: 22050,
            block_samples: 22050,
            flags: BlockFlags {
                bytes_per_sample_code: 1,
                joint_stereo: true,
                initial_block: true,
                final_block: true,
                max_magnitude: 15,
                sample_rate_code: 9,
                ..Default::default()
            },
            crc: 0xDEAD_BEEF,
        }
    }

    #[test]
    fn test_flag_layout() {
        let flags = BlockFlags {
            bytes_per_sample_code: 1,
            mono: true,
            initial_block: true,
            final_block: true,
            sample_rate_code: 9,
            ..Default::default()
        };
        // 16-bit mono, initial and final, 44.1 kHz
        assert_eq!(flags.to_bits(), 0x1 | 0x4 | 0x800 | 0x1000 | (9 << 23));
        assert_eq!(BlockFlags::from_bits(flags.to_bits()), flags);
    }

    #[test]
    fn test_flag_fields_round_trip() {
        let flags = BlockFlags {
            bytes_per_sample_code: 3,
            cross_channel: true,
            extended_integers: true,
            left_shift: 31,
            max_magnitude: 17,
            sample_rate_code: 15,
            false_stereo: true,
            ..Default::default()
        };
        let word = flags.to_bits();
        assert_eq!(word >> 30 & 1, 1);
        assert_eq!(word >> 13 & 0x1f, 31);
        assert_eq!(word >> 18 & 0x1f, 17);
        assert_eq!(BlockFlags::from_bits(word), flags);
        assert_eq!(flags.bits_per_sample(), 32);
    }

    #[test]
    fn test_flags_from_raw_words() {
        let all = BlockFlags::from_bits(u32::MAX);
        assert_eq!(all.bytes_per_sample_code, 3);
        assert!(all.mono && all.final_block && all.use_iir && all.reserved_high);
        assert_eq!(all.left_shift, 31);
        assert_eq!(all.max_magnitude, 31);
        assert_eq!(all.sample_rate_code, 15);
        assert_eq!(all.reserved, 3);
        assert_eq!(all.to_bits(), u32::MAX);

        let top = BlockFlags::from_bits(0x8000_0000);
        assert_eq!(top, BlockFlags { reserved_high: true, ..Default::default() });

        let rate = BlockFlags::from_bits(0x5 << 23 | 0x3 << 27);
        assert_eq!(rate.sample_rate_code, 5);
        assert_eq!(rate.reserved, 3);
        assert!(!rate.use_iir);
    }

    #[test]
    fn test_header_round_trip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"wvpk");
        assert_eq!(&bytes[4..8], &88u32.to_le_bytes());
        assert_eq!(BlockHeader::parse(&bytes).unwrap(), header);
        assert_eq!(header.payload_len(), 64);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_header().to_bytes();
        bytes[0] = b'W';
        assert!(matches!(
            BlockHeader::parse(&bytes),
            Err(WavPackError::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_rejects_small_block_size() {
        let mut header = sample_header();
        header.block_size = 20;
        assert!(BlockHeader::parse(&header.to_bytes()).is_err());
    }

    #[test]
    fn test_read_eof_and_truncation() {
        let mut empty: &[u8] = &[];
        assert!(BlockHeader::read(&mut empty).unwrap().is_none());

        let bytes = sample_header().to_bytes();
        let mut short: &[u8] = &bytes[..20];
        assert!(matches!(
            BlockHeader::read(&mut short),
            Err(WavPackError::Truncated)
        ));
    }

    #[test]
    fn test_sample_rate_codes() {
        assert_eq!(sample_rate_code(44100), 9);
        assert_eq!(sample_rate_code(192000), 14);
        assert_eq!(sample_rate_code(44056), CUSTOM_SAMPLE_RATE);
        assert_eq!(sample_rate_from_code(0), Some(6000));
        assert_eq!(sample_rate_from_code(15), None);
    }
}
