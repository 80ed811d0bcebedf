#![no_main]

//! Fuzz target for BitReader edge cases.
//!
//! Runs arbitrary operation sequences against the least-significant-bit-first
//! cursor, checking that reads past the end fail cleanly and that a
//! write/read round trip returns what was written.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wavpack_core::bitstream::{BitReader, BitWriter};

#[derive(Arbitrary, Debug)]
struct BitstreamInput {
    data: Vec<u8>,
    operations: Vec<BitOperation>,
    writes: Vec<WriteOperation>,
    roundtrip: bool,
}

#[derive(Arbitrary, Debug, Clone)]
enum BitOperation {
    ReadBit,
    /// Read n bits (1-32)
    ReadBits(u8),
    /// Read n bits as u64 (1-64)
    ReadBitsU64(u8),
    ReadSigned(u8),
    ReadUnary { stop: bool, limit: u8 },
    ReadU16,
    ReadU32,
    /// Skip n bytes
    Skip(u8),
    ReadBytes(u8),
    Substream(u8),
    Mark,
    Rewind,
    Unmark,
    ByteAlign,
}

#[derive(Arbitrary, Debug, Clone)]
enum WriteOperation {
    WriteBit(bool),
    WriteBits { value: u32, n: u8 },
    WriteBitsU64 { value: u64, n: u8 },
    WriteUnary { stop: bool, count: u8 },
    ByteAlign,
}

fuzz_target!(|input: BitstreamInput| {
    // Limit operations to prevent DoS
    if input.operations.len() > 10000 || input.writes.len() > 10000 {
        return;
    }

    if input.roundtrip {
        let mut writer = BitWriter::new();
        for op in input.writes.iter().take(1000) {
            apply_write(&mut writer, op);
        }
        let data = writer.into_data();

        let mut reader = BitReader::new(&data);
        for op in input.writes.iter().take(1000) {
            match op {
                WriteOperation::WriteBit(bit) => {
                    assert_eq!(reader.read_bit().unwrap(), *bit);
                }
                WriteOperation::WriteBits { value, n } => {
                    let bits = (*n % 32).max(1);
                    let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
                    assert_eq!(reader.read_bits(bits).unwrap(), value & mask);
                }
                WriteOperation::WriteBitsU64 { value, n } => {
                    let bits = (*n % 64).max(1);
                    let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
                    assert_eq!(reader.read_bits_u64(bits).unwrap(), value & mask);
                }
                WriteOperation::WriteUnary { stop, count } => {
                    assert_eq!(reader.read_unary(*stop).unwrap(), *count as u32);
                }
                WriteOperation::ByteAlign => reader.byte_align(),
            }
        }
        return;
    }

    let mut reader = BitReader::new(&input.data);
    for op in input.operations.iter().take(1000) {
        match op {
            BitOperation::ReadBit => {
                let _ = reader.read_bit();
            }
            BitOperation::ReadBits(n) => {
                let _ = reader.read_bits((*n % 32).max(1));
            }
            BitOperation::ReadBitsU64(n) => {
                let _ = reader.read_bits_u64((*n % 64).max(1));
            }
            BitOperation::ReadSigned(n) => {
                let _ = reader.read_signed((*n % 32).max(1) as u32);
            }
            BitOperation::ReadUnary { stop, limit } => {
                let _ = reader.read_unary_limited(*stop, *limit as u32);
            }
            BitOperation::ReadU16 => {
                let _ = reader.read_u16();
            }
            BitOperation::ReadU32 => {
                let _ = reader.read_u32();
            }
            BitOperation::Skip(n) => {
                let _ = reader.skip(*n as usize);
            }
            BitOperation::ReadBytes(n) => {
                let _ = reader.read_bytes(*n as usize);
            }
            BitOperation::Substream(n) => {
                if let Ok(mut sub) = reader.substream(*n as usize) {
                    let _ = sub.read_bits(8);
                    assert!(sub.position() <= sub.total_bits());
                }
            }
            BitOperation::Mark => {
                let _ = reader.mark();
            }
            BitOperation::Rewind => {
                let _ = reader.rewind();
            }
            BitOperation::Unmark => {
                let _ = reader.unmark();
            }
            BitOperation::ByteAlign => reader.byte_align(),
        }
        assert!(reader.position() <= reader.total_bits());
    }
});

fn apply_write(writer: &mut BitWriter, op: &WriteOperation) {
    match op {
        WriteOperation::WriteBit(bit) => writer.write_bit(*bit),
        WriteOperation::WriteBits { value, n } => writer.write_bits(*value, (*n % 32).max(1)),
        WriteOperation::WriteBitsU64 { value, n } => {
            writer.write_bits_u64(*value, (*n % 64).max(1))
        }
        WriteOperation::WriteUnary { stop, count } => writer.write_unary(*stop, *count as u32),
        WriteOperation::ByteAlign => writer.byte_align(),
    }
}
