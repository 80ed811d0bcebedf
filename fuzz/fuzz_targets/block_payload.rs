#![no_main]

//! Fuzz target for a single block payload behind a well-formed header.
//!
//! Skips the framing checks so the sub-block parser, the decorrelation state
//! loaders and the entropy decoder see arbitrary bytes.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wavpack::block::decode_block;
use wavpack::header::{BlockFlags, BlockHeader, HEADER_SIZE_AFTER_FIELD, VERSION};

#[derive(Arbitrary, Debug)]
struct BlockInput {
    bytes_per_sample_code: u8,
    mono: bool,
    joint_stereo: bool,
    false_stereo: bool,
    extended_integers: bool,
    block_samples: u16,
    crc: u32,
    payload: Vec<u8>,
}

fuzz_target!(|input: BlockInput| {
    let header = BlockHeader {
        block_size: HEADER_SIZE_AFTER_FIELD + input.payload.len() as u32,
        version: VERSION,
        track: 0,
        index: 0,
        total_samples: input.block_samples as u32,
        block_index: 0,
        block_samples: input.block_samples as u32,
        flags: BlockFlags {
            bytes_per_sample_code: input.bytes_per_sample_code & 3,
            mono: input.mono,
            joint_stereo: input.joint_stereo,
            false_stereo: input.false_stereo,
            extended_integers: input.extended_integers,
            initial_block: true,
            final_block: true,
            sample_rate_code: 9,
            ..BlockFlags::default()
        },
        crc: input.crc,
    };
    let _ = decode_block(header, &input.payload, false);
});
