#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;
use wavpack::WavPackDecoder;

fuzz_target!(|data: &[u8]| {
    // Errors are expected; panics and hangs are not
    let Ok(mut decoder) = WavPackDecoder::open(Cursor::new(data)) else {
        return;
    };
    let _ = decoder.verify_integrity();
});
