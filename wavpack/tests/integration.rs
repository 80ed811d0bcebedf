//! Integration tests for wavpack

use md5::{Digest, Md5};
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use wavpack::header::{BlockFlags, BlockHeader, HEADER_SIZE, VERSION};
use wavpack::subblock::{write_sub_block, SubBlockId};
use wavpack::{encode, encode_with_config, EncoderConfig, WavPackDecoder, WavPackEncoder, WavPackError};
use wavpack_core::{BitWriter, ChannelMask, MemorySource, PcmFrame, PcmSpec};

/// Helper to create a sine wave for testing
fn generate_sine_wave(sample_rate: u32, frequency: f64, frames: usize, amplitude: f64) -> Vec<i32> {
    (0..frames)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            (amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()) as i32
        })
        .collect()
}

/// Interleave channels, giving each one its own frequency and a little noise.
fn generate_program(spec: &PcmSpec, frames: usize) -> Vec<i32> {
    let channels = spec.channels as usize;
    let amplitude = spec.max_sample() as f64 * 0.7;
    let noise_span = (spec.max_sample() / 64).max(1);
    let mut seed = 0x2545_f491u64;

    let tones: Vec<Vec<i32>> = (0..channels)
        .map(|c| generate_sine_wave(spec.sample_rate, 220.0 * (c + 1) as f64, frames, amplitude))
        .collect();

    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for tone in &tones {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let noise = ((seed >> 33) as i64 % noise_span) - noise_span / 2;
            let value = (tone[i] as i64 + noise).clamp(spec.min_sample(), spec.max_sample());
            samples.push(value as i32);
        }
    }
    samples
}

fn encode_samples(spec: PcmSpec, samples: &[i32], config: EncoderConfig) -> Vec<u8> {
    let mut source = MemorySource::new(spec, samples.to_vec()).unwrap();
    encode_with_config(Cursor::new(Vec::new()), &mut source, config)
        .unwrap()
        .into_inner()
}

fn decode_all(bytes: Vec<u8>) -> (PcmSpec, Vec<i32>) {
    let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
    let mut samples = Vec::new();
    while let Some(frame) = decoder.next_frame().unwrap() {
        samples.extend_from_slice(frame.samples());
    }
    decoder.verify_integrity().unwrap();
    (decoder.spec(), samples)
}

fn first_header(bytes: &[u8]) -> BlockHeader {
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&bytes[..HEADER_SIZE]);
    BlockHeader::parse(&raw).unwrap()
}

#[test]
fn test_round_trip_grid() {
    for bits in [8u16, 16, 24, 32] {
        for channels in [1u16, 2] {
            for passes in [0usize, 1, 2, 5, 10, 16] {
                let spec = PcmSpec::new(44100, channels, bits);
                let samples = generate_program(&spec, 1500);
                let config = EncoderConfig::default()
                    .with_block_size(512)
                    .with_correlation_passes(passes);
                let bytes = encode_samples(spec, &samples, config);

                let (decoded_spec, decoded) = decode_all(bytes);
                assert_eq!(decoded_spec.channels, channels);
                assert_eq!(decoded_spec.bits_per_sample, bits);
                assert_eq!(
                    decoded, samples,
                    "{} bit, {} ch, {} passes",
                    bits, channels, passes
                );
            }
        }
    }
}

#[test]
fn test_stereo_sine_md5() {
    let spec = PcmSpec::new(44100, 2, 16);
    let mono = generate_sine_wave(44100, 440.0, 4096, 16000.0);
    let samples: Vec<i32> = mono.iter().flat_map(|&s| [s, s / 2]).collect();

    let mut source = MemorySource::new(spec, samples.clone()).unwrap();
    let bytes = encode(Cursor::new(Vec::new()), &mut source, 4096, 5)
        .unwrap()
        .into_inner();
    assert!(bytes.len() < samples.len() * 2, "sine should compress");

    let header = first_header(&bytes);
    assert_eq!(header.version, VERSION);
    assert_eq!(header.total_samples, 4096);
    assert_eq!(header.block_samples, 4096);
    assert!(header.flags.joint_stereo);

    let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
    assert_eq!(decoder.sample_rate(), 44100);
    assert_eq!(decoder.total_samples(), Some(4096));
    let mut decoded = Vec::new();
    while let Some(frame) = decoder.next_frame().unwrap() {
        decoded.extend_from_slice(frame.samples());
    }
    assert_eq!(decoded, samples);

    let digest = Md5::digest(PcmFrame::new(spec, samples).unwrap().to_le_bytes());
    let expected: [u8; 16] = digest.as_slice().try_into().unwrap();
    assert_eq!(decoder.md5_stored(), Some(expected));
    assert_eq!(decoder.md5_computed(), Some(expected));
    assert!(decoder.verify_integrity().is_ok());
}

#[test]
fn test_rejects_too_many_passes() {
    // 20 lag-1 terms with delta 2
    let mut payload = BitWriter::new();
    write_sub_block(&mut payload, SubBlockId::Terms, &[0x46; 20]).unwrap();
    let payload = payload.into_data();

    let header = BlockHeader {
        block_size: 24 + payload.len() as u32,
        version: VERSION,
        track: 0,
        index: 0,
        total_samples: 10,
        block_index: 0,
        block_samples: 10,
        flags: BlockFlags {
            bytes_per_sample_code: 1,
            mono: true,
            initial_block: true,
            final_block: true,
            sample_rate_code: 9,
            ..BlockFlags::default()
        },
        crc: 0xFFFF_FFFF,
    };
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(&payload);

    match WavPackDecoder::open(Cursor::new(bytes)) {
        Err(WavPackError::InvalidPassCount(20)) => {}
        other => panic!("expected InvalidPassCount, got {:?}", other.err()),
    }
}

#[test]
fn test_truncated_stream() {
    let spec = PcmSpec::new(44100, 2, 16);
    let samples = generate_program(&spec, 2000);
    let bytes = encode_samples(spec, &samples, EncoderConfig::default().with_block_size(1000));
    let header = first_header(&bytes);

    // cut inside the first block's payload
    let cut = HEADER_SIZE + header.payload_len() / 2;
    let err = WavPackDecoder::open(Cursor::new(bytes[..cut].to_vec())).err().unwrap();
    assert!(matches!(err, WavPackError::Truncated), "{:?}", err);

    // cut inside the second block's header
    let cut = HEADER_SIZE + header.payload_len() + 10;
    let mut decoder = WavPackDecoder::open(Cursor::new(bytes[..cut].to_vec())).unwrap();
    let first = decoder.next_frame().unwrap().unwrap();
    assert_eq!(first.frame_count(), 1000);
    assert!(matches!(decoder.next_frame(), Err(WavPackError::Truncated)));
}

#[test]
fn test_truncated_at_block_boundary() {
    let spec = PcmSpec::new(44100, 2, 16);
    let samples = generate_program(&spec, 1000);
    let bytes = encode_samples(spec, &samples, EncoderConfig::default().with_block_size(256));
    let header = first_header(&bytes);
    let cut = HEADER_SIZE + header.payload_len();

    let mut decoder = WavPackDecoder::open(Cursor::new(bytes[..cut].to_vec())).unwrap();
    assert_eq!(decoder.total_samples(), Some(1000));
    let first = decoder.next_frame().unwrap().unwrap();
    assert_eq!(first.frame_count(), 256);
    assert!(matches!(decoder.next_frame(), Err(WavPackError::Truncated)));

    let mut decoder = WavPackDecoder::open(Cursor::new(bytes[..cut].to_vec())).unwrap();
    assert!(matches!(decoder.verify_integrity(), Err(WavPackError::Truncated)));
}

#[test]
fn test_extended_integers_round_trip() {
    // 16-bit content carried in 24-bit samples
    let spec = PcmSpec::new(48000, 2, 24);
    let samples: Vec<i32> = generate_program(&PcmSpec::new(48000, 2, 16), 3000)
        .into_iter()
        .map(|s| s << 8)
        .collect();
    let bytes = encode_samples(spec, &samples, EncoderConfig::default().with_block_size(1024));
    assert!(first_header(&bytes).flags.extended_integers);

    let (_, decoded) = decode_all(bytes);
    assert_eq!(decoded, samples);

    // low bits set to one
    let spec = PcmSpec::new(48000, 1, 16);
    let samples: Vec<i32> = generate_sine_wave(48000, 300.0, 2000, 2000.0)
        .into_iter()
        .map(|s| (s << 4) | 0xF)
        .collect();
    let bytes = encode_samples(spec, &samples, EncoderConfig::default());
    assert!(first_header(&bytes).flags.extended_integers);
    let (_, decoded) = decode_all(bytes);
    assert_eq!(decoded, samples);
}

#[test]
fn test_multichannel_layout() {
    let spec = PcmSpec::new(48000, 6, 16).with_channel_mask(ChannelMask(0x3F));
    let samples = generate_program(&spec, 2500);
    let bytes = encode_samples(spec, &samples, EncoderConfig::default().with_block_size(1000));

    let first = first_header(&bytes);
    assert!(first.flags.initial_block);
    assert!(!first.flags.final_block);

    let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
    assert_eq!(decoder.channels(), 6);
    assert_eq!(decoder.channel_mask(), ChannelMask(0x3F));
    let mut decoded = Vec::new();
    loop {
        let frame = decoder.read(4096).unwrap();
        if frame.is_empty() {
            break;
        }
        decoded.extend_from_slice(frame.samples());
    }
    assert_eq!(decoded, samples);
    assert!(decoder.verify_integrity().is_ok());
}

#[test]
fn test_multichannel_without_parallel_groups() {
    let spec = PcmSpec::new(48000, 3, 24);
    let samples = generate_program(&spec, 800);
    let config = EncoderConfig::default()
        .with_block_size(256)
        .with_parallel_groups(false)
        .with_joint_stereo(false);
    let bytes = encode_samples(spec, &samples, config);

    let decoder_config = wavpack::DecoderConfig::default().with_parallel_groups(false);
    let mut decoder = WavPackDecoder::new(Cursor::new(bytes), decoder_config).unwrap();
    let mut decoded = Vec::new();
    while let Some(frame) = decoder.next_frame().unwrap() {
        decoded.extend_from_slice(frame.samples());
    }
    assert_eq!(decoded, samples);
}

#[test]
fn test_custom_sample_rate() {
    let spec = PcmSpec::new(12345, 1, 16);
    let samples = generate_program(&spec, 1000);
    let bytes = encode_samples(spec, &samples, EncoderConfig::default());
    assert_eq!(first_header(&bytes).flags.sample_rate_code, 15);

    let (decoded_spec, decoded) = decode_all(bytes);
    assert_eq!(decoded_spec.sample_rate, 12345);
    assert_eq!(decoded, samples);
}

#[test]
fn test_riff_wrapper() {
    // 8-bit mono with an odd byte count needs a pad byte after the data chunk
    let spec = PcmSpec::new(22050, 1, 8);
    let samples = generate_program(&spec, 1001);
    let config = EncoderConfig::default()
        .with_block_size(400)
        .with_riff_wrapper(true);
    let bytes = encode_samples(spec, &samples, config);

    let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
    let header = decoder.riff_header().unwrap().to_vec();
    assert_eq!(&header[0..4], b"RIFF");
    assert_eq!(&header[8..12], b"WAVE");
    assert_eq!(header.len(), 44);
    assert_eq!(u32::from_le_bytes([header[40], header[41], header[42], header[43]]), 1001);
    assert_eq!(
        u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
        36 + 1001 + 1
    );

    let mut decoded = Vec::new();
    while let Some(frame) = decoder.next_frame().unwrap() {
        decoded.extend_from_slice(frame.samples());
    }
    assert_eq!(decoded, samples);
    assert_eq!(decoder.riff_trailer(), Some(&[0u8][..]));
}

/// A sink that accepts writes but refuses to seek.
struct NoSeek(Vec<u8>);

impl Write for NoSeek {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for NoSeek {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "not seekable"))
    }
}

/// Reports its position but refuses to move.
struct AppendOnly(Vec<u8>);

impl Write for AppendOnly {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for AppendOnly {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.0.len() as u64),
            _ => Err(io::Error::new(io::ErrorKind::Unsupported, "append only")),
        }
    }
}

#[test]
fn test_seek_unsupported() {
    let spec = PcmSpec::new(44100, 2, 16);
    assert!(matches!(
        WavPackEncoder::new(NoSeek(Vec::new()), spec, EncoderConfig::default()),
        Err(WavPackError::SeekUnsupported)
    ));

    let samples = generate_program(&spec, 600);
    let mut encoder = WavPackEncoder::new(AppendOnly(Vec::new()), spec, EncoderConfig::default()).unwrap();
    encoder.write_frame(&PcmFrame::new(spec, samples).unwrap()).unwrap();
    assert!(matches!(encoder.finish(), Err(WavPackError::SeekUnsupported)));
}

#[test]
fn test_md5_mismatch() {
    let spec = PcmSpec::new(44100, 1, 16);
    let samples = generate_program(&spec, 700);
    let mut bytes = encode_samples(spec, &samples, EncoderConfig::default());

    // the digest is the last sub-block of the trailing metadata block
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
    let err = decoder.verify_integrity().unwrap_err();
    assert!(!err.is_fatal());
    match err {
        WavPackError::IntegrityMismatch { expected, computed } => {
            assert_ne!(expected, computed);
            assert_eq!(expected.len(), 32);
        }
        other => panic!("expected IntegrityMismatch, got {:?}", other),
    }
}

#[test]
fn test_without_md5_verifies_trivially() {
    let spec = PcmSpec::new(44100, 2, 16);
    let samples = generate_program(&spec, 300);
    let bytes = encode_samples(spec, &samples, EncoderConfig::default().with_md5(false));

    let mut decoder = WavPackDecoder::open(Cursor::new(bytes)).unwrap();
    assert!(decoder.verify_integrity().is_ok());
    assert_eq!(decoder.md5_stored(), None);
    assert!(decoder.is_finished());
}

#[test]
fn test_silence_compresses() {
    let spec = PcmSpec::new(44100, 2, 16);
    let samples = vec![0i32; 44100 * 2];
    let bytes = encode_samples(spec, &samples, EncoderConfig::default());
    assert!(bytes.len() < 1024, "silence took {} bytes", bytes.len());

    let (_, decoded) = decode_all(bytes);
    assert_eq!(decoded, samples);
}

#[test]
fn test_false_stereo() {
    let spec = PcmSpec::new(44100, 2, 16);
    let mono = generate_sine_wave(44100, 1000.0, 3000, 12000.0);
    let samples: Vec<i32> = mono.iter().flat_map(|&s| [s, s]).collect();
    let bytes = encode_samples(spec, &samples, EncoderConfig::default());
    assert!(first_header(&bytes).flags.false_stereo);

    let (_, decoded) = decode_all(bytes);
    assert_eq!(decoded, samples);
}
