//! RIFF/WAVE header wrapping.
//!
//! A stream may carry the header of the WAVE file it was made from as non-decoder
//! data in its first block, and any bytes that followed the audio in a trailing
//! block. This module builds a canonical header for a PCM spec and reads the
//! `fmt ` chunk back out of a stored header.

use crate::error::{Result, WavPackError};
use byteorder::{ByteOrder, LittleEndian};
use wavpack_core::{ChannelMask, PcmSpec};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// KSDATAFORMAT_SUBTYPE_PCM, minus the leading format tag.
const PCM_SUBFORMAT_TAIL: [u8; 14] = [
    0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// Audio description found in a `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Present only in extensible headers.
    pub channel_mask: Option<ChannelMask>,
}

fn needs_extensible(spec: &PcmSpec) -> bool {
    spec.channels > 2 || spec.channel_mask != ChannelMask::default_for(spec.channels)
}

/// Length of the header [`build_header`] produces for `spec`.
pub fn header_len(spec: &PcmSpec) -> usize {
    if needs_extensible(spec) {
        12 + 8 + 40 + 8
    } else {
        12 + 8 + 16 + 8
    }
}

/// Canonical `RIFF`/`WAVE` header for `data_bytes` bytes of PCM.
pub fn build_header(spec: &PcmSpec, data_bytes: u32) -> Vec<u8> {
    let extensible = needs_extensible(spec);
    let fmt_len: u32 = if extensible { 40 } else { 16 };
    let pad = data_bytes & 1;
    let riff_len = 4 + (8 + fmt_len) + 8 + data_bytes + pad;

    let block_align = spec.block_align() as u16;
    let mut out = Vec::with_capacity(header_len(spec));
    out.extend_from_slice(b"RIFF");
    push_u32(&mut out, riff_len);
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    push_u32(&mut out, fmt_len);
    push_u16(
        &mut out,
        if extensible {
            WAVE_FORMAT_EXTENSIBLE
        } else {
            WAVE_FORMAT_PCM
        },
    );
    push_u16(&mut out, spec.channels);
    push_u32(&mut out, spec.sample_rate);
    push_u32(&mut out, spec.sample_rate.wrapping_mul(block_align as u32));
    push_u16(&mut out, block_align);
    push_u16(&mut out, (spec.bytes_per_sample() * 8) as u16);
    if extensible {
        push_u16(&mut out, 22);
        push_u16(&mut out, spec.bits_per_sample);
        push_u32(&mut out, spec.channel_mask.bits());
        push_u16(&mut out, WAVE_FORMAT_PCM);
        out.extend_from_slice(&PCM_SUBFORMAT_TAIL);
    }

    out.extend_from_slice(b"data");
    push_u32(&mut out, data_bytes);
    out
}

/// Bytes that follow the audio: the RIFF pad byte for odd-sized data.
pub fn build_trailer(data_bytes: u32) -> Vec<u8> {
    if data_bytes & 1 == 1 {
        vec![0]
    } else {
        Vec::new()
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    out.extend_from_slice(&buf);
}

/// Find the `fmt ` chunk in a stored header.
pub fn parse_format(header: &[u8]) -> Result<WaveFormat> {
    if header.len() < 12 || &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(WavPackError::malformed("stored header is not RIFF/WAVE"));
    }

    let mut pos = 12;
    while pos + 8 <= header.len() {
        let id = &header[pos..pos + 4];
        let len = LittleEndian::read_u32(&header[pos + 4..pos + 8]) as usize;
        let body_start = pos + 8;
        if id == b"fmt " {
            let body = header
                .get(body_start..body_start.saturating_add(len))
                .filter(|b| b.len() >= 16)
                .ok_or_else(|| WavPackError::malformed("truncated fmt chunk"))?;
            return Ok(parse_fmt_body(body));
        }
        if id == b"data" {
            break;
        }
        pos = body_start.saturating_add(len + (len & 1));
    }
    Err(WavPackError::malformed("stored header has no fmt chunk"))
}

fn parse_fmt_body(body: &[u8]) -> WaveFormat {
    let format = LittleEndian::read_u16(&body[0..2]);
    let channel_mask = if format == WAVE_FORMAT_EXTENSIBLE && body.len() >= 24 {
        Some(ChannelMask(LittleEndian::read_u32(&body[20..24])))
    } else {
        None
    };
    WaveFormat {
        channels: LittleEndian::read_u16(&body[2..4]),
        sample_rate: LittleEndian::read_u32(&body[4..8]),
        bits_per_sample: LittleEndian::read_u16(&body[14..16]),
        channel_mask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_stereo_header() {
        let spec = PcmSpec::new(44100, 2, 16);
        let header = build_header(&spec, 4000);
        assert_eq!(header.len(), 44);
        assert_eq!(header.len(), header_len(&spec));
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(LittleEndian::read_u32(&header[4..8]), 36 + 4000);
        assert_eq!(LittleEndian::read_u16(&header[20..22]), 1);
        assert_eq!(LittleEndian::read_u32(&header[28..32]), 44100 * 4);
        assert_eq!(LittleEndian::read_u32(&header[40..44]), 4000);

        let format = parse_format(&header).unwrap();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.channels, 2);
        assert_eq!(format.bits_per_sample, 16);
        assert_eq!(format.channel_mask, None);
    }

    #[test]
    fn test_extensible_header() {
        let spec = PcmSpec::new(48000, 6, 24);
        let header = build_header(&spec, 36);
        assert_eq!(header.len(), header_len(&spec));
        assert_eq!(LittleEndian::read_u16(&header[20..22]), WAVE_FORMAT_EXTENSIBLE);

        let format = parse_format(&header).unwrap();
        assert_eq!(format.channels, 6);
        assert_eq!(format.bits_per_sample, 24);
        assert_eq!(format.channel_mask, Some(ChannelMask(0x3F)));
    }

    #[test]
    fn test_extensible_field_layout() {
        let spec = PcmSpec::new(96000, 3, 24).with_channel_mask(ChannelMask(0x7));
        let header = build_header(&spec, 900);
        assert_eq!(header.len(), 68);
        assert_eq!(LittleEndian::read_u32(&header[16..20]), 40);
        assert_eq!(LittleEndian::read_u16(&header[32..34]), 9);
        assert_eq!(LittleEndian::read_u16(&header[34..36]), 24);
        assert_eq!(LittleEndian::read_u16(&header[36..38]), 22);
        assert_eq!(LittleEndian::read_u16(&header[38..40]), 24);
        assert_eq!(LittleEndian::read_u32(&header[40..44]), 0x7);
        assert_eq!(LittleEndian::read_u16(&header[44..46]), WAVE_FORMAT_PCM);
        assert_eq!(&header[60..64], b"data");
        assert_eq!(LittleEndian::read_u32(&header[64..68]), 900);
    }

    #[test]
    fn test_odd_data_gets_pad() {
        let spec = PcmSpec::new(8000, 1, 8);
        let header = build_header(&spec, 5);
        assert_eq!(LittleEndian::read_u32(&header[4..8]), 36 + 5 + 1);
        assert_eq!(build_trailer(5), vec![0]);
        assert!(build_trailer(6).is_empty());
    }

    #[test]
    fn test_skips_unknown_chunks() {
        let spec = PcmSpec::new(22050, 1, 16);
        let canonical = build_header(&spec, 0);
        let mut header = canonical[..12].to_vec();
        header.extend_from_slice(b"LIST");
        header.extend_from_slice(&3u32.to_le_bytes());
        header.extend_from_slice(&[1, 2, 3, 0]);
        header.extend_from_slice(&canonical[12..]);
        assert_eq!(parse_format(&header).unwrap().sample_rate, 22050);
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        assert!(parse_format(b"not a wave header").is_err());
        assert!(parse_format(b"RIFF\x04\x00\x00\x00WAVE").is_err());
    }
}
