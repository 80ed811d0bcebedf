//! RIFF/WAVE input through hound.

use hound::{SampleFormat, WavReader};
use std::io::{self, Read};
use wavpack_core::{PcmFrame, PcmSource, PcmSpec};

/// A [`PcmSource`] reading integer PCM from a WAV file.
pub struct WavSource<R: Read> {
    reader: WavReader<R>,
    spec: PcmSpec,
}

impl<R: Read> WavSource<R> {
    /// Wrap a reader, rejecting floating-point and odd sample widths.
    pub fn new(reader: WavReader<R>) -> anyhow::Result<Self> {
        let wav = reader.spec();
        if wav.sample_format != SampleFormat::Int {
            anyhow::bail!("floating-point WAV input is not supported");
        }
        if ![8, 16, 24, 32].contains(&wav.bits_per_sample) {
            anyhow::bail!("{}-bit WAV input is not supported", wav.bits_per_sample);
        }
        let spec = PcmSpec::new(wav.sample_rate, wav.channels, wav.bits_per_sample);
        Ok(Self { reader, spec })
    }

    /// Samples per channel in the file.
    pub fn total_frames(&self) -> u64 {
        self.reader.duration() as u64
    }
}

impl<R: Read> PcmSource for WavSource<R> {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn read_frames(&mut self, max_frames: usize) -> wavpack_core::Result<Option<PcmFrame>> {
        let wanted = max_frames.max(1) * self.spec.channels as usize;
        let samples = self
            .reader
            .samples::<i32>()
            .take(wanted)
            .collect::<Result<Vec<i32>, hound::Error>>()
            .map_err(|e| wavpack_core::Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        if samples.is_empty() {
            return Ok(None);
        }
        PcmFrame::new(self.spec, samples).map(Some)
    }
}
