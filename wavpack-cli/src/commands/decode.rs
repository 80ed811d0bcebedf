//! WavPack to WAV restoration command.

use super::{format_size, progress_bar};
use anyhow::Context;
use clap::Args;
use console::style;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use wavpack::{DecoderConfig, WavPackDecoder, WavPackError};

/// Restore a WAV file.
#[derive(Args, Debug)]
pub struct CmdDecode {
    /// Input WavPack file.
    pub input: PathBuf,

    /// Output path; defaults to the input with a `.wav` extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Decode even when a block checksum fails.
    #[arg(long)]
    pub ignore_crc: bool,

    /// Write a fresh header instead of the stored RIFF header.
    #[arg(long)]
    pub fresh_header: bool,
}

impl CmdDecode {
    /// Execute the decode command.
    pub fn run(&self, progress: bool) -> anyhow::Result<()> {
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("wav"));
        let config = DecoderConfig::default().with_crc_verification(!self.ignore_crc);
        let file = File::open(&self.input)
            .with_context(|| format!("cannot open {}", self.input.display()))?;
        let mut decoder = WavPackDecoder::new(BufReader::new(file), config)?;
        let spec = decoder.spec();
        info!(
            input = %self.input.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "decoding"
        );

        let started = Instant::now();
        let bar = progress_bar(decoder.total_samples().map(u64::from), progress)?;
        let stored_header = decoder.riff_header().map(<[u8]>::to_vec);
        match stored_header {
            Some(header) if !self.fresh_header => {
                let mut out = BufWriter::new(File::create(&output)?);
                out.write_all(&header)?;
                while let Some(frame) = decoder.next_frame()? {
                    out.write_all(&frame.to_le_bytes())?;
                    bar.inc(frame.frame_count() as u64);
                }
                if let Some(trailer) = decoder.riff_trailer() {
                    out.write_all(trailer)?;
                }
                out.flush()?;
            }
            _ => write_with_hound(&mut decoder, &output, &bar)?,
        }
        bar.finish_and_clear();

        match decoder.verify_integrity() {
            Ok(()) => {}
            Err(err @ WavPackError::IntegrityMismatch { .. }) => {
                warn!("{}", err);
                eprintln!("{} {}", style("Warning:").yellow().bold(), err);
            }
            Err(err) => return Err(err.into()),
        }

        println!(
            "{} {} -> {} ({}) in {:.2}s",
            style("Decoded").green().bold(),
            self.input.display(),
            output.display(),
            format_size(std::fs::metadata(&output)?.len()),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

fn write_with_hound<R: Read>(
    decoder: &mut WavPackDecoder<R>,
    output: &Path,
    bar: &indicatif::ProgressBar,
) -> anyhow::Result<()> {
    let spec = decoder.spec();
    let wav_spec = WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output, wav_spec)
        .with_context(|| format!("cannot create {}", output.display()))?;
    while let Some(frame) = decoder.next_frame()? {
        for &sample in frame.samples() {
            writer.write_sample(sample)?;
        }
        bar.inc(frame.frame_count() as u64);
    }
    writer.finalize()?;
    Ok(())
}
