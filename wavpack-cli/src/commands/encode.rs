//! WAV to WavPack compression command.

use super::{format_size, progress_bar};
use crate::wav::WavSource;
use anyhow::Context;
use clap::Args;
use console::style;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use wavpack::{EncoderConfig, WavPackEncoder};
use wavpack_core::PcmSource;

/// Compress a WAV file.
#[derive(Args, Debug)]
pub struct CmdEncode {
    /// Input WAV file.
    pub input: PathBuf,

    /// Output path; defaults to the input with a `.wv` extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Encoder settings as JSON; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Samples per channel in each block.
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Decorrelation passes (0, 1, 2, 5, 10 or 16).
    #[arg(long)]
    pub passes: Option<usize>,

    /// Code channel pairs as left/right instead of mid/side.
    #[arg(long)]
    pub no_joint_stereo: bool,

    /// Skip the trailing MD5 block.
    #[arg(long)]
    pub no_md5: bool,

    /// Store a RIFF header so `decode` reproduces the original file layout.
    #[arg(long)]
    pub riff: bool,
}

impl CmdEncode {
    /// Execute the encode command.
    pub fn run(&self, progress: bool) -> anyhow::Result<()> {
        let config = self.encoder_config()?;
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("wv"));

        let reader = hound::WavReader::new(BufReader::new(
            File::open(&self.input)
                .with_context(|| format!("cannot open {}", self.input.display()))?,
        ))?;
        let mut source = WavSource::new(reader)?;
        let spec = source.spec();
        let total_frames = source.total_frames();
        info!(
            input = %self.input.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "encoding"
        );

        let started = Instant::now();
        let sink = BufWriter::new(
            File::create(&output).with_context(|| format!("cannot create {}", output.display()))?,
        );
        let block_size = config.block_size;
        let mut encoder = WavPackEncoder::new(sink, spec, config)?;

        let bar = progress_bar(Some(total_frames), progress)?;
        while let Some(frame) = source.read_frames(block_size)? {
            encoder.write_frame(&frame)?;
            bar.inc(frame.frame_count() as u64);
        }
        encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
        bar.finish_and_clear();

        report(&self.input, &output, started)
    }

    fn encoder_config(&self) -> anyhow::Result<EncoderConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid encoder config in {}", path.display()))?
            }
            None => EncoderConfig::default(),
        };
        if let Some(block_size) = self.block_size {
            config = config.with_block_size(block_size);
        }
        if let Some(passes) = self.passes {
            config = config.with_correlation_passes(passes);
        }
        if self.no_joint_stereo {
            config = config.with_joint_stereo(false);
        }
        if self.no_md5 {
            config = config.with_md5(false);
        }
        if self.riff {
            config = config.with_riff_wrapper(true);
        }
        config.validate()?;
        Ok(config)
    }
}

fn report(input: &Path, output: &Path, started: Instant) -> anyhow::Result<()> {
    let before = std::fs::metadata(input)?.len();
    let after = std::fs::metadata(output)?.len();
    let ratio = if before > 0 {
        after as f64 / before as f64 * 100.0
    } else {
        0.0
    };
    println!(
        "{} {} -> {} ({} -> {}, {:.1}%) in {:.2}s",
        style("Encoded").green().bold(),
        input.display(),
        output.display(),
        format_size(before),
        format_size(after),
        ratio,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
