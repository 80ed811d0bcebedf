//! WavPack stream inspection command.

use super::{format_duration, format_size};
use anyhow::Context;
use clap::Args;
use console::style;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use wavpack::WavPackDecoder;

/// Stream parameters for display.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// File path.
    pub file: String,
    /// File size in bytes.
    pub size_bytes: u64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Speaker mask, hex formatted.
    pub channel_mask: String,
    pub bits_per_sample: u16,
    /// Samples per channel, if the header records it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_samples: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Compressed size relative to the PCM it holds, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_percent: Option<f64>,
    /// Whether a RIFF header is stored with the audio.
    pub riff_wrapped: bool,
}

/// Show stream parameters.
#[derive(Args, Debug)]
pub struct CmdInfo {
    /// Path to the WavPack file.
    pub file: PathBuf,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdInfo {
    /// Execute the info command.
    pub fn run(&self) -> anyhow::Result<()> {
        let info = self.analyze()?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            print_stream_info(&info);
        }
        Ok(())
    }

    fn analyze(&self) -> anyhow::Result<StreamInfo> {
        let size_bytes = std::fs::metadata(&self.file)
            .with_context(|| format!("File not found: {}", self.file.display()))?
            .len();
        let decoder = WavPackDecoder::open(BufReader::new(File::open(&self.file)?))?;
        let spec = decoder.spec();
        let total_samples = decoder.total_samples();

        let duration_seconds = total_samples.map(|n| n as f64 / spec.sample_rate as f64);
        let compression_percent = total_samples
            .map(|n| n as u64 * spec.block_align() as u64)
            .filter(|&pcm| pcm > 0)
            .map(|pcm| size_bytes as f64 / pcm as f64 * 100.0);

        Ok(StreamInfo {
            file: self.file.display().to_string(),
            size_bytes,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            channel_mask: spec.channel_mask.to_string(),
            bits_per_sample: spec.bits_per_sample,
            total_samples,
            duration_seconds,
            compression_percent,
            riff_wrapped: decoder.riff_header().is_some(),
        })
    }
}

fn print_stream_info(info: &StreamInfo) {
    println!();
    println!("{}", style("WavPack Stream").cyan().bold());
    println!();
    println!("  {:<16} {}", style("File:").white(), info.file);
    println!("  {:<16} {}", style("Size:").white(), format_size(info.size_bytes));
    println!("  {:<16} {} Hz", style("Sample rate:").white(), info.sample_rate);
    println!(
        "  {:<16} {} (mask {})",
        style("Channels:").white(),
        info.channels,
        info.channel_mask
    );
    println!("  {:<16} {}", style("Bit depth:").white(), info.bits_per_sample);
    match info.total_samples {
        Some(n) => println!("  {:<16} {}", style("Samples:").white(), n),
        None => println!("  {:<16} {}", style("Samples:").white(), style("unknown").yellow()),
    }
    if let Some(duration) = info.duration_seconds {
        println!("  {:<16} {}", style("Duration:").white(), format_duration(duration));
    }
    if let Some(percent) = info.compression_percent {
        println!("  {:<16} {:.1}%", style("Compression:").white(), percent);
    }
    println!("  {:<16} {}", style("RIFF header:").white(), info.riff_wrapped);
    println!();
}
