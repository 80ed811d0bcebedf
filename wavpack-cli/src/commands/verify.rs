//! Integrity check command.

use super::progress_bar;
use anyhow::Context;
use clap::Args;
use console::style;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use wavpack::{WavPackDecoder, WavPackError};

/// Outcome of a verification run.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub file: String,
    pub frames: u64,
    /// Stored MD5, hex encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_stored: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_computed: Option<String>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Decode a file and check its block checksums and MD5.
#[derive(Args, Debug)]
pub struct CmdVerify {
    /// Path to the WavPack file.
    pub file: PathBuf,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdVerify {
    /// Execute the verify command.
    pub fn run(&self, progress: bool) -> anyhow::Result<()> {
        let report = self.check(progress && !self.json)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if report.passed {
            println!(
                "{} {} ({} frames{})",
                style("OK").green().bold(),
                report.file,
                report.frames,
                if report.md5_stored.is_some() { ", MD5 verified" } else { ", no MD5 stored" }
            );
        } else {
            println!(
                "{} {}: {}",
                style("FAILED").red().bold(),
                report.file,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }

        if !report.passed {
            std::process::exit(1);
        }
        Ok(())
    }

    fn check(&self, progress: bool) -> anyhow::Result<VerifyReport> {
        let file = File::open(&self.file)
            .with_context(|| format!("cannot open {}", self.file.display()))?;
        let mut report = VerifyReport {
            file: self.file.display().to_string(),
            frames: 0,
            md5_stored: None,
            md5_computed: None,
            passed: false,
            error: None,
        };

        let mut decoder = match WavPackDecoder::open(BufReader::new(file)) {
            Ok(decoder) => decoder,
            Err(err) => {
                report.error = Some(err.to_string());
                return Ok(report);
            }
        };
        let bar = progress_bar(decoder.total_samples().map(u64::from), progress)?;

        let outcome = (|| -> Result<(), WavPackError> {
            while let Some(frame) = decoder.next_frame()? {
                report.frames += frame.frame_count() as u64;
                bar.inc(frame.frame_count() as u64);
            }
            decoder.verify_integrity()
        })();
        bar.finish_and_clear();

        report.md5_stored = decoder.md5_stored().map(|d| hex(&d));
        report.md5_computed = decoder.md5_computed().map(|d| hex(&d));
        match outcome {
            Ok(()) => report.passed = true,
            Err(err) => report.error = Some(err.to_string()),
        }
        Ok(report)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use wavpack::EncoderConfig;
    use wavpack_core::{MemorySource, PcmSpec};

    fn write_stream(path: &std::path::Path, corrupt_md5: bool) {
        let spec = PcmSpec::new(44100, 2, 16);
        let samples: Vec<i32> = (0..2000).map(|i| ((i as f64 * 0.01).sin() * 8000.0) as i32).collect();
        let mut source = MemorySource::new(spec, samples).unwrap();
        let mut bytes = wavpack::encode_with_config(
            Cursor::new(Vec::new()),
            &mut source,
            EncoderConfig::default().with_block_size(300),
        )
        .unwrap()
        .into_inner();
        if corrupt_md5 {
            let last = bytes.len() - 1;
            bytes[last] ^= 0x01;
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_verify_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.wv");
        write_stream(&path, false);

        let cmd = CmdVerify { file: path, json: true };
        let report = cmd.check(false).unwrap();
        assert!(report.passed, "{:?}", report.error);
        assert_eq!(report.frames, 1000);
        assert_eq!(report.md5_stored, report.md5_computed);
    }

    #[test]
    fn test_verify_reports_md5_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wv");
        write_stream(&path, true);

        let cmd = CmdVerify { file: path, json: true };
        let report = cmd.check(false).unwrap();
        assert!(!report.passed);
        assert!(report.error.unwrap().contains("MD5"));
        assert_ne!(report.md5_stored, report.md5_computed);
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wv");
        std::fs::write(&path, b"not a wavpack file at all, definitely not").unwrap();

        let report = CmdVerify { file: path, json: true }.check(false).unwrap();
        assert!(!report.passed);
        assert!(report.error.is_some());
    }
}
