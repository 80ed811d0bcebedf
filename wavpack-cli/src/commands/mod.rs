//! CLI subcommand implementations.

pub mod decode;
pub mod encode;
pub mod info;
pub mod verify;

pub use decode::CmdDecode;
pub use encode::CmdEncode;
pub use info::CmdInfo;
pub use verify::CmdVerify;

use indicatif::{ProgressBar, ProgressStyle};

/// A frame counter bar, hidden when `enabled` is false.
pub(crate) fn progress_bar(total_frames: Option<u64>, enabled: bool) -> anyhow::Result<ProgressBar> {
    if !enabled {
        return Ok(ProgressBar::hidden());
    }
    let bar = match total_frames {
        Some(total) => ProgressBar::new(total).with_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% | ETA: {eta} | {msg}",
            )?
            .progress_chars("#>-"),
        ),
        None => ProgressBar::new_spinner().with_style(ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {pos} frames | {msg}",
        )?),
    };
    Ok(bar)
}

/// Format bytes as human-readable size.
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds as human-readable string.
pub(crate) fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    if total_seconds >= 3600 {
        format!("{}h{}m{}s", total_seconds / 3600, (total_seconds % 3600) / 60, total_seconds % 60)
    } else if total_seconds >= 60 {
        format!("{}m{}s", total_seconds / 60, total_seconds % 60)
    } else {
        format!("{:.2}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(1.5), "1.50s");
        assert_eq!(format_duration(125.0), "2m5s");
        assert_eq!(format_duration(3725.0), "1h2m5s");
    }
}
