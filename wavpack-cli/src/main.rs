//! wvtool - command-line front end for the WavPack codec.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod wav;

use commands::{CmdDecode, CmdEncode, CmdInfo, CmdVerify};

/// Command-line arguments for wvtool.
#[derive(Parser, Debug)]
#[command(name = "wvtool")]
#[command(version)]
#[command(about = "Lossless WavPack encoder, decoder and verifier")]
#[command(long_about = "wvtool converts between RIFF/WAVE and WavPack files.\n\n\
    EXAMPLES:\n    \
    wvtool encode input.wav -o output.wv\n    \
    wvtool encode input.wav --passes 16 --block-size 44100\n    \
    wvtool decode input.wv -o output.wav\n    \
    wvtool info input.wv --json\n    \
    wvtool verify input.wv")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress a WAV file
    Encode(CmdEncode),
    /// Restore a WAV file
    Decode(CmdDecode),
    /// Show stream parameters
    Info(CmdInfo),
    /// Decode a file and check its checksums
    Verify(CmdVerify),
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let progress = !args.quiet;
    match args.command {
        Command::Encode(cmd) => cmd.run(progress),
        Command::Decode(cmd) => cmd.run(progress),
        Command::Info(cmd) => cmd.run(),
        Command::Verify(cmd) => cmd.run(progress),
    }
}
