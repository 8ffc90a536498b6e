//! CLI argument parsing

use crate::audio::tags::parse_comment;
use clap::Parser;
use std::path::PathBuf;

/// audioconv - batch audio conversion
///
/// Decodes WAV, AU, FLAC, MP3 and Ogg/Vorbis sources and re-encodes them
/// as 16-bit PCM WAV, several files at a time.
#[derive(Parser, Debug)]
#[command(name = "audioconv")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Input path (file or directory)
    #[arg(short, long, value_name = "PATH")]
    pub input: PathBuf,

    /// Output directory for converted files
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Source format, skipping detection (e.g. "Wave", "FLAC", "Mp3")
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Encoder quality, from -0.1 to 1.0
    #[arg(long, value_name = "Q", default_value_t = 0.4, allow_negative_numbers = true)]
    pub quality: f32,

    /// Number of concurrent jobs (defaults to CPU count)
    #[arg(short = 'j', long, value_name = "N", env = "AUDIOCONV_JOBS")]
    pub jobs: Option<usize>,

    /// Scan subdirectories recursively
    #[arg(short, long, default_value = "false")]
    pub recursive: bool,

    /// Convert even when the destination already exists
    #[arg(long, default_value = "false")]
    pub force: bool,

    /// Prefix the album tag with the release year ("1999 - Album")
    #[arg(long, default_value = "false")]
    pub prepend_year: bool,

    /// Override a tag on every output (repeatable, KEY=VALUE)
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag_override)]
    pub tags: Vec<(String, String)>,

    /// Write a JSON report of job outcomes to this path
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress progress bars)
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,

    /// Dry run - list the conversions without running them
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}

impl Cli {
    /// Get the log level based on verbosity flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

fn parse_tag_override(arg: &str) -> Result<(String, String), String> {
    parse_comment(arg).ok_or_else(|| format!("expected KEY=VALUE, got '{}'", arg))
}
