//! Runtime configuration settings

use crate::types::{JobFlags, DEFAULT_QUALITY};
use std::path::PathBuf;

/// Runtime settings for a conversion run
#[derive(Debug, Clone)]
pub struct Settings {
    /// Input path (file or directory)
    pub input: PathBuf,
    /// Output directory
    pub output: PathBuf,
    /// Source format hint, skipping detection
    pub format_hint: Option<String>,
    /// Encoder quality
    pub quality: f32,
    /// Number of concurrent jobs
    pub concurrent_jobs: usize,
    /// Scan recursively
    pub recursive: bool,
    /// Convert even when the destination exists
    pub force: bool,
    /// Per-job tag rewrites
    pub flags: JobFlags,
    /// Tags forced on every output
    pub tag_overrides: Vec<(String, String)>,
    /// JSON report destination
    pub report: Option<PathBuf>,
    /// Show progress bars
    pub show_progress: bool,
    /// Dry run mode - list conversions without running them
    pub dry_run: bool,
}

impl Settings {
    /// Create settings from CLI arguments
    pub fn from_cli(cli: &super::cli::Cli) -> Self {
        Self {
            input: cli.input.clone(),
            output: cli.output.clone(),
            format_hint: cli.format.clone(),
            quality: cli.quality,
            concurrent_jobs: cli.jobs.filter(|&n| n > 0).unwrap_or_else(num_cpus::get),
            recursive: cli.recursive,
            force: cli.force,
            flags: JobFlags {
                prepend_year_to_album: cli.prepend_year,
            },
            tag_overrides: cli.tags.clone(),
            report: cli.report.clone(),
            show_progress: !cli.quiet,
            dry_run: cli.dry_run,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: PathBuf::from("."),
            output: PathBuf::from("./converted"),
            format_hint: None,
            quality: DEFAULT_QUALITY,
            concurrent_jobs: num_cpus::get(),
            recursive: false,
            force: false,
            flags: JobFlags::default(),
            tag_overrides: Vec::new(),
            report: None,
            show_progress: true,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;

    #[test]
    fn test_from_cli() {
        let cli = Cli::try_parse_from([
            "audioconv",
            "-i",
            "music",
            "-o",
            "out",
            "-j",
            "0",
            "--prepend-year",
            "--format",
            "FLAC",
        ])
        .unwrap();
        let settings = Settings::from_cli(&cli);

        assert_eq!(settings.concurrent_jobs, num_cpus::get());
        assert!(settings.flags.prepend_year_to_album);
        assert_eq!(settings.format_hint.as_deref(), Some("FLAC"));
        assert!(settings.show_progress);
    }
}
