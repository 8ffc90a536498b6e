//! Batch conversion driver
//!
//! Discovers sources, plans destinations, queues one job per source on a
//! [`JobCoordinator`] and waits for all of them, showing progress and
//! collecting a report record per source.

use crate::config::Settings;
use crate::discovery::{self, PlannedConversion, SkipReason};
use crate::encode::{EncoderFactory, WavEncoderFactory};
use crate::error::Result;
use crate::export::{self, JobRecord};
use crate::formats::default_registry;
use crate::pipeline::coordinator::{JobCoordinator, JobObserver};
use crate::types::{JobId, JobRequest, JobResult};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Batch result summary
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Run a whole conversion batch
pub fn run(settings: &Settings) -> Result<BatchResult> {
    let batch_start = Instant::now();
    let registry = Arc::new(default_registry());
    let encoder: Arc<dyn EncoderFactory> = Arc::new(WavEncoderFactory);

    info!("Scanning for audio files...");
    let files = discovery::scan(&settings.input, settings.recursive, &registry)?;
    if files.is_empty() {
        return Ok(BatchResult::default());
    }

    let planned = discovery::plan(&files, &settings.output, encoder.extension(), settings.force);

    if settings.dry_run {
        return Ok(print_dry_run(&planned, encoder.name()));
    }

    let (to_convert, skipped): (Vec<_>, Vec<_>) = planned.into_iter().partition(|p| !p.is_skipped());
    let existing = skipped
        .iter()
        .filter(|p| p.skip == Some(SkipReason::Exists))
        .count();
    if existing > 0 {
        info!(
            "Skipping {} already-converted files (use --force to convert again)",
            existing
        );
    }

    let records = Rc::new(RefCell::new(Vec::with_capacity(to_convert.len() + skipped.len())));
    let mut coordinator = JobCoordinator::new(registry, encoder, settings.concurrent_jobs);
    coordinator.add_observer(Box::new(BatchObserver::new(
        Rc::clone(&records),
        settings.show_progress.then(|| ProgressView::new(to_convert.len())),
    )));

    for conversion in &to_convert {
        let request = JobRequest {
            format_hint: settings.format_hint.clone(),
            quality: settings.quality,
            flags: settings.flags,
            tag_overrides: settings.tag_overrides.clone(),
            ..JobRequest::new(&conversion.source, &conversion.destination)
        };
        coordinator.add_job(request)?;
    }

    coordinator.wait();
    drop(coordinator);

    let mut records = records.take();
    records.extend(skipped.iter().map(|conversion| JobRecord {
        job_id: None,
        source: conversion.source.clone(),
        destination: conversion.destination.clone(),
        format: None,
        result: None,
        duration_seconds: None,
        skipped: conversion.skip,
    }));
    records.sort_by(|a, b| a.source.cmp(&b.source));

    if let Some(report) = &settings.report {
        export::write_report(&records, report)?;
    }

    let successful = records
        .iter()
        .filter(|r| r.result.is_some_and(JobResult::is_success))
        .count();
    let converted = records.iter().filter(|r| !r.is_skipped()).count();

    info!(
        "Converted {} of {} files in {:.2}s",
        successful,
        converted,
        batch_start.elapsed().as_secs_f64()
    );

    Ok(BatchResult {
        total_files: records.len(),
        successful,
        failed: converted - successful,
        skipped: skipped.len(),
    })
}

/// Dry run mode - list the planned conversions without running them
fn print_dry_run(planned: &[PlannedConversion], output_format: &str) -> BatchResult {
    println!();
    println!("=== DRY RUN MODE ===");
    println!();

    let mut would_convert = 0;
    for conversion in planned {
        match conversion.skip {
            Some(reason) => println!(
                "skip {} -> {} ({})",
                conversion.source.display(),
                conversion.destination.display(),
                reason
            ),
            None => {
                would_convert += 1;
                println!(
                    "     {} -> {}",
                    conversion.source.display(),
                    conversion.destination.display()
                );
            }
        }
    }

    println!();
    println!("─────────────────────────────────────────");
    println!();
    println!("Would convert {} files to {}", would_convert, output_format);
    println!();

    BatchResult {
        total_files: planned.len(),
        successful: 0,
        failed: 0,
        skipped: planned.len(),
    }
}

/// Progress bars: one for the batch, one per running job
struct ProgressView {
    multi: MultiProgress,
    overall: ProgressBar,
    jobs: HashMap<JobId, ProgressBar>,
}

impl ProgressView {
    fn new(total: usize) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self {
            multi,
            overall,
            jobs: HashMap::new(),
        }
    }

    fn job_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("  {prefix:>4} [{bar:30}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

#[derive(Debug)]
struct Running {
    started: Instant,
    format: Option<String>,
}

/// Turns coordinator notifications into progress output and report records
struct BatchObserver {
    records: Rc<RefCell<Vec<JobRecord>>>,
    running: HashMap<JobId, Running>,
    progress: Option<ProgressView>,
}

impl BatchObserver {
    fn new(records: Rc<RefCell<Vec<JobRecord>>>, progress: Option<ProgressView>) -> Self {
        Self {
            records,
            running: HashMap::new(),
            progress,
        }
    }
}

impl JobObserver for BatchObserver {
    fn on_job_started(&mut self, id: JobId, request: &JobRequest) {
        self.running.insert(
            id,
            Running {
                started: Instant::now(),
                format: None,
            },
        );

        if let Some(view) = &mut self.progress {
            let bar = view.multi.add(ProgressBar::new(100));
            bar.set_style(ProgressView::job_style());
            bar.set_prefix(id.to_string());
            bar.set_message(
                request
                    .source
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string(),
            );
            view.jobs.insert(id, bar);
        }
    }

    fn on_job_resolved_format(&mut self, id: JobId, format: &str) {
        if let Some(running) = self.running.get_mut(&id) {
            running.format = Some(format.to_string());
        }
    }

    fn on_job_progress(&mut self, id: JobId, progress: f32) {
        if let Some(bar) = self.progress.as_ref().and_then(|view| view.jobs.get(&id)) {
            bar.set_position((progress * 100.0).round() as u64);
        }
    }

    fn on_job_finished(&mut self, id: JobId, request: &JobRequest, result: JobResult) {
        let running = self.running.remove(&id);

        if !result.is_success() {
            warn!("Failed {}: {}", request.source.display(), result);
        }

        if let Some(view) = &mut self.progress {
            if let Some(bar) = view.jobs.remove(&id) {
                bar.finish_and_clear();
                view.multi.remove(&bar);
            }
            view.overall.inc(1);
            view.overall.set_message(
                request
                    .source
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string(),
            );
            if view.jobs.is_empty() && view.overall.position() >= view.overall.length().unwrap_or(0) {
                view.overall.finish_with_message("done");
            }
        }

        self.records.borrow_mut().push(JobRecord {
            job_id: Some(id),
            source: request.source.clone(),
            destination: request.destination.clone(),
            format: running.as_ref().and_then(|r| r.format.clone()),
            result: Some(result),
            duration_seconds: running.map(|r| r.started.elapsed().as_secs_f64()),
            skipped: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..800 {
            writer.write_sample((i * 10) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn settings(input: &Path, output: &Path) -> Settings {
        Settings {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            concurrent_jobs: 2,
            recursive: true,
            show_progress: false,
            ..Settings::default()
        }
    }

    #[test]
    fn test_batch_converts_and_reports() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(input.join("sub")).unwrap();
        write_wav(&input.join("a.wav"));
        write_wav(&input.join("sub/b.wav"));
        std::fs::write(input.join("broken.flac"), b"not a flac file at all").unwrap();

        let output = dir.path().join("out");
        let report = dir.path().join("report.json");
        let settings = Settings {
            report: Some(report.clone()),
            ..settings(&input, &output)
        };

        let result = run(&settings).unwrap();
        assert_eq!(
            result,
            BatchResult {
                total_files: 3,
                successful: 2,
                failed: 1,
                skipped: 0,
            }
        );
        assert!(output.join("a.wav").exists());
        assert!(output.join("sub/b.wav").exists());
        assert!(!output.join("broken.wav").exists());

        let report = export::read_report(&report).unwrap();
        assert_eq!(report.metadata.succeeded, 2);
        let a = report
            .jobs
            .iter()
            .find(|r| r.source.ends_with("a.wav"))
            .unwrap();
        assert_eq!(a.format.as_deref(), Some("Wave"));
    }

    #[test]
    fn test_existing_outputs_are_skipped() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        write_wav(&input.join("a.wav"));

        let output = dir.path().join("out");
        let settings = settings(&input, &output);
        assert_eq!(run(&settings).unwrap().successful, 1);

        let again = run(&settings).unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(again.successful, 0);

        let forced = run(&Settings {
            force: true,
            ..settings
        })
        .unwrap();
        assert_eq!(forced.successful, 1);
    }

    #[test]
    fn test_output_into_input_never_overwrites_sources() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        write_wav(&input.join("a.wav"));
        std::fs::write(input.join("a.mp3"), b"mp3 stand-in").unwrap();
        write_wav(&input.join("b.wav"));
        let original = std::fs::read(input.join("a.wav")).unwrap();

        let report = dir.path().join("report.json");
        let result = run(&Settings {
            force: true,
            report: Some(report.clone()),
            ..settings(&input, &input)
        })
        .unwrap();

        assert_eq!(
            result,
            BatchResult {
                total_files: 3,
                successful: 0,
                failed: 0,
                skipped: 3,
            }
        );
        assert_eq!(std::fs::read(input.join("a.wav")).unwrap(), original);

        let report = export::read_report(&report).unwrap();
        assert!(report
            .jobs
            .iter()
            .all(|r| r.skipped == Some(SkipReason::OverwritesSource)));
    }

    #[test]
    fn test_shared_destination_is_converted_once() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("a.mp3"), b"mp3 stand-in").unwrap();
        write_wav(&input.join("a.wav"));
        let output = dir.path().join("out");

        let result = run(&settings(&input, &output)).unwrap();

        // a.mp3 sorts first and keeps out/a.wav; it is not decodable
        assert_eq!(
            result,
            BatchResult {
                total_files: 2,
                successful: 0,
                failed: 1,
                skipped: 1,
            }
        );
        assert!(!output.join("a.wav").exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.wav");
        write_wav(&input);
        let output = dir.path().join("out");

        let result = run(&Settings {
            dry_run: true,
            ..settings(&input, &output)
        })
        .unwrap();
        assert_eq!(result.total_files, 1);
        assert!(!output.exists());
    }
}
