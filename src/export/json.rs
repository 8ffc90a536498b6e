//! JSON report of a conversion run

use crate::discovery::SkipReason;
use crate::error::{Error, Result};
use crate::types::{JobId, JobResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

/// JSON output schema version
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON output structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversionReport {
    /// Schema version for forward compatibility
    pub version: String,
    pub metadata: ReportMetadata,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// audioconv version that generated this file
    pub generator_version: String,
    pub exported_at: String,
    pub job_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Absent for sources that were skipped without running a job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// `None` when no job ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl JobRecord {
    pub fn is_skipped(&self) -> bool {
        self.result.is_none()
    }
}

/// Write job records to a JSON file
///
/// Uses atomic write pattern: writes to a temp file first, then renames.
pub fn write_report(records: &[JobRecord], output_path: &Path) -> Result<()> {
    let temp_path = output_path.with_extension("json.tmp");

    let file = File::create(&temp_path).map_err(|e| Error::OutputError {
        path: output_path.to_path_buf(),
        reason: format!("Failed to create temp file: {}", e),
    })?;
    let writer = BufWriter::new(file);

    let succeeded = records
        .iter()
        .filter(|r| r.result.is_some_and(JobResult::is_success))
        .count();
    let skipped = records.iter().filter(|r| r.is_skipped()).count();

    let report = ConversionReport {
        version: SCHEMA_VERSION.to_string(),
        metadata: ReportMetadata {
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            job_count: records.len(),
            succeeded,
            failed: records.len() - succeeded - skipped,
            skipped,
        },
        jobs: records.to_vec(),
    };

    serde_json::to_writer_pretty(writer, &report).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        Error::OutputError {
            path: output_path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    std::fs::rename(&temp_path, output_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        Error::OutputError {
            path: output_path.to_path_buf(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })?;

    info!("Wrote report of {} jobs to {}", records.len(), output_path.display());
    Ok(())
}

/// Read a report written by [`write_report`]
pub fn read_report(path: &Path) -> Result<ConversionReport> {
    let file = File::open(path).map_err(|_| Error::FileNotFound(path.to_path_buf()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::ConfigError(format!("Malformed report {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(result: Option<JobResult>) -> JobRecord {
        JobRecord {
            job_id: result.map(|_| JobId(0)),
            source: PathBuf::from("in/a.flac"),
            destination: PathBuf::from("out/a.wav"),
            format: Some("FLAC".to_string()),
            result,
            duration_seconds: None,
            skipped: result.is_none().then_some(SkipReason::Exists),
        }
    }

    #[test]
    fn test_report_counts_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let records = vec![
            record(Some(JobResult::Done)),
            record(Some(JobResult::NotSupported)),
            record(None),
        ];

        write_report(&records, &path).unwrap();
        assert!(!dir.path().join("report.json.tmp").exists());

        let report = read_report(&path).unwrap();
        assert_eq!(report.version, SCHEMA_VERSION);
        assert_eq!(report.metadata.job_count, 3);
        assert_eq!(report.metadata.succeeded, 1);
        assert_eq!(report.metadata.failed, 1);
        assert_eq!(report.metadata.skipped, 1);
        assert_eq!(report.jobs, records);
    }

    #[test]
    fn test_unwritable_destination() {
        let result = write_report(&[], Path::new("/definitely/not/here/report.json"));
        assert!(matches!(result, Err(Error::OutputError { .. })));
    }
}
