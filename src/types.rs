//! Core data types for audioconv
//!
//! These types describe conversion jobs and flow between the coordinator,
//! its workers and the report exporter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// =============================================================================
// Job identity and lifecycle
// =============================================================================

/// Small integer handle for a live job; reused once the job is retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobResult {
    /// Not finished, or aborted before anything went wrong
    Pending,
    Done,
    ReadError,
    WriteError,
    ConvertError,
    NotSupported,
}

impl JobResult {
    pub fn is_success(self) -> bool {
        self == JobResult::Done
    }

    pub fn description(self) -> &'static str {
        match self {
            JobResult::Pending => "aborted",
            JobResult::Done => "converted",
            JobResult::ReadError => "read error",
            JobResult::WriteError => "write error",
            JobResult::ConvertError => "encoder rejected parameters",
            JobResult::NotSupported => "unsupported source",
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Worker-side lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Started,
    Finished,
}

/// Lifecycle notification a worker hands to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started,
    ResolvedFormat(String),
    /// Fraction of the source decoded, in `[0, 1]`
    Progress(f32),
    Finished(JobResult),
}

// =============================================================================
// Job configuration
// =============================================================================

/// Encoder quality used when none is given
pub const DEFAULT_QUALITY: f32 = 0.4;

/// Per-job switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFlags {
    /// Rewrite `ALBUM` as `"YYYY - album"` when `DATE` holds a year
    pub prepend_year_to_album: bool,
}

/// Everything needed to run one conversion
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Force a specific source format instead of resolving by extension
    pub format_hint: Option<String>,
    /// Encoder quality in `[-0.1, 1.0]`
    pub quality: f32,
    pub flags: JobFlags,
    /// `KEY=VALUE` overrides applied on top of the source tags
    pub tag_overrides: Vec<(String, String)>,
}

impl JobRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            format_hint: None,
            quality: DEFAULT_QUALITY,
            flags: JobFlags::default(),
            tag_overrides: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_result_serializes_as_name() {
        let json = serde_json::to_string(&JobResult::NotSupported).unwrap();
        assert_eq!(json, "\"NotSupported\"");
    }

    #[test]
    fn test_only_done_is_success() {
        assert!(JobResult::Done.is_success());
        assert!(!JobResult::Pending.is_success());
        assert!(!JobResult::WriteError.is_success());
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId(3).to_string(), "#3");
    }
}
