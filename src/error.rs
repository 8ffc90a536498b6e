//! Unified error types for audioconv
//!
//! Error strategy:
//! - Stream errors (open, read, seek): surfaced once, mapped to a job result
//! - Encoder errors: parameter rejections become `ConvertError`, I/O becomes `WriteError`
//! - System errors (config, report output): fatal, abort the batch
//!
//! Errors carry actionable suggestions where possible.

use std::path::PathBuf;
use thiserror::Error;

/// Container formats the built-in plugins understand, for error messages
pub const SUPPORTED_FORMATS: &str = "WAV, AU, RAW, FLAC, MP3, OGG/Vorbis";

/// Top-level error type for audioconv operations
#[derive(Debug, Error)]
pub enum Error {
    // =========================================================================
    // Recoverable errors - one source fails, batch continues
    // =========================================================================
    #[error("No format plugin could open '{path}'\n  Supported formats: {SUPPORTED_FORMATS}\n  Tip: If the file plays in other apps, it may use an unsupported codec or channel layout")]
    NotFound { path: PathBuf },

    #[error("Stream error for '{path}': {source}")]
    Stream {
        path: PathBuf,
        #[source]
        source: StreamError,
    },

    #[error("Encoder rejected '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: EncodeError,
    },

    #[error("File not found: '{0}'\n  Tip: Check the path exists and is accessible")]
    FileNotFound(PathBuf),

    // =========================================================================
    // Fatal errors - abort entire batch
    // =========================================================================
    #[error("Cannot write output to '{path}': {reason}\n  Tip: Check write permissions for the output directory")]
    OutputError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Too many jobs in flight (limit {0})\n  Tip: Wait for running jobs before queueing more")]
    JobLimit(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for audioconv operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error only affects a single source file
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::Stream { .. }
                | Error::Encode { .. }
                | Error::FileNotFound(_)
        )
    }

    /// Create a stream error with the path it happened on
    pub fn stream(path: impl Into<PathBuf>, source: StreamError) -> Self {
        Error::Stream {
            path: path.into(),
            source,
        }
    }

    /// Create an output error, checking for common issues
    pub fn output_error(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        let reason = match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                format!("Permission denied. Check that you have write access to {}", path.display())
            }
            std::io::ErrorKind::NotFound => {
                format!("Directory does not exist: {}", path.parent().map(|p| p.display().to_string()).unwrap_or_default())
            }
            _ => err.to_string(),
        };
        Error::OutputError { path, reason }
    }
}

/// Errors raised by an [`AudioStream`](crate::audio::AudioStream)
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Contents do not match any container this stream understands
    #[error("Unrecognized container: {0}")]
    Unrecognized(String),

    /// Container recognized, but the layout is not allowed by the stream contract
    #[error("Unsupported layout: {0}")]
    Unsupported(String),

    /// Decoder fault in the middle of the stream
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Cannot seek to byte {position}: {reason}")]
    InvalidSeek { position: u64, reason: String },

    /// Reopening a sequential source produced a different geometry
    #[error("Stream geometry changed on reopen (was {previous}, now {current})")]
    GeometryMismatch { previous: String, current: String },

    #[error("Stream is not open")]
    NotOpen,

    #[error("Stream failed and can no longer be used")]
    Failed,
}

impl StreamError {
    /// True for failures that mean "this plugin does not handle that file"
    /// rather than a fault in a file the plugin recognized
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, StreamError::Unrecognized(_) | StreamError::Unsupported(_))
    }
}

impl From<symphonia::core::errors::Error> for StreamError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error as SymphoniaError;

        match err {
            SymphoniaError::IoError(e) => StreamError::Io(e),
            SymphoniaError::DecodeError(e) => StreamError::Decode(e.to_string()),
            SymphoniaError::Unsupported(e) => StreamError::Unrecognized(e.to_string()),
            SymphoniaError::SeekError(e) => StreamError::InvalidSeek {
                position: 0,
                reason: format!("{:?}", e),
            },
            SymphoniaError::LimitError(e) => StreamError::Decode(e.to_string()),
            SymphoniaError::ResetRequired => StreamError::Decode("decoder reset required".to_string()),
        }
    }
}

/// Errors raised by an [`Encoder`](crate::encode::Encoder)
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Parameters the encoder cannot represent (sample rate, quality, channels)
    #[error("Unsupported encoder parameters: {0}")]
    Parameters(String),

    #[error("Encoder write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for EncodeError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => EncodeError::Io(e),
            other => EncodeError::Parameters(other.to_string()),
        }
    }
}
