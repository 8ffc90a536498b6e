//! The decoded-audio stream contract
//!
//! Every format plugin hands out a `Box<dyn AudioStream>`. A stream is created
//! closed, opened once by the registry, then read and seeked by exactly one
//! worker. Concrete streams keep their shared bookkeeping in a [`StreamCore`]
//! and expose it through [`AudioStream::core`], which lets the trait provide
//! the geometry accessors once for all codecs.

use crate::audio::geometry::SampleGeometry;
use crate::audio::tags::TagStore;
use crate::error::StreamError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Flags chosen by whoever constructs the stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Populate the stream's [`TagStore`] while opening
    pub read_tags: bool,
    /// Treat the source as non-seekable even when it is a regular file
    pub sequential: bool,
}

impl OpenFlags {
    pub fn with_tags() -> Self {
        Self {
            read_tags: true,
            sequential: false,
        }
    }
}

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Open,
    /// Terminal: a rebuild failed or changed geometry
    Failed,
}

/// Geometry and format resolved by `open()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub resolved_format: String,
    pub geometry: SampleGeometry,
    pub frequency: u32,
    /// `None` while a sequential source has not been read to the end
    pub total_samples: Option<u64>,
}

impl StreamInfo {
    /// True when a rebuilt stream reproduces the same decodable shape
    pub fn same_shape(&self, other: &StreamInfo) -> bool {
        self.geometry == other.geometry
            && self.frequency == other.frequency
            && self.total_samples == other.total_samples
    }

    /// Byte length of the decoded stream, when known
    pub fn size(&self) -> Option<u64> {
        self.total_samples
            .map(|samples| self.geometry.samples_to_bytes(samples))
    }

    /// Validate the layouts every stream must restrict itself to
    pub fn check_layout(&self) -> Result<(), StreamError> {
        let channels = self.geometry.channels();
        if channels != 1 && channels != 2 {
            return Err(StreamError::Unsupported(format!(
                "{} channels (only mono and stereo are supported)",
                channels
            )));
        }
        if self.frequency == 0 {
            return Err(StreamError::Unsupported("sample rate of 0 Hz".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {}Hz", self.resolved_format, self.geometry, self.frequency)?;
        match self.total_samples {
            Some(total) => write!(f, ", {} samples", total),
            None => write!(f, ", length unknown"),
        }
    }
}

/// State co-located with every concrete stream
#[derive(Debug)]
pub struct StreamCore {
    path: PathBuf,
    format: Option<String>,
    flags: OpenFlags,
    state: StreamState,
    info: Option<StreamInfo>,
    /// Geometry as first resolved, before any upward length revision
    baseline: Option<StreamInfo>,
    tags: Option<TagStore>,
}

impl StreamCore {
    pub fn new(path: &Path, format: Option<&str>, flags: OpenFlags) -> Self {
        Self {
            path: path.to_path_buf(),
            format: format.map(str::to_string),
            flags,
            state: StreamState::Closed,
            info: None,
            baseline: None,
            tags: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The format requested at construction, if any
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn set_state(&mut self, state: StreamState) {
        self.state = state;
    }

    pub fn info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    pub fn tags(&self) -> Option<&TagStore> {
        self.tags.as_ref()
    }

    /// Install resolved geometry after validating the stream layout rules
    pub fn set_info(&mut self, info: StreamInfo) -> Result<(), StreamError> {
        info.check_layout()?;
        self.baseline = Some(info.clone());
        self.info = Some(info);
        Ok(())
    }

    /// Store tags; only legal when the stream was asked to read them
    pub fn set_tags(&mut self, tags: TagStore) {
        debug_assert!(self.flags.read_tags, "tags stored without read_tags flag");
        if self.flags.read_tags {
            self.tags = Some(tags);
        }
    }

    /// Raise the known length of a sequential stream
    ///
    /// Lengths only move upward; a smaller value is ignored.
    pub fn revise_total_samples(&mut self, samples: u64) {
        if let Some(info) = self.info.as_mut() {
            match info.total_samples {
                Some(total) if total >= samples => {}
                _ => info.total_samples = Some(samples),
            }
        }
    }

    /// Verify that a rebuilt geometry matches the one resolved by `open()`
    ///
    /// Lengths discovered later by reading to the end are kept; the rebuild is
    /// compared against what the container itself declared.
    pub fn check_rebuild(&self, rebuilt: &StreamInfo) -> Result<(), StreamError> {
        match &self.baseline {
            Some(previous) if previous.same_shape(rebuilt) => Ok(()),
            Some(previous) => Err(StreamError::GeometryMismatch {
                previous: previous.to_string(),
                current: rebuilt.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn geometry(&self) -> Result<SampleGeometry, StreamError> {
        self.info
            .as_ref()
            .map(|info| info.geometry)
            .ok_or(StreamError::NotOpen)
    }

    /// Fail fast when the stream is not readable
    pub fn ensure_open(&self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Open => Ok(()),
            StreamState::Failed => Err(StreamError::Failed),
            _ => Err(StreamError::NotOpen),
        }
    }
}

/// A decoded, optionally seekable PCM stream
///
/// Byte positions and sizes are always whole sample chunks. Output samples
/// are interleaved little-endian PCM; 8-bit output is unsigned.
pub trait AudioStream: Send {
    fn core(&self) -> &StreamCore;

    /// Parse the container and position at sample 0
    ///
    /// On failure the stream is left closed with its file released.
    fn open(&mut self) -> Result<(), StreamError>;

    /// Release the source. Safe to call on a closed stream.
    fn close(&mut self);

    /// True when only a seek to 0 (by reopening) is possible
    fn is_sequential(&self) -> bool;

    /// Read up to `truncated_size(buf.len())` bytes; `Ok(0)` at end of stream
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Move to a sample-aligned byte offset
    fn seek(&mut self, position: u64) -> Result<(), StreamError>;

    /// Current byte offset in the decoded stream
    fn position(&self) -> u64;

    fn at_end(&self) -> bool;

    fn path(&self) -> &Path {
        self.core().path()
    }

    fn state(&self) -> StreamState {
        self.core().state()
    }

    fn info(&self) -> Option<&StreamInfo> {
        self.core().info()
    }

    /// `None` when tags were not requested
    fn tags(&self) -> Option<&TagStore> {
        self.core().tags()
    }

    fn resolved_format(&self) -> Option<&str> {
        self.info().map(|info| info.resolved_format.as_str())
    }

    fn channels(&self) -> Option<u16> {
        self.info().map(|info| info.geometry.channels())
    }

    fn frequency(&self) -> Option<u32> {
        self.info().map(|info| info.frequency)
    }

    fn bits_per_sample(&self) -> Option<u16> {
        self.info().map(|info| info.geometry.bits_per_sample())
    }

    fn total_samples(&self) -> Option<u64> {
        self.info().and_then(|info| info.total_samples)
    }

    /// Decoded byte length; `None` while unknown
    fn size(&self) -> Option<u64> {
        self.info().and_then(StreamInfo::size)
    }
}

impl fmt::Debug for dyn AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream")
            .field("path", &self.path())
            .field("state", &self.state())
            .field("info", &self.info())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(total: Option<u64>) -> StreamInfo {
        StreamInfo {
            resolved_format: "Wave".to_string(),
            geometry: SampleGeometry::new(2, 16).unwrap(),
            frequency: 44100,
            total_samples: total,
        }
    }

    #[test]
    fn test_size_from_total_samples() {
        assert_eq!(info(Some(100)).size(), Some(400));
        assert_eq!(info(None).size(), None);
    }

    #[test]
    fn test_check_layout_rejects_surround() {
        let mut surround = info(Some(1));
        surround.geometry = SampleGeometry::new(6, 16).unwrap();
        assert!(matches!(surround.check_layout(), Err(StreamError::Unsupported(_))));
    }

    #[test]
    fn test_revise_total_samples_never_decreases() {
        let mut core = StreamCore::new(Path::new("x.wav"), None, OpenFlags::default());
        core.set_info(info(None)).unwrap();
        core.revise_total_samples(50);
        assert_eq!(core.info().unwrap().total_samples, Some(50));
        core.revise_total_samples(20);
        assert_eq!(core.info().unwrap().total_samples, Some(50));
        core.revise_total_samples(80);
        assert_eq!(core.info().unwrap().total_samples, Some(80));
        // the declared (unknown) length is still what a rebuild must match
        assert!(core.check_rebuild(&info(None)).is_ok());
    }

    #[test]
    fn test_check_rebuild_detects_mismatch() {
        let mut core = StreamCore::new(Path::new("x.wav"), None, OpenFlags::default());
        core.set_info(info(Some(100))).unwrap();
        assert!(core.check_rebuild(&info(Some(100))).is_ok());
        assert!(matches!(
            core.check_rebuild(&info(Some(99))),
            Err(StreamError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_tags_absent_unless_requested() {
        let core = StreamCore::new(Path::new("x.wav"), None, OpenFlags::default());
        assert!(core.tags().is_none());
    }

    #[test]
    fn test_ensure_open_reports_failed() {
        let mut core = StreamCore::new(Path::new("x.wav"), None, OpenFlags::default());
        assert!(matches!(core.ensure_open(), Err(StreamError::NotOpen)));
        core.set_state(StreamState::Failed);
        assert!(matches!(core.ensure_open(), Err(StreamError::Failed)));
    }
}
