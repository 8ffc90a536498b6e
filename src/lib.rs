//! audioconv - concurrent batch audio conversion
//!
//! Decodes heterogeneous audio containers through pluggable format plugins
//! and runs many decode → encode jobs on a worker pool, observed from a
//! single coordinating thread.
//!
//! # Architecture
//!
//! - `audio`: the `AudioStream` contract, sample geometry, tags and PCM codecs
//! - `registry`: format plugins and stream resolution
//! - `formats`: built-in plugins (Wave/Au/Raw natively, FLAC/Mp3/Vorbis via symphonia)
//! - `encode`: encoder seam and the built-in WAV encoder
//! - `pipeline`: job ids, worker pool, handoff protocol, coordinator
//! - `discovery`: source scanning and destination planning
//! - `export`: JSON conversion report
//! - `config`: CLI argument parsing and runtime settings
//!
//! # Example
//!
//! ```no_run
//! use audioconv::encode::WavEncoderFactory;
//! use audioconv::formats::default_registry;
//! use audioconv::pipeline::JobCoordinator;
//! use audioconv::types::JobRequest;
//! use std::sync::Arc;
//!
//! let mut coordinator = JobCoordinator::new(
//!     Arc::new(default_registry()),
//!     Arc::new(WavEncoderFactory),
//!     4,
//! );
//! coordinator.add_job(JobRequest::new("song.flac", "song.wav")).expect("queue full");
//! coordinator.wait();
//! ```

pub mod audio;
pub mod config;
pub mod discovery;
pub mod encode;
pub mod error;
pub mod export;
pub mod formats;
pub mod pipeline;
pub mod registry;
pub mod types;

// Re-export key types at crate root
pub use error::{EncodeError, Error, Result, StreamError};
pub use types::{JobEvent, JobId, JobRequest, JobResult};
