//! One conversion running on a pool thread
//!
//! The worker owns its stream and destination file. Everything the
//! coordinator learns about the job arrives through the job's
//! [`HandoffPort`], one acknowledged event at a time.

use crate::audio::tags::{self, TagStore};
use crate::audio::AudioStream;
use crate::encode::{widen_samples, EncodeParams, EncoderFactory};
use crate::error::{EncodeError, Error};
use crate::pipeline::handoff::HandoffPort;
use crate::registry::FormatRegistry;
use crate::types::{JobEvent, JobId, JobRequest, JobResult};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Bytes decoded per read
const CHUNK_SIZE: usize = 128 * 1024;

/// Attempts at creating the destination file
const OPEN_ATTEMPTS: usize = 4;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Progress is posted only after moving this far
const PROGRESS_STEP: f32 = 0.01;
/// ...and only this long after the previous post
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct ControlFlags {
    started: bool,
    aborted: bool,
}

/// Abort/start handshake shared by a job's worker and the coordinator
///
/// The worker publishes `Started` while holding the lock, so an abort either
/// happens before publication (the worker then never starts) or after it.
#[derive(Debug, Default)]
pub struct JobControl {
    flags: Mutex<ControlFlags>,
}

impl JobControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_aborted(&self) -> bool {
        self.flags.lock().aborted
    }

    pub fn is_started(&self) -> bool {
        self.flags.lock().started
    }

    /// Flag the job as aborted; returns whether `Started` was already published
    pub fn abort(&self) -> bool {
        let mut flags = self.flags.lock();
        flags.aborted = true;
        flags.started
    }

    /// Publish `Started` unless aborted first; false when the job must not run
    fn publish_started(&self, port: &mut HandoffPort) -> bool {
        let pending = {
            let mut flags = self.flags.lock();
            if flags.aborted {
                return false;
            }
            flags.started = true;
            port.send(JobEvent::Started)
        };
        pending.wait();
        true
    }
}

/// Everything a worker needs, moved onto the pool thread
pub struct JobContext {
    pub id: JobId,
    pub request: JobRequest,
    pub registry: Arc<FormatRegistry>,
    pub encoder: Arc<dyn EncoderFactory>,
    pub control: Arc<JobControl>,
    pub port: HandoffPort,
}

/// Rate limiter for progress events
#[derive(Debug)]
struct ProgressThrottle {
    last_value: f32,
    last_post: Option<Instant>,
}

impl ProgressThrottle {
    fn new() -> Self {
        Self {
            last_value: 0.0,
            last_post: None,
        }
    }

    fn should_post(&mut self, value: f32, now: Instant) -> bool {
        if value < self.last_value + PROGRESS_STEP {
            return false;
        }
        if let Some(last) = self.last_post {
            if now.duration_since(last) < PROGRESS_INTERVAL {
                return false;
            }
        }
        self.last_value = value;
        self.last_post = Some(now);
        true
    }
}

/// What the conversion left behind for cleanup
struct Outcome {
    result: JobResult,
    stream: Option<Box<dyn AudioStream>>,
    created_destination: bool,
}

impl Outcome {
    fn new(result: JobResult) -> Self {
        Self {
            result,
            stream: None,
            created_destination: false,
        }
    }
}

struct Worker {
    id: JobId,
    request: JobRequest,
    registry: Arc<FormatRegistry>,
    encoder: Arc<dyn EncoderFactory>,
    control: Arc<JobControl>,
    port: HandoffPort,
    throttle: ProgressThrottle,
}

/// Run a job to completion on the current thread
pub fn run(context: JobContext) {
    let JobContext {
        id,
        request,
        registry,
        encoder,
        control,
        mut port,
    } = context;

    if !control.publish_started(&mut port) {
        debug!("Job {} aborted before it started", id);
        return;
    }

    let mut worker = Worker {
        id,
        request,
        registry,
        encoder,
        control,
        port,
        throttle: ProgressThrottle::new(),
    };

    let started = Instant::now();
    let mut outcome = worker.convert();

    let aborted = worker.control.is_aborted();
    if aborted && matches!(outcome.result, JobResult::Done | JobResult::Pending) {
        outcome.result = JobResult::Pending;
    }

    debug!(
        "Job {} finished in {:.2}s: {}",
        id,
        started.elapsed().as_secs_f64(),
        outcome.result
    );
    worker.port.post(JobEvent::Finished(outcome.result));

    // the coordinator retired the job while handling Finished; the flag is final
    let keep = outcome.result.is_success() && !worker.control.is_aborted();
    drop(outcome.stream.take());
    if outcome.created_destination && !keep {
        let destination = &worker.request.destination;
        match fs::remove_file(destination) {
            Ok(()) => trace!("Removed incomplete {}", destination.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", destination.display(), e),
        }
    }
}

impl Worker {
    /// Post an intermediate event; false when the job was aborted meanwhile
    fn post(&mut self, event: JobEvent) -> bool {
        if self.control.is_aborted() {
            return false;
        }
        self.port.post(event);
        !self.control.is_aborted()
    }

    fn convert(&mut self) -> Outcome {
        if self.control.is_aborted() {
            return Outcome::new(JobResult::Pending);
        }

        let source = self.request.source.clone();
        let mut stream = match self
            .registry
            .resolve_stream(&source, self.request.format_hint.as_deref())
        {
            Ok(stream) => stream,
            Err(Error::NotFound { .. }) => {
                debug!("Job {}: no plugin opened {}", self.id, source.display());
                return Outcome::new(JobResult::NotSupported);
            }
            Err(e) => {
                warn!("Job {}: {}", self.id, e);
                return Outcome::new(JobResult::ReadError);
            }
        };

        let format = stream.resolved_format().unwrap_or_default().to_string();
        if !self.post(JobEvent::ResolvedFormat(format)) {
            return Outcome {
                result: JobResult::Pending,
                stream: Some(stream),
                created_destination: false,
            };
        }

        let mut created_destination = false;
        let result = self.encode(stream.as_mut(), &mut created_destination);
        Outcome {
            result,
            stream: Some(stream),
            created_destination,
        }
    }

    fn encode(&mut self, stream: &mut dyn AudioStream, created_destination: &mut bool) -> JobResult {
        let (channels, frequency, bits) = match (stream.channels(), stream.frequency(), stream.bits_per_sample()) {
            (Some(channels), Some(frequency), Some(bits)) => (channels, frequency, bits),
            _ => return JobResult::ReadError,
        };

        let tags = self.output_tags(stream);
        let destination = self.request.destination.clone();

        let file = match create_destination(&destination) {
            Ok(file) => file,
            Err(e) => {
                warn!("Job {}: {}", self.id, Error::output_error(&destination, e));
                return JobResult::WriteError;
            }
        };
        *created_destination = true;

        let params = EncodeParams {
            channels,
            frequency,
            quality: self.request.quality,
        };
        let mut encoder = match self.encoder.create(file, &destination, &params, &tags) {
            Ok(encoder) => encoder,
            Err(e) => return self.encode_failure(e),
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut samples: Vec<i16> = Vec::with_capacity(CHUNK_SIZE / 2);
        let size = stream.size();

        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Job {}: {}", self.id, Error::stream(&self.request.source, e));
                    return JobResult::ReadError;
                }
            };

            widen_samples(&buf[..n], bits, &mut samples);
            if let Err(e) = encoder.write_samples(&samples) {
                return self.encode_failure(e);
            }

            if self.control.is_aborted() {
                return JobResult::Pending;
            }

            if let Some(size) = size.filter(|&size| size > 0) {
                let progress = (stream.position() as f64 / size as f64).min(1.0) as f32;
                if self.throttle.should_post(progress, Instant::now())
                    && !self.post(JobEvent::Progress(progress))
                {
                    return JobResult::Pending;
                }
            }
        }

        match encoder.finish() {
            Ok(()) => JobResult::Done,
            Err(e) => self.encode_failure(e),
        }
    }

    /// Source tags with the job's rewrites applied
    fn output_tags(&self, stream: &dyn AudioStream) -> TagStore {
        let mut tags = stream.tags().cloned().unwrap_or_default();
        if self.request.flags.prepend_year_to_album {
            tags::prepend_year_to_album(&mut tags);
        }
        for (key, value) in &self.request.tag_overrides {
            tags.set(key, value.clone());
        }
        tags
    }

    fn encode_failure(&self, err: EncodeError) -> JobResult {
        let result = match err {
            EncodeError::Parameters(_) => JobResult::ConvertError,
            EncodeError::Io(_) => JobResult::WriteError,
        };
        let err = Error::Encode {
            path: self.request.destination.clone(),
            source: err,
        };
        warn!("Job {}: {}", self.id, err);
        result
    }
}

/// Create the destination, making parent directories, with a few retries
fn create_destination(path: &Path) -> io::Result<File> {
    let mut last_error = None;

    for attempt in 1..=OPEN_ATTEMPTS {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                trace!("Could not create {}: {}", parent.display(), e);
            }
        }

        match File::create(path) {
            Ok(file) => return Ok(file),
            Err(e) => {
                debug!(
                    "Attempt {}/{} to create {} failed: {}",
                    attempt,
                    OPEN_ATTEMPTS,
                    path.display(),
                    e
                );
                last_error = Some(e);
                if attempt < OPEN_ATTEMPTS {
                    thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "destination not created")))
}
