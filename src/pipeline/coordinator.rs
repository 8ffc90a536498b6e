//! Job coordinator
//!
//! Lives on the thread that owns it. Jobs run on a [`WorkerPool`]; their
//! lifecycle events come back through the handoff queue and are applied to
//! the coordinator's bookkeeping and observers only from the owner thread,
//! inside [`JobCoordinator::process_events`] or [`JobCoordinator::wait`].

use crate::encode::EncoderFactory;
use crate::error::{Error, Result};
use crate::pipeline::handoff::{self, Handoff, HandoffPort};
use crate::pipeline::ids::JobIdAllocator;
use crate::pipeline::job::{self, JobContext, JobControl};
use crate::pipeline::pool::WorkerPool;
use crate::registry::FormatRegistry;
use crate::types::{JobEvent, JobId, JobRequest, JobResult, JobState};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How often `wait` re-checks for stranded jobs while no events arrive
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Receives job lifecycle notifications on the coordinator's thread
///
/// A job that was shown as started always gets exactly one
/// `on_job_finished`; a job aborted before it was shown gets nothing.
pub trait JobObserver {
    fn on_job_started(&mut self, _id: JobId, _request: &JobRequest) {}

    fn on_job_resolved_format(&mut self, _id: JobId, _format: &str) {}

    /// `progress` is in `[0, 1]`
    fn on_job_progress(&mut self, _id: JobId, _progress: f32) {}

    fn on_job_finished(&mut self, _id: JobId, _request: &JobRequest, _result: JobResult) {}
}

struct JobEntry {
    request: Arc<JobRequest>,
    control: Arc<JobControl>,
    state: JobState,
    /// Observers were told about `Started`
    announced: bool,
    resolved_format: Option<String>,
    progress: f32,
}

impl JobEntry {
    fn snapshot(&self, id: JobId) -> JobStatus {
        JobStatus {
            id,
            source: self.request.source.clone(),
            state: self.state,
            aborted: self.control.is_aborted(),
            resolved_format: self.resolved_format.clone(),
            progress: self.progress,
        }
    }
}

/// Snapshot of a tracked job
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub id: JobId,
    pub source: std::path::PathBuf,
    pub state: JobState,
    pub aborted: bool,
    pub resolved_format: Option<String>,
    pub progress: f32,
}

pub struct JobCoordinator {
    registry: Arc<FormatRegistry>,
    encoder: Arc<dyn EncoderFactory>,
    ids: JobIdAllocator,
    jobs: BTreeMap<JobId, JobEntry>,
    pool: WorkerPool,
    sender: Sender<Handoff>,
    receiver: Receiver<Handoff>,
    observers: Vec<Box<dyn JobObserver>>,
}

impl JobCoordinator {
    /// Create a coordinator running up to `concurrent_jobs` jobs (0 = one per CPU)
    pub fn new(
        registry: Arc<FormatRegistry>,
        encoder: Arc<dyn EncoderFactory>,
        concurrent_jobs: usize,
    ) -> Self {
        let (sender, receiver) = handoff::channel();
        Self {
            registry,
            encoder,
            ids: JobIdAllocator::new(),
            jobs: BTreeMap::new(),
            pool: WorkerPool::new(resolve_job_count(concurrent_jobs)),
            sender,
            receiver,
            observers: Vec::new(),
        }
    }

    /// Cap the number of simultaneously tracked jobs
    pub fn with_job_limit(mut self, limit: usize) -> Self {
        self.ids = JobIdAllocator::with_limit(limit);
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn JobObserver>) {
        self.observers.push(observer);
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    /// Queue a conversion; the job starts as soon as a worker is free
    pub fn add_job(&mut self, request: JobRequest) -> Result<JobId> {
        let id = self
            .ids
            .take()
            .ok_or_else(|| Error::JobLimit(self.ids.limit().unwrap_or(usize::MAX)))?;

        let control = JobControl::new();
        let request = Arc::new(request);
        self.jobs.insert(
            id,
            JobEntry {
                request: Arc::clone(&request),
                control: Arc::clone(&control),
                state: JobState::Created,
                announced: false,
                resolved_format: None,
                progress: 0.0,
            },
        );

        let context = JobContext {
            id,
            request: (*request).clone(),
            registry: Arc::clone(&self.registry),
            encoder: Arc::clone(&self.encoder),
            control,
            port: HandoffPort::new(id, self.sender.clone()),
        };
        self.pool.execute(move || job::run(context));

        debug!("Queued job {} for {}", id, request.source.display());
        Ok(id)
    }

    /// Abort a job
    ///
    /// A job that has not started yet is retired immediately and produces no
    /// events. A running job is flagged; it stops at its next checkpoint and
    /// is retired when its `Finished` event is processed.
    pub fn abort(&mut self, id: JobId) -> bool {
        let already_started = match self.jobs.get(&id) {
            Some(entry) => entry.control.abort(),
            None => return false,
        };

        if !already_started {
            self.jobs.remove(&id);
            self.ids.free(id);
            debug!("Job {} aborted before starting", id);
        } else {
            debug!("Job {} abort requested", id);
        }
        true
    }

    pub fn abort_all(&mut self) {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        for id in ids {
            self.abort(id);
        }
    }

    /// Apply every queued event without blocking; returns how many were handled
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(handoff) = self.receiver.try_recv() {
            self.handle(handoff);
            handled += 1;
        }
        handled
    }

    /// Process events until every tracked job is retired, then drain the pool
    pub fn wait(&mut self) {
        while !self.jobs.is_empty() {
            match self.receiver.recv_timeout(WAIT_POLL) {
                Ok(handoff) => {
                    self.handle(handoff);
                    self.process_events();
                }
                Err(RecvTimeoutError::Timeout) => self.retire_stranded(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.pool.wait_for_done();
        // late events from workers that had nothing left to report
        self.process_events();
    }

    /// Resize the pool; running jobs are not interrupted (0 = one per CPU)
    pub fn set_concurrent_jobs(&mut self, jobs: usize) {
        let jobs = resolve_job_count(jobs);
        info!("Running up to {} concurrent jobs", jobs);
        self.pool.set_max_threads(jobs);
    }

    pub fn concurrent_jobs(&self) -> usize {
        self.pool.max_threads()
    }

    /// Number of jobs not yet retired
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.ids.iter().collect()
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.get(&id).map(|entry| entry.snapshot(id))
    }

    /// The source a job converts, while it is tracked
    pub fn source(&self, id: JobId) -> Option<&Path> {
        self.jobs.get(&id).map(|entry| entry.request.source.as_path())
    }

    fn handle(&mut self, handoff: Handoff) {
        let job = handoff.job;

        let entry = match self.jobs.get_mut(&job) {
            Some(entry) => entry,
            None => {
                trace!("Dropping {:?} for retired job {}", handoff.event, job);
                return;
            }
        };
        let aborted = entry.control.is_aborted();

        match &handoff.event {
            JobEvent::Started => {
                entry.state = JobState::Started;
                entry.announced = !aborted;
                if entry.announced {
                    for observer in &mut self.observers {
                        observer.on_job_started(job, &entry.request);
                    }
                }
            }
            JobEvent::ResolvedFormat(format) => {
                entry.resolved_format = Some(format.clone());
                if entry.announced && !aborted {
                    for observer in &mut self.observers {
                        observer.on_job_resolved_format(job, format);
                    }
                }
            }
            JobEvent::Progress(progress) => {
                entry.progress = *progress;
                if entry.announced && !aborted {
                    for observer in &mut self.observers {
                        observer.on_job_progress(job, *progress);
                    }
                }
            }
            JobEvent::Finished(result) => {
                let result = if aborted && *result == JobResult::Done {
                    JobResult::Pending
                } else {
                    *result
                };
                self.retire(job, Some(result));
            }
        }

        handoff.acknowledge();
    }

    /// Forget a job; observers hear `Finished` only if they saw `Started`
    ///
    /// Returns the job's final snapshot.
    fn retire(&mut self, job: JobId, result: Option<JobResult>) -> Option<JobStatus> {
        let mut entry = self.jobs.remove(&job)?;
        self.ids.free(job);
        entry.state = JobState::Finished;

        if let (true, Some(result)) = (entry.announced, result) {
            for observer in &mut self.observers {
                observer.on_job_finished(job, &entry.request, result);
            }
        }

        let status = entry.snapshot(job);
        trace!("Retired job {}: {:?}", job, status);
        Some(status)
    }

    /// Retire jobs whose worker is gone without reporting `Finished`
    fn retire_stranded(&mut self) {
        if self.pool.pending() > 0 || !self.receiver.is_empty() {
            return;
        }

        let stranded: Vec<JobId> = self.jobs.keys().copied().collect();
        for job in stranded {
            warn!("Job {} ended without reporting a result", job);
            self.retire(job, Some(JobResult::ReadError));
        }
    }
}

impl Drop for JobCoordinator {
    fn drop(&mut self) {
        if !self.jobs.is_empty() {
            self.abort_all();
            self.wait();
        }
    }
}

fn resolve_job_count(jobs: usize) -> usize {
    if jobs == 0 {
        num_cpus::get()
    } else {
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::WavEncoderFactory;
    use crate::formats::default_registry;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Started(JobId),
        Format(JobId, String),
        Progress(JobId),
        Finished(JobId, JobResult),
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<Seen>>>);

    impl JobObserver for Recorder {
        fn on_job_started(&mut self, id: JobId, _request: &JobRequest) {
            self.0.borrow_mut().push(Seen::Started(id));
        }
        fn on_job_resolved_format(&mut self, id: JobId, format: &str) {
            self.0.borrow_mut().push(Seen::Format(id, format.to_string()));
        }
        fn on_job_progress(&mut self, id: JobId, _progress: f32) {
            self.0.borrow_mut().push(Seen::Progress(id));
        }
        fn on_job_finished(&mut self, id: JobId, _request: &JobRequest, result: JobResult) {
            self.0.borrow_mut().push(Seen::Finished(id, result));
        }
    }

    fn write_wav(path: &Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(i as i16).unwrap();
            writer.write_sample(-(i as i16)).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn coordinator(jobs: usize) -> (JobCoordinator, Recorder) {
        let mut coordinator = JobCoordinator::new(
            Arc::new(default_registry()),
            Arc::new(WavEncoderFactory),
            jobs,
        );
        let recorder = Recorder::default();
        coordinator.add_observer(Box::new(recorder.clone()));
        (coordinator, recorder)
    }

    /// Every job seen is Started, then anything, then exactly one Finished
    fn assert_well_formed(seen: &[Seen]) {
        let mut ids: Vec<JobId> = seen
            .iter()
            .map(|event| match event {
                Seen::Started(id) | Seen::Format(id, _) | Seen::Progress(id) | Seen::Finished(id, _) => *id,
            })
            .collect();
        ids.sort();
        ids.dedup();

        for id in ids {
            let mine: Vec<&Seen> = seen
                .iter()
                .filter(|event| match event {
                    Seen::Started(x) | Seen::Format(x, _) | Seen::Progress(x) | Seen::Finished(x, _) => *x == id,
                })
                .collect();
            assert_eq!(mine.first(), Some(&&Seen::Started(id)), "job {} not started first", id);
            let finished = mine.iter().filter(|e| matches!(e, Seen::Finished(..))).count();
            assert_eq!(finished, 1, "job {} finished {} times", id, finished);
            assert!(matches!(mine.last(), Some(Seen::Finished(..))));
        }
    }

    #[test]
    fn test_many_jobs_complete() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.wav");
        write_wav(&source, 2000);

        let (mut coordinator, recorder) = coordinator(4);
        let mut outputs: Vec<PathBuf> = Vec::new();
        for i in 0..50 {
            let destination = dir.path().join(format!("out/{}.wav", i));
            coordinator
                .add_job(JobRequest::new(&source, &destination))
                .unwrap();
            outputs.push(destination);
        }
        coordinator.wait();

        assert!(coordinator.is_idle());
        assert!(coordinator.job_ids().is_empty());

        let seen = recorder.0.borrow();
        assert_well_formed(&seen);
        let done = seen
            .iter()
            .filter(|e| matches!(e, Seen::Finished(_, JobResult::Done)))
            .count();
        assert_eq!(done, 50);
        assert!(seen.iter().any(|e| matches!(e, Seen::Format(_, f) if f == "Wave")));

        for output in outputs {
            let reader = hound::WavReader::open(&output).unwrap();
            assert_eq!(reader.len(), 4000);
        }
    }

    #[test]
    fn test_abort_all_immediately() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.wav");
        write_wav(&source, 50_000);

        for round in 0..10 {
            let (mut coordinator, recorder) = coordinator(4);
            let mut outputs = Vec::new();
            for i in 0..20 {
                let destination = dir.path().join(format!("{}-{}.wav", round, i));
                coordinator
                    .add_job(JobRequest::new(&source, &destination))
                    .unwrap();
                outputs.push(destination);
            }
            coordinator.abort_all();
            coordinator.wait();

            // workers may have published Started, but none was processed
            // before the abort, so observers never learn of any job
            assert!(recorder.0.borrow().is_empty(), "round {}", round);
            assert!(coordinator.is_idle());
            assert!(outputs.iter().all(|output| !output.exists()));
        }
    }

    #[test]
    fn test_retired_job_is_finished() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.wav");
        write_wav(&source, 10);

        let (mut coordinator, _recorder) = coordinator(1);
        let id = coordinator
            .add_job(JobRequest::new(&source, dir.path().join("out.wav")))
            .unwrap();
        assert_eq!(coordinator.status(id).map(|s| s.state), Some(JobState::Created));

        let status = coordinator.retire(id, None).unwrap();
        assert_eq!(status.state, JobState::Finished);
        assert_eq!(status.source, source);
        assert!(coordinator.status(id).is_none());
        assert!(coordinator.retire(id, None).is_none());

        // events from the still-running worker are dropped and acknowledged
        while coordinator.pool.pending() > 0 {
            coordinator.process_events();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(coordinator.is_idle());
    }

    #[test]
    fn test_unsupported_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"definitely not audio").unwrap();
        let destination = dir.path().join("notes.wav");

        let (mut coordinator, recorder) = coordinator(2);
        let id = coordinator
            .add_job(JobRequest::new(&source, &destination))
            .unwrap();
        coordinator.wait();

        assert_eq!(
            *recorder.0.borrow(),
            vec![Seen::Started(id), Seen::Finished(id, JobResult::NotSupported)]
        );
        assert!(!destination.exists());
    }

    #[test]
    fn test_bad_quality_is_convert_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.wav");
        write_wav(&source, 100);
        let destination = dir.path().join("out.wav");

        let (mut coordinator, recorder) = coordinator(1);
        let mut request = JobRequest::new(&source, &destination);
        request.quality = 3.0;
        let id = coordinator.add_job(request).unwrap();
        coordinator.wait();

        assert!(recorder
            .0
            .borrow()
            .contains(&Seen::Finished(id, JobResult::ConvertError)));
        assert!(!destination.exists());
    }

    #[test]
    fn test_ids_are_reused_after_retirement() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.wav");
        write_wav(&source, 10);

        let (mut coordinator, _recorder) = coordinator(2);
        let first = coordinator
            .add_job(JobRequest::new(&source, dir.path().join("a.wav")))
            .unwrap();
        coordinator.wait();

        let second = coordinator
            .add_job(JobRequest::new(&source, dir.path().join("b.wav")))
            .unwrap();
        assert_eq!(first, second);
        coordinator.wait();
    }

    #[test]
    fn test_job_limit() {
        let (coordinator, _recorder) = coordinator(1);
        let mut coordinator = coordinator.with_job_limit(1);

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("missing.wav");
        coordinator
            .add_job(JobRequest::new(&source, dir.path().join("a.wav")))
            .unwrap();
        assert!(matches!(
            coordinator.add_job(JobRequest::new(&source, dir.path().join("b.wav"))),
            Err(Error::JobLimit(1))
        ));
        coordinator.wait();
    }

    #[test]
    fn test_set_concurrent_jobs_zero_uses_cpus() {
        let (mut coordinator, _recorder) = coordinator(1);
        coordinator.set_concurrent_jobs(0);
        assert_eq!(coordinator.concurrent_jobs(), num_cpus::get());
        coordinator.set_concurrent_jobs(3);
        assert_eq!(coordinator.concurrent_jobs(), 3);
    }
}
