//! Worker threads for conversion jobs
//!
//! A thin wrapper over [`threadpool::ThreadPool`]. Lowering the thread count
//! never interrupts a running task; surplus threads exit as they become
//! free.

use std::panic::{self, AssertUnwindSafe};
use threadpool::ThreadPool;
use tracing::error;

const THREAD_NAME: &str = "audioconv-worker";

pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(max_threads: usize) -> Self {
        Self {
            pool: ThreadPool::with_name(THREAD_NAME.to_string(), max_threads.max(1)),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.pool.max_count()
    }

    /// Change the thread limit; running tasks are never cancelled
    pub fn set_max_threads(&mut self, max_threads: usize) {
        self.pool.set_num_threads(max_threads.max(1));
    }

    /// Queue a task
    ///
    /// A panicking task is logged and counted as done, the worker thread
    /// keeps serving the queue.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(move || {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("Worker task panicked");
            }
        });
    }

    /// Tasks queued or running
    pub fn pending(&self) -> usize {
        self.pool.queued_count() + self.pool.active_count()
    }

    /// Block until every queued task has run to completion
    pub fn wait_for_done(&self) {
        self.pool.join();
    }
}
