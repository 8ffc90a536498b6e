//! Concurrent conversion jobs
//!
//! - `ids`: smallest-free job id allocation
//! - `pool`: resizable worker threads
//! - `handoff`: acknowledged worker → coordinator events
//! - `job`: the decode → encode body run on a worker
//! - `coordinator`: owner-thread bookkeeping and observers
//! - `batch`: discovery → jobs → report for the command line

pub mod batch;
pub mod coordinator;
pub mod handoff;
pub mod ids;
pub mod job;
pub mod pool;

pub use batch::{run, BatchResult};
pub use coordinator::{JobCoordinator, JobObserver, JobStatus};
pub use ids::JobIdAllocator;
pub use pool::WorkerPool;
