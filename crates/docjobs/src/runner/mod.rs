//! Job orchestration: the synchronous runner and the background pool.

pub mod cancel;
pub mod job_runner;
pub mod pool;

pub use cancel::CancelToken;
pub use job_runner::{JobRequest, JobRunner, PreparedJob};
pub use pool::{JobOutcome, WorkerPool};
