pub mod admin;
pub mod app;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod logging;
pub mod pages;
pub mod persist;
pub mod ratelimit;
pub mod resolver;
pub mod runner;
pub mod sanitize;
pub mod storage;

pub use admin::{
    parse_admin_query, AdminJobAggregator, JobListFilter, JobPage, JobSummary, UserJobStats,
};
pub use app::Docjobs;
pub use config::{load_config, Config};
pub use download::{DownloadService, PrimaryDownload};
pub use error::{ConfigError, DocjobsError, ErrorBody, ErrorClass, JobError, Result, StorageError};
pub use events::{JobEvent, JobEventBroadcaster};
pub use executor::{Artifact, BackendExecutor, ExecutionOutput, ExecutionRequest, TransformationExecutor};
pub use job::{JobKind, JobOutputs, JobParameters, JobRecord, JobStatus, OutputShape};
pub use pages::parse_page_ranges;
pub use persist::OutputPersister;
pub use ratelimit::RateLimiter;
pub use resolver::DownloadResolver;
pub use runner::{CancelToken, JobOutcome, JobRequest, JobRunner, WorkerPool};
