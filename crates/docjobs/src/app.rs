//! Wires configuration, storage, execution and the read side together.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use log::info;

use crate::admin::{parse_admin_query, AdminJobAggregator, JobPage, UserJobStats};
use crate::config::Config;
use crate::db::Database;
use crate::download::{DownloadService, PrimaryDownload};
use crate::error::{ConfigError, DocjobsError, JobError};
use crate::events::JobEventBroadcaster;
use crate::executor::{BackendExecutor, TransformationExecutor};
use crate::job::JobRecord;
use crate::ratelimit::RateLimiter;
use crate::resolver::DownloadResolver;
use crate::runner::{JobRequest, JobRunner, WorkerPool};
use crate::storage::{FileStore, LocalFileStore, NewFile, SqliteJobStore, StoredFile};

/// One running document job service.
pub struct Docjobs {
    config: Config,
    files: Arc<LocalFileStore>,
    runner: Arc<JobRunner>,
    pool: WorkerPool,
    admin: AdminJobAggregator,
    downloads: DownloadService,
    rate_limiter: RateLimiter,
    events: JobEventBroadcaster,
}

impl Docjobs {
    /// Opens the database and file store under the configured data directory
    /// and starts the worker pool with the production backends.
    pub fn open(config: Config) -> Result<Self, DocjobsError> {
        let executor = BackendExecutor::new(&config.backends)?;
        Self::with_executor(config, Arc::new(executor))
    }

    /// Like [`Docjobs::open`] with a caller-supplied executor.
    pub fn with_executor(
        config: Config,
        executor: Arc<dyn TransformationExecutor>,
    ) -> Result<Self, DocjobsError> {
        let (Some(db_path), Some(files_dir)) = (config.database_file(), config.files_directory())
        else {
            return Err(ConfigError::Validation {
                message: "no data directory configured and no platform default".to_string(),
            }
            .into());
        };

        let db = Database::open(&db_path)?;
        let files = Arc::new(LocalFileStore::new(db.clone(), files_dir));
        let jobs = Arc::new(SqliteJobStore::new(db));
        let events = JobEventBroadcaster::default();

        let runner = Arc::new(JobRunner::new(
            jobs.clone(),
            files.clone(),
            executor,
            events.clone(),
        ));
        let pool = WorkerPool::new(
            Arc::clone(&runner),
            config.worker_count,
            Some(config.job_timeout()),
        );

        info!(
            "docjobs ready: {} workers, files under {}",
            config.worker_count,
            crate::sanitize::redact_path(files.root())
        );

        Ok(Self {
            admin: AdminJobAggregator::new(jobs.clone()),
            downloads: DownloadService::new(DownloadResolver::new(jobs), files.clone()),
            rate_limiter: RateLimiter::new(&config.rate_limit),
            config,
            files,
            runner,
            pool,
            events,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Stores an uploaded input file.
    pub fn upload(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        owner: Option<&str>,
    ) -> Result<StoredFile, DocjobsError> {
        let file = NewFile {
            name: name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        };
        Ok(self.files.save(file, owner)?)
    }

    /// Queues a job and returns its id.
    pub fn submit(&self, request: JobRequest) -> Result<String, JobError> {
        self.pool.submit(request)
    }

    pub fn job(&self, id: &str) -> Result<JobRecord, JobError> {
        self.runner.get_by_id(id)
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.pool.cancel(id)
    }

    /// Admin listing from query-string pairs.
    pub fn list_jobs<'a, I>(&self, query: I) -> Result<JobPage, JobError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let filter = parse_admin_query(query)?;
        self.admin.list(&filter)
    }

    /// Per-kind job counts for one user.
    pub fn user_stats(&self, owner: &str) -> Result<UserJobStats, JobError> {
        self.admin.user_stats(owner)
    }

    pub fn open_primary(&self, kind: &str, job_id: &str) -> Result<PrimaryDownload, JobError> {
        self.downloads.open_primary(kind, job_id)
    }

    /// Removes stored files older than the retention window, if one is set.
    pub fn apply_retention(&self) -> Result<usize, DocjobsError> {
        match self.config.retention.max_age_days {
            Some(days) => Ok(self
                .files
                .cleanup_older_than(ChronoDuration::days(i64::from(days)))?),
            None => Ok(0),
        }
    }

    /// Stops the workers; jobs still queued are marked failed.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}
