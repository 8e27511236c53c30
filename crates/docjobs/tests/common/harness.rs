//! Test harness for isolated job runs.
//!
//! The `TestHarness` owns a temporary data directory with a SQLite database
//! and a local file store, and hands out runners, resolvers and aggregators
//! wired to them.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use docjobs::db::Database;
use docjobs::download::DownloadService;
use docjobs::executor::TransformationExecutor;
use docjobs::storage::{FileStore, LocalFileStore, NewFile, SqliteJobStore};
use docjobs::{AdminJobAggregator, DownloadResolver, JobEventBroadcaster, JobRunner};

pub struct TestHarness {
    temp_dir: TempDir,
    pub files: Arc<LocalFileStore>,
    pub jobs: Arc<SqliteJobStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("docjobs.db")).expect("Failed to open database");
        let files = Arc::new(LocalFileStore::new(db.clone(), temp_dir.path().join("files")));
        let jobs = Arc::new(SqliteJobStore::new(db));
        Self {
            temp_dir,
            files,
            jobs,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    pub fn runner(&self, executor: Arc<dyn TransformationExecutor>) -> Arc<JobRunner> {
        Arc::new(
            JobRunner::new(
                self.jobs.clone(),
                self.files.clone(),
                executor,
                JobEventBroadcaster::new(64),
            )
            .with_poll_interval(Duration::from_millis(5)),
        )
    }

    pub fn resolver(&self) -> DownloadResolver {
        DownloadResolver::new(self.jobs.clone())
    }

    pub fn downloads(&self) -> DownloadService {
        DownloadService::new(self.resolver(), self.files.clone())
    }

    pub fn admin(&self) -> AdminJobAggregator {
        AdminJobAggregator::new(self.jobs.clone())
    }

    pub fn upload(&self, name: &str, content_type: &str, bytes: Vec<u8>) -> String {
        self.files
            .save(
                NewFile {
                    name: name.to_string(),
                    content_type: content_type.to_string(),
                    bytes,
                },
                Some("user-1"),
            )
            .expect("Failed to store input")
            .id
    }

    pub fn upload_pdf(&self, name: &str, pages: u32) -> String {
        self.upload(name, "application/pdf", super::builders::pdf_with_pages(pages))
    }

    pub fn read_file(&self, id: &str) -> Vec<u8> {
        let file = self
            .files
            .get(id)
            .expect("file lookup")
            .expect("file exists");
        std::fs::read(file.path).expect("file content")
    }
}
