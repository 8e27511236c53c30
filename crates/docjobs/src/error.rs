use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum DocjobsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("File metadata error: {0}")]
    Database(#[from] DatabaseError),
}

/// Failure taxonomy shared by every job kind.
///
/// Variants carry owned strings so a failure can be stored on a record,
/// sent across the worker channel and replayed to a poller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("invalid page range: {0}")]
    InvalidPageRange(String),

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("backend execution failed: {0}")]
    BackendExecutionFailed(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to persist output: {0}")]
    OutputPersistFailure(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("output not ready for job {0}")]
    OutputNotReady(String),

    #[error("file content missing: {0}")]
    ContentMissing(String),

    #[error("unsupported job kind: {0}")]
    UnsupportedJobKind(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("job cancelled: {0}")]
    Cancelled(String),

    #[error("job store error: {0}")]
    Store(String),
}

/// How a caller should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The request itself is wrong; resubmitting it unchanged fails again.
    Client,
    NotFound,
    /// The job ran and failed; do not retry with the same parameters.
    Permanent,
    /// A dependency could not be reached; safe to retry.
    Retryable,
    Cancelled,
}

impl ErrorClass {
    /// Recovers the class from a stable error code.
    pub fn for_code(code: &str) -> Self {
        match code {
            "input_not_found" | "invalid_page_range" | "page_out_of_range"
            | "invalid_parameters" | "unsupported_job_kind" | "invalid_filter" => {
                ErrorClass::Client
            }
            "job_not_found" | "output_not_ready" | "content_missing" => ErrorClass::NotFound,
            "backend_unavailable" => ErrorClass::Retryable,
            "cancelled" => ErrorClass::Cancelled,
            _ => ErrorClass::Permanent,
        }
    }
}

/// Serialized form of a [`JobError`] that crosses the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub class: ErrorClass,
    pub message: String,
    pub retryable: bool,
}

impl ErrorBody {
    /// Rebuilds a body from a persisted code and message.
    pub fn from_parts(code: &str, message: &str) -> Self {
        let class = ErrorClass::for_code(code);
        Self {
            code: code.to_string(),
            class,
            message: message.to_string(),
            retryable: class == ErrorClass::Retryable,
        }
    }
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::InputNotFound(_) => "input_not_found",
            JobError::InvalidPageRange(_) => "invalid_page_range",
            JobError::PageOutOfRange { .. } => "page_out_of_range",
            JobError::InvalidParameters(_) => "invalid_parameters",
            JobError::BackendExecutionFailed(_) => "backend_execution_failed",
            JobError::BackendUnavailable(_) => "backend_unavailable",
            JobError::OutputPersistFailure(_) => "output_persist_failure",
            JobError::JobNotFound(_) => "job_not_found",
            JobError::OutputNotReady(_) => "output_not_ready",
            JobError::ContentMissing(_) => "content_missing",
            JobError::UnsupportedJobKind(_) => "unsupported_job_kind",
            JobError::InvalidFilter(_) => "invalid_filter",
            JobError::Cancelled(_) => "cancelled",
            JobError::Store(_) => "store_error",
        }
    }

    pub fn class(&self) -> ErrorClass {
        ErrorClass::for_code(self.code())
    }

    /// Only an unreachable dependency is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::from_parts(self.code(), &self.to_string())
    }
}

impl From<DatabaseError> for JobError {
    fn from(err: DatabaseError) -> Self {
        JobError::Store(err.to_string())
    }
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        JobError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocjobsError>;
