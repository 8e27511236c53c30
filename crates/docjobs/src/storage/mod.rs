//! Persistence collaborators: the file store and the job store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;

pub mod filesystem;
pub mod jobs;

pub use filesystem::LocalFileStore;
pub use jobs::{JobStore, SqliteJobStore};

/// Bytes to be stored as a new file.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Metadata of a stored file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFile {
    pub id: String,
    pub owner: Option<String>,
    pub name: String,
    pub path: PathBuf,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Owns file bytes. Jobs only ever hold the ids it hands out.
pub trait FileStore: Send + Sync {
    fn save(&self, file: NewFile, owner: Option<&str>) -> Result<StoredFile, StorageError>;

    fn get(&self, id: &str) -> Result<Option<StoredFile>, StorageError>;

    /// Removes the file. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool, StorageError>;
}
