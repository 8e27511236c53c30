use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration};

use super::{FileStore, NewFile, StoredFile};
use crate::db::file_repo::{self, FileRow};
use crate::db::{from_db_timestamp, to_db_timestamp, Database, DatabaseError};
use crate::error::StorageError;
use crate::job::record::now;
use crate::sanitize;

/// File store keeping bytes on local disk and metadata in the `files` table.
///
/// Content lives under `<root>/YYYY/MM/<id>.<ext>`; the logical name is only
/// recorded in the table.
pub struct LocalFileStore {
    db: Database,
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new<P: AsRef<Path>>(db: Database, root: P) -> Self {
        Self {
            db,
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Removes files (rows and bytes) created more than `max_age` ago.
    /// Returns how many were removed. Job records are left untouched.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize, StorageError> {
        let cutoff = to_db_timestamp(&(now() - max_age));
        let expired = file_repo::find_created_before(&self.db, &cutoff)?;

        let mut removed = 0;
        for row in expired {
            match self.remove_content(Path::new(&row.path)) {
                Ok(()) => {
                    file_repo::delete(&self.db, &row.id)?;
                    removed += 1;
                }
                Err(e) => log::warn!("Skipping cleanup of file {}: {}", row.id, e),
            }
        }

        if removed > 0 {
            log::info!("Removed {} files older than {} days", removed, max_age.num_days());
        }
        Ok(removed)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Writes content with exclusive creation so an existing file is never
    /// overwritten.
    fn write_exclusive(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path.to_path_buf()));
            }
            Err(e) => {
                return Err(StorageError::WriteFile {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
            let _ = std::fs::remove_file(path);
            return Err(StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            });
        }
        Ok(())
    }

    fn remove_content(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::RemoveFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Extension for the on-disk name, taken from the logical name when it is
/// short and alphanumeric.
fn storage_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn decode_row(row: FileRow) -> Result<StoredFile, StorageError> {
    let created_at = from_db_timestamp(&row.created_at).map_err(|e| DatabaseError::Decode {
        id: row.id.clone(),
        reason: format!("bad created_at: {}", e),
    })?;
    Ok(StoredFile {
        id: row.id,
        owner: row.owner,
        name: row.name,
        path: PathBuf::from(row.path),
        content_type: row.content_type,
        size: row.size.max(0) as u64,
        created_at,
    })
}

impl FileStore for LocalFileStore {
    fn save(&self, file: NewFile, owner: Option<&str>) -> Result<StoredFile, StorageError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now();

        let dir_path = self
            .root
            .join(format!("{:04}", created_at.year()))
            .join(format!("{:02}", created_at.month()));
        self.ensure_directory(&dir_path)?;

        let disk_name = match storage_extension(&file.name) {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.clone(),
        };
        let path = dir_path.join(disk_name);
        self.write_exclusive(&path, &file.bytes)?;

        let row = FileRow {
            id: id.clone(),
            owner: owner.map(str::to_string),
            name: file.name,
            path: path.to_string_lossy().to_string(),
            content_type: file.content_type,
            size: file.bytes.len() as i64,
            created_at: to_db_timestamp(&created_at),
        };
        if let Err(e) = file_repo::insert(&self.db, &row) {
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }

        log::debug!(
            "Stored file {} ({} bytes) as {}",
            id,
            row.size,
            sanitize::redact_path(&path)
        );
        decode_row(row)
    }

    fn get(&self, id: &str) -> Result<Option<StoredFile>, StorageError> {
        match file_repo::find_by_id(&self.db, id)? {
            Some(row) => decode_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let Some(row) = file_repo::find_by_id(&self.db, id)? else {
            return Ok(false);
        };
        self.remove_content(Path::new(&row.path))?;
        file_repo::delete(&self.db, id).map_err(StorageError::from)
    }
}
