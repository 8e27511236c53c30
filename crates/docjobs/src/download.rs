//! Primary-download support: resolve a job's primary file and describe how
//! to serve it.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::JobError;
use crate::resolver::DownloadResolver;
use crate::storage::FileStore;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A resolved, present file ready to be streamed.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryDownload {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    path: PathBuf,
}

impl PrimaryDownload {
    /// `Content-Disposition` header value with an ASCII fallback name and
    /// the UTF-8 name percent-encoded.
    pub fn content_disposition(&self) -> String {
        let fallback: String = self
            .file_name
            .chars()
            .map(|c| {
                if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(&self.file_name)
        )
    }

    pub fn open(&self) -> Result<File, JobError> {
        File::open(&self.path)
            .map_err(|e| JobError::ContentMissing(format!("{}: {}", self.file_id, e)))
    }

    pub fn read(&self) -> Result<Vec<u8>, JobError> {
        std::fs::read(&self.path)
            .map_err(|e| JobError::ContentMissing(format!("{}: {}", self.file_id, e)))
    }
}

/// MIME type for a stored file: the recorded type unless it is missing or
/// generic, then a guess from the name.
fn content_type_for(recorded: &str, name: &str) -> String {
    let recorded = recorded.trim();
    if !recorded.is_empty() && recorded != FALLBACK_CONTENT_TYPE {
        return recorded.to_string();
    }
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

pub struct DownloadService {
    resolver: DownloadResolver,
    files: Arc<dyn FileStore>,
}

impl DownloadService {
    pub fn new(resolver: DownloadResolver, files: Arc<dyn FileStore>) -> Self {
        Self { resolver, files }
    }

    /// Resolves and checks the primary file of a job. Resolution errors pass
    /// through; a resolved id without row or bytes is `ContentMissing`.
    pub fn open_primary(&self, kind: &str, job_id: &str) -> Result<PrimaryDownload, JobError> {
        let file_id = self.resolver.resolve_primary(kind, job_id)?;
        let file = self
            .files
            .get(&file_id)?
            .ok_or_else(|| JobError::ContentMissing(file_id.clone()))?;

        if !file.path.is_file() {
            log::warn!("Primary output {} of job {} has no content on disk", file_id, job_id);
            return Err(JobError::ContentMissing(file_id));
        }

        Ok(PrimaryDownload {
            content_type: content_type_for(&file.content_type, &file.name),
            file_id,
            file_name: file.name,
            size: file.size,
            path: file.path,
        })
    }
}
