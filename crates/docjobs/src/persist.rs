//! Turns executor artifacts into stored files and the job's output ids.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{info_span, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::JobError;
use crate::executor::{Artifact, ExecutionOutput};
use crate::job::{JobOutputs, OutputShape};
use crate::storage::{FileStore, NewFile};

pub const BUNDLE_CONTENT_TYPE: &str = "application/zip";

pub struct OutputPersister {
    files: Arc<dyn FileStore>,
}

impl OutputPersister {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }

    /// Stores every artifact (and, for bundled kinds, a zip of all of them)
    /// and returns the ids in the shape of the job's kind.
    ///
    /// Nothing is left behind on failure: files saved before the failing one
    /// are deleted again.
    pub fn persist(
        &self,
        job_id: &str,
        shape: OutputShape,
        output: ExecutionOutput,
        owner: Option<&str>,
    ) -> Result<JobOutputs, JobError> {
        let _span = info_span!("persist", job_id = %job_id, shape = ?shape).entered();
        let artifacts = output.into_artifacts();

        match shape {
            OutputShape::Single => {
                if artifacts.len() > 1 {
                    return Err(JobError::OutputPersistFailure(format!(
                        "single-output job produced {} artifacts",
                        artifacts.len()
                    )));
                }
                let ids = self.save_all(artifacts, owner)?;
                Ok(JobOutputs::Single {
                    file_id: ids.into_iter().next(),
                })
            }
            OutputShape::Multi => Ok(JobOutputs::Multi {
                file_ids: self.save_all(artifacts, owner)?,
            }),
            OutputShape::MultiBundle => {
                if artifacts.is_empty() {
                    return Ok(JobOutputs::MultiBundle {
                        file_ids: Vec::new(),
                        bundle_id: None,
                    });
                }
                let archive = bundle(job_id, &artifacts)?;
                let mut ids = self.save_all(artifacts, owner)?;
                match self.save(archive, owner) {
                    Ok(bundle_id) => Ok(JobOutputs::MultiBundle {
                        file_ids: ids,
                        bundle_id: Some(bundle_id),
                    }),
                    Err(e) => {
                        self.delete_quietly(ids.drain(..));
                        Err(e)
                    }
                }
            }
        }
    }

    /// Deletes the files referenced by `outputs`. Used when a finished job
    /// could not be recorded.
    pub fn discard(&self, outputs: &JobOutputs) {
        self.delete_quietly(outputs.file_ids().into_iter().map(str::to_string));
    }

    fn save(&self, artifact: Artifact, owner: Option<&str>) -> Result<String, JobError> {
        let name = artifact.name.clone();
        let stored = self
            .files
            .save(
                NewFile {
                    name: artifact.name,
                    content_type: artifact.content_type,
                    bytes: artifact.bytes,
                },
                owner,
            )
            .map_err(|e| JobError::OutputPersistFailure(format!("cannot store {}: {}", name, e)))?;
        Ok(stored.id)
    }

    fn save_all(&self, artifacts: Vec<Artifact>, owner: Option<&str>) -> Result<Vec<String>, JobError> {
        let mut ids = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            match self.save(artifact, owner) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    self.delete_quietly(ids.drain(..));
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    fn delete_quietly(&self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            if let Err(e) = self.files.delete(&id) {
                warn!(file_id = %id, error = %e, "Failed to remove orphaned output");
            }
        }
    }
}

/// Member name unique within the archive: `name`, then `name-2`, ...
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path.extension().and_then(|e| e.to_str());
    let mut n = 2;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Packs artifacts into a deflated zip named `<job-id>.zip`.
pub fn bundle(job_id: &str, artifacts: &[Artifact]) -> Result<Artifact, JobError> {
    let fail = |e: &dyn std::fmt::Display| {
        JobError::OutputPersistFailure(format!("cannot build bundle: {}", e))
    };
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut taken = HashSet::new();

    for artifact in artifacts {
        let name = unique_name(&artifact.name, &mut taken);
        writer.start_file(name, options).map_err(|e| fail(&e))?;
        writer.write_all(&artifact.bytes).map_err(|e| fail(&e))?;
    }
    let cursor = writer.finish().map_err(|e| fail(&e))?;

    Ok(Artifact::new(
        format!("{}.zip", job_id),
        BUNDLE_CONTENT_TYPE,
        cursor.into_inner(),
    ))
}
