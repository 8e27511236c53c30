//! Picks the one file a generic "download" returns for a job.

use std::sync::Arc;

use crate::error::JobError;
use crate::job::{JobKind, JobOutputs, JobRecord, JobStatus};
use crate::storage::JobStore;

/// Primary file id for a set of outputs: the bundle when there is one,
/// otherwise the first (or only) file.
pub fn primary_output(outputs: &JobOutputs) -> Option<&str> {
    match outputs {
        JobOutputs::Single { file_id } => file_id.as_deref(),
        JobOutputs::Multi { file_ids } => file_ids.first().map(String::as_str),
        JobOutputs::MultiBundle {
            file_ids,
            bundle_id,
        } => bundle_id
            .as_deref()
            .or_else(|| file_ids.first().map(String::as_str)),
    }
}

pub struct DownloadResolver {
    jobs: Arc<dyn JobStore>,
}

impl DownloadResolver {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Resolves the primary file id of a job addressed by kind slug and id.
    /// An unknown slug fails before storage is consulted.
    pub fn resolve_primary(&self, kind: &str, job_id: &str) -> Result<String, JobError> {
        let kind: JobKind = kind.parse()?;
        self.resolve_primary_for(kind, job_id)
    }

    pub fn resolve_primary_for(&self, kind: JobKind, job_id: &str) -> Result<String, JobError> {
        let record = self
            .jobs
            .get(kind, job_id)?
            .ok_or_else(|| JobError::JobNotFound(job_id.to_string()))?;
        primary_of(&record)
    }
}

fn primary_of(record: &JobRecord) -> Result<String, JobError> {
    if record.status != JobStatus::Done {
        return Err(JobError::OutputNotReady(record.id.clone()));
    }
    primary_output(&record.outputs)
        .map(str::to_string)
        .ok_or_else(|| JobError::OutputNotReady(record.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{JobListFilter, JobSummary};
    use crate::db::{Database, DatabaseError};
    use crate::job::JobParameters;
    use crate::storage::SqliteJobStore;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_precedence() {
        let bundled = JobOutputs::MultiBundle {
            file_ids: ids(&["p1", "p2", "p3"]),
            bundle_id: Some("zip".into()),
        };
        assert_eq!(primary_output(&bundled), Some("zip"));

        let unbundled = JobOutputs::MultiBundle {
            file_ids: ids(&["p1", "p2", "p3"]),
            bundle_id: None,
        };
        assert_eq!(primary_output(&unbundled), Some("p1"));

        let multi = JobOutputs::Multi {
            file_ids: ids(&["s1", "s2"]),
        };
        assert_eq!(primary_output(&multi), Some("s1"));

        assert_eq!(primary_output(&JobOutputs::empty(crate::job::OutputShape::Single)), None);
        assert_eq!(primary_output(&JobOutputs::empty(crate::job::OutputShape::MultiBundle)), None);
    }

    /// Fails every call, proving the resolver never reached storage.
    struct Unreachable;

    impl JobStore for Unreachable {
        fn insert(&self, _: &JobRecord) -> Result<(), DatabaseError> {
            Err(DatabaseError::LockPoisoned)
        }
        fn update(&self, _: &JobRecord, _: &[JobStatus]) -> Result<bool, DatabaseError> {
            Err(DatabaseError::LockPoisoned)
        }
        fn get(&self, _: JobKind, _: &str) -> Result<Option<JobRecord>, DatabaseError> {
            panic!("storage must not be consulted")
        }
        fn find(&self, _: &str) -> Result<Option<JobRecord>, DatabaseError> {
            panic!("storage must not be consulted")
        }
        fn list(&self, _: &JobListFilter) -> Result<(Vec<JobSummary>, u64), DatabaseError> {
            Err(DatabaseError::LockPoisoned)
        }
        fn count_by_kind(
            &self,
            _: &str,
        ) -> Result<std::collections::BTreeMap<JobKind, u64>, DatabaseError> {
            Err(DatabaseError::LockPoisoned)
        }
    }

    #[test]
    fn test_unsupported_kind_skips_storage() {
        let resolver = DownloadResolver::new(Arc::new(Unreachable));
        match resolver.resolve_primary("not-a-real-kind", "any") {
            Err(JobError::UnsupportedJobKind(kind)) => assert_eq!(kind, "not-a-real-kind"),
            other => panic!("Expected UnsupportedJobKind, got {:?}", other),
        }
    }

    #[test]
    fn test_not_found_vs_not_ready() {
        let store = Arc::new(SqliteJobStore::new(Database::open_in_memory().unwrap()));
        let resolver = DownloadResolver::new(store.clone());

        assert!(matches!(
            resolver.resolve_primary("merge", "missing"),
            Err(JobError::JobNotFound(_))
        ));

        let record = JobRecord::new_pending(None, ids(&["a", "b"]), &JobParameters::Merge).unwrap();
        store.insert(&record).unwrap();
        assert!(matches!(
            resolver.resolve_primary("merge", &record.id),
            Err(JobError::OutputNotReady(_))
        ));
        // Same id under another kind is a different job.
        assert!(matches!(
            resolver.resolve_primary("split", &record.id),
            Err(JobError::JobNotFound(_))
        ));

        let failed = record
            .clone()
            .into_failed(&JobError::BackendExecutionFailed("x".into()));
        store.update(&failed, &[JobStatus::Pending]).unwrap();
        assert!(matches!(
            resolver.resolve_primary("merge", &record.id),
            Err(JobError::OutputNotReady(_))
        ));
    }

    #[test]
    fn test_done_job_resolves() {
        let store = Arc::new(SqliteJobStore::new(Database::open_in_memory().unwrap()));
        let resolver = DownloadResolver::new(store.clone());

        let record =
            JobRecord::new_pending(None, ids(&["a"]), &JobParameters::PdfToJpg { dpi: 150 }).unwrap();
        store.insert(&record).unwrap();
        let done = record
            .into_done(JobOutputs::MultiBundle {
                file_ids: ids(&["p1", "p2"]),
                bundle_id: Some("zip".into()),
            })
            .unwrap();
        store.update(&done, &[JobStatus::Pending]).unwrap();

        assert_eq!(resolver.resolve_primary("pdf-to-jpg", &done.id).unwrap(), "zip");
    }
}
