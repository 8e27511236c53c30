use std::collections::BTreeMap;

use crate::admin::{JobListFilter, JobSummary};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{from_db_timestamp, to_db_timestamp, Database, DatabaseError};
use crate::error::ErrorBody;
use crate::job::{JobKind, JobOutputs, JobRecord, JobStatus, OutputShape};

/// Persistence for job records of every kind.
pub trait JobStore: Send + Sync {
    fn insert(&self, record: &JobRecord) -> Result<(), DatabaseError>;

    /// Writes the record's status, outputs and error if the stored status is
    /// one of `expected`. Returns whether the write happened; this is the
    /// claim that keeps a single writer per job.
    fn update(&self, record: &JobRecord, expected: &[JobStatus]) -> Result<bool, DatabaseError>;

    /// Looks a job up within one kind.
    fn get(&self, kind: JobKind, id: &str) -> Result<Option<JobRecord>, DatabaseError>;

    /// Looks a job up by id alone.
    fn find(&self, id: &str) -> Result<Option<JobRecord>, DatabaseError>;

    /// Cross-kind listing backing the admin view. Returns (page, total).
    fn list(&self, filter: &JobListFilter) -> Result<(Vec<JobSummary>, u64), DatabaseError>;

    /// Jobs per kind owned by `owner`, in any status. Kinds without jobs
    /// are absent.
    fn count_by_kind(&self, owner: &str) -> Result<BTreeMap<JobKind, u64>, DatabaseError>;
}

/// Job store over the single generic `jobs` table.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn decode_error(id: &str, reason: impl Into<String>) -> DatabaseError {
    DatabaseError::Decode {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn encode_ids(ids: &[String]) -> Option<String> {
    if ids.is_empty() {
        None
    } else {
        serde_json::to_string(ids).ok()
    }
}

fn record_to_row(record: &JobRecord) -> Result<JobRow, DatabaseError> {
    let inputs = serde_json::to_string(&record.inputs)
        .map_err(|e| decode_error(&record.id, format!("inputs: {}", e)))?;

    let (output_file_id, output_file_ids, bundle_file_id) = match &record.outputs {
        JobOutputs::Single { file_id } => (file_id.clone(), None, None),
        JobOutputs::Multi { file_ids } => (None, encode_ids(file_ids), None),
        JobOutputs::MultiBundle {
            file_ids,
            bundle_id,
        } => (None, encode_ids(file_ids), bundle_id.clone()),
    };

    Ok(JobRow {
        id: record.id.clone(),
        kind: record.kind.as_str().to_string(),
        owner: record.owner.clone(),
        inputs,
        parameters: record.parameters.to_string(),
        status: record.status.as_str().to_string(),
        output_file_id,
        output_file_ids,
        bundle_file_id,
        error_code: record.error.as_ref().map(|e| e.code.clone()),
        error: record.error.as_ref().map(|e| e.message.clone()),
        created_at: to_db_timestamp(&record.created_at),
        updated_at: to_db_timestamp(&record.updated_at),
    })
}

fn decode_ids(id: &str, column: &Option<String>) -> Result<Vec<String>, DatabaseError> {
    match column {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| decode_error(id, format!("output_file_ids: {}", e))),
        None => Ok(Vec::new()),
    }
}

fn row_to_record(row: JobRow) -> Result<JobRecord, DatabaseError> {
    let kind: JobKind = row
        .kind
        .parse()
        .map_err(|_| decode_error(&row.id, format!("unknown kind '{}'", row.kind)))?;
    let status: JobStatus = row.status.parse().map_err(|e| decode_error(&row.id, e))?;
    let inputs: Vec<String> = serde_json::from_str(&row.inputs)
        .map_err(|e| decode_error(&row.id, format!("inputs: {}", e)))?;
    let parameters: serde_json::Value = serde_json::from_str(&row.parameters)
        .map_err(|e| decode_error(&row.id, format!("parameters: {}", e)))?;

    let outputs = match kind.shape() {
        OutputShape::Single => JobOutputs::Single {
            file_id: row.output_file_id.clone(),
        },
        OutputShape::Multi => JobOutputs::Multi {
            file_ids: decode_ids(&row.id, &row.output_file_ids)?,
        },
        OutputShape::MultiBundle => JobOutputs::MultiBundle {
            file_ids: decode_ids(&row.id, &row.output_file_ids)?,
            bundle_id: row.bundle_file_id.clone(),
        },
    };

    let error = row
        .error_code
        .as_deref()
        .map(|code| ErrorBody::from_parts(code, row.error.as_deref().unwrap_or_default()));

    Ok(JobRecord {
        kind,
        status,
        inputs,
        parameters,
        outputs,
        error,
        created_at: from_db_timestamp(&row.created_at)
            .map_err(|e| decode_error(&row.id, format!("created_at: {}", e)))?,
        updated_at: from_db_timestamp(&row.updated_at)
            .map_err(|e| decode_error(&row.id, format!("updated_at: {}", e)))?,
        owner: row.owner,
        id: row.id,
    })
}

fn row_to_summary(row: JobRow) -> Result<JobSummary, DatabaseError> {
    let kind: JobKind = row
        .kind
        .parse()
        .map_err(|_| decode_error(&row.id, format!("unknown kind '{}'", row.kind)))?;
    let status: JobStatus = row.status.parse().map_err(|e| decode_error(&row.id, e))?;

    // Only single-output kinds have one obvious file to show.
    let primary_output = match kind.shape() {
        OutputShape::Single => row.output_file_id,
        OutputShape::Multi | OutputShape::MultiBundle => None,
    };

    Ok(JobSummary {
        kind,
        status,
        primary_output,
        created_at: from_db_timestamp(&row.created_at)
            .map_err(|e| decode_error(&row.id, format!("created_at: {}", e)))?,
        updated_at: from_db_timestamp(&row.updated_at)
            .map_err(|e| decode_error(&row.id, format!("updated_at: {}", e)))?,
        owner: row.owner,
        id: row.id,
    })
}

impl JobStore for SqliteJobStore {
    fn insert(&self, record: &JobRecord) -> Result<(), DatabaseError> {
        job_repo::insert(&self.db, &record_to_row(record)?)
    }

    fn update(&self, record: &JobRecord, expected: &[JobStatus]) -> Result<bool, DatabaseError> {
        let expected: Vec<&str> = expected.iter().map(|s| s.as_str()).collect();
        job_repo::transition(&self.db, &record_to_row(record)?, &expected)
    }

    fn get(&self, kind: JobKind, id: &str) -> Result<Option<JobRecord>, DatabaseError> {
        job_repo::find_by_kind_and_id(&self.db, kind.as_str(), id)?
            .map(row_to_record)
            .transpose()
    }

    fn find(&self, id: &str) -> Result<Option<JobRecord>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)?
            .map(row_to_record)
            .transpose()
    }

    fn list(&self, filter: &JobListFilter) -> Result<(Vec<JobSummary>, u64), DatabaseError> {
        let db_filter = JobFilter {
            kind: filter.kind.map(|k| k.as_str().to_string()),
            status: filter.status.map(|s| s.as_str().to_string()),
            owner: filter.owner.clone(),
            from_date: filter.created_from.as_ref().map(to_db_timestamp),
            to_date: filter.created_to.as_ref().map(to_db_timestamp),
            id_prefix: filter.id_prefix.clone(),
            limit: u64::from(filter.effective_limit()),
            offset: filter.offset,
        };

        let (rows, total) = job_repo::query(&self.db, &db_filter)?;
        let summaries = rows
            .into_iter()
            .map(row_to_summary)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((summaries, total))
    }

    fn count_by_kind(&self, owner: &str) -> Result<BTreeMap<JobKind, u64>, DatabaseError> {
        job_repo::count_by_kind(&self.db, owner)?
            .into_iter()
            .map(|(kind, count)| -> Result<(JobKind, u64), DatabaseError> {
                let kind: JobKind = kind.parse().map_err(|_| DatabaseError::Decode {
                    id: owner.to_string(),
                    reason: format!("unknown kind '{}'", kind),
                })?;
                Ok((kind, count))
            })
            .collect()
    }
}
