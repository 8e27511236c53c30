use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::kind::{JobKind, OutputShape};
use super::params::JobParameters;
use crate::error::{ErrorBody, JobError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Output file ids attached to a record, laid out by the kind's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum JobOutputs {
    Single {
        file_id: Option<String>,
    },
    Multi {
        file_ids: Vec<String>,
    },
    MultiBundle {
        file_ids: Vec<String>,
        bundle_id: Option<String>,
    },
}

impl JobOutputs {
    pub fn empty(shape: OutputShape) -> Self {
        match shape {
            OutputShape::Single => JobOutputs::Single { file_id: None },
            OutputShape::Multi => JobOutputs::Multi {
                file_ids: Vec::new(),
            },
            OutputShape::MultiBundle => JobOutputs::MultiBundle {
                file_ids: Vec::new(),
                bundle_id: None,
            },
        }
    }

    pub fn shape(&self) -> OutputShape {
        match self {
            JobOutputs::Single { .. } => OutputShape::Single,
            JobOutputs::Multi { .. } => OutputShape::Multi,
            JobOutputs::MultiBundle { .. } => OutputShape::MultiBundle,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            JobOutputs::Single { file_id } => file_id.is_none(),
            JobOutputs::Multi { file_ids } => file_ids.is_empty(),
            JobOutputs::MultiBundle {
                file_ids,
                bundle_id,
            } => file_ids.is_empty() && bundle_id.is_none(),
        }
    }

    /// Every referenced file id, bundle last.
    pub fn file_ids(&self) -> Vec<&str> {
        match self {
            JobOutputs::Single { file_id } => file_id.iter().map(String::as_str).collect(),
            JobOutputs::Multi { file_ids } => file_ids.iter().map(String::as_str).collect(),
            JobOutputs::MultiBundle {
                file_ids,
                bundle_id,
            } => file_ids
                .iter()
                .chain(bundle_id.iter())
                .map(String::as_str)
                .collect(),
        }
    }
}

/// One submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub owner: Option<String>,
    pub inputs: Vec<String>,
    /// Stored parameter form; secrets are redacted.
    pub parameters: serde_json::Value,
    pub status: JobStatus,
    pub outputs: JobOutputs,
    pub error: Option<ErrorBody>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current time at the precision the job store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl JobRecord {
    pub fn new_pending(
        owner: Option<String>,
        inputs: Vec<String>,
        parameters: &JobParameters,
    ) -> Result<Self, JobError> {
        let kind = parameters.kind();
        let timestamp = now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            owner,
            inputs,
            parameters: parameters.to_stored()?,
            status: JobStatus::Pending,
            outputs: JobOutputs::empty(kind.shape()),
            error: None,
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    pub fn into_processing(mut self) -> Self {
        self.status = JobStatus::Processing;
        self.updated_at = now();
        self
    }

    /// Attaches outputs and marks the job done. The outputs must have the
    /// shape the kind declares.
    pub fn into_done(mut self, outputs: JobOutputs) -> Result<Self, JobError> {
        if outputs.shape() != self.kind.shape() {
            return Err(JobError::OutputPersistFailure(format!(
                "{} jobs produce {:?} outputs, got {:?}",
                self.kind,
                self.kind.shape(),
                outputs.shape()
            )));
        }
        self.status = JobStatus::Done;
        self.outputs = outputs;
        self.error = None;
        self.updated_at = now();
        Ok(self)
    }

    pub fn into_failed(mut self, error: &JobError) -> Self {
        self.status = JobStatus::Failed;
        self.outputs = JobOutputs::empty(self.kind.shape());
        self.error = Some(error.to_body());
        self.updated_at = now();
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
