//! The job pipeline: validate, record, execute, persist, finalize.
//!
//! [`JobRunner::prepare`] does everything that can fail because of the
//! request itself and only then inserts a `pending` record, so client errors
//! never leave records behind. [`JobRunner::run`] claims the record, runs the
//! backend on a helper thread while watching the [`CancelToken`], and
//! finalizes with a conditional update. Whoever finalizes first wins; a late
//! backend result is thrown away together with any files it produced.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, error, info, info_span, warn};

use super::cancel::CancelToken;
use crate::error::JobError;
use crate::events::{JobEvent, JobEventBroadcaster};
use crate::executor::{library, ExecutionOutput, ExecutionRequest, InputFile, TransformationExecutor};
use crate::job::{JobKind, JobParameters, JobRecord, JobStatus};
use crate::pages::parse_page_ranges;
use crate::persist::OutputPersister;
use crate::storage::{FileStore, JobStore};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A job submission as it arrives from a caller.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub kind: JobKind,
    pub owner: Option<String>,
    /// File store ids, in the order the operation consumes them.
    pub inputs: Vec<String>,
    pub parameters: JobParameters,
}

impl JobRequest {
    pub fn new(owner: Option<&str>, inputs: Vec<String>, parameters: JobParameters) -> Self {
        Self {
            kind: parameters.kind(),
            owner: owner.map(str::to_string),
            inputs,
            parameters,
        }
    }

    /// Builds a request from an untyped kind slug and a JSON parameter
    /// object (without the `kind` tag).
    pub fn from_json(
        kind: &str,
        owner: Option<&str>,
        inputs: Vec<String>,
        parameters: serde_json::Value,
    ) -> Result<Self, JobError> {
        let kind: JobKind = kind.parse()?;

        let mut object = match parameters {
            serde_json::Value::Null => serde_json::Map::new(),
            serde_json::Value::Object(map) => map,
            other => {
                return Err(JobError::InvalidParameters(format!(
                    "parameters must be an object, got {}",
                    other
                )))
            }
        };
        if let Some(tag) = object.get("kind").and_then(|v| v.as_str()) {
            if tag != kind.as_str() {
                return Err(JobError::InvalidParameters(format!(
                    "parameters are for '{}', not '{}'",
                    tag, kind
                )));
            }
        }
        object.insert("kind".to_string(), kind.as_str().into());

        let parameters: JobParameters = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| JobError::InvalidParameters(e.to_string()))?;

        Ok(Self {
            kind,
            owner: owner.map(str::to_string),
            inputs,
            parameters,
        })
    }
}

/// A validated job whose `pending` record is already stored.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub record: JobRecord,
    pub request: ExecutionRequest,
}

impl PreparedJob {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    files: Arc<dyn FileStore>,
    executor: Arc<dyn TransformationExecutor>,
    persister: OutputPersister,
    events: JobEventBroadcaster,
    poll_interval: Duration,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        files: Arc<dyn FileStore>,
        executor: Arc<dyn TransformationExecutor>,
        events: JobEventBroadcaster,
    ) -> Self {
        Self {
            persister: OutputPersister::new(Arc::clone(&files)),
            jobs,
            files,
            executor,
            events,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often a running job checks its cancel token.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    /// Runs a job to completion on the calling thread and returns its id.
    pub fn create(&self, request: JobRequest) -> Result<String, JobError> {
        self.create_with_cancel(request, &CancelToken::new())
    }

    pub fn create_with_cancel(
        &self,
        request: JobRequest,
        cancel: &CancelToken,
    ) -> Result<String, JobError> {
        let job = self.prepare(request)?;
        let id = job.record.id.clone();
        self.run(job, cancel)?;
        Ok(id)
    }

    /// Validates a request and stores its `pending` record.
    pub fn prepare(&self, request: JobRequest) -> Result<PreparedJob, JobError> {
        let JobRequest {
            kind,
            owner,
            inputs,
            parameters,
        } = request;

        if parameters.kind() != kind {
            return Err(JobError::InvalidParameters(format!(
                "{} parameters cannot be used for a {} job",
                parameters.kind(),
                kind
            )));
        }
        let descriptor = kind.descriptor();
        if !descriptor.inputs.accepts(inputs.len()) {
            return Err(JobError::InvalidParameters(format!(
                "{} takes {}, got {}",
                kind,
                descriptor.inputs,
                inputs.len()
            )));
        }
        parameters.validate()?;

        let resolved = inputs
            .iter()
            .map(|id| self.resolve_input(id))
            .collect::<Result<Vec<_>, _>>()?;
        let pages = match parameters.page_selection() {
            Some(selection) => Some(parse_page_ranges(
                selection,
                resolved.first().and_then(pdf_page_count),
            )?),
            None => None,
        };

        let record = JobRecord::new_pending(owner, inputs, &parameters)?;
        self.jobs.insert(&record)?;
        debug!(job_id = %record.id, kind = %kind, "Job recorded");
        self.publish(&record);

        Ok(PreparedJob {
            request: ExecutionRequest {
                job_id: record.id.clone(),
                kind,
                inputs: resolved,
                parameters,
                pages,
            },
            record,
        })
    }

    /// Executes a prepared job and finalizes its record. Returns the `done`
    /// record, or the error the job failed with.
    pub fn run(&self, job: PreparedJob, cancel: &CancelToken) -> Result<JobRecord, JobError> {
        let PreparedJob { record, request } = job;
        let span = info_span!("job", job_id = %record.id, kind = %record.kind);
        let _guard = span.enter();

        if let Some(reason) = cancel.reason() {
            return Err(self.fail(record, JobError::Cancelled(reason.to_string())));
        }

        let processing = record.into_processing();
        match self.jobs.update(&processing, &[JobStatus::Pending]) {
            Ok(true) => self.publish(&processing),
            Ok(false) => {
                return Err(JobError::Cancelled(format!(
                    "job {} was finalized before it started",
                    processing.id
                )))
            }
            Err(e) => return Err(self.fail(processing, e.into())),
        }

        let output = match self.execute(&request, cancel) {
            Ok(output) => output,
            Err(e) => return Err(self.fail(processing, e)),
        };

        let outputs = match self.persister.persist(
            &processing.id,
            processing.kind.shape(),
            output,
            processing.owner.as_deref(),
        ) {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(processing, e)),
        };

        let done = match processing.clone().into_done(outputs.clone()) {
            Ok(done) => done,
            Err(e) => {
                self.persister.discard(&outputs);
                return Err(self.fail(processing, e));
            }
        };

        match self.jobs.update(&done, &[JobStatus::Processing]) {
            Ok(true) => {
                info!(outputs = done.outputs.file_ids().len(), "Job done");
                self.publish(&done);
                Ok(done)
            }
            Ok(false) => {
                warn!("Job was finalized while running; discarding its outputs");
                self.persister.discard(&outputs);
                Err(JobError::Cancelled(format!(
                    "job {} was finalized before its outputs were recorded",
                    done.id
                )))
            }
            Err(e) => {
                self.persister.discard(&outputs);
                Err(self.fail(processing, e.into()))
            }
        }
    }

    /// Marks a job that will never run as failed.
    pub fn abandon(&self, record: JobRecord, reason: &str) -> JobError {
        self.fail(record, JobError::Cancelled(reason.to_string()))
    }

    pub fn get_by_id(&self, id: &str) -> Result<JobRecord, JobError> {
        self.jobs
            .find(id)?
            .ok_or_else(|| JobError::JobNotFound(id.to_string()))
    }

    /// Looks a job up within one kind; a job of another kind is not found.
    pub fn get(&self, kind: JobKind, id: &str) -> Result<JobRecord, JobError> {
        self.jobs
            .get(kind, id)?
            .ok_or_else(|| JobError::JobNotFound(id.to_string()))
    }

    fn resolve_input(&self, id: &str) -> Result<InputFile, JobError> {
        let file = self
            .files
            .get(id)?
            .ok_or_else(|| JobError::InputNotFound(id.to_string()))?;
        if !file.path.is_file() {
            return Err(JobError::InputNotFound(format!("{} (content missing)", id)));
        }
        Ok(InputFile {
            id: file.id,
            name: file.name,
            path: file.path,
            content_type: file.content_type,
        })
    }

    /// Runs the backend on a helper thread so cancellation and the deadline
    /// are honoured even when the backend itself cannot be interrupted.
    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutput, JobError> {
        let (sender, receiver) = bounded(1);
        let executor = Arc::clone(&self.executor);
        let owned = request.clone();
        let span = tracing::Span::current();

        thread::Builder::new()
            .name(format!("docjobs-exec-{}", short_id(&request.job_id)))
            .spawn(move || {
                let _guard = span.enter();
                // The receiver is gone if the job was cancelled meanwhile.
                let _ = sender.send(executor.execute(&owned));
            })
            .map_err(|e| {
                JobError::BackendExecutionFailed(format!("cannot start backend thread: {}", e))
            })?;

        loop {
            match receiver.recv_timeout(self.poll_interval) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(reason) = cancel.reason() {
                        warn!(reason, "Stopped waiting for backend");
                        return Err(JobError::Cancelled(reason.to_string()));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(JobError::BackendExecutionFailed(
                        "backend stopped without a result".to_string(),
                    ))
                }
            }
        }
    }

    fn fail(&self, record: JobRecord, err: JobError) -> JobError {
        let failed = record.into_failed(&err);
        match self
            .jobs
            .update(&failed, &[JobStatus::Pending, JobStatus::Processing])
        {
            Ok(true) => {
                warn!(code = err.code(), error = %err, "Job failed");
                self.publish(&failed);
            }
            Ok(false) => debug!(code = err.code(), "Job already finalized; failure not recorded"),
            Err(e) => error!(error = %e, "Could not record job failure"),
        }
        err
    }

    fn publish(&self, record: &JobRecord) {
        self.events.send(JobEvent::for_record(record));
    }
}

/// Page count of a PDF input, when it can be read without a password.
fn pdf_page_count(input: &InputFile) -> Option<u32> {
    let is_pdf = input.content_type == "application/pdf"
        || input.name.to_ascii_lowercase().ends_with(".pdf");
    if !is_pdf {
        return None;
    }
    library::page_count(&input.path).ok()
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
