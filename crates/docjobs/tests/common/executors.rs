//! Executors standing in for real backends.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use docjobs::executor::{Artifact, ExecutionOutput, ExecutionRequest, TransformationExecutor};
use docjobs::JobError;

/// Runs a closure for every request.
pub struct ScriptedExecutor<F>(pub F);

impl<F> TransformationExecutor for ScriptedExecutor<F>
where
    F: Fn(&ExecutionRequest) -> Result<ExecutionOutput, JobError> + Send + Sync,
{
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput, JobError> {
        (self.0)(request)
    }
}

/// Delegates to another executor and keeps every request it saw.
pub struct RecordingExecutor {
    inner: Arc<dyn TransformationExecutor>,
    seen: Mutex<Vec<ExecutionRequest>>,
}

impl RecordingExecutor {
    pub fn new(inner: Arc<dyn TransformationExecutor>) -> Self {
        Self {
            inner,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl TransformationExecutor for RecordingExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput, JobError> {
        self.seen.lock().unwrap().push(request.clone());
        self.inner.execute(request)
    }
}

/// Pretends to rasterize: one JPEG artifact per page.
pub fn fake_rasterizer(pages: u32) -> impl TransformationExecutor {
    ScriptedExecutor(move |_: &ExecutionRequest| -> Result<ExecutionOutput, JobError> {
        Ok(ExecutionOutput::Many(
            (1..=pages)
                .map(|n| {
                    Artifact::new(
                        format!("page-{}.jpg", n),
                        "image/jpeg",
                        super::builders::jpeg(8, 8),
                    )
                })
                .collect(),
        ))
    })
}

/// Produces outputs of the right shape for whatever kind it is asked to run.
pub fn shape_faithful() -> impl TransformationExecutor {
    ScriptedExecutor(|request: &ExecutionRequest| -> Result<ExecutionOutput, JobError> {
        let descriptor = request.kind.descriptor();
        let artifact = |n: usize| {
            Artifact::new(
                format!("{}-{}.{}", request.kind, n, descriptor.output_extension),
                descriptor.output_content_type,
                vec![n as u8; 16],
            )
        };
        Ok(match descriptor.shape {
            docjobs::OutputShape::Single => ExecutionOutput::Single(artifact(1)),
            docjobs::OutputShape::Multi => ExecutionOutput::Many(vec![artifact(1), artifact(2)]),
            docjobs::OutputShape::MultiBundle => {
                ExecutionOutput::Many(vec![artifact(1), artifact(2), artifact(3)])
            }
        })
    })
}

/// Always fails with `error`.
pub fn failing(error: JobError) -> impl TransformationExecutor {
    ScriptedExecutor(move |_: &ExecutionRequest| -> Result<ExecutionOutput, JobError> {
        Err(error.clone())
    })
}

/// Sleeps, then produces a single artifact.
pub fn slow(delay: Duration) -> impl TransformationExecutor {
    ScriptedExecutor(move |_: &ExecutionRequest| -> Result<ExecutionOutput, JobError> {
        thread::sleep(delay);
        Ok(ExecutionOutput::Single(Artifact::new(
            "late.pdf",
            "application/pdf",
            b"%PDF-1.5".to_vec(),
        )))
    })
}
