use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::cancel::CancelToken;
use super::job_runner::{JobRequest, JobRunner, PreparedJob};
use crate::error::JobError;
use crate::job::{JobKind, JobRecord};

/// Final result of a job run by the pool.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub kind: JobKind,
    pub result: Result<JobRecord, JobError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

struct QueuedJob {
    job: PreparedJob,
    cancel: CancelToken,
}

type CancelRegistry = Arc<Mutex<HashMap<String, CancelToken>>>;

/// Where finished jobs are reported. Empty until someone subscribes.
type OutcomeSink = Arc<Mutex<Option<Sender<JobOutcome>>>>;

/// Runs jobs on background threads.
///
/// `submit` validates and records the job on the caller's thread, so client
/// errors come back immediately; execution happens on a worker. Callers poll
/// the job store or subscribe to outcomes with [`WorkerPool::outcomes`].
pub struct WorkerPool {
    runner: Arc<JobRunner>,
    job_sender: Sender<QueuedJob>,
    job_receiver: Receiver<QueuedJob>,
    outcome_sink: OutcomeSink,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    cancels: CancelRegistry,
    job_timeout: Option<Duration>,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one). Every job gets
    /// `job_timeout`, counted from submission.
    pub fn new(runner: Arc<JobRunner>, worker_count: usize, job_timeout: Option<Duration>) -> Self {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<QueuedJob>(worker_count * 2);
        let outcome_sink: OutcomeSink = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));
        let cancels: CancelRegistry = Arc::new(Mutex::new(HashMap::new()));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let worker_sink = Arc::clone(&outcome_sink);
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_runner = Arc::clone(&runner);
            let worker_cancels = Arc::clone(&cancels);

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    job_rx,
                    worker_sink,
                    shutdown_flag,
                    worker_runner,
                    worker_cancels,
                );
            });

            workers.push(handle);
        }

        info!("Started {} job workers", worker_count);

        Self {
            runner,
            job_sender,
            job_receiver,
            outcome_sink,
            workers,
            shutdown,
            cancels,
            job_timeout,
        }
    }

    /// Validates and queues a job. Returns its id as soon as the `pending`
    /// record exists. Blocks while the queue is full.
    pub fn submit(&self, request: JobRequest) -> Result<String, JobError> {
        if self.is_shutdown() {
            return Err(JobError::BackendUnavailable(
                "worker pool is shutting down".to_string(),
            ));
        }

        let job = self.runner.prepare(request)?;
        let job_id = job.id().to_string();
        let cancel = match self.job_timeout {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        };
        self.register(&job_id, &cancel);

        if let Err(e) = self.job_sender.send(QueuedJob { job, cancel }) {
            self.unregister(&job_id);
            let QueuedJob { job, .. } = e.into_inner();
            return Err(self.runner.abandon(job.record, "worker pool stopped"));
        }

        debug!("Queued job {}", job_id);
        Ok(job_id)
    }

    /// Requests cancellation of a queued or running job. Returns whether the
    /// job was still known to the pool.
    pub fn cancel(&self, job_id: &str) -> bool {
        let token = match self.cancels.lock() {
            Ok(cancels) => cancels.get(job_id).cloned(),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested for job {}", job_id);
                true
            }
            None => false,
        }
    }

    /// Subscribes to outcomes of jobs that finish from now on. A new
    /// subscription replaces the previous one. Without a live subscriber
    /// outcomes are dropped.
    pub fn outcomes(&self) -> Receiver<JobOutcome> {
        let (sender, receiver) = unbounded();
        if let Ok(mut sink) = self.outcome_sink.lock() {
            *sink = Some(sender);
        }
        receiver
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops accepting jobs, waits for the workers and fails every job that
    /// never started.
    pub fn wait(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let mut abandoned = 0;
        while let Ok(queued) = self.job_receiver.try_recv() {
            self.runner
                .abandon(queued.job.record, "worker pool shut down before the job started");
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!("{} queued jobs were never started", abandoned);
        }

        info!("All job workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn register(&self, job_id: &str, token: &CancelToken) {
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.insert(job_id.to_string(), token.clone());
        }
    }

    fn unregister(&self, job_id: &str) {
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.remove(job_id);
        }
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<QueuedJob>,
    outcome_sink: OutcomeSink,
    shutdown: Arc<AtomicBool>,
    runner: Arc<JobRunner>,
    cancels: CancelRegistry,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(QueuedJob { job, cancel }) => {
                let job_id = job.id().to_string();
                let kind = job.record.kind;
                debug!("Worker {} running job {}", worker_id, job_id);

                let result = runner.run(job, &cancel);

                if let Ok(mut registry) = cancels.lock() {
                    registry.remove(&job_id);
                }
                report(
                    &outcome_sink,
                    JobOutcome {
                        job_id,
                        kind,
                        result,
                    },
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn report(sink: &OutcomeSink, outcome: JobOutcome) {
    let Ok(mut sink) = sink.lock() else {
        return;
    };
    if let Some(sender) = sink.as_ref() {
        if sender.send(outcome).is_err() {
            debug!("Outcome subscriber went away");
            *sink = None;
        }
    }
}
