//! Job state machine across every kind, cancellation, deadlines and the
//! assembled service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use docjobs::config::Config;
use docjobs::{
    CancelToken, Docjobs, JobError, JobKind, JobOutputs, JobParameters, JobRequest, JobStatus,
    OutputShape, WorkerPool,
};

fn inputs_for(harness: &TestHarness, kind: JobKind) -> Vec<String> {
    (0..input_count(kind))
        .map(|n| match kind {
            JobKind::JpgToPdf => harness.upload(&format!("photo-{}.jpg", n), "image/jpeg", jpeg(16, 16)),
            _ => harness.upload_pdf(&format!("doc-{}.pdf", n), 2),
        })
        .collect()
}

fn request_for(harness: &TestHarness, kind: JobKind) -> JobRequest {
    JobRequest::new(Some("user-1"), inputs_for(harness, kind), valid_parameters(kind))
}

#[test]
fn test_every_kind_reaches_done_with_its_shape() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(shape_faithful()));
    let resolver = harness.resolver();

    for kind in JobKind::ALL {
        let id = runner
            .create(request_for(&harness, kind))
            .unwrap_or_else(|e| panic!("{} failed: {:?}", kind, e));

        let record = runner.get(kind, &id).unwrap();
        assert_eq!(record.status, JobStatus::Done, "{}", kind);
        assert_eq!(record.outputs.shape(), kind.shape(), "{}", kind);
        assert!(record.error.is_none());

        let expected = match (&record.outputs, kind.shape()) {
            (JobOutputs::Single { file_id: Some(id) }, OutputShape::Single) => id.clone(),
            (JobOutputs::Multi { file_ids }, OutputShape::Multi) => {
                assert_eq!(file_ids.len(), 2);
                file_ids[0].clone()
            }
            (
                JobOutputs::MultiBundle {
                    file_ids,
                    bundle_id: Some(bundle),
                },
                OutputShape::MultiBundle,
            ) => {
                assert_eq!(file_ids.len(), 3);
                bundle.clone()
            }
            (outputs, shape) => panic!("{}: {:?} does not match {:?}", kind, outputs, shape),
        };
        assert_eq!(resolver.resolve_primary(kind.as_str(), &id).unwrap(), expected);
    }
}

#[test]
fn test_every_kind_reaches_failed_without_outputs() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(failing(JobError::BackendExecutionFailed(
        "exit status 2".into(),
    ))));
    let resolver = harness.resolver();

    for kind in JobKind::ALL {
        let err = runner.create(request_for(&harness, kind)).unwrap_err();
        assert!(matches!(err, JobError::BackendExecutionFailed(_)), "{}", kind);

        let page = harness
            .admin()
            .list(&docjobs::JobListFilter {
                kind: Some(kind),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1, "{}", kind);
        let id = &page.jobs[0].id;

        let record = runner.get(kind, id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.outputs.is_empty());
        let error = record.error.unwrap();
        assert_eq!(error.code, "backend_execution_failed");
        assert!(!error.retryable);

        match resolver.resolve_primary(kind.as_str(), id) {
            Err(JobError::OutputNotReady(_)) => {}
            other => panic!("Expected OutputNotReady for {}, got {:?}", kind, other),
        }
    }
}

#[test]
fn test_status_events_follow_the_lifecycle() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(shape_faithful()));
    let mut events = runner.events().subscribe();

    let id = runner.create(request_for(&harness, JobKind::Compress)).unwrap();

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, id);
        assert_eq!(event.kind, JobKind::Compress);
        statuses.push(event.status);
    }
    assert_eq!(
        statuses,
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Done]
    );
}

#[test]
fn test_reads_are_idempotent() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(shape_faithful()));
    let resolver = harness.resolver();
    let id = runner.create(request_for(&harness, JobKind::Split)).unwrap();

    let first = runner.get_by_id(&id).unwrap();
    let primary = resolver.resolve_primary("split", &id).unwrap();
    for _ in 0..3 {
        assert_eq!(runner.get_by_id(&id).unwrap(), first);
        assert_eq!(resolver.resolve_primary("split", &id).unwrap(), primary);
    }
}

#[test]
fn test_kind_scoping_and_unknown_kinds() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(shape_faithful()));
    let id = runner.create(request_for(&harness, JobKind::Merge)).unwrap();

    assert!(matches!(
        runner.get(JobKind::Split, &id),
        Err(JobError::JobNotFound(_))
    ));
    assert!(matches!(
        harness.resolver().resolve_primary("split", &id),
        Err(JobError::JobNotFound(_))
    ));
    assert!(matches!(
        harness.resolver().resolve_primary("fax-to-pdf", &id),
        Err(JobError::UnsupportedJobKind(_))
    ));
    assert!(matches!(
        JobRequest::from_json("fax-to-pdf", None, vec![], serde_json::json!({})),
        Err(JobError::UnsupportedJobKind(_))
    ));
}

#[test]
fn test_rejected_requests_leave_no_record() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(shape_faithful()));
    let pdf = harness.upload_pdf("one.pdf", 2);

    let cases = vec![
        (
            JobRequest::new(None, vec![pdf.clone()], JobParameters::Merge),
            "invalid_parameters",
        ),
        (
            JobRequest::new(None, vec!["missing".into()], JobParameters::Compress {
                level: Default::default(),
            }),
            "input_not_found",
        ),
        (
            JobRequest::new(None, vec![pdf.clone()], JobParameters::Split { span: 0 }),
            "invalid_parameters",
        ),
        (
            JobRequest::new(None, vec![pdf], JobParameters::RemovePages {
                pages: "3-1".into(),
            }),
            "invalid_page_range",
        ),
    ];

    for (request, code) in cases {
        let err = runner.create(request).unwrap_err();
        assert_eq!(err.code(), code);
    }
    assert_eq!(harness.admin().list(&Default::default()).unwrap().total, 0);
}

#[test]
fn test_cancelled_before_start_is_recorded() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(shape_faithful()));
    let token = CancelToken::new();
    token.cancel();

    let err = runner
        .create_with_cancel(request_for(&harness, JobKind::Compress), &token)
        .unwrap_err();
    assert!(matches!(err, JobError::Cancelled(_)));

    let page = harness.admin().list(&Default::default()).unwrap();
    assert_eq!(page.jobs[0].status, JobStatus::Failed);
    let record = runner.get_by_id(&page.jobs[0].id).unwrap();
    assert_eq!(record.error.unwrap().code, "cancelled");
}

#[test]
fn test_deadline_fails_a_slow_job_and_drops_its_output() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(slow(Duration::from_millis(500))));
    let pool = WorkerPool::new(Arc::clone(&runner), 1, Some(Duration::from_millis(50)));
    let outcomes = pool.outcomes();

    let id = pool.submit(request_for(&harness, JobKind::Compress)).unwrap();
    let outcome = outcomes
        .recv_timeout(Duration::from_secs(5))
        .expect("outcome");
    assert_eq!(outcome.job_id, id);
    match outcome.result {
        Err(JobError::Cancelled(reason)) => assert_eq!(reason, "deadline exceeded"),
        other => panic!("Expected Cancelled, got {:?}", other),
    }

    // Let the backend finish; its output must never be attached.
    std::thread::sleep(Duration::from_millis(600));
    let record = runner.get_by_id(&id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.outputs.is_empty());

    pool.shutdown();
    pool.wait();
}

#[test]
fn test_pool_cancel_by_id() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(slow(Duration::from_millis(500))));
    let pool = WorkerPool::new(Arc::clone(&runner), 1, None);
    let outcomes = pool.outcomes();

    let id = pool.submit(request_for(&harness, JobKind::Compress)).unwrap();
    assert!(pool.cancel(&id));

    let outcome = outcomes
        .recv_timeout(Duration::from_secs(5))
        .expect("outcome");
    assert!(!outcome.is_success());
    assert_eq!(runner.get_by_id(&id).unwrap().error.unwrap().code, "cancelled");
    assert!(!pool.cancel(&id));

    pool.shutdown();
    pool.wait();
}

#[test]
fn test_service_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = Config {
        data_directory: Some(dir.path().to_string_lossy().into_owned()),
        worker_count: 2,
        ..Config::default()
    };
    let service = Docjobs::with_executor(config, Arc::new(fake_rasterizer(3))).unwrap();
    let outcomes = service.pool().outcomes();

    let input = service
        .upload("slides.pdf", "application/pdf", pdf_with_pages(3), Some("user-7"))
        .unwrap();
    let id = service
        .submit(JobRequest::new(
            Some("user-7"),
            vec![input.id],
            JobParameters::PdfToJpg { dpi: 100 },
        ))
        .unwrap();

    let outcome = outcomes
        .recv_timeout(Duration::from_secs(5))
        .expect("outcome");
    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(service.job(&id).unwrap().status, JobStatus::Done);

    let download = service.open_primary("pdf-to-jpg", &id).unwrap();
    assert!(download.file_name.ends_with(".zip"));

    let page = service
        .list_jobs(vec![("owner", "user-7"), ("status", "done")])
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.jobs[0].id, id);
    // Multi-output kinds carry no single primary in listings.
    assert_eq!(page.jobs[0].primary_output, None);

    assert!(dir.path().join("docjobs.db").exists());
    service.shutdown();
}

#[test]
fn test_polled_jobs_leave_nothing_buffered_in_the_pool() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = Config {
        data_directory: Some(dir.path().to_string_lossy().into_owned()),
        worker_count: 2,
        ..Config::default()
    };
    let service = Docjobs::with_executor(config, Arc::new(fake_rasterizer(2))).unwrap();
    let input = service
        .upload("deck.pdf", "application/pdf", pdf_with_pages(2), None)
        .unwrap();

    let ids: Vec<String> = (0..20)
        .map(|_| {
            service
                .submit(JobRequest::new(
                    None,
                    vec![input.id.clone()],
                    JobParameters::PdfToJpg { dpi: 72 },
                ))
                .unwrap()
        })
        .collect();

    for id in &ids {
        let mut polls = 0;
        while service.job(id).unwrap().status != JobStatus::Done {
            polls += 1;
            assert!(polls < 500, "job {} never finished", id);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // A late subscriber sees nothing from jobs that already finished.
    let outcomes = service.pool().outcomes();
    std::thread::sleep(Duration::from_millis(50));
    assert!(outcomes.try_recv().is_err());

    service.shutdown();
}

#[test]
fn test_service_rejects_submissions_after_shutdown() {
    let harness = TestHarness::new();
    let runner = harness.runner(Arc::new(shape_faithful()));
    let pool = WorkerPool::new(Arc::clone(&runner), 1, None);
    pool.shutdown();

    let err = pool
        .submit(request_for(&harness, JobKind::Compress))
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(harness.admin().list(&Default::default()).unwrap().total, 0);
    pool.wait();
}
