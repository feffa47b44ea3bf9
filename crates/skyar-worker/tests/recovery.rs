//! Restart behavior and reconciliation of orphaned `processing` records.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;

use common::{wait_for_batch, BrokenProbe, Harness, StaticProbe, FAIL};
use skyar_models::{BatchId, FileType, JobId, JobRecord, JobStatus, ProcessingParams};
use skyar_store::JobStore;
use skyar_worker::{BatchOptions, ReconcileOutcome, ABANDONED_CAUSE};

/// Leave a `processing` record behind, as a crashed worker would.
fn orphan(h: &Harness, name: &str, file_type: FileType) -> JobId {
    let store = JobStore::open(&h.config.store_path).unwrap();
    let mut record = JobRecord::uploaded(name, h.upload(name), file_type);
    record
        .assign_to_batch(BatchId::new(), 0, ProcessingParams::default(), "Pending")
        .unwrap();
    record.start_processing("Processing file 1/1 with Blue Sky with Clouds sky...").unwrap();
    record.advance_progress(45, "Processing video... (45%)");
    let id = record.id.clone();
    store.put(record).unwrap();
    store.close().unwrap();
    id
}

#[tokio::test]
async fn test_reload_reproduces_terminal_states() {
    let h = Harness::new();
    let service = h.service();
    let failing = format!("bad{}.mp4", FAIL);
    let ids = h.register(&service, &["good.mp4", &failing]);
    let submitted = service.submit_batch(&ids, &BatchOptions::default()).unwrap();
    let before = wait_for_batch(&service, &submitted.batch_id, Duration::from_secs(30)).await;
    assert_ok!(service.shutdown().await);

    let restarted = h.service();
    let after = restarted.batch_status(&submitted.batch_id).unwrap();
    assert!(after.is_complete);
    for (old, new) in before.jobs.iter().zip(&after.jobs) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.status, new.status);
        assert_eq!(old.progress, new.progress);
        assert_eq!(old.message, new.message);
        assert_eq!(old.output_path, new.output_path);
    }
    assert!(restarted.recover().await.is_empty());

    assert_ok!(restarted.shutdown().await);
}

#[tokio::test]
async fn test_orphan_with_artifact_is_recovered_on_status() {
    let h = Harness::new();
    let id = orphan(&h, "late.mp4", FileType::Video);
    let out = h.config.job_output_dir(&id);
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("late_sky.mp4"), b"frames").unwrap();

    let service = h.service_with_probe(Arc::new(StaticProbe(false)));
    let view = service.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 100);
    assert_eq!(view.output_path, Some(out.join("result.mp4")));

    assert_ok!(service.shutdown().await);
}

#[tokio::test]
async fn test_orphan_without_artifact_is_abandoned_after_deadline() {
    let mut h = Harness::new();
    h.config.abandon_after = Duration::ZERO;
    let id = orphan(&h, "lost.mp4", FileType::Video);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let service = h.service_with_probe(Arc::new(StaticProbe(false)));
    let recovered = service.recover().await;
    assert_eq!(recovered, vec![(id.clone(), ReconcileOutcome::Abandoned)]);

    let record = service.store().get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.error.as_deref(), Some(ABANDONED_CAUSE));
    assert_eq!(record.progress, 45, "failure keeps the last progress");

    assert_ok!(service.shutdown().await);
}

#[tokio::test]
async fn test_orphan_is_left_alone_while_idle_time_is_short() {
    let h = Harness::new();
    let id = orphan(&h, "fresh.mp4", FileType::Video);

    let service = h.service_with_probe(Arc::new(StaticProbe(false)));
    let view = service.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Processing);
    assert_eq!(view.progress, 45);

    assert_ok!(service.shutdown().await);
}

#[tokio::test]
async fn test_running_renderer_keeps_job_processing() {
    let mut h = Harness::new();
    h.config.abandon_after = Duration::ZERO;
    let id = orphan(&h, "busy.mp4", FileType::Video);

    let service = h.service_with_probe(Arc::new(StaticProbe(true)));
    assert_eq!(
        service.recover().await,
        vec![(id.clone(), ReconcileOutcome::Alive)]
    );
    assert_eq!(service.store().get(&id).unwrap().status, JobStatus::Processing);

    assert_ok!(service.shutdown().await);
}

#[tokio::test]
async fn test_probe_failure_is_ambiguous() {
    let mut h = Harness::new();
    h.config.abandon_after = Duration::ZERO;
    let id = orphan(&h, "unknown.mp4", FileType::Video);

    let service = h.service_with_probe(Arc::new(BrokenProbe));
    assert_eq!(
        service.recover().await,
        vec![(id.clone(), ReconcileOutcome::Ambiguous)]
    );
    assert_eq!(service.store().get(&id).unwrap().status, JobStatus::Processing);

    assert_ok!(service.shutdown().await);
}

#[tokio::test]
async fn test_manual_completion_check() {
    let h = Harness::new();
    let id = orphan(&h, "manual.mp4", FileType::Video);
    let service = h.service_with_probe(Arc::new(StaticProbe(true)));

    assert_eq!(
        service.check_completion(&id).await.unwrap(),
        ReconcileOutcome::Ambiguous
    );

    let out = h.config.job_output_dir(&id);
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("manual.avi"), b"frames").unwrap();
    assert_eq!(
        service.check_completion(&id).await.unwrap(),
        ReconcileOutcome::Recovered(out.join("result.avi"))
    );
    assert_eq!(std::fs::read(out.join("result.avi")).unwrap(), b"frames");
    assert_eq!(
        service.check_completion(&id).await.unwrap(),
        ReconcileOutcome::NotProcessing
    );

    assert_ok!(service.shutdown().await);
}

#[tokio::test]
async fn test_pending_jobs_resume_after_restart() {
    let h = Harness::new();
    let batch_id = BatchId::new();
    let store = JobStore::open(&h.config.store_path).unwrap();
    let mut ids = Vec::new();
    // Stored out of order; dispatch follows batch position
    for (position, name) in [(1, "second.mp4"), (0, "first.mp4")] {
        let mut record = JobRecord::uploaded(name, h.upload(name), FileType::Video);
        record
            .assign_to_batch(batch_id.clone(), position, ProcessingParams::default(), "Pending")
            .unwrap();
        ids.push(record.id.clone());
        store.put(record).unwrap();
    }
    store.close().unwrap();

    let service = h.service();
    assert!(service.recover().await.is_empty());
    let summary = wait_for_batch(&service, &batch_id, Duration::from_secs(30)).await;
    assert_eq!(summary.completed, 2);

    let order = h.invocation_order();
    assert_eq!(order.len(), 2);
    assert!(order[0].contains(ids[1].as_str()));
    assert!(order[1].contains(ids[0].as_str()));

    assert_ok!(service.shutdown().await);
}

#[tokio::test]
async fn test_pending_job_without_batch_is_failed_on_recover() {
    let h = Harness::new();
    let store = JobStore::open(&h.config.store_path).unwrap();
    let mut record = JobRecord::uploaded("stray.mp4", h.upload("stray.mp4"), FileType::Video);
    record
        .assign_to_batch(BatchId::new(), 0, ProcessingParams::default(), "Pending")
        .unwrap();
    record.batch_id = None;
    let id = record.id.clone();
    store.put(record).unwrap();
    store.close().unwrap();

    let service = h.service();
    service.recover().await;
    let record = service.store().get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(h.invocation_order().is_empty());

    assert_ok!(service.shutdown().await);
}
