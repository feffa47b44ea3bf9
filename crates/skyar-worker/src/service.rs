//! Entry points used by an upstream API layer or the CLI.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use skyar_models::{
    BatchId, BatchSummary, FileType, JobId, JobRecord, JobStatus, ModelError, ProcessingParams,
    StatusView,
};
use skyar_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::lease::LeaseRegistry;
use crate::reconciler::{PgrepProbe, ProcessProbe, ReconcileOutcome, StatusReconciler};
use crate::scheduler::{BatchOptions, BatchScheduler, SubmittedBatch};
use crate::supervisor::RendererSupervisor;

/// The orchestration core: store, scheduler and reconciler wired together.
pub struct SkyArService {
    config: Arc<WorkerConfig>,
    store: Arc<JobStore>,
    scheduler: BatchScheduler,
    reconciler: StatusReconciler,
}

impl SkyArService {
    /// Open the store at `config.store_path` and start the scheduler.
    pub fn open(config: WorkerConfig) -> WorkerResult<Self> {
        let store = JobStore::open(&config.store_path)?;
        let probe = Arc::new(PgrepProbe::new(config.renderer.script.clone()));
        Ok(Self::with_probe(config, store, probe))
    }

    /// Wire the service around an already opened store and a custom probe.
    /// Must be called inside a tokio runtime.
    pub fn with_probe(config: WorkerConfig, store: JobStore, probe: Arc<dyn ProcessProbe>) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let leases = LeaseRegistry::new();
        let supervisor = Arc::new(RendererSupervisor::new(store.clone(), config.clone()));
        let scheduler = BatchScheduler::start(store.clone(), leases.clone(), supervisor);
        let reconciler = StatusReconciler::new(store.clone(), leases, probe, config.clone());

        info!(
            store = %store.path().display(),
            jobs = store.len(),
            "SkyAR service ready"
        );

        Self {
            config,
            store,
            scheduler,
            reconciler,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Create the `uploaded` record for a file already stored at `stored_path`.
    pub fn register_upload(
        &self,
        filename: &str,
        stored_path: impl AsRef<Path>,
    ) -> WorkerResult<JobRecord> {
        let file_type = FileType::from_path(filename)
            .ok_or_else(|| ModelError::unsupported_file_type(filename))?;
        let record = JobRecord::uploaded(filename, stored_path, file_type);
        self.store.put(record.clone())?;
        info!(job_id = %record.id, file_type = file_type.as_str(), "Registered upload");
        Ok(record)
    }

    pub fn submit_batch(
        &self,
        job_ids: &[JobId],
        options: &BatchOptions,
    ) -> WorkerResult<SubmittedBatch> {
        self.scheduler.submit_batch(job_ids, options)
    }

    /// Run one uploaded job with the given parameters.
    pub fn process(&self, job_id: &JobId, params: ProcessingParams) -> WorkerResult<SubmittedBatch> {
        self.scheduler.process(job_id, params)
    }

    /// Status of one job. A `processing` record is reconciled first.
    pub async fn status(&self, job_id: &JobId) -> WorkerResult<StatusView> {
        let record = self
            .store
            .get(job_id)
            .ok_or_else(|| WorkerError::JobNotFound(job_id.clone()))?;
        if record.status == JobStatus::Processing {
            self.reconciler.reconcile(job_id).await?;
        }
        self.store
            .get(job_id)
            .map(|r| r.status_view())
            .ok_or_else(|| WorkerError::JobNotFound(job_id.clone()))
    }

    /// Derived status of a whole batch.
    pub fn batch_status(&self, batch_id: &BatchId) -> WorkerResult<BatchSummary> {
        let jobs = self.store.batch(batch_id);
        if jobs.is_empty() {
            return Err(WorkerError::BatchNotFound(batch_id.clone()));
        }
        Ok(BatchSummary::from_records(batch_id.clone(), jobs))
    }

    /// Manually look for a finished artifact of a `processing` job.
    pub async fn check_completion(&self, job_id: &JobId) -> WorkerResult<ReconcileOutcome> {
        self.reconciler.check_completion(job_id).await
    }

    /// Pick up work left over from a previous run.
    ///
    /// Every `processing` record is reconciled, then `pending` jobs are
    /// queued again in their original batches. Returns the reconcile
    /// outcomes.
    pub async fn recover(&self) -> Vec<(JobId, ReconcileOutcome)> {
        let reconciled = self.reconciler.reconcile_all().await;
        match self.scheduler.resume_pending() {
            Ok(batches) if !batches.is_empty() => {
                info!(batches = batches.len(), "Resumed pending batches");
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to resume pending jobs: {}", e),
        }
        reconciled
    }

    /// Drain queued batches, then flush the store.
    pub async fn shutdown(self) -> WorkerResult<()> {
        self.scheduler.shutdown().await;
        self.store.flush()?;
        info!("SkyAR service stopped");
        Ok(())
    }
}
