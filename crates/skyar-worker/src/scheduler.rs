//! Sequential batch dispatch.
//!
//! One worker task consumes a queue of batches. Jobs run strictly one after
//! another across every batch, so at most one renderer process exists at a
//! time. A failed job never stops the rest of its batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use skyar_models::{
    BatchId, JobId, JobRecord, JobStatus, ModelError, ProcessingParams, SkyTemplate,
};
use skyar_store::{JobStore, StoreError};

use crate::error::{WorkerError, WorkerResult};
use crate::lease::LeaseRegistry;
use crate::metrics;
use crate::supervisor::{JobOutcome, RendererSupervisor};

/// How each job in a batch picks its sky.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChoice {
    /// Every job uses the template in the base parameters
    Fixed,
    /// Each job draws a template at random
    Random,
}

/// Parameters applied to every job of a submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub params: ProcessingParams,
    pub template: TemplateChoice,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::fixed(ProcessingParams::default())
    }
}

impl BatchOptions {
    pub fn fixed(params: ProcessingParams) -> Self {
        Self {
            params,
            template: TemplateChoice::Fixed,
        }
    }

    pub fn random(params: ProcessingParams) -> Self {
        Self {
            params,
            template: TemplateChoice::Random,
        }
    }

    fn params_for_job(&self) -> ProcessingParams {
        match self.template {
            TemplateChoice::Fixed => self.params.clone(),
            TemplateChoice::Random => {
                let template = SkyTemplate::random(&mut rand::rng());
                self.params.clone().with_template(template)
            }
        }
    }
}

/// A job left out of a submitted batch, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedJob {
    pub job_id: JobId,
    pub reason: String,
}

/// Result of a batch submission.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub batch_id: BatchId,
    /// Jobs now pending, in dispatch order
    pub accepted: Vec<JobId>,
    pub skipped: Vec<SkippedJob>,
}

#[derive(Debug)]
struct BatchRequest {
    batch_id: BatchId,
    job_ids: Vec<JobId>,
}

/// Single-lane batch scheduler.
pub struct BatchScheduler {
    store: Arc<JobStore>,
    tx: Mutex<Option<mpsc::UnboundedSender<BatchRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    /// Start the dispatch worker. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<JobStore>,
        leases: LeaseRegistry,
        supervisor: Arc<RendererSupervisor>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = DispatchWorker {
            store: store.clone(),
            leases,
            supervisor,
        };
        let handle = tokio::spawn(worker.run(rx));
        Self {
            store,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Move `uploaded` jobs into a new batch and queue it.
    ///
    /// Unknown IDs and jobs that are not `uploaded` are skipped and reported.
    /// A fixed template that does not exist rejects the whole batch before
    /// any job is touched.
    pub fn submit_batch(
        &self,
        job_ids: &[JobId],
        options: &BatchOptions,
    ) -> WorkerResult<SubmittedBatch> {
        if options.template == TemplateChoice::Fixed {
            options.params.template()?;
        }
        let tx = self
            .lock_tx()
            .clone()
            .ok_or(WorkerError::SchedulerClosed)?;

        let batch_id = BatchId::new();
        let mut accepted = Vec::new();
        let mut skipped = Vec::new();

        for job_id in job_ids {
            let params = options.params_for_job();
            let template = params.template()?;
            let message = format!("Pending - Will process with {} sky...", template.name);
            let position = accepted.len() as u32;

            let assigned = self.store.update(job_id, |record| {
                record.assign_to_batch(batch_id.clone(), position, params, message)
            });
            match assigned {
                Ok(Ok(())) => accepted.push(job_id.clone()),
                Ok(Err(ModelError::InvalidTransition { from, .. })) => skipped.push(SkippedJob {
                    job_id: job_id.clone(),
                    reason: format!("job is {}, not uploaded", from),
                }),
                Ok(Err(e)) => skipped.push(SkippedJob {
                    job_id: job_id.clone(),
                    reason: e.to_string(),
                }),
                Err(StoreError::JobNotFound(_)) => skipped.push(SkippedJob {
                    job_id: job_id.clone(),
                    reason: "unknown job".to_string(),
                }),
                Err(e) => return Err(e.into()),
            }
        }

        for skip in &skipped {
            warn!(batch_id = %batch_id, job_id = %skip.job_id, "Skipping job: {}", skip.reason);
        }

        if accepted.is_empty() {
            info!(batch_id = %batch_id, "Batch has no runnable jobs, not queued");
            return Ok(SubmittedBatch {
                batch_id,
                accepted,
                skipped,
            });
        }

        let request = BatchRequest {
            batch_id: batch_id.clone(),
            job_ids: accepted.clone(),
        };
        if tx.send(request).is_err() {
            self.fail_unqueued(&accepted, "Scheduler is shut down");
            return Err(WorkerError::SchedulerClosed);
        }

        metrics::record_batch_submitted(accepted.len());
        info!(
            batch_id = %batch_id,
            jobs = accepted.len(),
            skipped = skipped.len(),
            "Batch queued"
        );

        Ok(SubmittedBatch {
            batch_id,
            accepted,
            skipped,
        })
    }

    /// Run a single job as a batch of one.
    pub fn process(&self, job_id: &JobId, params: ProcessingParams) -> WorkerResult<SubmittedBatch> {
        self.submit_batch(std::slice::from_ref(job_id), &BatchOptions::fixed(params))
    }

    /// Queue again every `pending` job left over from a previous run.
    ///
    /// Jobs keep their batch, position and stored parameters. Batches are
    /// queued oldest first. A pending job without a batch cannot be
    /// scheduled and is failed.
    pub fn resume_pending(&self) -> WorkerResult<Vec<BatchId>> {
        let tx = self
            .lock_tx()
            .clone()
            .ok_or(WorkerError::SchedulerClosed)?;

        let mut grouped: HashMap<BatchId, Vec<JobRecord>> = HashMap::new();
        let mut orphaned = Vec::new();
        for record in self.store.all() {
            if record.status != JobStatus::Pending {
                continue;
            }
            match record.batch_id.clone() {
                Some(batch_id) => grouped.entry(batch_id).or_default().push(record),
                None => orphaned.push(record.id),
            }
        }
        if !orphaned.is_empty() {
            warn!(jobs = orphaned.len(), "Pending jobs without a batch");
            self.fail_unqueued(&orphaned, "Job was never assigned to a batch");
        }

        let mut batches: Vec<(BatchId, Vec<JobRecord>)> = grouped.into_iter().collect();
        for (_, jobs) in &mut batches {
            jobs.sort_by_key(|r| r.batch_position);
        }
        batches.sort_by_key(|(_, jobs)| jobs.iter().map(|r| r.updated_at).min());

        let mut resumed = Vec::with_capacity(batches.len());
        for (batch_id, jobs) in batches {
            let request = BatchRequest {
                batch_id: batch_id.clone(),
                job_ids: jobs.into_iter().map(|r| r.id).collect(),
            };
            info!(batch_id = %batch_id, jobs = request.job_ids.len(), "Resuming pending batch");
            if tx.send(request).is_err() {
                return Err(WorkerError::SchedulerClosed);
            }
            resumed.push(batch_id);
        }
        Ok(resumed)
    }

    /// Stop accepting batches and wait for queued work to drain.
    pub async fn shutdown(&self) {
        self.lock_tx().take();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Dispatch worker ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_tx().is_some()
    }

    fn lock_tx(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<BatchRequest>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail_unqueued(&self, job_ids: &[JobId], cause: &str) {
        for job_id in job_ids {
            if let Err(e) = self.store.update(job_id, |r| r.fail(cause)) {
                warn!(job_id = %job_id, "Failed to mark unqueued job: {}", e);
            }
        }
    }
}

/// What dispatch did with a pending job.
enum Dispatch {
    Start,
    NotPending(JobStatus),
    Rejected(String),
}

struct DispatchWorker {
    store: Arc<JobStore>,
    leases: LeaseRegistry,
    supervisor: Arc<RendererSupervisor>,
}

impl DispatchWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<BatchRequest>) {
        info!("Batch dispatch worker started");
        while let Some(batch) = rx.recv().await {
            metrics::set_queued_batches(rx.len());
            self.run_batch(batch).await;
        }
        info!("Batch dispatch worker stopped");
    }

    async fn run_batch(&self, batch: BatchRequest) {
        let total = batch.job_ids.len();
        info!(batch_id = %batch.batch_id, total, "Starting batch");

        let mut completed = 0usize;
        for (index, job_id) in batch.job_ids.iter().enumerate() {
            if let Some(outcome) = self.dispatch(job_id, index + 1, total).await {
                if outcome.is_completed() {
                    completed += 1;
                }
            }
        }

        info!(
            batch_id = %batch.batch_id,
            total,
            completed,
            failed = total - completed,
            "Batch finished"
        );
    }

    /// Run one job to a terminal state. Returns `None` if it was not run.
    async fn dispatch(&self, job_id: &JobId, position: usize, total: usize) -> Option<JobOutcome> {
        let Some(lease) = self.leases.acquire(job_id) else {
            warn!(job_id = %job_id, "Job is owned elsewhere, not dispatching");
            return None;
        };

        let decision = self.store.update(job_id, |record| {
            if record.status != JobStatus::Pending {
                return Dispatch::NotPending(record.status);
            }
            let template = match record.processing_params.as_ref().map(|p| p.template()) {
                Some(Ok(template)) => template,
                Some(Err(e)) => return Dispatch::Rejected(e.to_string()),
                None => return Dispatch::Rejected("missing processing parameters".to_string()),
            };
            let message = format!(
                "Processing file {}/{} with {} sky...",
                position, total, template.name
            );
            match record.start_processing(message) {
                Ok(()) => Dispatch::Start,
                Err(e) => Dispatch::Rejected(e.to_string()),
            }
        });

        match decision {
            Ok(Dispatch::Start) => {
                debug!(job_id = %job_id, position, total, "Dispatching job");
                Some(self.supervisor.run(&lease).await)
            }
            Ok(Dispatch::NotPending(status)) => {
                warn!(job_id = %job_id, status = %status, "Job no longer pending, skipping");
                None
            }
            Ok(Dispatch::Rejected(cause)) => {
                warn!(job_id = %job_id, "Rejecting job: {}", cause);
                match self.store.update(job_id, |r| r.fail(cause.clone())) {
                    Ok(Ok(())) => Some(JobOutcome::Failed(cause)),
                    Ok(Err(e)) => {
                        error!(job_id = %job_id, "Failed to reject job: {}", e);
                        None
                    }
                    Err(e) => {
                        error!(job_id = %job_id, "Failed to reject job: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to load job for dispatch: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_options_keep_template() {
        let template = SkyTemplate::find("bluesky4").unwrap();
        let options = BatchOptions::fixed(ProcessingParams::default().with_template(template));
        for _ in 0..5 {
            assert_eq!(options.params_for_job().sky_template, "bluesky4");
        }
    }

    #[test]
    fn test_random_options_only_change_template() {
        let mut base = ProcessingParams::default();
        base.relighting_factor = 0.4;
        let options = BatchOptions::random(base);
        for _ in 0..20 {
            let params = options.params_for_job();
            assert!(params.template().is_ok());
            assert!((params.relighting_factor - 0.4).abs() < f32::EPSILON);
        }
    }
}
