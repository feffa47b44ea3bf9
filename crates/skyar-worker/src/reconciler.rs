//! Repairs `processing` records that no live supervisor owns.
//!
//! After a restart, or if a supervisor task dies, a record can stay
//! `processing` forever. On a status query the reconciler checks whether a
//! renderer is still running for the job; if not, it tries to recover the
//! artifact, and once the record has been idle past the abandon deadline it
//! marks the job failed.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use skyar_media::{ArtifactLocator, RendererError};
use skyar_models::{JobId, JobRecord, JobStatus};
use skyar_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::lease::LeaseRegistry;
use crate::metrics;

/// Failure cause recorded on abandoned jobs.
pub const ABANDONED_CAUSE: &str = "Renderer exited without reporting a result";

/// Checks whether a renderer process is running for a job.
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn is_running(&self, job_id: &JobId) -> WorkerResult<bool>;
}

/// Probe that matches the renderer command line with `pgrep -f`.
///
/// The job ID is part of the descriptor path, so `<script>.*<id>` matches only
/// that job's renderer.
#[derive(Debug, Clone)]
pub struct PgrepProbe {
    script: String,
}

impl PgrepProbe {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    fn pattern(&self, job_id: &JobId) -> String {
        format!("{}.*{}", self.script, job_id)
    }
}

#[async_trait]
impl ProcessProbe for PgrepProbe {
    async fn is_running(&self, job_id: &JobId) -> WorkerResult<bool> {
        let output = Command::new("pgrep")
            .arg("-f")
            .arg(self.pattern(job_id))
            .output()
            .await
            .map_err(|e| WorkerError::probe_failed(format!("pgrep: {}", e)))?;

        // pgrep exits 1 when nothing matched
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(WorkerError::probe_failed(format!(
                "pgrep exited with {:?}: {}",
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Result of reconciling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Record is not `processing`; nothing to do
    NotProcessing,
    /// A supervisor in this process owns the job
    Owned,
    /// A renderer process for the job is alive
    Alive,
    /// Artifact found and installed; job marked completed
    Recovered(PathBuf),
    /// No process and no artifact, but not idle long enough to give up
    Ambiguous,
    /// No process, no artifact, idle past the deadline; job marked error
    Abandoned,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::NotProcessing => "not_processing",
            ReconcileOutcome::Owned => "owned",
            ReconcileOutcome::Alive => "alive",
            ReconcileOutcome::Recovered(_) => "recovered",
            ReconcileOutcome::Ambiguous => "ambiguous",
            ReconcileOutcome::Abandoned => "abandoned",
        }
    }
}

/// Status reconciler.
pub struct StatusReconciler {
    store: Arc<JobStore>,
    leases: LeaseRegistry,
    probe: Arc<dyn ProcessProbe>,
    config: Arc<WorkerConfig>,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<JobStore>,
        leases: LeaseRegistry,
        probe: Arc<dyn ProcessProbe>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            store,
            leases,
            probe,
            config,
        }
    }

    /// Reconcile one job against the process table and its output directory.
    pub async fn reconcile(&self, job_id: &JobId) -> WorkerResult<ReconcileOutcome> {
        self.reconcile_with(job_id, true).await
    }

    /// Look for a finished artifact without probing for a live process.
    pub async fn check_completion(&self, job_id: &JobId) -> WorkerResult<ReconcileOutcome> {
        self.reconcile_with(job_id, false).await
    }

    /// Reconcile every `processing` job. Run once at startup.
    pub async fn reconcile_all(&self) -> Vec<(JobId, ReconcileOutcome)> {
        let processing: Vec<JobId> = self
            .store
            .all()
            .into_iter()
            .filter(|r| r.status == JobStatus::Processing)
            .map(|r| r.id)
            .collect();

        let mut results = Vec::with_capacity(processing.len());
        for job_id in processing {
            match self.reconcile(&job_id).await {
                Ok(outcome) => results.push((job_id, outcome)),
                Err(e) => warn!(job_id = %job_id, "Reconciliation failed: {}", e),
            }
        }
        if !results.is_empty() {
            info!("Reconciled {} processing jobs", results.len());
        }
        results
    }

    async fn reconcile_with(&self, job_id: &JobId, probe: bool) -> WorkerResult<ReconcileOutcome> {
        let record = self
            .store
            .get(job_id)
            .ok_or_else(|| WorkerError::JobNotFound(job_id.clone()))?;
        if record.status != JobStatus::Processing {
            return Ok(ReconcileOutcome::NotProcessing);
        }

        let Some(_lease) = self.leases.acquire(job_id) else {
            return Ok(self.finish(job_id, ReconcileOutcome::Owned));
        };

        if probe {
            match self.probe.is_running(job_id).await {
                Ok(true) => return Ok(self.finish(job_id, ReconcileOutcome::Alive)),
                Ok(false) => {}
                Err(e) => {
                    warn!(job_id = %job_id, "Process probe failed: {}", e);
                    return Ok(self.finish(job_id, ReconcileOutcome::Ambiguous));
                }
            }
        }

        if let Some(output) = self.recover_artifact(&record).await? {
            let outcome = match self.store.update(job_id, |r| r.complete(&output))? {
                Ok(()) => {
                    info!(job_id = %job_id, output = %output.display(), "Recovered finished job");
                    ReconcileOutcome::Recovered(output)
                }
                Err(e) => {
                    debug!(job_id = %job_id, "Job changed during recovery: {}", e);
                    ReconcileOutcome::NotProcessing
                }
            };
            return Ok(self.finish(job_id, outcome));
        }

        if !probe || !self.is_idle_past_deadline(&record) {
            return Ok(self.finish(job_id, ReconcileOutcome::Ambiguous));
        }

        let outcome = match self.store.update(job_id, |r| r.fail(ABANDONED_CAUSE))? {
            Ok(()) => {
                warn!(job_id = %job_id, "Marked abandoned job as failed");
                ReconcileOutcome::Abandoned
            }
            Err(e) => {
                debug!(job_id = %job_id, "Job changed during reconciliation: {}", e);
                ReconcileOutcome::NotProcessing
            }
        };
        Ok(self.finish(job_id, outcome))
    }

    /// Install an artifact left in the job's output directory, if any.
    ///
    /// The renderer's well-known output file is shared by every run. While
    /// another job is leased it belongs to that job, so only the job's own
    /// output directory is searched.
    async fn recover_artifact(&self, record: &JobRecord) -> WorkerResult<Option<PathBuf>> {
        let output_dir = self.config.job_output_dir(&record.id);
        let mut locator = ArtifactLocator::new(record.file_type);
        if self.leases.held_by_others(&record.id) {
            debug!(job_id = %record.id, "Another job is running, skipping well-known output");
        } else {
            locator = locator.with_well_known(self.config.renderer.well_known_output());
        }

        match locator.locate(&output_dir).await {
            Ok(artifact) => {
                let dest = artifact.canonical_path(&output_dir, record.file_type);
                Ok(Some(artifact.install(&dest).await?))
            }
            Err(RendererError::ArtifactMissing { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn is_idle_past_deadline(&self, record: &JobRecord) -> bool {
        let idle = Utc::now().signed_duration_since(record.updated_at);
        idle.to_std()
            .map(|idle| idle > self.config.abandon_after)
            .unwrap_or(false)
    }

    fn finish(&self, job_id: &JobId, outcome: ReconcileOutcome) -> ReconcileOutcome {
        debug!(job_id = %job_id, outcome = outcome.as_str(), "Reconciled job");
        metrics::record_reconcile(outcome.as_str());
        outcome
    }
}
