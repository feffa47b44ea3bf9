//! Runs the external renderer for one job and owns its terminal write.
//!
//! Per run: stage the input, write the descriptor, spawn the renderer under a
//! hard deadline while the progress estimator ticks, stop the estimator, then
//! collect the artifact and write exactly one terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{warn, Instrument};

use skyar_media::{
    copy_file, remove_dir_if_exists, ArtifactLocator, RendererCommand, RendererConfig,
    RendererRunner, ResolutionPlan,
};
use skyar_models::{FileType, JobRecord, SkyTemplate};
use skyar_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::lease::JobLease;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::ProgressEstimator;

/// Progress written just before the renderer is spawned.
const SPAWN_PROGRESS: u8 = 10;

/// Terminal result of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(PathBuf),
    Failed(String),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

/// Everything resolved before the renderer starts.
struct PreparedJob {
    record: JobRecord,
    template: &'static SkyTemplate,
    output_dir: PathBuf,
    descriptor: PathBuf,
    staging_dir: Option<PathBuf>,
}

/// Renderer process supervisor.
pub struct RendererSupervisor {
    store: Arc<JobStore>,
    config: Arc<WorkerConfig>,
}

impl RendererSupervisor {
    pub fn new(store: Arc<JobStore>, config: Arc<WorkerConfig>) -> Self {
        Self { store, config }
    }

    /// Render a `processing` job to a terminal state.
    ///
    /// Holding the lease is the caller's proof of ownership.
    pub async fn run(&self, lease: &JobLease) -> JobOutcome {
        let job_id = lease.job_id();
        let Some(record) = self.store.get(job_id) else {
            warn!(job_id = %job_id, "Supervisor given an unknown job");
            return JobOutcome::Failed(WorkerError::JobNotFound(job_id.clone()).to_string());
        };
        let logger = JobLogger::new(job_id, "sky_replacement").with_batch(record.batch_id.as_ref());
        let span = logger.create_span();
        self.supervise(record, &logger).instrument(span).await
    }

    async fn supervise(&self, record: JobRecord, logger: &JobLogger) -> JobOutcome {
        let job_id = record.id.clone();
        let file_type = record.file_type.as_str();
        let started = Instant::now();

        let result = match self.prepare(record, logger).await {
            Ok(job) => {
                let result = self.execute(&job, logger).await;
                if let Some(dir) = &job.staging_dir {
                    if let Err(e) = remove_dir_if_exists(dir).await {
                        logger.log_warning(&format!("Failed to remove staging dir: {}", e));
                    }
                }
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => match self.store.update(&job_id, |r| r.complete(&output)) {
                Ok(Ok(())) => {
                    metrics::record_job_completed(file_type, started.elapsed());
                    logger.log_completion(&format!("output at {}", output.display()));
                    JobOutcome::Completed(output)
                }
                Ok(Err(e)) => self.abandoned_write(logger, e.to_string()),
                Err(e) => self.abandoned_write(logger, e.to_string()),
            },
            Err(e) => {
                let cause = e.failure_cause();
                metrics::record_job_failed(file_type, e.kind());
                logger.log_error(&cause);
                match self.store.update(&job_id, |r| r.fail(cause.clone())) {
                    Ok(Ok(())) => JobOutcome::Failed(cause),
                    Ok(Err(e)) => self.abandoned_write(logger, e.to_string()),
                    Err(e) => self.abandoned_write(logger, e.to_string()),
                }
            }
        }
    }

    fn abandoned_write(&self, logger: &JobLogger, reason: String) -> JobOutcome {
        logger.log_error(&format!("Terminal write rejected: {}", reason));
        JobOutcome::Failed(reason)
    }

    /// Resolve parameters, plan resolutions, stage input and write the
    /// descriptor.
    async fn prepare(&self, record: JobRecord, logger: &JobLogger) -> WorkerResult<PreparedJob> {
        let job_id = &record.id;
        let params = record
            .processing_params
            .clone()
            .ok_or_else(|| WorkerError::MissingParams(job_id.clone()))?;
        let template = params.template()?;

        let output_dir = self.config.job_output_dir(job_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let plan = ResolutionPlan::for_input(&record.input_path, record.file_type).await?;

        let (datadir, staging_dir) = match record.file_type {
            FileType::Image => {
                let staging = self.config.staging_dir(job_id);
                let name = record
                    .input_path
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&record.filename));
                copy_file(&record.input_path, staging.join(name)).await?;
                (staging.clone(), Some(staging))
            }
            FileType::Video => (record.input_path.clone(), None),
        };

        let descriptor = RendererConfig::new(
            &self.config.renderer.model,
            record.file_type,
            datadir,
            &output_dir,
            &plan,
            template,
            &params,
        )
        .write_to(&output_dir)
        .await?;

        logger.log_start(&format!(
            "{} {}x{} with {}",
            record.file_type.as_str(),
            plan.output.width,
            plan.output.height,
            template.id
        ));

        Ok(PreparedJob {
            record,
            template,
            output_dir,
            descriptor,
            staging_dir,
        })
    }

    /// Spawn the renderer with the estimator running, then collect output.
    async fn execute(&self, job: &PreparedJob, logger: &JobLogger) -> WorkerResult<PathBuf> {
        let job_id = &job.record.id;
        let file_type = job.record.file_type;
        let settings = &self.config.renderer;

        let message = format!(
            "Processing {} with {} sky...",
            file_type.as_str(),
            job.template.name
        );
        self.store
            .update(job_id, |r| r.advance_progress(SPAWN_PROGRESS, message))?;

        let estimator = ProgressEstimator::spawn(
            self.store.clone(),
            job_id.clone(),
            file_type,
            self.config.progress.for_file_type(file_type).clone(),
        );

        let cmd = RendererCommand::for_descriptor(
            settings.program.clone(),
            settings.script.clone(),
            &job.descriptor,
        )
        .current_dir(&settings.working_dir);
        let run = RendererRunner::new()
            .with_timeout(self.config.job_timeout)
            .run(&cmd)
            .await;

        estimator.stop().await;

        let output = run?;
        logger.log_progress(&format!(
            "renderer finished in {:.1}s",
            output.elapsed.as_secs_f64()
        ));

        let artifact = ArtifactLocator::new(file_type)
            .with_well_known(settings.well_known_output())
            .locate(&job.output_dir)
            .await?;
        let dest = artifact.canonical_path(&job.output_dir, file_type);
        Ok(artifact.install(&dest).await?)
    }
}
