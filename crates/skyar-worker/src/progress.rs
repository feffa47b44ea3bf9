//! Estimated progress for a running render.
//!
//! The renderer reports nothing while it runs, so progress is advanced through
//! a fixed checkpoint schedule and then held at a plateau until the supervisor
//! stops the estimator. The estimator never reports 100: that value belongs to
//! the supervisor's completion write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use skyar_models::{FileType, JobId, JobStatus};
use skyar_store::{JobStore, StoreError};

/// One step of the schedule: wait `delay`, then report `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub value: u8,
    pub delay: Duration,
}

impl Checkpoint {
    pub const fn new(value: u8, delay: Duration) -> Self {
        Self { value, delay }
    }
}

/// Checkpoints followed by a re-announced plateau.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSchedule {
    pub checkpoints: Vec<Checkpoint>,
    pub plateau: u8,
    pub plateau_interval: Duration,
}

impl ProgressSchedule {
    /// Images: quick steps, plateau at 95.
    pub fn image() -> Self {
        let step = Duration::from_secs(3);
        Self {
            checkpoints: [25, 50, 75, 90]
                .into_iter()
                .map(|v| Checkpoint::new(v, step))
                .collect(),
            plateau: 95,
            plateau_interval: Duration::from_secs(5),
        }
    }

    /// Videos: slow steps that stretch out later, plateau at 98.
    pub fn video() -> Self {
        let checkpoints = [15, 30, 45, 60, 75, 85, 92, 95, 97, 98]
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let delay = if i < 6 { 15 } else { 30 };
                Checkpoint::new(v, Duration::from_secs(delay))
            })
            .collect();
        Self {
            checkpoints,
            plateau: 98,
            plateau_interval: Duration::from_secs(10),
        }
    }

    /// Same values with every delay replaced by `step`.
    pub fn with_step(mut self, step: Duration) -> Self {
        for checkpoint in &mut self.checkpoints {
            checkpoint.delay = step;
        }
        self.plateau_interval = step;
        self
    }
}

/// Schedules for each media kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSchedules {
    pub image: ProgressSchedule,
    pub video: ProgressSchedule,
}

impl Default for ProgressSchedules {
    fn default() -> Self {
        Self {
            image: ProgressSchedule::image(),
            video: ProgressSchedule::video(),
        }
    }
}

impl ProgressSchedules {
    pub fn for_file_type(&self, file_type: FileType) -> &ProgressSchedule {
        match file_type {
            FileType::Image => &self.image,
            FileType::Video => &self.video,
        }
    }

    /// Both schedules compressed to a uniform step. Used by tests and demos.
    pub fn uniform(step: Duration) -> Self {
        Self {
            image: ProgressSchedule::image().with_step(step),
            video: ProgressSchedule::video().with_step(step),
        }
    }
}

/// Background ticker advancing one job's progress.
pub struct ProgressEstimator {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ProgressEstimator {
    /// Start ticking for `job_id`.
    pub fn spawn(
        store: Arc<JobStore>,
        job_id: JobId,
        file_type: FileType,
        schedule: ProgressSchedule,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_schedule(store, job_id, file_type, schedule, stop_rx));
        Self { stop_tx, handle }
    }

    /// Stop ticking. No tick lands after this returns.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!("Progress estimator task panicked: {}", e);
            }
        }
    }
}

async fn run_schedule(
    store: Arc<JobStore>,
    job_id: JobId,
    file_type: FileType,
    schedule: ProgressSchedule,
    mut stop_rx: watch::Receiver<bool>,
) {
    let kind = file_type.as_str();

    for checkpoint in &schedule.checkpoints {
        if !wait_or_stop(checkpoint.delay, &mut stop_rx).await {
            return;
        }
        let message = format!("Processing {}... ({}%)", kind, checkpoint.value);
        if !report(&store, &job_id, checkpoint.value, message) {
            return;
        }
    }

    loop {
        if !wait_or_stop(schedule.plateau_interval, &mut stop_rx).await {
            return;
        }
        let message = format!("Finalizing {} processing...", kind);
        if !report(&store, &job_id, schedule.plateau, message) {
            return;
        }
    }
}

/// Sleep for `delay` unless stopped first. Returns `false` when stopped.
async fn wait_or_stop(delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    if *stop_rx.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        changed = stop_rx.changed() => {
            // A dropped sender means the estimator handle is gone
            changed.is_ok() && !*stop_rx.borrow()
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Write one estimate. Returns `false` once the job is no longer processing.
fn report(store: &JobStore, job_id: &JobId, value: u8, message: String) -> bool {
    match store.update(job_id, |record| {
        let still_running = record.status == JobStatus::Processing;
        record.advance_progress(value, message);
        still_running
    }) {
        Ok(running) => {
            debug!(job_id = %job_id, progress = value, "Estimated progress");
            running
        }
        Err(StoreError::JobNotFound(_)) => false,
        Err(e) => {
            warn!(job_id = %job_id, "Failed to record progress: {}", e);
            true
        }
    }
}
