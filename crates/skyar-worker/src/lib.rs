//! Sequential sky replacement worker.
//!
//! This crate provides:
//! - A single-lane batch scheduler
//! - Renderer supervision with hard deadlines and estimated progress
//! - Reconciliation of `processing` records nobody owns
//! - A service facade tying store, scheduler and reconciler together

pub mod config;
pub mod error;
pub mod lease;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod supervisor;

pub use config::{RendererSettings, WorkerConfig, DEFAULT_JOB_TIMEOUT};
pub use error::{WorkerError, WorkerResult};
pub use lease::{JobLease, LeaseRegistry};
pub use logging::JobLogger;
pub use progress::{Checkpoint, ProgressEstimator, ProgressSchedule, ProgressSchedules};
pub use reconciler::{PgrepProbe, ProcessProbe, ReconcileOutcome, StatusReconciler, ABANDONED_CAUSE};
pub use scheduler::{BatchOptions, BatchScheduler, SkippedJob, SubmittedBatch, TemplateChoice};
pub use service::SkyArService;
pub use supervisor::{JobOutcome, RendererSupervisor};
