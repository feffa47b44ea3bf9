//! Worker configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use skyar_media::ModelSpec;
use skyar_models::JobId;

use crate::progress::ProgressSchedules;

/// Default hard deadline for one renderer run.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Extra time past the job timeout before an unowned `processing` job is
/// declared abandoned.
const ABANDON_GRACE: Duration = Duration::from_secs(60);

/// File the renderer writes video output to, inside its working directory.
const WELL_KNOWN_VIDEO_OUTPUT: &str = "demo.mp4";

/// How to launch the external renderer.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Interpreter or executable, resolved through `PATH`
    pub program: String,
    /// Script passed as the first argument
    pub script: String,
    /// Working directory of the renderer process
    pub working_dir: PathBuf,
    pub model: ModelSpec,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            script: "skymagic.py".to_string(),
            working_dir: PathBuf::from("."),
            model: ModelSpec::default(),
        }
    }
}

impl RendererSettings {
    /// Fixed video output location the renderer may use instead of its
    /// output directory.
    pub fn well_known_output(&self) -> PathBuf {
        self.working_dir.join(WELL_KNOWN_VIDEO_OUTPUT)
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Where uploaded files are stored
    pub upload_dir: PathBuf,
    /// Root of the per-job output directories
    pub output_dir: PathBuf,
    /// Scratch space for staged image sequences
    pub work_dir: PathBuf,
    /// Job store snapshot file
    pub store_path: PathBuf,
    pub renderer: RendererSettings,
    /// Hard wall-clock deadline per renderer run
    pub job_timeout: Duration,
    /// Idle time after which an unowned, dead `processing` job is failed
    pub abandon_after: Duration,
    pub progress: ProgressSchedules,
    /// Prometheus exporter port, if metrics should be served
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            work_dir: PathBuf::from("work"),
            store_path: PathBuf::from("skyar_processing_status.json"),
            renderer: RendererSettings::default(),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            abandon_after: DEFAULT_JOB_TIMEOUT + ABANDON_GRACE,
            progress: ProgressSchedules::default(),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let renderer_defaults = RendererSettings::default();
        let model_defaults = ModelSpec::default();

        let job_timeout = Duration::from_secs(env_parse(
            "SKYAR_JOB_TIMEOUT_SECS",
            defaults.job_timeout.as_secs(),
        ));
        let abandon_after = std::env::var("SKYAR_ABANDON_AFTER_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(job_timeout + ABANDON_GRACE);

        Self {
            upload_dir: env_path("SKYAR_UPLOAD_DIR", defaults.upload_dir),
            output_dir: env_path("SKYAR_OUTPUT_DIR", defaults.output_dir),
            work_dir: env_path("SKYAR_WORK_DIR", defaults.work_dir),
            store_path: env_path("SKYAR_STORE_PATH", defaults.store_path),
            renderer: RendererSettings {
                program: std::env::var("SKYAR_RENDERER_PROGRAM")
                    .unwrap_or(renderer_defaults.program),
                script: std::env::var("SKYAR_RENDERER_SCRIPT").unwrap_or(renderer_defaults.script),
                working_dir: env_path("SKYAR_RENDERER_WORKDIR", renderer_defaults.working_dir),
                model: ModelSpec {
                    net_g: std::env::var("SKYAR_MODEL").unwrap_or(model_defaults.net_g),
                    checkpoint_dir: std::env::var("SKYAR_CHECKPOINT_DIR")
                        .unwrap_or(model_defaults.checkpoint_dir),
                },
            },
            job_timeout,
            abandon_after,
            progress: ProgressSchedules::default(),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Config rooted at `root`, with uploads, outputs, scratch space and the
    /// store snapshot as subpaths.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            upload_dir: root.join("uploads"),
            output_dir: root.join("outputs"),
            work_dir: root.join("work"),
            store_path: root.join("state").join("jobs.json"),
            ..Self::default()
        }
    }

    /// Output directory owned by one job.
    pub fn job_output_dir(&self, job_id: &JobId) -> PathBuf {
        self.output_dir.join(job_id.as_str())
    }

    /// Directory an image is staged into for sequence-mode rendering.
    pub fn staging_dir(&self, job_id: &JobId) -> PathBuf {
        self.work_dir.join(format!("seq_{}", job_id))
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var_os(key).map(PathBuf::from).unwrap_or(default)
}
