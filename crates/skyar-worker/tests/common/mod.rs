//! Shared fixtures: a temp workspace and a shell script standing in for the
//! renderer.
//!
//! The fake renderer reads its behavior from markers in the uploaded file
//! name: videos carry it in the descriptor's `datadir`, images in the name of
//! the staged copy.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use skyar_models::{BatchId, BatchSummary, JobId};
use skyar_store::JobStore;
use skyar_worker::{
    ProcessProbe, ProgressSchedules, SkyArService, WorkerConfig, WorkerError, WorkerResult,
};

/// Exit 1 with a message on stderr.
pub const FAIL: &str = "__fail__";
/// Run until killed.
pub const HANG: &str = "__hang__";
/// Exit 0 without writing anything.
pub const NO_OUTPUT: &str = "__noout__";
/// Write only non-primary stills, the biggest one being the real result.
/// Image jobs only.
pub const FALLBACK: &str = "__fallback__";
/// Write the video to `demo.mp4` in the working directory.
pub const DEMO: &str = "__demo__";

const FAKE_RENDERER: &str = r#"#!/bin/sh
desc="$2"
out=$(dirname "$desc")
echo "$desc" >> "@ORDER_LOG@"
if ! mkdir "@LOCK_DIR@" 2>/dev/null; then
    echo overlap >> "@OVERLAP_LOG@"
fi
id=$(basename "$out")
body="$(cat "$desc") $(ls "@WORK_DIR@/seq_$id" 2>/dev/null)"
finish() {
    rmdir "@LOCK_DIR@" 2>/dev/null
    exit "$1"
}
case "$body" in
    *__fail__*)
        echo "renderer crashed on purpose" >&2
        finish 1 ;;
    *__hang__*)
        rmdir "@LOCK_DIR@" 2>/dev/null
        echo $$ > "$out/renderer.pid"
        exec sleep 30 ;;
    *__noout__*)
        finish 0 ;;
    *__fallback__*)
        sleep 0.1
        head -c 4000 /dev/zero > "$out/frame_mask.jpg"
        head -c 900 /dev/zero > "$out/frame_final.jpg"
        head -c 100 /dev/zero > "$out/frame_small.jpg"
        finish 0 ;;
    *__demo__*)
        sleep 0.1
        echo frames > demo.mp4
        finish 0 ;;
esac
sleep 0.2
case "$body" in
    *'"input_mode": "seq"'*) echo pixels > "$out/frame_syneth.jpg" ;;
    *) echo frames > "$out/clip_sky.mp4" ;;
esac
finish 0
"#;

pub struct Harness {
    pub dir: TempDir,
    pub config: WorkerConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(job_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let script = root.join("fake_skymagic.sh");
        let body = FAKE_RENDERER
            .replace("@ORDER_LOG@", &root.join("order.log").to_string_lossy())
            .replace("@LOCK_DIR@", &root.join("render.lock").to_string_lossy())
            .replace("@OVERLAP_LOG@", &root.join("overlap.log").to_string_lossy())
            .replace("@WORK_DIR@", &root.join("work").to_string_lossy());
        std::fs::write(&script, body).unwrap();

        let renderer_dir = root.join("renderer");
        std::fs::create_dir_all(&renderer_dir).unwrap();
        std::fs::create_dir_all(root.join("uploads")).unwrap();

        let mut config = WorkerConfig::rooted_at(root);
        config.renderer.program = "sh".to_string();
        config.renderer.script = script.to_string_lossy().into_owned();
        config.renderer.working_dir = renderer_dir;
        config.job_timeout = job_timeout;
        config.progress = ProgressSchedules::uniform(Duration::from_millis(20));

        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn service(&self) -> SkyArService {
        SkyArService::open(self.config.clone()).unwrap()
    }

    pub fn service_with_probe(&self, probe: Arc<dyn ProcessProbe>) -> SkyArService {
        let store = JobStore::open(&self.config.store_path).unwrap();
        SkyArService::with_probe(self.config.clone(), store, probe)
    }

    /// Write an upload and return its stored path.
    pub fn upload(&self, name: &str) -> PathBuf {
        let path = self.config.upload_dir.join(name);
        std::fs::write(&path, b"video bytes").unwrap();
        path
    }

    /// Write a real PNG so resolution probing works.
    pub fn upload_image(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.config.upload_dir.join(name);
        image::RgbImage::new(width, height).save(&path).unwrap();
        path
    }

    /// Register uploads and return their IDs in order.
    pub fn register(&self, service: &SkyArService, names: &[&str]) -> Vec<JobId> {
        names
            .iter()
            .map(|name| {
                let stored = self.upload(name);
                service.register_upload(name, &stored).unwrap().id
            })
            .collect()
    }

    /// Descriptor paths in the order the renderer was invoked.
    pub fn invocation_order(&self) -> Vec<String> {
        std::fs::read_to_string(self.root().join("order.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn saw_overlap(&self) -> bool {
        self.root().join("overlap.log").exists()
    }
}

/// Poll until every job in the batch is terminal.
pub async fn wait_for_batch(
    service: &SkyArService,
    batch_id: &BatchId,
    timeout: Duration,
) -> BatchSummary {
    let deadline = Instant::now() + timeout;
    loop {
        let summary = service.batch_status(batch_id).unwrap();
        if summary.is_complete {
            return summary;
        }
        assert!(Instant::now() < deadline, "batch did not finish in time: {:?}", summary);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Probe with a fixed answer.
pub struct StaticProbe(pub bool);

#[async_trait::async_trait]
impl ProcessProbe for StaticProbe {
    async fn is_running(&self, _job_id: &JobId) -> WorkerResult<bool> {
        Ok(self.0)
    }
}

/// Probe that always errors.
pub struct BrokenProbe;

#[async_trait::async_trait]
impl ProcessProbe for BrokenProbe {
    async fn is_running(&self, _job_id: &JobId) -> WorkerResult<bool> {
        Err(WorkerError::probe_failed("process table unavailable"))
    }
}
