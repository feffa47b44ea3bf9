//! Sky replacement worker binary.
//!
//! `skyar-worker [--template <id>|--random] <file>...` registers the files,
//! runs them as one batch and prints a summary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skyar_media::copy_file;
use skyar_models::{JobStatus, ProcessingParams, SkyTemplate};
use skyar_worker::{metrics, BatchOptions, SkyArService, WorkerConfig};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Args {
    options: BatchOptions,
    files: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut options = BatchOptions::default();
    let mut files = Vec::new();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--template" => {
                let id = args.next().context("--template needs a template ID")?;
                let template = SkyTemplate::find(&id)?;
                options = BatchOptions::fixed(ProcessingParams::default().with_template(template));
            }
            "--random" => options = BatchOptions::random(ProcessingParams::default()),
            "-h" | "--help" => {
                println!("usage: skyar-worker [--template <id>|--random] <file>...");
                for template in SkyTemplate::ALL {
                    println!("  {:<10} {}", template.id, template.name);
                }
                std::process::exit(0);
            }
            _ => files.push(PathBuf::from(arg)),
        }
    }

    if files.is_empty() {
        bail!("no input files given (try --help)");
    }
    Ok(Args { options, files })
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skyar=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Copy a file into the upload directory under a collision-free name.
async fn stage_upload(upload_dir: &Path, source: &Path) -> anyhow::Result<(String, PathBuf)> {
    let filename = source
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid file name: {}", source.display()))?
        .to_string();
    let stored = upload_dir.join(format!("{}_{}", uuid::Uuid::new_v4(), filename));
    copy_file(source, &stored)
        .await
        .with_context(|| format!("failed to copy {}", source.display()))?;
    Ok((filename, stored))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = parse_args()?;

    info!("Starting skyar-worker");
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::init_exporter(port)?;
        info!(port, "Serving Prometheus metrics");
    }

    let upload_dir = config.upload_dir.clone();
    let service = SkyArService::open(config).context("failed to open job store")?;

    for (job_id, outcome) in service.recover().await {
        info!(job_id = %job_id, outcome = outcome.as_str(), "Recovered job from previous run");
    }

    let mut job_ids = Vec::new();
    for file in &args.files {
        let (filename, stored) = stage_upload(&upload_dir, file).await?;
        match service.register_upload(&filename, &stored) {
            Ok(record) => job_ids.push(record.id),
            Err(e) => warn!(file = %file.display(), "Skipping file: {}", e),
        }
    }

    let submitted = service.submit_batch(&job_ids, &args.options)?;
    if submitted.accepted.is_empty() {
        bail!("no files could be queued");
    }

    let summary = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, finishing current batch");
                break None;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                let summary = service.batch_status(&submitted.batch_id)?;
                if summary.is_complete {
                    break Some(summary);
                }
            }
        }
    };

    service.shutdown().await?;

    let Some(summary) = summary else {
        return Ok(());
    };

    println!(
        "Batch {}: {} completed, {} failed",
        summary.batch_id, summary.completed, summary.failed
    );
    for job in &summary.jobs {
        match job.status {
            JobStatus::Completed => println!(
                "  ok    {} -> {}",
                job.filename,
                job.output_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
            _ => println!("  error {}: {}", job.filename, job.message),
        }
    }

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
