//! Renderer command builder and runner.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RendererError, RendererResult};

/// How long to wait for the output pipes to close after the renderer exits.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Builder for renderer invocations.
#[derive(Debug, Clone)]
pub struct RendererCommand {
    /// Executable, resolved through `PATH` at run time
    program: String,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl RendererCommand {
    /// Create a command for an arbitrary program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            envs: Vec::new(),
        }
    }

    /// `<program> <script> --path <descriptor>`, the renderer's CLI contract.
    pub fn for_descriptor(
        program: impl Into<String>,
        script: impl Into<OsString>,
        descriptor: impl AsRef<Path>,
    ) -> Self {
        Self::new(program)
            .arg(script)
            .arg("--path")
            .arg(descriptor.as_ref())
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Space-joined command line, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a successful render.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runs a renderer command with a hard wall-clock deadline.
#[derive(Debug, Clone, Default)]
pub struct RendererRunner {
    timeout: Option<Duration>,
}

impl RendererRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline. The process is killed when it expires.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Spawn the renderer and wait for it.
    ///
    /// Exit code 0 yields the captured output; a non-zero exit yields
    /// [`RendererError::ProcessFailed`] carrying stderr; an expired deadline
    /// kills the process and yields [`RendererError::Timeout`].
    pub async fn run(&self, cmd: &RendererCommand) -> RendererResult<RenderOutput> {
        let program = which::which(cmd.program())
            .map_err(|_| RendererError::NotFound(cmd.program().to_string()))?;

        debug!("Running renderer: {}", cmd.display());

        let mut command = Command::new(&program);
        command
            .args(cmd.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group so a timeout can take down helpers the renderer starts
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = cmd.working_dir() {
            command.current_dir(dir);
        }
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }

        let started = Instant::now();
        let mut child = command.spawn()?;
        info!(pid = child.id(), "Renderer started");

        let stdout_task = child.stdout.take().map(spawn_reader);
        let stderr_task = child.stderr.take().map(spawn_reader);

        let status = match self.wait(&mut child).await {
            Ok(status) => status,
            Err(e) => {
                abort_reader(stdout_task);
                abort_reader(stderr_task);
                return Err(e);
            }
        };

        let stdout = drain_reader(stdout_task).await;
        let stderr = drain_reader(stderr_task).await;
        let elapsed = started.elapsed();

        if status.success() {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "Renderer exited cleanly");
            Ok(RenderOutput {
                stdout,
                stderr,
                elapsed,
            })
        } else {
            warn!(
                exit_code = ?status.code(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Renderer exited with failure"
            );
            Err(RendererError::process_failed(stderr, status.code()))
        }
    }

    /// Wait for the child, killing it if the deadline expires.
    async fn wait(&self, child: &mut Child) -> RendererResult<std::process::ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    "Renderer timed out after {} seconds, killing process",
                    timeout.as_secs()
                );
                kill_process_group(child);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill renderer: {}", e);
                }
                Err(RendererError::Timeout(timeout))
            }
        }
    }
}

/// SIGKILL every process in the renderer's group.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!(pid, "Failed to kill renderer process group: {}", e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Renderer pipe read failed: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn abort_reader(task: Option<JoinHandle<String>>) {
    if let Some(task) = task {
        task.abort();
    }
}

/// Collect a reader's output. Grandchildren may keep the pipe open, so the
/// wait is bounded.
async fn drain_reader(task: Option<JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, task).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}
