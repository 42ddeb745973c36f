mod docker;
mod process;
mod toolchain;

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tempfile::TempDir;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};

use crate::{
    config::{SandboxBackendKind, SandboxConfig},
    models::ExecutionLimits,
};

pub use docker::DockerSandbox;
pub use process::ProcessSandbox;
pub use toolchain::Toolchain;

// Output readers are given this long to drain after the process has been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("build did not finish within {0:?}")]
    BuildTimeout(Duration),
    #[error("build failed: {0}")]
    BuildFailure(String),
    #[error("run did not finish within {0:?}")]
    RunTimeout(Duration),
    #[error("program exited with status {exit_code}")]
    RunCrash { exit_code: i32, stderr: String },
    #[error("isolated execution unavailable: {0}")]
    Unavailable(String),
}

/// A compiled submission. Owns the disposable working directory, which is removed when
/// the artifact is dropped, whichever way the caller exits.
#[derive(Debug)]
pub struct Artifact {
    workspace: TempDir,
    binary_name: String,
}

impl Artifact {
    pub fn dir(&self) -> &Path {
        self.workspace.path()
    }

    pub fn binary_path(&self) -> PathBuf {
        self.workspace.path().join(&self.binary_name)
    }
}

/// Isolated build-and-run capability. Implementations must not share a filesystem
/// beyond the artifact directory, must disable networking for runs, and must leave no
/// process behind once a deadline passes.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn build(&self, source: &str, limits: &ExecutionLimits)
    -> Result<Artifact, SandboxError>;

    async fn run(
        &self,
        artifact: &Artifact,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<String, SandboxError>;
}

pub struct SandboxFactory;

impl SandboxFactory {
    pub async fn from_config(config: &SandboxConfig) -> Arc<dyn SandboxBackend> {
        match config.backend {
            SandboxBackendKind::Docker => {
                let sandbox = DockerSandbox::new(config);
                if let Err(err) = sandbox.prepare().await {
                    tracing::error!(error = %err, "docker sandbox is not ready; submissions will report judging unavailable");
                }
                Arc::new(sandbox)
            }
            SandboxBackendKind::Process => {
                let sandbox = ProcessSandbox::new(config.process_isolate);
                sandbox.prepare().await;
                Arc::new(sandbox)
            }
        }
    }
}

/// Creates a fresh working directory holding `source`. Nothing is shared between
/// submissions, even byte-identical ones.
pub(crate) async fn create_workspace(
    toolchain: &Toolchain,
    source: &str,
) -> Result<Artifact, SandboxError> {
    let workspace = tempfile::Builder::new()
        .prefix("arena-submission-")
        .tempdir()
        .map_err(|e| SandboxError::Unavailable(format!("failed to create workspace: {e}")))?;
    tokio::fs::write(toolchain.source_path(workspace.path()), source.as_bytes())
        .await
        .map_err(|e| SandboxError::Unavailable(format!("failed to write source: {e}")))?;
    Ok(Artifact {
        workspace,
        binary_name: toolchain.binary_name.to_string(),
    })
}

#[derive(Debug, Clone)]
pub(crate) struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u128,
}

impl Captured {
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Spawns `cmd` as the leader of a new process group, feeds it `stdin`, and waits at
/// most `timeout`. Once the leader exits or the deadline passes, the whole group is
/// killed, so nothing it forked outlives the call. Each output stream is truncated to
/// `max_output` bytes.
pub(crate) async fn run_captured(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    max_output: usize,
) -> io::Result<Captured> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd.spawn()?;
    let group = child.id();

    if let (Some(mut pipe), Some(bytes)) = (child.stdin.take(), stdin) {
        tokio::spawn(async move {
            let _ = pipe.write_all(&bytes).await;
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("missing stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("missing stderr pipe"))?;
    let stdout_task = tokio::spawn(async move { read_limited(stdout, max_output).await });
    let stderr_task = tokio::spawn(async move { read_limited(stderr, max_output).await });

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    kill_process_group(group);
    let (exit_code, timed_out) = match waited {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
        Ok(Err(err)) => {
            let _ = child.kill().await;
            return Err(err);
        }
        Err(_) => {
            let _ = child.kill().await;
            (-1, true)
        }
    };

    let stdout = tokio::time::timeout(DRAIN_GRACE, stdout_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();
    let stderr = tokio::time::timeout(DRAIN_GRACE, stderr_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();

    Ok(Captured {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        exit_code,
        timed_out,
        duration_ms: started.elapsed().as_millis(),
    })
}

fn kill_process_group(group: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(group) = group.and_then(|id| i32::try_from(id).ok()) {
            // SAFETY: kill(2) takes plain integers and touches no memory of ours.
            unsafe {
                libc::kill(-group, libc::SIGKILL);
            }
        }
    }
}

async fn read_limited<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < limit {
                    let remaining = limit - out.len();
                    out.extend_from_slice(&chunk[..remaining.min(n)]);
                }
            }
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::process::Command;

    use super::{Toolchain, create_workspace, run_captured};

    /// True once `pid` no longer exists or is a zombie awaiting its reaper.
    pub(crate) async fn process_gone(pid: u32) -> bool {
        for _ in 0..40 {
            let gone = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Err(_) => true,
                Ok(stat) => stat
                    .rsplit_once(')')
                    .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
            };
            if gone {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn feeds_stdin_and_captures_stdout() {
        let out = run_captured(
            sh("cat"),
            Some(b"3\n3 2 4\n6".to_vec()),
            Duration::from_secs(5),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "3\n3 2 4\n6");
        assert_eq!(out.exit_code, 0);
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn kills_the_child_when_the_deadline_passes() {
        let out = run_captured(sh("sleep 5"), None, Duration::from_millis(100), 1024)
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(out.duration_ms < 3_000);
    }

    #[tokio::test]
    async fn timeout_also_kills_forked_children() {
        let out = run_captured(
            sh("sleep 30 & echo $!; wait"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .await
        .unwrap();
        assert!(out.timed_out);

        let forked: u32 = out.stdout.trim().parse().unwrap();
        assert!(process_gone(forked).await, "forked pid {forked} outlived the deadline");
    }

    #[tokio::test]
    async fn truncates_output_and_reports_exit_status() {
        let out = run_captured(
            sh("printf 'abcdefghij'; echo oops >&2; exit 3"),
            None,
            Duration::from_secs(5),
            4,
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "abcd");
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.combined_output(), "abcd\noops\n");
    }

    #[tokio::test]
    async fn workspace_is_removed_when_the_artifact_drops() {
        let toolchain = Toolchain::cpp();
        let artifact = create_workspace(&toolchain, "int main() {}").await.unwrap();
        let dir = artifact.dir().to_path_buf();
        assert!(toolchain.source_path(&dir).exists());

        drop(artifact);
        assert!(!dir.exists());
    }
}
