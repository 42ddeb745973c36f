use std::{path::Path, time::Duration};

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::{
    config::SandboxConfig,
    models::ExecutionLimits,
    sandbox::{
        Artifact, Captured, SandboxBackend, SandboxError, Toolchain, create_workspace,
        run_captured,
    },
};

// `docker run` exits with 125 when the daemon itself fails, 126/127 when the command
// inside the container cannot be invoked.
const DAEMON_FAILURE: i32 = 125;
const COMMAND_NOT_RUNNABLE: i32 = 126;
const COMMAND_NOT_FOUND: i32 = 127;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_TIMEOUT: Duration = Duration::from_secs(600);
const REMOVE_TIMEOUT: Duration = Duration::from_secs(10);
const WORKDIR: &str = "/code";

/// Builds and runs submissions in throwaway containers: no network, capped memory,
/// CPU and pids, every capability dropped, and the artifact mounted read-only for runs.
/// Containers run as the server's own uid:gid unless another user is configured, since
/// the workspace is private to its owner and no capability can override that.
pub struct DockerSandbox {
    docker_bin: String,
    image: String,
    user: String,
    toolchain: Toolchain,
}

impl DockerSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            docker_bin: config.docker_bin.clone(),
            image: config.image.clone(),
            user: config.docker_user.clone().unwrap_or_else(server_user),
            toolchain: Toolchain::cpp(),
        }
    }

    /// Checks that the daemon answers and that the toolchain image is present, pulling
    /// it when it is not.
    pub async fn prepare(&self) -> anyhow::Result<()> {
        let version = run_captured(
            self.command(["version", "--format", "{{.Server.Version}}"]),
            None,
            PROBE_TIMEOUT,
            4096,
        )
        .await
        .with_context(|| format!("failed to launch {}", self.docker_bin))?;
        if version.timed_out || version.exit_code != 0 {
            bail!("docker daemon unreachable: {}", version.combined_output().trim());
        }
        tracing::info!(server_version = %version.stdout.trim(), "docker daemon reachable");

        let inspect = run_captured(
            self.command(["image", "inspect", self.image.as_str()]),
            None,
            PROBE_TIMEOUT,
            4096,
        )
        .await?;
        if inspect.exit_code == 0 {
            return Ok(());
        }

        tracing::info!(image = %self.image, "pulling toolchain image");
        let pull = run_captured(
            self.command(["pull", self.image.as_str()]),
            None,
            PULL_TIMEOUT,
            64 * 1024,
        )
        .await?;
        if pull.timed_out || pull.exit_code != 0 {
            bail!("failed to pull {}: {}", self.image, pull.combined_output().trim());
        }
        tracing::info!(image = %self.image, duration_ms = pull.duration_ms, "toolchain image pulled");
        Ok(())
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(args);
        cmd
    }

    fn confinement_args(&self, name: &str, limits: &ExecutionLimits) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network=none".to_string(),
            format!("--memory={}m", limits.memory_mb),
            format!("--memory-swap={}m", limits.memory_mb),
            format!("--cpus={}", limits.cpu_cores),
            format!("--pids-limit={}", limits.max_processes),
            "--cap-drop=ALL".to_string(),
            "--security-opt=no-new-privileges".to_string(),
            format!("--user={}", self.user),
        ];
        args
    }

    fn build_args(&self, name: &str, dir: &Path, limits: &ExecutionLimits) -> Vec<String> {
        let mut args = self.confinement_args(name, limits);
        args.extend([
            "-v".to_string(),
            format!("{}:{WORKDIR}", dir.display()),
            "-w".to_string(),
            WORKDIR.to_string(),
            self.image.clone(),
            self.toolchain.compiler.to_string(),
        ]);
        args.extend(self.toolchain.compile_args());
        args
    }

    fn run_args(&self, name: &str, dir: &Path, limits: &ExecutionLimits) -> Vec<String> {
        let mut args = self.confinement_args(name, limits);
        args.extend([
            "-i".to_string(),
            "--read-only".to_string(),
            "-v".to_string(),
            format!("{}:{WORKDIR}:ro", dir.display()),
            "-w".to_string(),
            WORKDIR.to_string(),
            self.image.clone(),
            format!("./{}", self.toolchain.binary_name),
        ]);
        args
    }

    async fn remove_container(&self, name: &str) {
        match run_captured(self.command(["rm", "-f", name]), None, REMOVE_TIMEOUT, 4096).await {
            Ok(out) if out.exit_code == 0 => {}
            Ok(out) => {
                tracing::debug!(container = %name, output = %out.combined_output().trim(), "container already gone")
            }
            Err(err) => tracing::warn!(container = %name, error = %err, "failed to remove container"),
        }
    }

    /// Runs one container invocation. A container that may still exist afterwards,
    /// because the client timed out or could not be waited on, is force-removed.
    async fn execute(
        &self,
        name: &str,
        args: Vec<String>,
        stdin: Option<Vec<u8>>,
        limits: &ExecutionLimits,
    ) -> Result<Captured, SandboxError> {
        match run_captured(
            self.command(args),
            stdin,
            limits.timeout(),
            limits.max_output_bytes,
        )
        .await
        {
            Ok(captured) => {
                if captured.timed_out {
                    self.remove_container(name).await;
                }
                Ok(captured)
            }
            Err(err) => {
                self.remove_container(name).await;
                Err(SandboxError::Unavailable(format!(
                    "failed to run {}: {err}",
                    self.docker_bin
                )))
            }
        }
    }

    /// The compiler could not touch the mounted workspace, which is a host setup problem
    /// rather than a defect in the submitted code.
    fn workspace_denied(&self, output: &str) -> bool {
        output.lines().any(|line| {
            line.contains("Permission denied")
                && (line.contains(self.toolchain.source_name)
                    || line.contains(self.toolchain.binary_name))
        })
    }
}

fn server_user() -> String {
    // SAFETY: getuid(2) and getgid(2) cannot fail and take no arguments.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    format!("{uid}:{gid}")
}

#[async_trait]
impl SandboxBackend for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn build(
        &self,
        source: &str,
        limits: &ExecutionLimits,
    ) -> Result<Artifact, SandboxError> {
        let artifact = create_workspace(&self.toolchain, source).await?;
        let name = format!("arena-build-{}", Uuid::new_v4().simple());

        let captured = self
            .execute(&name, self.build_args(&name, artifact.dir(), limits), None, limits)
            .await?;

        if captured.timed_out {
            return Err(SandboxError::BuildTimeout(limits.timeout()));
        }
        match captured.exit_code {
            0 => {}
            DAEMON_FAILURE | COMMAND_NOT_RUNNABLE | COMMAND_NOT_FOUND => {
                return Err(SandboxError::Unavailable(captured.stderr.trim().to_string()));
            }
            _ if self.workspace_denied(&captured.combined_output()) => {
                return Err(SandboxError::Unavailable(format!(
                    "build container cannot access the workspace as {}: {}",
                    self.user,
                    captured.combined_output().trim()
                )));
            }
            _ => return Err(SandboxError::BuildFailure(captured.combined_output())),
        }
        if !artifact.binary_path().exists() {
            return Err(SandboxError::BuildFailure(
                "compiler produced no binary".to_string(),
            ));
        }

        tracing::debug!(container = %name, duration_ms = captured.duration_ms, "build finished");
        Ok(artifact)
    }

    async fn run(
        &self,
        artifact: &Artifact,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<String, SandboxError> {
        let name = format!("arena-run-{}", Uuid::new_v4().simple());

        let captured = self
            .execute(
                &name,
                self.run_args(&name, artifact.dir(), limits),
                Some(input.as_bytes().to_vec()),
                limits,
            )
            .await?;

        if captured.timed_out {
            return Err(SandboxError::RunTimeout(limits.timeout()));
        }
        match captured.exit_code {
            0 => Ok(captured.stdout),
            DAEMON_FAILURE => Err(SandboxError::Unavailable(captured.stderr.trim().to_string())),
            exit_code => Err(SandboxError::RunCrash {
                exit_code,
                stderr: captured.stderr,
            }),
        }
    }
}
