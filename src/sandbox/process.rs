use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    models::ExecutionLimits,
    sandbox::{Artifact, SandboxBackend, SandboxError, Toolchain, create_workspace, run_captured},
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// The forked child is pid 1 of a fresh namespace and dies with `unshare`, taking
// everything it started along with it.
const UNSHARE_ARGS: [&str; 5] = ["--net", "--pid", "--fork", "--kill-child", "--map-root-user"];

/// Compiles with the host `g++` and runs the binary directly. With `isolate` set, each
/// run gets its own network and pid namespaces plus address-space, process-count and
/// CPU-time caps. Without it the only confinement is the wall-clock deadline and the
/// process-group kill, which only suits trusted local setups.
pub struct ProcessSandbox {
    isolate: bool,
    toolchain: Toolchain,
}

impl ProcessSandbox {
    pub fn new(isolate: bool) -> Self {
        Self {
            isolate,
            toolchain: Toolchain::cpp(),
        }
    }

    /// Logs whether the host can provide what this backend needs.
    pub async fn prepare(&self) {
        if !self.isolate {
            tracing::warn!("process sandbox running without isolation");
            return;
        }
        let mut probe = Command::new("unshare");
        probe.args(UNSHARE_ARGS).arg("true");
        match run_captured(probe, None, PROBE_TIMEOUT, 4096).await {
            Ok(out) if out.exit_code == 0 => {}
            Ok(out) => tracing::error!(
                output = %out.combined_output().trim(),
                "unshare is not permitted here; runs will fail until SANDBOX_PROCESS_ISOLATE=false or the docker backend is used"
            ),
            Err(err) => tracing::error!(error = %err, "unshare is not installed"),
        }
    }

    fn run_command(&self, artifact: &Artifact, limits: &ExecutionLimits) -> Command {
        let binary = artifact.binary_path();
        let mut cmd = if self.isolate {
            let mut cmd = Command::new("unshare");
            cmd.args(UNSHARE_ARGS)
                .arg("prlimit")
                .arg(format!("--as={}", limits.memory_mb * 1024 * 1024))
                .arg(format!("--nproc={}", limits.max_processes))
                .arg(format!("--cpu={}", cpu_seconds(limits)))
                .arg("--")
                .arg(binary);
            cmd
        } else {
            Command::new(binary)
        };
        cmd.current_dir(artifact.dir())
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin");
        cmd
    }
}

/// CPU time a run may burn: the wall-clock budget across its allowed cores, rounded up.
fn cpu_seconds(limits: &ExecutionLimits) -> u64 {
    (limits.timeout_ms as f64 / 1000.0 * limits.cpu_cores as f64)
        .ceil()
        .max(1.0) as u64
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn build(
        &self,
        source: &str,
        limits: &ExecutionLimits,
    ) -> Result<Artifact, SandboxError> {
        let artifact = create_workspace(&self.toolchain, source).await?;

        let mut compile = Command::new(self.toolchain.compiler);
        compile
            .args(self.toolchain.compile_args())
            .current_dir(artifact.dir());
        let captured = run_captured(compile, None, limits.timeout(), limits.max_output_bytes)
            .await
            .map_err(|e| {
                SandboxError::Unavailable(format!(
                    "failed to launch {}: {e}",
                    self.toolchain.compiler
                ))
            })?;

        if captured.timed_out {
            return Err(SandboxError::BuildTimeout(limits.timeout()));
        }
        if captured.exit_code != 0 {
            return Err(SandboxError::BuildFailure(captured.combined_output()));
        }
        Ok(artifact)
    }

    async fn run(
        &self,
        artifact: &Artifact,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<String, SandboxError> {
        let captured = run_captured(
            self.run_command(artifact, limits),
            Some(input.as_bytes().to_vec()),
            limits.timeout(),
            limits.max_output_bytes,
        )
        .await
        .map_err(|e| SandboxError::Unavailable(format!("failed to launch submission: {e}")))?;

        if captured.timed_out {
            return Err(SandboxError::RunTimeout(limits.timeout()));
        }
        if captured.exit_code != 0 {
            return Err(SandboxError::RunCrash {
                exit_code: captured.exit_code,
                stderr: captured.stderr,
            });
        }
        Ok(captured.stdout)
    }
}
