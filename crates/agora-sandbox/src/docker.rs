//! Local container-runtime driver (development).
//!
//! Each run gets a throwaway directory holding the deliverable and the
//! decoded script, mounted read-only into a locked-down container:
//! no network, read-only root, tmpfs /tmp, uid 65534, all capabilities
//! dropped, memory capped, killed past the deadline plus a short grace.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use agora_core::constants::{MAX_SANDBOX_OUTPUT_CAPTURE, SANDBOX_KILL_GRACE_SECS};
use agora_core::MarketError;

use crate::script::{runtime_image, SandboxResult, ScriptRunner, ScriptSpec};

pub struct DockerRunner {
    binary: String,
}

impl DockerRunner {
    pub fn new() -> Self {
        Self { binary: "docker".to_string() }
    }

    /// The full argv for one run. Split out so the isolation flags are
    /// testable without a container runtime on the host.
    fn build_args(spec: &ScriptSpec, run_dir: &str) -> Result<Vec<String>, MarketError> {
        let (image, interpreter) = runtime_image(&spec.runtime)
            .ok_or_else(|| MarketError::Validation(format!("Unsupported runtime: {}", spec.runtime)))?;
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--network=none".into(),
            "--read-only".into(),
            "--tmpfs".into(),
            "/tmp:rw,size=64m".into(),
            format!("--memory={}m", spec.memory_limit_mb),
            format!("--memory-swap={}m", spec.memory_limit_mb),
            "--cpus=1".into(),
            "--user=65534:65534".into(),
            "--cap-drop=ALL".into(),
            "--security-opt=no-new-privileges".into(),
            "-v".into(),
            format!("{run_dir}/result.json:/input/result.json:ro"),
            "-v".into(),
            format!("{run_dir}/verify:/input/verify:ro"),
            image.into(),
        ];
        args.extend(interpreter.iter().map(|s| s.to_string()));
        args.push("/input/verify".into());
        Ok(args)
    }
}

impl Default for DockerRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptRunner for DockerRunner {
    async fn run(&self, spec: &ScriptSpec, deliverable: &Value) -> Result<SandboxResult, MarketError> {
        let script = spec.script_bytes()?;

        let dir = tempfile::tempdir()
            .map_err(|e| MarketError::Internal(format!("sandbox workspace: {e}")))?;
        let result_path = dir.path().join("result.json");
        let script_path = dir.path().join("verify");

        let deliverable_bytes = serde_json::to_vec(deliverable)
            .map_err(|e| MarketError::Serialization(e.to_string()))?;
        tokio::fs::write(&result_path, &deliverable_bytes)
            .await
            .map_err(|e| MarketError::Internal(format!("sandbox workspace: {e}")))?;
        tokio::fs::write(&script_path, &script)
            .await
            .map_err(|e| MarketError::Internal(format!("sandbox workspace: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o555))
                .await
                .map_err(|e| MarketError::Internal(format!("sandbox workspace: {e}")))?;
        }

        let run_dir = dir.path().to_string_lossy().to_string();
        let args = Self::build_args(spec, &run_dir)?;
        debug!(runtime = %spec.runtime, timeout = spec.timeout_secs, "starting sandbox container");

        let started = Instant::now();
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MarketError::Upstream(format!("container runtime unavailable: {e}")))?;

        let deadline = Duration::from_secs(spec.timeout_secs + SANDBOX_KILL_GRACE_SECS);
        match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let elapsed = started.elapsed().as_secs_f64();
                let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                stdout.truncate(MAX_SANDBOX_OUTPUT_CAPTURE);
                stderr.truncate(MAX_SANDBOX_OUTPUT_CAPTURE);
                let exit_code = output.status.code().unwrap_or(-1) as i64;
                Ok(SandboxResult {
                    passed: exit_code == 0,
                    exit_code,
                    stdout,
                    stderr,
                    timed_out: false,
                    error: None,
                    elapsed_seconds: elapsed,
                })
            }
            Ok(Err(e)) => Err(MarketError::Upstream(format!("container wait failed: {e}"))),
            Err(_) => {
                // Dropping the future killed the CLI process; the container
                // itself dies with --rm once its PID 1 loses the terminal.
                warn!(timeout = spec.timeout_secs, "sandbox run exceeded deadline, killed");
                Ok(SandboxResult {
                    passed: false,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                    error: Some(format!("timed out after {}s", spec.timeout_secs)),
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ScriptSpec {
        ScriptSpec {
            script_b64: "ZXhpdCAw".into(),
            runtime: "python:3.13".into(),
            timeout_secs: 30,
            memory_limit_mb: 128,
        }
    }

    #[test]
    fn args_enforce_isolation() {
        let args = DockerRunner::build_args(&spec(), "/run/x").unwrap();
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.contains(&"--user=65534:65534".to_string()));
        assert!(args.contains(&"--cap-drop=ALL".to_string()));
        assert!(args.contains(&"--memory=128m".to_string()));
        assert!(args.contains(&"/run/x/result.json:/input/result.json:ro".to_string()));
        assert!(args.contains(&"/run/x/verify:/input/verify:ro".to_string()));
    }

    #[test]
    fn args_end_with_interpreter_and_script() {
        let args = DockerRunner::build_args(&spec(), "/run/x").unwrap();
        let tail: Vec<&str> = args.iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, vec!["/input/verify", "python", "python:3.13-slim"]);
    }

    #[test]
    fn bash_runtime_uses_bash() {
        let mut s = spec();
        s.runtime = "bash".into();
        let args = DockerRunner::build_args(&s, "/run/x").unwrap();
        assert!(args.contains(&"bash:5".to_string()));
        assert!(args.contains(&"bash".to_string()));
    }
}
