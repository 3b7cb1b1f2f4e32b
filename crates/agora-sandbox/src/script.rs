use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agora_core::config::SandboxConfig;
use agora_core::constants::{
    MAX_SANDBOX_MEMORY_MB, MAX_SANDBOX_TIMEOUT_SECS, MAX_SCRIPT_SIZE_BYTES,
    SANDBOX_OUTPUT_SURFACE_LEN,
};
use agora_core::MarketError;

/// Closed runtime allowlist: tag → (pinned image, interpreter argv prefix).
const ALLOWED_RUNTIMES: &[(&str, &str, &[&str])] = &[
    ("python:3.13", "python:3.13-slim", &["python"]),
    ("python:3.12", "python:3.12-slim", &["python"]),
    ("node:20", "node:20-slim", &["node"]),
    ("node:22", "node:22-slim", &["node"]),
    ("bash", "bash:5", &["bash"]),
    ("ruby:3.3", "ruby:3.3-slim", &["ruby"]),
];

pub fn runtime_image(runtime: &str) -> Option<(&'static str, &'static [&'static str])> {
    ALLOWED_RUNTIMES
        .iter()
        .find(|(tag, _, _)| *tag == runtime)
        .map(|(_, image, argv)| (*image, *argv))
}

/// A validated script-mode run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub script_b64: String,
    pub runtime: String,
    pub timeout_secs: u64,
    pub memory_limit_mb: u64,
}

impl ScriptSpec {
    /// Extract and validate a script spec from acceptance criteria. Every
    /// rejection here happens at proposal time; the worker never sees a
    /// malformed spec.
    pub fn from_criteria(criteria: &Value, cfg: &SandboxConfig) -> Result<Self, MarketError> {
        let script_b64 = criteria
            .get("script")
            .and_then(Value::as_str)
            .ok_or_else(|| MarketError::Validation("Acceptance criteria must include 'script'".into()))?
            .to_string();

        let runtime = criteria
            .get("runtime")
            .and_then(Value::as_str)
            .unwrap_or(&cfg.default_runtime)
            .to_string();
        if runtime_image(&runtime).is_none() {
            return Err(MarketError::Validation(format!("Unsupported runtime: {runtime}")));
        }

        let timeout_secs = match criteria.get("timeout_seconds") {
            Some(v) => v
                .as_u64()
                .ok_or_else(|| MarketError::Validation("timeout_seconds must be a positive integer".into()))?,
            None => cfg.default_timeout_secs,
        };
        if timeout_secs == 0 || timeout_secs > MAX_SANDBOX_TIMEOUT_SECS {
            return Err(MarketError::Validation(format!(
                "timeout_seconds must be between 1 and {MAX_SANDBOX_TIMEOUT_SECS}"
            )));
        }

        let memory_limit_mb = match criteria.get("memory_limit_mb") {
            Some(v) => v
                .as_u64()
                .ok_or_else(|| MarketError::Validation("memory_limit_mb must be a positive integer".into()))?,
            None => cfg.default_memory_limit_mb,
        };
        if memory_limit_mb == 0 || memory_limit_mb > MAX_SANDBOX_MEMORY_MB {
            return Err(MarketError::Validation(format!(
                "memory_limit_mb must be between 1 and {MAX_SANDBOX_MEMORY_MB}"
            )));
        }

        let script_bytes = base64::engine::general_purpose::STANDARD
            .decode(&script_b64)
            .map_err(|e| MarketError::Validation(format!("Script must be valid base64: {e}")))?;
        if script_bytes.len() > MAX_SCRIPT_SIZE_BYTES {
            return Err(MarketError::Validation(format!(
                "Script too large: {} bytes",
                script_bytes.len()
            )));
        }

        Ok(Self { script_b64, runtime, timeout_secs, memory_limit_mb })
    }

    pub fn script_bytes(&self) -> Result<Vec<u8>, MarketError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.script_b64)
            .map_err(|e| MarketError::Validation(format!("Script must be valid base64: {e}")))
    }
}

/// Uniform outcome of one sandbox run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub passed: bool,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub error: Option<String>,
    pub elapsed_seconds: f64,
}

impl SandboxResult {
    pub fn input_error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            error: Some(message.into()),
            elapsed_seconds: 0.0,
        }
    }

    /// Copy with stdout/stderr truncated to the API surface length.
    pub fn surfaced(&self) -> Self {
        let mut clone = self.clone();
        clone.stdout.truncate(SANDBOX_OUTPUT_SURFACE_LEN);
        clone.stderr.truncate(SANDBOX_OUTPUT_SURFACE_LEN);
        clone
    }
}

/// One backend capable of executing a verification script against a
/// deliverable in isolation. Drivers are interchangeable; the node resolves
/// one at startup from config and caches it.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, spec: &ScriptSpec, deliverable: &Value) -> Result<SandboxResult, MarketError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> SandboxConfig {
        SandboxConfig::default()
    }

    fn b64(script: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(script)
    }

    #[test]
    fn valid_spec_fills_defaults() {
        let criteria = json!({"script": b64("exit 0")});
        let spec = ScriptSpec::from_criteria(&criteria, &cfg()).unwrap();
        assert_eq!(spec.runtime, "python:3.13");
        assert_eq!(spec.timeout_secs, 60);
        assert_eq!(spec.memory_limit_mb, 256);
    }

    #[test]
    fn unknown_runtime_rejected() {
        let criteria = json!({"script": b64("x"), "runtime": "perl:5"});
        assert!(ScriptSpec::from_criteria(&criteria, &cfg()).is_err());
    }

    #[test]
    fn bounds_enforced() {
        let criteria = json!({"script": b64("x"), "timeout_seconds": 301});
        assert!(ScriptSpec::from_criteria(&criteria, &cfg()).is_err());
        let criteria = json!({"script": b64("x"), "memory_limit_mb": 513});
        assert!(ScriptSpec::from_criteria(&criteria, &cfg()).is_err());
        let criteria = json!({"script": b64("x"), "timeout_seconds": 0});
        assert!(ScriptSpec::from_criteria(&criteria, &cfg()).is_err());
    }

    #[test]
    fn bad_base64_rejected() {
        let criteria = json!({"script": "!!not-base64!!"});
        assert!(ScriptSpec::from_criteria(&criteria, &cfg()).is_err());
    }

    #[test]
    fn oversized_script_rejected() {
        let big = "a".repeat(MAX_SCRIPT_SIZE_BYTES + 4);
        let criteria = json!({"script": b64(&big)});
        assert!(ScriptSpec::from_criteria(&criteria, &cfg()).is_err());
    }

    #[test]
    fn surfaced_truncates_output() {
        let result = SandboxResult {
            passed: true,
            exit_code: 0,
            stdout: "x".repeat(10_000),
            stderr: String::new(),
            timed_out: false,
            error: None,
            elapsed_seconds: 1.0,
        };
        assert_eq!(result.surfaced().stdout.len(), SANDBOX_OUTPUT_SURFACE_LEN);
    }
}
