//! Managed clustered sandbox driver (staging/production).
//!
//! Each verification is submitted as one job to the sandbox cluster's HTTP
//! API; the cluster owns container isolation (deny-all egress, read-only
//! root, non-root user) and returns the uniform result shape when the job
//! finishes. The request blocks until completion or the cluster-side
//! deadline, so callers see the same interface as the local driver.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use agora_core::constants::SANDBOX_KILL_GRACE_SECS;
use agora_core::MarketError;

use crate::script::{SandboxResult, ScriptRunner, ScriptSpec};

#[derive(Serialize)]
struct RunRequest<'a> {
    runtime: &'a str,
    script: &'a str,
    timeout_seconds: u64,
    memory_limit_mb: u64,
    deliverable: &'a Value,
}

pub struct ClusterRunner {
    base_url: String,
    client: reqwest::Client,
}

impl ClusterRunner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }
}

#[async_trait]
impl ScriptRunner for ClusterRunner {
    async fn run(&self, spec: &ScriptSpec, deliverable: &Value) -> Result<SandboxResult, MarketError> {
        let url = format!("{}/v1/runs", self.base_url.trim_end_matches('/'));
        debug!(%url, runtime = %spec.runtime, "submitting sandbox job");

        let request = RunRequest {
            runtime: &spec.runtime,
            script: &spec.script_b64,
            timeout_seconds: spec.timeout_secs,
            memory_limit_mb: spec.memory_limit_mb,
            deliverable,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            // The cluster enforces the real deadline; this only bounds a
            // wedged connection.
            .timeout(Duration::from_secs(spec.timeout_secs + SANDBOX_KILL_GRACE_SECS + 30))
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("sandbox cluster: {e}")))?;

        if !response.status().is_success() {
            return Err(MarketError::Upstream(format!(
                "sandbox cluster returned {}",
                response.status()
            )));
        }

        response
            .json::<SandboxResult>()
            .await
            .map_err(|e| MarketError::Upstream(format!("sandbox cluster response: {e}")))
    }
}
