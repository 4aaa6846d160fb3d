//! Sandbox Client — REST transport to the remote sandbox provider
//!
//! Translates typed operations into the provider's HTTP surface and keeps a
//! fast local index of sandboxes believed to be running. No retries happen
//! at this layer — the Fleet Manager decides retry policy.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::error::{FleetError, Result};

/// Lifecycle state of a sandbox as last observed from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Running,
    Paused,
    Unknown,
}

/// A sandbox tracked between `Spawn` and `Kill`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub sandbox_id: String,
    pub template: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub state: SandboxState,
    pub metadata: HashMap<String, String>,
}

/// Status snapshot returned by `GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub sandbox_id: String,
    pub agent_id: String,
    pub state: SandboxState,
    pub healthy: bool,
    pub uptime_sec: i64,
    pub ends_at: DateTime<Utc>,
}

/// Result of `SendCommand`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Inputs to `Spawn`. Transient — never persisted.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub template_id: String,
    pub agent_id: String,
    pub agent_type: String,
    pub env_vars: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub genome: Option<String>,
    pub user_id: Option<String>,
    pub timeout_sec: u64,
    pub broker_url: Option<String>,
    pub orchestrator_url: Option<String>,
}

impl SandboxConfig {
    pub fn new(template_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            agent_id: agent_id.into(),
            agent_type: "trader".to_string(),
            env_vars: HashMap::new(),
            metadata: HashMap::new(),
            genome: None,
            user_id: None,
            timeout_sec: 3600,
            broker_url: None,
            orchestrator_url: None,
        }
    }

    /// Merges caller-supplied env vars/metadata with the canonical injected
    /// set, mirroring agent/user identity so a later `ListAgents` can
    /// reconstruct ownership without local state.
    fn build_request(&self) -> SpawnRequest {
        let mut env_vars = self.env_vars.clone();
        env_vars
            .entry("EVOCLAW_AGENT_ID".to_string())
            .or_insert_with(|| self.agent_id.clone());
        env_vars
            .entry("EVOCLAW_AGENT_TYPE".to_string())
            .or_insert_with(|| self.agent_type.clone());
        if let Some(ref url) = self.broker_url {
            env_vars
                .entry("EVOCLAW_BROKER_URL".to_string())
                .or_insert_with(|| url.clone());
        }
        if let Some(ref url) = self.orchestrator_url {
            env_vars
                .entry("EVOCLAW_ORCHESTRATOR_URL".to_string())
                .or_insert_with(|| url.clone());
        }
        if let Some(ref genome) = self.genome {
            env_vars
                .entry("EVOCLAW_GENOME".to_string())
                .or_insert_with(|| genome.clone());
        }

        let mut metadata = self.metadata.clone();
        metadata
            .entry("agent_id".to_string())
            .or_insert_with(|| self.agent_id.clone());
        if let Some(ref user_id) = self.user_id {
            metadata
                .entry("user_id".to_string())
                .or_insert_with(|| user_id.clone());
        }

        SpawnRequest {
            template_id: self.template_id.clone(),
            timeout: Some(self.timeout_sec),
            metadata: Some(metadata),
            env_vars: Some(env_vars),
        }
    }
}

#[derive(Debug, Serialize)]
struct SpawnRequest {
    #[serde(rename = "templateID")]
    template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<HashMap<String, String>>,
    #[serde(rename = "envVars", skip_serializing_if = "Option::is_none")]
    env_vars: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ProviderSandbox {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "templateID")]
    template_id: String,
    #[serde(rename = "clientID", default)]
    #[allow(dead_code)]
    client_id: Option<String>,
    #[serde(rename = "startedAt")]
    started_at: DateTime<Utc>,
    #[serde(rename = "endAt")]
    end_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

impl ProviderSandbox {
    fn into_sandbox(self) -> Sandbox {
        let metadata = self.metadata.unwrap_or_default();
        let agent_id = metadata.get("agent_id").cloned().unwrap_or_default();
        let user_id = metadata.get("user_id").cloned();
        Sandbox {
            sandbox_id: self.sandbox_id,
            template: self.template_id,
            agent_id,
            user_id,
            started_at: self.started_at,
            ends_at: self.end_at,
            state: SandboxState::Unknown,
            metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProviderStatus {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "agentID", default)]
    agent_id: Option<String>,
    #[serde(default)]
    healthy: bool,
    #[serde(rename = "uptimeSec", default)]
    uptime_sec: i64,
    #[serde(rename = "endsAt")]
    ends_at: DateTime<Utc>,
    #[serde(default)]
    state: Option<SandboxState>,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(rename = "exitCode")]
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// REST client maintaining a local index of believed-running sandboxes.
pub struct SandboxClient {
    http: Client,
    base_url: String,
    api_key: String,
    index: Arc<RwLock<HashMap<String, Sandbox>>>,
}

impl SandboxClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Parses a non-2xx response into a `FleetError::Provider` or, if the
    /// body isn't the expected `{code, message}` shape, a `FleetError::Transport`
    /// wrapping the raw status and body.
    async fn parse_error(status: StatusCode, resp: reqwest::Response) -> FleetError {
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ProviderError>(&body) {
            Ok(e) => FleetError::Provider {
                code: e.code,
                message: e.message,
            },
            Err(_) => FleetError::Transport {
                status: status.as_u16(),
                body,
            },
        }
    }

    fn check_cancel(cancel: &watch::Receiver<bool>) -> Result<()> {
        if *cancel.borrow() {
            return Err(FleetError::Cancelled);
        }
        Ok(())
    }

    /// POST /sandboxes
    pub async fn spawn(
        &self,
        cfg: &SandboxConfig,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Sandbox> {
        Self::check_cancel(cancel)?;
        if cfg.template_id.is_empty() || cfg.agent_id.is_empty() {
            return Err(FleetError::Validation(
                "templateID and agentID are required to spawn a sandbox".to_string(),
            ));
        }

        let body = cfg.build_request();
        let resp = self
            .http
            .post(self.url("/sandboxes"))
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let provider_sandbox: ProviderSandbox = resp
            .json()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;
        let mut sandbox = provider_sandbox.into_sandbox();
        sandbox.state = SandboxState::Running;
        sandbox.agent_id = cfg.agent_id.clone();
        if sandbox.user_id.is_none() {
            sandbox.user_id = cfg.user_id.clone();
        }

        self.index
            .write()
            .await
            .insert(sandbox.sandbox_id.clone(), sandbox.clone());

        debug!(sandbox_id = %sandbox.sandbox_id, agent_id = %sandbox.agent_id, "spawned sandbox");
        Ok(sandbox)
    }

    /// DELETE /sandboxes/{id}
    pub async fn kill(&self, sandbox_id: &str, cancel: &watch::Receiver<bool>) -> Result<()> {
        Self::check_cancel(cancel)?;
        let resp = self
            .http
            .delete(self.url(&format!("/sandboxes/{sandbox_id}")))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            return Err(Self::parse_error(status, resp).await);
        }

        self.index.write().await.remove(sandbox_id);
        Ok(())
    }

    /// GET /sandboxes — refreshes the local index with every returned sandbox.
    pub async fn list_agents(&self, cancel: &watch::Receiver<bool>) -> Result<Vec<Sandbox>> {
        Self::check_cancel(cancel)?;
        let resp = self
            .http
            .get(self.url("/sandboxes"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let provider_sandboxes: Vec<ProviderSandbox> = resp
            .json()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        let mut sandboxes: Vec<Sandbox> = Vec::with_capacity(provider_sandboxes.len());
        let mut index = self.index.write().await;
        index.clear();
        for provider_sandbox in provider_sandboxes {
            let mut sandbox = provider_sandbox.into_sandbox();
            sandbox.state = SandboxState::Running;
            index.insert(sandbox.sandbox_id.clone(), sandbox.clone());
            sandboxes.push(sandbox);
        }
        Ok(sandboxes)
    }

    /// GET /sandboxes/{id}
    pub async fn get_status(
        &self,
        sandbox_id: &str,
        cancel: &watch::Receiver<bool>,
    ) -> Result<SandboxStatus> {
        Self::check_cancel(cancel)?;
        let resp = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}")))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let provider_status: ProviderStatus = resp
            .json()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        Ok(SandboxStatus {
            sandbox_id: provider_status.sandbox_id,
            agent_id: provider_status.agent_id.unwrap_or_default(),
            state: provider_status.state.unwrap_or(SandboxState::Unknown),
            healthy: provider_status.healthy,
            uptime_sec: provider_status.uptime_sec,
            ends_at: provider_status.ends_at,
        })
    }

    /// POST /sandboxes/{id}/process
    pub async fn send_command(
        &self,
        sandbox_id: &str,
        cmd: &str,
        args: &[String],
        cancel: &watch::Receiver<bool>,
    ) -> Result<CommandResult> {
        Self::check_cancel(cancel)?;
        let body = serde_json::json!({ "cmd": cmd, "args": args });
        let resp = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/process")))
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let result: ProcessResponse = resp
            .json()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;
        Ok(CommandResult {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    /// POST /sandboxes/{id}/timeout
    pub async fn set_timeout(
        &self,
        sandbox_id: &str,
        timeout_sec: u64,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        Self::check_cancel(cancel)?;
        let body = serde_json::json!({ "timeout": timeout_sec });
        let resp = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/timeout")))
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            return Err(Self::parse_error(status, resp).await);
        }
        Ok(())
    }

    /// Snapshot read of the local index — never blocks writers for long.
    pub async fn local_sandbox(&self, sandbox_id: &str) -> Option<Sandbox> {
        self.index.read().await.get(sandbox_id).cloned()
    }

    pub async fn local_sandbox_count(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn local_sandboxes(&self) -> Vec<Sandbox> {
        self.index.read().await.values().cloned().collect()
    }

    pub async fn remove_local(&self, sandbox_id: &str) {
        self.index.write().await.remove(sandbox_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_request_merges_canonical_env_vars() {
        let mut cfg = SandboxConfig::new("tmpl-1", "agent-1");
        cfg.env_vars.insert("CUSTOM".to_string(), "1".to_string());
        cfg.user_id = Some("user-1".to_string());

        let req = cfg.build_request();
        let env = req.env_vars.unwrap();
        assert_eq!(env.get("EVOCLAW_AGENT_ID").unwrap(), "agent-1");
        assert_eq!(env.get("EVOCLAW_AGENT_TYPE").unwrap(), "trader");
        assert_eq!(env.get("CUSTOM").unwrap(), "1");

        let metadata = req.metadata.unwrap();
        assert_eq!(metadata.get("agent_id").unwrap(), "agent-1");
        assert_eq!(metadata.get("user_id").unwrap(), "user-1");
    }

    #[test]
    fn caller_supplied_env_vars_are_not_overwritten() {
        let mut cfg = SandboxConfig::new("tmpl-1", "agent-1");
        cfg.env_vars
            .insert("EVOCLAW_AGENT_ID".to_string(), "caller-override".to_string());

        let req = cfg.build_request();
        let env = req.env_vars.unwrap();
        assert_eq!(env.get("EVOCLAW_AGENT_ID").unwrap(), "caller-override");
    }
}
