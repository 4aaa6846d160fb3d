//! Service layer — composes `TenantStore` with the Fleet Manager

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::broker::tenant::{RegisterRequest, Tenant, TenantStore, UserAgent, UserAgentMode, UserAgentStatus};
use crate::error::{FleetError, Result};
use crate::fleet::manager::FleetManager;
use crate::fleet::sandbox_client::SandboxConfig;

/// Inputs to `Service::spawn_agent`.
#[derive(Debug, Clone, Default)]
pub struct SpawnAgentRequest {
    pub agent_id: Option<String>,
    pub agent_type: Option<String>,
    pub template_id: Option<String>,
    pub genome: Option<String>,
    pub mode: Option<UserAgentMode>,
    pub count: Option<usize>,
    pub env_vars: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub timeout_sec: Option<u64>,
}

/// Point-in-time usage snapshot returned by `GetUsage`.
#[derive(Debug, Clone)]
pub struct UsageSnapshot {
    pub user_id: String,
    pub agent_count: usize,
    pub max_agents: usize,
    pub total_sandboxes: u64,
    pub total_uptime_sec: u64,
    pub total_cost_usd: f64,
    pub credit_limit_usd: f64,
}

/// Composes tenant quota/identity checks with Fleet Manager spawn/kill,
/// enforcing the sole cross-tenant isolation primitive: `KillAgent` only
/// succeeds for sandboxes the caller's tenant owns.
pub struct Service {
    tenants: Arc<TenantStore>,
    fleet: Arc<FleetManager>,
    default_template: String,
}

impl Service {
    pub fn new(tenants: Arc<TenantStore>, fleet: Arc<FleetManager>, default_template: impl Into<String>) -> Self {
        Self {
            tenants,
            fleet,
            default_template: default_template.into(),
        }
    }

    pub fn register(&self, req: RegisterRequest) -> Result<Tenant> {
        self.tenants.register(req)
    }

    pub fn authenticate_api_key(&self, key: &str) -> Result<Tenant> {
        self.tenants.get_user_by_api_key(key)
    }

    /// Spawns one agent, or a burst of agents, for `user_id`.
    pub async fn spawn_agent(&self, user_id: &str, req: SpawnAgentRequest) -> Result<UserAgent> {
        let tenant = self.tenants.get_user(user_id)?;
        if self.tenants.is_user_over_limit(user_id) {
            return Err(FleetError::AgentLimitReached {
                current: self.tenants.user_agent_count(user_id),
                max: tenant.max_agents,
            });
        }
        if self.tenants.is_user_over_budget(user_id) {
            return Err(FleetError::BudgetExhausted {
                estimated: tenant.total_cost_usd,
                budget: tenant.credit_limit_usd,
            });
        }

        let mode = req.mode.unwrap_or(UserAgentMode::OnDemand);
        let count = req.count.unwrap_or(1).max(1);

        if mode == UserAgentMode::Burst && count > 1 {
            return self.spawn_burst(&tenant, &req).await;
        }

        self.spawn_one(&tenant, &req, mode).await
    }

    async fn spawn_one(&self, tenant: &Tenant, req: &SpawnAgentRequest, mode: UserAgentMode) -> Result<UserAgent> {
        let cfg = self.build_sandbox_config(tenant, req);
        let sandbox = self.fleet.spawn(cfg).await?;
        self.tenants.increment_sandbox_count(&tenant.id)?;

        let ua = UserAgent {
            sandbox_id: sandbox.sandbox_id.clone(),
            user_id: tenant.id.clone(),
            agent_type: req.agent_type.clone().unwrap_or_else(|| "trader".to_string()),
            status: UserAgentStatus::Active,
            mode,
            created_at: chrono::Utc::now(),
        };
        self.tenants.track_agent(ua.clone())?;
        Ok(ua)
    }

    /// Spawns `min(count, maxAgents - currentCount)` agents in parallel and
    /// returns the first successful `UserAgent`; fails only when every
    /// attempt in the burst fails.
    async fn spawn_burst(&self, tenant: &Tenant, req: &SpawnAgentRequest) -> Result<UserAgent> {
        let current = self.tenants.user_agent_count(&tenant.id);
        let room = tenant.max_agents.saturating_sub(current);
        let requested = req.count.unwrap_or(1).max(1);
        let to_spawn = requested.min(room).max(1);

        let futures = (0..to_spawn).map(|_| {
            let mut single_req = req.clone();
            single_req.count = Some(1);
            self.spawn_one(tenant, &single_req, UserAgentMode::Burst)
        });
        let results = join_all(futures).await;

        let mut first_ok = None;
        for result in results {
            match result {
                Ok(ua) if first_ok.is_none() => first_ok = Some(ua),
                Ok(_) => {}
                Err(_) => {}
            }
        }
        first_ok.ok_or_else(|| FleetError::Validation("burst spawn failed: all attempts errored".to_string()))
    }

    fn build_sandbox_config(&self, tenant: &Tenant, req: &SpawnAgentRequest) -> SandboxConfig {
        let agent_id = req
            .agent_id
            .clone()
            .unwrap_or_else(|| format!("agent-{}", Uuid::new_v4()));
        let template_id = req
            .template_id
            .clone()
            .unwrap_or_else(|| self.default_template.clone());

        let mut env_vars = req.env_vars.clone();
        if let Some(ref creds) = tenant.trading_credentials {
            for (key, value) in creds {
                env_vars.entry(format!("TENANT_{key}")).or_insert_with(|| value.clone());
            }
        }

        let genome = req.genome.clone().or_else(|| tenant.default_genome.clone());

        let mut cfg = SandboxConfig::new(template_id, agent_id);
        cfg.agent_type = req.agent_type.clone().unwrap_or_else(|| "trader".to_string());
        cfg.env_vars = env_vars;
        cfg.metadata = req.metadata.clone();
        cfg.genome = genome;
        cfg.user_id = Some(tenant.id.clone());
        if let Some(timeout) = req.timeout_sec {
            cfg.timeout_sec = timeout;
        }
        cfg
    }

    /// Refuses unless `sandbox_id` is among `user_id`'s tracked agents —
    /// the sole cross-tenant isolation primitive.
    pub async fn kill_agent(&self, user_id: &str, sandbox_id: &str) -> Result<()> {
        let owned = self.tenants.get_user_agents(user_id);
        if !owned.iter().any(|ua| ua.sandbox_id == sandbox_id) {
            return Err(FleetError::Authorization(format!(
                "sandbox {sandbox_id} is not owned by user {user_id}"
            )));
        }
        self.fleet.kill(sandbox_id).await?;
        self.tenants.remove_agent(sandbox_id)?;
        Ok(())
    }

    pub fn list_agents(&self, user_id: &str) -> Vec<UserAgent> {
        self.tenants.get_user_agents(user_id)
    }

    pub fn get_usage(&self, user_id: &str) -> Result<UsageSnapshot> {
        let tenant = self.tenants.get_user(user_id)?;
        Ok(UsageSnapshot {
            user_id: tenant.id.clone(),
            agent_count: self.tenants.user_agent_count(user_id),
            max_agents: tenant.max_agents,
            total_sandboxes: tenant.total_sandboxes,
            total_uptime_sec: tenant.total_uptime_sec,
            total_cost_usd: tenant.total_cost_usd,
            credit_limit_usd: tenant.credit_limit_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;

    fn make_service() -> Service {
        let tenants = Arc::new(TenantStore::new());
        let fleet = Arc::new(FleetManager::new("http://localhost:1", FleetConfig::default()));
        Service::new(tenants, fleet, "evoclaw-base")
    }

    #[test]
    fn build_sandbox_config_prefixes_tenant_credentials() {
        let service = make_service();
        let mut creds = HashMap::new();
        creds.insert("API_TOKEN".to_string(), "secret".to_string());
        let tenant = Tenant {
            id: "user-1".to_string(),
            email: "a@example.com".to_string(),
            api_key: "evo_x".to_string(),
            created_at: chrono::Utc::now(),
            max_agents: 3,
            credit_limit_usd: 10.0,
            trading_credentials: Some(creds),
            default_genome: Some("genome-json".to_string()),
            total_sandboxes: 0,
            total_uptime_sec: 0,
            total_cost_usd: 0.0,
        };
        let req = SpawnAgentRequest::default();
        let cfg = service.build_sandbox_config(&tenant, &req);
        assert_eq!(cfg.env_vars.get("TENANT_API_TOKEN").unwrap(), "secret");
        assert_eq!(cfg.genome.as_deref(), Some("genome-json"));
        assert_eq!(cfg.user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn kill_agent_rejects_sandbox_not_owned_by_caller() {
        let service = make_service();
        let err = service.kill_agent("user-1", "sbx-1").await.unwrap_err();
        assert!(matches!(err, FleetError::Authorization(_)));
    }
}
