//! Tenant identity, quotas, and agent ownership
//!
//! A single lock guarding a `HashMap`, synchronous methods, and id
//! generation via a string prefix plus random hex digits.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FleetError, Result};

/// Fills `out` with cryptographically random bytes, falling back to a
/// timestamp-derived sequence if the OS RNG cannot be reached.
fn fill_random(out: &mut [u8]) {
    let mut rng = rand::rngs::OsRng;
    if rng.try_fill_bytes(out).is_err() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut seed = nanos as u64 ^ 0x9E3779B97F4A7C15;
        for byte in out.iter_mut() {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            *byte = (seed & 0xFF) as u8;
        }
    }
}

fn random_hex(len_bytes: usize) -> String {
    let mut buf = vec![0u8; len_bytes];
    fill_random(&mut buf);
    hex::encode(buf)
}

/// Request body for `TenantStore::register`.
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub email: String,
    pub max_agents: Option<usize>,
    pub credit_limit_usd: Option<f64>,
    pub trading_credentials: Option<HashMap<String, String>>,
    pub default_genome: Option<String>,
}

/// A registered tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub email: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub max_agents: usize,
    pub credit_limit_usd: f64,
    pub trading_credentials: Option<HashMap<String, String>>,
    pub default_genome: Option<String>,
    pub total_sandboxes: u64,
    pub total_uptime_sec: u64,
    pub total_cost_usd: f64,
}

/// Lifecycle status of a `UserAgent` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAgentStatus {
    Active,
    Stopped,
}

/// Spawn mode requested for a `UserAgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAgentMode {
    OnDemand,
    Scheduled,
    Burst,
}

impl Default for UserAgentMode {
    fn default() -> Self {
        UserAgentMode::OnDemand
    }
}

/// Join entity binding a sandbox to its owning tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgent {
    pub sandbox_id: String,
    pub user_id: String,
    pub agent_type: String,
    pub status: UserAgentStatus,
    pub mode: UserAgentMode,
    pub created_at: DateTime<Utc>,
}

struct Inner {
    by_id: HashMap<String, Tenant>,
    by_api_key: HashMap<String, String>,
    by_email: HashMap<String, String>,
    agents: HashMap<String, UserAgent>,
}

/// Concurrency-safe tenant registry. All operations take a single
/// reader-writer lock; reads never block other reads.
pub struct TenantStore {
    inner: RwLock<Inner>,
}

impl TenantStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                by_api_key: HashMap::new(),
                by_email: HashMap::new(),
                agents: HashMap::new(),
            }),
        }
    }

    pub fn register(&self, req: RegisterRequest) -> Result<Tenant> {
        if req.email.trim().is_empty() {
            return Err(FleetError::Validation("email must not be empty".to_string()));
        }

        let mut inner = self.inner.write().expect("tenant store lock poisoned");
        if inner.by_email.contains_key(&req.email) {
            return Err(FleetError::Validation(format!(
                "email {} is already registered",
                req.email
            )));
        }

        let id = format!("user-{}", random_hex(8));
        let api_key = format!("evo_{}", random_hex(24));

        let tenant = Tenant {
            id: id.clone(),
            email: req.email.clone(),
            api_key: api_key.clone(),
            created_at: Utc::now(),
            max_agents: req.max_agents.unwrap_or(3),
            credit_limit_usd: req.credit_limit_usd.unwrap_or(10.0),
            trading_credentials: req.trading_credentials,
            default_genome: req.default_genome,
            total_sandboxes: 0,
            total_uptime_sec: 0,
            total_cost_usd: 0.0,
        };

        inner.by_id.insert(id.clone(), tenant.clone());
        inner.by_api_key.insert(api_key, id.clone());
        inner.by_email.insert(req.email, id);
        Ok(tenant)
    }

    pub fn get_user(&self, id: &str) -> Result<Tenant> {
        let inner = self.inner.read().expect("tenant store lock poisoned");
        inner
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::Validation(format!("unknown user {id}")))
    }

    pub fn get_user_by_api_key(&self, key: &str) -> Result<Tenant> {
        let inner = self.inner.read().expect("tenant store lock poisoned");
        let id = inner
            .by_api_key
            .get(key)
            .ok_or_else(|| FleetError::Authorization("invalid API key".to_string()))?;
        inner
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::Authorization("invalid API key".to_string()))
    }

    pub fn track_agent(&self, ua: UserAgent) -> Result<()> {
        let mut inner = self.inner.write().expect("tenant store lock poisoned");
        if !inner.by_id.contains_key(&ua.user_id) {
            return Err(FleetError::Validation(format!("unknown user {}", ua.user_id)));
        }
        inner.agents.insert(ua.sandbox_id.clone(), ua);
        Ok(())
    }

    /// Removes the local ownership mapping only. A lookup miss never
    /// triggers a remote sandbox delete here.
    pub fn remove_agent(&self, sandbox_id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("tenant store lock poisoned");
        inner.agents.remove(sandbox_id);
        Ok(())
    }

    pub fn get_user_agents(&self, user_id: &str) -> Vec<UserAgent> {
        let inner = self.inner.read().expect("tenant store lock poisoned");
        inner
            .agents
            .values()
            .filter(|ua| ua.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn user_agent_count(&self, user_id: &str) -> usize {
        let inner = self.inner.read().expect("tenant store lock poisoned");
        inner.agents.values().filter(|ua| ua.user_id == user_id).count()
    }

    /// Fail-closed: an unknown user is always reported over limit.
    pub fn is_user_over_limit(&self, user_id: &str) -> bool {
        let inner = self.inner.read().expect("tenant store lock poisoned");
        let Some(tenant) = inner.by_id.get(user_id) else {
            return true;
        };
        let count = inner.agents.values().filter(|ua| ua.user_id == user_id).count();
        count >= tenant.max_agents
    }

    /// Fail-closed: an unknown user is always reported over budget.
    pub fn is_user_over_budget(&self, user_id: &str) -> bool {
        let inner = self.inner.read().expect("tenant store lock poisoned");
        match inner.by_id.get(user_id) {
            Some(tenant) => tenant.total_cost_usd >= tenant.credit_limit_usd,
            None => true,
        }
    }

    pub fn update_user_cost(&self, user_id: &str, delta_cost: f64, delta_uptime_sec: u64) -> Result<()> {
        let mut inner = self.inner.write().expect("tenant store lock poisoned");
        let tenant = inner
            .by_id
            .get_mut(user_id)
            .ok_or_else(|| FleetError::Validation(format!("unknown user {user_id}")))?;
        tenant.total_cost_usd += delta_cost;
        tenant.total_uptime_sec += delta_uptime_sec;
        Ok(())
    }

    pub fn increment_sandbox_count(&self, user_id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("tenant store lock poisoned");
        let tenant = inner
            .by_id
            .get_mut(user_id)
            .ok_or_else(|| FleetError::Validation(format!("unknown user {user_id}")))?;
        tenant.total_sandboxes += 1;
        Ok(())
    }
}

impl Default for TenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn register_applies_defaults_and_generates_unique_ids() {
        let store = TenantStore::new();
        let a = store.register(req("a@example.com")).unwrap();
        let b = store.register(req("b@example.com")).unwrap();
        assert_eq!(a.max_agents, 3);
        assert_eq!(a.credit_limit_usd, 10.0);
        assert!(a.id.starts_with("user-"));
        assert!(a.api_key.starts_with("evo_"));
        assert_ne!(a.id, b.id);
        assert_ne!(a.api_key, b.api_key);
    }

    #[test]
    fn register_rejects_duplicate_email() {
        let store = TenantStore::new();
        store.register(req("dup@example.com")).unwrap();
        let err = store.register(req("dup@example.com")).unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));
    }

    #[test]
    fn unknown_user_is_over_limit_and_over_budget() {
        let store = TenantStore::new();
        assert!(store.is_user_over_limit("nope"));
        assert!(store.is_user_over_budget("nope"));
    }

    #[test]
    fn over_limit_tracks_agent_count_against_max_agents() {
        let store = TenantStore::new();
        let tenant = store.register(req("c@example.com")).unwrap();
        assert!(!store.is_user_over_limit(&tenant.id));
        for i in 0..3 {
            store
                .track_agent(UserAgent {
                    sandbox_id: format!("sbx-{i}"),
                    user_id: tenant.id.clone(),
                    agent_type: "trader".to_string(),
                    status: UserAgentStatus::Active,
                    mode: UserAgentMode::OnDemand,
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        assert!(store.is_user_over_limit(&tenant.id));
    }

    #[test]
    fn remove_agent_drops_local_mapping_only() {
        let store = TenantStore::new();
        let tenant = store.register(req("d@example.com")).unwrap();
        store
            .track_agent(UserAgent {
                sandbox_id: "sbx-1".to_string(),
                user_id: tenant.id.clone(),
                agent_type: "trader".to_string(),
                status: UserAgentStatus::Active,
                mode: UserAgentMode::OnDemand,
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(store.user_agent_count(&tenant.id), 1);
        store.remove_agent("sbx-1").unwrap();
        assert_eq!(store.user_agent_count(&tenant.id), 0);
    }
}
