//! Configuration surfaces
//!
//! Every knob has a `Default` so a caller can start from zero configuration
//! rather than requiring a config file up front.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fleet/Tenant configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    pub api_key: String,
    pub default_template: String,
    pub default_timeout_sec: u64,
    pub max_agents: usize,
    pub health_check_interval_sec: u64,
    pub keep_alive_interval_sec: u64,
    /// Carried for wire-compatibility with the configuration surface; no
    /// MQTT client is constructed from it (see DESIGN.md).
    pub mqtt_broker: Option<String>,
    pub mqtt_port: Option<u16>,
    pub orchestrator_url: Option<String>,
    pub credit_budget_usd: f64,
    pub cost_per_sec: f64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            default_template: "evoclaw-base".to_string(),
            default_timeout_sec: 3600,
            max_agents: 3,
            health_check_interval_sec: 60,
            keep_alive_interval_sec: 300,
            mqtt_broker: None,
            mqtt_port: None,
            orchestrator_url: None,
            credit_budget_usd: 100.0,
            cost_per_sec: 0.0002,
        }
    }
}

/// Router configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub enabled: bool,
    pub default_tier: Tier,
    pub tier_models: HashMap<Tier, String>,
    pub tier_costs: HashMap<Tier, f64>,
    /// Three ascending thresholds mapping normalized score to tier.
    pub thresholds: [f64; 3],
    pub weights: Option<HashMap<String, f64>>,
    pub log_decisions: bool,
}

/// Cost bracket a request is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Simple,
    Medium,
    Complex,
    Reasoning,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Simple, Tier::Medium, Tier::Complex, Tier::Reasoning];
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Simple => "simple",
            Tier::Medium => "medium",
            Tier::Complex => "complex",
            Tier::Reasoning => "reasoning",
        };
        write!(f, "{s}")
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut tier_models = HashMap::new();
        tier_models.insert(Tier::Simple, "qwen2.5:3b-q4".to_string());
        tier_models.insert(Tier::Medium, "qwen2.5:7b".to_string());
        tier_models.insert(Tier::Complex, "llama3.2:70b".to_string());
        tier_models.insert(Tier::Reasoning, "deepseek-r1:70b".to_string());

        let mut tier_costs = HashMap::new();
        tier_costs.insert(Tier::Simple, 0.10);
        tier_costs.insert(Tier::Medium, 0.50);
        tier_costs.insert(Tier::Complex, 3.00);
        tier_costs.insert(Tier::Reasoning, 8.00);

        Self {
            enabled: true,
            default_tier: Tier::Reasoning,
            tier_models,
            tier_costs,
            thresholds: [0.25, 0.50, 0.75],
            weights: None,
            log_decisions: true,
        }
    }
}

/// Memory engine configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    pub agent_id: String,
    pub agent_name: String,
    pub owner_name: String,
    pub database_url: Option<String>,
    pub auth_token: Option<String>,
    pub tree: TreeConfig,
    pub hot: HotConfig,
    pub warm: WarmConfig,
    pub cold: ColdConfig,
    pub distillation: DistillationConfig,
    pub scoring: ScoringConfig,
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeConfig {
    pub max_nodes: usize,
    pub max_depth: usize,
    pub max_children: usize,
    pub max_summary_bytes: usize,
    pub max_serialized_bytes: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_nodes: 50,
            max_depth: 4,
            max_children: 10,
            max_summary_bytes: 100,
            max_serialized_bytes: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotConfig {
    pub max_serialized_bytes: usize,
    pub max_projects: usize,
    pub max_recent_events: usize,
    pub max_pending_tasks: usize,
    pub max_lessons: usize,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            max_serialized_bytes: 5120,
            max_projects: 5,
            max_recent_events: 10,
            max_pending_tasks: 10,
            max_lessons: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmConfig {
    pub max_bytes: usize,
    pub eviction_threshold: f64,
    pub retention_days: f64,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024,
            eviction_threshold: 0.3,
            retention_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdConfig {
    pub retention_years: f64,
    pub delete_batch_size: usize,
}

impl Default for ColdConfig {
    fn default() -> Self {
        Self {
            retention_years: 2.0,
            delete_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistillationConfig {
    /// 0.0 (keep more detail) .. 1.0 (compress hardest).
    pub aggression: f64,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self { aggression: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringConfig {
    pub half_life_days: f64,
    pub reinforcement_boost: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            reinforcement_boost: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationConfig {
    pub warm_eviction_interval_sec: u64,
    pub tree_prune_interval_sec: u64,
    pub tree_rebuild_interval_sec: u64,
    pub cold_cleanup_interval_sec: u64,
    pub tree_prune_max_age_days: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            warm_eviction_interval_sec: 3600,
            tree_prune_interval_sec: 24 * 3600,
            tree_rebuild_interval_sec: 30 * 24 * 3600,
            cold_cleanup_interval_sec: 30 * 24 * 3600,
            tree_prune_max_age_days: 60.0,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            agent_name: "agent".to_string(),
            owner_name: "owner".to_string(),
            database_url: None,
            auth_token: None,
            tree: TreeConfig::default(),
            hot: HotConfig::default(),
            warm: WarmConfig::default(),
            cold: ColdConfig::default(),
            distillation: DistillationConfig::default(),
            scoring: ScoringConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}
