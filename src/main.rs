//! Demo wiring for the Agent Fleet Control Plane.
//!
//! Stands up a tenant, routes a handful of prompts through the cost-scored
//! router, and records a conversation in the tiered memory engine. Nothing
//! here is load-bearing for the library — it exists to exercise the public
//! API end to end the way a real caller would assemble it.

use std::sync::Arc;

use rust_agency::broker::{RegisterRequest, Service, TenantStore};
use rust_agency::broker::service::SpawnAgentRequest;
use rust_agency::config::{FleetConfig, MemoryConfig, RouterConfig};
use rust_agency::fleet::FleetManager;
use rust_agency::memory::MemoryEngine;
use rust_agency::router::{CostLedger, Router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let tenants = Arc::new(TenantStore::new());
    let fleet = Arc::new(FleetManager::new("http://localhost:4000", FleetConfig::default()));
    let service = Service::new(tenants.clone(), fleet.clone(), "evoclaw-base");

    let tenant = service.register(RegisterRequest {
        email: "demo@example.com".to_string(),
        max_agents: Some(2),
        credit_limit_usd: Some(5.0),
        ..Default::default()
    })?;
    info!(tenant_id = %tenant.id, "registered tenant");

    let agent = service
        .spawn_agent(&tenant.id, SpawnAgentRequest { agent_type: Some("research".to_string()), ..Default::default() })
        .await?;
    info!(sandbox_id = %agent.sandbox_id, "spawned sandbox");

    let router = Router::new(RouterConfig::default());
    let ledger = CostLedger::new();
    for prompt in [
        "hi",
        "Summarize this changelog for the release notes.",
        "Prove by induction that the sum of the first n odd numbers is n^2, step by step.",
    ] {
        let decision = ledger.route_and_track(&router, prompt, 800);
        info!(tier = %decision.tier, model = %decision.model, prompt, "routed prompt");
    }
    info!("{}", ledger.report().render());

    let memory = MemoryEngine::new(
        MemoryConfig {
            agent_id: agent.sandbox_id.clone(),
            agent_name: "demo-agent".to_string(),
            owner_name: tenant.email.clone(),
            ..MemoryConfig::default()
        },
        None,
    );
    memory.process_conversation("User asked for the Q3 billing summary; agent produced it.", "project/billing", 0.6).await;
    let hits = memory.retrieve("billing summary", 5).await;
    info!(hits = hits.len(), "retrieved memory entries");

    service.kill_agent(&tenant.id, &agent.sandbox_id).await?;
    info!("demo run complete");
    Ok(())
}
