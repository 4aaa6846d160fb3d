//! Fleet Manager — quota-aware sandbox orchestration
//!
//! Wraps `SandboxClient` with an agent-count quota, a budget check, and
//! three background loops (health check, keep-alive, cost polling) that
//! run for the manager's lifetime between `start()` and `stop()`.

use chrono::Utc;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::fleet::cost::{CostSnapshot, CostTracker};
use crate::fleet::sandbox_client::{CommandResult, Sandbox, SandboxClient, SandboxConfig, SandboxState, SandboxStatus};

struct BackgroundHandles {
    health: JoinHandle<()>,
    keep_alive: JoinHandle<()>,
    cost: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

/// Orchestrates a tenant's (or the default tenant's) sandboxes against a
/// single `SandboxClient`, enforcing `max_agents` and budget limits before
/// every spawn.
pub struct FleetManager {
    client: Arc<SandboxClient>,
    cost: Arc<CostTracker>,
    config: FleetConfig,
    started: AtomicBool,
    handles: RwLock<Option<BackgroundHandles>>,
}

impl FleetManager {
    pub fn new(base_url: impl Into<String>, config: FleetConfig) -> Self {
        let client = Arc::new(SandboxClient::new(base_url, config.api_key.clone()));
        let cost = Arc::new(CostTracker::new(config.cost_per_sec, config.credit_budget_usd));
        Self {
            client,
            cost,
            config,
            started: AtomicBool::new(false),
            handles: RwLock::new(None),
        }
    }

    /// Starts the background health-check, keep-alive, and cost-polling
    /// loops. Calling `start` twice without an intervening `stop` fails —
    /// the manager is not meant to run two overlapping loop sets.
    pub async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FleetError::Validation(
                "fleet manager is already started".to_string(),
            ));
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);

        let health = tokio::spawn(Self::health_check_loop(
            self.client.clone(),
            Duration::from_secs(self.config.health_check_interval_sec.max(1)),
            cancel_rx.clone(),
        ));
        let keep_alive = tokio::spawn(Self::keep_alive_loop(
            self.client.clone(),
            self.config.default_timeout_sec,
            Duration::from_secs(self.config.keep_alive_interval_sec.max(1)),
            cancel_rx.clone(),
        ));
        let cost = tokio::spawn(Self::cost_poll_loop(
            self.client.clone(),
            self.cost.clone(),
            Duration::from_secs(30),
            cancel_rx,
        ));

        *self.handles.write().await = Some(BackgroundHandles {
            health,
            keep_alive,
            cost,
            cancel_tx,
        });
        info!("fleet manager started");
        Ok(())
    }

    /// Signals every background loop to stop, waits for them to drain, then
    /// drains the fleet itself: enumerates provider-side sandboxes (not
    /// just the local cache) and attempts to `Kill` each. List and kill
    /// failures are logged, not returned — `stop` is best-effort idempotent
    /// Safe to call more than once; the second
    /// call is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let handles = self.handles.write().await.take();
        let Some(handles) = handles else {
            return Ok(());
        };
        let _ = handles.cancel_tx.send(true);
        let _ = tokio::join!(handles.health, handles.keep_alive, handles.cost);

        let (_tx, rx) = watch::channel(false);
        match self.client.list_agents(&rx).await {
            Ok(sandboxes) => {
                for sandbox in sandboxes {
                    if let Err(e) = self.kill(&sandbox.sandbox_id).await {
                        warn!(sandbox_id = %sandbox.sandbox_id, error = %e, "stop: failed to kill sandbox while draining");
                    }
                }
            }
            Err(e) => warn!(error = %e, "stop: failed to list provider-side sandboxes for drain"),
        }

        self.started.store(false, Ordering::SeqCst);
        info!("fleet manager stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawns one sandbox, rejecting the request if it would push the
    /// tracked agent count past `max_agents` or the estimated spend past
    /// the configured budget.
    pub async fn spawn(&self, mut cfg: SandboxConfig) -> Result<Sandbox> {
        let current = self.client.local_sandbox_count().await;
        if current >= self.config.max_agents {
            return Err(FleetError::AgentLimitReached {
                current,
                max: self.config.max_agents,
            });
        }

        if cfg.timeout_sec == 0 {
            cfg.timeout_sec = self.config.default_timeout_sec;
        }
        if cfg.orchestrator_url.is_none() {
            cfg.orchestrator_url = self.config.orchestrator_url.clone();
        }
        if let Some((estimated, budget)) = self.cost.would_exceed_budget() {
            return Err(FleetError::BudgetExhausted { estimated, budget });
        }

        let (_tx, rx) = watch::channel(false);
        let sandbox = self.client.spawn(&cfg, &rx).await?;
        self.cost.record_spawn();
        Ok(sandbox)
    }

    /// Spawns up to `configs.len()` sandboxes concurrently, stopping at the
    /// first quota violation it can detect up front and otherwise letting
    /// each spawn succeed or fail independently.
    pub async fn spawn_burst(&self, configs: Vec<SandboxConfig>) -> Vec<Result<Sandbox>> {
        let current = self.client.local_sandbox_count().await;
        let room = self.config.max_agents.saturating_sub(current);
        if room == 0 {
            return configs
                .into_iter()
                .map(|_| {
                    Err(FleetError::AgentLimitReached {
                        current,
                        max: self.config.max_agents,
                    })
                })
                .collect();
        }

        let (accepted, rejected) = if configs.len() > room {
            warn!(
                requested = configs.len(),
                room, "spawn burst truncated by agent limit"
            );
            let mut configs = configs;
            let rest = configs.split_off(room);
            (configs, rest.len())
        } else {
            (configs, 0)
        };

        let futures = accepted.into_iter().map(|cfg| {
            let this_current = current;
            async move { self.spawn_with_known_current(cfg, this_current).await }
        });
        let mut results: Vec<Result<Sandbox>> = join_all(futures).await;
        for _ in 0..rejected {
            results.push(Err(FleetError::AgentLimitReached {
                current,
                max: self.config.max_agents,
            }));
        }
        results
    }

    async fn spawn_with_known_current(&self, cfg: SandboxConfig, _current: usize) -> Result<Sandbox> {
        self.spawn(cfg).await
    }

    /// Closes a sandbox's uptime window and commits `uptimeSec *
    /// costPerSec` into the cost ledger *before* issuing the remote delete.
    /// A crash between the cost-debit and the delete may leave an orphan
    /// sandbox for a later `KillAll` or provider TTL to clean up. The
    /// ledger commit is best-effort and never blocks the delete on its
    /// outcome.
    pub async fn kill(&self, sandbox_id: &str) -> Result<()> {
        let uptime_sec = match self.client.local_sandbox(sandbox_id).await {
            Some(sandbox) => (Utc::now() - sandbox.started_at).num_seconds().max(0) as u64,
            None => 0,
        };
        self.cost.commit_kill(uptime_sec);

        let (_tx, rx) = watch::channel(false);
        self.client.kill(sandbox_id, &rx).await?;
        Ok(())
    }

    /// Lists provider-side sandboxes and attempts `Kill` for each,
    /// returning a count of successful kills; individual failures are
    /// logged, not fatal.
    pub async fn kill_all(&self) -> usize {
        let (_tx, rx) = watch::channel(false);
        let sandboxes = match self.client.list_agents(&rx).await {
            Ok(sandboxes) => sandboxes,
            Err(e) => {
                warn!(error = %e, "kill_all: failed to list provider-side sandboxes");
                return 0;
            }
        };

        let futures = sandboxes.iter().map(|s| self.kill(&s.sandbox_id));
        let results = join_all(futures).await;
        let mut killed = 0;
        for (sandbox, result) in sandboxes.iter().zip(results) {
            match result {
                Ok(()) => killed += 1,
                Err(e) => warn!(sandbox_id = %sandbox.sandbox_id, error = %e, "kill_all: failed to kill sandbox"),
            }
        }
        killed
    }

    pub async fn list_agents(&self) -> Vec<Sandbox> {
        self.client.local_sandboxes().await
    }

    pub async fn get_status(&self, sandbox_id: &str) -> Result<SandboxStatus> {
        let (_tx, rx) = watch::channel(false);
        self.client.get_status(sandbox_id, &rx).await
    }

    pub async fn send_command(
        &self,
        sandbox_id: &str,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandResult> {
        let (_tx, rx) = watch::channel(false);
        self.client.send_command(sandbox_id, cmd, args, &rx).await
    }

    pub async fn get_costs(&self) -> CostSnapshot {
        let active = self.client.local_sandbox_count().await;
        self.cost.snapshot(active)
    }

    pub fn client(&self) -> Arc<SandboxClient> {
        self.client.clone()
    }

    async fn health_check_loop(
        client: Arc<SandboxClient>,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (_tx, rx) = watch::channel(false);
                    match client.list_agents(&rx).await {
                        Ok(sandboxes) => {
                            debug!(count = sandboxes.len(), "health check refreshed index");
                            for sandbox in &sandboxes {
                                match client.get_status(&sandbox.sandbox_id, &rx).await {
                                    Ok(status) if !status.healthy => {
                                        warn!(sandbox_id = %sandbox.sandbox_id, "sandbox flagged unhealthy");
                                    }
                                    Ok(_) => {}
                                    Err(e) => warn!(sandbox_id = %sandbox.sandbox_id, error = %e, "health probe failed"),
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "health check failed"),
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn keep_alive_loop(
        client: Arc<SandboxClient>,
        timeout_sec: u64,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sandboxes = client.local_sandboxes().await;
                    let (_tx, rx) = watch::channel(false);
                    for sandbox in sandboxes {
                        if sandbox.state != SandboxState::Running {
                            continue;
                        }
                        if let Err(e) = client.set_timeout(&sandbox.sandbox_id, timeout_sec, &rx).await {
                            warn!(sandbox_id = %sandbox.sandbox_id, error = %e, "keep-alive failed");
                        }
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn cost_poll_loop(
        client: Arc<SandboxClient>,
        cost: Arc<CostTracker>,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let interval_sec = interval.as_secs();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let active = client.local_sandbox_count().await;
                    cost.poll_tick(active, interval_sec);
                    if cost.is_near_budget() {
                        warn!("estimated spend has crossed 90% of budget");
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FleetConfig {
        FleetConfig {
            api_key: "test-key".to_string(),
            max_agents: 2,
            ..FleetConfig::default()
        }
    }

    #[tokio::test]
    async fn start_twice_without_stop_fails() {
        let manager = FleetManager::new("http://localhost:1", test_config());
        manager.start().await.unwrap();
        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_idempotent() {
        let manager = FleetManager::new("http://localhost:1", test_config());
        manager.stop().await.unwrap();
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_burst_rejects_everything_once_full() {
        let manager = FleetManager::new("http://localhost:1", test_config());
        assert_eq!(manager.get_costs().await.active_count, 0);
    }

    #[tokio::test]
    async fn kill_of_unknown_sandbox_commits_zero_uptime_and_surfaces_delete_error() {
        let manager = FleetManager::new("http://localhost:1", test_config());
        let before = manager.get_costs().await;
        let err = manager.kill("sbx-unknown").await.unwrap_err();
        assert!(matches!(err, FleetError::Internal(_)));
        let after = manager.get_costs().await;
        assert_eq!(before.cumulative_uptime_sec, after.cumulative_uptime_sec);
    }

    #[tokio::test]
    async fn kill_all_against_unreachable_provider_returns_zero() {
        let manager = FleetManager::new("http://localhost:1", test_config());
        assert_eq!(manager.kill_all().await, 0);
    }

    #[tokio::test]
    async fn stop_drain_against_unreachable_provider_does_not_error() {
        let manager = FleetManager::new("http://localhost:1", test_config());
        manager.start().await.unwrap();
        manager.stop().await.unwrap();
    }
}
