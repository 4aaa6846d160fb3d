//! Consolidator: background migration/prune loops across memory tiers.
//!
//! Same shape as `fleet::manager::FleetManager`'s background loops: one
//! `tokio::spawn`'d task per loop, a shared `watch::channel` cancellation
//! token, and a join barrier on `stop`. Tier locks are acquired in the
//! fixed order Warm -> Tree -> Cold — in practice this means the
//! warm-eviction loop finishes its warm-lock-holding work before touching
//! the tree, and the tree before cold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ColdConfig, ConsolidationConfig, ScoringConfig};
use crate::error::Result;
use crate::memory::cold::{ColdEntry, ColdMemory};
use crate::memory::distiller::{distill, LlmCall};
use crate::memory::tree::MemoryTree;
use crate::memory::tree_rebuild::{apply_plan, rebuild_plan_via_llm};
use crate::memory::warm::WarmMemory;

struct BackgroundHandles {
    warm_eviction: JoinHandle<()>,
    tree_prune: JoinHandle<()>,
    tree_rebuild: JoinHandle<()>,
    cold_cleanup: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

/// Drives the four tier-maintenance loops for one agent's memory engine.
pub struct Consolidator {
    agent_id: String,
    warm: Arc<WarmMemory>,
    tree: Arc<MemoryTree>,
    cold: Option<Arc<ColdMemory>>,
    llm: Option<Arc<dyn LlmCall>>,
    config: ConsolidationConfig,
    scoring: ScoringConfig,
    cold_config: ColdConfig,
    started: AtomicBool,
    handles: RwLock<Option<BackgroundHandles>>,
}

impl Consolidator {
    pub fn new(
        agent_id: impl Into<String>,
        warm: Arc<WarmMemory>,
        tree: Arc<MemoryTree>,
        cold: Option<Arc<ColdMemory>>,
        llm: Option<Arc<dyn LlmCall>>,
        config: ConsolidationConfig,
        scoring: ScoringConfig,
        cold_config: ColdConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            warm,
            tree,
            cold,
            llm,
            config,
            scoring,
            cold_config,
            started: AtomicBool::new(false),
            handles: RwLock::new(None),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Starts the four maintenance loops. Calling twice without an
    /// intervening `stop` is a no-op error, matching `FleetManager::start`.
    pub async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);

        let warm_eviction = tokio::spawn(Self::warm_eviction_loop(
            self.agent_id.clone(),
            self.warm.clone(),
            self.tree.clone(),
            self.cold.clone(),
            Duration::from_secs(self.config.warm_eviction_interval_sec.max(1)),
            cancel_rx.clone(),
        ));
        let tree_prune = tokio::spawn(Self::tree_prune_loop(
            self.tree.clone(),
            self.config.tree_prune_max_age_days,
            Duration::from_secs(self.config.tree_prune_interval_sec.max(1)),
            cancel_rx.clone(),
        ));
        let tree_rebuild = tokio::spawn(Self::tree_rebuild_loop(
            self.tree.clone(),
            self.warm.clone(),
            self.llm.clone(),
            Duration::from_secs(self.config.tree_rebuild_interval_sec.max(1)),
            cancel_rx.clone(),
        ));
        let cold_cleanup = tokio::spawn(Self::cold_cleanup_loop(
            self.cold.clone(),
            self.cold_config.retention_years,
            self.scoring.clone(),
            Duration::from_secs(self.config.cold_cleanup_interval_sec.max(1)),
            cancel_rx,
        ));

        *self.handles.write().await = Some(BackgroundHandles {
            warm_eviction,
            tree_prune,
            tree_rebuild,
            cold_cleanup,
            cancel_tx,
        });
        info!(agent_id = %self.agent_id, "memory consolidator started");
        Ok(())
    }

    /// Signals every loop to stop and joins them. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let handles = self.handles.write().await.take();
        let Some(handles) = handles else {
            return Ok(());
        };
        let _ = handles.cancel_tx.send(true);
        let _ = tokio::join!(handles.warm_eviction, handles.tree_prune, handles.tree_rebuild, handles.cold_cleanup);
        self.started.store(false, Ordering::SeqCst);
        info!(agent_id = %self.agent_id, "memory consolidator stopped");
        Ok(())
    }

    /// Evicts expired Warm entries, archives each into Cold, then
    /// decrements/increments the tree's warm/cold counts for its category.
    pub async fn run_warm_eviction(&self) -> Result<usize> {
        let evicted = self.warm.evict_expired();
        let count = evicted.len();
        let (_tx, cancel) = watch::channel(false);

        for entry in evicted {
            let distilled = distill(&entry.content, None).await;
            if let Some(cold) = &self.cold {
                let cold_entry = ColdEntry {
                    id: entry.id.clone(),
                    agent_id: self.agent_id.clone(),
                    timestamp: entry.timestamp,
                    event_type: entry.event_type.clone(),
                    category: entry.category.clone(),
                    content: entry.content.clone(),
                    distilled_summary: distilled.fact,
                    importance: entry.importance,
                    access_count: entry.access_count,
                    last_accessed: entry.last_accessed,
                    created_at: entry.created_at,
                };
                if let Err(e) = cold.add(&cold_entry, &cancel).await {
                    warn!(error = %e, id = %entry.id, "failed to archive evicted warm entry to cold");
                    continue;
                }
            }
            if let Err(e) = self.tree.increment_counts(&entry.category, -1, 1) {
                warn!(error = %e, category = %entry.category, "tree category missing for evicted warm entry");
            }
        }
        Ok(count)
    }

    pub fn run_tree_prune(&self) -> usize {
        self.tree.prune_dead_nodes(self.config.tree_prune_max_age_days)
    }

    /// Requests a rebuild plan from the LLM capability (no-op if
    /// unconfigured) and applies it under the tree rebuilder's safety rules.
    pub async fn run_tree_rebuild(&self) -> Result<usize> {
        let plan = rebuild_plan_via_llm(&self.tree, self.llm.as_deref()).await;
        if plan.is_empty() {
            return Ok(0);
        }
        apply_plan(&self.tree, &self.warm, &plan)
    }

    pub async fn run_cold_cleanup(&self) -> Result<usize> {
        let Some(cold) = &self.cold else {
            return Ok(0);
        };
        let (_tx, cancel) = watch::channel(false);
        cold.delete_frozen(self.cold_config.retention_years, self.scoring.half_life_days, self.scoring.reinforcement_boost, &cancel)
            .await
    }

    async fn warm_eviction_loop(
        agent_id: String,
        warm: Arc<WarmMemory>,
        tree: Arc<MemoryTree>,
        cold: Option<Arc<ColdMemory>>,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = warm.evict_expired();
                    let (_tx, inner_cancel) = watch::channel(false);
                    for entry in evicted {
                        let distilled = distill(&entry.content, None).await;
                        if let Some(cold) = &cold {
                            let cold_entry = ColdEntry {
                                id: entry.id.clone(),
                                agent_id: agent_id.clone(),
                                timestamp: entry.timestamp,
                                event_type: entry.event_type.clone(),
                                category: entry.category.clone(),
                                content: entry.content.clone(),
                                distilled_summary: distilled.fact,
                                importance: entry.importance,
                                access_count: entry.access_count,
                                last_accessed: entry.last_accessed,
                                created_at: entry.created_at,
                            };
                            if let Err(e) = cold.add(&cold_entry, &inner_cancel).await {
                                warn!(error = %e, "warm eviction loop: cold archive failed");
                                continue;
                            }
                        }
                        if let Err(e) = tree.increment_counts(&entry.category, -1, 1) {
                            debug!(error = %e, "warm eviction loop: tree category missing");
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

    async fn tree_prune_loop(tree: Arc<MemoryTree>, max_age_days: f64, interval: Duration, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pruned = tree.prune_dead_nodes(max_age_days);
                    if pruned > 0 {
                        debug!(pruned, "tree prune loop removed dead nodes");
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

    async fn tree_rebuild_loop(
        tree: Arc<MemoryTree>,
        warm: Arc<WarmMemory>,
        llm: Option<Arc<dyn LlmCall>>,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let plan = rebuild_plan_via_llm(&tree, llm.as_deref()).await;
                    if !plan.is_empty() {
                        if let Err(e) = apply_plan(&tree, &warm, &plan) {
                            warn!(error = %e, "tree rebuild loop: plan application failed");
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

    async fn cold_cleanup_loop(
        cold: Option<Arc<ColdMemory>>,
        retention_years: f64,
        scoring: ScoringConfig,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) {
        let Some(cold) = cold else {
            // No remote store configured: wait on cancellation only, never ticking.
            let _ = cancel.changed().await;
            return;
        };
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (_tx, inner_cancel) = watch::channel(false);
                    match cold.delete_frozen(retention_years, scoring.half_life_days, scoring.reinforcement_boost, &inner_cancel).await {
                        Ok(deleted) if deleted > 0 => info!(deleted, "cold cleanup loop deleted frozen entries"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "cold cleanup loop failed"),
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
    use crate::config::{ScoringConfig, TreeConfig, WarmConfig};
    use crate::memory::warm::WarmEntry;
    use chrono::{Duration as ChronoDuration, Utc};

    fn consolidator_without_cold() -> (Consolidator, Arc<WarmMemory>, Arc<MemoryTree>) {
        let warm = Arc::new(WarmMemory::new(WarmConfig::default(), ScoringConfig::default()));
        let tree = Arc::new(MemoryTree::new(TreeConfig::default()));
        tree.add_node("project", "root").unwrap();
        let consolidator = Consolidator::new(
            "agent-1",
            warm.clone(),
            tree.clone(),
            None,
            None,
            ConsolidationConfig::default(),
            ScoringConfig::default(),
            ColdConfig::default(),
        );
        (consolidator, warm, tree)
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let (consolidator, _, _) = consolidator_without_cold();
        consolidator.start().await.unwrap();
        assert!(consolidator.is_started());
        consolidator.stop().await.unwrap();
        consolidator.stop().await.unwrap();
        assert!(!consolidator.is_started());
    }

    #[tokio::test]
    async fn run_warm_eviction_decrements_warm_and_increments_cold_counts_without_cold_store() {
        let (consolidator, warm, tree) = consolidator_without_cold();
        tree.increment_counts("project", 1, 0).unwrap();
        warm.add(WarmEntry {
            id: "e1".to_string(),
            timestamp: Utc::now() - ChronoDuration::days(60),
            event_type: "note".to_string(),
            category: "project".to_string(),
            content: "stale content".to_string(),
            importance: 0.9,
            access_count: 0,
            last_accessed: Utc::now() - ChronoDuration::days(60),
            created_at: Utc::now() - ChronoDuration::days(60),
        });

        let count = consolidator.run_warm_eviction().await.unwrap();
        assert_eq!(count, 1);
        let node = tree.find_node("project").unwrap();
        assert_eq!(node.warm_count, 0);
        assert_eq!(node.cold_count, 1);
    }

    #[test]
    fn run_tree_prune_removes_dead_nodes() {
        let (consolidator, _, tree) = consolidator_without_cold();
        {
            let inner_path = "project";
            tree.update_node(inner_path, "root").unwrap();
        }
        // force staleness directly is covered in tree::tests; here just assert no panic on empty tree.
        let pruned = consolidator.run_tree_prune();
        assert_eq!(pruned, 0);
    }

    #[tokio::test]
    async fn run_tree_rebuild_is_noop_without_llm() {
        let (consolidator, _, _) = consolidator_without_cold();
        let applied = consolidator.run_tree_rebuild().await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn run_cold_cleanup_is_noop_without_cold_store() {
        let (consolidator, _, _) = consolidator_without_cold();
        let deleted = consolidator.run_cold_cleanup().await.unwrap();
        assert_eq!(deleted, 0);
    }
}
