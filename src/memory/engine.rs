//! Tiered Memory Engine
//!
//! Per-agent engine composing Hot/Warm/Cold/Tree plus the distillation and
//! consolidation machinery behind one handle. `ProcessConversation` is the
//! birth point for Hot/Warm entries; `Retrieve` is the read path that walks
//! the tree, then Warm, then tops up from Cold.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::memory::cold::{ColdEntry, ColdMemory};
use crate::memory::consolidator::Consolidator;
use crate::memory::distiller::{distill, LlmCall};
use crate::memory::hot::HotMemory;
use crate::memory::sql_pipeline::SqlPipelineClient;
use crate::memory::tree::MemoryTree;
use crate::memory::tree_search::search;
use crate::memory::warm::{WarmEntry, WarmMemory};

/// A retrieval hit, carrying its tier of origin so callers can tell a
/// still-warm entry from one that had already migrated to Cold.
#[derive(Debug, Clone)]
pub enum RetrievedEntry {
    Warm(WarmEntry),
    Cold(ColdEntry),
}

impl RetrievedEntry {
    pub fn category(&self) -> &str {
        match self {
            RetrievedEntry::Warm(e) => &e.category,
            RetrievedEntry::Cold(e) => &e.category,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            RetrievedEntry::Warm(e) => &e.content,
            RetrievedEntry::Cold(e) => &e.content,
        }
    }
}

/// Per-agent Tiered Memory Engine handle. Hot is behind a plain `Mutex`
/// (mutations are serialized per process); Warm and Tree carry
/// their own internal locks.
pub struct MemoryEngine {
    agent_id: String,
    hot: Mutex<HotMemory>,
    warm: Arc<WarmMemory>,
    tree: Arc<MemoryTree>,
    cold: Option<Arc<ColdMemory>>,
    consolidator: Consolidator,
    llm: Option<Arc<dyn LlmCall>>,
}

impl MemoryEngine {
    pub fn new(config: MemoryConfig, llm: Option<Arc<dyn LlmCall>>) -> Self {
        let hot = HotMemory::new(config.agent_id.clone(), config.agent_name.clone(), config.owner_name.clone(), &config.hot);
        let warm = Arc::new(WarmMemory::new(config.warm.clone(), config.scoring.clone()));
        let tree = Arc::new(MemoryTree::new(config.tree.clone()));
        let cold = config
            .database_url
            .as_ref()
            .map(|url| Arc::new(ColdMemory::new(SqlPipelineClient::new(url, config.auth_token.clone()), config.agent_id.clone())));

        let consolidator = Consolidator::new(
            config.agent_id.clone(),
            warm.clone(),
            tree.clone(),
            cold.clone(),
            llm.clone(),
            config.consolidation.clone(),
            config.scoring.clone(),
            config.cold.clone(),
        );

        Self {
            agent_id: config.agent_id,
            hot: Mutex::new(hot),
            warm,
            tree,
            cold,
            consolidator,
            llm,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn hot(&self) -> std::sync::MutexGuard<'_, HotMemory> {
        self.hot.lock().expect("hot memory lock poisoned")
    }

    pub fn warm(&self) -> &WarmMemory {
        &self.warm
    }

    pub fn tree(&self) -> &MemoryTree {
        &self.tree
    }

    pub fn cold(&self) -> Option<&Arc<ColdMemory>> {
        self.cold.as_ref()
    }

    pub async fn start_consolidation(&self) -> Result<()> {
        self.consolidator.start().await
    }

    pub async fn stop_consolidation(&self) -> Result<()> {
        self.consolidator.stop().await
    }

    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }

    /// Ensures a tree node exists for `category`, creating any missing
    /// ancestors along the slash-separated path first.
    fn ensure_category(&self, category: &str) {
        if self.tree.find_node(category).is_some() {
            return;
        }
        let mut built = String::new();
        for segment in category.split('/') {
            built = if built.is_empty() { segment.to_string() } else { format!("{built}/{segment}") };
            if self.tree.find_node(&built).is_none() {
                let _ = self.tree.add_node(&built, segment);
            }
        }
    }

    /// Distills `conversation` (rule-based, or the engine's LLM callback if
    /// configured) into a Warm entry under `category`, creating the tree
    /// node on first use and bumping its warm count. This is the birth
    /// point for a memory entry's lifecycle.
    pub async fn process_conversation(&self, conversation: &str, category: &str, importance: f64) -> WarmEntry {
        let distilled = distill(conversation, self.llm.as_deref()).await;
        self.ensure_category(category);

        let now = Utc::now();
        let entry = WarmEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            event_type: "conversation".to_string(),
            category: category.to_string(),
            content: distilled.fact,
            importance,
            access_count: 0,
            last_accessed: now,
            created_at: now,
        };
        self.warm.add(entry.clone());
        let _ = self.tree.increment_counts(category, 1, 0);
        entry
    }

    /// Retrieval path: search the tree for relevant
    /// categories, gather Warm entries for each, then top up from Cold if
    /// still short of `max_results`. Returned in discovery order.
    pub async fn retrieve(&self, query: &str, max_results: usize) -> Vec<RetrievedEntry> {
        let scored = search(&self.tree, query, self.llm.as_deref()).await;

        let mut results = Vec::new();
        for hit in &scored {
            if results.len() >= max_results {
                break;
            }
            for entry in self.warm.get_by_category(&hit.path) {
                if results.len() >= max_results {
                    break;
                }
                results.push(RetrievedEntry::Warm(entry));
            }
        }

        if results.len() < max_results {
            if let Some(cold) = &self.cold {
                let (_tx, cancel) = watch::channel(false);
                for hit in &scored {
                    if results.len() >= max_results {
                        break;
                    }
                    match cold.get_by_category(&hit.path, &cancel).await {
                        Ok(entries) => {
                            for entry in entries {
                                if results.len() >= max_results {
                                    break;
                                }
                                results.push(RetrievedEntry::Cold(entry));
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, category = %hit.path, "cold top-up query failed"),
                    }
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MemoryConfig {
        MemoryConfig {
            agent_id: "agent-1".to_string(),
            agent_name: "claw".to_string(),
            owner_name: "ada".to_string(),
            ..MemoryConfig::default()
        }
    }

    #[tokio::test]
    async fn process_conversation_creates_tree_node_and_warm_entry() {
        let engine = MemoryEngine::new(config(), None);
        engine.process_conversation("Fixed the billing API bug.", "project/billing", 0.7).await;

        assert!(engine.tree().find_node("project/billing").is_some());
        assert_eq!(engine.warm().get_by_category("project/billing").len(), 1);
        assert_eq!(engine.tree().find_node("project/billing").unwrap().warm_count, 1);
    }

    #[tokio::test]
    async fn retrieve_returns_matching_category_entries() {
        let engine = MemoryEngine::new(config(), None);
        engine.process_conversation("Deployed the billing service to production.", "project/billing", 0.8).await;
        engine.process_conversation("Wrote a poem about the weekend.", "personal/poetry", 0.2).await;

        let results = engine.retrieve("billing deployment", 5).await;
        assert!(results.iter().any(|r| r.category() == "project/billing"));
    }

    #[tokio::test]
    async fn retrieve_without_cold_store_never_panics_when_short_of_max_results() {
        let engine = MemoryEngine::new(config(), None);
        let results = engine.retrieve("anything", 10).await;
        assert!(results.is_empty());
    }
}
