//! Warm memory tier
//!
//! In-process map of recently-relevant entries. `Add` evicts by ascending
//! score to make room; `Get` is the reinforcement channel, bumping
//! `access_count` and `last_accessed` on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::{ScoringConfig, WarmConfig};
use crate::memory::scoring;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub category: String,
    pub content: String,
    pub importance: f64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl WarmEntry {
    fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    fn score(&self, config: &ScoringConfig) -> f64 {
        scoring::score(self.importance, scoring::age_days(self.created_at), self.access_count, config)
    }
}

struct Inner {
    entries: HashMap<String, WarmEntry>,
    current_bytes: usize,
}

pub struct WarmMemory {
    inner: RwLock<Inner>,
    config: WarmConfig,
    scoring: ScoringConfig,
}

impl WarmMemory {
    pub fn new(config: WarmConfig, scoring: ScoringConfig) -> Self {
        Self {
            inner: RwLock::new(Inner { entries: HashMap::new(), current_bytes: 0 }),
            config,
            scoring,
        }
    }

    /// Estimates `entry`'s JSON size; evicts lowest-scoring entries
    /// ascending until there is room, then inserts.
    pub fn add(&self, entry: WarmEntry) {
        let size = entry.estimated_size();
        let mut inner = self.inner.write().expect("warm lock poisoned");

        if let Some(existing) = inner.entries.get(&entry.id) {
            inner.current_bytes = inner.current_bytes.saturating_sub(existing.estimated_size());
        }

        while inner.current_bytes + size > self.config.max_bytes && !inner.entries.is_empty() {
            let scoring = &self.scoring;
            let lowest_id = inner
                .entries
                .values()
                .min_by(|a, b| a.score(scoring).partial_cmp(&b.score(scoring)).unwrap())
                .map(|e| e.id.clone());
            match lowest_id {
                Some(id) => {
                    if let Some(removed) = inner.entries.remove(&id) {
                        inner.current_bytes = inner.current_bytes.saturating_sub(removed.estimated_size());
                    }
                }
                None => break,
            }
        }

        inner.current_bytes += size;
        inner.entries.insert(entry.id.clone(), entry);
    }

    /// Reinforcement channel: bumps `access_count`/`last_accessed`.
    pub fn get(&self, id: &str) -> Option<WarmEntry> {
        let mut inner = self.inner.write().expect("warm lock poisoned");
        let entry = inner.entries.get_mut(id)?;
        entry.access_count += 1;
        entry.last_accessed = Utc::now();
        Some(entry.clone())
    }

    pub fn get_by_category(&self, category: &str) -> Vec<WarmEntry> {
        let inner = self.inner.read().expect("warm lock poisoned");
        inner.entries.values().filter(|e| e.category == category).cloned().collect()
    }

    /// Re-categorizes every entry under `from` to `to`, returning the
    /// count touched. Used by the tree rebuilder's `merge`/`rename` ops.
    pub fn recategorize(&self, from: &str, to: &str) -> usize {
        let mut inner = self.inner.write().expect("warm lock poisoned");
        let mut count = 0;
        for entry in inner.entries.values_mut() {
            if entry.category == from {
                entry.category = to.to_string();
                count += 1;
            }
        }
        count
    }

    /// Removes and returns every entry whose score is below the
    /// eviction threshold or whose age exceeds the retention window.
    pub fn evict_expired(&self) -> Vec<WarmEntry> {
        let mut inner = self.inner.write().expect("warm lock poisoned");
        let scoring = &self.scoring;
        let threshold = self.config.eviction_threshold;
        let retention = self.config.retention_days;

        let expired_ids: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.score(scoring) < threshold || scoring::age_days(e.created_at) > retention)
            .map(|e| e.id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(entry) = inner.entries.remove(&id) {
                inner.current_bytes = inner.current_bytes.saturating_sub(entry.estimated_size());
                evicted.push(entry);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("warm lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_bytes(&self) -> usize {
        self.inner.read().expect("warm lock poisoned").current_bytes
    }
}
