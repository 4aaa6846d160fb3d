//! Model Health Registry
//!
//! A per-model state machine that degrades a model after consecutive
//! failures and routes around it, with a versioned snapshot persisted to
//! disk, with a dirty flag so redundant writes are skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Advisory (never authoritative) error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyError {
    QuotaExhausted,
    RateLimited,
    Timeout,
    ServerError,
    AuthError,
    ModelNotFound,
    ContextTooLong,
    Unknown,
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClassifyError::QuotaExhausted => "quota_exhausted",
            ClassifyError::RateLimited => "rate_limited",
            ClassifyError::Timeout => "timeout",
            ClassifyError::ServerError => "server_error",
            ClassifyError::AuthError => "auth_error",
            ClassifyError::ModelNotFound => "model_not_found",
            ClassifyError::ContextTooLong => "context_too_long",
            ClassifyError::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Classifies free-form error text via case-insensitive substring
/// matching, first match wins, in the fixed order pinned below. This is
/// intentionally advisory, never authoritative.
pub fn classify_error(err: &str) -> ClassifyError {
    let text = err.to_lowercase();
    let table: &[(&[&str], ClassifyError)] = &[
        (&["quota", "insufficient_quota"], ClassifyError::QuotaExhausted),
        (&["rate limit", "429", "too many requests"], ClassifyError::RateLimited),
        (&["timeout", "timed out", "deadline exceeded"], ClassifyError::Timeout),
        (
            &["unauthorized", "401", "invalid api key", "forbidden"],
            ClassifyError::AuthError,
        ),
        (&["model not found", "404", "unknown model"], ClassifyError::ModelNotFound),
        (
            &["context length", "too many tokens", "context_length_exceeded"],
            ClassifyError::ContextTooLong,
        ),
        (&["500", "502", "503", "internal server error"], ClassifyError::ServerError),
    ];
    for (needles, kind) in table {
        if needles.iter().any(|n| text.contains(n)) {
            return *kind;
        }
    }
    ClassifyError::Unknown
}

/// State machine position for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unknown,
    Healthy,
    Degraded,
}

/// Per-model health record, persisted as part of the registry snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub state: ModelState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub degraded_at: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub error_kind_counts: HashMap<String, u64>,
    pub last_error_kind: Option<String>,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            state: ModelState::Unknown,
            consecutive_failures: 0,
            total_requests: 0,
            total_failures: 0,
            last_success: None,
            last_failure: None,
            degraded_at: None,
            success_rate: 1.0,
            error_kind_counts: HashMap::new(),
            last_error_kind: None,
        }
    }
}

impl ModelHealth {
    fn record_success(&mut self) {
        self.total_requests += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        if self.state == ModelState::Degraded {
            self.state = ModelState::Healthy;
            self.degraded_at = None;
        } else if self.state == ModelState::Unknown {
            self.state = ModelState::Healthy;
        }
        self.recompute_success_rate();
    }

    fn record_failure(&mut self, kind: ClassifyError, failure_threshold: u32) {
        self.total_requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.last_failure = Some(Utc::now());
        *self.error_kind_counts.entry(kind.to_string()).or_insert(0) += 1;
        self.last_error_kind = Some(kind.to_string());

        if self.state != ModelState::Degraded && self.consecutive_failures >= failure_threshold {
            self.state = ModelState::Degraded;
            self.degraded_at = Some(Utc::now());
        }
        self.recompute_success_rate();
    }

    fn recompute_success_rate(&mut self) {
        if self.total_requests == 0 {
            self.success_rate = 1.0;
        } else {
            self.success_rate = (self.total_requests - self.total_failures) as f64 / self.total_requests as f64;
        }
    }

    fn is_healthy(&self, cooldown: Duration, auto_recover: bool) -> bool {
        match self.state {
            ModelState::Unknown | ModelState::Healthy => true,
            ModelState::Degraded => {
                if !auto_recover {
                    return false;
                }
                match self.degraded_at {
                    Some(at) => {
                        let elapsed = Utc::now().signed_duration_since(at);
                        elapsed.to_std().map(|d| d > cooldown).unwrap_or(false)
                    }
                    None => false,
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: String,
    last_updated: DateTime<Utc>,
    models: HashMap<String, ModelHealth>,
}

struct Inner {
    models: HashMap<String, ModelHealth>,
    dirty: bool,
}

/// Tunables governing the degraded/healthy state machine.
#[derive(Debug, Clone, Copy)]
pub struct HealthRegistryConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub auto_recover: bool,
}

impl Default for HealthRegistryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
            auto_recover: true,
        }
    }
}

/// Process-wide (but not a singleton — constructed explicitly and passed
/// by handle) registry of per-model health state.
pub struct HealthRegistry {
    inner: Mutex<Inner>,
    config: HealthRegistryConfig,
    snapshot_path: Option<PathBuf>,
}

impl HealthRegistry {
    pub fn new(config: HealthRegistryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                models: HashMap::new(),
                dirty: false,
            }),
            config,
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Loads a snapshot from `path` if present. A missing or corrupt file
    /// is non-fatal — the registry starts fresh.
    pub fn load_from(&self, path: &Path) {
        let Ok(bytes) = std::fs::read(path) else {
            return;
        };
        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => {
                let mut inner = self.inner.lock().expect("health registry lock poisoned");
                inner.models = snapshot.models;
                inner.dirty = false;
            }
            Err(e) => warn!(error = %e, path = %path.display(), "model health snapshot unreadable, starting fresh"),
        }
    }

    fn record_success_internal(&self, model: &str) {
        let mut inner = self.inner.lock().expect("health registry lock poisoned");
        inner.models.entry(model.to_string()).or_default().record_success();
        inner.dirty = true;
    }

    pub fn record_success(&self, model: &str) {
        self.record_success_internal(model);
    }

    pub fn record_failure(&self, model: &str, err: &str) -> ClassifyError {
        let kind = classify_error(err);
        let mut inner = self.inner.lock().expect("health registry lock poisoned");
        inner
            .models
            .entry(model.to_string())
            .or_default()
            .record_failure(kind, self.config.failure_threshold);
        inner.dirty = true;
        kind
    }

    pub fn is_healthy(&self, model: &str) -> bool {
        let inner = self.inner.lock().expect("health registry lock poisoned");
        match inner.models.get(model) {
            Some(health) => health.is_healthy(self.config.cooldown, self.config.auto_recover),
            None => true,
        }
    }

    /// Returns `preferred` if healthy, else the first healthy entry in
    /// `fallbacks`, else the candidate among all of them with the highest
    /// historical success rate.
    pub fn get_healthy_model(&self, preferred: &str, fallbacks: &[&str]) -> String {
        if self.is_healthy(preferred) {
            return preferred.to_string();
        }
        for candidate in fallbacks {
            if self.is_healthy(candidate) {
                return candidate.to_string();
            }
        }

        let inner = self.inner.lock().expect("health registry lock poisoned");
        std::iter::once(preferred)
            .chain(fallbacks.iter().copied())
            .max_by(|a, b| {
                let rate = |id: &str| inner.models.get(id).map(|h| h.success_rate).unwrap_or(1.0);
                rate(a).partial_cmp(&rate(b)).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(preferred)
            .to_string()
    }

    pub fn health_of(&self, model: &str) -> Option<ModelHealth> {
        self.inner.lock().expect("health registry lock poisoned").models.get(model).cloned()
    }

    /// Writes the snapshot to the configured path if dirty since the last
    /// save. A no-op when no path is configured or nothing has changed.
    pub fn persist_if_dirty(&self) -> Result<()> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };
        let mut inner = self.inner.lock().expect("health registry lock poisoned");
        if !inner.dirty {
            return Ok(());
        }

        let snapshot = Snapshot {
            version: "1.0".to_string(),
            last_updated: Utc::now(),
            models: inner.models.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| crate::error::FleetError::Internal(e.into()))?;
        std::fs::write(path, bytes).map_err(|e| crate::error::FleetError::Internal(e.into()))?;
        inner.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_error_matches_pinned_table() {
        assert_eq!(classify_error("Insufficient quota for this request"), ClassifyError::QuotaExhausted);
        assert_eq!(classify_error("429 Too Many Requests"), ClassifyError::RateLimited);
        assert_eq!(classify_error("request timed out"), ClassifyError::Timeout);
        assert_eq!(classify_error("401 Unauthorized"), ClassifyError::AuthError);
        assert_eq!(classify_error("model not found: gpt-x"), ClassifyError::ModelNotFound);
        assert_eq!(classify_error("context_length_exceeded"), ClassifyError::ContextTooLong);
        assert_eq!(classify_error("502 Bad Gateway"), ClassifyError::ServerError);
        assert_eq!(classify_error("something entirely unrelated"), ClassifyError::Unknown);
    }

    #[test]
    fn consecutive_failures_trigger_degraded_state() {
        let registry = HealthRegistry::new(HealthRegistryConfig {
            failure_threshold: 3,
            ..HealthRegistryConfig::default()
        });
        for _ in 0..2 {
            registry.record_failure("model-p", "500 internal server error");
        }
        assert!(registry.is_healthy("model-p"));
        registry.record_failure("model-p", "500 internal server error");
        assert!(!registry.is_healthy("model-p"));
        let health = registry.health_of("model-p").unwrap();
        assert_eq!(health.consecutive_failures, 3);
        assert_eq!(health.state, ModelState::Degraded);
    }

    #[test]
    fn get_healthy_model_falls_back_in_order() {
        let registry = HealthRegistry::new(HealthRegistryConfig {
            failure_threshold: 1,
            ..HealthRegistryConfig::default()
        });
        registry.record_failure("model-p", "rate limit exceeded");
        let chosen = registry.get_healthy_model("model-p", &["model-f1", "model-f2"]);
        assert_eq!(chosen, "model-f1");
    }

    #[test]
    fn success_resets_consecutive_failures_and_recovers_from_degraded() {
        let registry = HealthRegistry::new(HealthRegistryConfig {
            failure_threshold: 2,
            ..HealthRegistryConfig::default()
        });
        registry.record_failure("model-p", "500 error");
        registry.record_failure("model-p", "500 error");
        assert!(!registry.is_healthy("model-p"));
        registry.record_success("model-p");
        assert!(registry.is_healthy("model-p"));
        let health = registry.health_of("model-p").unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.state, ModelState::Healthy);
    }

    #[test]
    fn persist_is_noop_without_snapshot_path() {
        let registry = HealthRegistry::new(HealthRegistryConfig::default());
        registry.record_success("model-p");
        registry.persist_if_dirty().unwrap();
    }

    #[test]
    fn dirty_flag_avoids_redundant_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_health.json");
        let registry = HealthRegistry::new(HealthRegistryConfig::default()).with_snapshot_path(path.clone());
        registry.record_success("model-p");
        registry.persist_if_dirty().unwrap();
        assert!(path.exists());
        let first_write = std::fs::metadata(&path).unwrap().modified().unwrap();
        registry.persist_if_dirty().unwrap();
        let second_write = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(first_write, second_write);
    }
}
