//! Router cost savings ledger

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;

use crate::config::{RouterConfig, Tier};
use crate::router::scorer::{Router, RoutingDecision};

struct Inner {
    total_requests: u64,
    routed_cost_usd: f64,
    baseline_cost_usd: f64,
    per_tier_counts: HashMap<Tier, u64>,
    per_tier_models: HashMap<Tier, String>,
}

/// Human-readable savings summary returned by `report`.
#[derive(Debug, Clone)]
pub struct CostSavingsReport {
    pub total_requests: u64,
    pub routed_cost_usd: f64,
    pub baseline_cost_usd: f64,
    pub saved_usd: f64,
    pub per_tier_counts: HashMap<Tier, u64>,
}

impl CostSavingsReport {
    /// Renders the enumerated per-tier counts and models as a
    /// human-readable report — plain text, no structured error codes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "routed {} requests: ${:.4} actual vs ${:.4} baseline (saved ${:.4})",
            self.total_requests, self.routed_cost_usd, self.baseline_cost_usd, self.saved_usd
        );
        for tier in Tier::ALL {
            let count = self.per_tier_counts.get(&tier).copied().unwrap_or(0);
            if count > 0 {
                let _ = writeln!(out, "  {tier}: {count} requests");
            }
        }
        out
    }
}

/// Tracks actual-vs-baseline spend across routed requests. An explicit
/// handle, not a package-level singleton.
pub struct CostLedger {
    inner: Mutex<Inner>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                total_requests: 0,
                routed_cost_usd: 0.0,
                baseline_cost_usd: 0.0,
                per_tier_counts: HashMap::new(),
                per_tier_models: HashMap::new(),
            }),
        }
    }

    /// Routes `prompt`, then records the per-request actual-vs-baseline
    /// cost for `tokens` tokens against `router`'s configured tier costs.
    pub fn route_and_track(&self, router: &Router, prompt: &str, tokens: u64) -> RoutingDecision {
        let decision = router.route(prompt);
        self.track(router.config(), &decision, tokens);
        decision
    }

    fn track(&self, config: &RouterConfig, decision: &RoutingDecision, tokens: u64) {
        let routed_cost_per_m = config.tier_costs.get(&decision.tier).copied().unwrap_or(0.0);
        let baseline_cost_per_m = config.tier_costs.get(&config.default_tier).copied().unwrap_or(0.0);
        let routed_cost = tokens as f64 * routed_cost_per_m / 1_000_000.0;
        let baseline_cost = tokens as f64 * baseline_cost_per_m / 1_000_000.0;

        let mut inner = self.inner.lock().expect("cost ledger lock poisoned");
        inner.total_requests += 1;
        inner.routed_cost_usd += routed_cost;
        inner.baseline_cost_usd += baseline_cost;
        *inner.per_tier_counts.entry(decision.tier).or_insert(0) += 1;
        inner.per_tier_models.insert(decision.tier, decision.model.clone());
    }

    pub fn report(&self) -> CostSavingsReport {
        let inner = self.inner.lock().expect("cost ledger lock poisoned");
        CostSavingsReport {
            total_requests: inner.total_requests,
            routed_cost_usd: inner.routed_cost_usd,
            baseline_cost_usd: inner.baseline_cost_usd,
            saved_usd: inner.baseline_cost_usd - inner.routed_cost_usd,
            per_tier_counts: inner.per_tier_counts.clone(),
        }
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_simple_and_two_complex_requests_show_positive_savings() {
        let router = Router::new(RouterConfig::default());
        let ledger = CostLedger::new();

        for _ in 0..5 {
            ledger.route_and_track(&router, "hi", 2000);
        }
        for _ in 0..2 {
            ledger.route_and_track(
                &router,
                "Prove by mathematical induction that 1+2+...+n = n(n+1)/2. Derive and prove formally step by step.",
                2000,
            );
        }

        let report = ledger.report();
        assert_eq!(report.total_requests, 7);
        assert!(report.saved_usd > 0.0);
    }
}
