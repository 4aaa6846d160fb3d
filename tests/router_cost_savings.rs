//! Prompt routing and the cost savings ledger.

use rust_agency::config::{RouterConfig, Tier};
use rust_agency::router::{CostLedger, Router};

#[test]
fn simple_prompt_routes_cheaper_than_a_reasoning_prompt() {
    let router = Router::new(RouterConfig::default());

    let simple = router.route("hi there");
    let reasoning = router.route(
        "Derive a formal proof by induction that the sum of the first n odd numbers equals n^2. \
         Show every step and justify each inference.",
    );

    assert_eq!(simple.tier, Tier::Simple);
    assert!(matches!(reasoning.tier, Tier::Complex | Tier::Reasoning));
}

#[test]
fn routing_many_simple_requests_shows_positive_savings_against_the_default_tier_baseline() {
    let router = Router::new(RouterConfig::default());
    let ledger = CostLedger::new();

    for _ in 0..20 {
        ledger.route_and_track(&router, "hi", 1500);
    }

    let report = ledger.report();
    assert_eq!(report.total_requests, 20);
    assert!(report.saved_usd > 0.0, "routing 20 greetings off the default tier should show savings");
    assert!(report.routed_cost_usd < report.baseline_cost_usd);
}

#[test]
fn disabled_router_always_resolves_to_the_configured_default_tier() {
    let mut config = RouterConfig::default();
    config.enabled = false;
    config.default_tier = Tier::Medium;
    let router = Router::new(config);

    for prompt in ["hi", "write a kubernetes operator with a reconciliation loop"] {
        let decision = router.route(prompt);
        assert_eq!(decision.tier, Tier::Medium);
        assert!(decision.dimensions.is_empty());
    }
}
