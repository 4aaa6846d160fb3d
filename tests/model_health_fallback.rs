//! Model health degradation, fallback, and cooldown recovery.

use std::time::Duration;

use rust_agency::router::{ClassifyError, HealthRegistry};
use rust_agency::router::health::HealthRegistryConfig;

#[test]
fn three_consecutive_failures_degrade_a_model_and_fallback_selects_the_healthy_one() {
    let registry = HealthRegistry::new(HealthRegistryConfig { failure_threshold: 3, ..HealthRegistryConfig::default() });

    for _ in 0..3 {
        registry.record_failure("primary-model", "connection refused");
    }
    assert!(!registry.is_healthy("primary-model"));

    registry.record_success("fallback-model");
    let chosen = registry.get_healthy_model("primary-model", &["fallback-model"]);
    assert_eq!(chosen, "fallback-model");
}

#[test]
fn degraded_model_recovers_after_cooldown_elapses() {
    let registry = HealthRegistry::new(HealthRegistryConfig {
        failure_threshold: 1,
        cooldown: Duration::from_millis(10),
        auto_recover: true,
    });

    registry.record_failure("flaky-model", "timeout");
    assert!(!registry.is_healthy("flaky-model"));

    std::thread::sleep(Duration::from_millis(30));
    assert!(registry.is_healthy("flaky-model"));
}

#[test]
fn auto_recover_disabled_keeps_a_degraded_model_unhealthy_regardless_of_cooldown() {
    let registry = HealthRegistry::new(HealthRegistryConfig {
        failure_threshold: 1,
        cooldown: Duration::from_millis(1),
        auto_recover: false,
    });

    registry.record_failure("flaky-model", "500 internal server error");
    std::thread::sleep(Duration::from_millis(20));
    assert!(!registry.is_healthy("flaky-model"));
}

#[test]
fn classify_error_distinguishes_transient_from_terminal_failures() {
    assert_eq!(rust_agency::router::health::classify_error("request timed out"), ClassifyError::Timeout);
    assert_eq!(rust_agency::router::health::classify_error("401 Unauthorized"), ClassifyError::AuthError);
    assert_eq!(rust_agency::router::health::classify_error("connection reset by peer"), ClassifyError::Unknown);
}
