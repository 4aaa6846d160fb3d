//! Agent Fleet Control Plane
//!
//! Runs a large population of short-lived remote sandboxes under per-tenant
//! quotas and a global spend budget, routes LLM requests through a
//! complexity-scored cost tier with model-health fallback, and backs each
//! agent with a four-tier memory hierarchy that survives sandbox death.
//!
//! - [`fleet`] — sandbox REST client, quota-aware manager, cost tracking.
//! - [`broker`] — tenant identity, quotas, credential injection.
//! - [`router`] — prompt-complexity scorer, model health registry, cost ledger.
//! - [`memory`] — Hot/Warm/Cold/tree memory tiers and the consolidator.

pub mod broker;
pub mod config;
pub mod error;
pub mod fleet;
pub mod memory;
pub mod router;

pub use error::{FleetError, Result};
