//! Intelligent LLM Router
//!
//! A 14-dimension prompt-complexity scorer mapping requests to cost tiers,
//! a model health registry that routes around failing models, and a cost
//! savings ledger.

pub mod health;
pub mod ledger;
pub mod scorer;

pub use health::{ClassifyError, HealthRegistry, ModelHealth, ModelState};
pub use ledger::{CostLedger, CostSavingsReport};
pub use scorer::{DimensionScore, Router, RoutingDecision};
