//! Fleet Manager
//!
//! Safe, quota-aware multiplexing of the Sandbox Client, plus background
//! liveness and cost accounting.

pub mod cost;
pub mod manager;
pub mod sandbox_client;

pub use cost::{CostSnapshot, CostTracker};
pub use manager::FleetManager;
pub use sandbox_client::{
    CommandResult, Sandbox, SandboxClient, SandboxConfig, SandboxState, SandboxStatus,
};
