//! Multi-Tenant Broker
//!
//! Identity, quotas, credential injection, and sandbox ownership enforcement
//! layered on top of the Fleet Manager.

pub mod service;
pub mod tenant;

pub use service::Service;
pub use tenant::{RegisterRequest, Tenant, TenantStore, UserAgent, UserAgentMode, UserAgentStatus};
