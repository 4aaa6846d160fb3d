//! Core error taxonomy
//!
//! Every public operation in this crate returns `Result<T, FleetError>`.
//! Background loops never propagate these upward; they log and continue
//! (see `fleet::manager` and `memory::consolidator`).

use thiserror::Error;

/// The error taxonomy surfaced by the core.
///
/// `Display` messages are the only thing that leaves the core; no
/// structured error codes are exposed to callers.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Input contract failed: missing required field, empty id, duplicate email.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing/invalid API key, or a user acting on a sandbox it doesn't own.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Locally tracked sandbox count is at or above the tenant's `max_agents`.
    #[error("agent limit reached: {current}/{max} agents for tenant")]
    AgentLimitReached { current: usize, max: usize },

    /// Estimated spend is at or above the configured budget.
    #[error("budget exhausted: estimated ${estimated:.2} >= budget ${budget:.2}")]
    BudgetExhausted { estimated: f64, budget: f64 },

    /// Non-2xx response from the sandbox provider that could not be parsed
    /// as a structured `{code, message}` body.
    #[error("transport error: HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    /// Parsed `{code, message}` error body from the sandbox provider.
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    /// Hot memory cannot fit within its size cap even after full pruning.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// The caller-supplied cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Tree index safety rule violated (depth, fanout, node count, serialized size).
    #[error("tree index error: {0}")]
    TreeIndex(String),

    /// Wraps an underlying I/O or (de)serialization failure that doesn't
    /// fit a more specific variant above.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
