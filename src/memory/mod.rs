//! Tiered Memory Engine
//!
//! Four tiers — Hot (always-loaded), Warm (in-process, TTL-bounded), Cold
//! (remote SQL mirror), and a bounded hierarchical tree index over memory
//! categories — plus the decay/reinforcement scorer, rule-based and
//! LLM-wrapped distillation/search/rebuild, and the background consolidator
//! that migrates entries across tiers.

pub mod cold;
pub mod consolidator;
pub mod distiller;
pub mod engine;
pub mod hot;
pub mod scoring;
pub mod sql_pipeline;
pub mod tree;
pub mod tree_rebuild;
pub mod tree_search;
pub mod warm;

pub use cold::{ColdEntry, ColdMemory};
pub use consolidator::Consolidator;
pub use distiller::{distill, distill_rule_based, DistilledFact, LlmCall};
pub use engine::{MemoryEngine, RetrievedEntry};
pub use hot::{Event, HotMemory, Lesson, PendingTask, Project};
pub use scoring::{score, tier_for_score, ScoreTier};
pub use sql_pipeline::{HranaValue, SqlPipelineClient, Statement};
pub use tree::{MemoryTree, TreeNode};
pub use tree_rebuild::RebuildOp;
pub use tree_search::ScoredPath;
pub use warm::{WarmEntry, WarmMemory};
