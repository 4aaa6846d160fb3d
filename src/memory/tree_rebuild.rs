//! Tree rebuild: applies a bounded plan of structural edits to the memory
//! tree.
//!
//! A plan is at most 10 operations of `{add, remove, merge, rename}`. Safety
//! rules are enforced regardless of where the plan came from (rule-based
//! no-op, or an LLM's JSON): `remove` refuses on any live entries, `merge`
//! transfers counts and re-categorizes matching warm entries onto the
//! target, and `rename` re-categorizes then drops the old node.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{FleetError, Result};
use crate::memory::distiller::{strip_markdown_fences, LlmCall};
use crate::memory::tree::MemoryTree;
use crate::memory::warm::WarmMemory;

const LLM_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PLAN_OPS: usize = 10;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RebuildOp {
    Add { path: String, summary: String },
    Remove { path: String },
    Merge { from: String, to: String },
    Rename { from: String, to: String, summary: String },
}

/// Applies `ops` (capped at `MAX_PLAN_OPS`) against `tree`/`warm` under the
/// safety rules below, returning the count actually applied.
/// Stops at (and surfaces) the first rule violation rather than applying a
/// partial, unsafe plan silently past it.
pub fn apply_plan(tree: &MemoryTree, warm: &WarmMemory, ops: &[RebuildOp]) -> Result<usize> {
    if ops.len() > MAX_PLAN_OPS {
        return Err(FleetError::TreeIndex(format!(
            "rebuild plan has {} ops, exceeds cap of {MAX_PLAN_OPS}",
            ops.len()
        )));
    }

    let mut applied = 0;
    for op in ops {
        apply_one(tree, warm, op)?;
        applied += 1;
    }
    Ok(applied)
}

fn apply_one(tree: &MemoryTree, warm: &WarmMemory, op: &RebuildOp) -> Result<()> {
    match op {
        RebuildOp::Add { path, summary } => {
            tree.add_node(path, summary)?;
        }
        RebuildOp::Remove { path } => {
            let node = tree
                .find_node(path)
                .ok_or_else(|| FleetError::TreeIndex(format!("node {path:?} does not exist")))?;
            if node.warm_count + node.cold_count > 0 {
                return Err(FleetError::TreeIndex(format!(
                    "refusing to remove {path:?}: {} live entries",
                    node.warm_count + node.cold_count
                )));
            }
            tree.remove_node(path)?;
        }
        RebuildOp::Merge { from, to } => {
            let source = tree
                .find_node(from)
                .ok_or_else(|| FleetError::TreeIndex(format!("merge source {from:?} does not exist")))?;
            tree.find_node(to)
                .ok_or_else(|| FleetError::TreeIndex(format!("merge target {to:?} does not exist")))?;

            tree.increment_counts(to, source.warm_count, source.cold_count)?;
            warm.recategorize(from, to);
            tree.increment_counts(from, -source.warm_count, -source.cold_count)?;
            tree.remove_node(from)?;
        }
        RebuildOp::Rename { from, to, summary } => {
            let source = tree
                .find_node(from)
                .ok_or_else(|| FleetError::TreeIndex(format!("rename source {from:?} does not exist")))?;
            if tree.find_node(to).is_none() {
                tree.add_node(to, summary)?;
            }
            tree.increment_counts(to, source.warm_count, source.cold_count)?;
            warm.recategorize(from, to);
            tree.increment_counts(from, -source.warm_count, -source.cold_count)?;
            tree.remove_node(from)?;
        }
    }
    Ok(())
}

/// Parses a plan from raw LLM text (markdown fences stripped) if `llm` is
/// present and responds validly within the timeout; otherwise returns an
/// empty plan — a no-op rebuild, per spec's "no-op if unconfigured".
pub async fn rebuild_plan_via_llm(tree: &MemoryTree, llm: Option<&dyn LlmCall>) -> Vec<RebuildOp> {
    let Some(llm) = llm else {
        return Vec::new();
    };

    let nodes = tree.all_nodes();
    let catalogue = nodes
        .iter()
        .map(|n| format!("{} (warm={}, cold={}): {}", n.path, n.warm_count, n.cold_count, n.summary))
        .collect::<Vec<_>>()
        .join("\n");
    let system_prompt = "Propose up to 10 tree maintenance ops as a JSON array of \
        {op: add|remove|merge|rename, path/from/to, summary}. Only remove empty categories.";

    let outcome = tokio::time::timeout(LLM_TIMEOUT, llm.call(system_prompt, &catalogue)).await;
    match outcome {
        Ok(Ok(raw)) => {
            let stripped = strip_markdown_fences(&raw);
            serde_json::from_str::<Vec<RebuildOp>>(stripped).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScoringConfig, TreeConfig, WarmConfig};
    use crate::memory::warm::WarmEntry;
    use chrono::Utc;

    fn fixtures() -> (MemoryTree, WarmMemory) {
        let tree = MemoryTree::new(TreeConfig::default());
        let warm = WarmMemory::new(WarmConfig::default(), ScoringConfig::default());
        tree.add_node("project", "root").unwrap();
        tree.add_node("project/alpha", "alpha work").unwrap();
        tree.add_node("project/beta", "beta work").unwrap();
        (tree, warm)
    }

    #[test]
    fn remove_refuses_when_entries_are_live() {
        let (tree, warm) = fixtures();
        tree.increment_counts("project/alpha", 5, 0).unwrap();
        let err = apply_plan(&tree, &warm, &[RebuildOp::Remove { path: "project/alpha".to_string() }]).unwrap_err();
        assert!(matches!(err, FleetError::TreeIndex(_)));
    }

    #[test]
    fn remove_succeeds_when_no_live_entries() {
        let (tree, warm) = fixtures();
        apply_plan(&tree, &warm, &[RebuildOp::Remove { path: "project/alpha".to_string() }]).unwrap();
        assert!(tree.find_node("project/alpha").is_none());
    }

    #[test]
    fn merge_transfers_counts_and_recategorizes_warm_entries() {
        let (tree, warm) = fixtures();
        tree.increment_counts("project/alpha", 3, 2).unwrap();
        warm.add(WarmEntry {
            id: "e1".to_string(),
            timestamp: Utc::now(),
            event_type: "note".to_string(),
            category: "project/alpha".to_string(),
            content: "x".to_string(),
            importance: 0.5,
            access_count: 0,
            last_accessed: Utc::now(),
            created_at: Utc::now(),
        });

        apply_plan(&tree, &warm, &[RebuildOp::Merge { from: "project/alpha".to_string(), to: "project/beta".to_string() }]).unwrap();

        assert!(tree.find_node("project/alpha").is_none());
        let target = tree.find_node("project/beta").unwrap();
        assert_eq!(target.warm_count, 3);
        assert_eq!(target.cold_count, 2);
        assert_eq!(warm.get_by_category("project/beta").len(), 1);
    }

    #[test]
    fn plan_over_ten_ops_is_rejected() {
        let (tree, warm) = fixtures();
        let ops: Vec<RebuildOp> = (0..11)
            .map(|i| RebuildOp::Add { path: format!("project/gen{i}"), summary: "x".to_string() })
            .collect();
        let err = apply_plan(&tree, &warm, &ops).unwrap_err();
        assert!(matches!(err, FleetError::TreeIndex(_)));
    }
}
