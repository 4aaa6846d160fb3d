//! Memory tree bounds and rebuild-plan safety rules.

use rust_agency::config::TreeConfig;
use rust_agency::memory::tree_rebuild::{apply_plan, RebuildOp};
use rust_agency::memory::{MemoryTree, WarmMemory};
use rust_agency::{config::WarmConfig, config::ScoringConfig};

#[test]
fn add_node_past_max_depth_is_rejected() {
    let tree = MemoryTree::new(TreeConfig::default());
    tree.add_node("a/b/c/d", "ok").unwrap();
    let err = tree.add_node("a/b/c/d/e", "too deep").unwrap_err();
    assert!(matches!(err, rust_agency::FleetError::TreeIndex(_)));
}

#[test]
fn add_node_past_max_nodes_is_rejected() {
    let tree = MemoryTree::new(TreeConfig { max_nodes: 2, ..TreeConfig::default() });
    tree.add_node("a", "one").unwrap();
    tree.add_node("b", "two").unwrap();
    let err = tree.add_node("c", "three").unwrap_err();
    assert!(matches!(err, rust_agency::FleetError::TreeIndex(_)));
}

#[test]
fn rebuild_plan_refuses_to_remove_a_node_with_live_entries() {
    let tree = MemoryTree::new(TreeConfig::default());
    let warm = WarmMemory::new(WarmConfig::default(), ScoringConfig::default());
    tree.add_node("project/billing", "billing project").unwrap();
    tree.increment_counts("project/billing", 1, 0).unwrap();

    let err = apply_plan(&tree, &warm, &[RebuildOp::Remove { path: "project/billing".to_string() }]).unwrap_err();
    assert!(matches!(err, rust_agency::FleetError::TreeIndex(_)));
    assert!(tree.find_node("project/billing").is_some());
}

#[test]
fn rebuild_plan_removes_a_dead_node_cleanly() {
    let tree = MemoryTree::new(TreeConfig::default());
    let warm = WarmMemory::new(WarmConfig::default(), ScoringConfig::default());
    tree.add_node("project/stale", "nothing left here").unwrap();

    let applied = apply_plan(&tree, &warm, &[RebuildOp::Remove { path: "project/stale".to_string() }]).unwrap();
    assert_eq!(applied, 1);
    assert!(tree.find_node("project/stale").is_none());
}

#[test]
fn rebuild_plan_over_ten_ops_is_rejected_before_anything_is_applied() {
    let tree = MemoryTree::new(TreeConfig::default());
    let warm = WarmMemory::new(WarmConfig::default(), ScoringConfig::default());
    let ops: Vec<RebuildOp> = (0..11)
        .map(|i| RebuildOp::Add { path: format!("n{i}"), summary: "x".to_string() })
        .collect();

    let err = apply_plan(&tree, &warm, &ops).unwrap_err();
    assert!(matches!(err, rust_agency::FleetError::TreeIndex(_)));
    assert_eq!(tree.node_count(), 0);
}
