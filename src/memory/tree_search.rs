//! Tree search: ranks tree-index categories against a retrieval query.
//!
//! The rule-based scorer is always available; an optional LLM callback can
//! be plugged in and is used transparently when present, falling through
//! to the rule-based path on any failure, timeout, or invalid response —
//! same shape as `distiller::distill`.

use std::time::Duration;

use serde::Deserialize;

use crate::memory::distiller::{strip_markdown_fences, LlmCall};
use crate::memory::scoring;
use crate::memory::tree::{MemoryTree, TreeNode};

const LLM_TIMEOUT: Duration = Duration::from_secs(10);
const RELEVANCE_CUTOFF: f64 = 0.3;

/// One scored category path returned by a search pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPath {
    pub path: String,
    pub relevance: f64,
}

fn keyword_overlap(query_words: &[String], node: &TreeNode) -> f64 {
    if query_words.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", node.path.replace('/', " "), node.summary).to_lowercase();
    let matched = query_words.iter().filter(|w| haystack.contains(w.as_str())).count();
    matched as f64 / query_words.len() as f64
}

fn importance_proxy(node: &TreeNode) -> f64 {
    ((node.warm_count + node.cold_count) as f64 / 10.0).clamp(0.0, 1.0)
}

fn recency_proxy(node: &TreeNode) -> f64 {
    (-scoring::age_days(node.last_updated) / 30.0).exp().clamp(0.0, 1.0)
}

/// Keyword overlap (60%) + recency (20%) + importance-by-count-proxy (20%),
/// filtered to relevance > `RELEVANCE_CUTOFF`.
pub fn search_rule_based(tree: &MemoryTree, query: &str) -> Vec<ScoredPath> {
    let query_words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect();

    let mut scored: Vec<ScoredPath> = tree
        .all_nodes()
        .into_iter()
        .map(|node| {
            let relevance = 0.6 * keyword_overlap(&query_words, &node) + 0.2 * recency_proxy(&node) + 0.2 * importance_proxy(&node);
            ScoredPath { path: node.path, relevance }
        })
        .filter(|s| s.relevance > RELEVANCE_CUTOFF)
        .collect();

    scored.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[derive(Debug, Deserialize)]
struct LlmScoredPath {
    path: String,
    relevance: f64,
}

/// Searches via the LLM callback if present, falling through to
/// `search_rule_based` on absence, error, timeout, or a response with an
/// out-of-range relevance or a path the tree doesn't actually have.
pub async fn search(tree: &MemoryTree, query: &str, llm: Option<&dyn LlmCall>) -> Vec<ScoredPath> {
    let Some(llm) = llm else {
        return search_rule_based(tree, query);
    };

    let nodes = tree.all_nodes();
    let catalogue = nodes
        .iter()
        .map(|n| format!("{}: {}", n.path, n.summary))
        .collect::<Vec<_>>()
        .join("\n");
    let system_prompt = "Rank the given categories by relevance to the query. \
        Respond with a JSON array of {path, relevance} where relevance is in [0,1].";
    let user_prompt = format!("Query: {query}\n\nCategories:\n{catalogue}");

    let outcome = tokio::time::timeout(LLM_TIMEOUT, llm.call(system_prompt, &user_prompt)).await;
    match outcome {
        Ok(Ok(raw)) => {
            let stripped = strip_markdown_fences(&raw);
            match serde_json::from_str::<Vec<LlmScoredPath>>(stripped) {
                Ok(parsed) => {
                    let valid = parsed.iter().all(|p| {
                        (0.0..=1.0).contains(&p.relevance) && nodes.iter().any(|n| n.path == p.path)
                    });
                    if !valid {
                        return search_rule_based(tree, query);
                    }
                    let mut scored: Vec<ScoredPath> = parsed
                        .into_iter()
                        .map(|p| ScoredPath { path: p.path, relevance: p.relevance })
                        .filter(|s| s.relevance > RELEVANCE_CUTOFF)
                        .collect();
                    scored.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
                    scored
                }
                Err(_) => search_rule_based(tree, query),
            }
        }
        _ => search_rule_based(tree, query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;

    fn tree_with(paths: &[(&str, &str)]) -> MemoryTree {
        let tree = MemoryTree::new(TreeConfig::default());
        for (path, summary) in paths {
            if let Some((parent, _)) = path.rsplit_once('/') {
                if tree.find_node(parent).is_none() {
                    tree.add_node(parent, parent).unwrap();
                }
            }
            tree.add_node(path, summary).unwrap();
        }
        tree
    }

    #[test]
    fn rule_based_search_ranks_keyword_matches_above_cutoff() {
        let tree = tree_with(&[("billing", "billing and invoices"), ("infra", "kubernetes cluster notes")]);
        let results = search_rule_based(&tree, "invoice billing question");
        assert!(results.iter().any(|r| r.path == "billing"));
    }

    #[tokio::test]
    async fn search_without_llm_falls_back_to_rule_based() {
        let tree = tree_with(&[("billing", "billing and invoices")]);
        let results = search(&tree, "billing", None).await;
        assert_eq!(results, search_rule_based(&tree, "billing"));
    }
}
