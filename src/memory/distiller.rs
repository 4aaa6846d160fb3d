//! Distillation pipeline
//!
//! Stage-1 (raw conversation) -> Stage-2 (`DistilledFact`, <=100 bytes)
//! -> Stage-3 (`CoreSummary`, <=30 bytes). The rule-based path is always
//! available; the LLM-wrapped variants fall through to it transparently
//! whenever the callback is absent, errors, times out, or fails
//! validation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DISTILLED_FACT_CAP: usize = 100;
const CORE_SUMMARY_CAP: usize = 30;
const LLM_TIMEOUT: Duration = Duration::from_secs(10);

const PEOPLE_MARKERS: &[&str] = &["i", "you", "we", "they", "he", "she", "user", "team", "customer"];
const TOPIC_KEYWORDS: &[&str] = &[
    "bug", "feature", "deploy", "release", "design", "api", "database", "performance", "security",
    "test", "refactor", "migration", "config", "auth", "billing", "ui", "infra",
];
const ACTION_KEYWORDS: &[&str] = &["fixed", "added", "removed", "updated", "reverted", "deployed", "reviewed", "decided", "merged"];
const EMOTION_KEYWORDS: &[(&str, &str)] = &[
    ("frustrated", "frustration"),
    ("happy", "satisfaction"),
    ("worried", "concern"),
    ("confused", "confusion"),
    ("excited", "excitement"),
];
const OUTCOME_KEYWORDS: &[&str] = &["resolved", "blocked", "pending", "completed", "failed", "succeeded"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DistilledFact {
    pub fact: String,
    pub emotion: Option<String>,
    pub people: Vec<String>,
    pub topics: Vec<String>,
    pub actions: Vec<String>,
    pub outcome: Option<String>,
}

impl DistilledFact {
    fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSummary {
    pub text: String,
}

fn extract_matches<'a>(text_lower: &str, bag: &'a [&'a str]) -> Vec<String> {
    bag.iter().filter(|kw| text_lower.contains(*kw)).map(|kw| kw.to_string()).collect()
}

/// Rule-based Stage-1 -> Stage-2 extraction via keyword bags.
pub fn distill_rule_based(conversation: &str) -> DistilledFact {
    let lower = conversation.to_lowercase();

    let people = extract_matches(&lower, PEOPLE_MARKERS);
    let topics = extract_matches(&lower, TOPIC_KEYWORDS);
    let actions = extract_matches(&lower, ACTION_KEYWORDS);
    let outcome = OUTCOME_KEYWORDS.iter().find(|kw| lower.contains(**kw)).map(|s| s.to_string());
    let emotion = EMOTION_KEYWORDS.iter().find(|(kw, _)| lower.contains(*kw)).map(|(_, label)| label.to_string());

    let fact = conversation.lines().next().unwrap_or(conversation).trim().to_string();

    let mut distilled = DistilledFact { fact, emotion, people, topics, actions, outcome };
    compress_to_cap(&mut distilled);
    distilled
}

/// Progressively truncates the main fact, drops actions, halves
/// people/topics, then finally drops emotion and outcome, until the
/// JSON serialization fits the 100-byte cap.
fn compress_to_cap(fact: &mut DistilledFact) {
    if fact.serialized_len() <= DISTILLED_FACT_CAP {
        return;
    }

    let mut truncate_at = fact.fact.len();
    while fact.serialized_len() > DISTILLED_FACT_CAP && truncate_at > 0 {
        truncate_at = truncate_at.saturating_sub(10);
        fact.fact = fact.fact.chars().take(truncate_at).collect();
        if truncate_at == 0 {
            break;
        }
    }
    if fact.serialized_len() <= DISTILLED_FACT_CAP {
        return;
    }

    fact.actions.clear();
    if fact.serialized_len() <= DISTILLED_FACT_CAP {
        return;
    }

    halve(&mut fact.people);
    halve(&mut fact.topics);
    if fact.serialized_len() <= DISTILLED_FACT_CAP {
        return;
    }

    fact.emotion = None;
    fact.outcome = None;
}

fn halve(items: &mut Vec<String>) {
    let keep = items.len() / 2;
    items.truncate(keep);
}

/// Stage-3: compresses a `DistilledFact` down to a <=30-byte core line.
pub fn summarize_core(fact: &DistilledFact) -> CoreSummary {
    let mut text = fact.fact.clone();
    while serde_json::to_vec(&CoreSummary { text: text.clone() }).map(|v| v.len()).unwrap_or(usize::MAX) > CORE_SUMMARY_CAP
        && !text.is_empty()
    {
        text.pop();
    }
    CoreSummary { text }
}

/// `LLMCallFunc(ctx, systemPrompt, userPrompt) -> String`. Callers plug
/// in a live model, or leave it unset to always use the rule-based path.
#[async_trait]
pub trait LlmCall: Send + Sync {
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;
}

/// Strips ` ```json ` / ``` ``` ``` markdown fences an LLM response may
/// be wrapped in before JSON-decoding.
pub fn strip_markdown_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_lang = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    without_lang.strip_suffix("```").unwrap_or(without_lang).trim()
}

/// Distills via the LLM callback if present, falling through to the
/// rule-based path on any failure: absent callback, call error, invalid
/// JSON, or timeout.
pub async fn distill(conversation: &str, llm: Option<&dyn LlmCall>) -> DistilledFact {
    let Some(llm) = llm else {
        return distill_rule_based(conversation);
    };

    let system_prompt = "Extract a DistilledFact as JSON: {fact, emotion, people, topics, actions, outcome}.";

    match tokio::time::timeout(LLM_TIMEOUT, llm.call(system_prompt, conversation)).await {
        Ok(Ok(raw)) => {
            let stripped = strip_markdown_fences(&raw);
            match serde_json::from_str::<DistilledFact>(stripped) {
                Ok(mut fact) => {
                    compress_to_cap(&mut fact);
                    fact
                }
                Err(_) => distill_rule_based(conversation),
            }
        }
        _ => distill_rule_based(conversation),
    }
}
