//! 14-dimension prompt complexity scorer
//!
//! Grounded on the classification shape of the pack's LLM router reference
//! (keyword-bag dimensions, `dimension_score` saturation helper, logistic
//! normalization) but rebuilt against the spec's exact dimension table,
//! weights, and threshold semantics.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use crate::config::{RouterConfig, Tier};

const REASONING_KEYWORDS: &[&str] = &[
    "prove", "theorem", "derive", "derivation", "induction", "contradiction",
    "step by step", "chain of thought", "formally", "mathematically",
    "proof", "logically", "big-o", "axiom",
];
const CODE_LANGUAGE_KEYWORDS: &[&str] = &[
    "function", "class", "import", "def ", "select ", "async", "await",
    "const ", "let ", "var ", "return ",
];
const SIMPLE_GREETINGS: &[&str] = &["hi", "hello", "hey", "yo", "sup"];
const SIMPLE_PREFIXES: &[&str] = &[
    "what is", "define", "translate", "capital of", "how old", "who is", "when was", "yes or no",
];
const MULTI_STEP_CONNECTIVES: &[&str] = &["first", "then", "next", "after that", "finally", "afterwards"];
const TECHNICAL_KEYWORDS: &[&str] = &[
    "algorithm", "optimize", "architecture", "distributed", "kubernetes",
    "microservice", "database", "infrastructure", "scalability", "concurrency",
    "throughput", "latency",
];
const CREATIVE_KEYWORDS: &[&str] = &["write a", "compose", "story", "poem", "imagine", "brainstorm", "creative"];
const QUESTION_KEYWORDS: &[&str] = &["why", "how", "explain", "what if", "suppose", "unless"];
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "must", "should", "require", "at least", "at most", "no more than",
    "maximum", "minimum", "limit", "budget", "within",
];
const IMPERATIVE_KEYWORDS: &[&str] = &[
    "implement", "design", "refactor", "optimize", "build", "create",
    "develop", "construct", "deploy", "configure", "set up",
];
const OUTPUT_FORMAT_KEYWORDS: &[&str] = &[
    "json", "xml", "markdown", "table", "csv", "yaml", "schema", "format as", "structured",
];
const REFERENCE_KEYWORDS: &[&str] = &[
    "according to", "based on", "assuming", "above", "below", "previous",
    "the following", "earlier", "attached",
];
const NEGATION_KEYWORDS: &[&str] = &[
    "not", "don't", "do not", "never", "without", "except", "no longer", "exclude",
];
const DOMAIN_BAGS: &[(&str, &[&str])] = &[
    ("finance", &["portfolio", "derivative", "arbitrage", "hedge", "equity", "liquidity"]),
    ("medicine", &["diagnosis", "pathology", "clinical", "dosage", "syndrome", "biopsy"]),
    ("law", &["statute", "tort", "plaintiff", "jurisdiction", "litigation", "precedent"]),
    ("science", &["hypothesis", "quantum", "genome", "isotope", "thermodynamics", "entropy"]),
    ("ml", &["gradient", "embedding", "transformer", "backpropagation", "tokenizer", "overfitting"]),
];

/// One row of the 14-dimension score vector.
#[derive(Debug, Clone)]
pub struct DimensionScore {
    pub name: &'static str,
    pub raw: f64,
    pub weight: f64,
    pub contribution: f64,
}

/// Full routing decision for a single prompt.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub dimensions: Vec<DimensionScore>,
    pub raw_sum: f64,
    pub normalized: f64,
    pub tier: Tier,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub latency: std::time::Duration,
}

fn count_matches(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| text.contains(*kw)).count()
}

fn saturating(count: usize, cap: usize) -> f64 {
    (count as f64 / cap as f64).min(1.0)
}

fn dimension_score(count: usize, low: usize, high: usize, low_val: f64, high_val: f64) -> f64 {
    if count >= high {
        high_val
    } else if count >= low {
        low_val
    } else {
        0.0
    }
}

fn has_fenced_code_block(text: &str) -> bool {
    text.matches("```").count() >= 2
}

fn default_weights() -> HashMap<&'static str, f64> {
    HashMap::from([
        ("reasoning_markers", 0.30),
        ("code_presence", 0.25),
        ("simple_indicators", -0.20),
        ("multi_step_patterns", 0.20),
        ("technical_terms", 0.15),
        ("token_count", 0.15),
        ("creative_markers", 0.10),
        ("question_complexity", 0.20),
        ("constraint_count", 0.15),
        ("imperative_verbs", 0.08),
        ("output_format", 0.10),
        ("domain_specificity", 0.12),
        ("reference_complexity", 0.10),
        ("negation_complexity", 0.06),
    ])
}

/// Computes the raw [0,1] value of each of the 14 named dimensions for
/// `prompt`, case-folded.
fn raw_dimensions(prompt: &str) -> HashMap<&'static str, f64> {
    let text = prompt.to_lowercase();
    let mut raw = HashMap::new();

    let reasoning_count = count_matches(&text, REASONING_KEYWORDS);
    raw.insert("reasoning_markers", saturating(reasoning_count, 5));

    let code_count = count_matches(&text, CODE_LANGUAGE_KEYWORDS);
    let code_raw = if has_fenced_code_block(&text) {
        1.0
    } else if text.contains('`') {
        0.6
    } else {
        dimension_score(code_count, 1, 3, 0.3, 0.7)
    };
    raw.insert("code_presence", code_raw);

    let short_prompt = prompt.trim().len() < 20;
    let has_greeting = SIMPLE_GREETINGS.iter().any(|g| {
        text.split_whitespace().any(|word| word.trim_matches(|c: char| !c.is_alphanumeric()) == *g)
    });
    let has_simple_prefix = SIMPLE_PREFIXES.iter().any(|p| text.starts_with(p) || text.contains(p));
    raw.insert(
        "simple_indicators",
        if has_greeting || has_simple_prefix || short_prompt { 1.0 } else { 0.0 },
    );

    let numbered_list = text.lines().any(|l| {
        let trimmed = l.trim_start();
        trimmed.len() > 2
            && trimmed.as_bytes()[0].is_ascii_digit()
            && (trimmed.as_bytes().get(1) == Some(&b'.') || trimmed.as_bytes().get(1) == Some(&b')'))
    });
    let bullet_list = text.lines().any(|l| {
        let trimmed = l.trim_start();
        trimmed.starts_with("- ") || trimmed.starts_with("* ")
    });
    let has_step_marker = text.contains("step 1") || text.contains("step 2") || text.contains("steps:");
    let connective_count = count_matches(&text, MULTI_STEP_CONNECTIVES);
    let multi_signal_count =
        (numbered_list as usize) + (bullet_list as usize) + (has_step_marker as usize) + (connective_count >= 2) as usize;
    raw.insert("multi_step_patterns", dimension_score(multi_signal_count, 1, 2, 0.5, 1.0));

    let tech_count = count_matches(&text, TECHNICAL_KEYWORDS);
    raw.insert("technical_terms", dimension_score(tech_count, 2, 4, 0.5, 1.0));

    let token_est = (text.len() + 3) / 4;
    let token_floor = 50usize;
    let token_ceiling = 2000usize;
    let token_raw = if token_est <= token_floor {
        0.0
    } else {
        ((token_est - token_floor) as f64 / (token_ceiling - token_floor) as f64).min(1.0)
    };
    raw.insert("token_count", token_raw);

    let creative_count = count_matches(&text, CREATIVE_KEYWORDS);
    raw.insert("creative_markers", dimension_score(creative_count, 1, 2, 0.5, 0.8));

    let question_keyword_count = count_matches(&text, QUESTION_KEYWORDS);
    let question_mark_count = text.matches('?').count();
    let question_raw = if question_mark_count >= 2 || question_keyword_count >= 2 {
        0.8
    } else if question_keyword_count >= 1 {
        0.4
    } else {
        0.0
    };
    raw.insert("question_complexity", question_raw);

    let constraint_count = count_matches(&text, CONSTRAINT_KEYWORDS);
    raw.insert("constraint_count", dimension_score(constraint_count, 1, 3, 0.3, 0.7));

    let imperative_count = count_matches(&text, IMPERATIVE_KEYWORDS);
    raw.insert("imperative_verbs", dimension_score(imperative_count, 1, 3, 0.3, 0.6));

    let format_count = count_matches(&text, OUTPUT_FORMAT_KEYWORDS);
    raw.insert("output_format", dimension_score(format_count, 1, 2, 0.4, 0.8));

    let domain_raw = DOMAIN_BAGS
        .iter()
        .map(|(_, bag)| dimension_score(count_matches(&text, bag), 1, 2, 0.5, 0.9))
        .fold(0.0_f64, f64::max);
    raw.insert("domain_specificity", domain_raw);

    let reference_count = count_matches(&text, REFERENCE_KEYWORDS);
    raw.insert("reference_complexity", dimension_score(reference_count, 1, 2, 0.3, 0.6));

    let negation_count = count_matches(&text, NEGATION_KEYWORDS);
    raw.insert("negation_complexity", dimension_score(negation_count, 2, 4, 0.3, 0.6));

    raw
}

fn sigmoid(x: f64, steepness: f64, center: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (x - center)).exp())
}

/// Maps a normalized score to a `Tier` using three ascending thresholds.
/// The comparison is strictly-less-than at every boundary so a score
/// exactly equal to a threshold belongs to the tier above it.
pub fn tier_for_score(normalized: f64, thresholds: &[f64; 3]) -> Tier {
    if normalized < thresholds[0] {
        Tier::Simple
    } else if normalized < thresholds[1] {
        Tier::Medium
    } else if normalized < thresholds[2] {
        Tier::Complex
    } else {
        Tier::Reasoning
    }
}

/// Resolves a `Tier` to a model string via the tier→model table, falling
/// back to the default tier's model, and finally a hard-coded fallback.
fn resolve_model(tier: Tier, config: &RouterConfig) -> String {
    config
        .tier_models
        .get(&tier)
        .cloned()
        .or_else(|| config.tier_models.get(&config.default_tier).cloned())
        .unwrap_or_else(|| "qwen2.5:7b".to_string())
}

/// Stateless prompt classifier plus stateful model resolution.
pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Classifies `prompt` and resolves it to a model. When
    /// `config.enabled` is false, routing short-circuits to the default
    /// tier without running the scorer.
    pub fn route(&self, prompt: &str) -> RoutingDecision {
        let start = Instant::now();
        let now = Utc::now();

        if !self.config.enabled {
            let tier = self.config.default_tier;
            return RoutingDecision {
                dimensions: Vec::new(),
                raw_sum: 0.0,
                normalized: 0.0,
                tier,
                model: resolve_model(tier, &self.config),
                timestamp: now,
                latency: start.elapsed(),
            };
        }

        let weights = self.effective_weights();
        let raw = raw_dimensions(prompt);

        let mut dimensions = Vec::with_capacity(raw.len());
        let mut raw_sum = 0.0;
        for (name, weight) in weights.iter() {
            let dim_raw = raw.get(name).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            let contribution = dim_raw * weight;
            raw_sum += contribution;
            dimensions.push(DimensionScore {
                name,
                raw: dim_raw,
                weight: *weight,
                contribution,
            });
        }
        dimensions.sort_by_key(|d| d.name);

        let normalized = sigmoid(raw_sum, 3.5, 0.30).clamp(0.0, 1.0);
        let tier = tier_for_score(normalized, &self.config.thresholds);
        let model = resolve_model(tier, &self.config);

        debug!(tier = %tier, normalized, "routed prompt");

        RoutingDecision {
            dimensions,
            raw_sum,
            normalized,
            tier,
            model,
            timestamp: now,
            latency: start.elapsed(),
        }
    }

    fn effective_weights(&self) -> HashMap<&'static str, f64> {
        let mut weights = default_weights();
        if let Some(ref overrides) = self.config.weights {
            for (name, value) in overrides {
                if let Some(slot) = weights.get_mut(name.as_str()) {
                    *slot = *value;
                }
            }
        }
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_thresholds_select_expected_tiers() {
        let thresholds = [0.25, 0.50, 0.75];
        let cases = [
            (0.24, Tier::Simple),
            (0.25, Tier::Medium),
            (0.49, Tier::Medium),
            (0.50, Tier::Complex),
            (0.74, Tier::Complex),
            (0.75, Tier::Reasoning),
        ];
        for (score, expected) in cases {
            assert_eq!(tier_for_score(score, &thresholds), expected, "score {score}");
        }
    }

    #[test]
    fn greeting_routes_to_simple() {
        let router = Router::new(RouterConfig::default());
        let decision = router.route("hi");
        assert_eq!(decision.tier, Tier::Simple);
        assert!(decision.normalized >= 0.0 && decision.normalized <= 1.0);
    }

    #[test]
    fn formal_proof_request_routes_to_complex_or_reasoning() {
        let router = Router::new(RouterConfig::default());
        let decision = router.route(
            "Prove by mathematical induction that 1+2+...+n = n(n+1)/2. Derive and prove formally step by step.",
        );
        assert!(matches!(decision.tier, Tier::Complex | Tier::Reasoning));
    }

    #[test]
    fn disabled_router_short_circuits_to_default_tier() {
        let mut config = RouterConfig::default();
        config.enabled = false;
        config.default_tier = Tier::Complex;
        let router = Router::new(config);
        let decision = router.route("anything at all");
        assert_eq!(decision.tier, Tier::Complex);
        assert!(decision.dimensions.is_empty());
    }

    #[test]
    fn normalized_score_always_in_unit_interval() {
        let router = Router::new(RouterConfig::default());
        for prompt in [
            "",
            "hello",
            "implement a distributed kubernetes microservice architecture with json output",
            "why how explain what if suppose unless ??? step 1 step 2 1. 2. - a - b",
        ] {
            let decision = router.route(prompt);
            assert!((0.0..=1.0).contains(&decision.normalized));
        }
    }
}
