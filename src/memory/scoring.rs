//! Shared decay/reinforcement score function
//!
//! Every tier ranks its entries with the same formula so promotion and
//! eviction decisions agree across Hot, Warm, Cold and the tree index.

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;

/// Coarse tier an entry's score maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTier {
    Hot,
    Warm,
    Cold,
    Frozen,
}

/// `score = importance * exp(-ageDays / halfLifeDays) * (1 + boost * accessCount)`
pub fn score(importance: f64, age_days: f64, access_count: u64, config: &ScoringConfig) -> f64 {
    let decay = (-age_days / config.half_life_days).exp();
    let reinforcement = 1.0 + config.reinforcement_boost * access_count as f64;
    importance * decay * reinforcement
}

/// Maps a score to its tier under the fixed thresholds
/// `{hot >= 0.7, warm >= 0.3, cold >= 0.05, frozen < 0.05}`.
pub fn tier_for_score(score: f64) -> ScoreTier {
    if score >= 0.7 {
        ScoreTier::Hot
    } else if score >= 0.3 {
        ScoreTier::Warm
    } else if score >= 0.05 {
        ScoreTier::Cold
    } else {
        ScoreTier::Frozen
    }
}

/// Age in fractional days between `created_at`/`timestamp` and now.
pub fn age_days(since: DateTime<Utc>) -> f64 {
    let delta = Utc::now().signed_duration_since(since);
    delta.num_seconds() as f64 / 86_400.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_score_tiers_match_pinned_boundaries() {
        let cases = [
            (0.69, ScoreTier::Warm),
            (0.70, ScoreTier::Hot),
            (0.29, ScoreTier::Cold),
            (0.30, ScoreTier::Warm),
            (0.04, ScoreTier::Frozen),
            (0.05, ScoreTier::Cold),
        ];
        for (s, expected) in cases {
            assert_eq!(tier_for_score(s), expected, "score {s}");
        }
    }

    #[test]
    fn score_decays_with_age_and_grows_with_access() {
        let config = ScoringConfig::default();
        let fresh = score(0.8, 0.0, 0, &config);
        let stale = score(0.8, 60.0, 0, &config);
        assert!(stale < fresh);

        let reinforced = score(0.8, 0.0, 10, &config);
        assert!(reinforced > fresh);
    }

    #[test]
    fn zero_importance_always_scores_zero() {
        let config = ScoringConfig::default();
        assert_eq!(score(0.0, 0.0, 100, &config), 0.0);
    }
}
