//! Tier resolution - pure mapping between scores, points, and tiers
//!
//! All operations here are side-effect-free and deterministic; the resolver
//! carries configuration, never state. Scores outside [0, 100] clamp.

use std::cmp::Ordering;

use arbor_common::config::TierConfig;
use arbor_common::{TrustTier, ALL_TIERS};

/// Resolves trust scores and points to tiers, and answers tier ordering
/// questions for the rest of the core.
#[derive(Debug, Clone)]
pub struct TierResolver {
    config: TierConfig,
}

impl TierResolver {
    pub fn new(config: TierConfig) -> Self {
        Self { config }
    }

    /// Highest tier whose score threshold is ≤ the (clamped) score
    pub fn resolve(&self, score: u8) -> TrustTier {
        let score = score.min(100);
        let mut resolved = TrustTier::Untrusted;
        for tier in ALL_TIERS {
            if let Some(threshold) = self.config.score_thresholds.get(&tier) {
                if score >= *threshold {
                    resolved = tier;
                }
            }
        }
        resolved
    }

    /// Highest tier whose points threshold is ≤ the points balance
    pub fn resolve_points(&self, points: u64) -> TrustTier {
        let mut resolved = TrustTier::Untrusted;
        for tier in ALL_TIERS {
            if let Some(threshold) = self.config.points_thresholds.get(&tier) {
                if points >= *threshold {
                    resolved = tier;
                }
            }
        }
        resolved
    }

    /// Tier from both accountings: `max(score tier, points tier)`
    pub fn effective(&self, score: u8, points: u64) -> TrustTier {
        self.resolve(score).max(self.resolve_points(points))
    }

    /// Whether `have` satisfies a requirement of `need`
    pub fn sufficient(&self, have: TrustTier, need: TrustTier) -> bool {
        have.index() >= need.index()
    }

    /// Ordering of two tiers
    pub fn compare(&self, a: TrustTier, b: TrustTier) -> Ordering {
        a.index().cmp(&b.index())
    }

    /// The tier above, if any
    pub fn next_tier(&self, tier: TrustTier) -> Option<TrustTier> {
        tier.next()
    }

    /// The tier below, if any
    pub fn previous_tier(&self, tier: TrustTier) -> Option<TrustTier> {
        tier.previous()
    }

    /// Minimum score that resolves to the tier
    pub fn min_score(&self, tier: TrustTier) -> u8 {
        self.config.score_thresholds.get(&tier).copied().unwrap_or(0)
    }

    /// Maximum score that still resolves to the tier (100 at the top)
    pub fn max_score(&self, tier: TrustTier) -> u8 {
        match tier.next() {
            Some(next) => self.min_score(next).saturating_sub(1),
            None => 100,
        }
    }

    /// Minimum points that resolve to the tier
    pub fn min_points(&self, tier: TrustTier) -> u64 {
        self.config.points_thresholds.get(&tier).copied().unwrap_or(0)
    }

    /// Score still needed to reach the next tier; 0 at the top or when the
    /// current score already qualifies
    pub fn score_to_promote(&self, score: u8) -> u8 {
        let current = self.resolve(score);
        match current.next() {
            Some(next) => self.min_score(next).saturating_sub(score.min(100)),
            None => 0,
        }
    }
}

impl Default for TierResolver {
    fn default() -> Self {
        Self::new(TierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_at_boundaries() {
        let resolver = TierResolver::default();
        assert_eq!(resolver.resolve(0), TrustTier::Untrusted);
        assert_eq!(resolver.resolve(24), TrustTier::Untrusted);
        assert_eq!(resolver.resolve(25), TrustTier::Probationary);
        assert_eq!(resolver.resolve(50), TrustTier::Trusted);
        assert_eq!(resolver.resolve(75), TrustTier::Veteran);
        assert_eq!(resolver.resolve(89), TrustTier::Veteran);
        assert_eq!(resolver.resolve(90), TrustTier::Autonomous);
        assert_eq!(resolver.resolve(100), TrustTier::Autonomous);
    }

    #[test]
    fn test_out_of_range_score_clamps() {
        let resolver = TierResolver::default();
        assert_eq!(resolver.resolve(255), TrustTier::Autonomous);
    }

    #[test]
    fn test_monotonicity() {
        let resolver = TierResolver::default();
        for score in 0u8..100 {
            let lower = resolver.resolve(score);
            let higher = resolver.resolve(score + 1);
            assert!(lower.index() <= higher.index(), "non-monotone at {}", score);
        }
    }

    #[test]
    fn test_resolve_points() {
        let resolver = TierResolver::default();
        assert_eq!(resolver.resolve_points(0), TrustTier::Untrusted);
        assert_eq!(resolver.resolve_points(25), TrustTier::Probationary);
        assert_eq!(resolver.resolve_points(100), TrustTier::Trusted);
        assert_eq!(resolver.resolve_points(250), TrustTier::Veteran);
        assert_eq!(resolver.resolve_points(500), TrustTier::Autonomous);
        assert_eq!(resolver.resolve_points(10_000), TrustTier::Autonomous);
    }

    #[test]
    fn test_effective_is_max_of_both() {
        let resolver = TierResolver::default();
        // Low score, high points: points win
        assert_eq!(resolver.effective(10, 100), TrustTier::Trusted);
        // High score, no points: score wins
        assert_eq!(resolver.effective(80, 0), TrustTier::Veteran);
    }

    #[test]
    fn test_sufficient_and_compare() {
        let resolver = TierResolver::default();
        assert!(resolver.sufficient(TrustTier::Veteran, TrustTier::Trusted));
        assert!(resolver.sufficient(TrustTier::Trusted, TrustTier::Trusted));
        assert!(!resolver.sufficient(TrustTier::Probationary, TrustTier::Trusted));
        assert_eq!(
            resolver.compare(TrustTier::Untrusted, TrustTier::Veteran),
            Ordering::Less
        );
    }

    #[test]
    fn test_score_ranges() {
        let resolver = TierResolver::default();
        assert_eq!(resolver.min_score(TrustTier::Trusted), 50);
        assert_eq!(resolver.max_score(TrustTier::Trusted), 74);
        assert_eq!(resolver.max_score(TrustTier::Autonomous), 100);
    }

    #[test]
    fn test_score_to_promote() {
        let resolver = TierResolver::default();
        assert_eq!(resolver.score_to_promote(20), 5);
        assert_eq!(resolver.score_to_promote(50), 25);
        assert_eq!(resolver.score_to_promote(95), 0);
    }
}
