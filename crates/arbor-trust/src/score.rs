//! Score calculation - weighted multi-factor trust scoring
//!
//! Pure derivation from profile counters to component scores and the
//! aggregate. The five components:
//!
//! | Component    | Weight | Source |
//! |--------------|--------|--------|
//! | success_rate | 0.30   | successful / total actions |
//! | uptime       | 0.15   | piecewise curve over days inactive |
//! | security     | 0.25   | 100 − 20 per violation, floored at 0 |
//! | test_pass    | 0.20   | passed / total tests |
//! | rollback     | 0.10   | 1 − rollbacks / improvements |

use arbor_common::config::ScoreWeights;
use arbor_common::TrustProfile;

use crate::tier::TierResolver;

/// Pure calculator for component scores and the weighted aggregate
#[derive(Debug, Clone)]
pub struct ScoreCalculator {
    weights: ScoreWeights,
}

impl ScoreCalculator {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// `100 · successful/total`, 0 with no actions
    pub fn success_rate_score(profile: &TrustProfile) -> f64 {
        if profile.total_actions == 0 {
            0.0
        } else {
            100.0 * profile.successful_actions as f64 / profile.total_actions as f64
        }
    }

    /// Piecewise-linear curve over days inactive:
    /// 100 at 0 days, 70 at 7, 30 at 30, 0 at 60 and beyond.
    pub fn uptime_score(days_inactive: i64) -> f64 {
        let d = days_inactive as f64;
        if d <= 0.0 {
            100.0
        } else if d <= 7.0 {
            100.0 - (d / 7.0) * 30.0
        } else if d <= 30.0 {
            70.0 - ((d - 7.0) / 23.0) * 40.0
        } else if d <= 60.0 {
            30.0 - ((d - 30.0) / 30.0) * 30.0
        } else {
            0.0
        }
    }

    /// `max(0, 100 − 20·violations)`
    pub fn security_score(profile: &TrustProfile) -> f64 {
        (100.0 - 20.0 * profile.security_violations as f64).max(0.0)
    }

    /// `100 · passed/total`, 0 with no tests
    pub fn test_pass_score(profile: &TrustProfile) -> f64 {
        if profile.total_tests == 0 {
            0.0
        } else {
            100.0 * profile.tests_passed as f64 / profile.total_tests as f64
        }
    }

    /// `100 · (1 − rollbacks/improvements)`, 100 with no improvements
    pub fn rollback_score(profile: &TrustProfile) -> f64 {
        if profile.improvement_count == 0 {
            100.0
        } else {
            let ratio = profile.rollback_count as f64 / profile.improvement_count as f64;
            (100.0 * (1.0 - ratio)).clamp(0.0, 100.0)
        }
    }

    /// Weighted aggregate of the profile's current component scores,
    /// rounded and clamped to [0, 100]
    pub fn aggregate(&self, profile: &TrustProfile) -> u8 {
        let weighted = self.weights.success_rate * profile.success_rate_score
            + self.weights.uptime * profile.uptime_score
            + self.weights.security * profile.security_score
            + self.weights.test_pass * profile.test_pass_score
            + self.weights.rollback * profile.rollback_score;
        weighted.clamp(0.0, 100.0).round() as u8
    }

    /// Refresh all five component scores from the counters and
    /// `last_activity_at`, recompute the aggregate, and reassign the
    /// score-derived tier. The points-derived tier lift is the caller's
    /// job (the profile store applies `max(score tier, points tier)`).
    pub fn recalculate(&self, profile: &mut TrustProfile, resolver: &TierResolver, now_ms: i64) {
        profile.success_rate_score = Self::success_rate_score(profile);
        profile.uptime_score = Self::uptime_score(profile.days_inactive(now_ms));
        profile.security_score = Self::security_score(profile);
        profile.test_pass_score = Self::test_pass_score(profile);
        profile.rollback_score = Self::rollback_score(profile);
        profile.trust_score = self.aggregate(profile);
        profile.tier = resolver.resolve(profile.trust_score);
    }
}

impl Default for ScoreCalculator {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}
