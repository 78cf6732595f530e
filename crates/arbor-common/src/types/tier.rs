//! Trust tiers and the collapsed policy tiers
//!
//! `TrustTier` is the behavioral bucket earned through score and points.
//! `PolicyTier` is the coarser bucket the confirmation matrix keys on.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ArborError;

/// Behavioral trust tier, ordered from least to most trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Untrusted,
    Probationary,
    Trusted,
    Veteran,
    Autonomous,
}

/// All tiers in ascending order
pub const ALL_TIERS: [TrustTier; 5] = [
    TrustTier::Untrusted,
    TrustTier::Probationary,
    TrustTier::Trusted,
    TrustTier::Veteran,
    TrustTier::Autonomous,
];

impl TrustTier {
    /// Ordinal position in the tier ladder (0 = untrusted)
    pub fn index(&self) -> usize {
        match self {
            TrustTier::Untrusted => 0,
            TrustTier::Probationary => 1,
            TrustTier::Trusted => 2,
            TrustTier::Veteran => 3,
            TrustTier::Autonomous => 4,
        }
    }

    /// Tier at the given ordinal, if any
    pub fn from_index(index: usize) -> Option<TrustTier> {
        ALL_TIERS.get(index).copied()
    }

    /// The next tier up, or `None` at the top
    pub fn next(&self) -> Option<TrustTier> {
        Self::from_index(self.index() + 1)
    }

    /// The next tier down, or `None` at the bottom
    pub fn previous(&self) -> Option<TrustTier> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    /// Collapse into the policy tier the confirmation matrix keys on
    pub fn policy_tier(&self) -> PolicyTier {
        match self {
            TrustTier::Untrusted | TrustTier::Probationary => PolicyTier::Restricted,
            TrustTier::Trusted => PolicyTier::Standard,
            TrustTier::Veteran => PolicyTier::Elevated,
            TrustTier::Autonomous => PolicyTier::Autonomous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Untrusted => "untrusted",
            TrustTier::Probationary => "probationary",
            TrustTier::Trusted => "trusted",
            TrustTier::Veteran => "veteran",
            TrustTier::Autonomous => "autonomous",
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustTier {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untrusted" => Ok(TrustTier::Untrusted),
            "probationary" => Ok(TrustTier::Probationary),
            "trusted" => Ok(TrustTier::Trusted),
            "veteran" => Ok(TrustTier::Veteran),
            "autonomous" => Ok(TrustTier::Autonomous),
            other => Err(ArborError::Config(format!("unknown trust tier: {}", other))),
        }
    }
}

/// Policy tier used by the confirmation matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTier {
    Restricted,
    Standard,
    Elevated,
    Autonomous,
}

/// All policy tiers in ascending order
pub const ALL_POLICY_TIERS: [PolicyTier; 4] = [
    PolicyTier::Restricted,
    PolicyTier::Standard,
    PolicyTier::Elevated,
    PolicyTier::Autonomous,
];

impl PolicyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyTier::Restricted => "restricted",
            PolicyTier::Standard => "standard",
            PolicyTier::Elevated => "elevated",
            PolicyTier::Autonomous => "autonomous",
        }
    }
}

impl std::fmt::Display for PolicyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyTier {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restricted" => Ok(PolicyTier::Restricted),
            "standard" => Ok(PolicyTier::Standard),
            "elevated" => Ok(PolicyTier::Elevated),
            "autonomous" => Ok(PolicyTier::Autonomous),
            other => Err(ArborError::Config(format!("unknown policy tier: {}", other))),
        }
    }
}
