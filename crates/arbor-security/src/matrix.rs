//! Confirmation matrix
//!
//! Maps a resource URI to a bundle by longest-prefix match, then maps
//! `(bundle, policy tier)` to a confirmation mode. The table is
//! declarative and overridable by configuration, with two hard
//! invariants: shell and governance are never auto-approved.

use std::collections::HashMap;

use arbor_common::config::ConfirmationConfig;
use arbor_common::{ConfirmationMode, PolicyTier, ResourceBundle, ALL_POLICY_TIERS};

/// Closed bundle table: `(prefix, bundle)`. Longest matching prefix wins.
const BUNDLE_PREFIXES: &[(&str, ResourceBundle)] = &[
    ("arbor://code/read/", ResourceBundle::CodebaseRead),
    ("arbor://roadmap/read/", ResourceBundle::CodebaseRead),
    ("arbor://git/read/", ResourceBundle::CodebaseRead),
    ("arbor://activity/emit/", ResourceBundle::CodebaseRead),
    ("arbor://code/write/", ResourceBundle::CodebaseWrite),
    ("arbor://code/compile/", ResourceBundle::CodebaseWrite),
    ("arbor://code/reload/", ResourceBundle::CodebaseWrite),
    ("arbor://test/write/", ResourceBundle::CodebaseWrite),
    ("arbor://docs/write/", ResourceBundle::CodebaseWrite),
    ("arbor://roadmap/write/", ResourceBundle::CodebaseWrite),
    ("arbor://roadmap/move/", ResourceBundle::CodebaseWrite),
    ("arbor://shell/exec", ResourceBundle::Shell),
    ("arbor://network/request/", ResourceBundle::Network),
    ("arbor://signals/subscribe/", ResourceBundle::Network),
    ("arbor://ai/request/", ResourceBundle::AiGenerate),
    ("arbor://extension/request/", ResourceBundle::AiGenerate),
    ("arbor://config/write/", ResourceBundle::SystemConfig),
    ("arbor://install/execute/", ResourceBundle::SystemConfig),
    ("arbor://capability/request/", ResourceBundle::Governance),
    ("arbor://capability/delegate/", ResourceBundle::Governance),
    ("arbor://governance/change/", ResourceBundle::Governance),
    ("arbor://consensus/propose/", ResourceBundle::Governance),
];

/// Bundle for a URI by longest-prefix match; `None` for unbundled URIs
pub fn resolve_bundle(uri: &str) -> Option<ResourceBundle> {
    BUNDLE_PREFIXES
        .iter()
        .filter(|(prefix, _)| uri.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, bundle)| *bundle)
}

/// The `bundle × policy tier → mode` table
pub struct ConfirmationMatrix {
    rows: HashMap<(ResourceBundle, PolicyTier), ConfirmationMode>,
}

impl ConfirmationMatrix {
    /// Build from defaults plus configured overrides. Overrides that
    /// would auto-approve shell or governance are rejected upstream by
    /// config validation; this constructor also refuses them.
    pub fn new(config: &ConfirmationConfig) -> Self {
        let mut rows = Self::default_rows();
        for (bundle, tiers) in &config.matrix {
            for (tier, mode) in tiers {
                if matches!(bundle, ResourceBundle::Shell | ResourceBundle::Governance)
                    && *mode == ConfirmationMode::Auto
                {
                    continue;
                }
                rows.insert((*bundle, *tier), *mode);
            }
        }
        Self { rows }
    }

    fn default_rows() -> HashMap<(ResourceBundle, PolicyTier), ConfirmationMode> {
        use ConfirmationMode::{Auto, Deny, Gated};
        use PolicyTier::{Autonomous, Elevated, Restricted, Standard};
        use ResourceBundle::*;

        // (bundle, [restricted, standard, elevated, autonomous])
        let table: [(ResourceBundle, [ConfirmationMode; 4]); 7] = [
            (CodebaseRead, [Auto, Auto, Auto, Auto]),
            (CodebaseWrite, [Deny, Gated, Auto, Auto]),
            (Shell, [Deny, Gated, Gated, Gated]),
            (Network, [Deny, Gated, Auto, Auto]),
            (AiGenerate, [Gated, Auto, Auto, Auto]),
            (SystemConfig, [Deny, Deny, Gated, Auto]),
            (Governance, [Deny, Deny, Gated, Gated]),
        ];

        let tiers = [Restricted, Standard, Elevated, Autonomous];
        let mut rows = HashMap::new();
        for (bundle, modes) in table {
            for (tier, mode) in tiers.iter().zip(modes) {
                rows.insert((bundle, *tier), mode);
            }
        }
        rows
    }

    /// Mode for a bundle at a policy tier; anything unknown denies
    pub fn mode(&self, bundle: ResourceBundle, tier: PolicyTier) -> ConfirmationMode {
        self.rows
            .get(&(bundle, tier))
            .copied()
            .unwrap_or(ConfirmationMode::Deny)
    }

    /// Assert the safety invariants; used by construction-time checks and
    /// tests
    pub fn check_invariants(&self) -> Result<(), String> {
        for tier in ALL_POLICY_TIERS {
            if self.mode(ResourceBundle::Shell, tier) == ConfirmationMode::Auto {
                return Err(format!("shell auto-approved at {}", tier));
            }
            if self.mode(ResourceBundle::Governance, tier) == ConfirmationMode::Auto {
                return Err(format!("governance auto-approved at {}", tier));
            }
        }
        Ok(())
    }
}

impl Default for ConfirmationMatrix {
    fn default() -> Self {
        Self::new(&ConfirmationConfig::default())
    }
}
