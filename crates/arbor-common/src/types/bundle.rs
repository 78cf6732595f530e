//! Resource bundles - the confirmation matrix's grouping of URI prefixes

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ArborError;

/// Closed set of resource bundles the confirmation matrix keys on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceBundle {
    CodebaseRead,
    CodebaseWrite,
    Shell,
    Network,
    AiGenerate,
    SystemConfig,
    Governance,
}

/// All bundles
pub const ALL_BUNDLES: [ResourceBundle; 7] = [
    ResourceBundle::CodebaseRead,
    ResourceBundle::CodebaseWrite,
    ResourceBundle::Shell,
    ResourceBundle::Network,
    ResourceBundle::AiGenerate,
    ResourceBundle::SystemConfig,
    ResourceBundle::Governance,
];

impl ResourceBundle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceBundle::CodebaseRead => "codebase_read",
            ResourceBundle::CodebaseWrite => "codebase_write",
            ResourceBundle::Shell => "shell",
            ResourceBundle::Network => "network",
            ResourceBundle::AiGenerate => "ai_generate",
            ResourceBundle::SystemConfig => "system_config",
            ResourceBundle::Governance => "governance",
        }
    }
}

impl std::fmt::Display for ResourceBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceBundle {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "codebase_read" => Ok(ResourceBundle::CodebaseRead),
            "codebase_write" => Ok(ResourceBundle::CodebaseWrite),
            "shell" => Ok(ResourceBundle::Shell),
            "network" => Ok(ResourceBundle::Network),
            "ai_generate" => Ok(ResourceBundle::AiGenerate),
            "system_config" => Ok(ResourceBundle::SystemConfig),
            "governance" => Ok(ResourceBundle::Governance),
            other => Err(ArborError::Config(format!("unknown bundle: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for bundle in ALL_BUNDLES {
            assert_eq!(bundle.as_str().parse::<ResourceBundle>().unwrap(), bundle);
        }
    }

    #[test]
    fn test_unknown_rejected() {
        assert!("filesystem".parse::<ResourceBundle>().is_err());
    }
}
