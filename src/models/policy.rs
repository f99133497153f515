//! Workspace governance policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing mode for a governance entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPointPolicy {
    /// Every change waits for a reviewer.
    #[default]
    ProposalOnly,
    /// Policy decides per change.
    Hybrid,
    /// Changes apply directly.
    Direct,
}

impl EntryPointPolicy {
    /// Returns the policy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProposalOnly => "proposal",
            Self::Hybrid => "hybrid",
            Self::Direct => "direct",
        }
    }

    /// Parses a policy; `auto` is accepted as an alias for `direct`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "proposal" | "proposal_only" => Some(Self::ProposalOnly),
            "hybrid" => Some(Self::Hybrid),
            "direct" | "auto" => Some(Self::Direct),
            _ => None,
        }
    }

    /// Returns true for hybrid or direct routing.
    #[must_use]
    pub const fn allows_auto(&self) -> bool {
        matches!(self, Self::Hybrid | Self::Direct)
    }
}

impl fmt::Display for EntryPointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Workspace governance flags consumed when deciding auto-approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceFlags {
    /// Governance workflow enabled.
    pub governance_enabled: bool,
    /// A validator must sign off on every proposal.
    pub validator_required: bool,
    /// Manual edit routing.
    pub ep_manual_edit: EntryPointPolicy,
    /// Graph action routing.
    pub ep_graph_action: EntryPointPolicy,
}

impl Default for GovernanceFlags {
    /// Conservative defaults: governance on, every change reviewed.
    fn default() -> Self {
        Self {
            governance_enabled: true,
            validator_required: false,
            ep_manual_edit: EntryPointPolicy::ProposalOnly,
            ep_graph_action: EntryPointPolicy::ProposalOnly,
        }
    }
}

impl GovernanceFlags {
    /// Flags that auto-approve extraction proposals.
    #[must_use]
    pub const fn auto_approving() -> Self {
        Self {
            governance_enabled: true,
            validator_required: false,
            ep_manual_edit: EntryPointPolicy::Hybrid,
            ep_graph_action: EntryPointPolicy::ProposalOnly,
        }
    }
}
