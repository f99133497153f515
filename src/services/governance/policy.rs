//! Auto-approval policy.

use crate::models::GovernanceFlags;

/// Whether proposals in a workspace with `flags` are approved without human
/// review.
///
/// Decided purely from flags: governance must be enabled, the validator must
/// not be required, and either entry-point route (manual edit or graph
/// action) must allow automatic approval. Confidence and operation count
/// never influence the outcome.
#[must_use]
pub const fn should_auto_approve(flags: &GovernanceFlags) -> bool {
    flags.governance_enabled
        && !flags.validator_required
        && (flags.ep_manual_edit.allows_auto() || flags.ep_graph_action.allows_auto())
}
