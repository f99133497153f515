//! Proposal storage and workspace policy.

use crate::Result;
use crate::models::{
    BasketId, DumpId, GovernanceFlags, Proposal, ProposalId, ProposalStatus, ProposalUpdate,
    WorkspaceId,
};

/// Proposal storage.
pub trait ProposalBackend: Send + Sync {
    /// Persists a new proposal.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn create_proposal(&self, proposal: &Proposal) -> Result<()>;

    /// Fetches a proposal scoped to a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_proposal(&self, id: &ProposalId, workspace_id: &WorkspaceId)
    -> Result<Option<Proposal>>;

    /// Applies a partial update. Returns affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn update_proposal(&self, id: &ProposalId, update: &ProposalUpdate) -> Result<usize>;

    /// Lists proposals of a basket, newest first, optionally by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_proposals(
        &self,
        basket_id: &BasketId,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>>;

    /// Returns the most recent proposal whose provenance includes the dump.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn proposal_for_dump(&self, basket_id: &BasketId, dump_id: &DumpId)
    -> Result<Option<Proposal>>;
}

/// Read-only workspace governance policy.
pub trait PolicyProvider: Send + Sync {
    /// Returns the governance flags of a workspace (defaults if unset).
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_governance_flags(&self, workspace_id: &WorkspaceId) -> Result<GovernanceFlags>;
}
