//! Dump and substrate unit storage.

use crate::Result;
use crate::models::{
    BasketId, DumpId, DumpTombstone, RawDump, SubstrateId, SubstrateState, SubstrateUnit,
    SubstrateUpdate, WorkspaceId,
};

/// Raw dump storage. Dumps are append-only.
pub trait DumpBackend: Send + Sync {
    /// Inserts a new dump.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump id already exists or the write fails.
    fn insert_dump(&self, dump: &RawDump) -> Result<()>;

    /// Fetches a dump scoped to a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_dump(&self, id: &DumpId, workspace_id: &WorkspaceId) -> Result<Option<RawDump>>;

    /// Lists the most recent non-tombstoned dumps of a basket, newest first.
    ///
    /// `since` drops dumps created before the given timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_recent_dumps(
        &self,
        basket_id: &BasketId,
        since: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawDump>>;

    /// Lists all dumps of a basket sharing a batch id, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn dumps_in_batch(&self, basket_id: &BasketId, batch_id: &str) -> Result<Vec<RawDump>>;

    /// Records a tombstone. Returns `0` if the dump does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn tombstone_dump(&self, tombstone: &DumpTombstone) -> Result<usize>;

    /// Returns true if the dump is tombstoned.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn is_tombstoned(&self, id: &DumpId) -> Result<bool>;
}

/// Polymorphic substrate unit storage (blocks and context items).
pub trait BlockBackend: Send + Sync {
    /// Inserts a new substrate unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the id already exists or the write fails.
    fn insert_substrate(&self, unit: &SubstrateUnit) -> Result<()>;

    /// Fetches a unit scoped to a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_substrate(
        &self,
        id: &SubstrateId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<SubstrateUnit>>;

    /// Lists units of a basket whose state is not in `exclude_states`,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_substrate(
        &self,
        basket_id: &BasketId,
        exclude_states: &[SubstrateState],
    ) -> Result<Vec<SubstrateUnit>>;

    /// Applies a partial update scoped to a workspace. Returns affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn update_substrate(
        &self,
        id: &SubstrateId,
        workspace_id: &WorkspaceId,
        update: &SubstrateUpdate,
    ) -> Result<usize>;
}
