//! Relationship storage.

use crate::Result;
use crate::models::{BasketId, Relationship};

/// Relationship (graph edge) storage.
///
/// Edges are unique on `(basket, from_kind, from_id, type, to_kind, to_id)`;
/// concurrent mapping runs converge instead of duplicating.
pub trait GraphBackend: Send + Sync {
    /// Inserts or updates an edge by its conflict key.
    ///
    /// Returns `true` if a new row was inserted, `false` if an existing row
    /// was updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_relationship(&self, relationship: &Relationship) -> Result<bool>;

    /// Lists all edges of a basket.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_relationships(&self, basket_id: &BasketId) -> Result<Vec<Relationship>>;
}
