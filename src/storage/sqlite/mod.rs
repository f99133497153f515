//! `SQLite` substrate store.
//!
//! Durable implementation of [`SubstrateStore`] shared by any number of
//! worker processes pointed at the same database file.
//!
//! ## Module Structure
//!
//! - [`connection`]: lock acquisition with poison recovery, pragma configuration
//! - `schema`: table and index definitions
//! - `rows`: row conversion helpers
//! - `substrate`, `governance`, `artifacts`, `queue`: trait implementations
//!
//! ## Concurrency Model
//!
//! Uses a `Mutex<Connection>` per store. Across processes, WAL mode and
//! `busy_timeout` handle contention; queue claims run inside
//! `BEGIN IMMEDIATE` so two workers can never take the same entry.

// Allow significant_drop_tightening - the connection guard is held for one statement.
#![allow(clippy::significant_drop_tightening)]

mod artifacts;
pub mod connection;
mod governance;
mod queue;
mod rows;
mod schema;
mod substrate;

pub use connection::{acquire_lock, configure_connection};

use crate::models::{GovernanceFlags, WorkspaceId};
use crate::storage::traits::SubstrateStore;
use crate::{Error, Result};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// `SQLite`-based substrate store.
pub struct SqliteStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (creating if needed) a store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_db_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        let conn = Connection::open(&db_path).map_err(|e| Error::OperationFailed {
            operation: "open_sqlite".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_memory".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn)?;
        conn.execute_batch(schema::TABLES)
            .map_err(rows::sql_err("create_tables"))?;
        for index in schema::INDEXES {
            if let Err(e) = conn.execute(index, []) {
                tracing::warn!(error = %e, "Failed to create index");
            }
        }
        Ok(())
    }

    /// Runs `f` with the connection held.
    ///
    /// Each call counts toward `storage_operations_total` and
    /// `storage_operation_duration_ms`, labelled by operation and status.
    fn with_conn<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let started = Instant::now();
        let result = f(&mut acquire_lock(&self.conn));
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!(
            "storage_operations_total",
            "backend" => "sqlite",
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::histogram!("storage_operation_duration_ms", "operation" => operation)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Sets the governance flags of a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_governance_flags(
        &self,
        workspace_id: &WorkspaceId,
        flags: GovernanceFlags,
    ) -> Result<()> {
        self.with_conn("set_governance_flags", |conn| {
            conn.execute(
                "INSERT INTO workspace_policies
                    (workspace_id, governance_enabled, validator_required, ep_manual_edit, ep_graph_action)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(workspace_id) DO UPDATE SET
                    governance_enabled = excluded.governance_enabled,
                    validator_required = excluded.validator_required,
                    ep_manual_edit = excluded.ep_manual_edit,
                    ep_graph_action = excluded.ep_graph_action",
                params![
                    workspace_id.as_str(),
                    flags.governance_enabled,
                    flags.validator_required,
                    flags.ep_manual_edit.as_str(),
                    flags.ep_graph_action.as_str(),
                ],
            )
            .map_err(rows::sql_err("set_governance_flags"))?;
            Ok(())
        })
    }
}

impl SubstrateStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
