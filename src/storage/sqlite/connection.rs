//! Connection locking and pragmas for the `SQLite` store.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Locks the connection, taking it back from a poisoned mutex.
///
/// A panic inside one store call must not wedge every later call on the
/// same worker.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Recovered poisoned SQLite connection lock");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for concurrent workers.
///
/// # Configuration Applied
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to 5 seconds for locks held by other workers
/// - **`foreign_keys`**: enforces reference rows
///
/// Several worker processes may open the same database file; queue claims
/// rely on `busy_timeout` plus `BEGIN IMMEDIATE` to serialize writers.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the busy timeout cannot be set.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row ("wal"/"memory"), so errors here are ignored
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "foreign_keys", "ON");
    conn.pragma_update(None, "busy_timeout", "5000")
        .map_err(|e| Error::OperationFailed {
            operation: "configure_connection".to_string(),
            cause: e.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    *acquire_lock(&mutex) += 1;
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*acquire_lock(&mutex), 10);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_acquire_lock_recovers_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex), 1);
    }

    #[test]
    fn test_configure_connection() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        let foreign_keys: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }
}
