//! Connection pool for the embedded engine.
//!
//! Every connection opens the same shared-cache in-memory database, so
//! all handles observe the same tables. The pool never blocks: acquire
//! pops a pooled handle or opens a fresh one, release pushes back.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::error::{Result, SuperqError};

/// One in-memory database per process, shared across connections.
const MEMDB_URI: &str = "file:superq-memdb?mode=memory&cache=shared";

/// Open a new handle onto the shared in-memory database.
pub(crate) fn open_conn() -> Result<Connection> {
    Connection::open_with_flags(
        MEMDB_URI,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| SuperqError::db_exec(MEMDB_URI, e))
}

pub(crate) struct ConnPool {
    conns: Mutex<Vec<Connection>>,
}

impl ConnPool {
    pub(crate) fn new() -> Self {
        Self {
            conns: Mutex::new(Vec::new()),
        }
    }

    /// Pop a pooled connection, or open a new one when the pool is dry.
    pub(crate) fn acquire(&self) -> Result<Connection> {
        match self.conns.lock().pop() {
            Some(conn) => Ok(conn),
            None => open_conn(),
        }
    }

    /// Return a connection to the pool.
    pub(crate) fn release(&self, conn: Connection) {
        self.conns.lock().push(conn);
    }

    /// Drop every pooled connection.
    pub(crate) fn drain(&self) {
        self.conns.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_share_one_database() {
        let pool = ConnPool::new();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        a.execute_batch("CREATE TABLE pool_shared_probe (x INTEGER);")
            .unwrap();
        b.execute_batch("INSERT INTO pool_shared_probe (x) VALUES (1);")
            .unwrap();
        let count: i64 = a
            .query_row("SELECT COUNT(*) FROM pool_shared_probe;", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
        a.execute_batch("DROP TABLE pool_shared_probe;").unwrap();
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn acquire_reuses_released_connections() {
        let pool = ConnPool::new();
        let conn = pool.acquire().unwrap();
        pool.release(conn);
        let _again = pool.acquire().unwrap();
        assert!(pool.conns.lock().is_empty());
    }
}
