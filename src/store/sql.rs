//! Statement helpers for the embedded engine.
//!
//! Shared-cache mode makes engine-level busy errors a transient signal:
//! writes retry with a short sleep until they succeed. Every other
//! engine failure surfaces as a `DbExec` error carrying the statement.

use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::{Result, SuperqError};
use crate::types::Value;

const BUSY_RETRY_SLEEP: Duration = Duration::from_millis(10);

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Execute a statement, retrying transient busy errors until it lands.
pub(crate) fn db_exec(conn: &Connection, sql: &str) -> Result<()> {
    loop {
        match conn.execute_batch(sql) {
            Ok(()) => return Ok(()),
            Err(e) if is_busy(&e) => std::thread::sleep(BUSY_RETRY_SLEEP),
            Err(e) => return Err(SuperqError::db_exec(sql, e)),
        }
    }
}

/// One result row: column names paired with engine-typed values.
/// `None` marks SQL NULL.
pub(crate) struct SqlRow {
    pub columns: Vec<(String, Option<Value>)>,
}

impl SqlRow {
    pub(crate) fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .and_then(|(_, value)| value.as_ref())
    }
}

/// Run a SELECT and collect every row, retrying transient busy errors
/// like the write path does.
pub(crate) fn db_select(conn: &Connection, sql: &str) -> Result<Vec<SqlRow>> {
    loop {
        match select_once(conn, sql) {
            Ok(rows) => return Ok(rows),
            Err(e) if is_busy(&e) => std::thread::sleep(BUSY_RETRY_SLEEP),
            Err(e) => return Err(SuperqError::db_exec(sql, e)),
        }
    }
}

fn select_once(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<SqlRow>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut columns = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let value = match row.get_ref(i)? {
                ValueRef::Null | ValueRef::Blob(_) => None,
                ValueRef::Integer(v) => Some(Value::Int(v)),
                ValueRef::Real(v) => Some(Value::Float(v)),
                ValueRef::Text(v) => Some(Value::Str(String::from_utf8_lossy(v).into_owned())),
            };
            columns.push((name.clone(), value));
        }
        out.push(SqlRow { columns });
    }
    Ok(out)
}

pub(crate) fn db_create_table(conn: &Connection, table: &str, col_str: &str) -> Result<()> {
    db_exec(conn, &format!("CREATE TABLE {table} ({col_str});"))
}

pub(crate) fn db_delete_table(conn: &Connection, table: &str) -> Result<()> {
    db_exec(conn, &format!("DROP TABLE {table};"))
}

pub(crate) fn db_create_row(
    conn: &Connection,
    table: &str,
    col_str: &str,
    val_str: &str,
) -> Result<()> {
    db_exec(
        conn,
        &format!("INSERT INTO {table} ({col_str}) VALUES ({val_str});"),
    )
}

pub(crate) fn db_update_row(
    conn: &Connection,
    table: &str,
    update_str: &str,
    key_name: &str,
    key_literal: &str,
) -> Result<()> {
    db_exec(
        conn,
        &format!("UPDATE {table} SET {update_str} WHERE {key_name} = {key_literal};"),
    )
}

pub(crate) fn db_delete_row(
    conn: &Connection,
    table: &str,
    key_name: &str,
    key_literal: &str,
) -> Result<()> {
    db_exec(
        conn,
        &format!("DELETE FROM {table} WHERE {key_name} = {key_literal};"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::pool;

    #[test]
    fn row_crud_round_trip() {
        let conn = pool::open_conn().unwrap();
        db_create_table(&conn, "sql_probe", "a TEXT,b INTEGER,_links_ TEXT").unwrap();
        db_create_row(&conn, "sql_probe", "a,b,_links_", "'x',1,''").unwrap();
        db_update_row(&conn, "sql_probe", "b=2,_links_=''", "a", "'x'").unwrap();

        let rows = db_select(&conn, "SELECT a,b FROM sql_probe;").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("a"), Some(&Value::Str("x".to_owned())));
        assert_eq!(rows[0].get("b"), Some(&Value::Int(2)));

        db_delete_row(&conn, "sql_probe", "a", "'x'").unwrap();
        let rows = db_select(&conn, "SELECT a FROM sql_probe;").unwrap();
        assert!(rows.is_empty());

        db_delete_table(&conn, "sql_probe").unwrap();
    }

    #[test]
    fn exec_failure_carries_statement() {
        let conn = pool::open_conn().unwrap();
        let err = db_exec(&conn, "SELECT * FROM sql_probe_no_such_table;").unwrap_err();
        assert!(err.to_string().contains("sql_probe_no_such_table"));
    }
}
