//! # SQLite-backed Statement Executor
//!
//! The bundled [`StatementExecutor`] implementation over rusqlite. SQLite
//! has no native multi-row binding, so the bulk path is emulated the only
//! way that keeps the single-round-trip economics: the prepared statement
//! is stepped once per row *inside the connection's open transaction*, and
//! the fsync cost is paid once at commit. The textual multi-insert path
//! executes as-is.
//!
//! The executor is driven from one worker thread and keeps an `IMMEDIATE`
//! transaction open between commits, mirroring how the engine's commit
//! ordering (conflict manager) expects connections to behave.

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tracing::trace;

use crate::container::RowContainer;
use crate::error::{Error, Result};
use crate::executor::{StatementExecutor, StatementId};
use crate::value::Value;

// =============================================================================
// Executor
// =============================================================================

/// A [`StatementExecutor`] over one rusqlite connection.
pub struct SqliteExecutor {
    conn: Connection,
    templates: HashMap<StatementId, String>,
    in_txn: bool,
}

impl SqliteExecutor {
    /// Wraps an open connection. The connection should be exclusive to one
    /// worker; WAL mode is the caller's choice.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            templates: HashMap::new(),
            in_txn: false,
        }
    }

    /// Opens the transaction lazily, on the first write after a commit.
    fn ensure_txn(&mut self) -> Result<()> {
        if !self.in_txn {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_txn = true;
        }
        Ok(())
    }

    /// Access to the underlying connection, for cache cold-start loaders.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Maps an engine value (or NULL) onto a SQLite value.
///
/// SQLite stores all integers as i64; u64 values beyond i64::MAX wrap into
/// the sign bit, which round-trips losslessly through `as` casts.
fn to_sql_value(value: Option<Value>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(Value::I32(v)) => SqlValue::Integer(v.into()),
        Some(Value::U32(v)) => SqlValue::Integer(v.into()),
        Some(Value::I64(v)) => SqlValue::Integer(v),
        Some(Value::U64(v)) => SqlValue::Integer(v as i64),
        Some(Value::F32(v)) => SqlValue::Real(v.into()),
        Some(Value::F64(v)) => SqlValue::Real(v),
        Some(Value::Bool(v)) => SqlValue::Integer(v.into()),
        Some(Value::Str(v)) => SqlValue::Text(v),
    }
}

impl StatementExecutor for SqliteExecutor {
    fn prepare(&mut self, id: StatementId, template: &str) -> Result<()> {
        // Compile once now to surface syntax errors at prepare time; the
        // statement cache keeps the compiled form for execution.
        self.conn.prepare_cached(template)?;
        self.templates.insert(id, template.to_string());
        Ok(())
    }

    fn execute_bulk(&mut self, id: StatementId, rows: &RowContainer) -> Result<u64> {
        let template = self
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Executor(format!("statement {id} was never prepared")))?;

        self.ensure_txn()?;
        let mut stmt = self.conn.prepare_cached(&template)?;
        let mut affected = 0u64;
        for row in 0..rows.row_count() {
            let values: Vec<SqlValue> = rows.row(row).into_iter().map(to_sql_value).collect();
            affected += stmt.execute(params_from_iter(values))? as u64;
        }
        trace!(statement = %id, rows = rows.row_count(), affected, "bulk statement executed");
        Ok(affected)
    }

    fn execute_text(&mut self, sql: &str) -> Result<u64> {
        self.ensure_txn()?;
        let affected = self.conn.execute(sql, [])? as u64;
        trace!(bytes = sql.len(), affected, "multi-insert statement executed");
        Ok(affected)
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_txn {
            self.conn.execute_batch("COMMIT")?;
            self.in_txn = false;
        }
        Ok(())
    }
}

impl Drop for SqliteExecutor {
    fn drop(&mut self) {
        // Leftover transaction at teardown: roll back rather than leave
        // the connection wedged. Drained engines committed already.
        if self.in_txn {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
