//! # Statement Executor Boundary
//!
//! The engine never talks to the store's wire protocol. Everything it needs
//! from a relational client is this capability set: prepare a template,
//! execute a prepared statement against many bound rows (or a rendered
//! multi-insert text), and commit. Any client that can do those three
//! things can sit behind the engine; [`sqlite`](crate::sqlite) ships one
//! backed by rusqlite.
//!
//! One executor instance belongs to one physical connection and is driven
//! from that connection's worker thread only, so implementations need
//! `Send` but not `Sync`, and no internal locking.

use std::fmt;

use crate::container::RowContainer;
use crate::error::Result;

// =============================================================================
// Statement Identity
// =============================================================================

/// Identity of a prepared statement, assigned by the engine and shared by
/// every connection in the pool (each connection prepares the same
/// template under the same id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(u32);

impl StatementId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Executor Capability
// =============================================================================

/// The abstract "execute a prepared statement with N bound rows" primitive.
///
/// Calls happen on the owning connection's worker thread, outside any batch
/// lock, so a slow store stalls only its own connection.
pub trait StatementExecutor: Send {
    /// Registers (and typically compiles) a statement template under `id`.
    fn prepare(&mut self, id: StatementId, template: &str) -> Result<()>;

    /// Executes the prepared statement `id` once per row of `rows`, in
    /// append order, inside the connection's current transaction.
    ///
    /// Returns the number of affected rows.
    fn execute_bulk(&mut self, id: StatementId, rows: &RowContainer) -> Result<u64>;

    /// Executes one rendered multi-insert statement (the fallback path).
    ///
    /// Returns the number of affected rows.
    fn execute_text(&mut self, sql: &str) -> Result<u64>;

    /// Commits the connection's current transaction and opens the next.
    fn commit(&mut self) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_id_display_and_order() {
        let a = StatementId::new(3);
        let b = StatementId::new(12);
        assert_eq!(a.to_string(), "3");
        assert!(a < b);
        assert_eq!(b.as_raw(), 12);
    }
}
