//! # Batched Statement
//!
//! A [`BatchedStatement`] binds a parameterized query template once, then
//! repeatedly produces and consumes [`RowContainer`]s for execution. It is
//! the native-bind half of the engine; backends without multi-row binding
//! use the [`builder`](crate::builder) fallback instead.
//!
//! ## State Machine
//!
//! ```text
//! {no container} ──(first bind)──► {accumulating} ──(take_bind)──► {no container}
//! ```
//!
//! There is no "partially executed" state: `take_bind` moves the container
//! out, so a handed-off batch is immutable from the statement's point of
//! view and double-flush is a compile-time impossibility.
//!
//! ## Size History
//!
//! The statement keeps the row counts of its last few executions in a small
//! ring and pre-sizes the next container from their average (plus one row of
//! margin). Traffic bursts therefore stop paying per-event reallocation
//! after one batch, while the statement stays stateless about row data
//! across executions.

use std::collections::HashMap;
use std::collections::VecDeque;

use tracing::warn;

use crate::container::RowContainer;
use crate::error::{Error, Result};
use crate::executor::StatementId;
use crate::value::{ColumnKind, FieldRef, Value};

/// How many past execution sizes feed the container pre-sizing average.
const SIZE_HISTORY_LEN: usize = 10;

/// Mapping from parameter name to 0-based parameter index.
pub type BindMapping = HashMap<String, usize>;

// =============================================================================
// Template Parsing
// =============================================================================

/// Scans a query template for placeholders.
///
/// Supports the two shapes the engine's templates use:
/// - positional `?`, each taking the next index
/// - named `:name`, each taking the next index and an entry in the map
///
/// Quoted literals are skipped so a `?` inside a string constant does not
/// count as a parameter.
fn scan_placeholders(query: &str) -> (usize, BindMapping) {
    let mut mapping = BindMapping::new();
    let mut count = 0;
    let mut chars = query.char_indices().peekable();
    let mut in_string = false;

    while let Some((_, c)) = chars.next() {
        match c {
            '\'' => in_string = !in_string,
            '?' if !in_string => count += 1,
            ':' if !in_string => {
                let mut name = String::new();
                while let Some(&(_, nc)) = chars.peek() {
                    if nc.is_alphanumeric() || nc == '_' {
                        name.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !name.is_empty() {
                    mapping.insert(name, count);
                    count += 1;
                }
            }
            _ => {}
        }
    }

    (count, mapping)
}

// =============================================================================
// Batched Statement
// =============================================================================

/// A prepared multi-row statement plus its in-flight batch.
///
/// Owns the query template, the parameter-name↔index map and a bounded
/// size history. Owns at most one live [`RowContainer`] at a time.
#[derive(Debug)]
pub struct BatchedStatement {
    id: StatementId,
    query: String,
    param_count: usize,
    mapping: BindMapping,

    /// The container currently accumulating rows, if any.
    bind: Option<RowContainer>,

    /// Row counts of the last [`SIZE_HISTORY_LEN`] executions.
    size_history: VecDeque<usize>,
}

impl BatchedStatement {
    /// Creates a statement from a template, deriving the parameter count
    /// and name map from its placeholders.
    pub fn new(id: StatementId, query: impl Into<String>) -> Self {
        let query = query.into();
        let (param_count, mapping) = scan_placeholders(&query);
        Self {
            id,
            query,
            param_count,
            mapping,
            bind: None,
            size_history: VecDeque::with_capacity(SIZE_HISTORY_LEN),
        }
    }

    /// Creates a statement with an explicit name→index map, for positional
    /// templates whose column names are known out of band.
    pub fn with_mapping(
        id: StatementId,
        query: impl Into<String>,
        mapping: BindMapping,
    ) -> Self {
        let query = query.into();
        let (param_count, _) = scan_placeholders(&query);
        Self {
            id,
            query,
            param_count,
            mapping,
            bind: None,
            size_history: VecDeque::with_capacity(SIZE_HISTORY_LEN),
        }
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Rows accumulated in the live container (0 when there is none).
    pub fn row_count(&self) -> usize {
        self.bind.as_ref().map_or(0, RowContainer::row_count)
    }

    /// True if a container is currently accumulating.
    pub fn has_bind(&self) -> bool {
        self.bind.is_some()
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Resolves a field reference through the parameter map.
    fn resolve(&self, target: &FieldRef) -> Result<usize> {
        match target {
            FieldRef::Index(i) => Ok(*i),
            FieldRef::Name(name) => {
                self.mapping
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| Error::UnknownParameter {
                        name: name.clone(),
                        statement: self.id,
                    })
            }
        }
    }

    /// Binds `value` at `target` in the current row, creating the live
    /// container if absent.
    ///
    /// An unresolved name is reported (and logged) but only drops that one
    /// field: the rest of the row is still bound. One bad field across
    /// dozens of columns must not discard an otherwise-valid row.
    pub fn bind_value(&mut self, target: &FieldRef, value: impl Into<Value>) -> Result<()> {
        let column = match self.resolve(target) {
            Ok(c) => c,
            Err(e) => {
                warn!(statement = %self.id, field = %target, "unknown parameter, field dropped");
                return Err(e);
            }
        };
        self.bind_mut().set_value(column, value);
        Ok(())
    }

    /// Binds NULL of `kind` at `target` in the current row.
    pub fn bind_null(&mut self, target: &FieldRef, kind: ColumnKind) -> Result<()> {
        let column = match self.resolve(target) {
            Ok(c) => c,
            Err(e) => {
                warn!(statement = %self.id, field = %target, "unknown parameter, field dropped");
                return Err(e);
            }
        };
        self.bind_mut().set_null(column, kind);
        Ok(())
    }

    /// Advances the live container to the next row, creating it if absent
    /// (an all-NULL first row is legal, if unusual).
    pub fn next_row(&mut self) {
        self.bind_mut().next_row();
    }

    fn bind_mut(&mut self) -> &mut RowContainer {
        if self.bind.is_none() {
            self.bind = Some(self.create_bind());
        }
        self.bind.as_mut().expect("bind was just created")
    }

    // =========================================================================
    // Container Lifecycle
    // =========================================================================

    /// Produces a fresh container sized from the execution-size history.
    ///
    /// Sized to the simple average of the last [`SIZE_HISTORY_LEN`]
    /// execution row counts plus one row of margin; 0 with no history.
    pub fn create_bind(&self) -> RowContainer {
        let reserve = if self.size_history.is_empty() {
            0
        } else {
            self.size_history.iter().sum::<usize>() / self.size_history.len() + 1
        };
        RowContainer::with_reserved(self.param_count, reserve)
    }

    /// Moves the live container out for execution, recording its row count
    /// into the size history.
    ///
    /// Afterwards the statement holds no container until the next bind
    /// call, which makes flushing the same batch twice impossible.
    pub fn take_bind(&mut self) -> Option<RowContainer> {
        let bind = self.bind.take()?;
        if self.size_history.len() == SIZE_HISTORY_LEN {
            self.size_history.pop_front();
        }
        self.size_history.push_back(bind.row_count());
        Some(bind)
    }

    /// Transfers a container back in, replacing any live one.
    ///
    /// Used by callers that fill a container outside the statement (for
    /// example from a cold-start reload) before execution.
    pub fn set_bind(&mut self, bind: RowContainer) {
        self.bind = Some(bind);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(query: &str) -> BatchedStatement {
        BatchedStatement::new(StatementId::new(1), query)
    }

    #[test]
    fn test_scan_positional_placeholders() {
        let (count, mapping) = scan_placeholders("INSERT INTO m (a,b,c) VALUES (?,?,?)");
        assert_eq!(count, 3);
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_scan_named_placeholders() {
        let (count, mapping) =
            scan_placeholders("UPDATE hosts SET name=:name, checked=:checked WHERE host_id=:host_id");
        assert_eq!(count, 3);
        assert_eq!(mapping["name"], 0);
        assert_eq!(mapping["checked"], 1);
        assert_eq!(mapping["host_id"], 2);
    }

    #[test]
    fn test_scan_skips_quoted_literals() {
        let (count, mapping) = scan_placeholders("INSERT INTO t VALUES ('a?b', ?, ':not_a_param')");
        assert_eq!(count, 1);
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_bind_by_name_and_index() {
        let mut s = stmt("INSERT INTO metrics (metric_id, value) VALUES (:metric_id, :value)");
        s.bind_value(&FieldRef::Name("metric_id".into()), 42u64).unwrap();
        s.bind_value(&FieldRef::Index(1), 0.5f64).unwrap();
        s.next_row();

        assert_eq!(s.row_count(), 1);
    }

    #[test]
    fn test_unknown_name_drops_field_only() {
        let mut s = stmt("INSERT INTO metrics (metric_id, value) VALUES (:metric_id, :value)");
        s.bind_value(&FieldRef::Name("metric_id".into()), 42u64).unwrap();
        let err = s.bind_value(&FieldRef::Name("no_such_field".into()), 1i32);
        assert!(matches!(err, Err(Error::UnknownParameter { .. })));
        s.bind_value(&FieldRef::Name("value".into()), 0.5f64).unwrap();
        s.next_row();

        // The row survived with both valid fields bound.
        let bind = s.take_bind().unwrap();
        assert_eq!(bind.row_count(), 1);
        assert!(bind.columns()[0].get(0).is_some());
        assert!(bind.columns()[1].get(0).is_some());
    }

    /// After take_bind, the statement holds no container until the next
    /// bind call: flushing twice is impossible by construction.
    #[test]
    fn test_take_bind_leaves_no_container() {
        let mut s = stmt("INSERT INTO t VALUES (?)");
        s.bind_value(&FieldRef::Index(0), 1i32).unwrap();
        s.next_row();

        let bind = s.take_bind();
        assert!(bind.is_some());
        assert!(!s.has_bind());
        assert!(s.take_bind().is_none());
        assert_eq!(s.row_count(), 0);
    }

    #[test]
    fn test_create_bind_sizes_from_history() {
        let mut s = stmt("INSERT INTO t VALUES (?)");

        // No history: no reservation, but still usable.
        assert_eq!(s.create_bind().row_count(), 0);

        // Execute a few batches of known sizes.
        for size in [10usize, 20, 30] {
            for i in 0..size {
                s.bind_value(&FieldRef::Index(0), i as i64).unwrap();
                s.next_row();
            }
            let _ = s.take_bind();
        }

        // Average is (10+20+30)/3 = 20, margin +1. Reservation is capacity
        // only, so the observable effect is an empty container; the history
        // itself is what we can assert.
        assert_eq!(s.size_history.iter().copied().collect::<Vec<_>>(), vec![10, 20, 30]);
        let fresh = s.create_bind();
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_size_history_is_bounded() {
        let mut s = stmt("INSERT INTO t VALUES (?)");
        for _ in 0..SIZE_HISTORY_LEN + 5 {
            s.bind_value(&FieldRef::Index(0), 1i32).unwrap();
            s.next_row();
            let _ = s.take_bind();
        }
        assert_eq!(s.size_history.len(), SIZE_HISTORY_LEN);
    }
}
