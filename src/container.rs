//! # Bulk Row Container
//!
//! The in-memory batch behind the native bulk-bind path: N typed columns by
//! M logical rows, filled sequentially through a "current row" cursor and
//! handed off whole to the statement executor.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      RowContainer                        │
//! │                                                          │
//! │   col 0 (u64)   col 1 (f64)   col 2 (str)                │
//! │   ┌─────────┐   ┌─────────┐   ┌─────────┐                │
//! │   │ 31      │   │ 0.25    │   │ "load1" │  row 0         │
//! │   │ 31      │   │ NULL    │   │ "load5" │  row 1         │
//! │   │ 47      │   │ 1.75    │   │ "rta"   │  row 2         │
//! │   └─────────┘   └─────────┘   └─────────┘                │
//! │                                    current_row = 3       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Columns store one native value per logical row plus a null flag
//! (`Option<T>`). A column's kind is fixed by its first write and immutable
//! for the container's lifetime.
//!
//! ## Contract
//!
//! - Rows are append-only: sequential fill via `set_value`/`set_null` on the
//!   current row, then [`RowContainer::next_row`]. No random-access update,
//!   no deletion.
//! - A kind mismatch is a programming error: fatal in debug builds
//!   (`debug_assert!`), and in release the offending write is discarded with
//!   an error log. The typed enum makes cross-kind reads impossible either
//!   way.
//! - `reserve` changes capacity only; `row_count` is the logical size. The
//!   statement uses this split to pre-size the next container from history
//!   without per-event reallocation.
//! - Ownership transfers out exactly once (move); a handed-off container is
//!   unreachable from the statement by construction.

use tracing::error;

use crate::value::{ColumnKind, Value};

// =============================================================================
// Typed Column Buffer
// =============================================================================

/// Per-column growable storage: one native value per logical row, nullable.
///
/// Starts untyped; the first write fixes the kind.
#[derive(Debug)]
pub struct Column {
    data: ColumnData,
    /// Capacity hint applied when the kind gets fixed.
    reserved: usize,
}

/// Enum-dispatched column storage, one vector per kind.
#[derive(Debug)]
enum ColumnData {
    /// No write has fixed the kind yet.
    Unset,
    I32(Vec<Option<i32>>),
    U32(Vec<Option<u32>>),
    I64(Vec<Option<i64>>),
    U64(Vec<Option<u64>>),
    F32(Vec<Option<f32>>),
    F64(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Str(Vec<Option<String>>),
}

/// Writes `slot` at `row`, padding intermediate rows with NULL.
///
/// Rows the caller skipped (no write before `next_row`) are implicit NULLs,
/// so the vector may lag the cursor.
fn put_at<T>(vec: &mut Vec<Option<T>>, row: usize, slot: Option<T>) {
    if vec.len() > row {
        vec[row] = slot;
    } else {
        while vec.len() < row {
            vec.push(None);
        }
        vec.push(slot);
    }
}

impl Column {
    fn new() -> Self {
        Self {
            data: ColumnData::Unset,
            reserved: 0,
        }
    }

    /// The declared kind, or `None` if nothing was written yet.
    pub fn kind(&self) -> Option<ColumnKind> {
        match &self.data {
            ColumnData::Unset => None,
            ColumnData::I32(_) => Some(ColumnKind::I32),
            ColumnData::U32(_) => Some(ColumnKind::U32),
            ColumnData::I64(_) => Some(ColumnKind::I64),
            ColumnData::U64(_) => Some(ColumnKind::U64),
            ColumnData::F32(_) => Some(ColumnKind::F32),
            ColumnData::F64(_) => Some(ColumnKind::F64),
            ColumnData::Bool(_) => Some(ColumnKind::Bool),
            ColumnData::Str(_) => Some(ColumnKind::Str),
        }
    }

    fn fix_kind(&mut self, kind: ColumnKind) {
        let cap = self.reserved;
        self.data = match kind {
            ColumnKind::I32 => ColumnData::I32(Vec::with_capacity(cap)),
            ColumnKind::U32 => ColumnData::U32(Vec::with_capacity(cap)),
            ColumnKind::I64 => ColumnData::I64(Vec::with_capacity(cap)),
            ColumnKind::U64 => ColumnData::U64(Vec::with_capacity(cap)),
            ColumnKind::F32 => ColumnData::F32(Vec::with_capacity(cap)),
            ColumnKind::F64 => ColumnData::F64(Vec::with_capacity(cap)),
            ColumnKind::Bool => ColumnData::Bool(Vec::with_capacity(cap)),
            ColumnKind::Str => ColumnData::Str(Vec::with_capacity(cap)),
        };
    }

    /// Writes a value (or NULL) at `row`, fixing the kind on first write.
    ///
    /// Returns false on a kind mismatch; the write is discarded.
    fn put(&mut self, row: usize, kind: ColumnKind, value: Option<Value>) -> bool {
        if self.kind().is_none() {
            self.fix_kind(kind);
        }

        match (&mut self.data, value) {
            (ColumnData::I32(v), Some(Value::I32(x))) => put_at(v, row, Some(x)),
            (ColumnData::U32(v), Some(Value::U32(x))) => put_at(v, row, Some(x)),
            (ColumnData::I64(v), Some(Value::I64(x))) => put_at(v, row, Some(x)),
            (ColumnData::U64(v), Some(Value::U64(x))) => put_at(v, row, Some(x)),
            (ColumnData::F32(v), Some(Value::F32(x))) => put_at(v, row, Some(x)),
            (ColumnData::F64(v), Some(Value::F64(x))) => put_at(v, row, Some(x)),
            (ColumnData::Bool(v), Some(Value::Bool(x))) => put_at(v, row, Some(x)),
            (ColumnData::Str(v), Some(Value::Str(x))) => put_at(v, row, Some(x)),
            (ColumnData::I32(v), None) if kind == ColumnKind::I32 => put_at(v, row, None),
            (ColumnData::U32(v), None) if kind == ColumnKind::U32 => put_at(v, row, None),
            (ColumnData::I64(v), None) if kind == ColumnKind::I64 => put_at(v, row, None),
            (ColumnData::U64(v), None) if kind == ColumnKind::U64 => put_at(v, row, None),
            (ColumnData::F32(v), None) if kind == ColumnKind::F32 => put_at(v, row, None),
            (ColumnData::F64(v), None) if kind == ColumnKind::F64 => put_at(v, row, None),
            (ColumnData::Bool(v), None) if kind == ColumnKind::Bool => put_at(v, row, None),
            (ColumnData::Str(v), None) if kind == ColumnKind::Str => put_at(v, row, None),
            _ => return false,
        }
        true
    }

    /// Reads the value at `row`: `None` means NULL (explicit or implicit).
    pub fn get(&self, row: usize) -> Option<Value> {
        match &self.data {
            ColumnData::Unset => None,
            ColumnData::I32(v) => v.get(row).copied().flatten().map(Value::I32),
            ColumnData::U32(v) => v.get(row).copied().flatten().map(Value::U32),
            ColumnData::I64(v) => v.get(row).copied().flatten().map(Value::I64),
            ColumnData::U64(v) => v.get(row).copied().flatten().map(Value::U64),
            ColumnData::F32(v) => v.get(row).copied().flatten().map(Value::F32),
            ColumnData::F64(v) => v.get(row).copied().flatten().map(Value::F64),
            ColumnData::Bool(v) => v.get(row).copied().flatten().map(Value::Bool),
            ColumnData::Str(v) => v.get(row).cloned().flatten().map(Value::Str),
        }
    }

    fn reserve(&mut self, rows: usize) {
        self.reserved = rows;
        match &mut self.data {
            ColumnData::Unset => {}
            ColumnData::I32(v) => v.reserve(rows.saturating_sub(v.len())),
            ColumnData::U32(v) => v.reserve(rows.saturating_sub(v.len())),
            ColumnData::I64(v) => v.reserve(rows.saturating_sub(v.len())),
            ColumnData::U64(v) => v.reserve(rows.saturating_sub(v.len())),
            ColumnData::F32(v) => v.reserve(rows.saturating_sub(v.len())),
            ColumnData::F64(v) => v.reserve(rows.saturating_sub(v.len())),
            ColumnData::Bool(v) => v.reserve(rows.saturating_sub(v.len())),
            ColumnData::Str(v) => v.reserve(rows.saturating_sub(v.len())),
        }
    }
}

// =============================================================================
// Row Container
// =============================================================================

/// One in-memory batch: N columns x M rows, append-only, with a cursor for
/// the current row.
///
/// Produced by [`BatchedStatement::create_bind`], filled row by row, then
/// moved out through [`BatchedStatement::take_bind`] for execution. The move
/// makes double-flush impossible: once handed off, the statement holds no
/// container until the next bind call.
///
/// [`BatchedStatement::create_bind`]: crate::statement::BatchedStatement::create_bind
/// [`BatchedStatement::take_bind`]: crate::statement::BatchedStatement::take_bind
#[derive(Debug)]
pub struct RowContainer {
    columns: Vec<Column>,
    /// Number of completed rows; also the index of the row being filled.
    current_row: usize,
    /// True once any value or NULL has been written.
    touched: bool,
}

impl RowContainer {
    /// Creates an empty container with `columns` columns.
    pub fn new(columns: usize) -> Self {
        Self {
            columns: (0..columns).map(|_| Column::new()).collect(),
            current_row: 0,
            touched: false,
        }
    }

    /// Creates an empty container pre-sized for `rows` rows.
    ///
    /// Capacity only: `row_count()` is still 0 and `is_empty()` still true.
    pub fn with_reserved(columns: usize, rows: usize) -> Self {
        let mut c = Self::new(columns);
        c.reserve(rows);
        c
    }

    /// Pre-allocates column storage for `rows` rows without changing the
    /// logical size.
    pub fn reserve(&mut self, rows: usize) {
        for col in &mut self.columns {
            col.reserve(rows);
        }
    }

    /// Number of columns this container was created with.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of completed rows (one per [`next_row`](Self::next_row) call).
    pub fn row_count(&self) -> usize {
        self.current_row
    }

    /// Index of the row currently being filled (0-based).
    pub fn current_row(&self) -> usize {
        self.current_row
    }

    /// True iff zero values were ever written, independent of reservation.
    pub fn is_empty(&self) -> bool {
        self.current_row == 0 && !self.touched
    }

    /// Writes `value` into `column` of the current row.
    ///
    /// The first write to a column fixes its kind. A later write with a
    /// different kind is a contract violation: fatal in debug builds, and
    /// the write is dropped (with an error log) in release.
    pub fn set_value(&mut self, column: usize, value: impl Into<Value>) {
        let value = value.into();
        let kind = value.kind();
        self.put(column, kind, Some(value));
    }

    /// Writes NULL of `kind` into `column` of the current row.
    ///
    /// The kind still matters: a NULL is typed, and fixes the column kind on
    /// first write just like a value does.
    pub fn set_null(&mut self, column: usize, kind: ColumnKind) {
        self.put(column, kind, None);
    }

    fn put(&mut self, column: usize, kind: ColumnKind, value: Option<Value>) {
        let row = self.current_row;
        let Some(col) = self.columns.get_mut(column) else {
            debug_assert!(false, "column {column} out of range");
            error!(column, total = self.columns.len(), "column out of range, write dropped");
            return;
        };
        let declared = col.kind();
        if !col.put(row, kind, value) {
            debug_assert!(
                false,
                "kind mismatch on column {column}: declared {declared:?}, got {kind}"
            );
            error!(
                column,
                ?declared,
                got = %kind,
                "column kind mismatch, write dropped"
            );
        } else {
            self.touched = true;
        }
    }

    /// Advances the cursor to the next row.
    ///
    /// No bound on row count other than available memory; backpressure is
    /// the flush scheduler's job.
    pub fn next_row(&mut self) {
        self.current_row += 1;
    }

    /// The columns, in statement-parameter order. Used by executors to walk
    /// the batch in the layout a bulk bind expects.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Collects the values of one row across all columns (`None` = NULL).
    ///
    /// Convenience for executors that bind row-wise rather than
    /// column-wise.
    pub fn row(&self, row: usize) -> Vec<Option<Value>> {
        self.columns.iter().map(|c| c.get(row)).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// For any sequence of set/next_row calls, `row_count()` equals the
    /// number of `next_row()` calls and `current_row()` points at the next
    /// row to fill.
    #[test]
    fn test_row_count_tracks_next_row_calls() {
        let mut c = RowContainer::new(2);
        assert_eq!(c.row_count(), 0);
        assert_eq!(c.current_row(), 0);

        c.set_value(0, 1i64);
        c.set_value(1, "a");
        assert_eq!(c.row_count(), 0, "setting values does not advance rows");

        c.next_row();
        assert_eq!(c.row_count(), 1);
        assert_eq!(c.current_row(), 1);

        c.set_null(0, ColumnKind::I64);
        c.next_row();
        c.next_row(); // a row may be entirely implicit NULLs
        assert_eq!(c.row_count(), 3);
        assert_eq!(c.current_row(), 3);
    }

    #[test]
    fn test_is_empty_independent_of_reservation() {
        let c = RowContainer::with_reserved(3, 1000);
        assert!(c.is_empty());
        assert_eq!(c.row_count(), 0);

        let mut c = RowContainer::new(1);
        c.set_value(0, 5i32);
        assert!(!c.is_empty(), "a written value makes the container non-empty");
    }

    #[test]
    fn test_first_write_fixes_kind() {
        let mut c = RowContainer::new(1);
        c.set_null(0, ColumnKind::F64);
        assert_eq!(c.columns()[0].kind(), Some(ColumnKind::F64));

        c.next_row();
        c.set_value(0, 2.5f64);
        assert_eq!(c.columns()[0].get(0), None);
        assert_eq!(c.columns()[0].get(1), Some(Value::F64(2.5)));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "kind mismatch"))]
    fn test_kind_mismatch_is_fatal_in_debug() {
        let mut c = RowContainer::new(1);
        c.set_value(0, 1i32);
        c.next_row();
        c.set_value(0, "not an i32");
        // Release builds drop the write instead of panicking.
        assert_eq!(c.columns()[0].get(1), None);
    }

    #[test]
    fn test_skipped_columns_read_as_null() {
        let mut c = RowContainer::new(2);
        c.set_value(0, 10u32);
        c.next_row();
        c.set_value(0, 20u32);
        c.set_value(1, "only second row");
        c.next_row();

        assert_eq!(c.row(0), vec![Some(Value::U32(10)), None]);
        assert_eq!(
            c.row(1),
            vec![
                Some(Value::U32(20)),
                Some(Value::Str("only second row".into()))
            ]
        );
    }

    #[test]
    fn test_rows_preserve_append_order() {
        let mut c = RowContainer::new(1);
        for i in 0..100i64 {
            c.set_value(0, i);
            c.next_row();
        }
        for i in 0..100usize {
            assert_eq!(c.columns()[0].get(i), Some(Value::I64(i as i64)));
        }
    }
}
