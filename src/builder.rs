//! # Multi-row Query Builder (fallback path)
//!
//! Backends without native multi-row binding still get one round trip per
//! batch: this builder concatenates pre-rendered row tuples into oversized
//! `INSERT INTO t (...) VALUES (...),(...),...` statements, splitting under
//! a byte ceiling.
//!
//! ```text
//! push("1,'load1',0.25")          INSERT INTO metrics (id,name,val) VALUES
//! push("1,'load5',0.31")    ──►     (1,'load1',0.25),(1,'load5',0.31),
//! push("2,'rta',12.0")              (2,'rta',12.0)
//!                                 ON DUPLICATE KEY UPDATE val=VALUES(val)
//! ```
//!
//! Rows are independent upserts, so row order across splits does not matter
//! and each split statement can be executed and awaited independently; the
//! flush as a whole completes when all its splits have.

/// Default ceiling on the rendered byte length of one statement (1 MiB).
pub const DEFAULT_MAX_QUERY_TOTAL_LENGTH: usize = 1024 * 1024;

// =============================================================================
// Builder
// =============================================================================

/// Builds oversized multi-row INSERT statements from pushed tuples.
///
/// The template is split into a fixed prefix (through `VALUES`) and a fixed,
/// possibly empty suffix (`ON DUPLICATE KEY UPDATE ...`). Each pushed row is
/// a pre-rendered tuple body `v1,v2,...` without the surrounding parens.
#[derive(Debug)]
pub struct MultiInsertBuilder {
    prefix: String,
    suffix: String,
    max_bytes: usize,
    /// Cap on tuples per statement, for backends with a parameter-count
    /// ceiling. `None` disables the check.
    max_tuples: Option<usize>,
    rows: Vec<String>,
}

impl MultiInsertBuilder {
    /// Creates a builder from a prefix (up to and including `VALUES`) and a
    /// suffix appended after the tuple list (may be empty).
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            max_bytes: DEFAULT_MAX_QUERY_TOTAL_LENGTH,
            max_tuples: None,
            rows: Vec::new(),
        }
    }

    /// Overrides the byte ceiling (for tests and constrained backends).
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Caps tuples per statement regardless of byte length.
    pub fn with_max_tuples(mut self, max_tuples: usize) -> Self {
        self.max_tuples = Some(max_tuples);
        self
    }

    /// Pushes one pre-rendered tuple body, e.g. `"7,'cpu',0.93"`.
    ///
    /// Parens are added at render time; don't include them.
    pub fn push(&mut self, tuple: impl Into<String>) {
        self.rows.push(tuple.into());
    }

    /// Number of queued tuples.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Discards all queued tuples. Needed to reuse the builder after its
    /// statements were taken by someone else.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Byte cost of everything except the tuples: prefix, a space, optional
    /// space plus suffix.
    fn fixed_part_length(&self) -> usize {
        let mut len = self.prefix.len() + 1;
        if !self.suffix.is_empty() {
            len += self.suffix.len() + 1;
        }
        len
    }

    /// Byte cost of one tuple in the list: parens plus separator.
    fn tuple_cost(tuple: &str) -> usize {
        tuple.len() + 3
    }

    /// Drains the queued tuples into rendered statements.
    ///
    /// Consecutive tuples are packed greedily under the byte ceiling (and
    /// the tuple cap, when set). A single tuple whose rendering alone
    /// exceeds the ceiling is still emitted as its own one-row statement:
    /// the ceiling bounds batching, it never drops data.
    pub fn take_statements(&mut self) -> Vec<String> {
        let fixed = self.fixed_part_length();
        let mut statements = Vec::new();
        let mut chunk: Vec<String> = Vec::new();
        let mut chunk_bytes = 0usize;

        for tuple in self.rows.drain(..) {
            let cost = Self::tuple_cost(&tuple);
            let over_bytes = !chunk.is_empty() && fixed + chunk_bytes + cost > self.max_bytes;
            let over_tuples = self
                .max_tuples
                .is_some_and(|max| chunk.len() >= max);

            if over_bytes || over_tuples {
                statements.push(render(&self.prefix, &self.suffix, &chunk));
                chunk.clear();
                chunk_bytes = 0;
            }

            chunk_bytes += cost;
            chunk.push(tuple);
        }

        if !chunk.is_empty() {
            statements.push(render(&self.prefix, &self.suffix, &chunk));
        }

        statements
    }
}

/// Renders one statement from a chunk of tuple bodies.
fn render(prefix: &str, suffix: &str, tuples: &[String]) -> String {
    let mut out = String::with_capacity(
        prefix.len()
            + suffix.len()
            + 2
            + tuples.iter().map(|t| t.len() + 3).sum::<usize>(),
    );
    out.push_str(prefix);
    out.push(' ');
    for (i, tuple) in tuples.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('(');
        out.push_str(tuple);
        out.push(')');
    }
    if !suffix.is_empty() {
        out.push(' ');
        out.push_str(suffix);
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> MultiInsertBuilder {
        MultiInsertBuilder::new(
            "INSERT INTO metrics (id,name,val) VALUES",
            "ON DUPLICATE KEY UPDATE val=VALUES(val)",
        )
    }

    #[test]
    fn test_single_statement_rendering() {
        let mut b = builder();
        b.push("1,'a',0.5");
        b.push("2,'b',1.5");

        let stmts = b.take_statements();
        assert_eq!(stmts.len(), 1);
        assert_eq!(
            stmts[0],
            "INSERT INTO metrics (id,name,val) VALUES (1,'a',0.5),(2,'b',1.5) \
             ON DUPLICATE KEY UPDATE val=VALUES(val)"
        );
        assert!(b.is_empty(), "take_statements drains the queue");
    }

    #[test]
    fn test_empty_suffix_has_no_trailing_space() {
        let mut b = MultiInsertBuilder::new("INSERT INTO t (a) VALUES", "");
        b.push("1");
        let stmts = b.take_statements();
        assert_eq!(stmts[0], "INSERT INTO t (a) VALUES (1)");
    }

    /// With a ceiling forcing 2 tuples per statement and 5 pushed rows, we
    /// get exactly 3 statements distributed [2,2,1].
    #[test]
    fn test_split_distribution_2_2_1() {
        let prefix = "INSERT INTO t (a) VALUES";
        let mut b = MultiInsertBuilder::new(prefix, "");
        // fixed = prefix + space; each tuple "vvvv" costs 4+3=7.
        let fixed = prefix.len() + 1;
        b = b.with_max_bytes(fixed + 2 * 7);

        for i in 0..5 {
            b.push(format!("v{i:03}")); // 4 bytes each
        }

        let stmts = b.take_statements();
        let counts: Vec<usize> = stmts.iter().map(|s| s.matches('(').count()).collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    /// For a ceiling B and tuples of cost L+3 each, every rendered split
    /// fits under B, and no row is lost or duplicated across splits.
    #[test]
    fn test_splits_respect_ceiling_and_conserve_rows() {
        let mut b = MultiInsertBuilder::new("INSERT INTO t (a,b) VALUES", "")
            .with_max_bytes(120);
        let total = 37;
        for i in 0..total {
            b.push(format!("{i},'row-{i}'"));
        }

        let stmts = b.take_statements();
        let mut seen = 0;
        for stmt in &stmts {
            assert!(stmt.len() <= 120, "split exceeds ceiling: {} bytes", stmt.len());
            seen += stmt.matches('(').count();
        }
        assert_eq!(seen, total, "sum of rows per split equals pushed rows");
    }

    /// An oversized single row is emitted as its own one-row statement,
    /// never silently dropped.
    #[test]
    fn test_oversized_row_emitted_alone() {
        let mut b = MultiInsertBuilder::new("INSERT INTO t (a) VALUES", "")
            .with_max_bytes(64);
        b.push("1");
        b.push(format!("'{}'", "x".repeat(200)));
        b.push("2");

        let stmts = b.take_statements();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].len() > 64, "oversized row still emitted");
        let rows: usize = stmts.iter().map(|s| s.matches('(').count()).sum();
        assert_eq!(rows, 3);
    }

    #[test]
    fn test_max_tuples_cap() {
        let mut b = MultiInsertBuilder::new("INSERT INTO t (a) VALUES", "")
            .with_max_tuples(3);
        for i in 0..7 {
            b.push(i.to_string());
        }
        let counts: Vec<usize> = b
            .take_statements()
            .iter()
            .map(|s| s.matches('(').count())
            .collect();
        assert_eq!(counts, vec![3, 3, 1]);
    }

    #[test]
    fn test_no_rows_yields_no_statements() {
        let mut b = builder();
        assert!(b.take_statements().is_empty());
    }
}
