//! # Error Handling for Sinkwell
//!
//! This module defines the error types used throughout Sinkwell. We use a
//! single error enum ([`Error`]) to represent all possible failure modes,
//! which simplifies error handling for library users.
//!
//! ## Why a Single Error Type?
//!
//! Most operations in this engine fail in similar ways (executor errors,
//! shutdown races, bad configuration), and callers typically want to handle
//! them uniformly: log the failure with its context and keep the stream
//! running. A single enum keeps the API surface small.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Mapping | Unknown parameter name | Field dropped, row kept |
//! | Flush | Failed execute/commit | Log, keep accepting rows |
//! | Lifecycle | Append after shutdown | Report to caller, no crash |
//! | Config | Pinned connection out of range | Fix configuration |
//! | Internal | SQLite error in the bundled executor | Log and investigate |
//!
//! A failed flush must never halt the stream: the engine reports the typed
//! failure to whoever triggered the flush and continues with a fresh batch.

use thiserror::Error;

use crate::conflict::ActionMask;
use crate::executor::StatementId;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in Sinkwell operations.
///
/// Each variant carries enough context to reproduce the failure from a log
/// line alone: statement id, action category, affected row range.
#[derive(Error, Debug)]
pub enum Error {
    /// A named parameter does not exist in the statement's parameter map.
    ///
    /// This is a mapping error: the engine recovers locally by dropping the
    /// single field (with a logged warning) and still binding the rest of
    /// the row. It is surfaced as an error only from APIs where the caller
    /// asked for strict binding.
    #[error("unknown parameter '{name}' for statement {statement}")]
    UnknownParameter {
        /// The parameter name that failed to resolve.
        name: String,
        /// The statement whose map was consulted.
        statement: StatementId,
    },

    /// A batch flush failed at the executor boundary.
    ///
    /// Carries the statement, the action category the batch was tagged with
    /// and the affected row range. The engine does not retry: every emitted
    /// statement is an idempotent upsert, so retry policy belongs to the
    /// caller or the executor layer.
    #[error(
        "flush of statement {statement} ({category}) failed on rows 0..{row_count}: {source}"
    )]
    FlushFailed {
        /// The statement whose execution failed.
        statement: StatementId,
        /// The action category the batch was tagged with.
        category: ActionMask,
        /// How many rows were in the failed batch.
        row_count: usize,
        /// The underlying executor failure.
        #[source]
        source: Box<Error>,
    },

    /// The executor rejected an operation (execute, prepare or commit).
    ///
    /// This is the generic failure reported by [`StatementExecutor`]
    /// implementations backed by stores other than the bundled SQLite one.
    ///
    /// [`StatementExecutor`]: crate::executor::StatementExecutor
    #[error("executor error: {0}")]
    Executor(String),

    /// The engine has been drained and refuses further appends.
    ///
    /// After [`drain`](crate::engine::WriteEngine::drain) completes, every
    /// subsequent append is a no-op reported as this error. This is a
    /// report-not-crash contract: shutdown races are expected during process
    /// stop and must not panic producer threads.
    #[error("engine is shut down; append refused")]
    ShutDown,

    /// A connection worker disappeared while a flush was in flight.
    ///
    /// Seen when the worker thread panicked or its channel closed before it
    /// answered. Treated like an executor failure by callers.
    #[error("connection {connection} worker is gone")]
    ConnectionGone {
        /// Index of the dead connection.
        connection: usize,
    },

    /// Invalid engine configuration.
    ///
    /// Raised at construction time, never during the write path. Examples:
    /// zero connections, a pinned category pointing past the pool, a
    /// `max_rows` of zero.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// SQLite operation failed in the bundled executor.
    ///
    /// The `#[from]` attribute lets `?` convert rusqlite errors
    /// automatically inside [`sqlite`](crate::sqlite).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::Action;

    /// Error messages appear in operator logs; they must carry the context
    /// needed to reproduce a failed flush (statement, category, rows).
    #[test]
    fn test_flush_failed_display() {
        let err = Error::FlushFailed {
            statement: StatementId::new(7),
            category: Action::Metrics.mask(),
            row_count: 250,
            source: Box::new(Error::Executor("lost connection".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("statement 7"), "{msg}");
        assert!(msg.contains("metrics"), "{msg}");
        assert!(msg.contains("0..250"), "{msg}");
    }

    #[test]
    fn test_unknown_parameter_display() {
        let err = Error::UnknownParameter {
            name: "service_id".to_string(),
            statement: StatementId::new(3),
        };
        assert_eq!(
            err.to_string(),
            "unknown parameter 'service_id' for statement 3"
        );
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("x".to_string());
        let our_err: Error = sqlite_err.into();
        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
