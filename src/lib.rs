//! # Sinkwell - Batching Write-Back Engine
//!
//! Sinkwell is the write-back layer of a monitoring data broker: it absorbs
//! a high-rate stream of typed events (metric samples, status rows, log
//! lines) and lands them in a relational store in large batches. It
//! provides:
//!
//! - **Bulk accumulation**: columnar row containers bound to prepared
//!   statements, or a textual multi-row `INSERT` fallback
//! - **Flush scheduling**: row-count ceiling and age deadline per stream
//! - **Conflict-aware dispatch**: incompatible write categories never share
//!   an uncommitted transaction on one connection
//! - **Connection routing**: category pinning, per-instance affinity, and
//!   least-loaded selection across a pool
//! - **Resolution caches**: lazy natural-key → surrogate-id lookup with
//!   explicit purge
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        WriteEngine                              │
//! │                 (push, flush, drain, snapshot)                  │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐ │
//! │  │ Per-stream  │  │   Flush     │  │   Conflict Manager      │ │
//! │  │  batches    │  │  Scheduler  │  │ (routing + commit rule) │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘ │
//! └───────────┬──────────────────┬──────────────────┬──────────────┘
//!             │                  │                  │
//!             ▼                  ▼                  ▼
//! ┌───────────────────┐┌───────────────────┐┌───────────────────┐
//! │ connection worker ││ connection worker ││ connection worker │
//! │ (thread + queue)  ││ (thread + queue)  ││ (thread + queue)  │
//! └─────────┬─────────┘└─────────┬─────────┘└─────────┬─────────┘
//!           │                    │                    │
//!           ▼                    ▼                    ▼
//!    StatementExecutor    StatementExecutor    StatementExecutor
//!    (relational store, one transaction open per connection)
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Order within a batch**: rows execute in append order
//! 2. **No empty flushes**: a deadline on an empty batch reschedules, it
//!    never emits an empty statement
//! 3. **Single ownership of a batch**: a container moves out of its
//!    statement exactly once per flush
//! 4. **Commit before conflict**: a connection holding an incompatible
//!    uncommitted category commits before the next write lands
//! 5. **Report, don't crash**: mapping errors drop a field, flush errors
//!    drop a batch with a logged record; producers keep running
//!
//! ## Module Organization
//!
//! - [`error`]: the error taxonomy of the write path
//! - [`value`]: typed values, field references, events
//! - [`container`]: columnar bulk row container
//! - [`statement`]: batched prepared statement with parameter mapping
//! - [`builder`]: multi-row `INSERT` text builder (fallback path)
//! - [`scheduler`]: per-stream flush readiness policy
//! - [`conflict`]: write categories, conflict table, connection routing
//! - [`cache`]: natural-key resolution caches
//! - [`executor`]: the store-facing execution boundary
//! - [`sqlite`]: bundled SQLite executor
//! - [`config`]: stream, routing and engine configuration
//! - [`engine`]: the write engine tying it all together

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for the write path.
///
/// A single enum covers mapping, flush, executor and lifecycle failures;
/// each variant documents whether the engine recovers locally or surfaces
/// it to the caller.
pub mod error;

/// Typed values and inbound events.
///
/// Defines the value model shared by both flush paths, field references
/// (positional or named), and the `Event` producers push.
pub mod value;

/// Columnar bulk row container.
///
/// The accumulation vehicle of the bulk path: one growable typed buffer
/// per statement parameter, a row cursor, and NULL tracking. Kind is fixed
/// by the first write to a column.
pub mod container;

/// Batched prepared statements.
///
/// Owns the live container for one statement, resolves named parameters,
/// and sizes fresh containers from recent batch history.
pub mod statement;

/// Multi-row INSERT text builder.
///
/// The fallback path for stores without bulk binding: rows render into
/// tuple literals and pack greedily under a byte ceiling.
pub mod builder;

/// Flush scheduling.
///
/// The readiness predicate deciding when a pending batch ships: row
/// ceiling, age deadline, and a one-shot force for shutdown paths.
pub mod scheduler;

/// Write categories and connection routing.
///
/// The conflict table declaring which categories must not share an
/// uncommitted transaction, and the manager that routes each batch to a
/// connection (pinned, instance-affine, or least loaded).
pub mod conflict;

/// Natural-key resolution caches.
///
/// Index, metric, severity and tag caches consulted on the hot write
/// path. Lazy population, explicit purge, safe under concurrent readers.
pub mod cache;

/// The store-facing execution boundary.
///
/// One `StatementExecutor` per connection, driven from that connection's
/// worker thread. Everything above this trait is store-agnostic.
pub mod executor;

/// Bundled SQLite executor.
pub mod sqlite;

/// Configuration surface: per-stream caps, pool size, routing, conflicts.
pub mod config;

/// The write engine.
///
/// Ties the batches, scheduler, conflict manager and workers together
/// behind `push`/`flush`/`drain`. The main entry point is
/// [`WriteEngine`](engine::WriteEngine).
pub mod engine;

// =============================================================================
// Re-exports
// =============================================================================

pub use builder::{MultiInsertBuilder, DEFAULT_MAX_QUERY_TOTAL_LENGTH};
pub use cache::{Cache, IndexInfo, IndexKey, MetricInfo, MetricKey, ResolutionCaches, SeverityKey, TagKey};
pub use conflict::{Action, ActionMask, ConflictManager, ConflictTable, Route};
pub use config::{EngineConfig, RoutingConfig, StreamConfig, DEFAULT_MAX_INTERVAL, DEFAULT_MAX_ROWS};
pub use container::{Column, RowContainer};
pub use engine::{ConnectionSnapshot, EngineSnapshot, StreamSnapshot, WriteEngine};
pub use error::{Error, Result};
pub use executor::{StatementExecutor, StatementId};
pub use scheduler::FlushPolicy;
pub use sqlite::SqliteExecutor;
pub use statement::{BatchedStatement, BindMapping};
pub use value::{ColumnKind, Event, Field, FieldRef, StreamName, Value};
