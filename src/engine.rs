//! # Write Engine
//!
//! The front door of the crate: producers push typed events, the engine
//! accumulates them into per-stream batches and dispatches ready batches to
//! a pool of connection workers, one dedicated thread per physical
//! connection.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            WriteEngine                               │
//! │                                                                      │
//! │  push(Event) ──► stream registry                                     │
//! │                  ┌───────────────────────────────┐                   │
//! │                  │ "metrics"   BatchedStatement  │  ready? ──┐       │
//! │                  │ "logs"      MultiInsertBuilder│           │       │
//! │                  │ ...         + FlushPolicy     │           │       │
//! │                  └───────────────────────────────┘           │       │
//! │                                                              ▼       │
//! │                  ConflictManager::route ──► connection, commit_first │
//! │                                                              │       │
//! │   ┌──────────────────────────┬───────────────────────────────┘       │
//! │   ▼                          ▼                                       │
//! │  worker 0                   worker 1          (thread per conn)      │
//! │  mpsc queue ──► executor    mpsc queue ──► executor                  │
//! │  [Commit][ExecuteBulk]...   [ExecuteText]...                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! Each worker drains its queue in FIFO order on one thread, so ordering on
//! a connection is exactly enqueue order. The commit-before-write rule of
//! the conflict manager is enforced by queueing the commit task ahead of
//! the write on the same channel. Pending-mask updates and the enqueues
//! they justify happen under the stream registry lock, group commits
//! included, so mask state and queue order can never diverge.
//!
//! ## Commit points
//!
//! Batches execute inside each connection's open transaction. The
//! transaction commits when the conflict manager demands a commit-first
//! hand-off, at every background poll tick (group commit across streams),
//! and at [`WriteEngine::drain`].
//!
//! ## Failure
//!
//! Flush dispatch is fire-and-forget: a failed batch is logged with its
//! statement, category and row range, recorded for
//! [`WriteEngine::take_flush_errors`], and dropped. Every emitted statement
//! is expected to be an idempotent upsert, so retry policy belongs to the
//! caller.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::builder::MultiInsertBuilder;
use crate::conflict::{Action, ActionMask, ConflictManager};
use crate::config::{EngineConfig, StreamConfig};
use crate::container::RowContainer;
use crate::error::{Error, Result};
use crate::executor::{StatementExecutor, StatementId};
use crate::cache::{IndexInfo, IndexKey, MetricInfo, MetricKey, ResolutionCaches, SeverityKey, TagKey};
use crate::scheduler::FlushPolicy;
use crate::statement::{BatchedStatement, BindMapping};
use crate::value::{Event, StreamName, Value};

// =============================================================================
// Worker Tasks
// =============================================================================

/// One unit of work on a connection worker's queue.
enum WorkerTask {
    /// Compile a statement template under an engine-assigned id.
    Prepare {
        id: StatementId,
        template: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Execute a prepared statement once per container row.
    ExecuteBulk {
        id: StatementId,
        category: ActionMask,
        rows: RowContainer,
    },
    /// Execute one rendered multi-insert statement.
    ExecuteText { stream: StreamName, sql: String },
    /// Commit the connection's open transaction.
    Commit {
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Stop the worker loop.
    Shutdown,
}

/// Sender side of one connection worker, plus its queued-task gauge.
struct Worker {
    tx: UnboundedSender<WorkerTask>,
    gauge: Arc<AtomicUsize>,
}

// =============================================================================
// Stream State
// =============================================================================

/// The accumulation vehicle of one registered stream.
enum Sink {
    /// True bulk binding: rows in a columnar container, executed via a
    /// prepared statement.
    Statement(BatchedStatement),
    /// Textual fallback: rows rendered into tuple literals, packed under a
    /// byte ceiling at flush time.
    MultiInsert {
        builder: MultiInsertBuilder,
        param_count: usize,
        mapping: Option<BindMapping>,
    },
}

struct StreamState {
    sink: Sink,
    policy: FlushPolicy,
    action: Action,
    /// When the oldest pending row arrived. `None` while empty.
    first_row_at: Option<Instant>,
    /// Instance id of the first pinned event in the pending batch, used to
    /// route the whole batch.
    pending_instance: Option<u32>,
}

impl StreamState {
    fn pending_rows(&self) -> usize {
        match &self.sink {
            Sink::Statement(stmt) => stmt.row_count(),
            Sink::MultiInsert { builder, .. } => builder.row_count(),
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time view of one registered stream.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub stream: StreamName,
    /// Rows accumulated since the last flush.
    pub pending_rows: usize,
    /// Time left until the deadline flush.
    pub until_deadline: Duration,
    /// Age of the oldest pending row, if any.
    pub oldest_age: Option<Duration>,
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub connection: usize,
    /// Uncommitted categories on this connection.
    pub pending: ActionMask,
    /// Tasks queued but not yet completed by the worker.
    pub queued_tasks: usize,
}

/// Observability snapshot of the whole engine.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub streams: Vec<StreamSnapshot>,
    pub connections: Vec<ConnectionSnapshot>,
}

// =============================================================================
// Shared Core
// =============================================================================

/// State shared between the engine facade, the poll thread and (via
/// gauges/error sink) the workers.
struct Shared {
    streams: Mutex<HashMap<StreamName, StreamState>>,
    conflicts: ConflictManager,
    caches: ResolutionCaches,
    workers: Vec<Worker>,
    next_statement: AtomicU32,
    draining: AtomicBool,
    /// Errors recorded by fire-and-forget worker tasks. Same allocation
    /// the workers write into.
    flush_errors: Arc<Mutex<Vec<Error>>>,
}

impl Shared {
    /// Queues one task on a connection, bumping its gauge. A dead worker is
    /// logged; the task is lost (the process is tearing down).
    fn enqueue(&self, conn: usize, task: WorkerTask) {
        let worker = &self.workers[conn];
        worker.gauge.fetch_add(1, Ordering::Relaxed);
        if worker.tx.send(task).is_err() {
            worker.gauge.fetch_sub(1, Ordering::Relaxed);
            error!(connection = conn, "worker is gone, task dropped");
        }
    }

    /// Dispatches a stream's pending batch to its connection. No-op when
    /// the stream is empty.
    ///
    /// Callers hold the stream registry lock; that is what makes the mask
    /// update and the enqueue atomic against a concurrent group commit.
    fn flush_stream(&self, name: &StreamName, state: &mut StreamState) {
        let rows = state.pending_rows();
        if rows == 0 {
            return;
        }
        let instance = state.pending_instance;

        match &mut state.sink {
            Sink::Statement(stmt) => {
                let route = self.conflicts.route(state.action, instance);
                if route.commit_first {
                    self.enqueue(route.connection, WorkerTask::Commit { reply: None });
                }
                if let Some(bind) = stmt.take_bind() {
                    debug!(
                        stream = %name,
                        statement = %stmt.id(),
                        rows,
                        connection = route.connection,
                        commit_first = route.commit_first,
                        "flushing bulk batch"
                    );
                    self.enqueue(
                        route.connection,
                        WorkerTask::ExecuteBulk {
                            id: stmt.id(),
                            category: state.action.mask(),
                            rows: bind,
                        },
                    );
                }
            }
            Sink::MultiInsert { builder, .. } => {
                // Text statements have no prepared handle; they pin to a
                // connection by stream name so one stream stays ordered.
                let conn = self.conflicts.choose_connection_by_name(name.as_str());
                if self.conflicts.acquire(conn, state.action) {
                    self.enqueue(conn, WorkerTask::Commit { reply: None });
                }
                let statements = builder.take_statements();
                debug!(
                    stream = %name,
                    rows,
                    statements = statements.len(),
                    connection = conn,
                    "flushing multi-insert batch"
                );
                for sql in statements {
                    self.enqueue(
                        conn,
                        WorkerTask::ExecuteText {
                            stream: name.clone(),
                            sql,
                        },
                    );
                }
            }
        }

        state.policy.reset_deadline();
        state.first_row_at = None;
        state.pending_instance = None;
    }

    /// One pass of the background timer: flush every stream whose policy is
    /// ready, then group-commit the connections that took writes.
    fn poll_once(&self) {
        let mut streams = self.streams.lock();
        for (name, state) in streams.iter_mut() {
            if state.policy.ready(state.pending_rows()) {
                self.flush_stream(name, state);
            }
        }
        drop(streams);
        self.commit_dirty(None);
    }

    /// Commits every connection with uncommitted categories. When `replies`
    /// is given, the commits carry reply channels and the receivers are
    /// pushed there along with their connection index.
    fn commit_dirty(&self, mut replies: Option<&mut Vec<(usize, oneshot::Receiver<Result<()>>)>>) {
        // The registry lock serializes this sweep against flush_stream,
        // whose callers all hold it: without it a flush could mark a
        // category pending between finish_all and the commit enqueue, and
        // its write would land after a commit its mask no longer reflects.
        let _streams = self.streams.lock();
        for conn in self.conflicts.finish_all() {
            let reply = match replies.as_deref_mut() {
                Some(out) => {
                    let (tx, rx) = oneshot::channel();
                    out.push((conn, rx));
                    Some(tx)
                }
                None => None,
            };
            self.enqueue(conn, WorkerTask::Commit { reply });
        }
    }
}

// =============================================================================
// Worker Loop
// =============================================================================

/// Runs one connection worker: receives tasks in FIFO order and drives the
/// executor. Runs on a dedicated thread inside a current-thread runtime.
async fn run_worker(
    connection: usize,
    mut executor: Box<dyn StatementExecutor>,
    mut rx: UnboundedReceiver<WorkerTask>,
    gauge: Arc<AtomicUsize>,
    errors: Arc<Mutex<Vec<Error>>>,
) {
    while let Some(task) = rx.recv().await {
        let mut stop = false;
        match task {
            WorkerTask::Prepare {
                id,
                template,
                reply,
            } => {
                let _ = reply.send(executor.prepare(id, &template));
            }
            WorkerTask::ExecuteBulk { id, category, rows } => {
                let row_count = rows.row_count();
                if let Err(e) = executor.execute_bulk(id, &rows) {
                    let failure = Error::FlushFailed {
                        statement: id,
                        category,
                        row_count,
                        source: Box::new(e),
                    };
                    error!(connection, %failure, "bulk flush failed, batch dropped");
                    errors.lock().push(failure);
                }
            }
            WorkerTask::ExecuteText { stream, sql } => {
                if let Err(e) = executor.execute_text(&sql) {
                    error!(connection, stream = %stream, %e, "multi-insert flush failed, statement dropped");
                    errors.lock().push(e);
                }
            }
            WorkerTask::Commit { reply } => {
                let result = executor.commit();
                if let Err(e) = &result {
                    error!(connection, %e, "commit failed");
                }
                match reply {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            errors.lock().push(e);
                        }
                    }
                }
            }
            WorkerTask::Shutdown => stop = true,
        }
        gauge.fetch_sub(1, Ordering::Relaxed);
        if stop {
            break;
        }
    }
    debug!(connection, "worker stopped");
}

/// Awaits a set of reply channels from outside any runtime, mapping a
/// vanished worker to [`Error::ConnectionGone`].
fn await_replies(replies: Vec<(usize, oneshot::Receiver<Result<()>>)>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Executor(format!("reply runtime: {e}")))?;
    let (conns, receivers): (Vec<usize>, Vec<_>) = replies.into_iter().unzip();
    let results = rt.block_on(join_all(receivers));
    for (conn, result) in conns.into_iter().zip(results) {
        match result {
            Ok(inner) => inner?,
            Err(_) => return Err(Error::ConnectionGone { connection: conn }),
        }
    }
    Ok(())
}

// =============================================================================
// Engine
// =============================================================================

/// The batching write engine. See the module docs for the moving parts.
pub struct WriteEngine {
    shared: Arc<Shared>,
    worker_threads: Vec<JoinHandle<()>>,
    poll_stop: std::sync::mpsc::SyncSender<()>,
    poll_thread: Option<JoinHandle<()>>,
}

impl WriteEngine {
    /// Builds the engine: one executor, queue and worker thread per
    /// connection, plus the background readiness poll.
    ///
    /// The factory is called once per connection index and must hand each
    /// worker its own executor.
    pub fn new<E, F>(config: EngineConfig, mut make_executor: F) -> Result<Self>
    where
        E: StatementExecutor + 'static,
        F: FnMut(usize) -> Result<E>,
    {
        let conflicts = ConflictManager::new(config.connections, config.conflicts, config.routing)?;
        let flush_errors = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(config.connections);
        let mut worker_threads = Vec::with_capacity(config.connections);
        for conn in 0..config.connections {
            let executor: Box<dyn StatementExecutor> = Box::new(make_executor(conn)?);
            let (tx, rx) = mpsc::unbounded_channel();
            let gauge = conflicts.task_gauge(conn);
            let errors = Arc::clone(&flush_errors);
            let loop_gauge = Arc::clone(&gauge);
            let thread = std::thread::Builder::new()
                .name(format!("sinkwell-conn-{conn}"))
                .spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build();
                    match rt {
                        Ok(rt) => rt.block_on(run_worker(conn, executor, rx, loop_gauge, errors)),
                        Err(e) => error!(connection = conn, %e, "failed to build worker runtime"),
                    }
                })
                .map_err(|e| Error::Executor(format!("failed to spawn worker {conn}: {e}")))?;
            workers.push(Worker { tx, gauge });
            worker_threads.push(thread);
        }

        let shared = Arc::new(Shared {
            streams: Mutex::new(HashMap::new()),
            conflicts,
            caches: ResolutionCaches::new(),
            workers,
            next_statement: AtomicU32::new(1),
            draining: AtomicBool::new(false),
            flush_errors,
        });

        // A sync sender keeps the engine `Sync`, so producers on several
        // threads can share one `&WriteEngine`.
        let (poll_stop, stop_rx) = std::sync::mpsc::sync_channel::<()>(1);
        let poll_shared = Arc::clone(&shared);
        let interval = config.poll_interval;
        let poll_thread = std::thread::Builder::new()
            .name("sinkwell-poll".to_string())
            .spawn(move || {
                use std::sync::mpsc::RecvTimeoutError;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => poll_shared.poll_once(),
                        _ => break,
                    }
                }
            })
            .map_err(|e| Error::Executor(format!("failed to spawn poll thread: {e}")))?;

        info!(connections = config.connections, "write engine started");
        Ok(Self {
            shared,
            worker_threads,
            poll_stop,
            poll_thread: Some(poll_thread),
        })
    }

    /// Builds an engine whose connections are all SQLite connections to the
    /// same database file.
    pub fn with_sqlite(config: EngineConfig, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::new(config, move |_| {
            let conn = rusqlite::Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(30))?;
            Ok(crate::sqlite::SqliteExecutor::new(conn))
        })
    }

    // =========================================================================
    // Stream Registration
    // =========================================================================

    /// Registers a bulk-bound stream: events bind into a columnar container
    /// and execute via a prepared statement.
    ///
    /// The template is compiled on every connection under one id, so the
    /// batch can later route to any of them. Registering a name twice is
    /// refused; the existing stream and its pending rows are untouched.
    pub fn register_statement(
        &self,
        name: impl Into<StreamName>,
        template: impl Into<String>,
        action: Action,
        config: StreamConfig,
    ) -> Result<()> {
        let name = name.into();
        let template = template.into();
        if self.shared.draining.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        if self.shared.streams.lock().contains_key(&name) {
            return Err(Error::Config(format!("stream '{name}' is already registered")));
        }

        let id = StatementId::new(self.shared.next_statement.fetch_add(1, Ordering::Relaxed));
        let statement = BatchedStatement::new(id, template.clone());
        self.prepare_everywhere(id, &template)?;

        let policy = FlushPolicy::new(config.max_rows, config.max_interval);
        match self.shared.streams.lock().entry(name.clone()) {
            // A racing registration won while the template compiled; its
            // pending rows must not be discarded.
            Entry::Occupied(_) => {
                return Err(Error::Config(format!("stream '{name}' is already registered")))
            }
            Entry::Vacant(slot) => {
                slot.insert(StreamState {
                    sink: Sink::Statement(statement),
                    policy,
                    action,
                    first_row_at: None,
                    pending_instance: None,
                });
            }
        }
        info!(stream = %name, statement = %id, category = action.name(), "stream registered (bulk)");
        Ok(())
    }

    /// Registers a multi-insert stream: events render into tuple literals
    /// and execute as packed `INSERT ... VALUES (...),(...)` statements.
    ///
    /// `param_count` is the tuple arity; `mapping` resolves named fields to
    /// tuple positions.
    pub fn register_multi_insert(
        &self,
        name: impl Into<StreamName>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        param_count: usize,
        mapping: Option<BindMapping>,
        action: Action,
        config: StreamConfig,
    ) -> Result<()> {
        let name = name.into();
        if self.shared.draining.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }

        let mut builder =
            MultiInsertBuilder::new(prefix, suffix).with_max_bytes(config.max_query_total_length);
        if let Some(max) = config.max_tuples_per_query {
            builder = builder.with_max_tuples(max);
        }
        let policy = FlushPolicy::new(config.max_rows, config.max_interval);
        match self.shared.streams.lock().entry(name.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::Config(format!("stream '{name}' is already registered")))
            }
            Entry::Vacant(slot) => {
                slot.insert(StreamState {
                    sink: Sink::MultiInsert {
                        builder,
                        param_count,
                        mapping,
                    },
                    policy,
                    action,
                    first_row_at: None,
                    pending_instance: None,
                });
            }
        }
        info!(stream = %name, category = action.name(), "stream registered (multi-insert)");
        Ok(())
    }

    /// Compiles a template on every connection under one id.
    fn prepare_everywhere(&self, id: StatementId, template: &str) -> Result<()> {
        let mut replies = Vec::with_capacity(self.shared.workers.len());
        for conn in 0..self.shared.workers.len() {
            let (tx, rx) = oneshot::channel();
            replies.push((conn, rx));
            self.shared.enqueue(
                conn,
                WorkerTask::Prepare {
                    id,
                    template: template.to_string(),
                    reply: tx,
                },
            );
        }
        await_replies(replies)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Appends one event to its stream's pending batch, flushing if the
    /// batch becomes ready.
    ///
    /// A field naming an unknown parameter is dropped with a warning; the
    /// rest of the row is still appended. Appending to an unregistered
    /// stream is an error, appending after [`drain`](Self::drain) returns
    /// [`Error::ShutDown`].
    pub fn push(&self, event: Event) -> Result<()> {
        if self.shared.draining.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }

        let mut streams = self.shared.streams.lock();
        let state = streams
            .get_mut(&event.stream)
            .ok_or_else(|| Error::Config(format!("no stream registered under '{}'", event.stream)))?;

        match &mut state.sink {
            Sink::Statement(stmt) => {
                for field in &event.fields {
                    let bound = match &field.value {
                        Some(value) => stmt.bind_value(&field.target, value.clone()),
                        None => stmt.bind_null(&field.target, field.null_kind),
                    };
                    // Unknown names were already logged by the statement;
                    // the row goes on without that field.
                    if let Err(e) = bound {
                        debug_assert!(matches!(e, Error::UnknownParameter { .. }));
                    }
                }
                stmt.next_row();
            }
            Sink::MultiInsert {
                builder,
                param_count,
                mapping,
            } => {
                let tuple = render_tuple(&event, *param_count, mapping.as_ref());
                builder.push(tuple);
            }
        }

        if state.first_row_at.is_none() {
            state.first_row_at = Some(Instant::now());
        }
        if state.pending_instance.is_none() {
            state.pending_instance = event.instance_id;
        }

        if state.policy.ready(state.pending_rows()) {
            let name = event.stream;
            self.shared.flush_stream(&name, state);
        }
        Ok(())
    }

    /// Flushes one stream now, regardless of readiness.
    pub fn flush(&self, name: &StreamName) -> Result<()> {
        let mut streams = self.shared.streams.lock();
        let state = streams
            .get_mut(name)
            .ok_or_else(|| Error::Config(format!("no stream registered under '{name}'")))?;
        state.policy.force_ready();
        if state.policy.ready(state.pending_rows()) {
            self.shared.flush_stream(name, state);
        }
        Ok(())
    }

    /// Commits every connection that holds uncommitted writes and clears
    /// the pending category masks. Fire-and-forget.
    pub fn commit_all(&self) {
        self.shared.commit_dirty(None);
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Drains the engine: flushes every pending batch, commits every
    /// connection, waits for the commits to land and stops the workers.
    ///
    /// Idempotent. Any append after the first drain call fails with
    /// [`Error::ShutDown`].
    pub fn drain(&mut self) -> Result<()> {
        if self.shared.draining.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("draining write engine");

        let _ = self.poll_stop.try_send(());
        if let Some(thread) = self.poll_thread.take() {
            let _ = thread.join();
        }

        {
            let mut streams = self.shared.streams.lock();
            for (name, state) in streams.iter_mut() {
                state.policy.force_ready();
                self.shared.flush_stream(name, state);
            }
        }

        let mut replies = Vec::new();
        self.shared.commit_dirty(Some(&mut replies));
        // Final commit on every connection: flushes above marked their
        // connections dirty, but an executor can hold a lazily-opened
        // transaction even with a clean mask.
        let already: Vec<usize> = replies.iter().map(|(c, _)| *c).collect();
        for conn in 0..self.shared.workers.len() {
            if !already.contains(&conn) {
                let (tx, rx) = oneshot::channel();
                replies.push((conn, rx));
                self.shared.enqueue(conn, WorkerTask::Commit { reply: Some(tx) });
            }
        }
        let commit_result = await_replies(replies);

        for conn in 0..self.shared.workers.len() {
            self.shared.enqueue(conn, WorkerTask::Shutdown);
        }
        for thread in self.worker_threads.drain(..) {
            let _ = thread.join();
        }

        info!("write engine drained");
        commit_result
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Point-in-time view of pending batches and connections.
    pub fn snapshot(&self) -> EngineSnapshot {
        let streams = self
            .shared
            .streams
            .lock()
            .iter()
            .map(|(name, state)| StreamSnapshot {
                stream: name.clone(),
                pending_rows: state.pending_rows(),
                until_deadline: state.policy.until_deadline(),
                oldest_age: state.first_row_at.map(|t| t.elapsed()),
            })
            .collect();
        let connections = (0..self.shared.workers.len())
            .map(|conn| ConnectionSnapshot {
                connection: conn,
                pending: self.shared.conflicts.pending_mask(conn),
                queued_tasks: self.shared.conflicts.task_count(conn),
            })
            .collect();
        EngineSnapshot {
            streams,
            connections,
        }
    }

    /// Drains the errors recorded by fire-and-forget flushes since the last
    /// call.
    pub fn take_flush_errors(&self) -> Vec<Error> {
        std::mem::take(&mut *self.shared.flush_errors.lock())
    }

    // =========================================================================
    // Resolution Caches
    // =========================================================================

    /// The shared resolution caches.
    pub fn caches(&self) -> &ResolutionCaches {
        &self.shared.caches
    }

    /// Cold-start load: replaces the index cache with rows fetched from the
    /// store at startup.
    pub fn load_indexes(&self, rows: impl IntoIterator<Item = (IndexKey, IndexInfo)>) {
        self.shared.caches.indexes.replace_all(rows);
    }

    /// Cold-start load for the metric cache.
    pub fn load_metrics(&self, rows: impl IntoIterator<Item = (MetricKey, MetricInfo)>) {
        self.shared.caches.metrics.replace_all(rows);
    }

    /// Cold-start load for the severity cache.
    pub fn load_severities(&self, rows: impl IntoIterator<Item = (SeverityKey, u64)>) {
        self.shared.caches.severities.replace_all(rows);
    }

    /// Cold-start load for the tag cache.
    pub fn load_tags(&self, rows: impl IntoIterator<Item = (TagKey, u64)>) {
        self.shared.caches.tags.replace_all(rows);
    }

    /// Purges every cached resolution for hosts of a deleted instance,
    /// cascading into the metric cache.
    pub fn purge_instance_hosts(&self, host_ids: &[u64]) {
        let mut index_ids = Vec::new();
        let removed = self.shared.caches.indexes.purge_if(|(host, _), info| {
            if host_ids.contains(host) {
                index_ids.push(info.index_id);
                true
            } else {
                false
            }
        });
        self.shared
            .caches
            .metrics
            .purge_if(|(index_id, _), _| index_ids.contains(index_id));
        if removed > 0 {
            debug!(hosts = host_ids.len(), indexes = removed, "purged caches for deleted instance");
        }
    }
}

impl Drop for WriteEngine {
    fn drop(&mut self) {
        if !self.shared.draining.load(Ordering::SeqCst) {
            if let Err(e) = self.drain() {
                warn!(%e, "drain on drop failed");
            }
        }
    }
}

// =============================================================================
// Tuple Rendering
// =============================================================================

/// Renders an event into the body of one `VALUES` tuple, in parameter
/// order. Unset parameters and explicit NULL fields render as `NULL`;
/// fields naming an unknown parameter are dropped with a warning.
fn render_tuple(event: &Event, param_count: usize, mapping: Option<&BindMapping>) -> String {
    let mut slots: Vec<Option<&Value>> = vec![None; param_count];
    for field in &event.fields {
        let index = match &field.target {
            crate::value::FieldRef::Index(i) => Some(*i),
            crate::value::FieldRef::Name(name) => mapping.and_then(|m| m.get(name.as_str()).copied()),
        };
        match index {
            Some(i) if i < param_count => slots[i] = field.value.as_ref(),
            _ => {
                warn!(stream = %event.stream, field = %field.target, "unknown parameter, field dropped");
            }
        }
    }
    let mut out = String::new();
    for (i, slot) in slots.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match slot {
            Some(value) => out.push_str(&value.to_sql_literal()),
            None => out.push_str("NULL"),
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
