//! # Connection & Action Conflict Manager
//!
//! Many batches go to the store through several connections, and commits
//! are deliberately rare. Two connections holding uncommitted locks on
//! overlapping row sets is exactly how stores deadlock, and store-side
//! deadlock retries are expensive (full statement replay) under exactly the
//! load this engine maximizes. So conflicts are avoided explicitly instead:
//!
//! - every write is tagged with one **action category**;
//! - each connection tracks the OR of categories it has uncommitted;
//! - before a write whose category is declared incompatible with the
//!   connection's pending set, a commit is issued first and the set cleared;
//! - categories known for lock escalation are pinned to one dedicated
//!   connection, everything else goes to the least-loaded one.
//!
//! This trades some parallelism for deterministic avoidance. The
//! incompatibility table is declared data (auditable and testable in
//! isolation), not something inferred from code paths.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RoutingConfig;
use crate::error::{Error, Result};

// =============================================================================
// Action Categories
// =============================================================================

/// The closed set of write categories, one per family of store rows a
/// statement can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Action {
    Hosts = 0,
    HostGroups,
    HostGroupMembers,
    HostParents,
    Services,
    ServiceGroups,
    ServiceGroupMembers,
    CustomVariables,
    Downtimes,
    Comments,
    Acknowledgements,
    Instances,
    IndexData,
    Metrics,
    Severities,
    Tags,
    Logs,
}

impl Action {
    /// Every category, in bit order.
    pub const ALL: [Action; 17] = [
        Action::Hosts,
        Action::HostGroups,
        Action::HostGroupMembers,
        Action::HostParents,
        Action::Services,
        Action::ServiceGroups,
        Action::ServiceGroupMembers,
        Action::CustomVariables,
        Action::Downtimes,
        Action::Comments,
        Action::Acknowledgements,
        Action::Instances,
        Action::IndexData,
        Action::Metrics,
        Action::Severities,
        Action::Tags,
        Action::Logs,
    ];

    /// This category's bit in an [`ActionMask`].
    pub const fn mask(self) -> ActionMask {
        ActionMask(1 << self as u32)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Action::Hosts => "hosts",
            Action::HostGroups => "host_groups",
            Action::HostGroupMembers => "host_group_members",
            Action::HostParents => "host_parents",
            Action::Services => "services",
            Action::ServiceGroups => "service_groups",
            Action::ServiceGroupMembers => "service_group_members",
            Action::CustomVariables => "custom_variables",
            Action::Downtimes => "downtimes",
            Action::Comments => "comments",
            Action::Acknowledgements => "acknowledgements",
            Action::Instances => "instances",
            Action::IndexData => "index_data",
            Action::Metrics => "metrics",
            Action::Severities => "severities",
            Action::Tags => "tags",
            Action::Logs => "logs",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A set of [`Action`] categories as a bitmask.
///
/// Used for a connection's pending (uncommitted) categories and for the
/// rows of the incompatibility table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionMask(u32);

impl ActionMask {
    pub const NONE: ActionMask = ActionMask(0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, action: Action) -> bool {
        self.0 & action.mask().0 != 0
    }

    pub fn intersects(self, other: ActionMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.mask().0;
    }

    pub fn union(self, other: ActionMask) -> ActionMask {
        ActionMask(self.0 | other.0)
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl From<Action> for ActionMask {
    fn from(a: Action) -> Self {
        a.mask()
    }
}

impl fmt::Display for ActionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for action in Action::ALL {
            if self.contains(action) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{action}")?;
                first = false;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Incompatibility Table
// =============================================================================

/// Declared pairwise incompatibilities between categories.
///
/// Stored as one mask per category (array indexed by category), built from
/// symmetric pairs. Incompatible means: a write of category X must not land
/// on a connection that has category Y uncommitted, in either direction.
#[derive(Debug, Clone)]
pub struct ConflictTable {
    incompatible: [ActionMask; Action::ALL.len()],
}

impl ConflictTable {
    /// Builds a table from symmetric category pairs.
    pub fn from_pairs(pairs: &[(Action, Action)]) -> Self {
        let mut incompatible = [ActionMask::NONE; Action::ALL.len()];
        for &(a, b) in pairs {
            incompatible[a as usize].insert(b);
            incompatible[b as usize].insert(a);
        }
        Self { incompatible }
    }

    /// The categories incompatible with `action`.
    pub fn incompatible_with(&self, action: Action) -> ActionMask {
        self.incompatible[action as usize]
    }
}

impl Default for ConflictTable {
    /// The default table encodes the overlapping-row-set pairs observed in
    /// production: membership writes against definition writes, variable
    /// and parent writes against their owning object's writes, metric
    /// writes against index bookkeeping.
    fn default() -> Self {
        Self::from_pairs(&[
            (Action::HostGroupMembers, Action::HostGroups),
            (Action::ServiceGroupMembers, Action::ServiceGroups),
            (Action::HostParents, Action::Hosts),
            (Action::CustomVariables, Action::Hosts),
            (Action::CustomVariables, Action::Services),
            (Action::Metrics, Action::IndexData),
            (Action::Acknowledgements, Action::Comments),
        ])
    }
}

// =============================================================================
// Connection Router
// =============================================================================

/// Per-connection shared state: the pending (uncommitted) category mask and
/// a gauge of queued tasks.
#[derive(Debug)]
struct ConnState {
    pending: Mutex<ActionMask>,
    /// Incremented when a task is queued, decremented when it completes.
    /// Shared with the owning worker.
    tasks: Arc<AtomicUsize>,
}

/// Routing verdict for one write: where it goes and whether a commit must
/// be issued on that connection first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Index of the physical connection to use.
    pub connection: usize,
    /// True if the connection held an incompatible uncommitted category;
    /// the caller must issue (queue) a commit before the write.
    pub commit_first: bool,
}

/// Routes writes to physical connections and serializes incompatible
/// categories via the commit-then-proceed rule.
#[derive(Debug)]
pub struct ConflictManager {
    table: ConflictTable,
    routing: RoutingConfig,
    conns: Vec<ConnState>,
    /// Rotating start point for the least-loaded scan, so ties don't always
    /// land on connection 0.
    rr_cursor: AtomicUsize,
}

impl ConflictManager {
    /// Creates a manager for a pool of `connections` physical connections.
    ///
    /// Fails if the routing configuration pins a category past the pool.
    pub fn new(
        connections: usize,
        table: ConflictTable,
        routing: RoutingConfig,
    ) -> Result<Self> {
        if connections == 0 {
            return Err(Error::Config("connection pool cannot be empty".to_string()));
        }
        for (action, conn) in routing.pins() {
            if conn >= connections {
                return Err(Error::Config(format!(
                    "category {action} pinned to connection {conn}, but pool has {connections}"
                )));
            }
        }
        Ok(Self {
            table,
            routing,
            conns: (0..connections)
                .map(|_| ConnState {
                    pending: Mutex::new(ActionMask::NONE),
                    tasks: Arc::new(AtomicUsize::new(0)),
                })
                .collect(),
            rr_cursor: AtomicUsize::new(0),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// The queued-task gauge for a connection, shared with its worker.
    pub fn task_gauge(&self, conn: usize) -> Arc<AtomicUsize> {
        Arc::clone(&self.conns[conn].tasks)
    }

    /// Picks the connection for a write of `action`, applying in order:
    /// category pinning, instance pinning, least-loaded choice.
    ///
    /// Pinned categories always use their dedicated connection so
    /// round-robin scheduling can never escalate their locks across the
    /// pool. Instance-tagged events serialize on `instance % pool`, keeping
    /// each poller's writes ordered. Everything else goes to the connection
    /// with the fewest queued tasks.
    pub fn choose_connection(&self, action: Action, instance_id: Option<u32>) -> usize {
        if let Some(conn) = self.routing.pinned(action) {
            return conn;
        }
        if let Some(instance) = instance_id {
            return instance as usize % self.conns.len();
        }
        self.least_loaded()
    }

    /// Stable name→connection assignment: the same name always lands on
    /// the same connection. Used to keep all statements of one batch
    /// stream on one connection without pinning its whole category.
    pub fn choose_connection_by_name(&self, name: &str) -> usize {
        (xxhash_rust::xxh3::xxh3_64(name.as_bytes()) % self.conns.len() as u64) as usize
    }

    /// Least-loaded scan with a rotating start, so equal loads spread.
    fn least_loaded(&self) -> usize {
        let count = self.conns.len();
        let start = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % count;
        let mut best = start;
        let mut best_tasks = usize::MAX;
        for offset in 0..count {
            let i = (start + offset) % count;
            let tasks = self.conns[i].tasks.load(Ordering::Relaxed);
            if tasks < best_tasks {
                best = i;
                best_tasks = tasks;
            }
        }
        best
    }

    /// Resolves routing for one write and updates the pending mask.
    ///
    /// If the chosen connection has uncommitted categories incompatible
    /// with `action`, the verdict requires a commit first and the mask is
    /// reset to just `action`; the caller must queue the commit ahead of
    /// the write on that same connection, so channel order guarantees the
    /// commit lands first.
    pub fn route(&self, action: Action, instance_id: Option<u32>) -> Route {
        let connection = self.choose_connection(action, instance_id);
        let commit_first = self.acquire(connection, action);
        Route {
            connection,
            commit_first,
        }
    }

    /// Marks `action` pending on `conn`; returns true if an incompatible
    /// category was pending and a commit must be issued before the write.
    pub fn acquire(&self, conn: usize, action: Action) -> bool {
        let mut pending = self.conns[conn].pending.lock();
        let commit_first = pending.intersects(self.table.incompatible_with(action));
        if commit_first {
            pending.clear();
        }
        pending.insert(action);
        commit_first
    }

    /// Clears the pending mask of one connection (after a commit on it).
    pub fn mark_committed(&self, conn: usize) {
        self.conns[conn].pending.lock().clear();
    }

    /// Clears every pending mask, returning the connections that actually
    /// had uncommitted categories. The caller commits those.
    pub fn finish_all(&self) -> Vec<usize> {
        let mut dirty = Vec::new();
        for (i, conn) in self.conns.iter().enumerate() {
            let mut pending = conn.pending.lock();
            if !pending.is_empty() {
                dirty.push(i);
                pending.clear();
            }
        }
        dirty
    }

    /// Read-only snapshot of a connection's pending mask.
    pub fn pending_mask(&self, conn: usize) -> ActionMask {
        *self.conns[conn].pending.lock()
    }

    /// Read-only snapshot of a connection's queued-task count.
    pub fn task_count(&self, conn: usize) -> usize {
        self.conns[conn].tasks.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
