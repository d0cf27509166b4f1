//! # Configuration Surface
//!
//! Owned elsewhere (the process's configuration loader), read-only here.
//! Per-stream caps, the pool size, the routing pins and the conflict table
//! all arrive through these types; the engine only validates them.

use std::time::Duration;

use crate::builder::DEFAULT_MAX_QUERY_TOTAL_LENGTH;
use crate::conflict::{Action, ConflictTable};

// =============================================================================
// Stream Configuration
// =============================================================================

/// Default row cap per pending batch.
pub const DEFAULT_MAX_ROWS: usize = 100_000;

/// Default age cap per pending batch.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Per-stream flush thresholds and builder limits.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Flush when this many rows have accumulated.
    pub max_rows: usize,
    /// Flush when the oldest pending row is this old.
    pub max_interval: Duration,
    /// Byte ceiling for one rendered multi-insert statement (text path).
    pub max_query_total_length: usize,
    /// Optional cap on tuples per statement (parameter-count-limited
    /// backends). `None` disables it.
    pub max_tuples_per_query: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_query_total_length: DEFAULT_MAX_QUERY_TOTAL_LENGTH,
            max_tuples_per_query: None,
        }
    }
}

impl StreamConfig {
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_max_query_total_length(mut self, bytes: usize) -> Self {
        self.max_query_total_length = bytes;
        self
    }

    pub fn with_max_tuples_per_query(mut self, max: usize) -> Self {
        self.max_tuples_per_query = Some(max);
        self
    }
}

// =============================================================================
// Routing Configuration
// =============================================================================

/// Which categories are pinned to which dedicated connection.
///
/// Pinning exists to keep lock-escalation-prone writes (logs, custom
/// variables, group writes) off the round-robin pool. The set of pinned
/// categories is a production heuristic, not an invariant, so it is plain
/// configuration: validate it against the target store's locking behavior
/// rather than assuming these categories are universally correct.
#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    pins: Vec<(Action, usize)>,
}

impl RoutingConfig {
    /// No pinned categories; everything routes by instance or load.
    pub fn none() -> Self {
        Self::default()
    }

    /// The production default: each escalation-prone category gets a
    /// dedicated slot, folded onto the pool. Membership writes share their
    /// group-definition connection so the commit-then-proceed rule
    /// serializes them there.
    pub fn default_pins(connections: usize) -> Self {
        let slots: [(Action, usize); 10] = [
            (Action::CustomVariables, 0),
            (Action::Downtimes, 1),
            (Action::HostGroups, 2),
            (Action::HostGroupMembers, 2),
            (Action::HostParents, 3),
            (Action::Logs, 4),
            (Action::ServiceGroups, 5),
            (Action::ServiceGroupMembers, 5),
            (Action::Severities, 6),
            (Action::Tags, 7),
        ];
        Self {
            pins: slots
                .into_iter()
                .map(|(action, slot)| (action, slot % connections.max(1)))
                .collect(),
        }
    }

    /// Pins `action` to `connection`, replacing any previous pin.
    pub fn pin(mut self, action: Action, connection: usize) -> Self {
        self.pins.retain(|(a, _)| *a != action);
        self.pins.push((action, connection));
        self
    }

    /// The dedicated connection for `action`, if pinned.
    pub fn pinned(&self, action: Action) -> Option<usize> {
        self.pins
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, conn)| *conn)
    }

    /// All pins, for validation.
    pub fn pins(&self) -> impl Iterator<Item = (Action, usize)> + '_ {
        self.pins.iter().copied()
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Engine-wide configuration: pool size, conflict table, routing, timer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of physical connections (one worker thread each).
    pub connections: usize,
    /// Declared category incompatibilities.
    pub conflicts: ConflictTable,
    /// Category pinning.
    pub routing: RoutingConfig,
    /// Period of the background readiness poll.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let connections = 1;
        Self {
            connections,
            conflicts: ConflictTable::default(),
            routing: RoutingConfig::default_pins(connections),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Config for a pool of `connections`, with production pins folded onto
    /// the pool.
    pub fn with_connections(connections: usize) -> Self {
        Self {
            connections,
            routing: RoutingConfig::default_pins(connections),
            ..Self::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
