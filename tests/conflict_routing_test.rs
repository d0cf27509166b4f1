//! Conflict-aware dispatch across a connection pool: incompatible
//! categories, routing affinity and the observability snapshot.

mod common;

use std::time::Duration;

use sinkwell::{
    Action, ConflictTable, EngineConfig, Event, RoutingConfig, StreamConfig, WriteEngine,
};

use common::{count_rows, create_temp_db_file};

fn quiet_config(connections: usize) -> EngineConfig {
    EngineConfig {
        connections,
        conflicts: ConflictTable::default(),
        routing: RoutingConfig::none(),
        poll_interval: Duration::from_secs(3600),
    }
}

#[test]
fn test_incompatible_categories_both_land() {
    let (_dir, path) = create_temp_db_file("conflict.db");
    let mut engine = WriteEngine::with_sqlite(quiet_config(1), &path).unwrap();
    engine
        .register_statement(
            "comments",
            "INSERT INTO comments (host_id, entry_time, data) VALUES (?,?,?)",
            Action::Comments,
            StreamConfig::default().with_max_rows(1),
        )
        .unwrap();
    engine
        .register_statement(
            "acks",
            "INSERT INTO acknowledgements (host_id, entry_time, author) VALUES (?,?,?)",
            Action::Acknowledgements,
            StreamConfig::default().with_max_rows(1),
        )
        .unwrap();

    // Comments then acknowledgements force a commit between the two
    // batches on the shared connection; both survive.
    engine
        .push(Event::new("comments").field(0, 1i64).field(1, 100i64).field(2, "down for maintenance"))
        .unwrap();
    engine
        .push(Event::new("acks").field(0, 1i64).field(1, 101i64).field(2, "admin"))
        .unwrap();
    engine.drain().unwrap();

    assert_eq!(count_rows(&path, "comments"), 1);
    assert_eq!(count_rows(&path, "acknowledgements"), 1);
    assert!(engine.take_flush_errors().is_empty());
}

#[test]
fn test_pool_of_connections_lands_everything() {
    let (_dir, path) = create_temp_db_file("pool.db");
    let mut engine = WriteEngine::with_sqlite(quiet_config(3), &path).unwrap();
    engine
        .register_statement(
            "metrics",
            "INSERT INTO metrics (metric_id, ctime, value) VALUES (?,?,?)",
            Action::Metrics,
            StreamConfig::default().with_max_rows(10),
        )
        .unwrap();

    // Instance-pinned events spread deterministically over the pool.
    for i in 0..60i64 {
        engine
            .push(
                Event::new("metrics")
                    .field(0, i)
                    .field(1, 1000 + i)
                    .field(2, 0.5f64)
                    .from_instance((i % 5) as u32),
            )
            .unwrap();
    }
    engine.drain().unwrap();

    assert_eq!(count_rows(&path, "metrics"), 60);
}

#[test]
fn test_snapshot_tracks_pending_state() {
    let (_dir, path) = create_temp_db_file("snapshot.db");
    let mut engine = WriteEngine::with_sqlite(quiet_config(2), &path).unwrap();
    engine
        .register_statement(
            "metrics",
            "INSERT INTO metrics (metric_id, ctime, value) VALUES (?,?,?)",
            Action::Metrics,
            StreamConfig::default(),
        )
        .unwrap();

    engine
        .push(Event::new("metrics").field(0, 1i64).field(1, 1i64).field(2, 1.0f64))
        .unwrap();

    let snap = engine.snapshot();
    assert_eq!(snap.connections.len(), 2);
    let stream = snap.streams.iter().find(|s| s.stream.as_str() == "metrics").unwrap();
    assert_eq!(stream.pending_rows, 1);
    assert!(stream.oldest_age.is_some());
    assert!(stream.until_deadline <= Duration::from_secs(10));

    engine.drain().unwrap();
    let snap = engine.snapshot();
    assert!(snap.streams.iter().all(|s| s.pending_rows == 0));
    assert!(snap.connections.iter().all(|c| c.pending.is_empty()));
}

#[test]
fn test_pin_past_pool_is_a_configuration_error() {
    let (_dir, path) = create_temp_db_file("badpin.db");
    let config = EngineConfig {
        connections: 2,
        routing: RoutingConfig::none().pin(Action::Logs, 5),
        ..EngineConfig::default()
    };
    assert!(WriteEngine::with_sqlite(config, &path).is_err());
}
