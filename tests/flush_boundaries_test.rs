//! End-to-end flush behavior over SQLite: row ceilings, age deadlines and
//! drain completeness.

mod common;

use std::time::Duration;

use sinkwell::{Action, EngineConfig, Event, StreamConfig, WriteEngine};

use common::{count_rows, create_temp_db_file, eventually};

fn metric_event(i: i64) -> Event {
    Event::new("metrics")
        .field("metric_id", i)
        .field("ctime", 1000 + i)
        .field("value", i as f64 * 0.25)
}

const METRICS_TEMPLATE: &str =
    "INSERT INTO metrics (metric_id, ctime, value) VALUES (:metric_id, :ctime, :value)";

#[test]
fn test_row_ceiling_flush_keeps_remainder_pending() {
    let (_dir, path) = create_temp_db_file("ceiling.db");
    let mut engine = WriteEngine::with_sqlite(EngineConfig::default(), &path).unwrap();
    engine
        .register_statement(
            "metrics",
            METRICS_TEMPLATE,
            Action::Metrics,
            StreamConfig::default().with_max_rows(2),
        )
        .unwrap();

    for i in 0..3 {
        engine.push(metric_event(i)).unwrap();
    }

    // The full batch of two flushed; the third row sits pending and
    // uncommitted until something ends the transaction.
    assert_eq!(engine.snapshot().streams[0].pending_rows, 1);
    engine.commit_all();
    eventually(Duration::from_secs(5), Duration::from_millis(10), || {
        count_rows(&path, "metrics") == 2
    });

    engine.drain().unwrap();
    assert_eq!(count_rows(&path, "metrics"), 3);
    assert!(engine.take_flush_errors().is_empty());
}

#[test]
fn test_deadline_flush_via_background_poll() {
    let (_dir, path) = create_temp_db_file("deadline.db");
    let config = EngineConfig {
        poll_interval: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let mut engine = WriteEngine::with_sqlite(config, &path).unwrap();
    engine
        .register_statement(
            "metrics",
            METRICS_TEMPLATE,
            Action::Metrics,
            StreamConfig::default().with_max_interval(Duration::from_millis(50)),
        )
        .unwrap();

    engine.push(metric_event(1)).unwrap();

    // One row is far below the ceiling; only the deadline can ship it.
    eventually(Duration::from_secs(5), Duration::from_millis(10), || {
        count_rows(&path, "metrics") == 1
    });
    engine.drain().unwrap();
}

#[test]
fn test_empty_deadline_never_emits() {
    let (_dir, path) = create_temp_db_file("empty.db");
    let config = EngineConfig {
        poll_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    let mut engine = WriteEngine::with_sqlite(config, &path).unwrap();
    engine
        .register_statement(
            "metrics",
            METRICS_TEMPLATE,
            Action::Metrics,
            StreamConfig::default().with_max_interval(Duration::from_millis(20)),
        )
        .unwrap();

    // Several deadline periods pass with nothing pending.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(count_rows(&path, "metrics"), 0);
    assert!(engine.take_flush_errors().is_empty());
    engine.drain().unwrap();
    assert_eq!(count_rows(&path, "metrics"), 0);
}

#[test]
fn test_drain_lands_every_pending_row() {
    let (_dir, path) = create_temp_db_file("drain.db");
    let mut engine = WriteEngine::with_sqlite(EngineConfig::default(), &path).unwrap();
    engine
        .register_statement("metrics", METRICS_TEMPLATE, Action::Metrics, StreamConfig::default())
        .unwrap();

    for i in 0..250 {
        engine.push(metric_event(i)).unwrap();
    }
    engine.drain().unwrap();

    assert_eq!(count_rows(&path, "metrics"), 250);
    // Rows arrive in append order.
    let first: i64 = common::open_read_only(&path)
        .query_row("SELECT metric_id FROM metrics LIMIT 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(first, 0);
}

#[test]
fn test_unknown_field_drops_field_not_row() {
    let (_dir, path) = create_temp_db_file("unknown.db");
    let mut engine = WriteEngine::with_sqlite(EngineConfig::default(), &path).unwrap();
    engine
        .register_statement("metrics", METRICS_TEMPLATE, Action::Metrics, StreamConfig::default())
        .unwrap();

    engine
        .push(
            Event::new("metrics")
                .field("metric_id", 9i64)
                .field("ctime", 1009i64)
                .field("no_such_column", 1i64)
                .field("value", 2.5f64),
        )
        .unwrap();
    engine.drain().unwrap();

    let (mid, value): (i64, f64) = common::open_read_only(&path)
        .query_row("SELECT metric_id, value FROM metrics", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(mid, 9);
    assert_eq!(value, 2.5);
}

#[test]
fn test_reader_connection_cannot_write() {
    let (_dir, path) = create_temp_db_file("reader.db");
    let reader = common::open_read_only(&path);
    let err = reader.execute("INSERT INTO metrics VALUES (1, 1, 1.0)", []);
    assert!(err.is_err(), "reader connection accepted a write");
}
