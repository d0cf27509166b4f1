#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags};

static TRACING: Once = Once::new();

/// Installs the test tracing subscriber once per process, honoring
/// `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The tables the integration tests write into.
const TEST_SCHEMA: &str = "
    CREATE TABLE metrics (metric_id INTEGER, ctime INTEGER, value REAL);
    CREATE TABLE logs (ctime INTEGER, host_id INTEGER, msg TEXT);
    CREATE TABLE comments (host_id INTEGER, entry_time INTEGER, data TEXT);
    CREATE TABLE acknowledgements (host_id INTEGER, entry_time INTEGER, author TEXT);
";

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    init_tracing();
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let conn = Connection::open(&path).expect("initialize database");
    conn.execute_batch(TEST_SCHEMA).expect("create test schema");
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .expect("open reader connection")
}

pub fn count_rows(path: &Path, table: &str) -> i64 {
    open_read_only(path)
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .expect("count rows")
}

/// Polls `f` until it returns true or the timeout expires.
pub fn eventually(timeout: Duration, interval: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    loop {
        if f() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        std::thread::sleep(interval);
    }
}
