//! SQLite connection bootstrap for the keyed store.
//!
//! # Responsibility
//! - Open file or in-memory connections and migrate them before use.
//! - Tune file connections for several processes sharing one lock table.
//!
//! # Invariants
//! - A returned connection is fully migrated.
//! - File databases run in WAL mode with a busy timeout, so a competing
//!   writer waits instead of failing with `SQLITE_BUSY`.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenTarget {
    File,
    Memory,
}

impl OpenTarget {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens (creating if needed) and migrates a database file.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    prepare(conn, OpenTarget::File)
}

/// Opens and migrates a private in-memory database.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(conn, OpenTarget::Memory)
}

fn prepare(mut conn: Connection, target: OpenTarget) -> DbResult<Connection> {
    let started_at = Instant::now();
    match configure(&mut conn, target) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok target={} duration_ms={}",
                target.as_str(),
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error target={} duration_ms={} error={}",
                target.as_str(),
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure(conn: &mut Connection, target: OpenTarget) -> DbResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if target == OpenTarget::File {
        // Returns the resulting mode as a row; the value is not needed.
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    }
    apply_migrations(conn)
}

#[cfg(test)]
mod tests {
    use super::{open_db, open_db_in_memory};

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().expect("temp dir");
        let conn = open_db(dir.path().join("store.db")).expect("open file db");
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("journal mode");
        assert_eq!(mode.to_ascii_lowercase(), "wal");
    }

    #[test]
    fn memory_database_is_migrated() {
        let conn = open_db_in_memory().expect("open memory db");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv_entries;", [], |row| row.get(0))
            .expect("kv_entries exists");
        assert_eq!(count, 0);
    }
}
