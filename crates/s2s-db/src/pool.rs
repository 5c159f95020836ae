//! Pooled SQLite connections for the accounting log.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a writer waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("could not build the accounting database pool: {0}")]
    Build(#[from] r2d2::Error),
}

/// SQLite refused to switch the file to write-ahead logging.
#[derive(Debug, Error)]
#[error("accounting database stayed in '{0}' journal mode, WAL is required")]
struct UnsupportedJournalMode(String);

/// Puts a freshly opened connection into WAL mode and applies the busy
/// timeout. In-memory databases report `memory` and are left as they are.
fn prepare_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        return Err(rusqlite::Error::UserFunctionError(Box::new(
            UnsupportedJournalMode(mode),
        )));
    }
    conn.busy_timeout(busy_timeout)
}

/// Creates the connection pool for `db_path` (`:memory:` in tests).
///
/// # Errors
///
/// Returns `PoolError::Build` if no connection can be opened and prepared.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let busy_timeout = Duration::from_millis(settings.busy_timeout_ms);
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| prepare_connection(conn, busy_timeout));

    Ok(Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?)
}
