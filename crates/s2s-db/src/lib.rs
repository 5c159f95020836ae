//! Database layer for the federation service.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. The only persistent state is the connection
//! accounting log; the dialback registries themselves live in memory.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: no external database process. The accounting
//!   writer and the status readers never block each other.
//! - **`r2d2` connection pool**: bounded connection reuse for the blocking
//!   tasks that write accounting records.
//! - **Embedded migrations**: SQL files are compiled in via `include_str!`
//!   and tracked in `_s2s_migrations`.

mod migrations;
mod pool;

use thiserror::Error;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};

/// Errors from opening the database.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to get a pooled connection: {0}")]
    Connection(#[from] r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Creates the pool for `db_path` and brings its schema up to date.
///
/// # Errors
///
/// Returns `DbError` if the pool cannot be built, no connection can be
/// checked out, or a migration fails.
pub fn open(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, DbError> {
    let pool = create_pool(db_path, settings)?;
    let conn = pool.get()?;
    let applied = run_migrations(&conn)?;
    tracing::info!(path = db_path, applied, "database ready");
    Ok(pool)
}
