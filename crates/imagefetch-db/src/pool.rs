//! Database connection pool management.
//!
//! Connection pooling for SQLite using r2d2. Migrations run once when the
//! pool is created.

use imagefetch_common::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::time::Duration;

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Initialize a new database pool with the given file path.
///
/// Creates the SQLite file if needed, enables foreign keys and a busy timeout on
/// every connection and applies pending migrations.
///
/// # Example
///
/// ```no_run
/// use imagefetch_db::pool::init_pool;
///
/// let pool = init_pool("/var/lib/imagefetch/catalog.sqlite").unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });

    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {}", e)))?;

    migrate(&pool)?;
    Ok(pool)
}

/// Initialize an in-memory database pool for testing.
///
/// Every in-memory connection is its own database, so the pool holds a
/// single connection.
///
/// ```
/// use imagefetch_db::pool::init_memory_pool;
///
/// let pool = init_memory_pool().unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create in-memory pool: {}", e)))?;

    migrate(&pool)?;
    Ok(pool)
}

fn migrate(pool: &DbPool) -> Result<()> {
    let conn = pool
        .get()
        .map_err(|e| Error::database(format!("Failed to get connection for migrations: {}", e)))?;

    migrations::run_migrations(&conn)
        .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;

    Ok(())
}

/// Get a connection from the pool.
///
/// Converts the r2d2 error into the common Error type.
///
/// # Arguments
///
/// * `pool` - The connection pool to get a connection from
///
/// # Returns
///
/// * `Ok(PooledConnection)` - A pooled database connection
/// * `Err(Error)` - If unable to get a connection from the pool
///
/// # Example
///
/// ```
/// use imagefetch_db::pool::{get_conn, init_memory_pool};
///
/// let pool = init_memory_pool().unwrap();
/// let conn = get_conn(&pool).unwrap();
/// ```
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {}", e)))
}
