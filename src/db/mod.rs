//! SQLite persistence for raised alerts.
//!
//! Only alerts are stored. The tracked state itself is never persisted:
//! after a restart the monitor bootstraps again from the ledger.
//!
//! # Architecture
//!
//! - `models`: row type for the `alerts` table
//! - `repository`: inserts and queries
//! - Connection pooling with SQLite WAL mode
//! - Embedded migrations from `migrations/`

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{TrackerError, TrackerResult};

pub mod models;
pub mod repository;

pub use models::AlertRecord;
pub use repository::Repository;

/// Creates a SQLite connection pool and applies migrations.
///
/// # Configuration
///
/// - **WAL mode**: readers don't block the writer
/// - **Busy timeout**: 30 seconds
/// - **Max connections**: 5, or 1 for `:memory:` databases (each connection
///   would otherwise see its own empty database)
///
/// # Example
///
/// ```no_run
/// use ctoken_rate_monitor::db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("sqlite:./alerts.db").await?;
///     Ok(())
/// }
/// ```
///
/// # Errors
///
/// Returns a database error if the URL is invalid, the connection fails or a
/// migration fails.
pub async fn create_pool(database_url: &str) -> TrackerResult<SqlitePool> {
    info!(database_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            TrackerError::database(
                format!("Failed to parse database URL: {database_url}"),
                Some(Box::new(e)),
            )
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let in_memory = database_url.contains(":memory:");
    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5));
    if in_memory {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        TrackerError::database(
            format!("Failed to connect to database at {database_url}"),
            Some(Box::new(e)),
        )
    })?;

    run_migrations(&pool).await?;
    verify_database(&pool).await?;
    info!("Database ready");

    Ok(pool)
}

/// Apply pending migrations from `migrations/`.
///
/// # Errors
///
/// Returns a database error if a migration fails.
pub async fn run_migrations(pool: &SqlitePool) -> TrackerResult<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        TrackerError::database("Failed to run database migrations", Some(Box::new(e)))
    })
}

/// Verify that the `alerts` table exists.
///
/// # Errors
///
/// Returns a database error if the table is missing.
pub async fn verify_database(pool: &SqlitePool) -> TrackerResult<()> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'alerts'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| TrackerError::database("Failed to verify database schema", Some(Box::new(e))))?;

    if rows.is_empty() {
        return Err(TrackerError::database(
            "Database schema incomplete: table 'alerts' missing",
            None,
        ));
    }

    Ok(())
}
