//! Repository pattern for alert storage.

use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::models::AlertRecord;
use crate::alert::Alert;
use crate::error::{TrackerError, TrackerResult};

/// Wraps a SQLite connection pool with typed alert queries.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Creates a new repository with the given connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store an alert and return its row id.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use alloy::primitives::{Address, B256, U256};
    /// use ctoken_rate_monitor::alert::Alert;
    /// use ctoken_rate_monitor::db::{create_pool, Repository};
    /// use ctoken_rate_monitor::numeric::ExchangeRate;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let repo = Repository::new(create_pool("sqlite:./alerts.db").await?);
    ///     let alert = Alert::exchange_rate_down(
    ///         "cBAT",
    ///         Address::ZERO,
    ///         19_000_000,
    ///         B256::ZERO,
    ///         ExchangeRate::from_mantissa(U256::from(2u64)),
    ///         ExchangeRate::from_mantissa(U256::from(1u64)),
    ///     );
    ///     let id = repo.insert_alert(&alert).await?;
    ///     println!("stored alert #{id}");
    ///     Ok(())
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails.
    #[instrument(skip(self, alert), fields(alert_id = %alert.alert_id, block = alert.block_number))]
    pub async fn insert_alert(&self, alert: &Alert) -> TrackerResult<i64> {
        let record = AlertRecord::from_alert(alert)?;

        let result = sqlx::query(
            r"
            INSERT INTO alerts (
                alert_id, name, description, severity, category, ctoken,
                block_number, tx_hash, previous_rate, new_rate, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&record.alert_id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.severity)
        .bind(&record.category)
        .bind(&record.ctoken)
        .bind(record.block_number)
        .bind(&record.tx_hash)
        .bind(&record.previous_rate)
        .bind(&record.new_rate)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TrackerError::database("Failed to insert alert", Some(Box::new(e))))?;

        let id = result.last_insert_rowid();
        debug!(id, "Alert stored");
        Ok(id)
    }

    /// Most recent alerts, newest block first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn recent_alerts(&self, limit: u32) -> TrackerResult<Vec<AlertRecord>> {
        sqlx::query_as::<_, AlertRecord>(
            r"
            SELECT * FROM alerts
            ORDER BY block_number DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TrackerError::database("Failed to query recent alerts", Some(Box::new(e))))
    }

    /// Number of stored alerts.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn count_alerts(&self) -> TrackerResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TrackerError::database("Failed to count alerts", Some(Box::new(e))))?;
        Ok(count)
    }

    /// Health check for database connectivity.
    ///
    /// # Errors
    ///
    /// Returns a database error if the database is unreachable.
    pub async fn health_check(&self) -> TrackerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| TrackerError::database("Database health check failed", Some(Box::new(e))))?;
        Ok(())
    }
}
