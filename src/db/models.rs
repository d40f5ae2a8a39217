//! Row types for the `alerts` table.
//!
//! Addresses and hashes are stored as `0x`-prefixed hex, rates as decimal
//! strings of the raw mantissa so no precision is lost.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::alert::{Alert, AlertCategory, AlertSeverity};
use crate::error::{TrackerError, TrackerResult};
use crate::numeric::ExchangeRate;

/// One stored alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertRecord {
    /// Database-assigned identifier (0 before insertion)
    pub id: i64,
    /// `COMPOUND-<NAME>-EXCHANGE-RATE-DOWN-1`
    pub alert_id: String,
    /// Alert name
    pub name: String,
    /// Alert description
    pub description: String,
    /// Severity (`medium`)
    pub severity: String,
    /// Category (`info`)
    pub category: String,
    /// cToken address (hex with 0x prefix)
    pub ctoken: String,
    /// Block of the offending observation
    pub block_number: i64,
    /// Transaction hash (hex with 0x prefix)
    pub tx_hash: String,
    /// Previous rate mantissa (decimal TEXT)
    pub previous_rate: String,
    /// New rate mantissa (decimal TEXT)
    pub new_rate: String,
    /// Unix timestamp the alert was raised at
    pub created_at: i64,
}

impl AlertRecord {
    /// Convert an alert into a row ready for insertion.
    ///
    /// # Errors
    ///
    /// Returns a database error if the block number doesn't fit SQLite's
    /// signed 64-bit integer.
    pub fn from_alert(alert: &Alert) -> TrackerResult<Self> {
        let block_number = i64::try_from(alert.block_number).map_err(|e| {
            TrackerError::database(
                format!("Block number {} out of range", alert.block_number),
                Some(Box::new(e)),
            )
        })?;

        Ok(Self {
            id: 0,
            alert_id: alert.alert_id.clone(),
            name: alert.name.clone(),
            description: alert.description.clone(),
            severity: alert.severity.as_str().to_string(),
            category: alert.category.as_str().to_string(),
            ctoken: alert.ctoken.to_string(),
            block_number,
            tx_hash: alert.tx_hash.to_string(),
            previous_rate: alert.previous_rate.mantissa().to_string(),
            new_rate: alert.new_rate.mantissa().to_string(),
            created_at: alert.created_at.timestamp(),
        })
    }

    /// Rebuild the alert from a stored row.
    ///
    /// # Errors
    ///
    /// Returns a database error if any stored column fails to parse.
    pub fn to_alert(&self) -> TrackerResult<Alert> {
        Ok(Alert {
            name: self.name.clone(),
            description: self.description.clone(),
            alert_id: self.alert_id.clone(),
            severity: self.severity.parse::<AlertSeverity>()?,
            category: self.category.parse::<AlertCategory>()?,
            ctoken: parse_column::<Address>("ctoken", &self.ctoken)?,
            block_number: u64::try_from(self.block_number).map_err(|e| {
                TrackerError::database("Negative block_number column", Some(Box::new(e)))
            })?,
            tx_hash: parse_column::<B256>("tx_hash", &self.tx_hash)?,
            previous_rate: parse_rate("previous_rate", &self.previous_rate)?,
            new_rate: parse_rate("new_rate", &self.new_rate)?,
            created_at: DateTime::<Utc>::from_timestamp(self.created_at, 0).ok_or_else(|| {
                TrackerError::database(format!("Invalid created_at {}", self.created_at), None)
            })?,
        })
    }
}

fn parse_column<T>(column: &str, value: &str) -> TrackerResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| {
        TrackerError::database(
            format!("Invalid {column} column '{value}'"),
            Some(Box::new(e)),
        )
    })
}

fn parse_rate(column: &str, value: &str) -> TrackerResult<ExchangeRate> {
    U256::from_str_radix(value, 10)
        .map(ExchangeRate::from_mantissa)
        .map_err(|e| {
            TrackerError::database(
                format!("Invalid {column} column '{value}'"),
                Some(Box::new(e)),
            )
        })
}
