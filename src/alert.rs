//! Exchange-rate-down alerts and the sinks they are published to.
//!
//! The monitor produces an [`Alert`] whenever the rate derived from one
//! observation is strictly below the previous one. Delivery is decoupled from
//! detection: the caller hands each alert to every configured [`AlertSink`]
//! through [`publish_all`], which logs sink failures and never propagates
//! them.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::fmt;
use std::str::FromStr;
use tracing::{error, warn};

use crate::db::Repository;
use crate::error::{TrackerError, TrackerResult};
use crate::numeric::{ExchangeRate, Mantissa};

/// Human-readable alert name.
pub const ALERT_NAME: &str = "Compound Token Exchange Rate Goes Down";

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    /// Worth a look, not an emergency.
    Medium,
}

impl AlertSeverity {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "medium",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medium" => Ok(Self::Medium),
            other => Err(TrackerError::database(
                format!("unknown alert severity '{other}'"),
                None,
            )),
        }
    }
}

/// Alert category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCategory {
    /// Informational finding.
    Info,
}

impl AlertCategory {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCategory {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            other => Err(TrackerError::database(
                format!("unknown alert category '{other}'"),
                None,
            )),
        }
    }
}

/// One detected exchange-rate decrease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Always [`ALERT_NAME`].
    pub name: String,
    /// `Compound token (<name>) exchange rate goes down`.
    pub description: String,
    /// `COMPOUND-<NAME>-EXCHANGE-RATE-DOWN-1`.
    pub alert_id: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Category.
    pub category: AlertCategory,
    /// Tracked cToken.
    pub ctoken: Address,
    /// Block of the observation that lowered the rate.
    pub block_number: u64,
    /// Transaction that lowered the rate.
    pub tx_hash: B256,
    /// Rate before the observation.
    pub previous_rate: ExchangeRate,
    /// Rate after the observation.
    pub new_rate: ExchangeRate,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Build the rate-down alert for `ctoken_name`.
    #[must_use]
    pub fn exchange_rate_down(
        ctoken_name: &str,
        ctoken: Address,
        block_number: u64,
        tx_hash: B256,
        previous_rate: ExchangeRate,
        new_rate: ExchangeRate,
    ) -> Self {
        Self {
            name: ALERT_NAME.to_string(),
            description: format!("Compound token ({ctoken_name}) exchange rate goes down"),
            alert_id: alert_id_for(ctoken_name),
            severity: AlertSeverity::Medium,
            category: AlertCategory::Info,
            ctoken,
            block_number,
            tx_hash,
            previous_rate,
            new_rate,
            created_at: Utc::now(),
        }
    }
}

/// Alert id for a token name, e.g. `COMPOUND-CBAT-EXCHANGE-RATE-DOWN-1`.
#[must_use]
pub fn alert_id_for(ctoken_name: &str) -> String {
    format!(
        "COMPOUND-{}-EXCHANGE-RATE-DOWN-1",
        ctoken_name.to_uppercase()
    )
}

/// Destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert.
    async fn publish(&self, alert: &Alert) -> TrackerResult<()>;
}

/// Publish to every sink, logging and swallowing individual failures.
///
/// Returns the number of sinks that accepted the alert.
pub async fn publish_all(sinks: &[Box<dyn AlertSink>], alert: &Alert) -> usize {
    let mut delivered = 0;
    for sink in sinks {
        match sink.publish(alert).await {
            Ok(()) => delivered += 1,
            Err(e) => error!(
                alert_id = %alert.alert_id,
                tx_hash = %alert.tx_hash,
                error = %e,
                "Failed to publish alert"
            ),
        }
    }
    delivered
}

/// Prints a colored line to stdout and emits a `warn!` event.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleAlertSink {
    scale: Mantissa,
}

impl ConsoleAlertSink {
    /// Create a console sink rendering rates with `scale`.
    #[must_use]
    pub const fn new(scale: Mantissa) -> Self {
        Self { scale }
    }

    fn render(&self, alert: &Alert) -> String {
        format!(
            "{} {} {} | Block: {} | Tx: {} | Rate: {} -> {}",
            "🚨".red(),
            alert.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            alert.alert_id.red().bold(),
            alert.block_number.to_string().yellow(),
            alert.tx_hash.to_string().dimmed(),
            alert.previous_rate.to_decimal_string(self.scale).white(),
            alert.new_rate.to_decimal_string(self.scale).red().bold(),
        )
    }
}

#[async_trait]
impl AlertSink for ConsoleAlertSink {
    async fn publish(&self, alert: &Alert) -> TrackerResult<()> {
        warn!(
            alert_id = %alert.alert_id,
            severity = %alert.severity,
            ctoken = %alert.ctoken,
            block = alert.block_number,
            tx_hash = %alert.tx_hash,
            previous_rate = %alert.previous_rate,
            new_rate = %alert.new_rate,
            "{}",
            alert.description
        );
        println!("{}", self.render(alert));
        Ok(())
    }
}

/// Persists alerts to SQLite.
#[derive(Debug, Clone)]
pub struct SqliteAlertSink {
    repository: Repository,
}

impl SqliteAlertSink {
    /// Wrap a repository.
    #[must_use]
    pub const fn new(repository: Repository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl AlertSink for SqliteAlertSink {
    async fn publish(&self, alert: &Alert) -> TrackerResult<()> {
        self.repository.insert_alert(alert).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> Alert {
        Alert::exchange_rate_down(
            "cBAT",
            Address::ZERO,
            19_000_000,
            B256::ZERO,
            ExchangeRate::from_mantissa(U256::from(145u64)),
            ExchangeRate::from_mantissa(U256::from(135u64)),
        )
    }

    #[test]
    fn test_alert_fields() {
        let alert = sample();
        assert_eq!(alert.name, "Compound Token Exchange Rate Goes Down");
        assert_eq!(alert.description, "Compound token (cBAT) exchange rate goes down");
        assert_eq!(alert.alert_id, "COMPOUND-CBAT-EXCHANGE-RATE-DOWN-1");
        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert_eq!(alert.category, AlertCategory::Info);
    }

    #[test]
    fn test_severity_and_category_parse() {
        assert_eq!("medium".parse::<AlertSeverity>().unwrap(), AlertSeverity::Medium);
        assert_eq!("info".parse::<AlertCategory>().unwrap(), AlertCategory::Info);
        assert!("critical".parse::<AlertSeverity>().is_err());
    }

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn publish(&self, _alert: &Alert) -> TrackerResult<()> {
            Err(TrackerError::database("disk full", None))
        }
    }

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn publish(&self, _alert: &Alert) -> TrackerResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_all_survives_failing_sink() {
        let sinks: Vec<Box<dyn AlertSink>> = vec![
            Box::new(FailingSink),
            Box::new(CountingSink(AtomicUsize::new(0))),
            Box::new(ConsoleAlertSink::new(Mantissa::default())),
        ];
        let delivered = publish_all(&sinks, &sample()).await;
        assert_eq!(delivered, 2);
    }
}
