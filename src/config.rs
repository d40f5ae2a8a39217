//! Configuration management for the cToken exchange-rate monitor.
//!
//! Configuration is loaded from environment variables (and a `.env` file via
//! `dotenvy`). All operations return [`TrackerResult`].
//!
//! ## Environment Variables
//!
//! RPC endpoint (one of):
//! - `RPC_URL`: full HTTP endpoint
//! - `ALCHEMY_API_KEY`: expanded to `https://eth-mainnet.g.alchemy.com/v2/<key>`
//!
//! Optional (with defaults):
//! - `CTOKEN_NAME`: display name used in alerts (default: `cBAT`)
//! - `CTOKEN_ADDRESS`: tracked cToken (default: cBAT)
//! - `UNDERLYING_ADDRESS`: underlying asset (default: BAT)
//! - `MANTISSA_DECIMALS`: fixed-point exponent (default: 18)
//! - `POLL_INTERVAL_SECS`: watch-mode polling interval (default: 12)
//! - `BATCH_SIZE`: maximum blocks per log query (default: 10)
//! - `DATABASE_URL`: alert store (default: `sqlite:./alerts.db`)
//! - `PERSIST_ALERTS`: store alerts in SQLite (default: true)
//!
//! ## Example
//!
//! ```no_run
//! use ctoken_rate_monitor::config::Config;
//! use ctoken_rate_monitor::error::TrackerResult;
//!
//! # fn main() -> TrackerResult<()> {
//! let config = Config::from_env()?;
//! println!("Tracking {} at {}", config.ctoken_name(), config.contracts().ctoken);
//! # Ok(())
//! # }
//! ```

use alloy::primitives::Address;
use std::env;
use std::str::FromStr;

use crate::error::{TrackerError, TrackerResult};
use crate::numeric::{Mantissa, DEFAULT_MANTISSA_DECIMALS};
use crate::state::TrackedContracts;

/// Default display name.
pub const DEFAULT_CTOKEN_NAME: &str = "cBAT";
/// Compound cBAT on mainnet.
pub const DEFAULT_CTOKEN_ADDRESS: &str = "0x6C8c6b02E7b2BE14d4fA6022Dfd6d75921D90E4E";
/// BAT on mainnet.
pub const DEFAULT_UNDERLYING_ADDRESS: &str = "0x0D8775F648430679A709E98d2b0Cb6250d2887EF";
/// Default alert store.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./alerts.db";

const ALCHEMY_PLACEHOLDER: &str = "your_alchemy_api_key_here";

/// Runtime configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ethereum RPC URL
    rpc_url: String,

    /// Display name of the tracked cToken
    ctoken_name: String,

    /// cToken and underlying addresses
    contracts: TrackedContracts,

    /// Fixed-point scale
    mantissa: Mantissa,

    /// Polling interval in seconds (for watch mode)
    poll_interval_secs: u64,

    /// Maximum blocks to fetch per log query
    batch_size: u64,

    /// SQLite URL for the alert store
    database_url: String,

    /// Whether alerts are written to SQLite
    persist_alerts: bool,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Loads `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - Neither `RPC_URL` nor a real `ALCHEMY_API_KEY` is set
    /// - A numeric or boolean variable doesn't parse
    /// - An address is malformed, or both addresses are equal
    /// - `BATCH_SIZE` is zero or `MANTISSA_DECIMALS` is out of range
    pub fn from_env() -> TrackerResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> TrackerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = resolve_rpc_url(&lookup)?;

        let ctoken_name = lookup("CTOKEN_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CTOKEN_NAME.to_string());

        let ctoken = parse_var::<Address, _>(&lookup, "CTOKEN_ADDRESS", DEFAULT_CTOKEN_ADDRESS)?;
        let underlying =
            parse_var::<Address, _>(&lookup, "UNDERLYING_ADDRESS", DEFAULT_UNDERLYING_ADDRESS)?;
        if ctoken == underlying {
            return Err(TrackerError::config(
                format!("CTOKEN_ADDRESS and UNDERLYING_ADDRESS must differ, both are {ctoken}"),
                None,
            ));
        }

        let decimals = parse_var::<u8, _>(
            &lookup,
            "MANTISSA_DECIMALS",
            &DEFAULT_MANTISSA_DECIMALS.to_string(),
        )?;
        let mantissa = Mantissa::new(decimals)?;

        let poll_interval_secs = parse_var::<u64, _>(&lookup, "POLL_INTERVAL_SECS", "12")?;

        let batch_size = parse_var::<u64, _>(&lookup, "BATCH_SIZE", "10")?;
        if batch_size == 0 {
            return Err(TrackerError::config(
                "BATCH_SIZE must be greater than zero",
                None,
            ));
        }

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let persist_alerts = parse_var::<bool, _>(&lookup, "PERSIST_ALERTS", "true")?;

        Ok(Self {
            rpc_url,
            ctoken_name,
            contracts: TrackedContracts { ctoken, underlying },
            mantissa,
            poll_interval_secs,
            batch_size,
            database_url,
            persist_alerts,
        })
    }

    /// Get the Ethereum RPC URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Display name of the tracked cToken.
    #[must_use]
    pub fn ctoken_name(&self) -> &str {
        &self.ctoken_name
    }

    /// Tracked cToken and underlying addresses.
    #[must_use]
    pub const fn contracts(&self) -> TrackedContracts {
        self.contracts
    }

    /// Fixed-point scale.
    #[must_use]
    pub const fn mantissa(&self) -> Mantissa {
        self.mantissa
    }

    /// Get the polling interval in seconds.
    #[must_use]
    pub const fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    /// Get the batch size (max blocks per query).
    #[must_use]
    pub const fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// SQLite URL of the alert store.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Whether alerts are written to SQLite.
    #[must_use]
    pub const fn persist_alerts(&self) -> bool {
        self.persist_alerts
    }
}

fn resolve_rpc_url<F>(lookup: &F) -> TrackerResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("RPC_URL").filter(|url| !url.trim().is_empty()) {
        return Ok(url);
    }

    let key = lookup("ALCHEMY_API_KEY").ok_or_else(|| {
        TrackerError::config("RPC_URL or ALCHEMY_API_KEY environment variable is required", None)
    })?;
    if key.trim().is_empty() || key == ALCHEMY_PLACEHOLDER {
        return Err(TrackerError::config(
            "ALCHEMY_API_KEY must be set to a valid Alchemy API key",
            None,
        ));
    }

    Ok(format!("https://eth-mainnet.g.alchemy.com/v2/{key}"))
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> TrackerResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim().parse::<T>().map_err(|e| {
        TrackerError::config(format!("{key} has invalid value '{raw}'"), Some(Box::new(e)))
    })
}
