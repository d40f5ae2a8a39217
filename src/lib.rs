//! # Compound cToken Exchange-Rate Monitor
//!
//! Event-driven monitor for a Compound cToken built on
//! [Alloy](https://github.com/alloy-rs/alloy).
//!
//! A cToken's exchange rate, `(cash + borrows - reserves) * 1e18 / supply`,
//! should never go down under normal protocol operation. This crate mirrors
//! the four quantities locally, updates them from the events the pool emits,
//! and raises an alert whenever one transaction leaves the rate lower than
//! before.
//!
//! ## Features
//!
//! - **Type-safe event decoding** using Alloy's `sol!` macro
//! - **Exact 256-bit fixed-point math**, no floating point anywhere
//! - **Pure state transitions**, one per event kind, independently testable
//! - **One ledger read per run**: a concurrent bootstrap snapshot, then events only
//! - **Pluggable alert sinks** (console, SQLite)
//! - **Production error handling** with unified `TrackerError`
//!
//! ## Architecture
//!
//! 1. **Numeric Layer** ([`numeric`]) - Amounts, mantissa scale, exchange rate
//! 2. **Events Layer** ([`events`]) - Log decoding into typed events
//! 3. **State Layer** ([`state`]) - Accounting mirror and transitions
//! 4. **Monitor Layer** ([`monitor`]) - Bootstrap, ordered apply, rate comparison
//! 5. **RPC Layer** ([`rpc`]) - Provider, observation feed, bootstrap snapshots
//! 6. **Alert Layer** ([`alert`], [`db`]) - Alert record, sinks, persistence
//!
//! ## Quick Start
//!
//! ```bash
//! RPC_URL=https://eth-mainnet.g.alchemy.com/v2/KEY cargo run --release -- watch
//! ```
//!
//! ### Using as a Library
//!
//! ```rust,no_run
//! use ctoken_rate_monitor::config::Config;
//! use ctoken_rate_monitor::monitor::RateMonitor;
//! use ctoken_rate_monitor::rpc::{
//!     create_provider, LedgerSnapshotSource, ObservationFeed, ObservationSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let provider = create_provider(config.rpc_url()).await?;
//!     let ctoken = config.contracts().ctoken;
//!
//!     let feed = ObservationFeed::new(provider.clone(), ctoken, config.batch_size())?;
//!     let mut monitor = RateMonitor::new(
//!         config.ctoken_name(),
//!         config.contracts(),
//!         config.mantissa(),
//!         LedgerSnapshotSource::new(provider, ctoken),
//!     );
//!
//!     for observation in feed.fetch_range(19_000_000, 19_000_100).await? {
//!         let outcome = monitor.handle_observation(&observation).await?;
//!         if let Some(alert) = outcome.alert() {
//!             println!("{}: {}", alert.alert_id, alert.description);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::TrackerResult<T>`](error::TrackerResult):
//!
//! ```rust
//! use ctoken_rate_monitor::error::{TrackerError, TrackerResult};
//!
//! fn example() -> TrackerResult<()> {
//!     Err(TrackerError::anomaly("tracked contract not in transfer"))
//! }
//!
//! assert!(!example().unwrap_err().is_fatal());
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//! - Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!
//! at your option.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod alert;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod monitor;
pub mod numeric;
pub mod observability;
pub mod rpc;
pub mod state;
