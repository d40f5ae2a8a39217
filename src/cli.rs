//! Command-line interface for the cToken exchange-rate monitor.
//!
//! # Commands
//!
//! - `watch`: follow new blocks and alert when the exchange rate goes down
//! - `snapshot`: print the ledger's accounting and derived rate at one block
//! - `alerts`: list persisted alerts
//!
//! # Example
//!
//! ```bash
//! # Follow the chain head
//! ctoken-rate-monitor watch
//!
//! # Replay from a given block
//! ctoken-rate-monitor watch --start-block 19000000
//!
//! # Inspect the accounting at a block
//! ctoken-rate-monitor snapshot --block 19000000
//!
//! # Show the 20 most recent alerts as JSON
//! ctoken-rate-monitor alerts --limit 20 --json
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::alert::{publish_all, AlertSink, ConsoleAlertSink, SqliteAlertSink};
use crate::config::Config;
use crate::db::{create_pool, Repository};
use crate::error::{TrackerError, TrackerResult};
use crate::monitor::{ObservationOutcome, RateMonitor};
use crate::numeric::{format_scaled, Mantissa};
use crate::rpc::{
    block_chunks, check_connection, create_provider, get_latest_block, LedgerSnapshotSource,
    ObservationFeed, ObservationSource, SnapshotSource,
};
use crate::state::TrackedState;

/// Compound cToken exchange-rate monitor
#[derive(Parser, Debug)]
#[command(name = "ctoken-rate-monitor")]
#[command(about = "Alerts when a Compound cToken's exchange rate goes down", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow new blocks and alert on exchange-rate decreases
    Watch {
        /// Polling interval in seconds (default: POLL_INTERVAL_SECS)
        #[arg(short, long)]
        interval: Option<u64>,

        /// First block to process (default: the next block after the head)
        #[arg(short, long)]
        start_block: Option<u64>,
    },

    /// Print the ledger accounting and derived exchange rate at a block
    Snapshot {
        /// Block to read at (default: latest)
        #[arg(short, long)]
        block: Option<u64>,
    },

    /// List persisted alerts, newest first
    Alerts {
        /// Maximum number of alerts to show
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Print the stored rows as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration, RPC, database or the monitor fails
/// fatally.
pub async fn run() -> TrackerResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Watch {
            interval,
            start_block,
        } => run_watch_command(&config, interval, start_block).await,
        Commands::Snapshot { block } => run_snapshot_command(&config, block).await,
        Commands::Alerts { limit, json } => run_alerts_command(&config, limit, json).await,
    }
}

/// Execute the watch command (continuous monitoring).
async fn run_watch_command(
    config: &Config,
    interval: Option<u64>,
    start_block: Option<u64>,
) -> TrackerResult<()> {
    let interval = interval.unwrap_or_else(|| config.poll_interval_secs()).max(1);
    let contracts = config.contracts();

    println!(
        "{} {} {}",
        "🔍 Watching".cyan().bold(),
        config.ctoken_name().cyan().bold(),
        format!("({})", contracts.ctoken).dimmed()
    );

    let provider = create_provider(config.rpc_url()).await?;
    let head = check_connection(&provider).await?;

    let sinks = build_sinks(config).await?;
    let feed = ObservationFeed::new(provider.clone(), contracts.ctoken, config.batch_size())?;
    let mut monitor = RateMonitor::new(
        config.ctoken_name(),
        contracts,
        config.mantissa(),
        LedgerSnapshotSource::new(provider.clone(), contracts.ctoken),
    );

    let mut last_processed_block = start_block.map_or(head, |block| block.saturating_sub(1));
    info!(
        ctoken = %contracts.ctoken,
        underlying = %contracts.underlying,
        from_block = last_processed_block + 1,
        interval_secs = interval,
        sinks = sinks.len(),
        "Starting watch"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(last_processed_block, "Shutdown signal received");
                println!();
                println!("{}", "🛑 Shutting down gracefully...".yellow().bold());
                println!("{} Last processed block: {}", "📍".cyan(), last_processed_block);
                break;
            }

            _ = ticker.tick() => {
                let result = process_new_blocks(
                    &provider,
                    &feed,
                    &mut monitor,
                    &sinks,
                    config.mantissa(),
                    &mut last_processed_block,
                )
                .await;

                match result {
                    Ok(()) => debug!(interval_secs = interval, "Waiting for next check"),
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, last_processed_block, "Monitor halted");
                        println!("{} {}", "❌ Halted:".red().bold(), e);
                        return Err(e);
                    }
                    Err(e) => {
                        error!(error = %e, "Error processing blocks, will retry");
                        println!("{} {}", "⚠️  Error:".red().bold(), e);
                    }
                }
            }
        }
    }

    println!("{}", "👋 Shutdown complete".green().bold());
    Ok(())
}

/// Console sink always, SQLite sink when `PERSIST_ALERTS` is on.
async fn build_sinks(config: &Config) -> TrackerResult<Vec<Box<dyn AlertSink>>> {
    let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(ConsoleAlertSink::new(config.mantissa()))];

    if config.persist_alerts() {
        let repository = Repository::new(create_pool(config.database_url()).await?);
        repository.health_check().await?;
        sinks.push(Box::new(SqliteAlertSink::new(repository)));
    }

    Ok(sinks)
}

/// Feed every observation after `last_processed_block` up to the head into
/// the monitor.
async fn process_new_blocks<S: SnapshotSource, F: ObservationSource>(
    provider: &crate::rpc::Provider,
    feed: &F,
    monitor: &mut RateMonitor<S>,
    sinks: &[Box<dyn AlertSink>],
    scale: Mantissa,
    last_processed_block: &mut u64,
) -> TrackerResult<()> {
    let head = get_latest_block(provider).await?;
    if head <= *last_processed_block {
        debug!(head, last = *last_processed_block, "No new blocks");
        return Ok(());
    }

    catch_up(feed, monitor, sinks, scale, last_processed_block, head).await
}

/// Fetch and apply `last_processed_block + 1..=head` one `BATCH_SIZE` chunk
/// at a time.
///
/// `last_processed_block` advances after each fully applied chunk, so a
/// failed fetch is retried from the first unapplied chunk on the next tick.
async fn catch_up<S: SnapshotSource, F: ObservationSource>(
    feed: &F,
    monitor: &mut RateMonitor<S>,
    sinks: &[Box<dyn AlertSink>],
    scale: Mantissa,
    last_processed_block: &mut u64,
    head: u64,
) -> TrackerResult<()> {
    for (from_block, to_block) in
        block_chunks(*last_processed_block + 1, head, feed.batch_size())
    {
        let observations = feed.fetch_range(from_block, to_block).await?;

        for observation in &observations {
            match monitor.handle_observation(observation).await {
                Ok(outcome) => {
                    print_outcome(observation.block_number, &outcome, scale);
                    if let Some(alert) = outcome.alert() {
                        publish_all(sinks, alert).await;
                    }
                }
                Err(e @ TrackerError::BootstrapError { .. }) => {
                    warn!(error = %e, tx_hash = %observation.tx_hash, "Bootstrap failed, retrying on next observation");
                    println!("{} {}", "⚠️  Bootstrap failed:".yellow().bold(), e);
                }
                Err(e) => return Err(e),
            }
        }

        *last_processed_block = to_block;
        debug!(from_block, to_block, head, "Chunk applied");
    }

    Ok(())
}

/// Display a monitor outcome with colored formatting.
fn print_outcome(block_number: u64, outcome: &ObservationOutcome, scale: Mantissa) {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    match outcome {
        ObservationOutcome::Ignored | ObservationOutcome::NoChange => {}
        ObservationOutcome::Bootstrapped { rate } => println!(
            "{} {} Block: {} | Baseline rate: {}",
            "📌".cyan(),
            timestamp.dimmed(),
            block_number.to_string().yellow(),
            rate.to_decimal_string(scale).white().bold()
        ),
        ObservationOutcome::Compared {
            previous,
            current,
            alert,
        } => {
            // Alerts are printed by the console sink.
            if alert.is_some() {
                return;
            }
            let rendered = current.to_decimal_string(scale);
            let colored_rate = if current > previous {
                rendered.green().bold()
            } else {
                rendered.white().bold()
            };
            println!(
                "{} {} Block: {} | Rate: {}",
                "📊".cyan(),
                timestamp.dimmed(),
                block_number.to_string().yellow(),
                colored_rate
            );
        }
    }
}

/// Execute the snapshot command (one-off ledger read).
async fn run_snapshot_command(config: &Config, block: Option<u64>) -> TrackerResult<()> {
    let contracts = config.contracts();
    let provider = create_provider(config.rpc_url()).await?;
    let block = match block {
        Some(block) => block,
        None => get_latest_block(&provider).await?,
    };

    let source = LedgerSnapshotSource::new(provider, contracts.ctoken);
    let snapshot = source.fetch_snapshot(block).await?;
    let state = TrackedState::from_snapshot(&snapshot, config.mantissa())?;
    let stored = source.fetch_exchange_rate_stored(block).await;

    let scale = config.mantissa();
    println!(
        "{} {} at block {}",
        "📷".cyan(),
        config.ctoken_name().cyan().bold(),
        block.to_string().yellow()
    );
    println!("  {:<22} {}", "cash", state.cash().to_string().blue());
    println!("  {:<22} {}", "totalBorrows", state.borrows().to_string().blue());
    println!("  {:<22} {}", "totalReserves", state.reserves().to_string().blue());
    println!("  {:<22} {}", "totalSupply", state.supply().to_string().magenta());
    println!(
        "  {:<22} {}",
        "reserveFactor",
        format_scaled(state.reserve_factor(), scale.decimals())
    );
    println!(
        "  {:<22} {}",
        "derived rate",
        state.exchange_rate().to_decimal_string(scale).white().bold()
    );

    match stored {
        Ok(stored) => {
            let marker = if stored == state.exchange_rate() {
                "✅".green()
            } else {
                "≠".yellow()
            };
            println!(
                "  {:<22} {} {}",
                "exchangeRateStored",
                stored.to_decimal_string(scale),
                marker
            );
        }
        Err(e) => {
            warn!(error = %e, "exchangeRateStored unavailable");
            println!("  {:<22} {}", "exchangeRateStored", "unavailable".dimmed());
        }
    }

    Ok(())
}

/// Execute the alerts command (list persisted alerts).
async fn run_alerts_command(config: &Config, limit: u32, json: bool) -> TrackerResult<()> {
    let repository = Repository::new(create_pool(config.database_url()).await?);
    let total = repository.count_alerts().await?;
    let records = repository.recent_alerts(limit).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&records).map_err(|e| {
            TrackerError::database("Failed to serialize alerts", Some(Box::new(e)))
        })?;
        println!("{rendered}");
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No alerts recorded.".green());
        return Ok(());
    }

    println!(
        "{} Showing {} of {} alerts",
        "🚨".red(),
        records.len(),
        total
    );

    let scale = config.mantissa();
    for record in records {
        let alert = record.to_alert()?;
        println!(
            "{} {} Block: {} | Tx: {} | Rate: {} -> {}",
            alert.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            alert.alert_id.red(),
            alert.block_number.to_string().yellow(),
            alert.tx_hash.to_string().dimmed(),
            alert.previous_rate.to_decimal_string(scale),
            alert.new_rate.to_decimal_string(scale).red().bold()
        );
    }

    Ok(())
}
