//! HTTP provider helpers.
//!
//! ## Example
//!
//! ```no_run
//! use ctoken_rate_monitor::rpc::{create_provider, get_latest_block};
//! use ctoken_rate_monitor::error::TrackerResult;
//!
//! # async fn example() -> TrackerResult<()> {
//! let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/API_KEY").await?;
//! let head = get_latest_block(&provider).await?;
//! println!("Head: {head}");
//! # Ok(())
//! # }
//! ```

use crate::error::{TrackerError, TrackerResult};
use alloy::providers::{Provider as _, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use tracing::{debug, info, instrument, warn};

/// HTTP provider used for log queries, receipts and pinned contract reads.
pub type Provider = RootProvider<Http<Client>>;

/// Strip the API key from an Alchemy-style URL for logging.
#[must_use]
pub fn redact_rpc_url(rpc_url: &str) -> &str {
    rpc_url.split("/v2/").next().unwrap_or("unknown")
}

/// Create an HTTP provider for `rpc_url`.
///
/// # Errors
///
/// Returns an RPC error if the URL cannot be parsed.
#[allow(clippy::unused_async)]
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub async fn create_provider(rpc_url: &str) -> TrackerResult<Provider> {
    let host = redact_rpc_url(rpc_url);
    tracing::Span::current().record("rpc_host", host);
    debug!("Creating HTTP provider");

    let url = rpc_url.parse().map_err(|e| {
        let message = if rpc_url.starts_with("http") {
            format!("Failed to parse RPC URL for host '{host}'")
        } else {
            format!(
                "Invalid RPC URL for host '{host}'. Expected 'https://eth-mainnet.g.alchemy.com/v2/YOUR_KEY' \
                 (set RPC_URL or ALCHEMY_API_KEY)"
            )
        };
        TrackerError::rpc(message, Some(Box::new(e)))
    })?;

    let provider = ProviderBuilder::new().on_http(url);
    info!("RPC provider initialized");
    Ok(provider)
}

/// Latest block number at the head of the chain.
///
/// # Errors
///
/// Returns an RPC error if the request fails.
#[instrument(skip(provider), fields(block = tracing::field::Empty, duration_ms = tracing::field::Empty))]
pub async fn get_latest_block(provider: &Provider) -> TrackerResult<u64> {
    let start = std::time::Instant::now();
    let block_number = provider
        .get_block_number()
        .await
        .map_err(|e| TrackerError::rpc("Failed to fetch latest block number", Some(Box::new(e))))?;

    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::Span::current().record("block", block_number);
    tracing::Span::current().record("duration_ms", duration_ms);
    debug!(block = block_number, duration_ms, "Latest block fetched");

    Ok(block_number)
}

/// Verify the provider answers by fetching the head block.
///
/// # Errors
///
/// Returns an RPC error if the provider is unreachable.
#[instrument(skip(provider))]
pub async fn check_connection(provider: &Provider) -> TrackerResult<u64> {
    match get_latest_block(provider).await {
        Ok(block) => {
            info!(block, "Connection check successful");
            Ok(block)
        }
        Err(e) => {
            warn!(error = %e, "Connection check failed");
            Err(TrackerError::rpc(
                format!("Provider connection health check failed: {e}"),
                None,
            ))
        }
    }
}
