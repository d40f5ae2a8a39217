//! Observation feed: turns a block range into ordered per-transaction
//! observations for the monitor.
//!
//! Every accounting change on the cToken emits at least one cToken event, so
//! `eth_getLogs` on the cToken address finds every candidate transaction. The
//! full receipt is then fetched because the underlying token's `Transfer`
//! logs are emitted by a different contract and would not match the filter.

use alloy::primitives::{Address, B256};
use alloy::providers::Provider as _;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use super::http::Provider;
use crate::error::{TrackerError, TrackerResult};
use crate::events::create_ctoken_filter;
use crate::monitor::Observation;

/// Receipts fetched in parallel per batch.
const RECEIPT_CONCURRENCY: usize = 8;

/// Source of per-transaction observations for a block range.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Largest number of blocks fetched and applied as one unit.
    fn batch_size(&self) -> u64;

    /// Observations for `from_block..=to_block`, in ledger order.
    ///
    /// Nothing is returned for a partially fetched range, so the caller can
    /// retry it.
    async fn fetch_range(&self, from_block: u64, to_block: u64) -> TrackerResult<Vec<Observation>>;
}

/// Fetches observations addressed to the tracked cToken.
#[derive(Debug, Clone)]
pub struct ObservationFeed {
    provider: Provider,
    ctoken: Address,
    batch_size: u64,
}

/// Position of a transaction in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TxPosition {
    block_number: u64,
    transaction_index: u64,
    log_index: u64,
    tx_hash: B256,
}

impl ObservationFeed {
    /// Create a feed querying at most `batch_size` blocks per `eth_getLogs`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `batch_size` is zero.
    pub fn new(provider: Provider, ctoken: Address, batch_size: u64) -> TrackerResult<Self> {
        if batch_size == 0 {
            return Err(TrackerError::config("BATCH_SIZE must be greater than zero", None));
        }
        Ok(Self {
            provider,
            ctoken,
            batch_size,
        })
    }

    async fn candidate_transactions(&self, from_block: u64, to_block: u64) -> TrackerResult<Vec<B256>> {
        let filter = create_ctoken_filter(self.ctoken, from_block, to_block);
        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            TrackerError::rpc(
                format!("Failed to fetch cToken logs for blocks {from_block}..={to_block}"),
                Some(Box::new(e)),
            )
        })?;

        let positions = logs
            .iter()
            .filter_map(|log| {
                Some(TxPosition {
                    block_number: log.block_number?,
                    transaction_index: log.transaction_index?,
                    log_index: log.log_index?,
                    tx_hash: log.transaction_hash?,
                })
            })
            .collect();

        Ok(distinct_in_ledger_order(positions))
    }

    async fn fetch_observation(&self, tx_hash: B256) -> TrackerResult<Option<Observation>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| {
                TrackerError::rpc(format!("Failed to fetch receipt {tx_hash}"), Some(Box::new(e)))
            })?;

        let Some(receipt) = receipt else {
            return Err(TrackerError::rpc(format!("Receipt {tx_hash} not found"), None));
        };
        let Some(block_number) = receipt.block_number else {
            debug!(%tx_hash, "Receipt not yet in a block, skipping");
            return Ok(None);
        };

        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| log.inner.clone())
            .collect();

        Ok(Some(Observation::new(tx_hash, receipt.to, block_number, logs)))
    }
}

#[async_trait]
impl ObservationSource for ObservationFeed {
    fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Returns an RPC error if a log query or receipt fetch fails.
    #[instrument(skip(self), fields(ctoken = %self.ctoken))]
    async fn fetch_range(&self, from_block: u64, to_block: u64) -> TrackerResult<Vec<Observation>> {
        let mut observations = Vec::new();

        for (start, end) in block_chunks(from_block, to_block, self.batch_size) {
            let hashes = self.candidate_transactions(start, end).await?;
            if hashes.is_empty() {
                continue;
            }

            let fetched: Vec<Option<Observation>> = stream::iter(hashes)
                .map(|hash| self.fetch_observation(hash))
                .buffered(RECEIPT_CONCURRENCY)
                .try_collect()
                .await?;

            let before = observations.len();
            observations.extend(
                fetched
                    .into_iter()
                    .flatten()
                    .filter(|o| o.to == Some(self.ctoken)),
            );
            debug!(
                from = start,
                to = end,
                observations = observations.len() - before,
                "Batch fetched"
            );
        }

        if !observations.is_empty() {
            info!(
                from = from_block,
                to = to_block,
                observations = observations.len(),
                "Observations fetched"
            );
        }

        Ok(observations)
    }
}

/// Split `from..=to` into inclusive chunks of at most `size` blocks.
#[must_use]
pub fn block_chunks(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let step = size.max(1) - 1;
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(step).min(to);
        chunks.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Sort by ledger position and keep the first occurrence of each transaction.
fn distinct_in_ledger_order(mut positions: Vec<TxPosition>) -> Vec<B256> {
    positions.sort_unstable();
    let mut hashes: Vec<B256> = Vec::with_capacity(positions.len());
    for position in positions {
        if !hashes.contains(&position.tx_hash) {
            hashes.push(position.tx_hash);
        }
    }
    hashes
}
