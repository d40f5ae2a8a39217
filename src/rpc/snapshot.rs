//! Bootstrap snapshots read from the cToken contract.

use alloy::primitives::Address;
use alloy::rpc::types::BlockId;
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::http::Provider;
use crate::error::{TrackerError, TrackerResult};
use crate::events::ICToken;
use crate::numeric::{Amount, ExchangeRate};
use crate::state::Snapshot;

/// Authoritative source of the cToken's accounting at a given block.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Read cash, borrows, reserves, supply and reserve factor at `block_number`.
    async fn fetch_snapshot(&self, block_number: u64) -> TrackerResult<Snapshot>;

    /// Read the contract's own `exchangeRateStored()` at `block_number`.
    async fn fetch_exchange_rate_stored(&self, block_number: u64) -> TrackerResult<ExchangeRate>;
}

/// [`SnapshotSource`] backed by `eth_call`s pinned to a block.
#[derive(Debug, Clone)]
pub struct LedgerSnapshotSource {
    provider: Provider,
    ctoken: Address,
}

impl LedgerSnapshotSource {
    /// Read from `ctoken` through `provider`.
    #[must_use]
    pub const fn new(provider: Provider, ctoken: Address) -> Self {
        Self { provider, ctoken }
    }
}

fn bootstrap_error(call: &str, block_number: u64, e: alloy::contract::Error) -> TrackerError {
    TrackerError::bootstrap(
        format!("{call}() failed at block {block_number}"),
        Some(Box::new(e)),
    )
}

#[async_trait]
impl SnapshotSource for LedgerSnapshotSource {
    #[instrument(skip(self), fields(ctoken = %self.ctoken))]
    async fn fetch_snapshot(&self, block_number: u64) -> TrackerResult<Snapshot> {
        let contract = ICToken::new(self.ctoken, self.provider.clone());
        let block = BlockId::number(block_number);

        let get_cash = contract.getCash().block(block);
        let total_borrows = contract.totalBorrows().block(block);
        let total_reserves = contract.totalReserves().block(block);
        let total_supply = contract.totalSupply().block(block);
        let reserve_factor = contract.reserveFactorMantissa().block(block);

        // All five reads must land before the tracker can be seeded.
        let (cash, borrows, reserves, supply, reserve_factor) = tokio::try_join!(
            async {
                get_cash
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| bootstrap_error("getCash", block_number, e))
            },
            async {
                total_borrows
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| bootstrap_error("totalBorrows", block_number, e))
            },
            async {
                total_reserves
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| bootstrap_error("totalReserves", block_number, e))
            },
            async {
                total_supply
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| bootstrap_error("totalSupply", block_number, e))
            },
            async {
                reserve_factor
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| bootstrap_error("reserveFactorMantissa", block_number, e))
            },
        )?;

        debug!(%cash, %borrows, %reserves, %supply, %reserve_factor, "Snapshot fetched");

        Ok(Snapshot {
            block_number,
            cash: Amount::new(cash),
            borrows: Amount::new(borrows),
            reserves: Amount::new(reserves),
            supply: Amount::new(supply),
            reserve_factor,
        })
    }

    #[instrument(skip(self), fields(ctoken = %self.ctoken))]
    async fn fetch_exchange_rate_stored(&self, block_number: u64) -> TrackerResult<ExchangeRate> {
        let contract = ICToken::new(self.ctoken, self.provider.clone());
        contract
            .exchangeRateStored()
            .block(BlockId::number(block_number))
            .call()
            .await
            .map(|r| ExchangeRate::from_mantissa(r._0))
            .map_err(|e| {
                TrackerError::rpc(
                    format!("exchangeRateStored() failed at block {block_number}"),
                    Some(Box::new(e)),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::create_provider;
    use alloy::primitives::address;

    const CBAT: Address = address!("6C8c6b02E7b2BE14d4fA6022Dfd6d75921D90E4E");

    #[tokio::test]
    #[ignore = "Requires archive RPC_URL environment variable"]
    async fn test_fetch_snapshot_mainnet() {
        let Ok(rpc_url) = std::env::var("RPC_URL") else {
            return;
        };
        if let Ok(provider) = create_provider(&rpc_url).await {
            let source = LedgerSnapshotSource::new(provider, CBAT);
            let snapshot = source.fetch_snapshot(19_000_000).await;
            assert!(snapshot.is_ok());
            if let Ok(snapshot) = snapshot {
                assert!(!snapshot.supply.is_zero());
                assert_eq!(snapshot.block_number, 19_000_000);
            }
        }
    }
}
