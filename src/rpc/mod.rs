//! Ledger connectivity.
//!
//! Everything the monitor needs from an Ethereum node goes through one HTTP
//! provider:
//!
//! ```text
//!                ┌──────────────────────┐
//!                │   HTTP Provider      │
//!                └──────────────────────┘
//!                  │                  │
//!   ┌──────────────▼──────┐   ┌───────▼────────────────┐
//!   │  ObservationFeed    │   │  LedgerSnapshotSource  │
//!   │  eth_getLogs +      │   │  eth_call pinned to    │
//!   │  receipts           │   │  the bootstrap block   │
//!   └─────────────────────┘   └────────────────────────┘
//!        observations               bootstrap snapshot
//! ```
//!
//! - [`http`]: provider construction and head-block queries.
//! - [`feed`]: the [`ObservationSource`] seam and its ledger-backed
//!   implementation, producing per-transaction
//!   [`Observation`](crate::monitor::Observation)s for a block range.
//! - [`snapshot`]: the [`SnapshotSource`] seam used by the monitor, and its
//!   ledger-backed implementation.

pub mod feed;
pub mod http;
pub mod snapshot;

pub use feed::{block_chunks, ObservationFeed, ObservationSource};
pub use http::{check_connection, create_provider, get_latest_block, redact_rpc_url, Provider};
pub use snapshot::{LedgerSnapshotSource, SnapshotSource};
