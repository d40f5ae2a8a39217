//! Typed decoding of the cToken events that mutate reserve accounting.
//!
//! The bindings are generated with Alloy's `sol!` macro straight from the
//! Solidity signatures, so topic hashes and ABI layouts are checked at compile
//! time. Only five events matter to the tracker:
//!
//! | Event             | Emitted by          | Mutates                     |
//! |-------------------|---------------------|-----------------------------|
//! | `Transfer`        | cToken + underlying | `supply` or `cash`          |
//! | `AccrueInterest`  | cToken              | `borrows`, `reserves`       |
//! | `Borrow`          | cToken              | `borrows`                   |
//! | `RepayBorrow`     | cToken              | `borrows`                   |
//! | `ReservesReduced` | cToken              | `reserves`                  |
//!
//! [`decode_log`] turns a raw log into a [`TypedEvent`]. Logs with an unknown
//! signature decode to `Ok(None)`; logs with a known signature but a malformed
//! payload are a [`DecodingError`](TrackerError::DecodingError), scoped to that
//! one log.
//!
//! Addresses decode into 20-byte [`Address`] values, so comparisons never
//! depend on hex letter case.
//!
//! ## Example
//!
//! ```
//! use alloy::primitives::{address, Log, U256};
//! use alloy::sol_types::SolEvent;
//! use ctoken_rate_monitor::events::{decode_log, Borrow, TypedEvent};
//!
//! let ctoken = address!("6C8c6b02E7b2BE14d4fA6022Dfd6d75921D90E4E");
//! let event = Borrow {
//!     borrower: address!("00000000000000000000000000000000000000aa"),
//!     borrow_amount: U256::from(10u64),
//!     account_borrows: U256::from(10u64),
//!     total_borrows: U256::from(1_010u64),
//! };
//! let log = Log { address: ctoken, data: event.encode_log_data() };
//!
//! let decoded = decode_log(&log).unwrap();
//! assert!(matches!(decoded, Some(TypedEvent::Borrow(_))));
//! ```

use alloy::primitives::{Address, Log, B256};
use alloy::rpc::types::Filter;
use alloy::sol;
use alloy::sol_types::SolEvent;
use std::fmt;

use crate::error::{TrackerError, TrackerResult};

sol! {
    /// Compound cToken (pre-`cashPrior` generation, e.g. cBAT).
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface ICToken {
        /// Interest was accrued; `total_borrows` is the new borrow total.
        event AccrueInterest(uint256 interest_accumulated, uint256 borrow_index, uint256 total_borrows);

        /// An account borrowed underlying; `total_borrows` is the new borrow total.
        event Borrow(address borrower, uint256 borrow_amount, uint256 account_borrows, uint256 total_borrows);

        /// A borrow was repaid; `total_borrows` is the new borrow total.
        event RepayBorrow(address payer, address borrower, uint256 repay_amount, uint256 account_borrows, uint256 total_borrows);

        /// Admin withdrew reserves; `total_reserves` is the new reserve total.
        event ReservesReduced(address admin, uint256 reduce_amount, uint256 total_reserves);

        function getCash() external view returns (uint256);
        function totalBorrows() external view returns (uint256);
        function totalReserves() external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function reserveFactorMantissa() external view returns (uint256);
        function exchangeRateStored() external view returns (uint256);
    }

    /// ERC-20 surface shared by the cToken and its underlying asset.
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        /// Tokens moved between two accounts.
        event Transfer(address indexed from, address indexed to, uint256 amount);
    }
}

pub use ICToken::{AccrueInterest, Borrow, RepayBorrow, ReservesReduced};
pub use IERC20::Transfer;

/// Human-readable signatures of the tracked events, in declaration order.
pub const EVENT_SIGNATURES: [&str; 5] = [
    Transfer::SIGNATURE,
    AccrueInterest::SIGNATURE,
    Borrow::SIGNATURE,
    RepayBorrow::SIGNATURE,
    ReservesReduced::SIGNATURE,
];

/// `topic0` hashes of the tracked events, same order as [`EVENT_SIGNATURES`].
pub const EVENT_TOPICS: [B256; 5] = [
    Transfer::SIGNATURE_HASH,
    AccrueInterest::SIGNATURE_HASH,
    Borrow::SIGNATURE_HASH,
    RepayBorrow::SIGNATURE_HASH,
    ReservesReduced::SIGNATURE_HASH,
];

/// Which of the tracked events a log carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `Transfer(address,address,uint256)`
    Transfer,
    /// `AccrueInterest(uint256,uint256,uint256)`
    AccrueInterest,
    /// `Borrow(address,uint256,uint256,uint256)`
    Borrow,
    /// `RepayBorrow(address,address,uint256,uint256,uint256)`
    RepayBorrow,
    /// `ReservesReduced(address,uint256,uint256)`
    ReservesReduced,
}

impl EventKind {
    /// All kinds, same order as [`EVENT_TOPICS`].
    pub const ALL: [Self; 5] = [
        Self::Transfer,
        Self::AccrueInterest,
        Self::Borrow,
        Self::RepayBorrow,
        Self::ReservesReduced,
    ];

    /// Classify a log by its first topic.
    #[must_use]
    pub fn from_topic0(topic0: &B256) -> Option<Self> {
        EVENT_TOPICS
            .iter()
            .position(|topic| topic == topic0)
            .map(|index| Self::ALL[index])
    }

    /// Classify a log, `None` if it carries none of the tracked events.
    #[must_use]
    pub fn of_log(log: &Log) -> Option<Self> {
        log.data.topics().first().and_then(Self::from_topic0)
    }

    /// The Solidity signature.
    #[must_use]
    pub const fn signature(self) -> &'static str {
        match self {
            Self::Transfer => Transfer::SIGNATURE,
            Self::AccrueInterest => AccrueInterest::SIGNATURE,
            Self::Borrow => Borrow::SIGNATURE,
            Self::RepayBorrow => RepayBorrow::SIGNATURE,
            Self::ReservesReduced => ReservesReduced::SIGNATURE,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature())
    }
}

/// A decoded tracked event.
///
/// For `Transfer` the emitting contract matters (cToken vs underlying); it is
/// carried alongside in [`DecodedLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedEvent {
    /// Share-token or underlying-asset movement.
    Transfer(Transfer),
    /// Interest accrual.
    AccrueInterest(AccrueInterest),
    /// New borrow.
    Borrow(Borrow),
    /// Borrow repayment.
    RepayBorrow(RepayBorrow),
    /// Reserve withdrawal.
    ReservesReduced(ReservesReduced),
}

impl TypedEvent {
    /// The kind tag of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Transfer(_) => EventKind::Transfer,
            Self::AccrueInterest(_) => EventKind::AccrueInterest,
            Self::Borrow(_) => EventKind::Borrow,
            Self::RepayBorrow(_) => EventKind::RepayBorrow,
            Self::ReservesReduced(_) => EventKind::ReservesReduced,
        }
    }
}

/// A typed event together with the contract that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    /// Emitting contract.
    pub emitter: Address,
    /// Decoded payload.
    pub event: TypedEvent,
}

/// Decode a raw log into a [`TypedEvent`].
///
/// # Errors
///
/// Returns a [`DecodingError`](TrackerError::DecodingError) if the log carries
/// a tracked signature but its topics or data do not match the expected
/// layout (wrong topic count, truncated payload, ...).
pub fn decode_log(log: &Log) -> TrackerResult<Option<TypedEvent>> {
    let Some(kind) = EventKind::of_log(log) else {
        return Ok(None);
    };

    let event = match kind {
        EventKind::Transfer => TypedEvent::Transfer(decode_as::<Transfer>(log, kind)?),
        EventKind::AccrueInterest => {
            TypedEvent::AccrueInterest(decode_as::<AccrueInterest>(log, kind)?)
        }
        EventKind::Borrow => TypedEvent::Borrow(decode_as::<Borrow>(log, kind)?),
        EventKind::RepayBorrow => TypedEvent::RepayBorrow(decode_as::<RepayBorrow>(log, kind)?),
        EventKind::ReservesReduced => {
            TypedEvent::ReservesReduced(decode_as::<ReservesReduced>(log, kind)?)
        }
    };

    Ok(Some(event))
}

fn decode_as<E: SolEvent>(log: &Log, kind: EventKind) -> TrackerResult<E> {
    E::decode_log(log, true)
        .map(|decoded| decoded.data)
        .map_err(|e| {
            TrackerError::decoding(
                format!("Failed to decode {kind} emitted by {}", log.address),
                Some(Box::new(e)),
            )
        })
}

/// Create a filter for tracked events emitted by the cToken in a block range.
///
/// Every transaction that mutates the pool's accounting emits at least one
/// cToken event (interest accrues first on every mutating call), so this
/// filter is enough to discover candidate transactions.
#[must_use]
pub fn create_ctoken_filter(ctoken: Address, from_block: u64, to_block: u64) -> Filter {
    Filter::new()
        .address(ctoken)
        .event_signature(EVENT_TOPICS.to_vec())
        .from_block(from_block)
        .to_block(to_block)
}
