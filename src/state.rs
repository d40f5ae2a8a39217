//! Incremental mirror of a cToken's reserve accounting.
//!
//! [`TrackedState`] holds the four quantities the exchange rate is derived
//! from, plus the reserve factor needed to split accrued interest:
//!
//! ```text
//! exchange_rate = (cash + borrows - reserves) * 10^18 / supply
//! ```
//!
//! ## Design
//!
//! The state is seeded once from a ledger [`Snapshot`] and afterwards only
//! moves through the `apply_*` transitions, one per tracked event. Each
//! transition is pure: it borrows the current state, returns a new
//! [`Transition`] carrying the next state and what changed, and never logs or
//! performs I/O. Fields an event doesn't touch are carried over unchanged,
//! and the exchange rate is recomputed from scratch every time. It is never
//! adjusted independently.
//!
//! A transition that would leave the state inconsistent (zero supply, a
//! negative quantity) returns an
//! [`InvariantViolation`](TrackerError::InvariantViolation) and no new state.
//!
//! ## Example
//!
//! ```
//! use alloy::primitives::U256;
//! use ctoken_rate_monitor::events::Borrow;
//! use ctoken_rate_monitor::numeric::{Amount, Mantissa};
//! use ctoken_rate_monitor::state::{Snapshot, TrackedState};
//!
//! # fn example() -> ctoken_rate_monitor::error::TrackerResult<()> {
//! let snapshot = Snapshot {
//!     block_number: 19_000_000,
//!     cash: Amount::from(1_000u64),
//!     borrows: Amount::from(500u64),
//!     reserves: Amount::from(50u64),
//!     supply: Amount::from(100u64),
//!     reserve_factor: U256::ZERO,
//! };
//! let state = TrackedState::from_snapshot(&snapshot, Mantissa::default())?;
//!
//! let borrow = Borrow {
//!     borrower: alloy::primitives::Address::ZERO,
//!     borrow_amount: U256::from(100u64),
//!     account_borrows: U256::from(100u64),
//!     total_borrows: U256::from(600u64),
//! };
//! let next = state.apply_borrow(&borrow)?;
//! assert_eq!(next.state.borrows(), Amount::from(600u64));
//! assert_eq!(next.state.cash(), state.cash());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use alloy::primitives::{Address, U256};
use std::fmt;

use crate::error::{TrackerError, TrackerResult};
use crate::events::{
    AccrueInterest, Borrow, DecodedLog, RepayBorrow, ReservesReduced, Transfer, TypedEvent,
};
use crate::numeric::{Amount, ExchangeRate, Mantissa};

/// The two contracts whose Transfer events move tracked quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedContracts {
    /// The cToken (share token and pool).
    pub ctoken: Address,
    /// The underlying asset token held as cash by the pool.
    pub underlying: Address,
}

/// Authoritative reserve accounting read from the ledger at one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Block the values were read at.
    pub block_number: u64,
    /// `getCash()`
    pub cash: Amount,
    /// `totalBorrows()`
    pub borrows: Amount,
    /// `totalReserves()`
    pub reserves: Amount,
    /// `totalSupply()`
    pub supply: Amount,
    /// `reserveFactorMantissa()`
    pub reserve_factor: U256,
}

/// Mirrored reserve accounting for one cToken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedState {
    cash: Amount,
    borrows: Amount,
    reserves: Amount,
    supply: Amount,
    reserve_factor: U256,
    scale: Mantissa,
    exchange_rate: ExchangeRate,
}

/// What a single transition changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// cToken minted: `supply += amount`.
    SupplyMinted(Amount),
    /// cToken burned: `supply -= amount`.
    SupplyBurned(Amount),
    /// Underlying received by the pool: `cash += amount`.
    CashIn(Amount),
    /// Underlying sent by the pool: `cash -= amount`.
    CashOut(Amount),
    /// Interest accrued: borrows overwritten, reserves grown.
    InterestAccrued {
        /// New borrow total.
        borrows: Amount,
        /// Reserve share of the accrued interest.
        reserves_added: Amount,
    },
    /// Borrow total overwritten by `Borrow` or `RepayBorrow`.
    BorrowsSet(Amount),
    /// Reserve total overwritten by `ReservesReduced`.
    ReservesSet(Amount),
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SupplyMinted(amount) => write!(f, "supply += {amount}"),
            Self::SupplyBurned(amount) => write!(f, "supply -= {amount}"),
            Self::CashIn(amount) => write!(f, "cash += {amount}"),
            Self::CashOut(amount) => write!(f, "cash -= {amount}"),
            Self::InterestAccrued {
                borrows,
                reserves_added,
            } => write!(f, "borrows := {borrows}, reserves += {reserves_added}"),
            Self::BorrowsSet(amount) => write!(f, "borrows := {amount}"),
            Self::ReservesSet(amount) => write!(f, "reserves := {amount}"),
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State after the event.
    pub state: TrackedState,
    /// What the event changed.
    pub change: StateChange,
}

impl Transition {
    /// Exchange rate recomputed for the new state.
    #[must_use]
    pub const fn exchange_rate(&self) -> ExchangeRate {
        self.state.exchange_rate
    }
}

impl TrackedState {
    /// Build a state from explicit quantities, computing the exchange rate.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the quantities admit no exchange
    /// rate (zero supply, reserves above `cash + borrows`) or if the reserve
    /// factor exceeds one.
    pub fn new(
        cash: Amount,
        borrows: Amount,
        reserves: Amount,
        supply: Amount,
        reserve_factor: U256,
        scale: Mantissa,
    ) -> TrackerResult<Self> {
        if reserve_factor > scale.one() {
            return Err(TrackerError::invariant(
                format!("reserve factor {reserve_factor} exceeds {}", scale.one()),
                None,
            ));
        }

        let exchange_rate = ExchangeRate::compute(cash, borrows, reserves, supply, scale)?;
        Ok(Self {
            cash,
            borrows,
            reserves,
            supply,
            reserve_factor,
            scale,
            exchange_rate,
        })
    }

    /// Seed the tracker from a ledger snapshot.
    ///
    /// Seeding the same snapshot twice yields identical states.
    ///
    /// # Errors
    ///
    /// Returns a [`BootstrapError`](TrackerError::BootstrapError) if the
    /// snapshot is inconsistent (zero supply, reserves above assets, reserve
    /// factor above one).
    pub fn from_snapshot(snapshot: &Snapshot, scale: Mantissa) -> TrackerResult<Self> {
        if snapshot.supply.is_zero() {
            return Err(TrackerError::bootstrap(
                format!(
                    "snapshot at block {} reports zero total supply",
                    snapshot.block_number
                ),
                None,
            ));
        }

        Self::new(
            snapshot.cash,
            snapshot.borrows,
            snapshot.reserves,
            snapshot.supply,
            snapshot.reserve_factor,
            scale,
        )
        .map_err(|e| {
            TrackerError::bootstrap(
                format!("inconsistent snapshot at block {}", snapshot.block_number),
                Some(Box::new(e)),
            )
        })
    }

    /// Liquid underlying held by the pool.
    #[must_use]
    pub const fn cash(&self) -> Amount {
        self.cash
    }

    /// Total outstanding borrows.
    #[must_use]
    pub const fn borrows(&self) -> Amount {
        self.borrows
    }

    /// Protocol reserves.
    #[must_use]
    pub const fn reserves(&self) -> Amount {
        self.reserves
    }

    /// Outstanding cToken supply.
    #[must_use]
    pub const fn supply(&self) -> Amount {
        self.supply
    }

    /// Reserve factor mantissa.
    #[must_use]
    pub const fn reserve_factor(&self) -> U256 {
        self.reserve_factor
    }

    /// Fixed-point scale in use.
    #[must_use]
    pub const fn scale(&self) -> Mantissa {
        self.scale
    }

    /// Exchange rate derived from the current quantities.
    #[must_use]
    pub const fn exchange_rate(&self) -> ExchangeRate {
        self.exchange_rate
    }

    /// Dispatch a decoded log to its transition.
    ///
    /// # Errors
    ///
    /// Propagates the error of the selected transition.
    pub fn apply(&self, log: &DecodedLog, contracts: &TrackedContracts) -> TrackerResult<Transition> {
        match &log.event {
            TypedEvent::Transfer(event) => self.apply_transfer(event, contracts, log.emitter),
            TypedEvent::AccrueInterest(event) => self.apply_accrue_interest(event),
            TypedEvent::Borrow(event) => self.apply_borrow(event),
            TypedEvent::RepayBorrow(event) => self.apply_repay_borrow(event),
            TypedEvent::ReservesReduced(event) => self.apply_reserves_reduced(event),
        }
    }

    /// Apply a `Transfer` emitted by either the cToken or the underlying.
    ///
    /// | emitter    | endpoint        | effect            |
    /// |------------|-----------------|-------------------|
    /// | cToken     | `from == cToken` | `supply += value` |
    /// | cToken     | `to == cToken`   | `supply -= value` |
    /// | underlying | `from == cToken` | `cash -= value`   |
    /// | underlying | `to == cToken`   | `cash += value`   |
    ///
    /// # Errors
    ///
    /// - [`AnomalyWarning`](TrackerError::AnomalyWarning) if the emitter is
    ///   neither tracked contract or neither endpoint is the cToken.
    /// - [`InvariantViolation`](TrackerError::InvariantViolation) if supply or
    ///   cash would go negative or supply reaches zero.
    pub fn apply_transfer(
        &self,
        event: &Transfer,
        contracts: &TrackedContracts,
        emitter: Address,
    ) -> TrackerResult<Transition> {
        let amount = Amount::new(event.amount);
        let mut next = *self;

        let change = if emitter == contracts.ctoken {
            if event.from == contracts.ctoken {
                next.supply = self.supply.checked_add(amount, "supply")?;
                StateChange::SupplyMinted(amount)
            } else if event.to == contracts.ctoken {
                next.supply = self.supply.checked_sub(amount, "supply")?;
                StateChange::SupplyBurned(amount)
            } else {
                return Err(not_in_transfer(event, emitter, contracts));
            }
        } else if emitter == contracts.underlying {
            if event.from == contracts.ctoken {
                next.cash = self.cash.checked_sub(amount, "cash")?;
                StateChange::CashOut(amount)
            } else if event.to == contracts.ctoken {
                next.cash = self.cash.checked_add(amount, "cash")?;
                StateChange::CashIn(amount)
            } else {
                return Err(not_in_transfer(event, emitter, contracts));
            }
        } else {
            return Err(TrackerError::anomaly(format!(
                "emitting contract not tracked: {emitter} (Transfer {} -> {})",
                event.from, event.to
            )));
        };

        next.finish(change)
    }

    /// Apply `AccrueInterest`: `borrows := total_borrows`,
    /// `reserves += interest_accumulated * reserve_factor / 10^18` (truncated).
    ///
    /// # Errors
    ///
    /// Returns an invariant violation on overflow or if the new quantities
    /// admit no exchange rate.
    pub fn apply_accrue_interest(&self, event: &AccrueInterest) -> TrackerResult<Transition> {
        let borrows = Amount::new(event.total_borrows);
        let reserves_added =
            Amount::new(event.interest_accumulated).mul_mantissa(self.reserve_factor, self.scale)?;

        let mut next = *self;
        next.borrows = borrows;
        next.reserves = self.reserves.checked_add(reserves_added, "reserves")?;

        next.finish(StateChange::InterestAccrued {
            borrows,
            reserves_added,
        })
    }

    /// Apply `Borrow`: `borrows := total_borrows`.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the new quantities admit no
    /// exchange rate.
    pub fn apply_borrow(&self, event: &Borrow) -> TrackerResult<Transition> {
        self.set_borrows(Amount::new(event.total_borrows))
    }

    /// Apply `RepayBorrow`: `borrows := total_borrows`.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the new quantities admit no
    /// exchange rate.
    pub fn apply_repay_borrow(&self, event: &RepayBorrow) -> TrackerResult<Transition> {
        self.set_borrows(Amount::new(event.total_borrows))
    }

    /// Apply `ReservesReduced`: `reserves := total_reserves`.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the new quantities admit no
    /// exchange rate.
    pub fn apply_reserves_reduced(&self, event: &ReservesReduced) -> TrackerResult<Transition> {
        let reserves = Amount::new(event.total_reserves);
        let mut next = *self;
        next.reserves = reserves;
        next.finish(StateChange::ReservesSet(reserves))
    }

    fn set_borrows(&self, borrows: Amount) -> TrackerResult<Transition> {
        let mut next = *self;
        next.borrows = borrows;
        next.finish(StateChange::BorrowsSet(borrows))
    }

    fn finish(mut self, change: StateChange) -> TrackerResult<Transition> {
        self.exchange_rate =
            ExchangeRate::compute(self.cash, self.borrows, self.reserves, self.supply, self.scale)?;
        Ok(Transition {
            state: self,
            change,
        })
    }
}

fn not_in_transfer(event: &Transfer, emitter: Address, contracts: &TrackedContracts) -> TrackerError {
    TrackerError::anomaly(format!(
        "tracked contract not in transfer: {} (Transfer {} -> {} emitted by {emitter})",
        contracts.ctoken, event.from, event.to
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const CTOKEN: Address = address!("6C8c6b02E7b2BE14d4fA6022Dfd6d75921D90E4E");
    const UNDERLYING: Address = address!("0D8775F648430679A709E98d2b0Cb6250d2887EF");
    const USER: Address = address!("00000000000000000000000000000000000000aa");
    const CONTRACTS: TrackedContracts = TrackedContracts {
        ctoken: CTOKEN,
        underlying: UNDERLYING,
    };

    fn tenth() -> U256 {
        U256::from(100_000_000_000_000_000u128)
    }

    fn rate_e17(tenths: u128) -> ExchangeRate {
        ExchangeRate::from_mantissa(U256::from(tenths * 100_000_000_000_000_000u128))
    }

    fn state(cash: u64, borrows: u64, reserves: u64, supply: u64) -> TrackedState {
        TrackedState::new(
            Amount::from(cash),
            Amount::from(borrows),
            Amount::from(reserves),
            Amount::from(supply),
            tenth(),
            Mantissa::default(),
        )
        .unwrap()
    }

    fn transfer(from: Address, to: Address, amount: u64) -> Transfer {
        Transfer {
            from,
            to,
            amount: U256::from(amount),
        }
    }

    fn recomputed(state: &TrackedState) -> ExchangeRate {
        ExchangeRate::compute(
            state.cash(),
            state.borrows(),
            state.reserves(),
            state.supply(),
            state.scale(),
        )
        .unwrap()
    }

    #[test]
    fn test_transfer_underlying_out_lowers_cash() {
        let before = state(1000, 500, 50, 100);
        assert_eq!(before.exchange_rate(), rate_e17(145));

        let next = before
            .apply_transfer(&transfer(CTOKEN, USER, 100), &CONTRACTS, UNDERLYING)
            .unwrap();

        assert_eq!(next.state.cash(), Amount::from(900u64));
        assert_eq!(next.exchange_rate(), rate_e17(135));
        assert_eq!(next.change, StateChange::CashOut(Amount::from(100u64)));
        assert!(next.exchange_rate() < before.exchange_rate());
    }

    #[test]
    fn test_transfer_underlying_in_raises_cash() {
        let next = state(1000, 500, 50, 100)
            .apply_transfer(&transfer(USER, CTOKEN, 100), &CONTRACTS, UNDERLYING)
            .unwrap();
        assert_eq!(next.state.cash(), Amount::from(1100u64));
    }

    #[test]
    fn test_transfer_ctoken_mint_and_burn() {
        let base = state(1000, 500, 50, 100);

        let minted = base
            .apply_transfer(&transfer(CTOKEN, USER, 50), &CONTRACTS, CTOKEN)
            .unwrap();
        assert_eq!(minted.state.supply(), Amount::from(150u64));

        let burned = base
            .apply_transfer(&transfer(USER, CTOKEN, 50), &CONTRACTS, CTOKEN)
            .unwrap();
        assert_eq!(burned.state.supply(), Amount::from(50u64));
    }

    #[test]
    fn test_transfer_not_touching_ctoken_is_anomaly() {
        let base = state(1000, 500, 50, 100);
        let other = address!("00000000000000000000000000000000000000bb");

        let result = base.apply_transfer(&transfer(USER, other, 5), &CONTRACTS, UNDERLYING);
        assert!(matches!(result, Err(TrackerError::AnomalyWarning { .. })));

        let result = base.apply_transfer(&transfer(USER, other, 5), &CONTRACTS, CTOKEN);
        assert!(matches!(result, Err(TrackerError::AnomalyWarning { .. })));
    }

    #[test]
    fn test_transfer_from_unknown_emitter_is_anomaly() {
        let stranger = address!("00000000000000000000000000000000000000cc");
        let result = state(1000, 500, 50, 100).apply_transfer(
            &transfer(CTOKEN, USER, 5),
            &CONTRACTS,
            stranger,
        );
        assert!(matches!(result, Err(TrackerError::AnomalyWarning { .. })));
    }

    #[test]
    fn test_burn_to_zero_supply_is_invariant_violation() {
        let result = state(1000, 500, 50, 100).apply_transfer(
            &transfer(USER, CTOKEN, 100),
            &CONTRACTS,
            CTOKEN,
        );
        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("total supply is zero"));
    }

    #[test]
    fn test_cash_below_zero_is_invariant_violation() {
        let result = state(10, 500, 50, 100).apply_transfer(
            &transfer(CTOKEN, USER, 11),
            &CONTRACTS,
            UNDERLYING,
        );
        assert!(matches!(result, Err(TrackerError::InvariantViolation { .. })));
    }

    #[test]
    fn test_accrue_interest_splits_reserves() {
        let base = state(0, 1000, 10, 100);
        let accrue = AccrueInterest {
            interest_accumulated: U256::from(100u64),
            borrow_index: U256::from(1u64),
            total_borrows: U256::from(1100u64),
        };

        let next = base.apply_accrue_interest(&accrue).unwrap();
        assert_eq!(next.state.borrows(), Amount::from(1100u64));
        assert_eq!(next.state.reserves(), Amount::from(20u64));
        assert_eq!(next.state.cash(), base.cash());
        assert_eq!(next.state.supply(), base.supply());
    }

    #[test]
    fn test_borrow_and_repay_overwrite_borrows() {
        let base = state(1000, 500, 50, 100);
        let borrow = Borrow {
            borrower: USER,
            borrow_amount: U256::from(100u64),
            account_borrows: U256::from(100u64),
            total_borrows: U256::from(600u64),
        };
        let after_borrow = base.apply_borrow(&borrow).unwrap();
        assert_eq!(after_borrow.state.borrows(), Amount::from(600u64));
        assert_eq!(after_borrow.state.reserves(), base.reserves());

        let repay = RepayBorrow {
            payer: USER,
            borrower: USER,
            repay_amount: U256::from(200u64),
            account_borrows: U256::ZERO,
            total_borrows: U256::from(400u64),
        };
        let after_repay = after_borrow.state.apply_repay_borrow(&repay).unwrap();
        assert_eq!(after_repay.state.borrows(), Amount::from(400u64));
        assert_eq!(after_repay.change, StateChange::BorrowsSet(Amount::from(400u64)));
    }

    #[test]
    fn test_event_order_matters() {
        let base = state(1000, 1000, 10, 100);
        let accrue = AccrueInterest {
            interest_accumulated: U256::from(100u64),
            borrow_index: U256::from(1u64),
            total_borrows: U256::from(1100u64),
        };
        let reduce = ReservesReduced {
            admin: USER,
            reduce_amount: U256::from(5u64),
            total_reserves: U256::from(5u64),
        };

        let forward = base
            .apply_accrue_interest(&accrue)
            .and_then(|t| t.state.apply_reserves_reduced(&reduce))
            .unwrap();
        let reversed = base
            .apply_reserves_reduced(&reduce)
            .and_then(|t| t.state.apply_accrue_interest(&accrue))
            .unwrap();

        assert_eq!(forward.state.reserves(), Amount::from(5u64));
        assert_eq!(reversed.state.reserves(), Amount::from(15u64));
        assert_ne!(forward.exchange_rate(), reversed.exchange_rate());
    }

    #[test]
    fn test_rate_always_recomputed() {
        let mut current = state(1000, 500, 50, 100);
        let steps = [
            TypedEvent::Transfer(transfer(USER, CTOKEN, 300)),
            TypedEvent::AccrueInterest(AccrueInterest {
                interest_accumulated: U256::from(37u64),
                borrow_index: U256::from(1u64),
                total_borrows: U256::from(537u64),
            }),
            TypedEvent::ReservesReduced(ReservesReduced {
                admin: USER,
                reduce_amount: U256::from(3u64),
                total_reserves: U256::from(50u64),
            }),
        ];

        for event in steps {
            let emitter = if matches!(event, TypedEvent::Transfer(_)) {
                UNDERLYING
            } else {
                CTOKEN
            };
            let log = DecodedLog { emitter, event };
            current = current.apply(&log, &CONTRACTS).unwrap().state;
            assert_eq!(current.exchange_rate(), recomputed(&current));
        }
    }

    #[test]
    fn test_from_snapshot_is_idempotent() {
        let snapshot = Snapshot {
            block_number: 1,
            cash: Amount::from(1000u64),
            borrows: Amount::from(500u64),
            reserves: Amount::from(50u64),
            supply: Amount::from(100u64),
            reserve_factor: tenth(),
        };
        let first = TrackedState::from_snapshot(&snapshot, Mantissa::default()).unwrap();
        let second = TrackedState::from_snapshot(&snapshot, Mantissa::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.exchange_rate(), rate_e17(145));
    }

    #[test]
    fn test_from_snapshot_zero_supply_is_bootstrap_error() {
        let snapshot = Snapshot {
            block_number: 7,
            cash: Amount::from(1000u64),
            borrows: Amount::ZERO,
            reserves: Amount::ZERO,
            supply: Amount::ZERO,
            reserve_factor: U256::ZERO,
        };
        let result = TrackedState::from_snapshot(&snapshot, Mantissa::default());
        assert!(matches!(result, Err(TrackerError::BootstrapError { .. })));
    }

    #[test]
    fn test_reserve_factor_above_one_rejected() {
        let result = TrackedState::new(
            Amount::from(1u64),
            Amount::ZERO,
            Amount::ZERO,
            Amount::from(1u64),
            U256::from(2_000_000_000_000_000_000u128),
            Mantissa::default(),
        );
        assert!(result.is_err());
    }
}
