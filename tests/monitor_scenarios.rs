//! Integration tests for the rate monitor.
//!
//! The ledger is replaced by an in-memory [`SnapshotSource`], and observations
//! are built from `sol!`-encoded logs, so every scenario runs offline.
//!
//! Baseline used throughout:
//!
//! ```text
//! cash = 1000, borrows = 500, reserves = 50, supply = 100, reserve factor = 0.1
//! rate = (1000 + 500 - 50) / 100 = 14.5
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;

use alloy::primitives::{address, b256, Address, Bytes, Log, LogData, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use tokio::sync::Mutex;

use ctoken_rate_monitor::alert::AlertSeverity;
use ctoken_rate_monitor::error::{TrackerError, TrackerResult};
use ctoken_rate_monitor::events::{AccrueInterest, Borrow, ReservesReduced, Transfer};
use ctoken_rate_monitor::monitor::{MonitorPhase, Observation, ObservationOutcome, RateMonitor};
use ctoken_rate_monitor::numeric::{Amount, ExchangeRate, Mantissa};
use ctoken_rate_monitor::rpc::SnapshotSource;
use ctoken_rate_monitor::state::{Snapshot, TrackedContracts};

const CTOKEN: Address = address!("6C8c6b02E7b2BE14d4fA6022Dfd6d75921D90E4E");
const UNDERLYING: Address = address!("0D8775F648430679A709E98d2b0Cb6250d2887EF");
const USER: Address = address!("00000000000000000000000000000000000000aa");
const OTHER: Address = address!("00000000000000000000000000000000000000bb");
const TX: B256 = b256!("1111111111111111111111111111111111111111111111111111111111111111");

/// In-memory ledger with an optional number of failures before it answers.
#[derive(Clone)]
struct MockSnapshotSource {
    snapshot: Snapshot,
    failures_left: Arc<Mutex<u32>>,
    calls: Arc<Mutex<u32>>,
}

impl MockSnapshotSource {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            failures_left: Arc::new(Mutex::new(0)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    fn failing(snapshot: Snapshot, failures: u32) -> Self {
        let source = Self::new(snapshot);
        *source.failures_left.try_lock().unwrap() = failures;
        source
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn fetch_snapshot(&self, block_number: u64) -> TrackerResult<Snapshot> {
        *self.calls.lock().await += 1;

        let mut failures = self.failures_left.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(TrackerError::bootstrap("getCash() reverted", None));
        }

        Ok(Snapshot {
            block_number,
            ..self.snapshot
        })
    }

    async fn fetch_exchange_rate_stored(&self, _block_number: u64) -> TrackerResult<ExchangeRate> {
        Ok(ExchangeRate::from_mantissa(U256::from(
            14_500_000_000_000_000_000u128,
        )))
    }
}

fn baseline() -> Snapshot {
    Snapshot {
        block_number: 0,
        cash: Amount::from(1000u64),
        borrows: Amount::from(500u64),
        reserves: Amount::from(50u64),
        supply: Amount::from(100u64),
        reserve_factor: U256::from(100_000_000_000_000_000u128),
    }
}

/// `value / 10` as an 18-decimal mantissa.
fn rate_tenths(value: u128) -> ExchangeRate {
    ExchangeRate::from_mantissa(U256::from(value * 100_000_000_000_000_000u128))
}

fn monitor_with(source: MockSnapshotSource) -> RateMonitor<MockSnapshotSource> {
    RateMonitor::new(
        "cBAT",
        TrackedContracts {
            ctoken: CTOKEN,
            underlying: UNDERLYING,
        },
        Mantissa::default(),
        source,
    )
}

fn encoded<E: SolEvent>(emitter: Address, event: &E) -> Log {
    Log {
        address: emitter,
        data: event.encode_log_data(),
    }
}

fn transfer(emitter: Address, from: Address, to: Address, amount: u64) -> Log {
    encoded(
        emitter,
        &Transfer {
            from,
            to,
            amount: U256::from(amount),
        },
    )
}

fn borrow(total_borrows: u64) -> Log {
    encoded(
        CTOKEN,
        &Borrow {
            borrower: USER,
            borrow_amount: U256::from(1u64),
            account_borrows: U256::from(1u64),
            total_borrows: U256::from(total_borrows),
        },
    )
}

fn accrue(interest: u64, total_borrows: u64) -> Log {
    encoded(
        CTOKEN,
        &AccrueInterest {
            interest_accumulated: U256::from(interest),
            borrow_index: U256::from(1u64),
            total_borrows: U256::from(total_borrows),
        },
    )
}

fn reserves_reduced(total_reserves: u64) -> Log {
    encoded(
        CTOKEN,
        &ReservesReduced {
            admin: USER,
            reduce_amount: U256::from(1u64),
            total_reserves: U256::from(total_reserves),
        },
    )
}

fn observation(block_number: u64, logs: Vec<Log>) -> Observation {
    Observation::new(TX, Some(CTOKEN), block_number, logs)
}

async fn bootstrapped() -> RateMonitor<MockSnapshotSource> {
    let mut monitor = monitor_with(MockSnapshotSource::new(baseline()));
    let outcome = monitor
        .handle_observation(&observation(1, Vec::new()))
        .await
        .unwrap();
    assert_eq!(outcome, ObservationOutcome::Bootstrapped { rate: rate_tenths(145) });
    monitor
}

#[tokio::test]
async fn test_bootstrap_emits_no_alert() {
    let mut monitor = monitor_with(MockSnapshotSource::new(baseline()));
    // Logs in the bootstrap observation are already reflected in the snapshot.
    let outcome = monitor
        .handle_observation(&observation(1, vec![transfer(UNDERLYING, CTOKEN, USER, 100)]))
        .await
        .unwrap();

    assert!(matches!(outcome, ObservationOutcome::Bootstrapped { .. }));
    assert!(outcome.alert().is_none());
    assert_eq!(monitor.state().unwrap().cash(), Amount::from(1000u64));
}

#[tokio::test]
async fn test_same_block_after_bootstrap_not_applied_twice() {
    let mut monitor = monitor_with(MockSnapshotSource::new(baseline()));
    monitor
        .handle_observation(&observation(10, Vec::new()))
        .await
        .unwrap();
    assert_eq!(monitor.bootstrap_block(), Some(10));

    // The snapshot read at block 10 already includes this later transaction.
    let same_block = Observation::new(
        B256::repeat_byte(0x22),
        Some(CTOKEN),
        10,
        vec![transfer(UNDERLYING, CTOKEN, USER, 100)],
    );
    let outcome = monitor.handle_observation(&same_block).await.unwrap();
    assert_eq!(outcome, ObservationOutcome::NoChange);
    assert_eq!(monitor.state().unwrap().cash(), Amount::from(1000u64));

    let earlier = observation(9, vec![transfer(UNDERLYING, CTOKEN, USER, 100)]);
    let outcome = monitor.handle_observation(&earlier).await.unwrap();
    assert_eq!(outcome, ObservationOutcome::NoChange);

    let next_block = observation(11, vec![transfer(UNDERLYING, CTOKEN, USER, 100)]);
    let outcome = monitor.handle_observation(&next_block).await.unwrap();
    assert!(outcome.alert().is_some());
    assert_eq!(monitor.state().unwrap().cash(), Amount::from(900u64));
}

#[tokio::test]
async fn test_cash_outflow_lowers_rate_and_alerts() {
    let mut monitor = bootstrapped().await;

    let outcome = monitor
        .handle_observation(&observation(2, vec![transfer(UNDERLYING, CTOKEN, USER, 100)]))
        .await
        .unwrap();

    let ObservationOutcome::Compared {
        previous,
        current,
        alert,
    } = outcome
    else {
        unreachable!("expected a comparison, got {outcome:?}");
    };
    assert_eq!(previous, rate_tenths(145));
    assert_eq!(current, rate_tenths(135));

    let alert = alert.expect("rate went down");
    assert_eq!(alert.name, "Compound Token Exchange Rate Goes Down");
    assert_eq!(alert.description, "Compound token (cBAT) exchange rate goes down");
    assert_eq!(alert.alert_id, "COMPOUND-CBAT-EXCHANGE-RATE-DOWN-1");
    assert_eq!(alert.severity, AlertSeverity::Medium);
    assert_eq!(alert.block_number, 2);
    assert_eq!(alert.tx_hash, TX);
    assert_eq!(alert.ctoken, CTOKEN);
}

#[tokio::test]
async fn test_rate_increase_or_equal_does_not_alert() {
    let mut monitor = bootstrapped().await;

    let up = monitor
        .handle_observation(&observation(2, vec![transfer(UNDERLYING, USER, CTOKEN, 100)]))
        .await
        .unwrap();
    assert!(up.alert().is_none());

    // Same borrow total: rate unchanged.
    let same = monitor
        .handle_observation(&observation(3, vec![borrow(500)]))
        .await
        .unwrap();
    assert!(matches!(same, ObservationOutcome::Compared { alert: None, .. }));
}

#[tokio::test]
async fn test_baseline_advances_after_alert() {
    let mut monitor = bootstrapped().await;

    let first = monitor
        .handle_observation(&observation(2, vec![transfer(UNDERLYING, CTOKEN, USER, 100)]))
        .await
        .unwrap();
    assert!(first.alert().is_some());

    // Still below the original 14.5, but not below the new 13.5 baseline.
    let second = monitor
        .handle_observation(&observation(3, vec![transfer(UNDERLYING, USER, CTOKEN, 50)]))
        .await
        .unwrap();
    assert!(second.alert().is_none());
    assert_eq!(monitor.state().unwrap().exchange_rate(), rate_tenths(140));
}

#[tokio::test]
async fn test_malformed_log_skipped_siblings_applied() {
    let mut monitor = bootstrapped().await;

    let good = transfer(UNDERLYING, CTOKEN, USER, 100);
    let truncated = Log {
        address: UNDERLYING,
        data: LogData::new_unchecked(good.data.topics().to_vec(), Bytes::from(vec![0u8; 7])),
    };

    let outcome = monitor
        .handle_observation(&observation(2, vec![truncated, borrow(600)]))
        .await
        .unwrap();

    let state = monitor.state().unwrap();
    assert_eq!(state.cash(), Amount::from(1000u64));
    assert_eq!(state.borrows(), Amount::from(600u64));
    assert!(matches!(outcome, ObservationOutcome::Compared { alert: None, .. }));
}

#[tokio::test]
async fn test_only_malformed_logs_is_no_change() {
    let mut monitor = bootstrapped().await;
    let good = transfer(UNDERLYING, CTOKEN, USER, 100);
    let truncated = Log {
        address: UNDERLYING,
        data: LogData::new_unchecked(good.data.topics().to_vec(), Bytes::new()),
    };

    let before = *monitor.state().unwrap();
    let outcome = monitor
        .handle_observation(&observation(2, vec![truncated]))
        .await
        .unwrap();

    assert_eq!(outcome, ObservationOutcome::NoChange);
    assert_eq!(monitor.state().unwrap(), &before);
}

#[tokio::test]
async fn test_unrelated_logs_are_ignored() {
    let mut monitor = bootstrapped().await;
    let unknown = Log {
        address: CTOKEN,
        data: LogData::new_unchecked(vec![B256::repeat_byte(0x42)], Bytes::new()),
    };

    let outcome = monitor
        .handle_observation(&observation(2, vec![unknown]))
        .await
        .unwrap();
    assert_eq!(outcome, ObservationOutcome::NoChange);
}

#[tokio::test]
async fn test_anomalous_transfer_leaves_state_untouched() {
    let mut monitor = bootstrapped().await;

    let outcome = monitor
        .handle_observation(&observation(
            2,
            vec![
                transfer(UNDERLYING, USER, OTHER, 999),
                transfer(OTHER, CTOKEN, USER, 999),
                borrow(450),
            ],
        ))
        .await
        .unwrap();

    let state = monitor.state().unwrap();
    assert_eq!(state.cash(), Amount::from(1000u64));
    assert_eq!(state.supply(), Amount::from(100u64));
    assert_eq!(state.borrows(), Amount::from(450u64));
    assert_eq!(outcome.alert().map(|a| a.new_rate), Some(rate_tenths(140)));
}

#[tokio::test]
async fn test_events_applied_in_log_order() {
    let mut forward = bootstrapped().await;
    let mut reversed = bootstrapped().await;

    forward
        .handle_observation(&observation(2, vec![accrue(100, 600), reserves_reduced(40)]))
        .await
        .unwrap();
    reversed
        .handle_observation(&observation(2, vec![reserves_reduced(40), accrue(100, 600)]))
        .await
        .unwrap();

    assert_eq!(forward.state().unwrap().reserves(), Amount::from(40u64));
    assert_eq!(reversed.state().unwrap().reserves(), Amount::from(50u64));
}

#[tokio::test]
async fn test_zero_supply_halts_monitor() {
    let mut monitor = bootstrapped().await;

    let result = monitor
        .handle_observation(&observation(2, vec![transfer(CTOKEN, USER, CTOKEN, 100)]))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, TrackerError::InvariantViolation { .. }));
    assert!(monitor.is_halted());
    assert!(monitor.state().is_none());

    let next = monitor
        .handle_observation(&observation(3, vec![borrow(500)]))
        .await;
    assert!(matches!(next, Err(TrackerError::TrackerHalted { .. })));
}

#[tokio::test]
async fn test_bootstrap_failure_retries_on_next_observation() {
    let source = MockSnapshotSource::failing(baseline(), 1);
    let calls = Arc::clone(&source.calls);
    let mut monitor = monitor_with(source);

    let first = monitor.handle_observation(&observation(1, Vec::new())).await;
    assert!(matches!(first, Err(TrackerError::BootstrapError { .. })));
    assert_eq!(monitor.phase(), &MonitorPhase::Uninitialized);

    let second = monitor
        .handle_observation(&observation(2, Vec::new()))
        .await
        .unwrap();
    assert!(matches!(second, ObservationOutcome::Bootstrapped { .. }));
    assert_eq!(*calls.lock().await, 2);
}

#[tokio::test]
async fn test_zero_supply_snapshot_is_bootstrap_error() {
    let mut monitor = monitor_with(MockSnapshotSource::new(Snapshot {
        supply: Amount::ZERO,
        ..baseline()
    }));

    let result = monitor.handle_observation(&observation(1, Vec::new())).await;
    assert!(matches!(result, Err(TrackerError::BootstrapError { .. })));
    assert!(!monitor.is_halted());
    assert_eq!(monitor.phase(), &MonitorPhase::Uninitialized);
}

#[tokio::test]
async fn test_observation_to_other_contract_is_pass_through() {
    let source = MockSnapshotSource::new(baseline());
    let calls = Arc::clone(&source.calls);
    let mut monitor = monitor_with(source);

    let foreign = Observation::new(TX, Some(UNDERLYING), 1, vec![borrow(1)]);
    let outcome = monitor.handle_observation(&foreign).await.unwrap();

    assert_eq!(outcome, ObservationOutcome::Ignored);
    assert_eq!(*calls.lock().await, 0);
}
