//! Rate monitor: bootstraps the tracked state and compares exchange rates
//! across observations.
//!
//! # State machine
//!
//! ```text
//!                 bootstrap ok
//! Uninitialized ───────────────▶ Tracking ──┐
//!      ▲  │                          │  ▲    │ observation
//!      └──┘ bootstrap error          │  └────┘
//!                                    │ invariant violation
//!                                    ▼
//!                                 Halted
//! ```
//!
//! - The first observation addressed to the cToken triggers a bootstrap from
//!   the ledger at the observation's block. No alert is raised for it.
//! - The snapshot is the state at the end of that block, so any observation
//!   from the bootstrap block or earlier is already counted and is skipped.
//! - Every later observation is decoded and applied in log order. The rate
//!   after the last applied event is compared to the previous rate with
//!   strict `<`, then becomes the new baseline whether or not it alerted.
//! - Decoding errors and anomalies skip one log. A bootstrap error leaves the
//!   monitor uninitialized so the next observation retries. An invariant
//!   violation halts the monitor for good.

use alloy::primitives::{Address, Log, B256};
use tracing::{debug, error, info, instrument, warn};

use crate::alert::Alert;
use crate::error::{TrackerError, TrackerResult};
use crate::events::{decode_log, DecodedLog};
use crate::numeric::{ExchangeRate, Mantissa};
use crate::rpc::SnapshotSource;
use crate::state::{TrackedContracts, TrackedState};

/// One transaction's logs, as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Destination of the transaction (`None` for contract creation).
    pub to: Option<Address>,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Every log emitted by the transaction, in emission order.
    pub logs: Vec<Log>,
}

impl Observation {
    /// Create an observation.
    #[must_use]
    pub const fn new(tx_hash: B256, to: Option<Address>, block_number: u64, logs: Vec<Log>) -> Self {
        Self {
            tx_hash,
            to,
            block_number,
            logs,
        }
    }
}

/// Lifecycle of a [`RateMonitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorPhase {
    /// Waiting for the first observation to bootstrap from.
    Uninitialized,
    /// Mirroring the cToken's accounting.
    Tracking {
        /// Mirrored accounting after the last applied observation.
        state: TrackedState,
        /// Block the snapshot was read at. Observations up to and including
        /// it are already reflected in the state.
        bootstrap_block: u64,
    },
    /// Stopped after an invariant violation.
    Halted {
        /// The violation that caused the halt.
        reason: String,
    },
}

/// What a single observation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// Not addressed to the tracked cToken.
    Ignored,
    /// Baseline established from the ledger snapshot.
    Bootstrapped {
        /// Initial exchange rate.
        rate: ExchangeRate,
    },
    /// No tracked event was applied, the baseline is unchanged.
    NoChange,
    /// At least one event was applied and the rate was compared.
    Compared {
        /// Baseline before the observation.
        previous: ExchangeRate,
        /// Rate after the last applied event.
        current: ExchangeRate,
        /// Raised when `current < previous`.
        alert: Option<Alert>,
    },
}

impl ObservationOutcome {
    /// The alert raised by this observation, if any.
    #[must_use]
    pub const fn alert(&self) -> Option<&Alert> {
        match self {
            Self::Compared {
                alert: Some(alert), ..
            } => Some(alert),
            _ => None,
        }
    }
}

/// Exchange-rate monitor for one cToken.
#[derive(Debug)]
pub struct RateMonitor<S> {
    ctoken_name: String,
    contracts: TrackedContracts,
    scale: Mantissa,
    source: S,
    phase: MonitorPhase,
}

impl<S: SnapshotSource> RateMonitor<S> {
    /// Create an uninitialized monitor.
    pub fn new(
        ctoken_name: impl Into<String>,
        contracts: TrackedContracts,
        scale: Mantissa,
        source: S,
    ) -> Self {
        Self {
            ctoken_name: ctoken_name.into(),
            contracts,
            scale,
            source,
            phase: MonitorPhase::Uninitialized,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &MonitorPhase {
        &self.phase
    }

    /// Tracked state, once bootstrapped.
    #[must_use]
    pub const fn state(&self) -> Option<&TrackedState> {
        match &self.phase {
            MonitorPhase::Tracking { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Block the tracked state was bootstrapped at.
    #[must_use]
    pub const fn bootstrap_block(&self) -> Option<u64> {
        match &self.phase {
            MonitorPhase::Tracking {
                bootstrap_block, ..
            } => Some(*bootstrap_block),
            _ => None,
        }
    }

    /// Whether an invariant violation stopped the monitor.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self.phase, MonitorPhase::Halted { .. })
    }

    /// The tracked contract pair.
    #[must_use]
    pub const fn contracts(&self) -> &TrackedContracts {
        &self.contracts
    }

    /// Feed one observation through the monitor.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError`](TrackerError::BootstrapError) if the bootstrap
    ///   snapshot could not be fetched or is inconsistent. The monitor stays
    ///   uninitialized.
    /// - [`InvariantViolation`](TrackerError::InvariantViolation) if an event
    ///   broke the accounting. The monitor halts.
    /// - [`TrackerHalted`](TrackerError::TrackerHalted) for every observation
    ///   after a halt.
    #[instrument(skip_all, fields(tx_hash = %observation.tx_hash, block = observation.block_number))]
    pub async fn handle_observation(
        &mut self,
        observation: &Observation,
    ) -> TrackerResult<ObservationOutcome> {
        if observation.to != Some(self.contracts.ctoken) {
            return Ok(ObservationOutcome::Ignored);
        }

        let tracked = match &self.phase {
            MonitorPhase::Halted { reason } => return Err(TrackerError::halted(reason.clone())),
            MonitorPhase::Uninitialized => None,
            MonitorPhase::Tracking {
                state,
                bootstrap_block,
            } => Some((*state, *bootstrap_block)),
        };

        match tracked {
            None => self.bootstrap(observation.block_number).await,
            Some((_, bootstrap_block)) if observation.block_number <= bootstrap_block => {
                debug!(bootstrap_block, "Observation already reflected in bootstrap snapshot");
                Ok(ObservationOutcome::NoChange)
            }
            Some((state, bootstrap_block)) => self.track(state, bootstrap_block, observation),
        }
    }

    async fn bootstrap(&mut self, block_number: u64) -> TrackerResult<ObservationOutcome> {
        let snapshot = self.source.fetch_snapshot(block_number).await.map_err(|e| {
            warn!(error = %e, "Bootstrap snapshot fetch failed, will retry on next observation");
            e
        })?;
        let state = TrackedState::from_snapshot(&snapshot, self.scale).map_err(|e| {
            warn!(error = %e, "Bootstrap snapshot rejected, will retry on next observation");
            e
        })?;
        let rate = state.exchange_rate();

        info!(
            cash = %state.cash(),
            borrows = %state.borrows(),
            reserves = %state.reserves(),
            supply = %state.supply(),
            reserve_factor = %state.reserve_factor(),
            exchange_rate = %rate.to_decimal_string(self.scale),
            "Bootstrapped tracked state"
        );

        match self.source.fetch_exchange_rate_stored(block_number).await {
            Ok(stored) => {
                if stored == rate {
                    debug!(exchange_rate_stored = %stored, "Derived rate matches exchangeRateStored");
                } else {
                    info!(
                        derived = %rate,
                        exchange_rate_stored = %stored,
                        "Derived rate differs from exchangeRateStored"
                    );
                }
            }
            Err(e) => debug!(error = %e, "exchangeRateStored unavailable for reconciliation"),
        }

        self.phase = MonitorPhase::Tracking {
            state,
            bootstrap_block: block_number,
        };
        Ok(ObservationOutcome::Bootstrapped { rate })
    }

    fn track(
        &mut self,
        state: TrackedState,
        bootstrap_block: u64,
        observation: &Observation,
    ) -> TrackerResult<ObservationOutcome> {
        let previous = state.exchange_rate();
        let mut current = state;
        let mut candidate = None;

        for (index, log) in observation.logs.iter().enumerate() {
            let event = match decode_log(log) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!(log_index = index, error = %e, "Skipping undecodable log");
                    continue;
                }
            };

            let decoded = DecodedLog {
                emitter: log.address,
                event,
            };
            match current.apply(&decoded, &self.contracts) {
                Ok(transition) => {
                    debug!(
                        log_index = index,
                        event = %decoded.event.kind(),
                        change = %transition.change,
                        exchange_rate = %transition.exchange_rate(),
                        "Applied event"
                    );
                    current = transition.state;
                    candidate = Some(transition.exchange_rate());
                }
                Err(e) if e.is_local() => {
                    warn!(log_index = index, event = %decoded.event.kind(), error = %e, "Skipping event");
                }
                Err(e) => {
                    error!(
                        log_index = index,
                        event = %decoded.event.kind(),
                        error = %e,
                        "Tracker halted"
                    );
                    self.phase = MonitorPhase::Halted {
                        reason: e.to_string(),
                    };
                    return Err(e);
                }
            }
        }

        let Some(rate) = candidate else {
            debug!("No tracked events applied");
            return Ok(ObservationOutcome::NoChange);
        };

        let alert = (rate < previous).then(|| {
            Alert::exchange_rate_down(
                &self.ctoken_name,
                self.contracts.ctoken,
                observation.block_number,
                observation.tx_hash,
                previous,
                rate,
            )
        });

        self.phase = MonitorPhase::Tracking {
            state: current,
            bootstrap_block,
        };
        Ok(ObservationOutcome::Compared {
            previous,
            current: rate,
            alert,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::numeric::Amount;
    use crate::state::Snapshot;
    use alloy::primitives::{address, U256};
    use async_trait::async_trait;

    const CTOKEN: Address = address!("6C8c6b02E7b2BE14d4fA6022Dfd6d75921D90E4E");
    const UNDERLYING: Address = address!("0D8775F648430679A709E98d2b0Cb6250d2887EF");

    struct FixedSource;

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn fetch_snapshot(&self, block_number: u64) -> TrackerResult<Snapshot> {
            Ok(Snapshot {
                block_number,
                cash: Amount::from(1000u64),
                borrows: Amount::from(500u64),
                reserves: Amount::from(50u64),
                supply: Amount::from(100u64),
                reserve_factor: U256::ZERO,
            })
        }

        async fn fetch_exchange_rate_stored(&self, _block_number: u64) -> TrackerResult<ExchangeRate> {
            Err(TrackerError::rpc("not archived", None))
        }
    }

    fn monitor() -> RateMonitor<FixedSource> {
        RateMonitor::new(
            "cBAT",
            TrackedContracts {
                ctoken: CTOKEN,
                underlying: UNDERLYING,
            },
            Mantissa::default(),
            FixedSource,
        )
    }

    #[tokio::test]
    async fn test_observation_to_other_contract_ignored() {
        let mut monitor = monitor();
        let observation = Observation::new(B256::ZERO, Some(UNDERLYING), 1, Vec::new());
        let outcome = monitor.handle_observation(&observation).await.unwrap();
        assert_eq!(outcome, ObservationOutcome::Ignored);
        assert_eq!(monitor.phase(), &MonitorPhase::Uninitialized);

        let creation = Observation::new(B256::ZERO, None, 1, Vec::new());
        let outcome = monitor.handle_observation(&creation).await.unwrap();
        assert_eq!(outcome, ObservationOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_bootstrap_survives_missing_reconciliation() {
        let mut monitor = monitor();
        let observation = Observation::new(B256::ZERO, Some(CTOKEN), 1, Vec::new());
        let outcome = monitor.handle_observation(&observation).await.unwrap();
        assert!(matches!(outcome, ObservationOutcome::Bootstrapped { .. }));
        assert!(monitor.state().is_some());
        assert!(outcome.alert().is_none());
    }

    #[tokio::test]
    async fn test_empty_observation_after_bootstrap_is_no_change() {
        let mut monitor = monitor();
        let first = Observation::new(B256::ZERO, Some(CTOKEN), 1, Vec::new());
        monitor.handle_observation(&first).await.unwrap();
        assert_eq!(monitor.bootstrap_block(), Some(1));

        let next = Observation::new(B256::ZERO, Some(CTOKEN), 2, Vec::new());
        let outcome = monitor.handle_observation(&next).await.unwrap();
        assert_eq!(outcome, ObservationOutcome::NoChange);
        assert_eq!(monitor.bootstrap_block(), Some(1));
    }
}
