//! Error types for the cToken exchange-rate monitor.
//!
//! This module provides a unified error type [`TrackerError`] covering every
//! failure the monitor can hit, from configuration loading through event
//! decoding to reserve-accounting invariants.
//!
//! # Design
//!
//! The variants are grouped by how the monitor reacts to them:
//!
//! - Boundary errors ([`TrackerError::ConfigError`], [`TrackerError::RpcError`],
//!   [`TrackerError::DatabaseError`]) surface to the caller unchanged.
//! - Local errors ([`TrackerError::DecodingError`], [`TrackerError::AnomalyWarning`])
//!   affect a single log; sibling events in the same observation still apply.
//! - [`TrackerError::BootstrapError`] aborts one bootstrap attempt; the monitor
//!   stays uninitialized and retries on the next observation.
//! - [`TrackerError::InvariantViolation`] and [`TrackerError::TrackerHalted`]
//!   stop all further updates for the tracked token.
//!
//! Use [`TrackerError::is_fatal`] to tell local failures from halting ones.
//!
//! # Example
//!
//! ```
//! use ctoken_rate_monitor::error::{TrackerError, TrackerResult};
//!
//! fn validate_supply(supply: u128) -> TrackerResult<()> {
//!     if supply == 0 {
//!         return Err(TrackerError::invariant("total supply is zero", None));
//!     }
//!     Ok(())
//! }
//!
//! assert!(validate_supply(0).is_err());
//! ```

use std::fmt;

/// Result type alias using [`TrackerError`].
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Boxed source error carried by most variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the exchange-rate monitor.
#[derive(Debug)]
pub enum TrackerError {
    /// Configuration or environment variable errors.
    ///
    /// Variants include:
    /// - Missing or invalid environment variables
    /// - Invalid addresses or URLs
    /// - Malformed configuration values
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// RPC provider or network errors.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// A log matched a known event signature but its payload could not be
    /// parsed into the expected field layout.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// A Transfer event did not touch the tracked contract pair.
    ///
    /// Non-fatal: the event is skipped and tracker state is left untouched.
    AnomalyWarning {
        /// Human-readable error message
        message: String,
    },

    /// The bootstrap snapshot fetch failed or returned inconsistent data.
    BootstrapError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Reserve accounting reached an impossible state.
    ///
    /// Variants include:
    /// - Total supply reached zero (division by zero)
    /// - A non-negative quantity went negative
    /// - Intermediate overflow beyond 256 bits
    InvariantViolation {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// The tracker was halted by an earlier invariant violation and refuses
    /// further updates until it is restarted.
    TrackerHalted {
        /// Reason recorded when the tracker halted
        reason: String,
    },

    /// Database operation errors.
    ///
    /// Variants include:
    /// - Connection failures
    /// - Query execution errors
    /// - Migration failures
    DatabaseError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },
}

impl TrackerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use ctoken_rate_monitor::error::TrackerError;
    ///
    /// let err = TrackerError::config("CTOKEN_ADDRESS is invalid", None);
    /// assert!(matches!(err, TrackerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    ///
    /// # Example
    ///
    /// ```
    /// use ctoken_rate_monitor::error::TrackerError;
    ///
    /// let err = TrackerError::rpc("Failed to connect to provider", None);
    /// assert!(matches!(err, TrackerError::RpcError { .. }));
    /// ```
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    ///
    /// # Example
    ///
    /// ```
    /// use ctoken_rate_monitor::error::TrackerError;
    ///
    /// let err = TrackerError::decoding("Transfer payload truncated", None);
    /// assert!(matches!(err, TrackerError::DecodingError { .. }));
    /// ```
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a new anomaly warning.
    #[must_use]
    pub fn anomaly(message: impl Into<String>) -> Self {
        Self::AnomalyWarning {
            message: message.into(),
        }
    }

    /// Create a new bootstrap error.
    ///
    /// # Example
    ///
    /// ```
    /// use ctoken_rate_monitor::error::TrackerError;
    ///
    /// let err = TrackerError::bootstrap("totalSupply call reverted", None);
    /// assert!(!err.is_fatal());
    /// ```
    #[must_use]
    pub fn bootstrap(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::BootstrapError {
            message: message.into(),
            source,
        }
    }

    /// Create a new invariant violation.
    ///
    /// # Example
    ///
    /// ```
    /// use ctoken_rate_monitor::error::TrackerError;
    ///
    /// let err = TrackerError::invariant("total supply is zero", None);
    /// assert!(err.is_fatal());
    /// ```
    #[must_use]
    pub fn invariant(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
            source,
        }
    }

    /// Create a halted-tracker error.
    #[must_use]
    pub fn halted(reason: impl Into<String>) -> Self {
        Self::TrackerHalted {
            reason: reason.into(),
        }
    }

    /// Create a new database error.
    ///
    /// # Example
    ///
    /// ```
    /// use ctoken_rate_monitor::error::TrackerError;
    ///
    /// let err = TrackerError::database("Connection failed", None);
    /// assert!(matches!(err, TrackerError::DatabaseError { .. }));
    /// ```
    #[must_use]
    pub fn database(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Whether this error stops all further updates for the tracked token.
    ///
    /// Decoding errors, anomalies and bootstrap failures are recoverable;
    /// invariant violations and the halted state are not.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation { .. } | Self::TrackerHalted { .. }
        )
    }

    /// Whether this error concerns a single log and should not abort the
    /// rest of the observation.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::DecodingError { .. } | Self::AnomalyWarning { .. })
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::AnomalyWarning { message } => write!(f, "Anomaly: {message}"),
            Self::BootstrapError { message, .. } => write!(f, "Bootstrap error: {message}"),
            Self::InvariantViolation { message, .. } => {
                write!(f, "Invariant violation: {message}")
            }
            Self::TrackerHalted { reason } => write!(f, "Tracker halted: {reason}"),
            Self::DatabaseError { message, .. } => write!(f, "Database error: {message}"),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::BootstrapError { source, .. }
            | Self::InvariantViolation { source, .. }
            | Self::DatabaseError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::AnomalyWarning { .. } | Self::TrackerHalted { .. } => None,
        }
    }
}
