//! Fixed-point arithmetic for reserve accounting.
//!
//! Every quantity the tracker mirrors (cash, borrows, reserves, supply) is an
//! unsigned 256-bit integer in the smallest unit of its token, exactly as the
//! contract stores it. Fractions such as the reserve factor and the exchange
//! rate use Compound's mantissa convention: an integer scaled by `10^18`.
//!
//! Products are formed in 512 bits before dividing back down, so
//! `(cash + borrows - reserves) * 10^18 / supply` never loses precision to an
//! intermediate overflow. Division truncates toward zero, matching on-chain
//! integer semantics.
//!
//! ```
//! use alloy::primitives::U256;
//! use ctoken_rate_monitor::numeric::{Amount, ExchangeRate, Mantissa};
//!
//! let rate = ExchangeRate::compute(
//!     Amount::from(900u64),
//!     Amount::from(500u64),
//!     Amount::from(50u64),
//!     Amount::from(100u64),
//!     Mantissa::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(rate.mantissa(), U256::from(13_500_000_000_000_000_000u128));
//! assert_eq!(rate.to_decimal_string(Mantissa::default()), "13.500000000000000000");
//! ```

use alloy::primitives::{U256, U512};
use std::fmt;

use crate::error::{TrackerError, TrackerResult};

/// Default fixed-point exponent used by Compound mantissas.
pub const DEFAULT_MANTISSA_DECIMALS: u8 = 18;

/// Largest supported exponent. Keeps `10^decimals` comfortably inside 128 bits.
pub const MAX_MANTISSA_DECIMALS: u8 = 38;

/// Fixed-point scale: `one() == 10^decimals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mantissa {
    decimals: u8,
    one: U256,
}

impl Mantissa {
    /// Build a scale of `10^decimals`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `decimals` exceeds
    /// [`MAX_MANTISSA_DECIMALS`].
    pub fn new(decimals: u8) -> TrackerResult<Self> {
        if decimals > MAX_MANTISSA_DECIMALS {
            return Err(TrackerError::config(
                format!(
                    "mantissa exponent {decimals} exceeds maximum of {MAX_MANTISSA_DECIMALS}"
                ),
                None,
            ));
        }

        Ok(Self {
            decimals,
            one: U256::from(10u128.pow(u32::from(decimals))),
        })
    }

    /// The scale factor, `10^decimals`.
    #[must_use]
    pub const fn one(&self) -> U256 {
        self.one
    }

    /// The exponent.
    #[must_use]
    pub const fn decimals(&self) -> u8 {
        self.decimals
    }
}

impl Default for Mantissa {
    fn default() -> Self {
        Self {
            decimals: DEFAULT_MANTISSA_DECIMALS,
            one: U256::from(1_000_000_000_000_000_000u128),
        }
    }
}

/// A non-negative token quantity in the token's smallest unit.
///
/// Subtraction is checked: a result below zero is an
/// [`InvariantViolation`](TrackerError::InvariantViolation), never a wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(U256);

impl Amount {
    /// Zero.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Wrap a raw on-chain integer.
    #[must_use]
    pub const fn new(raw: U256) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    #[must_use]
    pub const fn raw(&self) -> U256 {
        self.0
    }

    /// Whether the amount is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self + other`.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the sum exceeds 256 bits.
    pub fn checked_add(self, other: Self, field: &str) -> TrackerResult<Self> {
        self.0.checked_add(other.0).map(Self).ok_or_else(|| {
            TrackerError::invariant(format!("{field} overflowed adding {other}"), None)
        })
    }

    /// `self - other`.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the result would be negative.
    pub fn checked_sub(self, other: Self, field: &str) -> TrackerResult<Self> {
        self.0.checked_sub(other.0).map(Self).ok_or_else(|| {
            TrackerError::invariant(
                format!("{field} would go negative: {self} - {other}"),
                None,
            )
        })
    }

    /// `self * factor / 10^decimals`, truncated.
    ///
    /// Used to take a mantissa-scaled fraction (e.g. the reserve factor) of an
    /// amount. Truncation matches the contract: no fractional token units.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the result exceeds 256 bits.
    pub fn mul_mantissa(self, factor: U256, scale: Mantissa) -> TrackerResult<Self> {
        mul_div(self.0, factor, scale.one())
            .map(Self)
            .ok_or_else(|| {
                TrackerError::invariant(
                    format!("{self} * {factor} / {} overflowed", scale.one()),
                    None,
                )
            })
    }
}

impl From<U256> for Amount {
    fn from(raw: U256) -> Self {
        Self(raw)
    }
}

impl From<u64> for Amount {
    fn from(raw: u64) -> Self {
        Self(U256::from(raw))
    }
}

impl From<u128> for Amount {
    fn from(raw: u128) -> Self {
        Self(U256::from(raw))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Underlying asset per share token, scaled by the mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeRate(U256);

impl ExchangeRate {
    /// Wrap an already-scaled mantissa (e.g. `exchangeRateStored()`).
    #[must_use]
    pub const fn from_mantissa(mantissa: U256) -> Self {
        Self(mantissa)
    }

    /// `(cash + borrows - reserves) * 10^decimals / supply`, truncated.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if `supply` is zero, if reserves exceed
    /// `cash + borrows`, or on overflow.
    pub fn compute(
        cash: Amount,
        borrows: Amount,
        reserves: Amount,
        supply: Amount,
        scale: Mantissa,
    ) -> TrackerResult<Self> {
        if supply.is_zero() {
            return Err(TrackerError::invariant(
                "total supply is zero, exchange rate undefined",
                None,
            ));
        }

        let gross = cash.checked_add(borrows, "cash + borrows")?;
        let net = gross.checked_sub(reserves, "cash + borrows - reserves")?;

        mul_div(net.raw(), scale.one(), supply.raw())
            .map(Self)
            .ok_or_else(|| TrackerError::invariant("exchange rate exceeds 256 bits", None))
    }

    /// The scaled integer value.
    #[must_use]
    pub const fn mantissa(&self) -> U256 {
        self.0
    }

    /// Render as a decimal number with `scale.decimals()` fractional digits.
    #[must_use]
    pub fn to_decimal_string(&self, scale: Mantissa) -> String {
        format_scaled(self.0, scale.decimals())
    }
}

impl fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render `value / 10^decimals` without going through floating point.
#[must_use]
pub fn format_scaled(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{digits}", "0".repeat(decimals - digits.len() + 1))
    } else {
        digits
    };
    let split = padded.len() - decimals;
    format!("{}.{}", &padded[..split], &padded[split..])
}

/// `x * y / z` with a 512-bit intermediate. `None` on zero divisor or if the
/// quotient does not fit in 256 bits.
fn mul_div(x: U256, y: U256, z: U256) -> Option<U256> {
    if z.is_zero() {
        return None;
    }
    let product = widen(x).checked_mul(widen(y))?;
    narrow(product / widen(z))
}

fn widen(value: U256) -> U512 {
    U512::from_limbs_slice(value.as_limbs())
}

fn narrow(value: U512) -> Option<U256> {
    let limbs = value.as_limbs();
    if limbs[4..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(U256::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3]]))
}
