//! Currency amounts and saturating addition.
//!
//! An amount is a currency code plus a whole-unit count and a
//! nanos fraction, the two sharing a sign. Addition carries across the
//! billion boundary and saturates at the `i64` range instead of
//! wrapping, because a metering pipeline would rather over-report a
//! clamped maximum than silently flip sign.

use serde::{Deserialize, Serialize};

use crate::error::MoneyError;

/// Largest magnitude the `nanos` field may hold.
pub const MAX_NANOS: i32 = 999_999_999;

/// Number of nanos in one whole unit.
pub const NANOS_PER_UNIT: i64 = 1_000_000_000;

/// A monetary amount: `units + nanos / 1e9` in `currency_code`.
///
/// `units` and `nanos` must agree in sign; `|nanos|` never exceeds
/// [`MAX_NANOS`]. Use [`Money::validate`] to check amounts received
/// from the outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Three-letter currency code (ISO 4217 style).
    pub currency_code: String,
    /// Whole units of the amount.
    pub units: i64,
    /// Nano units of the amount, same sign as `units`.
    pub nanos: i32,
}

impl Money {
    /// Creates an amount without validating it.
    pub fn new(currency_code: impl Into<String>, units: i64, nanos: i32) -> Self {
        Self { currency_code: currency_code.into(), units, nanos }
    }

    /// Checks the structural invariants of the amount.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError`] if the currency code is not three
    /// characters, the signs of `units` and `nanos` disagree, or
    /// `nanos` exceeds ±[`MAX_NANOS`].
    pub fn validate(&self) -> Result<(), MoneyError> {
        if self.currency_code.chars().count() != 3 {
            return Err(MoneyError::InvalidCurrencyCode(self.currency_code.clone()));
        }
        if (self.units > 0 && self.nanos < 0) || (self.units < 0 && self.nanos > 0) {
            return Err(MoneyError::SignMismatch { units: self.units, nanos: self.nanos });
        }
        if self.nanos < -MAX_NANOS || self.nanos > MAX_NANOS {
            return Err(MoneyError::NanosOutOfRange(self.nanos));
        }
        Ok(())
    }

    /// Returns the sign of the amount: `-1`, `0`, or `1`.
    #[must_use]
    pub fn sign(&self) -> i32 {
        if self.units > 0 {
            1
        } else if self.units < 0 {
            -1
        } else if self.nanos > 0 {
            1
        } else if self.nanos < 0 {
            -1
        } else {
            0
        }
    }

    /// The largest representable amount in the given currency.
    #[must_use]
    pub fn saturated_max(currency_code: &str) -> Self {
        Self { currency_code: currency_code.to_owned(), units: i64::MAX, nanos: MAX_NANOS }
    }

    /// The smallest representable amount in the given currency.
    #[must_use]
    pub fn saturated_min(currency_code: &str) -> Self {
        Self { currency_code: currency_code.to_owned(), units: i64::MIN, nanos: -MAX_NANOS }
    }
}

/// Total nano count of the largest representable amount.
const MAX_TOTAL_NANOS: i128 = i64::MAX as i128 * NANOS_PER_UNIT as i128 + MAX_NANOS as i128;

/// Total nano count of the smallest representable amount.
const MIN_TOTAL_NANOS: i128 = i64::MIN as i128 * NANOS_PER_UNIT as i128 - MAX_NANOS as i128;

/// Adds two amounts in the same currency.
///
/// The sum is computed over total nano counts, so nanos carry across
/// the billion boundary and the result's `units`/`nanos` always agree
/// in sign.
///
/// # Errors
///
/// - [`MoneyError::CurrencyMismatch`] when the currency codes differ.
/// - [`MoneyError::Overflow`] when the sum leaves the representable
///   range; the error carries the saturated result.
pub fn try_add(a: &Money, b: &Money) -> Result<Money, MoneyError> {
    if a.currency_code != b.currency_code {
        return Err(MoneyError::CurrencyMismatch {
            left: a.currency_code.clone(),
            right: b.currency_code.clone(),
        });
    }

    let total = |m: &Money| {
        i128::from(m.units) * i128::from(NANOS_PER_UNIT) + i128::from(m.nanos)
    };
    let sum = total(a) + total(b);

    if sum > MAX_TOTAL_NANOS {
        return Err(MoneyError::Overflow {
            positive: true,
            saturated: Money::saturated_max(&a.currency_code),
        });
    }
    if sum < MIN_TOTAL_NANOS {
        return Err(MoneyError::Overflow {
            positive: false,
            saturated: Money::saturated_min(&a.currency_code),
        });
    }

    // Truncating division keeps the quotient and remainder on the same
    // side of zero, which is exactly the sign agreement Money requires.
    let units = (sum / i128::from(NANOS_PER_UNIT)) as i64;
    let nanos = (sum % i128::from(NANOS_PER_UNIT)) as i32;
    Ok(Money { currency_code: a.currency_code.clone(), units, nanos })
}

/// Adds two amounts in the same currency, clamping on overflow.
///
/// Overflow is not an error here: the result is pinned to the
/// representable extreme in the direction of the overflow.
///
/// # Errors
///
/// Returns [`MoneyError::CurrencyMismatch`] when the currency codes
/// differ; mismatched currencies never produce a value.
pub fn saturating_add(a: &Money, b: &Money) -> Result<Money, MoneyError> {
    match try_add(a, b) {
        Ok(sum) => Ok(sum),
        Err(MoneyError::Overflow { saturated, .. }) => Ok(saturated),
        Err(other) => Err(other),
    }
}
