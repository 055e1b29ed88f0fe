//! Error types for value arithmetic.
//!
//! Both enums follow the same policy: the operation that failed leaves
//! its target unchanged (except where a variant documents a saturated
//! result), and the error names the constraint that was violated so the
//! caller can log something actionable.

use thiserror::Error;

use crate::money::Money;

/// Errors from [`Money`](crate::Money) validation and addition.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum MoneyError {
    /// The currency code is not exactly three characters.
    #[error("currency_code must be 3 characters (got {0:?})")]
    InvalidCurrencyCode(String),

    /// `units` and `nanos` have opposing signs.
    #[error("signs of units ({units}) and nanos ({nanos}) must agree")]
    SignMismatch {
        /// The whole-unit component.
        units: i64,
        /// The fractional component.
        nanos: i32,
    },

    /// `nanos` is outside `[-999_999_999, 999_999_999]`.
    #[error("nanos must be within ±999_999_999 (got {0})")]
    NanosOutOfRange(i32),

    /// Two amounts in different currencies cannot be added.
    #[error("cannot add money in {left:?} to money in {right:?}")]
    CurrencyMismatch {
        /// Currency code of the left operand.
        left: String,
        /// Currency code of the right operand.
        right: String,
    },

    /// Addition overflowed the representable range.
    ///
    /// The carried value is the saturated result
    /// (`i64::MAX`/`999_999_999` or `i64::MIN`/`-999_999_999`), so a
    /// caller that prefers saturation over failure can still use it.
    #[error("money addition overflowed (positive: {positive})")]
    Overflow {
        /// Whether the overflow was in the positive direction.
        positive: bool,
        /// The saturated sum.
        saturated: Money,
    },
}

/// Errors from [`Distribution`](crate::Distribution) construction and
/// merging.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum DistributionError {
    /// `num_finite_buckets` must be positive.
    #[error("num_finite_buckets must be > 0 (got {0})")]
    NonPositiveBucketCount(i32),

    /// Exponential growth factor must exceed 1.0.
    #[error("growth_factor must be > 1.0 (got {0})")]
    GrowthFactorTooSmall(f64),

    /// Exponential scale must be positive.
    #[error("scale must be > 0 (got {0})")]
    NonPositiveScale(f64),

    /// Linear bucket width must be positive.
    #[error("width must be > 0 (got {0})")]
    NonPositiveWidth(f64),

    /// Explicit bounds must be strictly ascending (sorted, no
    /// duplicates).
    #[error("explicit bounds must be strictly ascending")]
    BoundsNotAscending,

    /// The two distributions use different bucket schemes and cannot be
    /// merged.
    #[error("bucket schemes do not match")]
    SchemeMismatch,

    /// The two distributions have different bucket-count lengths.
    #[error("bucket count lengths differ ({left} vs {right})")]
    BucketLengthMismatch {
        /// Bucket count length of the merge target.
        left: usize,
        /// Bucket count length of the merge source.
        right: usize,
    },
}
