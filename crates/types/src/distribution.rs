//! Bucketed distribution values.
//!
//! A [`Distribution`] summarizes a stream of samples: overall count,
//! mean, extremes, sum of squared deviations, and per-bucket counts for
//! one of three bucket schemes (exponential, linear, explicit bounds).
//! Two distributions with approximately-equal schemes can be merged
//! without access to the original samples, which is what lets the
//! aggregation engine coalesce many reports into one.
//!
//! Statistics are maintained with Welford's online algorithm on insert
//! and the parallel-variance formula on merge, keeping intermediate
//! values small to limit round-off error.

use serde::{Deserialize, Serialize};

use crate::error::DistributionError;

/// Relative tolerance used when comparing bucket scheme parameters.
const SCHEME_TOLERANCE: f64 = 1e-5;

/// The bucketing layout of a [`Distribution`].
///
/// Every scheme with `n` finite buckets materializes `n + 2` counters:
/// index 0 is the underflow bucket and index `n + 1` the overflow
/// bucket. An explicit scheme with `k` bounds has `k + 1` counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BucketScheme {
    /// Buckets with exponentially growing widths: bucket `i` (1-based)
    /// covers `[scale * growth_factor^(i-1), scale * growth_factor^i)`.
    Exponential {
        /// Number of finite buckets.
        num_finite_buckets: i32,
        /// Ratio between successive bucket widths, > 1.0.
        growth_factor: f64,
        /// Lower bound of the first finite bucket, > 0.
        scale: f64,
    },
    /// Equal-width buckets: bucket `i` (1-based) covers
    /// `[offset + (i-1) * width, offset + i * width)`.
    Linear {
        /// Number of finite buckets.
        num_finite_buckets: i32,
        /// Width of each finite bucket, > 0.
        width: f64,
        /// Lower bound of the first finite bucket.
        offset: f64,
    },
    /// Buckets delimited by an explicit, strictly ascending bound list.
    Explicit {
        /// Bucket boundaries; bucket `i` covers `[bounds[i-1], bounds[i])`.
        bounds: Vec<f64>,
    },
}

impl BucketScheme {
    /// Number of bucket counters this scheme requires.
    fn bucket_len(&self) -> usize {
        match self {
            Self::Exponential { num_finite_buckets, .. }
            | Self::Linear { num_finite_buckets, .. } => *num_finite_buckets as usize + 2,
            Self::Explicit { bounds } => bounds.len() + 1,
        }
    }

    /// Whether two schemes are equal up to [`SCHEME_TOLERANCE`].
    fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Exponential { num_finite_buckets: n1, growth_factor: g1, scale: s1 },
                Self::Exponential { num_finite_buckets: n2, growth_factor: g2, scale: s2 },
            ) => n1 == n2 && close_enough(*g1, *g2) && close_enough(*s1, *s2),
            (
                Self::Linear { num_finite_buckets: n1, width: w1, offset: o1 },
                Self::Linear { num_finite_buckets: n2, width: w2, offset: o2 },
            ) => n1 == n2 && close_enough(*w1, *w2) && close_enough(*o1, *o2),
            (Self::Explicit { bounds: b1 }, Self::Explicit { bounds: b2 }) => {
                b1.len() == b2.len()
                    && b1.iter().zip(b2.iter()).all(|(x, y)| close_enough(*x, *y))
            },
            _ => false,
        }
    }
}

/// Relative comparison with [`SCHEME_TOLERANCE`], anchored on `x`.
fn close_enough(x: f64, y: f64) -> bool {
    (x - y).abs() <= SCHEME_TOLERANCE * x.abs()
}

/// A bucketed summary of a sample stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// The bucketing layout.
    pub buckets: BucketScheme,
    /// Per-bucket sample counts, including underflow and overflow.
    pub bucket_counts: Vec<i64>,
    /// Total number of samples.
    pub count: i64,
    /// Arithmetic mean of all samples; 0 when empty.
    pub mean: f64,
    /// Smallest sample; 0 when empty.
    pub minimum: f64,
    /// Largest sample; 0 when empty.
    pub maximum: f64,
    /// Sum of squared deviations from the mean.
    pub sum_of_squared_deviation: f64,
}

impl Distribution {
    /// Creates an empty distribution with exponential buckets.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError`] when `num_finite_buckets <= 0`,
    /// `growth_factor <= 1.0`, or `scale <= 0`.
    pub fn exponential(
        num_finite_buckets: i32,
        growth_factor: f64,
        scale: f64,
    ) -> Result<Self, DistributionError> {
        if num_finite_buckets <= 0 {
            return Err(DistributionError::NonPositiveBucketCount(num_finite_buckets));
        }
        if growth_factor <= 1.0 {
            return Err(DistributionError::GrowthFactorTooSmall(growth_factor));
        }
        if scale <= 0.0 {
            return Err(DistributionError::NonPositiveScale(scale));
        }
        Ok(Self::empty(BucketScheme::Exponential { num_finite_buckets, growth_factor, scale }))
    }

    /// Creates an empty distribution with linear buckets.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError`] when `num_finite_buckets <= 0` or
    /// `width <= 0`.
    pub fn linear(
        num_finite_buckets: i32,
        width: f64,
        offset: f64,
    ) -> Result<Self, DistributionError> {
        if num_finite_buckets <= 0 {
            return Err(DistributionError::NonPositiveBucketCount(num_finite_buckets));
        }
        if width <= 0.0 {
            return Err(DistributionError::NonPositiveWidth(width));
        }
        Ok(Self::empty(BucketScheme::Linear { num_finite_buckets, width, offset }))
    }

    /// Creates an empty distribution with explicit bucket bounds.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::BoundsNotAscending`] unless the
    /// bounds are sorted with no duplicates.
    pub fn explicit(bounds: Vec<f64>) -> Result<Self, DistributionError> {
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DistributionError::BoundsNotAscending);
        }
        Ok(Self::empty(BucketScheme::Explicit { bounds }))
    }

    fn empty(buckets: BucketScheme) -> Self {
        let len = buckets.bucket_len();
        Self {
            buckets,
            bucket_counts: vec![0; len],
            count: 0,
            mean: 0.0,
            minimum: 0.0,
            maximum: 0.0,
            sum_of_squared_deviation: 0.0,
        }
    }

    /// Records one sample.
    ///
    /// Updates count, mean, extremes, and the sum of squared deviations
    /// with Welford's online recurrence, then increments the containing
    /// bucket (underflow below the first bound, overflow at or above
    /// the last).
    pub fn add_sample(&mut self, value: f64) {
        if self.count == 0 {
            self.count = 1;
            self.minimum = value;
            self.maximum = value;
            self.mean = value;
            self.sum_of_squared_deviation = 0.0;
        } else {
            let count = self.count;
            let mean = self.mean;
            let new_mean = ((count as f64) * mean + value) / ((count + 1) as f64);
            self.sum_of_squared_deviation += (value - mean) * (value - new_mean);
            self.count = count + 1;
            self.minimum = self.minimum.min(value);
            self.maximum = self.maximum.max(value);
            self.mean = new_mean;
        }

        let index = self.bucket_index(value);
        self.bucket_counts[index] += 1;
    }

    /// Index of the bucket containing `value` under this scheme.
    fn bucket_index(&self, value: f64) -> usize {
        match &self.buckets {
            BucketScheme::Exponential { num_finite_buckets, growth_factor, scale } => {
                if value < *scale || value.is_nan() {
                    0
                } else {
                    let raw = 1 + ((value / scale).log2() / growth_factor.log2()) as i64;
                    raw.min(i64::from(*num_finite_buckets) + 1).max(0) as usize
                }
            },
            BucketScheme::Linear { num_finite_buckets, width, offset } => {
                let upper = offset + f64::from(*num_finite_buckets) * width;
                if value < *offset || value.is_nan() {
                    0
                } else if value >= upper {
                    *num_finite_buckets as usize + 1
                } else {
                    1 + ((value - offset) / width) as usize
                }
            },
            BucketScheme::Explicit { bounds } => {
                if bounds.is_empty() || value < bounds[0] || value.is_nan() {
                    0
                } else {
                    // Count of bounds <= value, i.e. the partition point
                    // of the first bound strictly greater.
                    bounds.partition_point(|b| *b <= value)
                }
            },
        }
    }

    /// Merges another distribution into this one.
    ///
    /// Requires approximately-equal bucket schemes (relative tolerance
    /// `1e-5` per parameter) and identical bucket-count lengths; on a
    /// mismatch `self` is left unchanged. Merging an empty source is a
    /// no-op; merging into an empty target copies the source. Otherwise
    /// counts and buckets add, extremes widen, the mean is the
    /// count-weighted average, and the sums of squared deviations
    /// combine by the parallel-variance formula.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::SchemeMismatch`] or
    /// [`DistributionError::BucketLengthMismatch`]; `self` is unchanged
    /// in both cases.
    pub fn merge_from(&mut self, other: &Distribution) -> Result<(), DistributionError> {
        if !self.buckets.approx_eq(&other.buckets) {
            return Err(DistributionError::SchemeMismatch);
        }
        if self.bucket_counts.len() != other.bucket_counts.len() {
            return Err(DistributionError::BucketLengthMismatch {
                left: self.bucket_counts.len(),
                right: other.bucket_counts.len(),
            });
        }

        if other.count <= 0 {
            return Ok(());
        }
        if self.count <= 0 {
            *self = other.clone();
            return Ok(());
        }

        let count = self.count as f64;
        let mean = self.mean;
        let other_count = other.count as f64;

        self.count += other.count;
        self.minimum = self.minimum.min(other.minimum);
        self.maximum = self.maximum.max(other.maximum);
        self.mean = (count * mean + other_count * other.mean) / (self.count as f64);
        self.sum_of_squared_deviation += other.sum_of_squared_deviation
            + count * (self.mean - mean) * (self.mean - mean)
            + other_count * (self.mean - other.mean) * (self.mean - other.mean);

        for (target, source) in self.bucket_counts.iter_mut().zip(&other.bucket_counts) {
            *target += source;
        }
        Ok(())
    }
}
