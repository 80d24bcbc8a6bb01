//! Distinct random integer sampling.
//!
//! [`sample`] draws `count` unique integers uniformly from an inclusive
//! [`SampleRange`], using whatever [`rand::Rng`] the caller hands it. Requests
//! are validated up front: [`SampleRequest`] enforces the accepted count
//! ceiling, and [`sample`] refuses to start when the range cannot supply
//! enough distinct values.

use core::fmt;

use std::collections::HashSet;

use rand::Rng;
use serde::Serialize;
use tracing::{instrument, trace};

mod rng;
pub use rng::SharedRng;

/// Count used when a request does not carry one
pub const DEFAULT_COUNT: u32 = 8;

/// Largest count accepted by [`SampleRequest`]
pub const MAX_COUNT: u32 = 100;

/// Lower bound of the range served over HTTP
pub const RANGE_MIN: i32 = 1;

/// Upper bound of the range served over HTTP
pub const RANGE_MAX: i32 = 99;

/// Errors produced while validating or running a sample
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("Count must be between 0 and {}.", MAX_COUNT)]
    InvalidCount { count: i64 },

    #[error(
        "cannot draw {count} distinct values from [{min}, {max}]: only {available} available"
    )]
    RangeExhausted {
        count: u32,
        min: i32,
        max: i32,
        available: u64,
    },

    #[error("invalid range: min {min} is greater than max {max}")]
    InvalidRange { min: i32, max: i32 },

    #[error("random number generator not available")]
    RngUnavailable,
}

/// A validated request for `count` distinct values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleRequest {
    count: u32,
}

impl SampleRequest {
    /// Validate `count` against `0..=MAX_COUNT`
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::InvalidCount`] if `count` is negative or above [`MAX_COUNT`]
    pub fn new(count: i64) -> Result<Self, SampleError> {
        match u32::try_from(count) {
            Ok(count) if count <= MAX_COUNT => Ok(Self { count }),
            _ => Err(SampleError::InvalidCount { count }),
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for SampleRequest {
    fn default() -> Self {
        Self {
            count: DEFAULT_COUNT,
        }
    }
}

/// Inclusive integer range `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleRange {
    min: i32,
    max: i32,
}

impl SampleRange {
    /// # Errors
    ///
    /// Returns [`SampleError::InvalidRange`] if `min > max`
    pub fn new(min: i32, max: i32) -> Result<Self, SampleError> {
        if min > max {
            return Err(SampleError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    #[must_use]
    pub fn min(&self) -> i32 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> i32 {
        self.max
    }

    /// Number of distinct values in the range
    #[must_use]
    pub fn len(&self) -> u64 {
        // min <= max, so the difference fits in u64 without wrapping
        (i64::from(self.max) - i64::from(self.min)) as u64 + 1
    }

    /// Always false, a range holds at least one value
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[must_use]
    pub fn contains(&self, v: i32) -> bool {
        (self.min..=self.max).contains(&v)
    }
}

impl Default for SampleRange {
    fn default() -> Self {
        Self {
            min: RANGE_MIN,
            max: RANGE_MAX,
        }
    }
}

impl fmt::Display for SampleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Draw `count` distinct values uniformly from `range`.
///
/// Values are returned in the order they were first drawn.
///
/// # Errors
///
/// Returns [`SampleError::RangeExhausted`] without drawing anything if `range`
/// holds fewer than `count` values.
#[instrument(level = "trace", skip(rng))]
pub fn sample<R>(count: u32, range: SampleRange, rng: &mut R) -> Result<Vec<i32>, SampleError>
where
    R: Rng + ?Sized,
{
    let available = range.len();
    if u64::from(count) > available {
        return Err(SampleError::RangeExhausted {
            count,
            min: range.min,
            max: range.max,
            available,
        });
    }
    let count = count as usize;
    let mut seen = HashSet::with_capacity(count);
    let mut values = Vec::with_capacity(count);
    let mut draws = 0_u64;
    while values.len() < count {
        let v = rng.random_range(range.min..=range.max);
        draws += 1;
        if seen.insert(v) {
            values.push(v);
        }
    }
    trace!(count, draws, "sampled distinct values");
    Ok(values)
}
