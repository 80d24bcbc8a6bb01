use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{instrument, trace};

use crate::{sample, SampleError, SampleRange, SampleRequest};

/// A random number generator shared across requests.
///
/// Wraps an arbitrary [`rand::Rng`] in a [`Mutex`]; each [`SharedRng::sample`] call holds the
/// lock for the duration of one sampling run.
#[derive(Debug)]
pub struct SharedRng<T>(Mutex<T>);

impl<T: Rng> From<T> for SharedRng<T> {
    fn from(r: T) -> Self {
        Self(r.into())
    }
}

impl SharedRng<StdRng> {
    /// Seed a [`StdRng`] from operating system entropy
    ///
    /// # Errors
    ///
    /// Returns an error if the OS entropy source cannot be read
    pub fn from_os_rng() -> Result<Self, rand::rand_core::OsError> {
        StdRng::try_from_rng(&mut rand::rngs::OsRng).map(Self::from)
    }

    /// Seed a [`StdRng`] deterministically
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::from(StdRng::seed_from_u64(seed))
    }
}

impl<T> SharedRng<T> {
    fn lock(&self) -> Result<MutexGuard<'_, T>, SampleError> {
        self.0.lock().map_err(|_| SampleError::RngUnavailable)
    }
}

impl<T: Rng> SharedRng<T> {
    /// Sample `request.count()` distinct values from `range`
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::RangeExhausted`] if `range` is too small, or
    /// [`SampleError::RngUnavailable`] if the lock was poisoned
    #[instrument(level = "debug", skip(self))]
    pub fn sample(
        &self,
        request: SampleRequest,
        range: SampleRange,
    ) -> Result<Vec<i32>, SampleError> {
        let values = sample(request.count(), range, &mut *self.lock()?)?;
        trace!(?values, "generated distinct values");
        Ok(values)
    }
}
