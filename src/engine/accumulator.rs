//! Running statistics folded across doublings.
//!
//! The accumulator never sees a value twice: each evaluated batch is folded
//! once into counts, sums and (for transform-bias estimation) the spectrum.
//! Batches must arrive contiguously and under a single randomization.

use serde::{Deserialize, Serialize};

use crate::engine::spectral::{SpectralBasis, Spectrum};
use crate::error::{CubError, CubResult};
use crate::integrand::EvaluatedBatch;

/// Folded statistics of one run (or one replication).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStatistics {
    count: u64,
    sum: f64,
    sum_of_squares: f64,
    /// Sum of squared deviations, merged batch-wise (Chan et al.).
    m2: f64,
    level_sums: Vec<f64>,
}

impl RunningStatistics {
    /// Number of values folded.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Sum of values.
    #[must_use]
    pub const fn sum(&self) -> f64 {
        self.sum
    }

    /// Sum of squared values.
    #[must_use]
    pub const fn sum_of_squares(&self) -> f64 {
        self.sum_of_squares
    }

    /// Spectral magnitude per dyadic level, empty without a spectrum.
    #[must_use]
    pub fn level_sums(&self) -> &[f64] {
        &self.level_sums
    }

    /// Sample mean, 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Unbiased sample variance, 0 with fewer than two values.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).max(0.0)
        }
    }

    fn fold_values(&mut self, values: &[f64]) {
        if values.is_empty() {
            return;
        }
        let nb = values.len() as f64;
        let sum_b: f64 = values.iter().sum();
        let mean_b = sum_b / nb;
        let m2_b: f64 = values.iter().map(|v| (v - mean_b).powi(2)).sum();

        let na = self.count as f64;
        let delta = mean_b - self.mean();
        let n = na + nb;

        self.m2 += m2_b + delta * delta * na * nb / n;
        self.sum += sum_b;
        self.sum_of_squares += values.iter().map(|v| v * v).sum::<f64>();
        self.count += values.len() as u64;
    }
}

/// Folds evaluated batches into [`RunningStatistics`].
#[derive(Debug, Clone)]
pub struct Accumulator {
    stats: RunningStatistics,
    spectrum: Option<Spectrum>,
    fingerprint: Option<u64>,
    r_lag: u32,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    /// Accumulator for moment statistics only.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stats: RunningStatistics {
                count: 0,
                sum: 0.0,
                sum_of_squares: 0.0,
                m2: 0.0,
                level_sums: Vec::new(),
            },
            spectrum: None,
            fingerprint: None,
            r_lag: 0,
        }
    }

    /// Accumulator that also folds a fast transform of the values.
    #[must_use]
    pub fn with_spectrum(basis: SpectralBasis, r_lag: u32) -> Self {
        Self {
            spectrum: Some(Spectrum::new(basis)),
            r_lag,
            ..Self::new()
        }
    }

    /// Return to the virgin state, keeping the spectral basis.
    pub fn reset(&mut self) {
        self.stats = RunningStatistics::default();
        self.fingerprint = None;
        if let Some(spectrum) = &mut self.spectrum {
            *spectrum = Spectrum::new(spectrum.basis());
        }
    }

    /// Folded statistics.
    #[must_use]
    pub const fn statistics(&self) -> &RunningStatistics {
        &self.stats
    }

    /// Folded spectrum, if this accumulator keeps one.
    #[must_use]
    pub const fn spectrum(&self) -> Option<&Spectrum> {
        self.spectrum.as_ref()
    }

    /// Fold one evaluated batch.
    ///
    /// # Errors
    ///
    /// - `SequenceStateMismatch` if the batch comes from another
    ///   randomization or does not start where the last one ended
    /// - `NonFiniteIntegrandValue` on the first NaN or infinite value; the
    ///   statistics are left untouched and attached to the error
    /// - `InvalidParameter` if the spectral fold rejects the batch size
    pub fn fold(&mut self, batch: &EvaluatedBatch) -> CubResult<()> {
        if let Some(expected) = self.fingerprint {
            if expected != batch.fingerprint {
                return Err(CubError::SequenceStateMismatch {
                    expected,
                    found: batch.fingerprint,
                });
            }
        }
        if batch.start != self.stats.count {
            return Err(CubError::SequenceStateMismatch {
                expected: self.stats.count,
                found: batch.start,
            });
        }
        if let Some((i, &value)) = batch
            .values
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(CubError::NonFiniteIntegrandValue {
                index: batch.start + i as u64,
                value,
                partial: Box::new(self.stats.clone()),
            });
        }

        if let Some(spectrum) = &mut self.spectrum {
            spectrum.extend(&batch.values, self.r_lag)?;
            self.stats.level_sums = spectrum.level_sums();
        }
        self.stats.fold_values(&batch.values);
        self.fingerprint = Some(batch.fingerprint);
        Ok(())
    }
}
