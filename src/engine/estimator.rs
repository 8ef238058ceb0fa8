//! Error certificates from folded statistics.
//!
//! Two families:
//! - confidence intervals (`clt` on IID samples, `clt_rep` over randomized
//!   replications)
//! - a deterministic transform-bias bound from the decay of the Walsh or
//!   Fourier spectrum (`guaranteed`)
//!
//! Each certificate is computed from the accumulators alone, never from raw
//! values, so a certificate costs O(n) per doubling.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

use crate::config::{StoppingCriterionConfig, StoppingRule};
use crate::engine::accumulator::Accumulator;
use crate::error::{CubError, CubResult};

/// What the bound of a certificate means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateKind {
    /// Half-width of a confidence interval at level `1 - alpha`.
    ConfidenceInterval,
    /// Bound on the bias of a deterministic cubature.
    DeterministicBias,
}

/// Estimate with an error bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorCertificate {
    /// Point estimate.
    pub estimate: f64,
    /// Error bound on the estimate.
    pub bound: f64,
    /// Meaning of the bound.
    pub kind: CertificateKind,
    /// Samples behind the certificate.
    pub n: u64,
    /// Tolerance the bound is measured against.
    pub tolerance: f64,
    /// The spectrum did not decay across the lag window.
    pub decay_warning: bool,
}

impl ErrorCertificate {
    /// `(estimate - bound, estimate + bound)`.
    #[must_use]
    pub fn confidence_interval(&self) -> (f64, f64) {
        (self.estimate - self.bound, self.estimate + self.bound)
    }

    /// Check if value is within the certified interval.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        let (lo, hi) = self.confidence_interval();
        value >= lo && value <= hi
    }

    /// Whether the bound meets the tolerance.
    #[must_use]
    pub fn meets_tolerance(&self) -> bool {
        self.bound <= self.tolerance
    }
}

/// Certificate rule, fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorEstimator {
    /// `inflate * z * std / sqrt(n)` on IID samples.
    Clt {
        /// Inflated normal quantile `inflate * z(1 - alpha/2)`.
        scale: f64,
        /// Absolute tolerance.
        abs_tol: f64,
        /// Relative tolerance.
        rel_tol: f64,
    },
    /// `inflate * z * std(replicate means) / sqrt(R)`.
    CltRep {
        /// Inflated normal quantile.
        scale: f64,
        /// Absolute tolerance.
        abs_tol: f64,
        /// Relative tolerance.
        rel_tol: f64,
    },
    /// `fudge * 2^-m * S(m - r_lag)` with the optimal estimate shift.
    TransformBias {
        /// Bound multiplier.
        fudge: f64,
        /// Lag window.
        r_lag: u32,
        /// Absolute tolerance.
        abs_tol: f64,
        /// Relative tolerance.
        rel_tol: f64,
    },
}

impl ErrorEstimator {
    /// Estimator for a validated criterion.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the normal quantile cannot be formed.
    pub fn from_criterion(criterion: &StoppingCriterionConfig) -> CubResult<Self> {
        let abs_tol = criterion.abs_tol;
        let rel_tol = criterion.rel_tol;
        Ok(match criterion.rule {
            StoppingRule::Clt => Self::Clt {
                scale: criterion.inflate * normal_quantile(criterion.alpha)?,
                abs_tol,
                rel_tol,
            },
            StoppingRule::CltRep => Self::CltRep {
                scale: criterion.inflate * normal_quantile(criterion.alpha)?,
                abs_tol,
                rel_tol,
            },
            StoppingRule::Guaranteed => Self::TransformBias {
                fudge: criterion.fudge,
                r_lag: criterion.r_lag,
                abs_tol,
                rel_tol,
            },
        })
    }

    /// Certificate from the current accumulators (one per replication).
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if no accumulator is given, or the
    /// transform-bias rule finds no spectrum or too few levels.
    pub fn certify(&self, accumulators: &[Accumulator]) -> CubResult<ErrorCertificate> {
        let first = accumulators
            .first()
            .ok_or_else(|| CubError::invalid("no accumulator to certify"))?;

        match *self {
            Self::Clt {
                scale,
                abs_tol,
                rel_tol,
            } => {
                let stats = first.statistics();
                let n = stats.count();
                let bound = if n < 2 {
                    f64::INFINITY
                } else {
                    scale * (stats.variance() / n as f64).sqrt()
                };
                let estimate = stats.mean();
                Ok(ErrorCertificate {
                    estimate,
                    bound,
                    kind: CertificateKind::ConfidenceInterval,
                    n,
                    tolerance: tolerance_at(estimate, abs_tol, rel_tol),
                    decay_warning: false,
                })
            }
            Self::CltRep {
                scale,
                abs_tol,
                rel_tol,
            } => {
                let means: Vec<f64> = accumulators.iter().map(|a| a.statistics().mean()).collect();
                let r = means.len() as f64;
                let estimate = means.iter().sum::<f64>() / r;
                let bound = if means.len() < 2 {
                    f64::INFINITY
                } else {
                    let var = means.iter().map(|m| (m - estimate).powi(2)).sum::<f64>() / (r - 1.0);
                    scale * (var / r).sqrt()
                };
                Ok(ErrorCertificate {
                    estimate,
                    bound,
                    kind: CertificateKind::ConfidenceInterval,
                    n: accumulators.iter().map(|a| a.statistics().count()).sum(),
                    tolerance: tolerance_at(estimate, abs_tol, rel_tol),
                    decay_warning: false,
                })
            }
            Self::TransformBias {
                fudge,
                r_lag,
                abs_tol,
                rel_tol,
            } => transform_bias(first, fudge, r_lag, abs_tol, rel_tol),
        }
    }
}

/// `max(abs_tol, rel_tol * |value|)`.
fn tolerance_at(value: f64, abs_tol: f64, rel_tol: f64) -> f64 {
    abs_tol.max(rel_tol * value.abs())
}

/// `z(1 - alpha/2)` of the standard normal.
fn normal_quantile(alpha: f64) -> CubResult<f64> {
    let standard = Normal::new(0.0, 1.0).map_err(|e| CubError::invalid(e.to_string()))?;
    Ok(standard.inverse_cdf(1.0 - alpha / 2.0))
}

fn transform_bias(
    acc: &Accumulator,
    fudge: f64,
    r_lag: u32,
    abs_tol: f64,
    rel_tol: f64,
) -> CubResult<ErrorCertificate> {
    let spectrum = acc
        .spectrum()
        .ok_or_else(|| CubError::invalid("transform-bias rule needs a spectral accumulator"))?;
    let m = spectrum.log2_len();
    if m <= r_lag {
        return Err(CubError::invalid(format!(
            "transform-bias rule needs more than 2^{r_lag} points, have 2^{m}"
        )));
    }

    let stilde = spectrum.level_sum(m - r_lag);
    let bound = fudge * (-f64::from(m)).exp2() * stilde;
    let mu = spectrum.mean();

    let levels = acc.statistics().level_sums();
    let lowest = (m - r_lag) as usize;
    let decay_warning = levels[lowest..m as usize]
        .windows(2)
        .any(|w| w[1] > w[0]);
    if decay_warning {
        warn!(
            n = spectrum.len(),
            "transform coefficients are not decaying; the integrand may be too rough for the bias bound"
        );
    }

    // Shift the estimate toward the side with the looser tolerance.
    let upper = tolerance_at(mu + bound, abs_tol, rel_tol);
    let lower = tolerance_at(mu - bound, abs_tol, rel_tol);
    let estimate = if upper + lower > 0.0 {
        mu - bound * (upper - lower) / (upper + lower)
    } else {
        mu
    };

    Ok(ErrorCertificate {
        estimate,
        bound,
        kind: CertificateKind::DeterministicBias,
        n: acc.statistics().count(),
        tolerance: 0.5 * (upper + lower),
        decay_warning,
    })
}
