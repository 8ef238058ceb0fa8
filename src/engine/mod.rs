//! Adaptive cubature engine.
//!
//! Implements the doubling control loop with:
//! - Deterministic RNG (PCG with partitioned seeds)
//! - Incremental point generation (only the new half is ever generated)
//! - Accumulators that fold each batch exactly once
//! - Error certificates recomputed from folded state after every doubling
//!
//! # State Machine
//!
//! ```text
//! Init ──first batch──▶ Sampling ──bound ≤ tol──▶ Converged
//!                         │  ▲
//!                  double │  │ bound > tol, 2n within budget
//!                         ▼  │
//!                       Sampling ──2n over budget──▶ Exhausted
//!
//! any error other than exhaustion ──▶ Aborted
//! ```

pub mod accumulator;
pub mod estimator;
pub mod rng;
pub mod spectral;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use accumulator::{Accumulator, RunningStatistics};
pub use estimator::{CertificateKind, ErrorCertificate, ErrorEstimator};
pub use rng::CubRng;
pub use spectral::{SpectralBasis, Spectrum};

use crate::config::{RunConfig, StoppingCriterionConfig, StoppingRule};
use crate::error::{CubError, CubResult};
use crate::integrand::{Evaluator, Integrand};
use crate::sequence::{Backend, SequenceGenerator};
use crate::transform::MeasureTransform;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Nothing sampled yet.
    Init,
    /// At least one certificate computed, tolerance not yet met.
    Sampling,
    /// Tolerance met (terminal).
    Converged,
    /// Budget ran out first (terminal).
    Exhausted,
    /// Run ended on an error before either verdict (terminal).
    Aborted,
}

impl ControllerState {
    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted | Self::Aborted)
    }
}

/// Final record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    /// Estimated value.
    pub estimate: f64,
    /// Integrand evaluations across all replications.
    pub n_total: u64,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Certificate of the final doubling.
    pub certificate: ErrorCertificate,
    /// Certificate of every doubling, oldest first.
    pub history: Vec<ErrorCertificate>,
    /// Master seed, replayable through `RunConfig::seed`.
    pub seed: u64,
    /// Generator family.
    pub backend: Backend,
    /// Stopping rule.
    pub stopping: StoppingRule,
    /// Whether the tolerance was met.
    pub converged: bool,
}

impl Solution {
    /// Certified error bound of the estimate.
    #[must_use]
    pub const fn bound(&self) -> f64 {
        self.certificate.bound
    }

    /// Number of doublings after the initial batch.
    #[must_use]
    pub fn doublings(&self) -> usize {
        self.history.len().saturating_sub(1)
    }
}

/// Stopping-criterion controller for one configuration.
///
/// # Example
///
/// ```rust
/// use qmc_cubature::prelude::*;
///
/// let config = RunConfig::builder(2).seed(7).abs_tol(1e-3).build();
/// let mut integrator = Integrator::new(&config).unwrap();
/// let solution = integrator
///     .integrate(&Linear, &StdUniform::new(2))
///     .unwrap();
/// assert!((solution.estimate - 1.0).abs() < 1e-3);
/// ```
#[derive(Debug, Clone)]
pub struct Integrator {
    config: RunConfig,
    criterion: StoppingCriterionConfig,
    state: ControllerState,
}

impl Integrator {
    /// Validate the configuration and build a controller.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` (or `Validation`) before any sampling if
    /// the configuration is malformed.
    pub fn new(config: &RunConfig) -> CubResult<Self> {
        let criterion = config.criterion()?;
        Ok(Self {
            config: config.clone(),
            criterion,
            state: ControllerState::Init,
        })
    }

    /// Validated criterion in effect.
    #[must_use]
    pub const fn criterion(&self) -> &StoppingCriterionConfig {
        &self.criterion
    }

    /// Run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// State after the most recent run.
    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    fn accumulator(&self) -> Accumulator {
        match (self.criterion.rule, self.config.backend) {
            (StoppingRule::Guaranteed, Backend::Sobol) => {
                Accumulator::with_spectrum(SpectralBasis::Walsh, self.criterion.r_lag)
            }
            (StoppingRule::Guaranteed, _) => {
                Accumulator::with_spectrum(SpectralBasis::Fourier, self.criterion.r_lag)
            }
            _ => Accumulator::new(),
        }
    }

    /// Integrate `integrand` under `measure` until the tolerance is met or
    /// the budget runs out.
    ///
    /// Every call is an independent run with fresh generators and
    /// accumulators.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the measure dimension differs from the run's
    /// - `IntegrandShape` / `NonFiniteIntegrandValue` from evaluation
    /// - `ToleranceNotAchieved` with the best-so-far [`Solution`] when the
    ///   next doubling would exceed `n_max`
    ///
    /// Any error other than `ToleranceNotAchieved` leaves the controller in
    /// [`ControllerState::Aborted`].
    pub fn integrate<I>(&mut self, integrand: &I, measure: &dyn MeasureTransform) -> CubResult<Solution>
    where
        I: Integrand + ?Sized,
    {
        let outcome = self.run(integrand, measure);
        if outcome.is_err() && !self.state.is_terminal() {
            self.state = ControllerState::Aborted;
        }
        outcome
    }

    fn run<I>(&mut self, integrand: &I, measure: &dyn MeasureTransform) -> CubResult<Solution>
    where
        I: Integrand + ?Sized,
    {
        self.state = ControllerState::Init;
        let dimension = self.config.dimension;
        if measure.dimension() != dimension {
            return Err(CubError::invalid(format!(
                "measure has dimension {}, run has dimension {dimension}",
                measure.dimension()
            )));
        }

        let started = Instant::now();

        let mut rng = self
            .config
            .seed
            .map_or_else(CubRng::from_entropy, CubRng::new);
        let seed = rng.master_seed();
        let streams = match self.criterion.rule {
            StoppingRule::CltRep => rng.partition(self.criterion.replications),
            StoppingRule::Clt | StoppingRule::Guaranteed => vec![rng],
        };

        let mut generators = streams
            .iter()
            .map(|stream| {
                SequenceGenerator::new(self.config.backend, dimension, self.config.scramble, stream)
            })
            .collect::<CubResult<Vec<_>>>()?;
        let mut accumulators: Vec<Accumulator> =
            generators.iter().map(|_| self.accumulator()).collect();

        let estimator = ErrorEstimator::from_criterion(&self.criterion)?;
        let evaluator = Evaluator::new(integrand, measure, self.config.periodization);
        let per_point = self.criterion.samples_per_point();

        debug!(
            seed,
            backend = %self.config.backend,
            rule = %self.criterion.rule,
            n_init = self.criterion.n_init,
            n_max = self.criterion.n_max,
            "starting cubature"
        );

        let mut history = Vec::new();
        let mut n = 0u64;
        let mut next = self.criterion.n_init;

        loop {
            for (generator, accumulator) in generators.iter_mut().zip(&mut accumulators) {
                let batch = generator.generate(n, next)?;
                let values = evaluator.evaluate(&batch)?;
                accumulator.fold(&values)?;
            }
            n = next;
            self.state = ControllerState::Sampling;

            let certificate = estimator.certify(&accumulators)?;
            history.push(certificate);
            debug!(
                n = certificate.n,
                estimate = certificate.estimate,
                bound = certificate.bound,
                tolerance = certificate.tolerance,
                "doubling step"
            );

            let doubled = n.checked_mul(2).filter(|d| d.saturating_mul(per_point) <= self.criterion.n_max);

            if certificate.meets_tolerance() || doubled.is_none() {
                let converged = certificate.meets_tolerance();
                let solution = Solution {
                    estimate: certificate.estimate,
                    n_total: n * per_point,
                    elapsed: started.elapsed(),
                    certificate,
                    history,
                    seed,
                    backend: self.config.backend,
                    stopping: self.criterion.rule,
                    converged,
                };

                if converged {
                    self.state = ControllerState::Converged;
                    info!(
                        estimate = solution.estimate,
                        bound = solution.bound(),
                        n_total = solution.n_total,
                        "cubature converged"
                    );
                    return Ok(solution);
                }

                self.state = ControllerState::Exhausted;
                warn!(
                    estimate = solution.estimate,
                    bound = solution.bound(),
                    tolerance = certificate.tolerance,
                    n_max = self.criterion.n_max,
                    "sample budget exhausted before tolerance was met"
                );
                return Err(CubError::ToleranceNotAchieved {
                    n_max: self.criterion.n_max,
                    tolerance: certificate.tolerance,
                    bound: certificate.bound,
                    solution: Box::new(solution),
                });
            }

            if let Some(doubled) = doubled {
                next = doubled;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::integrand::{from_row_fn, Keister, Linear};
    use crate::sequence::SampleBatch;
    use crate::transform::{Gaussian, Periodization, StdUniform};

    #[test]
    fn test_lattice_linear_converges() {
        let config = RunConfig::builder(3).seed(11).abs_tol(1e-4).build();
        let mut integrator = Integrator::new(&config).unwrap();
        let solution = integrator.integrate(&Linear, &StdUniform::new(3)).unwrap();
        assert!((solution.estimate - 1.5).abs() < 1e-4);
        assert!(solution.converged);
        assert_eq!(integrator.state(), ControllerState::Converged);
        assert!(solution.n_total.is_power_of_two());
        assert_eq!(solution.certificate.kind, CertificateKind::DeterministicBias);
    }

    #[test]
    fn test_sobol_keister_converges() {
        let config = RunConfig::builder(3)
            .backend(Backend::Sobol)
            .seed(3)
            .abs_tol(1e-3)
            .build();
        let measure = Gaussian::new(&[0.0], &[0.5], 3).unwrap();
        let solution = Integrator::new(&config)
            .unwrap()
            .integrate(&Keister::new(3), &measure)
            .unwrap();
        assert!((solution.estimate - 2.168_309_102_165_481).abs() < 2e-3);
    }

    #[test]
    fn test_iid_clt_converges() {
        let config = RunConfig::builder(2)
            .backend(Backend::Iid)
            .seed(5)
            .abs_tol(5e-3)
            .build();
        let solution = Integrator::new(&config)
            .unwrap()
            .integrate(&Linear, &StdUniform::new(2))
            .unwrap();
        assert!((solution.estimate - 1.0).abs() < 1e-2);
        assert_eq!(solution.stopping, StoppingRule::Clt);
        assert_eq!(solution.certificate.kind, CertificateKind::ConfidenceInterval);
    }

    #[test]
    fn test_clt_rep_counts_all_replications() {
        let config = RunConfig::builder(2)
            .stopping(StoppingRule::CltRep)
            .replications(8)
            .n_init(64)
            .seed(21)
            .abs_tol(1e-3)
            .build();
        let solution = Integrator::new(&config)
            .unwrap()
            .integrate(&Linear, &StdUniform::new(2))
            .unwrap();
        assert!((solution.estimate - 1.0).abs() < 1e-3);
        assert_eq!(solution.n_total % 8, 0);
        assert!((solution.n_total / 8).is_power_of_two());
    }

    #[test]
    fn test_history_records_every_doubling() {
        let config = RunConfig::builder(2)
            .seed(1)
            .abs_tol(1e-6)
            .n_init(64)
            .n_max(1 << 12)
            .build();
        let err = Integrator::new(&config)
            .unwrap()
            .integrate(&Keister::new(2), &Gaussian::new(&[0.0], &[0.5], 2).unwrap())
            .unwrap_err();
        let solution = err.into_solution().unwrap();
        // 64, 128, ..., 4096
        assert_eq!(solution.history.len(), 7);
        assert_eq!(solution.doublings(), 6);
        for pair in solution.history.windows(2) {
            assert_eq!(pair[1].n, 2 * pair[0].n);
        }
    }

    #[test]
    fn test_exhaustion_reports_best_solution() {
        let config = RunConfig::builder(1)
            .backend(Backend::Iid)
            .seed(2)
            .abs_tol(1e-9)
            .n_init(128)
            .n_max(1000)
            .build();
        let mut integrator = Integrator::new(&config).unwrap();
        let err = integrator
            .integrate(&Linear, &StdUniform::new(1))
            .unwrap_err();
        assert!(err.yields_estimate());
        assert_eq!(integrator.state(), ControllerState::Exhausted);
        let solution = err.best_solution().unwrap();
        assert!(!solution.converged);
        // 128 -> 256 -> 512, doubling to 1024 would exceed the budget
        assert_eq!(solution.n_total, 512);
    }

    #[test]
    fn test_same_seed_same_solution() {
        let config = RunConfig::builder(2).seed(99).abs_tol(1e-3).build();
        let f = from_row_fn(|x: &[f64]| (x[0] * x[1]).exp());
        let a = Integrator::new(&config)
            .unwrap()
            .integrate(&f, &StdUniform::new(2))
            .unwrap();
        let b = Integrator::new(&config)
            .unwrap()
            .integrate(&f, &StdUniform::new(2))
            .unwrap();
        assert_eq!(a.estimate.to_bits(), b.estimate.to_bits());
        assert_eq!(a.n_total, b.n_total);
    }

    #[test]
    fn test_measure_dimension_mismatch() {
        let config = RunConfig::builder(2).seed(1).build();
        let err = Integrator::new(&config)
            .unwrap()
            .integrate(&Linear, &StdUniform::new(3))
            .unwrap_err();
        assert!(matches!(err, CubError::InvalidParameter { .. }));
    }

    #[test]
    fn test_non_finite_aborts_run() {
        let config = RunConfig::builder(1).backend(Backend::Iid).seed(1).build();
        let f = |x: &SampleBatch| vec![f64::NAN; x.len()];
        let mut integrator = Integrator::new(&config).unwrap();
        let err = integrator.integrate(&f, &StdUniform::new(1)).unwrap_err();
        assert!(matches!(err, CubError::NonFiniteIntegrandValue { index: 0, .. }));
        assert_eq!(integrator.state(), ControllerState::Aborted);
    }

    #[test]
    fn test_shape_error_aborts_run() {
        let config = RunConfig::builder(1).seed(1).build();
        let f = |_: &SampleBatch| vec![0.0; 3];
        let mut integrator = Integrator::new(&config).unwrap();
        let err = integrator.integrate(&f, &StdUniform::new(1)).unwrap_err();
        assert!(matches!(err, CubError::IntegrandShape { .. }));
        assert_eq!(integrator.state(), ControllerState::Aborted);
    }

    #[test]
    fn test_batch_reduced_to_one_value_is_rejected() {
        let config = RunConfig::builder(1).seed(1).abs_tol(1e-3).build();
        let summed = |x: &SampleBatch| vec![x.rows().map(|r| r[0]).sum::<f64>()];
        let mut integrator = Integrator::new(&config).unwrap();
        let err = integrator.integrate(&summed, &StdUniform::new(1)).unwrap_err();
        assert!(matches!(
            err,
            CubError::IntegrandShape {
                batch_size: 1024,
                returned: 1
            }
        ));
        assert_eq!(integrator.state(), ControllerState::Aborted);
    }

    #[test]
    fn test_state_recovers_after_aborted_run() {
        let config = RunConfig::builder(1).seed(1).build();
        let mut integrator = Integrator::new(&config).unwrap();
        let bad = |_: &SampleBatch| vec![0.0; 3];
        assert!(integrator.integrate(&bad, &StdUniform::new(1)).is_err());
        assert_eq!(integrator.state(), ControllerState::Aborted);
        assert!(integrator.integrate(&Linear, &StdUniform::new(1)).is_ok());
        assert_eq!(integrator.state(), ControllerState::Converged);
    }

    #[test]
    fn test_rough_integrand_raises_decay_warning() {
        // indicator of x0 + x1 < 0.7, discontinuous and non-periodic
        let step = from_row_fn(|x: &[f64]| if x[0] + x[1] < 0.7 { 1.0 } else { 0.0 });
        let config = RunConfig::builder(2)
            .seed(1)
            .abs_tol(1e-9)
            .n_max(1 << 16)
            .build();
        let err = Integrator::new(&config)
            .unwrap()
            .integrate(&step, &StdUniform::new(2))
            .unwrap_err();
        let solution = err.into_solution().unwrap();
        assert!(solution.history.iter().any(|c| c.decay_warning));
    }

    #[test]
    fn test_smooth_periodized_integrand_has_no_decay_warning() {
        let smooth = from_row_fn(|x: &[f64]| (x[0] * x[1]).exp());
        let config = RunConfig::builder(2)
            .seed(1)
            .abs_tol(1e-12)
            .n_max(1 << 16)
            .periodization(Periodization::Baker)
            .build();
        let err = Integrator::new(&config)
            .unwrap()
            .integrate(&smooth, &StdUniform::new(2))
            .unwrap_err();
        let solution = err.into_solution().unwrap();
        assert_eq!(solution.history.len(), 7);
        assert!(solution.history.iter().all(|c| !c.decay_warning));
    }

    #[test]
    fn test_invalid_config_rejected_before_sampling() {
        let config = RunConfig::builder(2).abs_tol(0.0).build();
        assert!(Integrator::new(&config).is_err());
    }

    #[test]
    fn test_periodization_keeps_lattice_estimate() {
        let config = RunConfig::builder(2)
            .seed(4)
            .abs_tol(1e-4)
            .periodization(Periodization::C1Sin)
            .build();
        let solution = Integrator::new(&config)
            .unwrap()
            .integrate(&Linear, &StdUniform::new(2))
            .unwrap();
        assert!((solution.estimate - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_solution_serializes() {
        let config = RunConfig::builder(1).seed(8).build();
        let solution = Integrator::new(&config)
            .unwrap()
            .integrate(&Linear, &StdUniform::new(1))
            .unwrap();
        let json = serde_json::to_string(&solution).unwrap();
        assert!(json.contains("\"estimate\""));
        assert!(json.contains("\"history\""));
        let back: Solution = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n_total, solution.n_total);
        assert_eq!(back.history.len(), solution.history.len());
        assert!((back.estimate - solution.estimate).abs() < 1e-12);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ControllerState::Converged.is_terminal());
        assert!(ControllerState::Exhausted.is_terminal());
        assert!(ControllerState::Aborted.is_terminal());
        assert!(!ControllerState::Sampling.is_terminal());
        assert!(!ControllerState::Init.is_terminal());
    }
}
