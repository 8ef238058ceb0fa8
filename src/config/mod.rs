//! Run configuration with YAML schema and validation.
//!
//! Mistakes are caught before any sampling work:
//! - Type-safe configuration structs
//! - Field ranges via `validator`
//! - Cross-field semantic checks (backend / stopping rule compatibility,
//!   tolerance sanity, budget ordering)

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use validator::Validate;

use crate::error::{CubError, CubResult};
use crate::sequence::Backend;
use crate::transform::Periodization;

/// Error estimation rule driving the doubling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingRule {
    /// Central-limit confidence interval on IID samples.
    Clt,
    /// Confidence interval over independently randomized replications.
    CltRep,
    /// Transform-bias bound from the decay of the Walsh/Fourier spectrum.
    Guaranteed,
}

impl StoppingRule {
    /// Rule used when none is configured.
    #[must_use]
    pub const fn default_for(backend: Backend) -> Self {
        match backend {
            Backend::Iid => Self::Clt,
            Backend::Lattice | Backend::Sobol => Self::Guaranteed,
        }
    }

    /// Whether the rule can run on the given backend.
    #[must_use]
    pub const fn supports(self, backend: Backend) -> bool {
        match self {
            Self::Clt => matches!(backend, Backend::Iid),
            Self::CltRep | Self::Guaranteed => backend.is_low_discrepancy(),
        }
    }
}

impl std::fmt::Display for StoppingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Clt => "clt",
            Self::CltRep => "clt_rep",
            Self::Guaranteed => "guaranteed",
        };
        f.write_str(name)
    }
}

/// Options of one integration run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Dimension of the unit-cube points.
    #[validate(range(min = 1))]
    pub dimension: usize,

    /// Master seed; drawn from entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Randomize the low-discrepancy point set.
    #[serde(default = "default_true")]
    pub scramble: bool,

    /// Generator family.
    #[serde(default)]
    pub backend: Backend,

    /// Error estimation rule; derived from the backend when absent.
    #[serde(default)]
    pub stopping: Option<StoppingRule>,

    /// Absolute error tolerance.
    #[validate(range(min = 0.0))]
    #[serde(default = "default_abs_tol")]
    pub abs_tol: f64,

    /// Relative error tolerance.
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub rel_tol: f64,

    /// Initial number of samples (per replication for `clt_rep`).
    #[validate(range(min = 1))]
    #[serde(default = "default_n_init")]
    pub n_init: u64,

    /// Total sample budget.
    #[validate(range(min = 1))]
    #[serde(default = "default_n_max")]
    pub n_max: u64,

    /// Safety multiplier on the error bound.
    #[validate(range(min = 1.0))]
    #[serde(default = "default_inflate")]
    pub inflate: f64,

    /// Uncertainty level of confidence-interval rules.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Number of most recent dyadic levels the bias bound looks at.
    #[validate(range(min = 1, max = 16))]
    #[serde(default = "default_r_lag")]
    pub r_lag: u32,

    /// Multiplier of the transform-bias bound.
    #[serde(default = "default_fudge")]
    pub fudge: f64,

    /// Independent randomizations for `clt_rep`.
    #[validate(range(min = 2))]
    #[serde(default = "default_replications")]
    pub replications: usize,

    /// Periodizing transform applied before the measure transform.
    #[serde(default)]
    pub periodization: Periodization,
}

const fn default_true() -> bool {
    true
}

const fn default_abs_tol() -> f64 {
    1e-2
}

const fn default_n_init() -> u64 {
    1 << 10
}

const fn default_n_max() -> u64 {
    1 << 20
}

const fn default_inflate() -> f64 {
    1.2
}

const fn default_alpha() -> f64 {
    0.01
}

const fn default_r_lag() -> u32 {
    4
}

const fn default_fudge() -> f64 {
    5.0
}

const fn default_replications() -> usize {
    16
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dimension: 1,
            seed: None,
            scramble: true,
            backend: Backend::default(),
            stopping: None,
            abs_tol: default_abs_tol(),
            rel_tol: 0.0,
            n_init: default_n_init(),
            n_max: default_n_max(),
            inflate: default_inflate(),
            alpha: default_alpha(),
            r_lag: default_r_lag(),
            fudge: default_fudge(),
            replications: default_replications(),
            periodization: Periodization::None,
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - YAML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> CubResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails.
    pub fn from_yaml(yaml: &str) -> CubResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        config.validate_semantic()?;
        Ok(config)
    }

    /// Create a builder for configuration.
    #[must_use]
    pub fn builder(dimension: usize) -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self {
                dimension,
                ..Self::default()
            },
        }
    }

    /// Stopping rule in effect.
    #[must_use]
    pub fn stopping_rule(&self) -> StoppingRule {
        self.stopping
            .unwrap_or_else(|| StoppingRule::default_for(self.backend))
    }

    /// Cross-field constraints beyond the schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` describing the first violated constraint.
    pub fn validate_semantic(&self) -> CubResult<()> {
        if self.dimension == 0 {
            return Err(CubError::invalid("dimension must be positive"));
        }
        if self.dimension > self.backend.max_dimension() {
            return Err(CubError::invalid(format!(
                "{} backend supports at most {} dimensions, got {}",
                self.backend,
                self.backend.max_dimension(),
                self.dimension
            )));
        }

        if !(self.abs_tol.is_finite() && self.abs_tol >= 0.0) {
            return Err(CubError::invalid(format!(
                "abs_tol must be finite and non-negative, got {}",
                self.abs_tol
            )));
        }
        if !(0.0..=1.0).contains(&self.rel_tol) {
            return Err(CubError::invalid(format!(
                "rel_tol must lie in [0, 1], got {}",
                self.rel_tol
            )));
        }
        if self.abs_tol == 0.0 && self.rel_tol == 0.0 {
            return Err(CubError::invalid(
                "abs_tol and rel_tol cannot both be zero",
            ));
        }

        if self.n_init == 0 {
            return Err(CubError::invalid("n_init must be positive"));
        }
        if self.n_init > self.n_max {
            return Err(CubError::invalid(format!(
                "n_init ({}) must not exceed n_max ({})",
                self.n_init, self.n_max
            )));
        }
        if self.n_max > self.backend.capacity() {
            return Err(CubError::invalid(format!(
                "{} backend supports at most {} points, n_max is {}",
                self.backend,
                self.backend.capacity(),
                self.n_max
            )));
        }

        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(CubError::invalid(format!(
                "alpha must lie in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(self.inflate.is_finite() && self.inflate >= 1.0) {
            return Err(CubError::invalid(format!(
                "inflate must be at least 1, got {}",
                self.inflate
            )));
        }
        if !(self.fudge.is_finite() && self.fudge > 0.0) {
            return Err(CubError::invalid(format!(
                "fudge must be positive, got {}",
                self.fudge
            )));
        }
        if self.r_lag == 0 {
            return Err(CubError::invalid("r_lag must be at least 1"));
        }
        if self.replications < 2 {
            return Err(CubError::invalid("replications must be at least 2"));
        }

        let rule = self.stopping_rule();
        if !rule.supports(self.backend) {
            return Err(CubError::invalid(format!(
                "stopping rule {rule} is incompatible with the {} backend",
                self.backend
            )));
        }
        if rule == StoppingRule::CltRep && !self.scramble {
            return Err(CubError::invalid(
                "clt_rep needs randomized replications; set scramble = true",
            ));
        }

        Ok(())
    }

    /// Validate and project into the controller's immutable criterion.
    ///
    /// Low-discrepancy runs need power-of-two sample sizes; a non-power of
    /// two `n_init` is rounded up with a warning.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` or `Validation` if any constraint fails,
    /// including constraints that only arise after rounding.
    pub fn criterion(&self) -> CubResult<StoppingCriterionConfig> {
        self.validate()?;
        self.validate_semantic()?;

        let rule = self.stopping_rule();
        let mut n_init = self.n_init;
        if self.backend.is_low_discrepancy() && !n_init.is_power_of_two() {
            let rounded = n_init.next_power_of_two();
            warn!(
                n_init,
                rounded, "n_init is not a power of two for a {} run, rounding up", self.backend
            );
            n_init = rounded;
        }

        let per_round = match rule {
            StoppingRule::CltRep => n_init.saturating_mul(self.replications as u64),
            StoppingRule::Clt | StoppingRule::Guaranteed => n_init,
        };
        if per_round > self.n_max {
            return Err(CubError::invalid(format!(
                "initial sample of {per_round} points exceeds n_max ({})",
                self.n_max
            )));
        }

        if rule == StoppingRule::Guaranteed {
            let m = n_init.trailing_zeros();
            if m < self.r_lag + 1 {
                return Err(CubError::invalid(format!(
                    "guaranteed rule needs n_init >= 2^(r_lag + 1) = {}, got {n_init}",
                    1u64 << (self.r_lag + 1)
                )));
            }
        }

        Ok(StoppingCriterionConfig {
            rule,
            abs_tol: self.abs_tol,
            rel_tol: self.rel_tol,
            n_init,
            n_max: self.n_max,
            alpha: self.alpha,
            inflate: self.inflate,
            r_lag: self.r_lag,
            fudge: self.fudge,
            replications: self.replications,
        })
    }
}

/// Configuration builder for programmatic construction.
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    /// Set the master seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Enable or disable randomization.
    #[must_use]
    pub const fn scramble(mut self, scramble: bool) -> Self {
        self.config.scramble = scramble;
        self
    }

    /// Select the generator family.
    #[must_use]
    pub const fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Select the stopping rule explicitly.
    #[must_use]
    pub const fn stopping(mut self, rule: StoppingRule) -> Self {
        self.config.stopping = Some(rule);
        self
    }

    /// Set the absolute tolerance.
    #[must_use]
    pub const fn abs_tol(mut self, abs_tol: f64) -> Self {
        self.config.abs_tol = abs_tol;
        self
    }

    /// Set the relative tolerance.
    #[must_use]
    pub const fn rel_tol(mut self, rel_tol: f64) -> Self {
        self.config.rel_tol = rel_tol;
        self
    }

    /// Set the initial sample size.
    #[must_use]
    pub const fn n_init(mut self, n_init: u64) -> Self {
        self.config.n_init = n_init;
        self
    }

    /// Set the total sample budget.
    #[must_use]
    pub const fn n_max(mut self, n_max: u64) -> Self {
        self.config.n_max = n_max;
        self
    }

    /// Set the bound inflation factor.
    #[must_use]
    pub const fn inflate(mut self, inflate: f64) -> Self {
        self.config.inflate = inflate;
        self
    }

    /// Set the confidence-interval uncertainty level.
    #[must_use]
    pub const fn alpha(mut self, alpha: f64) -> Self {
        self.config.alpha = alpha;
        self
    }

    /// Set the bias-bound lag window.
    #[must_use]
    pub const fn r_lag(mut self, r_lag: u32) -> Self {
        self.config.r_lag = r_lag;
        self
    }

    /// Set the bias-bound multiplier.
    #[must_use]
    pub const fn fudge(mut self, fudge: f64) -> Self {
        self.config.fudge = fudge;
        self
    }

    /// Set the number of replications for `clt_rep`.
    #[must_use]
    pub const fn replications(mut self, replications: usize) -> Self {
        self.config.replications = replications;
        self
    }

    /// Set the periodizing transform.
    #[must_use]
    pub const fn periodization(mut self, periodization: Periodization) -> Self {
        self.config.periodization = periodization;
        self
    }

    /// Build the configuration. Validation happens in
    /// [`RunConfig::criterion`].
    #[must_use]
    pub fn build(self) -> RunConfig {
        self.config
    }
}

/// Immutable, validated stopping-criterion parameters of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppingCriterionConfig {
    /// Error estimation rule.
    pub rule: StoppingRule,
    /// Absolute tolerance.
    pub abs_tol: f64,
    /// Relative tolerance.
    pub rel_tol: f64,
    /// Initial sample size per replication.
    pub n_init: u64,
    /// Total sample budget.
    pub n_max: u64,
    /// Confidence-interval uncertainty level.
    pub alpha: f64,
    /// Bound inflation factor.
    pub inflate: f64,
    /// Bias-bound lag window.
    pub r_lag: u32,
    /// Bias-bound multiplier.
    pub fudge: f64,
    /// Replications for `clt_rep`.
    pub replications: usize,
}

impl StoppingCriterionConfig {
    /// Samples drawn per unit of `n` (the replication count for `clt_rep`).
    #[must_use]
    pub const fn samples_per_point(&self) -> u64 {
        match self.rule {
            StoppingRule::CltRep => self.replications as u64,
            StoppingRule::Clt | StoppingRule::Guaranteed => 1,
        }
    }
}

/// Built-in test integrands selectable from an experiment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrandKind {
    /// `pi^(d/2) * cos(||x||)`.
    Keister,
    /// Sum of coordinates.
    Linear,
    /// `||x||^sqrt(||x||)`.
    NormPower,
}

/// Target measure selectable from an experiment file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasureConfig {
    /// Uniform on the unit cube.
    #[default]
    StdUniform,
    /// Uniform probability measure on a box.
    Uniform {
        /// Lower corner, one entry or one per dimension.
        lower: Vec<f64>,
        /// Upper corner, one entry or one per dimension.
        upper: Vec<f64>,
    },
    /// Lebesgue measure on a box.
    Lebesgue {
        /// Lower corner, one entry or one per dimension.
        lower: Vec<f64>,
        /// Upper corner, one entry or one per dimension.
        upper: Vec<f64>,
    },
    /// Diagonal Gaussian.
    Gaussian {
        /// Mean, one entry or one per dimension.
        #[serde(default = "default_mean")]
        mean: Vec<f64>,
        /// Variance, one entry or one per dimension.
        #[serde(default = "default_variance")]
        variance: Vec<f64>,
    },
}

fn default_mean() -> Vec<f64> {
    vec![0.0]
}

fn default_variance() -> Vec<f64> {
    vec![1.0]
}

/// Problem definition of an experiment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemConfig {
    /// Built-in integrand.
    pub integrand: IntegrandKind,
    /// Target measure.
    #[serde(default)]
    pub measure: MeasureConfig,
}

/// An experiment: run options plus the problem to integrate.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Run options.
    #[validate(nested)]
    pub run: RunConfig,
    /// Problem to integrate.
    pub problem: ProblemConfig,
}

impl ExperimentConfig {
    /// Load an experiment from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if reading, parsing or validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> CubResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse an experiment from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails.
    pub fn from_yaml(yaml: &str) -> CubResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        config.run.validate_semantic()?;
        Ok(config)
    }
}
