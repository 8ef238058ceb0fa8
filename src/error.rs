//! Error types for qmc-cubature.
//!
//! Every fallible operation returns `Result<T, CubError>`. Configuration
//! errors surface before any sampling work; mid-run conditions abort the run
//! with the partial state attached; budget exhaustion is the one condition
//! that still carries a usable (unguaranteed) answer.

use thiserror::Error;

use crate::engine::accumulator::RunningStatistics;
use crate::engine::Solution;

/// Result type alias for cubature operations.
pub type CubResult<T> = Result<T, CubError>;

/// Unified error type for all cubature operations.
#[derive(Debug, Error)]
pub enum CubError {
    // ===== Configuration Errors =====
    /// Malformed configuration, rejected before any sampling.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the offending parameter.
        message: String,
    },

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Schema validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    // ===== Run Invariant Violations =====
    /// Index range not contiguous with prior generation, or a batch folded
    /// under a different randomization. A programming error, not recoverable.
    #[error("Sequence state mismatch: expected index {expected}, found {found}")]
    SequenceStateMismatch {
        /// Next index (or randomization fingerprint) the state expected.
        expected: u64,
        /// Index (or fingerprint) actually supplied.
        found: u64,
    },

    /// The integrand returned a result that cannot be matched to the batch.
    #[error("Integrand shape error: batch of {batch_size} rows returned {returned} values")]
    IntegrandShape {
        /// Number of rows in the evaluated batch.
        batch_size: usize,
        /// Number of values the integrand returned.
        returned: usize,
    },

    /// The integrand produced NaN or an infinite value.
    #[error("Non-finite integrand value {value} at sample index {index}")]
    NonFiniteIntegrandValue {
        /// Global sample index of the offending value.
        index: u64,
        /// The non-finite value itself.
        value: f64,
        /// Statistics accumulated before the offending batch.
        partial: Box<RunningStatistics>,
    },

    // ===== Budget =====
    /// The sample budget ran out before the certificate met tolerance.
    #[error(
        "Tolerance not achieved within n_max = {n_max}: bound {bound:.6e} exceeds tolerance {tolerance:.6e}"
    )]
    ToleranceNotAchieved {
        /// Configured sample budget.
        n_max: u64,
        /// Tolerance the certificate had to meet.
        tolerance: f64,
        /// Final error bound.
        bound: f64,
        /// Best-so-far solution.
        solution: Box<Solution>,
    },

    // ===== I/O Errors =====
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CubError {
    /// Create an invalid-parameter error with a message.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Whether this condition still carries a usable (caveated) estimate.
    #[must_use]
    pub const fn yields_estimate(&self) -> bool {
        matches!(self, Self::ToleranceNotAchieved { .. })
    }

    /// Whether this error was raised by configuration checks.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. } | Self::YamlParse(_) | Self::Validation(_)
        )
    }

    /// Borrow the best-so-far solution, if this condition carries one.
    #[must_use]
    pub fn best_solution(&self) -> Option<&Solution> {
        match self {
            Self::ToleranceNotAchieved { solution, .. } => Some(solution),
            _ => None,
        }
    }

    /// Take the best-so-far solution, if this condition carries one.
    #[must_use]
    pub fn into_solution(self) -> Option<Solution> {
        match self {
            Self::ToleranceNotAchieved { solution, .. } => Some(*solution),
            _ => None,
        }
    }
}
