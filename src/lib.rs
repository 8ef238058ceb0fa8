//! # qmc-cubature
//!
//! Adaptive quasi-Monte Carlo and Monte Carlo cubature.
//!
//! Estimates `E[f(X)]` for a target measure by doubling the sample size
//! until a certified error bound meets the requested tolerance:
//! - IID, rank-1 lattice and Sobol point sets, optionally randomized
//! - Measure transforms (uniform, Lebesgue, Gaussian) and periodizations
//! - CLT, replicated-CLT and fast-transform bias error certificates
//!
//! ## Example
//!
//! ```rust
//! use qmc_cubature::prelude::*;
//!
//! let config = RunConfig::builder(3)
//!     .seed(42)
//!     .abs_tol(1e-3)
//!     .periodization(Periodization::Baker)
//!     .build();
//! let measure = Gaussian::new(&[0.0], &[0.5], 3).unwrap();
//! let solution = Integrator::new(&config)
//!     .unwrap()
//!     .integrate(&Keister::new(3), &measure)
//!     .unwrap();
//! assert!((solution.estimate - 2.1683).abs() < 1e-2);
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::suboptimal_flops,
    clippy::imprecise_flops,
    clippy::too_many_lines,
    clippy::missing_const_for_fn,
    clippy::needless_range_loop,
    clippy::manual_midpoint
)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod integrand;
pub mod sequence;
pub mod transform;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{ExperimentConfig, RunConfig, RunConfigBuilder, StoppingRule};
    pub use crate::engine::rng::CubRng;
    pub use crate::engine::{ControllerState, ErrorCertificate, Integrator, Solution};
    pub use crate::error::{CubError, CubResult};
    pub use crate::integrand::{from_row_fn, Integrand, Keister, Linear, NormPower, ParallelRows};
    pub use crate::sequence::{Backend, SampleBatch, SequenceGenerator};
    pub use crate::transform::{Gaussian, Lebesgue, MeasureTransform, Periodization, StdUniform, Uniform};
}

/// Re-export for public API
pub use error::{CubError, CubResult};
