//! Measure transforms: unit-cube batches to target-distribution batches.
//!
//! A transform is a pure function of its input batch and its own fixed
//! parameters. It reports an optional per-row weight (a Jacobian or a
//! periodization density) that the evaluator multiplies into the
//! integrand values.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;

use crate::config::MeasureConfig;
use crate::error::{CubError, CubResult};
use crate::sequence::SampleBatch;

/// Output of a measure transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    /// Batch in the target domain, same rows and index range as the input.
    pub batch: SampleBatch,
    /// Per-row weight, `None` when every weight is 1.
    pub weights: Option<Vec<f64>>,
}

impl Transformed {
    /// Unweighted result.
    #[must_use]
    pub const fn unweighted(batch: SampleBatch) -> Self {
        Self {
            batch,
            weights: None,
        }
    }

    /// Multiply another per-row weight into this result.
    #[must_use]
    pub fn reweighted(mut self, other: Option<Vec<f64>>) -> Self {
        self.weights = match (self.weights, other) {
            (None, w) | (w, None) => w,
            (Some(mut a), Some(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x *= y;
                }
                Some(a)
            }
        };
        self
    }
}

/// Change of variables from the unit cube to a target measure.
pub trait MeasureTransform: Send + Sync {
    /// Dimension of the unit-cube points the transform consumes.
    fn dimension(&self) -> usize;

    /// Map a unit-cube batch into the target domain.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the batch dimension does not match.
    fn transform(&self, batch: &SampleBatch) -> CubResult<Transformed>;
}

fn check_dimension(expected: usize, batch: &SampleBatch) -> CubResult<()> {
    if batch.dimension() == expected {
        Ok(())
    } else {
        Err(CubError::invalid(format!(
            "transform expects dimension {expected}, batch has {}",
            batch.dimension()
        )))
    }
}

fn broadcast(name: &str, values: &[f64], dimension: usize) -> CubResult<Vec<f64>> {
    match values.len() {
        1 => Ok(vec![values[0]; dimension]),
        n if n == dimension => Ok(values.to_vec()),
        n => Err(CubError::invalid(format!(
            "{name} has {n} entries, expected 1 or {dimension}"
        ))),
    }
}

/// Uniform distribution on the unit cube. The identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdUniform {
    dimension: usize,
}

impl StdUniform {
    /// Standard uniform in `dimension` dimensions.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl MeasureTransform for StdUniform {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn transform(&self, batch: &SampleBatch) -> CubResult<Transformed> {
        check_dimension(self.dimension, batch)?;
        Ok(Transformed::unweighted(batch.clone()))
    }
}

/// Axis-aligned box `[lower, upper]`.
#[derive(Debug, Clone, PartialEq)]
struct BoxMap {
    lower: Vec<f64>,
    width: Vec<f64>,
}

impl BoxMap {
    fn new(lower: &[f64], upper: &[f64], dimension: usize) -> CubResult<Self> {
        let lower = broadcast("lower bound", lower, dimension)?;
        let upper = broadcast("upper bound", upper, dimension)?;
        let mut width = Vec::with_capacity(dimension);
        for (k, (a, b)) in lower.iter().zip(&upper).enumerate() {
            if !(a.is_finite() && b.is_finite() && b > a) {
                return Err(CubError::invalid(format!(
                    "bounds for dimension {k} must be finite with lower < upper, got [{a}, {b}]"
                )));
            }
            width.push(b - a);
        }
        Ok(Self { lower, width })
    }

    fn apply(&self, batch: &SampleBatch) -> CubResult<SampleBatch> {
        let d = self.lower.len();
        let points = batch
            .as_slice()
            .iter()
            .enumerate()
            .map(|(j, u)| self.lower[j % d] + self.width[j % d] * u)
            .collect();
        batch.with_points(d, points)
    }

    fn volume(&self) -> f64 {
        self.width.iter().product()
    }
}

/// Uniform probability distribution on a box.
#[derive(Debug, Clone, PartialEq)]
pub struct Uniform {
    map: BoxMap,
}

impl Uniform {
    /// Uniform on `[lower, upper]`; single-entry bounds are broadcast.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for mismatched lengths or empty intervals.
    pub fn new(lower: &[f64], upper: &[f64], dimension: usize) -> CubResult<Self> {
        Ok(Self {
            map: BoxMap::new(lower, upper, dimension)?,
        })
    }
}

impl MeasureTransform for Uniform {
    fn dimension(&self) -> usize {
        self.map.lower.len()
    }

    fn transform(&self, batch: &SampleBatch) -> CubResult<Transformed> {
        check_dimension(self.dimension(), batch)?;
        Ok(Transformed::unweighted(self.map.apply(batch)?))
    }
}

/// Lebesgue measure on a box: the uniform map weighted by the box volume,
/// so the integral rather than the mean is estimated.
#[derive(Debug, Clone, PartialEq)]
pub struct Lebesgue {
    map: BoxMap,
}

impl Lebesgue {
    /// Lebesgue measure on `[lower, upper]`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for mismatched lengths or empty intervals.
    pub fn new(lower: &[f64], upper: &[f64], dimension: usize) -> CubResult<Self> {
        Ok(Self {
            map: BoxMap::new(lower, upper, dimension)?,
        })
    }
}

impl MeasureTransform for Lebesgue {
    fn dimension(&self) -> usize {
        self.map.lower.len()
    }

    fn transform(&self, batch: &SampleBatch) -> CubResult<Transformed> {
        check_dimension(self.dimension(), batch)?;
        let volume = self.map.volume();
        Ok(Transformed {
            batch: self.map.apply(batch)?,
            weights: Some(vec![volume; batch.len()]),
        })
    }
}

/// Lower clamp for inverse-CDF inputs; keeps quantiles finite at 0 and 1.
const QUANTILE_CLAMP: f64 = 1.0 / 9_007_199_254_740_992.0;

/// Gaussian with diagonal covariance via the inverse normal CDF.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: Vec<f64>,
    std_dev: Vec<f64>,
    standard: Normal,
}

impl Gaussian {
    /// Gaussian with the given mean and per-coordinate variance; single
    /// entries are broadcast.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for mismatched lengths or non-positive
    /// variances.
    pub fn new(mean: &[f64], variance: &[f64], dimension: usize) -> CubResult<Self> {
        let mean = broadcast("mean", mean, dimension)?;
        let variance = broadcast("variance", variance, dimension)?;
        if let Some(v) = variance.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(CubError::invalid(format!(
                "Gaussian variance must be positive and finite, got {v}"
            )));
        }
        let standard = Normal::new(0.0, 1.0).map_err(|e| CubError::invalid(e.to_string()))?;
        Ok(Self {
            mean,
            std_dev: variance.iter().map(|v| v.sqrt()).collect(),
            standard,
        })
    }

    /// Standard normal in `dimension` dimensions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `dimension` is zero.
    pub fn standard(dimension: usize) -> CubResult<Self> {
        if dimension == 0 {
            return Err(CubError::invalid("dimension must be positive"));
        }
        Self::new(&[0.0], &[1.0], dimension)
    }
}

impl MeasureTransform for Gaussian {
    fn dimension(&self) -> usize {
        self.mean.len()
    }

    fn transform(&self, batch: &SampleBatch) -> CubResult<Transformed> {
        let d = self.dimension();
        check_dimension(d, batch)?;
        let points = batch
            .as_slice()
            .iter()
            .enumerate()
            .map(|(j, &u)| {
                let u = u.clamp(QUANTILE_CLAMP, 1.0 - QUANTILE_CLAMP);
                self.mean[j % d] + self.std_dev[j % d] * self.standard.inverse_cdf(u)
            })
            .collect();
        Ok(Transformed::unweighted(batch.with_points(d, points)?))
    }
}

/// Periodizing change of variables on the unit cube.
///
/// Applied to the unit-cube points before the measure transform. Makes a
/// non-periodic integrand behave periodically so lattice spectra decay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Periodization {
    /// Identity.
    #[default]
    None,
    /// Baker's (tent) transform, weight 1.
    Baker,
    /// Cubic polynomial, continuous weight.
    C0,
    /// Quintic polynomial, continuously differentiable weight.
    C1,
    /// Sidi's sine transform.
    C1Sin,
}

impl Periodization {
    fn map(self, x: f64) -> (f64, f64) {
        match self {
            Self::None => (x, 1.0),
            Self::Baker => (1.0 - (2.0 * x - 1.0).abs(), 1.0),
            Self::C0 => (x * x * (3.0 - 2.0 * x), 6.0 * x * (1.0 - x)),
            Self::C1 => (
                x.powi(3) * (10.0 - 15.0 * x + 6.0 * x * x),
                30.0 * x * x * (1.0 - x).powi(2),
            ),
            Self::C1Sin => (
                x - (2.0 * PI * x).sin() / (2.0 * PI),
                2.0 * (PI * x).sin().powi(2),
            ),
        }
    }

    /// Whether the map carries a non-unit weight.
    #[must_use]
    pub const fn is_weighted(self) -> bool {
        matches!(self, Self::C0 | Self::C1 | Self::C1Sin)
    }

    /// Periodize a unit-cube batch.
    ///
    /// # Errors
    ///
    /// Propagates batch construction errors.
    pub fn apply(self, batch: &SampleBatch) -> CubResult<Transformed> {
        if self == Self::None {
            return Ok(Transformed::unweighted(batch.clone()));
        }
        let d = batch.dimension();
        let mut points = Vec::with_capacity(batch.as_slice().len());
        let mut weights = Vec::with_capacity(batch.len());
        for row in batch.rows() {
            let mut weight = 1.0;
            for &x in row {
                let (y, w) = self.map(x);
                points.push(y);
                weight *= w;
            }
            weights.push(weight);
        }
        let mapped = batch.with_points(d, points)?;
        Ok(if self.is_weighted() {
            Transformed {
                batch: mapped,
                weights: Some(weights),
            }
        } else {
            Transformed::unweighted(mapped)
        })
    }
}

impl MeasureConfig {
    /// Instantiate the configured measure in `dimension` dimensions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for inconsistent bounds or variances.
    pub fn build(&self, dimension: usize) -> CubResult<Box<dyn MeasureTransform>> {
        Ok(match self {
            Self::StdUniform => Box::new(StdUniform::new(dimension)),
            Self::Uniform { lower, upper } => Box::new(Uniform::new(lower, upper, dimension)?),
            Self::Lebesgue { lower, upper } => Box::new(Lebesgue::new(lower, upper, dimension)?),
            Self::Gaussian { mean, variance } => Box::new(Gaussian::new(mean, variance, dimension)?),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn batch(d: usize, points: Vec<f64>) -> SampleBatch {
        SampleBatch::new(0, d, points, 0).unwrap()
    }

    fn midpoint_grid(n: usize) -> SampleBatch {
        batch(1, (0..n).map(|i| (i as f64 + 0.5) / n as f64).collect())
    }

    #[test]
    fn test_std_uniform_is_identity() {
        let b = batch(2, vec![0.1, 0.2, 0.3, 0.4]);
        let out = StdUniform::new(2).transform(&b).unwrap();
        assert_eq!(out.batch, b);
        assert!(out.weights.is_none());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let b = batch(2, vec![0.1, 0.2]);
        assert!(StdUniform::new(3).transform(&b).is_err());
        assert!(Gaussian::standard(1).unwrap().transform(&b).is_err());
    }

    #[test]
    fn test_uniform_affine_map() {
        let b = batch(2, vec![0.0, 0.5, 1.0, 0.25]);
        let out = Uniform::new(&[-1.0, 0.0], &[1.0, 4.0], 2)
            .unwrap()
            .transform(&b)
            .unwrap();
        assert_eq!(out.batch.as_slice(), &[-1.0, 2.0, 1.0, 1.0]);
        assert!(out.weights.is_none());
    }

    #[test]
    fn test_lebesgue_reports_volume() {
        let b = batch(2, vec![0.5, 0.5]);
        let out = Lebesgue::new(&[0.0], &[2.0], 2).unwrap().transform(&b).unwrap();
        assert_eq!(out.weights, Some(vec![4.0]));
        assert_eq!(out.batch.as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn test_box_rejects_empty_interval() {
        assert!(Uniform::new(&[1.0], &[1.0], 1).is_err());
        assert!(Lebesgue::new(&[0.0, 0.0], &[1.0, 1.0, 1.0], 2).is_err());
    }

    #[test]
    fn test_gaussian_median_and_scale() {
        let b = batch(2, vec![0.5, 0.5, 0.975, 0.025]);
        let g = Gaussian::new(&[1.0, -1.0], &[4.0], 2).unwrap();
        let out = g.transform(&b).unwrap().batch;
        assert!((out.row(0)[0] - 1.0).abs() < 1e-12);
        assert!((out.row(0)[1] + 1.0).abs() < 1e-12);
        assert!((out.row(1)[0] - (1.0 + 2.0 * 1.959_963_984_540_054)).abs() < 1e-6);
        assert!((out.row(1)[1] - (-1.0 - 2.0 * 1.959_963_984_540_054)).abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_boundary_points_finite() {
        let b = batch(1, vec![0.0, 1.0]);
        let out = Gaussian::standard(1).unwrap().transform(&b).unwrap();
        assert!(out.batch.as_slice().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_gaussian_rejects_bad_variance() {
        assert!(Gaussian::new(&[0.0], &[0.0], 1).is_err());
        assert!(Gaussian::new(&[0.0], &[-1.0], 3).is_err());
    }

    #[test]
    fn test_periodizations_preserve_integral() {
        // integral of x^2 over [0, 1] is 1/3 under every periodization
        let grid = midpoint_grid(4096);
        for p in [
            Periodization::None,
            Periodization::Baker,
            Periodization::C0,
            Periodization::C1,
            Periodization::C1Sin,
        ] {
            let out = p.apply(&grid).unwrap();
            let weights = out.weights.unwrap_or_else(|| vec![1.0; grid.len()]);
            let mean = out
                .batch
                .as_slice()
                .iter()
                .zip(&weights)
                .map(|(y, w)| y * y * w)
                .sum::<f64>()
                / grid.len() as f64;
            assert!((mean - 1.0 / 3.0).abs() < 1e-4, "{p:?}: {mean}");
        }
    }

    #[test]
    fn test_periodization_endpoints_fixed() {
        for p in [Periodization::C0, Periodization::C1, Periodization::C1Sin] {
            let (y0, w0) = p.map(0.0);
            let (y1, _) = p.map(1.0);
            assert!(y0.abs() < 1e-12);
            assert!((y1 - 1.0).abs() < 1e-12);
            assert!(w0.abs() < 1e-12);
        }
        assert_eq!(Periodization::Baker.map(0.5), (1.0, 1.0));
    }

    #[test]
    fn test_measure_config_build() {
        let measure = MeasureConfig::Gaussian {
            mean: vec![0.0],
            variance: vec![0.5],
        }
        .build(3)
        .unwrap();
        assert_eq!(measure.dimension(), 3);
        let bad = MeasureConfig::Uniform {
            lower: vec![0.0, 0.0],
            upper: vec![1.0],
        };
        assert!(bad.build(3).is_err());
    }

    #[test]
    fn test_reweighted_multiplies() {
        let b = batch(1, vec![0.5, 0.5]);
        let t = Transformed {
            batch: b,
            weights: Some(vec![2.0, 3.0]),
        }
        .reweighted(Some(vec![5.0, 7.0]));
        assert_eq!(t.weights, Some(vec![10.0, 21.0]));
        let t = t.reweighted(None);
        assert_eq!(t.weights, Some(vec![10.0, 21.0]));
    }
}
