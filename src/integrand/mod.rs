//! Integrands and the evaluator that scores sample batches.
//!
//! An integrand maps an `n x d` batch to `n` reals. Plain per-row functions
//! are wrapped with [`from_row_fn`]; expensive ones can be spread over
//! threads with [`ParallelRows`], which keeps results in row order.

use std::f64::consts::PI;
use std::sync::Mutex;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

use crate::config::IntegrandKind;
use crate::error::{CubError, CubResult};
use crate::sequence::SampleBatch;
use crate::transform::{MeasureTransform, Periodization};

/// A batched real-valued function.
pub trait Integrand: Send + Sync {
    /// One value per row of `x`, in row order.
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64>;
}

impl<F> Integrand for F
where
    F: Fn(&SampleBatch) -> Vec<f64> + Send + Sync,
{
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64> {
        self(x)
    }
}

/// Integrand built from a function of one row.
#[derive(Debug, Clone, Copy)]
pub struct RowFn<F> {
    f: F,
}

/// Wrap a per-row function as a batched integrand.
///
/// # Example
///
/// ```rust
/// use qmc_cubature::integrand::{from_row_fn, Integrand};
/// use qmc_cubature::sequence::SampleBatch;
///
/// let f = from_row_fn(|x: &[f64]| x.iter().sum());
/// let batch = SampleBatch::new(0, 2, vec![0.25, 0.5, 1.0, 1.0], 0).unwrap();
/// assert_eq!(f.evaluate(&batch), vec![0.75, 2.0]);
/// ```
pub const fn from_row_fn<F>(f: F) -> RowFn<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    RowFn { f }
}

impl<F> Integrand for RowFn<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64> {
        x.rows().map(&self.f).collect()
    }
}

/// Contiguous block of rows handed to one worker.
#[derive(Debug, Clone, Copy)]
struct RowChunk {
    index: usize,
    first_row: usize,
    rows: usize,
}

/// Work-stealing, order-preserving row evaluator.
///
/// Rows are split into chunks on a global queue; idle workers steal from
/// each other so slow rows do not leave threads waiting. Results are
/// reassembled by chunk index, so row `i` always maps to value `i`.
#[derive(Debug)]
pub struct ParallelRows<F> {
    f: F,
    num_workers: usize,
    chunk_rows: usize,
}

impl<F> ParallelRows<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    /// Use one worker per available CPU.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            f,
            num_workers: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            chunk_rows: 64,
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// Set how many rows one task covers.
    #[must_use]
    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    /// Get number of workers.
    #[must_use]
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn next_task(
        worker_id: usize,
        local: &Worker<RowChunk>,
        injector: &Injector<RowChunk>,
        stealers: &[Stealer<RowChunk>],
    ) -> Option<RowChunk> {
        local.pop().or_else(|| loop {
            match injector.steal_batch_and_pop(local) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break None,
                Steal::Retry => {}
            }
        })
        .or_else(|| {
            for i in 0..stealers.len() {
                let victim = (worker_id + i + 1) % stealers.len();
                loop {
                    match stealers[victim].steal() {
                        Steal::Success(task) => return Some(task),
                        Steal::Empty => break,
                        Steal::Retry => {}
                    }
                }
            }
            None
        })
    }
}

impl<F> Integrand for ParallelRows<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64> {
        let n = x.len();
        if self.num_workers <= 1 || n <= self.chunk_rows {
            return x.rows().map(&self.f).collect();
        }

        let injector: Injector<RowChunk> = Injector::new();
        let workers: Vec<Worker<RowChunk>> =
            (0..self.num_workers).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<RowChunk>> = workers.iter().map(Worker::stealer).collect();

        for (index, first_row) in (0..n).step_by(self.chunk_rows).enumerate() {
            injector.push(RowChunk {
                index,
                first_row,
                rows: self.chunk_rows.min(n - first_row),
            });
        }

        let results: Mutex<Vec<(usize, Vec<f64>)>> = Mutex::new(Vec::new());

        std::thread::scope(|s| {
            for (worker_id, local) in workers.into_iter().enumerate() {
                let injector = &injector;
                let stealers = &stealers;
                let results = &results;
                let f = &self.f;

                s.spawn(move || {
                    while let Some(task) = Self::next_task(worker_id, &local, injector, stealers) {
                        let values: Vec<f64> = (task.first_row..task.first_row + task.rows)
                            .map(|i| f(x.row(i)))
                            .collect();
                        if let Ok(mut guard) = results.lock() {
                            guard.push((task.index, values));
                        }
                    }
                });
            }
        });

        let mut chunks = results.into_inner().unwrap_or_default();
        chunks.sort_by_key(|(index, _)| *index);
        chunks.into_iter().flat_map(|(_, values)| values).collect()
    }
}

/// Keister's test function `pi^(d/2) * cos(||x||)`.
///
/// Under a Gaussian with variance 1/2 per coordinate its mean equals
/// `integral of cos(||x||) exp(-||x||^2)` over `R^d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keister {
    dimension: usize,
}

impl Keister {
    /// Keister function in `dimension` dimensions.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Integrand for Keister {
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let scale = PI.powf(self.dimension as f64 / 2.0);
        x.rows()
            .map(|row| scale * row.iter().map(|v| v * v).sum::<f64>().sqrt().cos())
            .collect()
    }
}

/// Sum of coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Linear;

impl Integrand for Linear {
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64> {
        x.rows().map(|row| row.iter().sum()).collect()
    }
}

/// `||x||^sqrt(||x||)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormPower;

impl Integrand for NormPower {
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64> {
        x.rows()
            .map(|row| {
                let r = row.iter().map(|v| v * v).sum::<f64>().sqrt();
                r.powf(r.sqrt())
            })
            .collect()
    }
}

/// One of the built-in integrands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltIn {
    /// See [`Keister`].
    Keister(Keister),
    /// See [`Linear`].
    Linear(Linear),
    /// See [`NormPower`].
    NormPower(NormPower),
}

impl BuiltIn {
    /// Instantiate a built-in for `dimension`.
    #[must_use]
    pub const fn new(kind: IntegrandKind, dimension: usize) -> Self {
        match kind {
            IntegrandKind::Keister => Self::Keister(Keister::new(dimension)),
            IntegrandKind::Linear => Self::Linear(Linear),
            IntegrandKind::NormPower => Self::NormPower(NormPower),
        }
    }
}

impl Integrand for BuiltIn {
    fn evaluate(&self, x: &SampleBatch) -> Vec<f64> {
        match self {
            Self::Keister(f) => f.evaluate(x),
            Self::Linear(f) => f.evaluate(x),
            Self::NormPower(f) => f.evaluate(x),
        }
    }
}

/// Integrand values tagged with the index range and randomization that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedBatch {
    /// First global sample index.
    pub start: u64,
    /// Randomization fingerprint of the source batch.
    pub fingerprint: u64,
    /// One weighted value per row.
    pub values: Vec<f64>,
}

impl EvaluatedBatch {
    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Periodize, transform, evaluate, weight.
pub struct Evaluator<'a, I: Integrand + ?Sized> {
    integrand: &'a I,
    measure: &'a dyn MeasureTransform,
    periodization: Periodization,
}

impl<'a, I: Integrand + ?Sized> Evaluator<'a, I> {
    /// Evaluator for `integrand` under `measure`.
    pub fn new(
        integrand: &'a I,
        measure: &'a dyn MeasureTransform,
        periodization: Periodization,
    ) -> Self {
        Self {
            integrand,
            measure,
            periodization,
        }
    }

    /// Score a unit-cube batch. The batch itself is not modified.
    ///
    /// # Errors
    ///
    /// - `IntegrandShape` if the integrand does not return exactly one
    ///   value per row
    /// - transform errors (dimension mismatch)
    pub fn evaluate(&self, batch: &SampleBatch) -> CubResult<EvaluatedBatch> {
        let periodized = self.periodization.apply(batch)?;
        let mapped = self.measure.transform(&periodized.batch)?;
        let target = mapped.reweighted(periodized.weights);

        let raw = self.integrand.evaluate(&target.batch);
        let n = batch.len();
        let mut values = match raw.len() {
            len if len == n => raw,
            returned => {
                return Err(CubError::IntegrandShape {
                    batch_size: n,
                    returned,
                })
            }
        };

        if let Some(weights) = target.weights {
            for (value, weight) in values.iter_mut().zip(weights) {
                *value *= weight;
            }
        }

        Ok(EvaluatedBatch {
            start: batch.start(),
            fingerprint: batch.fingerprint(),
            values,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transform::{Gaussian, Lebesgue, StdUniform};

    fn grid(n: usize, d: usize) -> SampleBatch {
        let points = (0..n * d).map(|j| ((j / d) as f64 + 0.5) / n as f64).collect();
        SampleBatch::new(0, d, points, 5).unwrap()
    }

    #[test]
    fn test_row_fn_matches_rows() {
        let f = from_row_fn(|x: &[f64]| x[0] * 10.0 + x[1]);
        let batch = SampleBatch::new(0, 2, vec![1.0, 2.0, 3.0, 4.0], 0).unwrap();
        assert_eq!(f.evaluate(&batch), vec![12.0, 34.0]);
    }

    #[test]
    fn test_closure_integrand() {
        let f = |x: &SampleBatch| vec![1.0; x.len()];
        let batch = grid(4, 1);
        assert_eq!(f.evaluate(&batch), vec![1.0; 4]);
    }

    #[test]
    fn test_parallel_rows_preserves_order() {
        let batch = SampleBatch::new(0, 1, (0..1000).map(f64::from).collect(), 0).unwrap();
        let serial = from_row_fn(|x: &[f64]| x[0] * 2.0).evaluate(&batch);
        let parallel = ParallelRows::new(|x: &[f64]| x[0] * 2.0)
            .with_workers(4)
            .with_chunk_rows(7)
            .evaluate(&batch);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_parallel_rows_single_worker() {
        let batch = grid(10, 2);
        let f = ParallelRows::new(|x: &[f64]| x[1]).with_workers(1);
        assert_eq!(f.num_workers(), 1);
        assert_eq!(f.evaluate(&batch).len(), 10);
    }

    #[test]
    fn test_keister_at_origin() {
        let batch = SampleBatch::new(0, 2, vec![0.0, 0.0], 0).unwrap();
        let v = Keister::new(2).evaluate(&batch);
        assert!((v[0] - PI).abs() < 1e-12);
    }

    #[test]
    fn test_norm_power_values() {
        let batch = SampleBatch::new(0, 1, vec![0.0, 1.0, 0.25], 0).unwrap();
        let v = NormPower.evaluate(&batch);
        assert!((v[0] - 1.0).abs() < 1e-12);
        assert!((v[1] - 1.0).abs() < 1e-12);
        assert!((v[2] - 0.25f64.powf(0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_evaluator_tags_batch() {
        let measure = StdUniform::new(1);
        let eval = Evaluator::new(&Linear, &measure, Periodization::None);
        let out = eval.evaluate(&grid(8, 1)).unwrap();
        assert_eq!(out.start, 0);
        assert_eq!(out.fingerprint, 5);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_evaluator_single_row_scalar() {
        let measure = StdUniform::new(2);
        let constant = |_: &SampleBatch| vec![3.0];
        let eval = Evaluator::new(&constant, &measure, Periodization::None);
        assert_eq!(eval.evaluate(&grid(1, 2)).unwrap().values, vec![3.0]);
    }

    #[test]
    fn test_evaluator_rejects_scalar_for_many_rows() {
        let measure = StdUniform::new(2);
        let summed = |x: &SampleBatch| vec![x.rows().map(|r| r[0]).sum::<f64>()];
        let eval = Evaluator::new(&summed, &measure, Periodization::None);
        let err = eval.evaluate(&grid(5, 2)).unwrap_err();
        assert!(matches!(
            err,
            CubError::IntegrandShape {
                batch_size: 5,
                returned: 1
            }
        ));
    }

    #[test]
    fn test_evaluator_shape_error() {
        let measure = StdUniform::new(1);
        let wrong = |_: &SampleBatch| vec![1.0, 2.0];
        let eval = Evaluator::new(&wrong, &measure, Periodization::None);
        let err = eval.evaluate(&grid(5, 1)).unwrap_err();
        assert!(matches!(
            err,
            CubError::IntegrandShape {
                batch_size: 5,
                returned: 2
            }
        ));
    }

    #[test]
    fn test_evaluator_applies_jacobian() {
        let measure = Lebesgue::new(&[0.0], &[2.0], 1).unwrap();
        let eval = Evaluator::new(&Linear, &measure, Periodization::None);
        let out = eval.evaluate(&grid(4, 1)).unwrap();
        // integral of x over [0, 2] is 2
        let mean = out.values.iter().sum::<f64>() / 4.0;
        assert!((mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_evaluator_periodization_keeps_mean() {
        let measure = StdUniform::new(1);
        let f = from_row_fn(|x: &[f64]| x[0] * x[0]);
        let eval = Evaluator::new(&f, &measure, Periodization::C1);
        let out = eval.evaluate(&grid(2048, 1)).unwrap();
        let mean = out.values.iter().sum::<f64>() / 2048.0;
        assert!((mean - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_evaluator_rejects_measure_dimension_mismatch() {
        let measure = Gaussian::standard(3).unwrap();
        let eval = Evaluator::new(&Linear, &measure, Periodization::None);
        assert!(eval.evaluate(&grid(4, 2)).is_err());
    }

    #[test]
    fn test_builtin_dispatch() {
        let batch = grid(3, 2);
        assert_eq!(
            BuiltIn::new(IntegrandKind::Linear, 2).evaluate(&batch),
            Linear.evaluate(&batch)
        );
        assert_eq!(
            BuiltIn::new(IntegrandKind::Keister, 2).evaluate(&batch),
            Keister::new(2).evaluate(&batch)
        );
    }
}
