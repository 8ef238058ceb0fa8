//! Sample sequence generation in the unit hypercube.
//!
//! Three backends, selected by configuration:
//! - [`Backend::Iid`]: independent uniform draws from a PCG64 stream
//! - [`Backend::Lattice`]: embedded rank-1 lattice, optionally randomly shifted
//! - [`Backend::Sobol`]: base-2 digital sequence, optionally matrix scrambled
//!   and digitally shifted
//!
//! # Prefix Invariant
//!
//! For fixed (dimension, seed, scramble, backend) every point is a pure
//! function of its index. `generate(0, n)` is therefore an exact prefix of
//! `generate(0, 2n)`, and the controller only ever asks for the new half.

mod digital;
mod iid;
mod lattice;

pub use digital::{DigitalNet, MAX_SOBOL_DIMENSION, SOBOL_CAPACITY};
pub use iid::IidUniform;
pub use lattice::{Rank1Lattice, LATTICE_CAPACITY, MAX_LATTICE_DIMENSION};

use serde::{Deserialize, Serialize};

use crate::engine::rng::CubRng;
use crate::error::{CubError, CubResult};

/// Generator family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Independent, identically distributed uniform points.
    Iid,
    /// Rank-1 lattice in radical-inverse order.
    #[default]
    Lattice,
    /// Sobol digital sequence in natural order.
    Sobol,
}

impl Backend {
    /// Largest dimension the backend's parameter table supports.
    #[must_use]
    pub const fn max_dimension(self) -> usize {
        match self {
            Self::Iid => usize::MAX,
            Self::Lattice => MAX_LATTICE_DIMENSION,
            Self::Sobol => MAX_SOBOL_DIMENSION,
        }
    }

    /// Largest number of points the backend can produce.
    #[must_use]
    pub const fn capacity(self) -> u64 {
        match self {
            Self::Iid => u64::MAX,
            Self::Lattice => LATTICE_CAPACITY,
            Self::Sobol => SOBOL_CAPACITY,
        }
    }

    /// Whether the backend is a low-discrepancy (quasi-random) construction.
    #[must_use]
    pub const fn is_low_discrepancy(self) -> bool {
        !matches!(self, Self::Iid)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Iid => "iid",
            Self::Lattice => "lattice",
            Self::Sobol => "sobol",
        };
        f.write_str(name)
    }
}

/// An ordered batch of points for the index range `[start, start + len)`.
///
/// Points are stored row-major: row `i` is `points[i*d..(i+1)*d]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    start: u64,
    dimension: usize,
    points: Vec<f64>,
    fingerprint: u64,
}

impl SampleBatch {
    /// Create a batch from row-major points.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `dimension` is zero or `points` is not a
    /// whole number of rows.
    pub fn new(start: u64, dimension: usize, points: Vec<f64>, fingerprint: u64) -> CubResult<Self> {
        if dimension == 0 {
            return Err(CubError::invalid("batch dimension must be positive"));
        }
        if points.len() % dimension != 0 {
            return Err(CubError::invalid(format!(
                "{} coordinates do not form rows of dimension {dimension}",
                points.len()
            )));
        }
        Ok(Self {
            start,
            dimension,
            points,
            fingerprint,
        })
    }

    /// Same index range and randomization tag, new coordinates.
    ///
    /// Used by measure transforms that change the dimension or values of
    /// each row without reordering rows.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the new points do not form exactly
    /// `self.len()` rows of `dimension`.
    pub fn with_points(&self, dimension: usize, points: Vec<f64>) -> CubResult<Self> {
        let batch = Self::new(self.start, dimension, points, self.fingerprint)?;
        if batch.len() != self.len() {
            return Err(CubError::invalid(format!(
                "transformed batch has {} rows, expected {}",
                batch.len(),
                self.len()
            )));
        }
        Ok(batch)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len() / self.dimension
    }

    /// Whether the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First global index covered by the batch.
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// One past the last global index covered by the batch.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.len() as u64
    }

    /// Dimension of each row.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Tag of the randomization that produced the batch.
    #[must_use]
    pub const fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Row `i` of the batch.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.points[i * self.dimension..(i + 1) * self.dimension]
    }

    /// Iterate over rows in index order.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.points.chunks_exact(self.dimension)
    }

    /// Raw row-major coordinates.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.points
    }
}

/// Randomization drawn once at generator construction.
///
/// Immutable for the generator's lifetime; the same (seed, stream,
/// backend, dimension, scramble) always yields the same state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomizationState {
    seed: u64,
    stream: u64,
    /// Lattice shift as 32-bit fractions, one per dimension.
    shift: Vec<u32>,
    /// Sobol digital shift, one per dimension.
    digital_shift: Vec<u32>,
    /// Sobol lower-triangular scramble rows, 32 per dimension.
    scramble_rows: Vec<[u32; 32]>,
}

impl RandomizationState {
    /// Draw the randomization for a generator from `rng`.
    #[must_use]
    pub fn draw(backend: Backend, dimension: usize, scramble: bool, rng: &CubRng) -> Self {
        let mut source = rng.clone();
        let mut state = Self {
            seed: rng.master_seed(),
            stream: rng.stream(),
            shift: Vec::new(),
            digital_shift: Vec::new(),
            scramble_rows: Vec::new(),
        };
        if !scramble {
            return state;
        }
        match backend {
            Backend::Iid => {}
            Backend::Lattice => {
                state.shift = (0..dimension).map(|_| source.gen_u32()).collect();
            }
            Backend::Sobol => {
                state.scramble_rows = (0..dimension)
                    .map(|_| digital::draw_scramble_rows(&mut source))
                    .collect();
                state.digital_shift = (0..dimension).map(|_| source.gen_u32()).collect();
            }
        }
        state
    }

    /// Master seed the state was drawn from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Stream index the state was drawn from.
    #[must_use]
    pub const fn stream(&self) -> u64 {
        self.stream
    }

    /// Whether any shift or scramble is applied.
    #[must_use]
    pub fn is_randomized(&self) -> bool {
        !self.shift.is_empty() || !self.digital_shift.is_empty()
    }

    /// Tag identifying this randomization.
    #[must_use]
    pub const fn fingerprint(&self) -> u64 {
        CubRng::for_stream_fingerprint(self.seed, self.stream)
    }

    pub(crate) fn lattice_shift(&self) -> &[u32] {
        &self.shift
    }

    pub(crate) fn digital_shift(&self) -> &[u32] {
        &self.digital_shift
    }

    pub(crate) fn scramble_rows(&self) -> &[[u32; 32]] {
        &self.scramble_rows
    }
}

#[derive(Debug, Clone)]
enum Points {
    Iid(IidUniform),
    Lattice(Rank1Lattice),
    Sobol(DigitalNet),
}

/// Deterministic, incrementally extensible point generator.
///
/// # Example
///
/// ```rust
/// use qmc_cubature::engine::rng::CubRng;
/// use qmc_cubature::sequence::{Backend, SequenceGenerator};
///
/// let mut gen = SequenceGenerator::new(Backend::Sobol, 3, true, &CubRng::new(7)).unwrap();
/// let first = gen.generate(0, 8).unwrap();
/// let next = gen.generate(8, 16).unwrap();
/// assert_eq!(first.len() + next.len(), 16);
/// ```
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    backend: Backend,
    dimension: usize,
    randomization: RandomizationState,
    points: Points,
    next_index: u64,
}

impl SequenceGenerator {
    /// Create a generator, drawing its randomization from `rng`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `dimension` is zero or exceeds the
    /// backend's parameter table.
    pub fn new(backend: Backend, dimension: usize, scramble: bool, rng: &CubRng) -> CubResult<Self> {
        if dimension == 0 {
            return Err(CubError::invalid("dimension must be positive"));
        }
        if dimension > backend.max_dimension() {
            return Err(CubError::invalid(format!(
                "{backend} backend supports at most {} dimensions, got {dimension}",
                backend.max_dimension()
            )));
        }

        let randomization = RandomizationState::draw(backend, dimension, scramble, rng);
        let points = match backend {
            Backend::Iid => Points::Iid(IidUniform::new(dimension, rng.clone())),
            Backend::Lattice => Points::Lattice(Rank1Lattice::new(dimension)),
            Backend::Sobol => Points::Sobol(DigitalNet::new(dimension, &randomization)),
        };

        Ok(Self {
            backend,
            dimension,
            randomization,
            points,
            next_index: 0,
        })
    }

    /// Generator family.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// Dimension of each point.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// The randomization drawn at construction.
    #[must_use]
    pub const fn randomization(&self) -> &RandomizationState {
        &self.randomization
    }

    /// Index the next contiguous request must start at.
    #[must_use]
    pub const fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Generate the points for the index range `[n_min, n_max)`.
    ///
    /// A request starting at 0 is always allowed (and restarts the
    /// contiguity context); any other request must continue exactly where
    /// the previous one ended.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an empty range or one past the backend's
    ///   capacity
    /// - `SequenceStateMismatch` for a non-contiguous continuation
    pub fn generate(&mut self, n_min: u64, n_max: u64) -> CubResult<SampleBatch> {
        if n_max <= n_min {
            return Err(CubError::invalid(format!(
                "empty index range [{n_min}, {n_max})"
            )));
        }
        if n_max > self.backend.capacity() {
            return Err(CubError::invalid(format!(
                "{} backend supports at most {} points, requested {n_max}",
                self.backend,
                self.backend.capacity()
            )));
        }
        if n_min != 0 && n_min != self.next_index {
            return Err(CubError::SequenceStateMismatch {
                expected: self.next_index,
                found: n_min,
            });
        }

        let count = usize::try_from(n_max - n_min)
            .map_err(|_| CubError::invalid(format!("batch of {} points does not fit in memory", n_max - n_min)))?;
        let points = match &self.points {
            Points::Iid(iid) => iid.fill(n_min, count),
            Points::Lattice(lattice) => lattice.fill(n_min, count, self.randomization.lattice_shift()),
            Points::Sobol(net) => net.fill(n_min, count, self.randomization.digital_shift()),
        };

        self.next_index = n_max;
        SampleBatch::new(n_min, self.dimension, points, self.randomization.fingerprint())
    }
}
