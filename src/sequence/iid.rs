//! Independent uniform points.

use crate::engine::rng::CubRng;

/// IID uniform points drawn from one PCG64 stream.
///
/// Coordinate `k` of point `i` is draw `i * d + k` of the stream. Jumping
/// ahead to the batch start keeps every point a pure function of its index.
#[derive(Debug, Clone)]
pub struct IidUniform {
    dimension: usize,
    stream: CubRng,
}

impl IidUniform {
    /// Points of dimension `dimension` drawn from `stream`.
    #[must_use]
    pub const fn new(dimension: usize, stream: CubRng) -> Self {
        Self { dimension, stream }
    }

    /// Row-major coordinates of points `[start, start + count)`.
    #[must_use]
    pub fn fill(&self, start: u64, count: usize) -> Vec<f64> {
        let offset = u128::from(start) * self.dimension as u128;
        let mut rng = self.stream.jumped(offset);
        rng.sample_n(count * self.dimension)
    }
}
