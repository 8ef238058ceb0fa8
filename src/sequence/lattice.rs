//! Embedded rank-1 lattice.
//!
//! Point `i` is `frac(phi2(i) * z + shift)` where `phi2` is the base-2
//! radical inverse. Ordering by radical inverse makes every power-of-two
//! prefix a complete lattice of that size. All arithmetic is done in 32-bit
//! fixed point so points are exact and platform independent.

/// Largest supported dimension.
pub const MAX_LATTICE_DIMENSION: usize = 20;

/// Largest supported number of points (2^20).
pub const LATTICE_CAPACITY: u64 = 1 << 20;

/// Extensible generating vector, good up to 2^20 points.
const GENERATING_VECTOR: [u64; MAX_LATTICE_DIMENSION] = [
    1, 182_667, 469_891, 498_753, 110_745, 446_247, 250_185, 118_627, 245_333, 283_199,
    408_519, 391_023, 246_327, 126_539, 399_185, 461_527, 300_343, 69_681, 516_695, 436_179,
];

const SCALE: f64 = 1.0 / 4_294_967_296.0;

/// Rank-1 lattice over the first `dimension` generating-vector entries.
#[derive(Debug, Clone)]
pub struct Rank1Lattice {
    z: Vec<u64>,
}

impl Rank1Lattice {
    /// Lattice in `dimension` dimensions. The caller checks the bound.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            z: GENERATING_VECTOR[..dimension.min(MAX_LATTICE_DIMENSION)].to_vec(),
        }
    }

    /// Row-major coordinates of points `[start, start + count)`.
    ///
    /// `shift` holds one 32-bit fraction per dimension, or is empty for the
    /// unshifted lattice.
    #[must_use]
    pub fn fill(&self, start: u64, count: usize, shift: &[u32]) -> Vec<f64> {
        let d = self.z.len();
        let mut points = Vec::with_capacity(count * d);
        for i in start..start + count as u64 {
            #[allow(clippy::cast_possible_truncation)]
            let phi = u64::from((i as u32).reverse_bits());
            for (k, &z) in self.z.iter().enumerate() {
                let base = phi.wrapping_mul(z) & 0xFFFF_FFFF;
                let shifted = shift
                    .get(k)
                    .map_or(base, |&s| (base + u64::from(s)) & 0xFFFF_FFFF);
                #[allow(clippy::cast_precision_loss)]
                points.push(shifted as f64 * SCALE);
            }
        }
        points
    }
}
