//! Base-2 digital (Sobol) sequence.
//!
//! Direction numbers follow the Joe-Kuo primitive-polynomial table; the
//! first coordinate is the van der Corput sequence. Points are produced in
//! natural (not Gray-code) order so that the first `2^m` points form a
//! `(t, m, d)`-net and the spectrum of the first `2^m` values is a Walsh
//! transform in index order.
//!
//! Randomization is a linear matrix scramble (random lower-triangular
//! matrix with unit diagonal, applied to the generator columns) followed by
//! a digital shift. Both preserve the net property.

use crate::engine::rng::CubRng;

use super::RandomizationState;

/// Largest supported dimension.
pub const MAX_SOBOL_DIMENSION: usize = 21;

/// Largest supported number of points (2^32).
pub const SOBOL_CAPACITY: u64 = 1 << 32;

const BITS: usize = 32;

const SCALE: f64 = 1.0 / 4_294_967_296.0;

/// (degree, polynomial coefficients, initial direction numbers) for
/// dimensions 2 and up.
const JOE_KUO: [(u32, u32, &[u32]); MAX_SOBOL_DIMENSION - 1] = [
    (1, 0, &[1]),
    (2, 1, &[1, 3]),
    (3, 1, &[1, 3, 1]),
    (3, 2, &[1, 1, 1]),
    (4, 1, &[1, 1, 3, 3]),
    (4, 4, &[1, 3, 5, 13]),
    (5, 2, &[1, 1, 5, 5, 17]),
    (5, 4, &[1, 1, 5, 5, 5]),
    (5, 7, &[1, 1, 7, 11, 19]),
    (5, 11, &[1, 1, 5, 1, 1]),
    (5, 13, &[1, 1, 1, 3, 11]),
    (5, 14, &[1, 3, 5, 5, 31]),
    (6, 1, &[1, 3, 3, 9, 7, 49]),
    (6, 13, &[1, 1, 1, 15, 21, 21]),
    (6, 16, &[1, 3, 1, 13, 27, 49]),
    (6, 19, &[1, 1, 1, 15, 7, 5]),
    (6, 22, &[1, 3, 1, 15, 13, 25]),
    (6, 25, &[1, 1, 5, 5, 19, 61]),
    (7, 1, &[1, 3, 7, 11, 23, 15, 103]),
    (7, 4, &[1, 3, 7, 13, 13, 15, 69]),
];

/// Generator columns for one coordinate, most significant bit first.
type Columns = [u32; BITS];

fn van_der_corput_columns() -> Columns {
    let mut v = [0u32; BITS];
    for (k, col) in v.iter_mut().enumerate() {
        *col = 1 << (BITS - 1 - k);
    }
    v
}

fn direction_columns(degree: u32, coefficients: u32, initial: &[u32]) -> Columns {
    let s = degree as usize;
    let mut v = [0u32; BITS];
    for (k, &m) in initial.iter().enumerate() {
        v[k] = m << (BITS - 1 - k);
    }
    for k in s..BITS {
        let mut next = v[k - s] ^ (v[k - s] >> s);
        for j in 1..s {
            if (coefficients >> (s - 1 - j)) & 1 == 1 {
                next ^= v[k - j];
            }
        }
        v[k] = next;
    }
    v
}

/// Random lower-triangular rows with unit diagonal, one per output digit.
pub(super) fn draw_scramble_rows(rng: &mut CubRng) -> Columns {
    let mut rows = [0u32; BITS];
    for (r, row) in rows.iter_mut().enumerate() {
        let above = if r == 0 { 0 } else { u32::MAX << (BITS - r) };
        *row = (rng.gen_u32() & above) | (1 << (BITS - 1 - r));
    }
    rows
}

fn scramble(rows: &Columns, column: u32) -> u32 {
    rows.iter().enumerate().fold(0u32, |out, (r, &row)| {
        out | (((row & column).count_ones() & 1) << (BITS - 1 - r))
    })
}

/// Sobol generator columns, scrambled when the randomization carries a
/// matrix scramble.
#[derive(Debug, Clone)]
pub struct DigitalNet {
    columns: Vec<Columns>,
}

impl DigitalNet {
    /// Net in `dimension` dimensions. The caller checks the bound.
    #[must_use]
    pub fn new(dimension: usize, randomization: &RandomizationState) -> Self {
        let dimension = dimension.min(MAX_SOBOL_DIMENSION);
        let mut columns: Vec<Columns> = std::iter::once(van_der_corput_columns())
            .chain(
                JOE_KUO
                    .iter()
                    .map(|&(s, a, m)| direction_columns(s, a, m)),
            )
            .take(dimension)
            .collect();

        for (cols, rows) in columns.iter_mut().zip(randomization.scramble_rows()) {
            for col in cols.iter_mut() {
                *col = scramble(rows, *col);
            }
        }

        Self { columns }
    }

    /// Row-major coordinates of points `[start, start + count)`.
    ///
    /// `shift` holds one digital shift per dimension, or is empty.
    #[must_use]
    pub fn fill(&self, start: u64, count: usize, shift: &[u32]) -> Vec<f64> {
        let d = self.columns.len();
        let mut points = Vec::with_capacity(count * d);
        for i in start..start + count as u64 {
            for (k, cols) in self.columns.iter().enumerate() {
                let mut x = shift.get(k).copied().unwrap_or(0);
                let mut bits = i;
                let mut bit = 0;
                while bits != 0 {
                    if bits & 1 == 1 {
                        x ^= cols[bit];
                    }
                    bits >>= 1;
                    bit += 1;
                }
                points.push(f64::from(x) * SCALE);
            }
        }
        points
    }
}
