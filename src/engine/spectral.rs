//! Fast transforms of integrand values over embedded point sets.
//!
//! For a digital net in natural order the values' Walsh coefficients come
//! from an in-place Walsh-Hadamard butterfly. For a rank-1 lattice in
//! radical-inverse order the input is already bit-reversed with respect to
//! the lattice index, so a decimation-in-time FFT without the permutation
//! step yields the Fourier coefficients in natural order.
//!
//! Both transforms are normalized (each stage halves), so coefficient 0 is
//! the sample mean. Doubling the point set only transforms the new half and
//! then runs the final butterfly stage, which is O(n).
//!
//! Coefficient positions are re-mapped by a wavenumber map `kappa` so that
//! magnitudes decrease along dyadic levels; level `l >= 1` holds positions
//! `[2^(l-1), 2^l)`.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

use crate::error::{CubError, CubResult};

/// Complex number for transform coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    /// Real part.
    pub re: f64,
    /// Imaginary part.
    pub im: f64,
}

impl Complex {
    /// Create from parts.
    #[must_use]
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Real number.
    #[must_use]
    pub const fn real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }

    /// `exp(-2 pi i * k / period)`.
    #[must_use]
    pub fn twiddle(k: usize, period: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let angle = -2.0 * PI * k as f64 / period as f64;
        Self::new(angle.cos(), angle.sin())
    }

    /// Modulus.
    #[must_use]
    pub fn norm(self) -> f64 {
        self.re.hypot(self.im)
    }

    fn half(self) -> Self {
        Self::new(0.5 * self.re, 0.5 * self.im)
    }
}

impl Add for Complex {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// Orthogonal basis matched to a point-set family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralBasis {
    /// Walsh functions, for base-2 digital nets.
    Walsh,
    /// Complex exponentials, for rank-1 lattices.
    Fourier,
}

impl SpectralBasis {
    /// One butterfly stage over blocks of `2 * half` entries.
    fn stage(self, data: &mut [Complex], half: usize) {
        let twiddles: Vec<Complex> = match self {
            Self::Walsh => vec![Complex::real(1.0); half],
            Self::Fourier => (0..half).map(|k| Complex::twiddle(k, 2 * half)).collect(),
        };
        for block in data.chunks_exact_mut(2 * half) {
            let (even, odd) = block.split_at_mut(half);
            for ((e, o), w) in even.iter_mut().zip(odd.iter_mut()).zip(&twiddles) {
                let a = *e;
                let b = *o * *w;
                *e = (a + b).half();
                *o = (a - b).half();
            }
        }
    }

    /// Full normalized transform of a power-of-two length slice.
    fn transform(self, data: &mut [Complex]) {
        let mut half = 1;
        while half < data.len() {
            self.stage(data, half);
            half *= 2;
        }
    }
}

/// Transform coefficients of all values folded so far, with their
/// wavenumber map.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    basis: SpectralBasis,
    coefficients: Vec<Complex>,
    kappa: Vec<usize>,
}

impl Spectrum {
    /// Empty spectrum.
    #[must_use]
    pub const fn new(basis: SpectralBasis) -> Self {
        Self {
            basis,
            coefficients: Vec::new(),
            kappa: Vec::new(),
        }
    }

    /// Basis of the coefficients.
    #[must_use]
    pub const fn basis(&self) -> SpectralBasis {
        self.basis
    }

    /// Number of coefficients (equal to the number of values folded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    /// Whether nothing has been folded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// `m` with `len() == 2^m`.
    #[must_use]
    pub fn log2_len(&self) -> u32 {
        self.coefficients.len().trailing_zeros()
    }

    /// Coefficient 0, the sample mean.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.coefficients.first().map_or(0.0, |c| c.re)
    }

    /// Magnitude of the coefficient at mapped position `p`.
    #[must_use]
    pub fn magnitude(&self, p: usize) -> f64 {
        self.coefficients[self.kappa[p]].norm()
    }

    /// Sum of mapped magnitudes on dyadic level `level`.
    ///
    /// Level 0 is the mean; level `l >= 1` covers positions
    /// `[2^(l-1), 2^l)`. Levels past the current size sum to zero.
    #[must_use]
    pub fn level_sum(&self, level: u32) -> f64 {
        let (lo, hi) = if level == 0 {
            (0, 1)
        } else {
            (1usize << (level - 1), 1usize << level)
        };
        let hi = hi.min(self.len());
        (lo..hi).map(|p| self.magnitude(p)).sum()
    }

    /// Level sums for levels `0..=m`.
    #[must_use]
    pub fn level_sums(&self) -> Vec<f64> {
        if self.is_empty() {
            return Vec::new();
        }
        (0..=self.log2_len()).map(|l| self.level_sum(l)).collect()
    }

    /// Fold values for the next index range.
    ///
    /// The first call takes `2^m` values; each later call must double the
    /// size exactly. After a doubling only the `r_lag` newest levels of the
    /// wavenumber map are re-sorted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a non-power-of-two first batch or a
    /// later batch that does not double the size.
    pub fn extend(&mut self, values: &[f64], r_lag: u32) -> CubResult<()> {
        let mut fresh: Vec<Complex> = values.iter().copied().map(Complex::real).collect();

        if self.is_empty() {
            if !fresh.len().is_power_of_two() {
                return Err(CubError::invalid(format!(
                    "spectral fold needs a power-of-two batch, got {}",
                    fresh.len()
                )));
            }
            self.basis.transform(&mut fresh);
            self.coefficients = fresh;
            self.kappa = (0..self.coefficients.len()).collect();
            let m = self.log2_len();
            self.remap((1..m).rev());
            return Ok(());
        }

        let n = self.len();
        if fresh.len() != n {
            return Err(CubError::invalid(format!(
                "spectral fold over {n} values can only double, got {} new values",
                fresh.len()
            )));
        }

        self.basis.transform(&mut fresh);
        self.coefficients.extend(fresh);
        self.basis.stage(&mut self.coefficients, n);

        self.kappa.extend_from_within(..);
        for k in &mut self.kappa[n..] {
            *k += n;
        }

        let m = self.log2_len();
        let lowest = m.saturating_sub(r_lag).max(1);
        self.remap((lowest..m).rev());
        Ok(())
    }

    /// Swap mapped pairs so that within each level the larger magnitude
    /// sits at the lower position.
    fn remap(&mut self, levels: impl Iterator<Item = u32>) {
        let n = self.len();
        for l in levels {
            let nl = 1usize << l;
            let flips: Vec<usize> = (1..nl)
                .filter(|&p| self.magnitude(p + nl) > self.magnitude(p))
                .collect();
            for a in (0..n).step_by(2 * nl) {
                for &p in &flips {
                    self.kappa.swap(p + a, p + nl + a);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn naive_walsh(values: &[f64]) -> Vec<f64> {
        let n = values.len();
        (0..n)
            .map(|k| {
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| if (k & i).count_ones() % 2 == 0 { *v } else { -*v })
                    .sum::<f64>()
                    / n as f64
            })
            .collect()
    }

    fn bit_reverse(i: usize, bits: u32) -> usize {
        if bits == 0 {
            0
        } else {
            i.reverse_bits() >> (usize::BITS - bits)
        }
    }

    /// DFT over the lattice index `j` of values stored in bit-reversed order.
    fn naive_fourier(values: &[f64]) -> Vec<Complex> {
        let n = values.len();
        let bits = n.trailing_zeros();
        (0..n)
            .map(|k| {
                let mut acc = Complex::default();
                for (i, v) in values.iter().enumerate() {
                    let j = bit_reverse(i, bits);
                    acc = acc + Complex::twiddle(j * k % n, n) * Complex::real(*v);
                }
                Complex::new(acc.re / n as f64, acc.im / n as f64)
            })
            .collect()
    }

    fn sample(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 7 + 3) % 11) as f64 - 4.5).collect()
    }

    #[test]
    fn test_walsh_matches_naive() {
        let values = sample(16);
        let mut spectrum = Spectrum::new(SpectralBasis::Walsh);
        spectrum.extend(&values, 4).unwrap();
        let expected = naive_walsh(&values);
        for (c, e) in spectrum.coefficients.iter().zip(&expected) {
            assert!((c.re - e).abs() < 1e-12);
            assert!(c.im.abs() < 1e-12);
        }
    }

    #[test]
    fn test_fourier_matches_naive() {
        let values = sample(32);
        let mut spectrum = Spectrum::new(SpectralBasis::Fourier);
        spectrum.extend(&values, 4).unwrap();
        for (c, e) in spectrum.coefficients.iter().zip(naive_fourier(&values)) {
            assert!((c.re - e.re).abs() < 1e-12, "{c:?} vs {e:?}");
            assert!((c.im - e.im).abs() < 1e-12, "{c:?} vs {e:?}");
        }
    }

    #[test]
    fn test_doubling_merge_matches_full_transform() {
        for basis in [SpectralBasis::Walsh, SpectralBasis::Fourier] {
            let values = sample(64);
            let mut incremental = Spectrum::new(basis);
            incremental.extend(&values[..16], 2).unwrap();
            incremental.extend(&values[16..32], 2).unwrap();
            incremental.extend(&values[32..], 2).unwrap();

            let mut full = Spectrum::new(basis);
            full.extend(&values, 2).unwrap();

            for (a, b) in incremental.coefficients.iter().zip(&full.coefficients) {
                assert!((*a - *b).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn test_mean_is_first_coefficient() {
        let values = sample(8);
        let mut spectrum = Spectrum::new(SpectralBasis::Fourier);
        spectrum.extend(&values, 1).unwrap();
        let mean = values.iter().sum::<f64>() / 8.0;
        assert!((spectrum.mean() - mean).abs() < 1e-12);
    }

    #[test]
    fn test_kappa_is_permutation_fixing_zero() {
        let values = sample(128);
        let mut spectrum = Spectrum::new(SpectralBasis::Walsh);
        spectrum.extend(&values[..64], 3).unwrap();
        spectrum.extend(&values[64..], 3).unwrap();
        assert_eq!(spectrum.kappa[0], 0);
        let mut sorted = spectrum.kappa.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..128).collect::<Vec<_>>());
    }

    #[test]
    fn test_remap_orders_pairs_on_initial_fold() {
        let values = sample(32);
        let mut spectrum = Spectrum::new(SpectralBasis::Walsh);
        spectrum.extend(&values, 4).unwrap();
        // after the top-level pass every pair (p, p + 16) is ordered
        for p in 1..16 {
            assert!(spectrum.magnitude(p) >= spectrum.magnitude(p + 16));
        }
    }

    #[test]
    fn test_level_sums_partition_all_magnitudes() {
        let values = sample(64);
        let mut spectrum = Spectrum::new(SpectralBasis::Fourier);
        spectrum.extend(&values, 4).unwrap();
        let total: f64 = spectrum.coefficients.iter().map(|c| c.norm()).sum();
        let levels = spectrum.level_sums();
        assert_eq!(levels.len(), 7);
        assert!((levels.iter().sum::<f64>() - total).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let mut spectrum = Spectrum::new(SpectralBasis::Walsh);
        assert!(spectrum.extend(&[1.0, 2.0, 3.0], 1).is_err());
        spectrum.extend(&[1.0, 2.0, 3.0, 4.0], 1).unwrap();
        assert!(spectrum.extend(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn test_constant_values_have_no_oscillation() {
        let mut spectrum = Spectrum::new(SpectralBasis::Fourier);
        spectrum.extend(&[2.5; 16], 2).unwrap();
        assert!((spectrum.mean() - 2.5).abs() < 1e-12);
        for l in 1..=4 {
            assert!(spectrum.level_sum(l) < 1e-12);
        }
    }
}
