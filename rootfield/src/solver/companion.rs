//! Polynomial roots as eigenvalues of the companion matrix.
//!
//! For a monic p(x) = xⁿ + aₙ₋₁xⁿ⁻¹ + ... + a₀ the companion matrix
//!
//! ```text
//! C = [ -aₙ₋₁ -aₙ₋₂ ... -a₁ -a₀ ]
//!     [  1     0    ...  0   0  ]
//!     [  0     1    ...  0   0  ]
//!     [  .     .    ...  .   .  ]
//!     [  0     0    ...  1   0  ]
//! ```
//!
//! is already upper Hessenberg, so it is balanced and handed straight to a
//! complex single-shift QR iteration (Givens rotations, Wilkinson shift,
//! deflation from the bottom of the active block).

use num_complex::Complex64;
use num_traits::Zero;

use super::{RootSet, RowFailure};

// =============================================================================
// CONFIGURATION
// =============================================================================
const EPS: f64 = f64::EPSILON;
/// QR sweeps allowed per eigenvalue before the row is given up.
const MAX_ITERATIONS_PER_ROOT: usize = 30;
/// Every this many stalled sweeps an exceptional shift is used.
const EXCEPTIONAL_SHIFT_PERIOD: usize = 10;
const EXCEPTIONAL_SHIFT_SCALE: f64 = 0.75;
const RADIX: f64 = 2.0;
const MAX_BALANCE_SWEEPS: usize = 64;

/// Roots of the polynomial with descending coefficients `coeffs`.
///
/// The caller guarantees finite coefficients. Leading coefficients that are
/// negligible against the largest one are dropped, so the row yields fewer
/// roots than its nominal degree; an all-zero row is a failure. Trailing
/// zero coefficients give exact zero roots.
pub fn roots(coeffs: &[Complex64]) -> Result<RootSet, RowFailure> {
    let scale = coeffs.iter().map(|c| c.norm()).fold(0.0, f64::max);
    let leading = coeffs.iter().take_while(|c| c.norm() <= EPS * scale).count();
    if leading == coeffs.len() {
        return Err(RowFailure::VanishingLeading);
    }
    let coeffs = &coeffs[leading..];

    let trailing_zeros = coeffs.iter().rev().take_while(|c| c.is_zero()).count();
    let reduced = &coeffs[..coeffs.len() - trailing_zeros];

    let mut roots = Vec::with_capacity(coeffs.len().saturating_sub(1));
    if reduced.len() > 1 {
        let n = reduced.len() - 1;
        let mut h = companion(reduced);
        balance(&mut h, n);
        eigenvalues(&mut h, n, &mut roots)?;
    }
    roots.extend(std::iter::repeat(Complex64::zero()).take(trailing_zeros));
    Ok(roots)
}

// Row-major n×n, first row carries the normalised coefficients.
fn companion(coeffs: &[Complex64]) -> Vec<Complex64> {
    let n = coeffs.len() - 1;
    let lead = coeffs[0];
    let mut h = vec![Complex64::zero(); n * n];
    for (j, c) in coeffs[1..].iter().enumerate() {
        h[j] = -c / lead;
    }
    for i in 1..n {
        h[i * n + i - 1] = Complex64::new(1.0, 0.0);
    }
    h
}

fn l1(z: Complex64) -> f64 {
    z.re.abs() + z.im.abs()
}

// Diagonal similarity with powers of two so row and column norms match.
fn balance(h: &mut [Complex64], n: usize) {
    let radix_sq = RADIX * RADIX;
    for _ in 0..MAX_BALANCE_SWEEPS {
        let mut converged = true;
        for i in 0..n {
            let mut row = 0.0;
            let mut col = 0.0;
            for j in (0..n).filter(|&j| j != i) {
                row += l1(h[i * n + j]);
                col += l1(h[j * n + i]);
            }
            if row == 0.0 || col == 0.0 {
                continue;
            }
            let total = row + col;
            let mut f = 1.0;
            let mut c = col;
            let low = row / RADIX;
            while c < low {
                f *= RADIX;
                c *= radix_sq;
            }
            let high = row * RADIX;
            while c > high {
                f /= RADIX;
                c /= radix_sq;
            }
            if (c + row) / f < 0.95 * total {
                converged = false;
                let g = 1.0 / f;
                for j in 0..n {
                    h[i * n + j] *= g;
                    h[j * n + i] *= f;
                }
            }
        }
        if converged {
            break;
        }
    }
}

fn wilkinson_shift(a: Complex64, b: Complex64, c: Complex64, d: Complex64) -> Complex64 {
    // eigenvalue of [[a, b], [c, d]] nearest d
    let p = (a - d) * 0.5;
    let disc = (p * p + b * c).sqrt();
    let denom = if (p + disc).norm() >= (p - disc).norm() { p + disc } else { p - disc };
    if denom.is_zero() {
        d
    } else {
        d - b * c / denom
    }
}

fn eigenvalues(h: &mut [Complex64], n: usize, out: &mut RootSet) -> Result<(), RowFailure> {
    let at = |i: usize, j: usize| i * n + j;
    let mut rotations = vec![(Complex64::zero(), Complex64::zero()); n];
    let mut hi = n;
    let mut iterations = 0;

    while hi > 0 {
        let last = hi - 1;
        let l = (1..=last)
            .rev()
            .find(|&k| h[at(k, k - 1)].norm() <= EPS * (h[at(k - 1, k - 1)].norm() + h[at(k, k)].norm()))
            .unwrap_or(0);
        if l > 0 {
            h[at(l, l - 1)] = Complex64::zero();
        }
        if l == last {
            out.push(h[at(last, last)]);
            hi = last;
            iterations = 0;
            continue;
        }

        iterations += 1;
        if iterations > MAX_ITERATIONS_PER_ROOT {
            return Err(RowFailure::NoConvergence);
        }
        let shift = if iterations % EXCEPTIONAL_SHIFT_PERIOD == 0 {
            let kick = h[at(last, last - 1)].norm() + if last >= 2 { h[at(last - 1, last - 2)].norm() } else { 0.0 };
            h[at(last, last)] + Complex64::new(EXCEPTIONAL_SHIFT_SCALE * kick, 0.0)
        } else {
            wilkinson_shift(
                h[at(last - 1, last - 1)],
                h[at(last - 1, last)],
                h[at(last, last - 1)],
                h[at(last, last)],
            )
        };

        for k in l..=last {
            h[at(k, k)] -= shift;
        }

        // H - μI = QR, rotating rows k, k+1 to zero the subdiagonal
        for k in l..last {
            let x = h[at(k, k)];
            let y = h[at(k + 1, k)];
            let r = (x.norm_sqr() + y.norm_sqr()).sqrt();
            let (c, s) = if r == 0.0 {
                (Complex64::new(1.0, 0.0), Complex64::zero())
            } else {
                (x / r, y / r)
            };
            rotations[k] = (c, s);
            for j in k..=last {
                let u = h[at(k, j)];
                let v = h[at(k + 1, j)];
                h[at(k, j)] = c.conj() * u + s.conj() * v;
                h[at(k + 1, j)] = -s * u + c * v;
            }
        }

        // RQ: apply the adjoint rotations from the right
        for k in l..last {
            let (c, s) = rotations[k];
            for i in l..=k + 1 {
                let p = h[at(i, k)];
                let q = h[at(i, k + 1)];
                h[at(i, k)] = p * c + q * s;
                h[at(i, k + 1)] = -p * s.conj() + q * c.conj();
            }
        }

        for k in l..=last {
            h[at(k, k)] += shift;
        }
    }
    Ok(())
}
