//! Closed-form expansion of the parameter generator templates.
//!
//! Both templates have integer coefficients, so they are expanded exactly in
//! `i128` before being handed to the evaluator as an [`Expr::Polynomial`].
//! Orders whose coefficients would overflow are rejected instead of rounded.

use num_complex::Complex64;
use num_traits::{CheckedMul, CheckedSub, One, Zero};

use crate::expr::Expr;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Largest Chebyshev order whose coefficients all fit in `i128`.
pub const MAX_CHEBYSHEV_ORDER: u32 = 100;
/// Largest alternating-geometric length accepted.
pub const MAX_GEOMETRIC_LENGTH: u32 = 10_000;

// =============================================================================
// EXACT EXPANSIONS (ASCENDING COEFFICIENTS)
// =============================================================================

/// Coefficients of the Chebyshev polynomial of the first kind, T_n.
///
/// Uses T_0 = 1, T_1 = x, T_{m+1} = 2x·T_m − T_{m−1}. Returns `None` when a
/// coefficient does not fit the integer type.
pub fn chebyshev_t<T>(n: u32) -> Option<Vec<T>>
where
    T: Copy + Zero + One + CheckedMul + CheckedSub,
{
    let two = T::one() + T::one();
    let mut prev = vec![T::one()];
    if n == 0 {
        return Some(prev);
    }
    let mut curr = vec![T::zero(), T::one()];
    for _ in 1..n {
        let mut next = vec![T::zero(); curr.len() + 1];
        for (k, &c) in curr.iter().enumerate() {
            next[k + 1] = c.checked_mul(&two)?;
        }
        for (k, &c) in prev.iter().enumerate() {
            next[k] = next[k].checked_sub(&c)?;
        }
        prev = std::mem::replace(&mut curr, next);
    }
    Some(curr)
}

/// Coefficients of Σ_{i=0}^{k} (−1)^i x^(k−i).
pub fn alternating_geometric(k: u32) -> Vec<i128> {
    (0..=k)
        .map(|power| if (k - power) % 2 == 0 { 1 } else { -1 })
        .collect()
}

/// Wrap integer coefficients (scaled by `amplitude`) as a polynomial in `var`.
pub fn polynomial_expr(var: usize, coeffs: &[i128], amplitude: Complex64) -> Expr {
    Expr::Polynomial {
        var,
        coeffs: coeffs.iter().map(|&c| amplitude * c as f64).collect(),
    }
}
