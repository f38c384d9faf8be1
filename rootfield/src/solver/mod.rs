//! Batched root solving over a coefficient matrix.
//!
//! Two backends (companion-matrix QR, native high-precision library) and two
//! execution modes (in-process sequential, chunked worker processes). Row
//! failures of either kind never fail the batch: the row's [`RootSet`] is
//! simply empty.

pub mod companion;
pub mod native;
pub mod pool;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::coeffs::CoefficientMatrix;
use crate::error::Result;
pub use native::{NativeLibrary, NativeSolver};
pub use pool::WorkerPool;

/// Roots of one row. Empty when that row could not be solved.
pub type RootSet = Vec<Complex64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    Standard,
    HighPrecision { digits: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel { workers: usize },
}

/// Why a single row produced no roots.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowFailure {
    #[error("row contains a non-finite coefficient")]
    NonFinite,
    #[error("leading coefficient vanishes")]
    VanishingLeading,
    #[error("QR iteration did not converge")]
    NoConvergence,
    #[error("degree {0} exceeds what the native solver accepts")]
    DegreeTooLarge(usize),
    #[error("native solver returned status {status}, expected {expected}")]
    NativeStatus { status: i32, expected: usize },
}

/// A backend bound to whatever it needs to run, resolved once per batch.
pub(crate) enum RowSolver<'a> {
    Companion,
    Native { solver: &'a NativeSolver, digits: u32 },
}

impl<'a> RowSolver<'a> {
    /// Fails with `RootSolverUnavailable` if the native library cannot load.
    pub(crate) fn resolve(backend: Backend, native: &'a NativeLibrary) -> Result<Self> {
        match backend {
            Backend::Standard => Ok(RowSolver::Companion),
            Backend::HighPrecision { digits } => Ok(RowSolver::Native { solver: native.solver()?, digits }),
        }
    }

    pub(crate) fn solve(&self, coeffs: &[Complex64]) -> std::result::Result<RootSet, RowFailure> {
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(RowFailure::NonFinite);
        }
        match self {
            RowSolver::Companion => companion::roots(coeffs),
            RowSolver::Native { solver, digits } => {
                // the native ABI only succeeds with exactly `degree` roots
                check_leading(coeffs)?;
                solver.solve_row(coeffs, *digits)
            }
        }
    }

    /// Solve rows in order; a failed row becomes an empty set.
    pub(crate) fn solve_rows<I>(&self, rows: I) -> Vec<RootSet>
    where
        I: IntoIterator,
        I::Item: AsRef<[Complex64]>,
    {
        rows.into_iter()
            .enumerate()
            .map(|(index, row)| {
                self.solve(row.as_ref()).unwrap_or_else(|failure| {
                    debug!(row = index, %failure, "row produced no roots");
                    Vec::new()
                })
            })
            .collect()
    }
}

fn check_leading(coeffs: &[Complex64]) -> std::result::Result<(), RowFailure> {
    let scale = coeffs.iter().map(|c| c.norm()).fold(0.0, f64::max);
    match coeffs.first() {
        Some(lead) if lead.norm() > f64::EPSILON * scale => Ok(()),
        _ => Err(RowFailure::VanishingLeading),
    }
}

/// Dispatches a coefficient matrix to a backend in the requested mode.
///
/// Holds the injected native library handle (shared for the life of the
/// process) and the worker pool used by parallel mode.
#[derive(Debug, Clone)]
pub struct RootSolver {
    native: Arc<NativeLibrary>,
    pool: WorkerPool,
}

impl RootSolver {
    pub fn new(native: Arc<NativeLibrary>, pool: WorkerPool) -> Self {
        RootSolver { native, pool }
    }

    pub fn native(&self) -> &NativeLibrary {
        &self.native
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// One [`RootSet`] per matrix row, in row order.
    pub fn solve(&self, matrix: &CoefficientMatrix, backend: Backend, mode: ExecutionMode) -> Result<Vec<RootSet>> {
        // availability is checked here for both modes, so a missing library
        // is a request error rather than a batch of failed chunks
        let rows = RowSolver::resolve(backend, &self.native)?;
        match mode {
            ExecutionMode::Parallel { workers } if self.pool.is_available() => {
                Ok(self.pool.solve(matrix, backend, self.native.path(), workers))
            }
            ExecutionMode::Parallel { .. } => {
                warn!(program = %self.pool.program().display(), "worker executable not found, solving sequentially");
                Ok(rows.solve_rows(matrix.outer_iter().map(|row| row.to_vec())))
            }
            ExecutionMode::Sequential => Ok(rows.solve_rows(matrix.outer_iter().map(|row| row.to_vec()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    fn solver() -> RootSolver {
        RootSolver::new(
            Arc::new(NativeLibrary::new("/nonexistent/libmpsolve.so")),
            WorkerPool::new("/nonexistent/rootfield"),
        )
    }

    #[test]
    fn degenerate_rows_are_empty_not_fatal() {
        let matrix = array![
            [c(1.0), c(0.0), c(-4.0)],
            [c(0.0), c(0.0), c(0.0)],
            [c(0.0), c(1.0), c(1.0)],
            [c(f64::NAN), c(1.0), c(1.0)],
            [c(1.0), c(f64::INFINITY), c(1.0)],
        ];
        let roots = solver().solve(&matrix, Backend::Standard, ExecutionMode::Sequential).unwrap();
        assert_eq!(roots.len(), 5);
        assert_eq!(roots[0].len(), 2);
        assert!(roots[1].is_empty());
        // x + 1 written as a quadratic
        assert_eq!(roots[2].len(), 1);
        assert!((roots[2][0] - c(-1.0)).norm() < 1e-15);
        assert!(roots[3..].iter().all(Vec::is_empty));
    }

    unsafe extern "C" fn all_zero_roots(
        n: std::ffi::c_int,
        _: *const f64,
        _: *const f64,
        _: std::ffi::c_int,
        _: *mut f64,
        _: *mut f64,
    ) -> std::ffi::c_int {
        n
    }

    #[test]
    fn vanishing_leading_is_only_fatal_for_the_native_backend() {
        let native = NativeSolver::from_fn(all_zero_roots);
        let high = RowSolver::Native { solver: &native, digits: 80 };
        let row = [c(0.0), c(1.0), c(-1.0)];
        assert_eq!(high.solve(&row), Err(RowFailure::VanishingLeading));
        assert_eq!(RowSolver::Companion.solve(&row).map(|r| r.len()), Ok(1));

        let full = [c(1.0), c(0.0), c(-1.0)];
        assert_eq!(high.solve(&full), Ok(vec![c(0.0), c(0.0)]));
        assert_eq!(high.solve(&[c(f64::NAN), c(1.0)]), Err(RowFailure::NonFinite));
    }

    #[test]
    fn leading_checks() {
        assert_eq!(check_leading(&[c(1e-20), c(1.0)]), Err(RowFailure::VanishingLeading));
        assert_eq!(check_leading(&[c(1e-10), c(1.0)]), Ok(()));
        assert_eq!(check_leading(&[]), Err(RowFailure::VanishingLeading));
    }

    #[test]
    fn missing_native_library_fails_the_request() {
        let matrix = array![[c(1.0), c(-1.0)]];
        let backend = Backend::HighPrecision { digits: 80 };
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel { workers: 2 }] {
            let err = solver().solve(&matrix, backend, mode).unwrap_err();
            assert!(matches!(err, crate::Error::RootSolverUnavailable(_)));
        }
    }

    #[test]
    fn missing_worker_executable_falls_back_to_sequential() {
        let matrix = array![[c(1.0), c(0.0), c(-4.0)], [c(1.0), c(0.0), c(-9.0)]];
        let parallel = solver().solve(&matrix, Backend::Standard, ExecutionMode::Parallel { workers: 2 }).unwrap();
        let sequential = solver().solve(&matrix, Backend::Standard, ExecutionMode::Sequential).unwrap();
        assert_eq!(parallel, sequential);
        assert!(parallel.iter().all(|roots| roots.len() == 2));
    }

    #[test]
    fn backend_wire_names() {
        let json = serde_json::to_string(&Backend::HighPrecision { digits: 40 }).unwrap();
        assert_eq!(json, r#"{"kind":"high_precision","digits":40}"#);
        assert_eq!(serde_json::from_str::<Backend>(r#"{"kind":"standard"}"#).unwrap(), Backend::Standard);
    }
}
