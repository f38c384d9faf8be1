//! High-precision backend reached through a native shared library.
//!
//! The library exports one function with a fixed C signature:
//!
//! ```text
//! int mps_solve_monomial_complex(int n,
//!                                const double *coeff_re, const double *coeff_im,
//!                                int out_digits,
//!                                double *roots_re, double *roots_im);
//! ```
//!
//! Coefficients are passed lowest exponent first (length `n + 1`), roots come
//! back in two buffers of length `n`, and a return value equal to `n` is the
//! only success status.
//!
//! [`NativeLibrary`] owns the load lifecycle: the first call to
//! [`NativeLibrary::solver`] tries to load, and the outcome (handle or error
//! text) is kept for the life of the value. A failed load is never retried.

use libloading::{Library, Symbol};
use num_complex::Complex64;
use std::ffi::{c_double, c_int};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

use super::{RootSet, RowFailure};
use crate::error::{Error, Result};

// =============================================================================
// CONFIGURATION
// =============================================================================
pub const SOLVE_SYMBOL: &[u8] = b"mps_solve_monomial_complex\0";
pub const LIBRARY_STEM: &str = "mpsolve";
pub const DEFAULT_LIBRARY_DIR: &str = "bin/mpsolver";
pub const DEFAULT_PRECISION_DIGITS: u32 = 80;

pub(crate) type SolveFn = unsafe extern "C" fn(
    c_int,
    *const c_double,
    *const c_double,
    c_int,
    *mut c_double,
    *mut c_double,
) -> c_int;

/// A loaded library together with its resolved solve entry point.
pub struct NativeSolver {
    solve: SolveFn,
    // the function pointer is only valid while this is alive
    _library: Option<Library>,
}

impl fmt::Debug for NativeSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSolver").finish_non_exhaustive()
    }
}

impl NativeSolver {
    /// An entry point linked into this binary rather than loaded.
    #[cfg(test)]
    pub(crate) fn from_fn(solve: SolveFn) -> Self {
        NativeSolver { solve, _library: None }
    }

    /// Roots of one row (descending coefficients) at `digits` decimal digits.
    pub fn solve_row(&self, coeffs: &[Complex64], digits: u32) -> std::result::Result<RootSet, RowFailure> {
        let degree = coeffs.len().saturating_sub(1);
        if degree == 0 {
            return Ok(Vec::new());
        }
        let n = c_int::try_from(degree).map_err(|_| RowFailure::DegreeTooLarge(degree))?;
        let digits = c_int::try_from(digits).unwrap_or(c_int::MAX);

        let coeff_re: Vec<c_double> = coeffs.iter().rev().map(|c| c.re).collect();
        let coeff_im: Vec<c_double> = coeffs.iter().rev().map(|c| c.im).collect();
        let mut roots_re = vec![0.0 as c_double; degree];
        let mut roots_im = vec![0.0 as c_double; degree];

        // SAFETY: buffers have the lengths the ABI requires (n + 1 in, n out)
        // and outlive the call; the library stays loaded while `self` exists.
        let status = unsafe {
            (self.solve)(
                n,
                coeff_re.as_ptr(),
                coeff_im.as_ptr(),
                digits,
                roots_re.as_mut_ptr(),
                roots_im.as_mut_ptr(),
            )
        };
        if status != n {
            return Err(RowFailure::NativeStatus { status, expected: degree });
        }
        Ok(roots_re
            .into_iter()
            .zip(roots_im)
            .map(|(re, im)| Complex64::new(re, im))
            .collect())
    }
}

/// Process-scoped handle on the high-precision library at a fixed path.
#[derive(Debug)]
pub struct NativeLibrary {
    path: PathBuf,
    state: OnceLock<std::result::Result<NativeSolver, String>>,
}

impl NativeLibrary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        NativeLibrary { path: path.into(), state: OnceLock::new() }
    }

    /// `bin/mpsolver/<platform file name>` relative to the working directory.
    pub fn default_path() -> PathBuf {
        Path::new(DEFAULT_LIBRARY_DIR).join(libloading::library_filename(LIBRARY_STEM))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state.get(), Some(Ok(_)))
    }

    /// Load on first use; afterwards return the cached outcome.
    pub fn solver(&self) -> Result<&NativeSolver> {
        self.state
            .get_or_init(|| {
                let outcome = load(&self.path);
                match &outcome {
                    Ok(_) => info!(path = %self.path.display(), "high-precision solver loaded"),
                    Err(reason) => warn!(%reason, "high-precision solver unavailable"),
                }
                outcome
            })
            .as_ref()
            .map_err(|reason| Error::RootSolverUnavailable(reason.clone()))
    }
}

impl Default for NativeLibrary {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

fn load(path: &Path) -> std::result::Result<NativeSolver, String> {
    if !path.exists() {
        return Err(format!("library not found at {}", path.display()));
    }
    // SAFETY: loading runs the library's initialisers; the path is supplied
    // by whoever configured the process.
    let library = unsafe { Library::new(path) }
        .map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
    let solve = {
        // SAFETY: the symbol is declared with the ABI's exact signature.
        let symbol: Symbol<SolveFn> = unsafe { library.get(SOLVE_SYMBOL) }
            .map_err(|e| format!("missing symbol mps_solve_monomial_complex in {}: {}", path.display(), e))?;
        *symbol
    };
    Ok(NativeSolver { solve, _library: Some(library) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Reports its inputs back: root i is (coeff_re[i], coeff_im[i] + digits).
    unsafe extern "C" fn echo_inputs(
        n: c_int,
        coeff_re: *const c_double,
        coeff_im: *const c_double,
        digits: c_int,
        roots_re: *mut c_double,
        roots_im: *mut c_double,
    ) -> c_int {
        let n = n as usize;
        let (re, im, out_re, out_im) = unsafe {
            (
                std::slice::from_raw_parts(coeff_re, n + 1),
                std::slice::from_raw_parts(coeff_im, n + 1),
                std::slice::from_raw_parts_mut(roots_re, n),
                std::slice::from_raw_parts_mut(roots_im, n),
            )
        };
        for i in 0..n {
            out_re[i] = re[i];
            out_im[i] = im[i] + digits as c_double;
        }
        n as c_int
    }

    unsafe extern "C" fn short_by_one(
        n: c_int,
        _: *const c_double,
        _: *const c_double,
        _: c_int,
        _: *mut c_double,
        _: *mut c_double,
    ) -> c_int {
        n - 1
    }

    #[test]
    fn coefficients_cross_in_ascending_order() {
        let solver = NativeSolver::from_fn(echo_inputs);
        // 1 x^3 + 2 x^2 + 3i x + 4
        let row = [
            Complex64::new(1.0, 0.0),
            Complex64::new(2.0, 0.0),
            Complex64::new(0.0, 3.0),
            Complex64::new(4.0, 0.0),
        ];
        let roots = solver.solve_row(&row, 50).unwrap();
        assert_eq!(
            roots,
            vec![Complex64::new(4.0, 50.0), Complex64::new(0.0, 53.0), Complex64::new(2.0, 50.0)]
        );
    }

    #[test]
    fn status_other_than_degree_is_a_row_failure() {
        let solver = NativeSolver::from_fn(short_by_one);
        let row = [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0), Complex64::new(-1.0, 0.0)];
        assert_eq!(solver.solve_row(&row, 80), Err(RowFailure::NativeStatus { status: 1, expected: 2 }));
    }

    #[test]
    fn constant_rows_skip_the_call() {
        let solver = NativeSolver::from_fn(short_by_one);
        assert_eq!(solver.solve_row(&[Complex64::new(3.0, 0.0)], 80), Ok(Vec::new()));
    }

    #[test]
    fn missing_library_is_reported_and_cached() {
        let library = NativeLibrary::new("/nonexistent/rootfield/libmpsolve.so");
        let first = library.solver().unwrap_err();
        assert!(matches!(&first, Error::RootSolverUnavailable(reason) if reason.contains("not found at")));
        assert_eq!(library.solver().unwrap_err(), first);
        assert!(!library.is_loaded());
    }

    #[test]
    fn non_library_file_fails_to_load() {
        let path = std::env::temp_dir().join(format!("rootfield-not-a-library-{}.so", std::process::id()));
        std::fs::File::create(&path).and_then(|mut f| f.write_all(b"plain text")).unwrap();
        let library = NativeLibrary::new(&path);
        let err = library.solver().unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, Error::RootSolverUnavailable(reason) if reason.contains("failed to load")));
    }

    #[test]
    fn default_path_uses_platform_file_name() {
        let path = NativeLibrary::default_path();
        assert!(path.starts_with(DEFAULT_LIBRARY_DIR));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains(LIBRARY_STEM));
    }
}
