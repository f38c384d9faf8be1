//! Inbound request and outbound response schemas.
//!
//! Field names and defaults match the JSON the HTTP front end has always
//! sent, so a request body can be decoded straight into [`RenderRequest`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::density::{Bounds, DensityGrid};
use crate::domain::{Domain, DomainConfig, DomainSpec};
use crate::error::{Error, Result};
use crate::family::{ParameterSpec, PolynomialFamily, SparseTerm};
use crate::solver::native::DEFAULT_PRECISION_DIGITS;
use crate::solver::{Backend, ExecutionMode};

// =============================================================================
// CONFIGURATION
// =============================================================================
pub const DEFAULT_N_PAIRS: usize = 20_000;
pub const DEFAULT_SEED: u64 = 7;
pub const DEFAULT_GRID_RESOLUTION: usize = 1080;
/// Share of the logical cores handed to worker processes by default.
const CORES_PER_WORKER: usize = 4;

fn default_n_pairs() -> usize {
    DEFAULT_N_PAIRS
}

fn default_seed() -> Option<u64> {
    Some(DEFAULT_SEED)
}

fn default_grid_resolution() -> usize {
    DEFAULT_GRID_RESOLUTION
}

fn default_true() -> bool {
    true
}

fn default_precision_digits() -> u32 {
    DEFAULT_PRECISION_DIGITS
}

/// Logical cores visible to this process (at least 1).
pub fn logical_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

pub fn default_max_workers() -> usize {
    (logical_cores() / CORES_PER_WORKER).max(1)
}

// =============================================================================
// REQUEST
// =============================================================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    Standard,
    HighPrecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub degree: usize,
    #[serde(default)]
    pub terms: Vec<SparseTerm>,
    /// Older form of `terms`: exponent (as a string) to coefficient.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coeffs: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParameterSpec>,
    #[serde(default = "default_n_pairs")]
    pub n_pairs: usize,
    /// `null` asks for unseeded (non-reproducible) sampling.
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: usize,
    #[serde(default = "default_true")]
    pub use_parallel: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub solver: SolverKind,
    #[serde(default = "default_precision_digits")]
    pub solver_precision_digits: u32,
    #[serde(default)]
    pub t1_domain: DomainConfig,
    #[serde(default)]
    pub t2_domain: DomainConfig,
}

impl Default for RenderRequest {
    fn default() -> Self {
        RenderRequest {
            degree: 0,
            terms: Vec::new(),
            coeffs: BTreeMap::new(),
            params: BTreeMap::new(),
            n_pairs: DEFAULT_N_PAIRS,
            seed: default_seed(),
            grid_resolution: DEFAULT_GRID_RESOLUTION,
            use_parallel: true,
            max_workers: default_max_workers(),
            solver: SolverKind::Standard,
            solver_precision_digits: DEFAULT_PRECISION_DIGITS,
            t1_domain: DomainConfig::unit_circle(),
            t2_domain: DomainConfig::unit_circle(),
        }
    }
}

impl RenderRequest {
    /// The polynomial family, with any legacy `coeffs` entries appended
    /// after `terms`.
    pub fn family(&self) -> Result<PolynomialFamily> {
        let mut terms = self.terms.clone();
        for (key, coeff) in &self.coeffs {
            let k = key
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::InvalidRequest(format!("coefficient key '{}' is not an integer", key)))?;
            terms.push(SparseTerm::new(k, coeff.clone()));
        }
        Ok(PolynomialFamily { degree: self.degree, terms, params: self.params.clone() })
    }

    /// Both sampling domains, with sample count and seeds filled in.
    ///
    /// `t1` uses `seed`, `t2` uses `seed + 1` (wrapping); an absent seed
    /// leaves both unseeded.
    pub fn domains(&self) -> Result<(DomainSpec, DomainSpec)> {
        let t1 = Domain::from_config(&self.t1_domain)?;
        let t2 = Domain::from_config(&self.t2_domain)?;
        Ok((
            DomainSpec::new(t1, self.n_pairs, self.seed),
            DomainSpec::new(t2, self.n_pairs, self.seed.map(|s| s.wrapping_add(1))),
        ))
    }

    pub fn backend(&self) -> Backend {
        match self.solver {
            SolverKind::Standard => Backend::Standard,
            SolverKind::HighPrecision => Backend::HighPrecision { digits: self.solver_precision_digits },
        }
    }

    /// Worker processes only pay off with more than one of them.
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.use_parallel && self.max_workers > 1 {
            ExecutionMode::Parallel { workers: self.max_workers }
        } else {
            ExecutionMode::Sequential
        }
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

/// Wall-clock seconds per pipeline stage. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub total: f64,
    pub compile: f64,
    pub vector: f64,
    pub roots: f64,
    pub post: f64,
    pub grid: f64,
}

/// A finished render: the grid plus its stage timings.
#[derive(Debug, Clone, PartialEq)]
pub struct Render {
    pub grid: DensityGrid,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOutput {
    /// `density_grid[row][col]`, row along the imaginary axis.
    pub density_grid: Vec<Vec<f64>>,
    pub grid_size: usize,
    pub bounds: Bounds,
    pub total_roots: usize,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RenderResponse {
    Success(RenderOutput),
    Failure { error: String },
}

impl RenderResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, RenderResponse::Success(_))
    }
}

impl From<Render> for RenderOutput {
    fn from(render: Render) -> Self {
        let grid = render.grid;
        RenderOutput {
            grid_size: grid.resolution(),
            density_grid: grid.values.outer_iter().map(|row| row.to_vec()).collect(),
            bounds: grid.bounds,
            total_roots: grid.total_roots,
            timing: render.timing,
        }
    }
}

impl From<Result<Render>> for RenderResponse {
    fn from(result: Result<Render>) -> Self {
        match result {
            Ok(render) => RenderResponse::Success(render.into()),
            Err(error) => RenderResponse::Failure { error: error.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_takes_server_defaults() {
        let request: RenderRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.n_pairs, 20_000);
        assert_eq!(request.seed, Some(7));
        assert_eq!(request.grid_resolution, 1080);
        assert!(request.use_parallel);
        assert!(request.max_workers >= 1);
        assert_eq!(request.backend(), Backend::Standard);
        assert_eq!(request.t2_domain, DomainConfig::unit_circle());
    }

    #[test]
    fn explicit_null_seed_means_unseeded() {
        let request: RenderRequest = serde_json::from_str(r#"{"seed": null}"#).unwrap();
        let (t1, t2) = request.domains().unwrap();
        assert_eq!((t1.seed, t2.seed), (None, None));

        let request: RenderRequest = serde_json::from_str(r#"{"seed": 41}"#).unwrap();
        let (t1, t2) = request.domains().unwrap();
        assert_eq!((t1.seed, t2.seed), (Some(41), Some(42)));
    }

    #[test]
    fn legacy_coeff_map_joins_terms() {
        let request: RenderRequest = serde_json::from_str(
            r#"{"degree": 2, "terms": [{"k": 2, "coeff": "1"}], "coeffs": {"0": "-1", "1": ""}}"#,
        )
        .unwrap();
        let family = request.family().unwrap();
        assert_eq!(family.terms.len(), 3);
        let compiled = family.compile().unwrap();
        let row = compiled.coefficients.evaluate(&[]);
        assert_eq!(row.iter().map(|c| c.re).collect::<Vec<_>>(), vec![1.0, 0.0, -1.0]);

        let request: RenderRequest = serde_json::from_str(r#"{"coeffs": {"x": "1"}}"#).unwrap();
        assert!(matches!(request.family(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn parallel_needs_more_than_one_worker() {
        let mut request = RenderRequest { max_workers: 1, ..RenderRequest::default() };
        assert_eq!(request.execution_mode(), ExecutionMode::Sequential);
        request.max_workers = 4;
        assert_eq!(request.execution_mode(), ExecutionMode::Parallel { workers: 4 });
        request.use_parallel = false;
        assert_eq!(request.execution_mode(), ExecutionMode::Sequential);
    }

    #[test]
    fn high_precision_carries_digits() {
        let request: RenderRequest =
            serde_json::from_str(r#"{"solver": "high_precision", "solver_precision_digits": 120}"#).unwrap();
        assert_eq!(request.backend(), Backend::HighPrecision { digits: 120 });
    }

    #[test]
    fn failures_serialise_as_a_single_error() {
        let response = RenderResponse::from(Err::<Render, _>(Error::NoValidRoots));
        assert!(!response.is_success());
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"error":"No valid roots found."}"#);
    }
}
