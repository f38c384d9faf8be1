//! One request end to end: compile, sample, evaluate, solve, aggregate.

use std::time::Instant;
use tracing::info;

use crate::coeffs::{self, SampleBatch};
use crate::density::{self, RootCloud};
use crate::error::Result;
use crate::request::{Render, RenderRequest, RenderResponse, Timing};
use crate::solver::{ExecutionMode, RootSolver};

/// Runs render requests against a fixed root solver.
///
/// Holds no per-request state; every call starts from the request alone.
#[derive(Debug, Clone)]
pub struct Engine {
    solver: RootSolver,
}

impl Engine {
    pub fn new(solver: RootSolver) -> Self {
        Engine { solver }
    }

    pub fn solver(&self) -> &RootSolver {
        &self.solver
    }

    /// Render and fold any failure into the `{"error": ...}` response.
    pub fn respond(&self, request: &RenderRequest) -> RenderResponse {
        self.render(request).into()
    }

    pub fn render(&self, request: &RenderRequest) -> Result<Render> {
        let started = Instant::now();
        let mut timing = Timing::default();

        // everything that can be rejected up front is rejected before sampling
        density::check_resolution(request.grid_resolution)?;
        let (t1_domain, t2_domain) = request.domains()?;
        let stage = Instant::now();
        let family = request.family()?.compile()?;
        timing.compile = stage.elapsed().as_secs_f64();
        info!(seconds = timing.compile, degree = family.degree, parameters = family.parameters.len(), "compiled family");

        let batch = SampleBatch::draw(&t1_domain, &t2_domain)?;

        let stage = Instant::now();
        let matrix = coeffs::evaluate(&family, &batch)?;
        timing.vector = stage.elapsed().as_secs_f64();
        info!(seconds = timing.vector, rows = matrix.nrows(), "evaluated coefficients");

        let mode = request.execution_mode();
        let stage = Instant::now();
        let root_sets = self.solver.solve(&matrix, request.backend(), mode)?;
        timing.roots = stage.elapsed().as_secs_f64();
        let mode_name = match mode {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel { .. } => "parallel",
        };
        info!(
            seconds = timing.roots,
            per_pair_ms = 1000.0 * timing.roots / request.n_pairs.max(1) as f64,
            mode = mode_name,
            "found roots"
        );

        let stage = Instant::now();
        let cloud = RootCloud::collect(&root_sets)?;
        timing.post = stage.elapsed().as_secs_f64();
        info!(seconds = timing.post, points = cloud.len(), "collected points");

        let stage = Instant::now();
        let grid = cloud.density(request.grid_resolution)?;
        timing.grid = stage.elapsed().as_secs_f64();
        info!(seconds = timing.grid, resolution = request.grid_resolution, "built density grid");

        timing.total = started.elapsed().as_secs_f64();
        info!(seconds = timing.total, roots_share = timing.roots / timing.total.max(f64::MIN_POSITIVE), "render finished");
        Ok(Render { grid, timing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::family::SparseTerm;
    use crate::solver::{NativeLibrary, WorkerPool};
    use std::sync::Arc;

    fn engine() -> Engine {
        Engine::new(RootSolver::new(
            Arc::new(NativeLibrary::new("/nonexistent/libmpsolve.so")),
            WorkerPool::new("/nonexistent/rootfield"),
        ))
    }

    fn request(degree: usize, terms: &[(i64, &str)]) -> RenderRequest {
        RenderRequest {
            degree,
            terms: terms.iter().map(|&(k, c)| SparseTerm::new(k, c)).collect(),
            n_pairs: 200,
            grid_resolution: 32,
            use_parallel: false,
            ..RenderRequest::default()
        }
    }

    #[test]
    fn quadratic_family_renders() {
        let render = engine().render(&request(2, &[(2, "1"), (0, "-4")])).unwrap();
        assert_eq!(render.grid.total_roots, 400);
        assert_eq!(render.grid.values.dim(), (32, 32));
        assert!(render.timing.total >= render.timing.roots);
    }

    #[test]
    fn domain_errors_come_before_family_errors() {
        let mut bad = request(2, &[(2, "1"), (2, "1")]);
        bad.t1_domain.domain_type = "spiral".to_string();
        assert!(matches!(engine().render(&bad), Err(Error::DomainConfig(_))));
    }

    #[test]
    fn constant_family_has_no_roots() {
        let response = engine().respond(&request(0, &[(0, "5")]));
        assert_eq!(response, RenderResponse::Failure { error: "No valid roots found.".to_string() });
    }

    #[test]
    fn zero_resolution_is_rejected_up_front() {
        let mut bad = request(1, &[(1, "1")]);
        bad.grid_resolution = 0;
        assert!(matches!(engine().render(&bad), Err(Error::InvalidRequest(_))));
    }
}
