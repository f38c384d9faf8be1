//! Python bindings for the rootfield density pipeline
//!
//! `generate_roots` takes the JSON request body and hands back a dict whose
//! `density_grid` is a 2-D numpy array. Failures never raise; they come back
//! as `{"error": "..."}` like the HTTP surface expects.

use numpy::IntoPyArray;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use rootfield::request::{logical_cores, Render};
use rootfield::{Engine, NativeLibrary, RenderRequest, RootSolver, WorkerPool};

// =============================================================================
// CONFIGURATION
// =============================================================================
const WORKER_BIN_ENV: &str = "ROOTFIELD_WORKER_BIN";
const NATIVE_LIB_ENV: &str = "ROOTFIELD_NATIVE_LIB";
const DEFAULT_WORKER_BIN: &str = "rootfield";

static ENGINE: OnceLock<Engine> = OnceLock::new();

// Without a reachable worker binary, parallel requests are solved in-process.

fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| {
        let program = std::env::var_os(WORKER_BIN_ENV).map(PathBuf::from).unwrap_or_else(|| DEFAULT_WORKER_BIN.into());
        let native = std::env::var_os(NATIVE_LIB_ENV).map(NativeLibrary::new).unwrap_or_default();
        Engine::new(RootSolver::new(Arc::new(native), WorkerPool::new(program)))
    })
}

fn error_dict(py: Python<'_>, message: String) -> PyResult<PyObject> {
    let dict = PyDict::new_bound(py);
    dict.set_item("error", message)?;
    Ok(dict.into_any().unbind())
}

fn render_dict(py: Python<'_>, render: Render) -> PyResult<PyObject> {
    let Render { grid, timing } = render;
    let dict = PyDict::new_bound(py);
    let grid_size = grid.resolution();

    let bounds = PyDict::new_bound(py);
    bounds.set_item("x_min", grid.bounds.x_min)?;
    bounds.set_item("x_max", grid.bounds.x_max)?;
    bounds.set_item("y_min", grid.bounds.y_min)?;
    bounds.set_item("y_max", grid.bounds.y_max)?;

    let stages = PyDict::new_bound(py);
    stages.set_item("total", timing.total)?;
    stages.set_item("compile", timing.compile)?;
    stages.set_item("vector", timing.vector)?;
    stages.set_item("roots", timing.roots)?;
    stages.set_item("post", timing.post)?;
    stages.set_item("grid", timing.grid)?;

    dict.set_item("total_roots", grid.total_roots)?;
    dict.set_item("density_grid", grid.values.into_pyarray_bound(py))?;
    dict.set_item("grid_size", grid_size)?;
    dict.set_item("bounds", bounds)?;
    dict.set_item("timing", stages)?;
    Ok(dict.into_any().unbind())
}

// =============================================================================
// EXPORTS
// =============================================================================

/// Render one request given as a JSON string
#[pyfunction]
fn generate_roots(py: Python<'_>, payload: &str) -> PyResult<PyObject> {
    let request: RenderRequest = match serde_json::from_str(payload) {
        Ok(request) => request,
        Err(e) => return error_dict(py, format!("Invalid request: {}", e)),
    };
    // the GIL is released for the whole render; worker processes do the rest
    match py.allow_threads(|| engine().render(&request)) {
        Ok(render) => render_dict(py, render),
        Err(e) => error_dict(py, e.to_string()),
    }
}

/// Cores visible to the renderer and the host platform
#[pyfunction]
fn system_info(py: Python<'_>) -> PyResult<PyObject> {
    let dict = PyDict::new_bound(py);
    dict.set_item("max_cores", logical_cores())?;
    dict.set_item("platform", std::env::consts::OS)?;
    Ok(dict.into_any().unbind())
}

#[pymodule]
fn rootfield_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(generate_roots, m)?)?;
    m.add_function(wrap_pyfunction!(system_info, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("__doc__", "Root density fields of parametric complex polynomials")?;

    Ok(())
}
