//! Density fields from batches of parametric complex polynomials.
//!
//! A request names a polynomial family (degree, sparse coefficient formulas,
//! parameters over two sampled input sequences `t1`/`t2`). For every sample
//! pair the family is instantiated, all complex roots are found, and the
//! roots are binned into a normalised, log-compressed square density grid.
//!
//! ```text
//! family ──compile──▶ CompiledFamily ─┐
//! domains ──sample──▶ SampleBatch ────┴─evaluate─▶ CoefficientMatrix
//!     ─solve─▶ Vec<RootSet> ─collect─▶ RootCloud ─density─▶ DensityGrid
//! ```

pub mod coeffs;
pub mod density;
pub mod domain;
pub mod error;
pub mod expr;
pub mod family;
pub mod pipeline;
pub mod request;
pub mod solver;
pub mod templates;

pub use coeffs::{CoefficientMatrix, SampleBatch};
pub use density::{aggregate, Bounds, DensityGrid, RootCloud};
pub use domain::{Domain, DomainConfig, DomainSpec};
pub use error::{Error, Result};
pub use family::{CompiledFamily, Dependency, InputVariable, ParameterSpec, PolynomialFamily, SparseTerm};
pub use pipeline::Engine;
pub use request::{RenderOutput, RenderRequest, RenderResponse, SolverKind, Timing};
pub use solver::{Backend, ExecutionMode, NativeLibrary, RootSet, RootSolver, WorkerPool};
