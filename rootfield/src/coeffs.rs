//! Vectorised coefficient evaluation over a sample batch.

use ndarray::Array2;
use num_complex::Complex64;
use num_traits::Zero;
use rayon::prelude::*;

use crate::domain::DomainSpec;
use crate::error::{Error, Result};
use crate::family::{CompiledFamily, CompiledParameter, Dependency};

/// `n_pairs × (degree + 1)`, each row highest exponent first.
pub type CoefficientMatrix = Array2<Complex64>;

/// The two aligned input sequences of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    t1: Vec<Complex64>,
    t2: Vec<Complex64>,
}

impl SampleBatch {
    pub fn new(t1: Vec<Complex64>, t2: Vec<Complex64>) -> Result<Self> {
        if t1.len() != t2.len() {
            return Err(Error::Evaluation(format!(
                "input sequences differ in length ({} vs {})",
                t1.len(),
                t2.len()
            )));
        }
        Ok(SampleBatch { t1, t2 })
    }

    pub fn draw(first: &DomainSpec, second: &DomainSpec) -> Result<Self> {
        Self::new(first.sample(), second.sample())
    }

    pub fn len(&self) -> usize {
        self.t1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t1.is_empty()
    }

    pub fn t1(&self) -> &[Complex64] {
        &self.t1
    }

    pub fn t2(&self) -> &[Complex64] {
        &self.t2
    }

    fn columns_for(&self, dependency: Dependency) -> Vec<&[Complex64]> {
        match dependency {
            Dependency::DependsOnFirst => vec![self.t1.as_slice()],
            Dependency::DependsOnSecond => vec![self.t2.as_slice()],
            Dependency::DependsOnBoth => vec![self.t1.as_slice(), self.t2.as_slice()],
        }
    }
}

/// Evaluate one parameter over the column(s) its dependency tag names.
/// Constant parameters come back broadcast to the batch length.
pub fn evaluate_parameter(parameter: &CompiledParameter, batch: &SampleBatch) -> Vec<Complex64> {
    let columns = batch.columns_for(parameter.dependency);
    parameter.expr.eval_columns(&columns, batch.len())
}

/// Build the coefficient matrix for every sample pair.
///
/// Parameters are evaluated column-wise first; the combined coefficient
/// program then runs once per row over the parameter values.
pub fn evaluate(family: &CompiledFamily, batch: &SampleBatch) -> Result<CoefficientMatrix> {
    let n = batch.len();
    let program = &family.coefficients;
    let width = program.width();

    if program.arity() != family.parameters.len() {
        return Err(Error::Evaluation(format!(
            "coefficient program expects {} parameters, {} were compiled",
            program.arity(),
            family.parameters.len()
        )));
    }

    let values: Vec<Vec<Complex64>> = family
        .parameters
        .iter()
        .map(|parameter| evaluate_parameter(parameter, batch))
        .collect();
    if let Some((parameter, column)) = family.parameters.iter().zip(&values).find(|(_, v)| v.len() != n) {
        return Err(Error::Evaluation(format!(
            "parameter '{}' produced {} values for {} samples",
            parameter.name,
            column.len(),
            n
        )));
    }

    let mut data = vec![Complex64::zero(); n * width];
    data.par_chunks_mut(width).enumerate().for_each_init(
        || vec![Complex64::zero(); values.len()],
        |params, (j, row)| {
            for (slot, column) in params.iter_mut().zip(&values) {
                *slot = column[j];
            }
            program.evaluate_into(params, row);
        },
    );

    Array2::from_shape_vec((n, width), data).map_err(|e| Error::Evaluation(e.to_string()))
}
