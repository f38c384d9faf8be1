//! Polynomial families and their compilation into numeric evaluators.
//!
//! A family is a degree, a sparse list of coefficient formulas, and named
//! parameters defined over the two input sequences `t1`/`t2`. Compilation
//! validates the term list first (exponent range, duplicates), then parses
//! every parameter and coefficient into an [`Expr`] tree. Nothing here
//! touches sampled data.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};
use crate::expr::{self, Expr, RESERVED_NAMES};
use crate::templates::{self, MAX_CHEBYSHEV_ORDER, MAX_GEOMETRIC_LENGTH};

// =============================================================================
// CONFIGURATION
// =============================================================================
const INPUT_NAMES: [&str; 2] = ["t1", "t2"];
const FIRST_SLOT: usize = 0;
const SECOND_SLOT: usize = 1;

/// Largest polynomial degree a family may declare.
pub const MAX_DEGREE: usize = 1024;

fn default_definition() -> String {
    "0".to_string()
}

fn default_amplitude() -> String {
    "1.0".to_string()
}

fn default_geometric_length() -> u32 {
    10
}

fn default_chebyshev_order() -> u32 {
    12
}

// =============================================================================
// FAMILY DEFINITION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputVariable {
    T1,
    T2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterSpec {
    /// Arbitrary expression in `t1`, `t2` and `I`.
    Freeform {
        #[serde(default = "default_definition")]
        definition: String,
    },
    /// `amplitude · Σ_{i=0}^{k} (−1)^i x^(k−i)` in the selected input.
    AlternatingGeometric {
        input_variable: InputVariable,
        #[serde(default = "default_amplitude")]
        amplitude: String,
        #[serde(default = "default_geometric_length")]
        k: u32,
    },
    /// Chebyshev polynomial T_n of the selected input.
    Chebyshev {
        input_variable: InputVariable,
        #[serde(default = "default_chebyshev_order")]
        n: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseTerm {
    pub k: i64,
    pub coeff: String,
}

impl SparseTerm {
    pub fn new(k: i64, coeff: impl Into<String>) -> Self {
        SparseTerm { k, coeff: coeff.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolynomialFamily {
    pub degree: usize,
    pub terms: Vec<SparseTerm>,
    pub params: BTreeMap<String, ParameterSpec>,
}

// =============================================================================
// COMPILED FORM
// =============================================================================

/// Which input sequences a parameter evaluator consumes. Fixed at compile
/// time; the evaluator never inspects its own arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    DependsOnFirst,
    DependsOnSecond,
    DependsOnBoth,
}

#[derive(Debug, Clone)]
pub struct CompiledParameter {
    pub name: String,
    pub dependency: Dependency,
    /// Slot 0 is the single input for `DependsOnFirst`/`DependsOnSecond`;
    /// `DependsOnBoth` takes `[t1, t2]`.
    pub expr: Expr,
}

/// All coefficient formulas of a family behind one call.
///
/// Slots are in descending exponent order; `None` is a coefficient the
/// term list left out (zero).
#[derive(Debug, Clone)]
pub struct CoefficientProgram {
    slots: Vec<Option<Expr>>,
    arity: usize,
}

impl CoefficientProgram {
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Fill `out` (descending order) from one row of parameter values.
    pub fn evaluate_into(&self, params: &[Complex64], out: &mut [Complex64]) {
        for (slot, value) in self.slots.iter().zip(out.iter_mut()) {
            *value = match slot {
                Some(expr) => expr.eval(params),
                None => Complex64::new(0.0, 0.0),
            };
        }
    }

    pub fn evaluate(&self, params: &[Complex64]) -> Vec<Complex64> {
        let mut out = vec![Complex64::new(0.0, 0.0); self.width()];
        self.evaluate_into(params, &mut out);
        out
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFamily {
    pub degree: usize,
    /// In the same order as the coefficient program's parameter slots.
    pub parameters: Vec<CompiledParameter>,
    pub coefficients: CoefficientProgram,
}

// =============================================================================
// COMPILATION
// =============================================================================
impl PolynomialFamily {
    pub fn compile(&self) -> Result<CompiledFamily> {
        if self.degree > MAX_DEGREE {
            return Err(Error::InvalidRequest(format!(
                "degree {} exceeds the maximum of {}",
                self.degree, MAX_DEGREE
            )));
        }
        let exponents = validate_terms(self.degree, &self.terms)?;

        let mut parameters = Vec::with_capacity(self.params.len());
        for (name, spec) in &self.params {
            validate_name(name)?;
            parameters.push(compile_parameter(name, spec)?);
        }

        let names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
        let mut slots: Vec<Option<Expr>> = vec![None; self.degree + 1];
        for (term, exponent) in self.terms.iter().zip(exponents) {
            if term.coeff.trim().is_empty() {
                continue;
            }
            slots[self.degree - exponent] = Some(expr::parse(&term.coeff, &names)?);
        }

        let arity = names.len();
        Ok(CompiledFamily {
            degree: self.degree,
            parameters,
            coefficients: CoefficientProgram { slots, arity },
        })
    }
}

fn validate_terms(degree: usize, terms: &[SparseTerm]) -> Result<Vec<usize>> {
    let mut seen = HashSet::with_capacity(terms.len());
    let mut exponents = Vec::with_capacity(terms.len());
    for term in terms {
        let exponent = usize::try_from(term.k)
            .ok()
            .filter(|&k| k <= degree)
            .ok_or(Error::ExponentOutOfRange { exponent: term.k, degree })?;
        if !seen.insert(exponent) {
            return Err(Error::DuplicateExponent { exponent });
        }
        exponents.push(exponent);
    }
    Ok(exponents)
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let well_formed = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed {
        return Err(Error::InvalidParameter {
            name: name.to_string(),
            reason: "names must be ASCII identifiers".to_string(),
        });
    }
    if INPUT_NAMES.contains(&name) || RESERVED_NAMES.contains(&name) {
        return Err(Error::InvalidParameter {
            name: name.to_string(),
            reason: "name is reserved".to_string(),
        });
    }
    Ok(())
}

fn compile_parameter(name: &str, spec: &ParameterSpec) -> Result<CompiledParameter> {
    let (dependency, expr) = match spec {
        ParameterSpec::Freeform { definition } => {
            let expr = expr::parse(definition, &INPUT_NAMES)?;
            // narrow single-input definitions so the evaluator takes one column
            match (expr.references(FIRST_SLOT), expr.references(SECOND_SLOT)) {
                (true, false) => (Dependency::DependsOnFirst, expr::parse(definition, &INPUT_NAMES[..1])?),
                (false, true) => (Dependency::DependsOnSecond, expr::parse(definition, &INPUT_NAMES[1..])?),
                _ => (Dependency::DependsOnBoth, expr),
            }
        }
        ParameterSpec::AlternatingGeometric { input_variable, amplitude, k } => {
            if *k > MAX_GEOMETRIC_LENGTH {
                return Err(Error::InvalidParameter {
                    name: name.to_string(),
                    reason: format!("k = {} exceeds the maximum of {}", k, MAX_GEOMETRIC_LENGTH),
                });
            }
            // no variables in scope: the amplitude must be a constant
            let amplitude = expr::parse(amplitude, &[])?.eval(&[]);
            let coeffs = templates::alternating_geometric(*k);
            (single_input(*input_variable), templates::polynomial_expr(0, &coeffs, amplitude))
        }
        ParameterSpec::Chebyshev { input_variable, n } => {
            let coeffs = (*n <= MAX_CHEBYSHEV_ORDER)
                .then(|| templates::chebyshev_t::<i128>(*n))
                .flatten()
                .ok_or_else(|| Error::InvalidParameter {
                    name: name.to_string(),
                    reason: format!("Chebyshev order {} exceeds the maximum of {}", n, MAX_CHEBYSHEV_ORDER),
                })?;
            let one = Complex64::new(1.0, 0.0);
            (single_input(*input_variable), templates::polynomial_expr(0, &coeffs, one))
        }
    };
    Ok(CompiledParameter { name: name.to_string(), dependency, expr })
}

fn single_input(input: InputVariable) -> Dependency {
    match input {
        InputVariable::T1 => Dependency::DependsOnFirst,
        InputVariable::T2 => Dependency::DependsOnSecond,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(degree: usize, terms: &[(i64, &str)]) -> PolynomialFamily {
        PolynomialFamily {
            degree,
            terms: terms.iter().map(|&(k, c)| SparseTerm::new(k, c)).collect(),
            params: BTreeMap::new(),
        }
    }

    #[test]
    fn missing_exponents_are_zero_and_order_is_descending() {
        let compiled = family(3, &[(3, "1"), (0, "-1")]).compile().unwrap();
        let row = compiled.coefficients.evaluate(&[]);
        let expected: Vec<Complex64> = [1.0, 0.0, 0.0, -1.0].iter().map(|&v| Complex64::new(v, 0.0)).collect();
        assert_eq!(row, expected);
    }

    #[test]
    fn duplicate_exponent_is_rejected() {
        let err = family(3, &[(2, "1"), (2, "2")]).compile().unwrap_err();
        assert_eq!(err, Error::DuplicateExponent { exponent: 2 });
    }

    #[test]
    fn exponent_range_is_checked_both_ways() {
        let err = family(3, &[(4, "1")]).compile().unwrap_err();
        assert_eq!(err, Error::ExponentOutOfRange { exponent: 4, degree: 3 });
        let err = family(3, &[(-1, "1")]).compile().unwrap_err();
        assert!(matches!(err, Error::ExponentOutOfRange { exponent: -1, .. }));
    }

    #[test]
    fn oversized_degree_is_rejected_up_front() {
        for degree in [MAX_DEGREE + 1, usize::MAX] {
            let err = family(degree, &[(0, "1")]).compile().unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(ref m) if m.contains("degree")), "{:?}", err);
        }
        let compiled = family(MAX_DEGREE, &[(0, "1")]).compile().unwrap();
        assert_eq!(compiled.coefficients.width(), MAX_DEGREE + 1);
    }

    #[test]
    fn deeply_nested_parameter_is_a_syntax_error() {
        let mut fam = family(1, &[(1, "1"), (0, "p")]);
        let definition = format!("{}t1{}", "(".repeat(20_000), ")".repeat(20_000));
        fam.params.insert("p".into(), ParameterSpec::Freeform { definition });
        assert!(matches!(fam.compile(), Err(Error::ExpressionSyntax { .. })));
    }

    #[test]
    fn term_validation_runs_before_parsing() {
        // the bad formula is never reached
        let err = family(2, &[(1, "((("), (1, "x")]).compile().unwrap_err();
        assert!(matches!(err, Error::DuplicateExponent { .. }));
    }

    #[test]
    fn blank_coefficients_count_as_absent() {
        let compiled = family(1, &[(1, "  "), (0, "2")]).compile().unwrap();
        assert_eq!(compiled.coefficients.evaluate(&[])[0], Complex64::new(0.0, 0.0));
    }

    #[test]
    fn dependencies_follow_references() {
        let mut fam = family(1, &[(1, "a + b + c"), (0, "d")]);
        let freeform = |d: &str| ParameterSpec::Freeform { definition: d.to_string() };
        fam.params.insert("a".into(), freeform("t1^2"));
        fam.params.insert("b".into(), freeform("t2 + I"));
        fam.params.insert("c".into(), freeform("t1*t2"));
        fam.params.insert(
            "d".into(),
            ParameterSpec::Chebyshev { input_variable: InputVariable::T2, n: 3 },
        );
        let compiled = fam.compile().unwrap();
        let deps: Vec<_> = compiled.parameters.iter().map(|p| (p.name.as_str(), p.dependency)).collect();
        assert_eq!(
            deps,
            vec![
                ("a", Dependency::DependsOnFirst),
                ("b", Dependency::DependsOnSecond),
                ("c", Dependency::DependsOnBoth),
                ("d", Dependency::DependsOnSecond),
            ]
        );
        assert_eq!(compiled.coefficients.arity(), 4);

        // single-input evaluators take just that column
        let b = &compiled.parameters[1].expr;
        assert_eq!(b.eval(&[Complex64::new(2.0, 0.0)]), Complex64::new(2.0, 1.0));
    }

    #[test]
    fn coefficients_only_see_parameters() {
        let err = family(1, &[(1, "t1")]).compile().unwrap_err();
        assert!(matches!(err, Error::ExpressionSyntax { .. }));
    }

    #[test]
    fn template_amplitude_must_be_constant() {
        let mut fam = family(1, &[(1, "p")]);
        fam.params.insert(
            "p".into(),
            ParameterSpec::AlternatingGeometric {
                input_variable: InputVariable::T1,
                amplitude: "t2".to_string(),
                k: 3,
            },
        );
        assert!(matches!(fam.compile(), Err(Error::ExpressionSyntax { .. })));
    }

    #[test]
    fn reserved_and_malformed_names_are_rejected() {
        for bad in ["t1", "pi", "sin", "2x", "a-b"] {
            let mut fam = family(0, &[(0, "1")]);
            fam.params.insert(bad.into(), ParameterSpec::Freeform { definition: "1".into() });
            assert!(matches!(fam.compile(), Err(Error::InvalidParameter { .. })), "{}", bad);
        }
    }

    #[test]
    fn oversized_chebyshev_is_rejected() {
        let mut fam = family(0, &[(0, "p")]);
        fam.params.insert(
            "p".into(),
            ParameterSpec::Chebyshev { input_variable: InputVariable::T1, n: MAX_CHEBYSHEV_ORDER + 1 },
        );
        assert!(matches!(fam.compile(), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn parameter_specs_decode_with_defaults() {
        let spec: ParameterSpec = serde_json::from_str(r#"{"type": "chebyshev", "input_variable": "t2"}"#).unwrap();
        assert_eq!(spec, ParameterSpec::Chebyshev { input_variable: InputVariable::T2, n: 12 });
        let spec: ParameterSpec =
            serde_json::from_str(r#"{"type": "alternating_geometric", "input_variable": "t1"}"#).unwrap();
        assert_eq!(
            spec,
            ParameterSpec::AlternatingGeometric {
                input_variable: InputVariable::T1,
                amplitude: "1.0".to_string(),
                k: 10,
            }
        );
    }
}
