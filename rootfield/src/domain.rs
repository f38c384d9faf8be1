//! Sampling domains for the two complex input sequences.
//!
//! Every sampler draws from a `StdRng` seeded from [`DomainSpec::seed`], so a
//! given `(domain, sample_count, seed)` reproduces the same sequence bit for
//! bit. A seed of `None` draws the generator from OS entropy instead and the
//! output is then not reproducible.

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{Error, Result};

// =============================================================================
// CONFIGURATION
// =============================================================================
const DEFAULT_MIN_RADIUS: f64 = 0.0;
const DEFAULT_MAX_RADIUS: f64 = 1.0;

// =============================================================================
// DOMAIN DESCRIPTION (AS RECEIVED)
// =============================================================================

/// Loosely-typed domain description as it arrives in a request.
///
/// Kept separate from [`Domain`] so an unknown `domain_type` or a missing
/// field is reported as a domain error rather than a generic decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub domain_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<[f64; 2]>,
}

impl DomainConfig {
    pub fn unit_circle() -> Self {
        DomainConfig {
            domain_type: "unit_circle".to_string(),
            min_radius: None,
            max_radius: None,
            start: None,
            end: None,
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self::unit_circle()
    }
}

// =============================================================================
// VALIDATED DOMAIN
// =============================================================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    UnitCircle,
    Annulus { min_radius: f64, max_radius: f64 },
    Line { start: Complex64, end: Complex64 },
    UniformDisk { max_radius: f64 },
}

impl Domain {
    pub fn from_config(config: &DomainConfig) -> Result<Self> {
        match config.domain_type.as_str() {
            "unit_circle" => Ok(Domain::UnitCircle),
            "annulus" => {
                let min_radius = config.min_radius.unwrap_or(DEFAULT_MIN_RADIUS);
                let max_radius = config.max_radius.unwrap_or(DEFAULT_MAX_RADIUS);
                check_radius("annulus", "min_radius", min_radius)?;
                check_radius("annulus", "max_radius", max_radius)?;
                if min_radius > max_radius {
                    return Err(Error::DomainConfig(format!(
                        "annulus min_radius {} exceeds max_radius {}",
                        min_radius, max_radius
                    )));
                }
                Ok(Domain::Annulus { min_radius, max_radius })
            }
            "line" => {
                let start = endpoint(config.start, "start")?;
                let end = endpoint(config.end, "end")?;
                Ok(Domain::Line { start, end })
            }
            "uniform_disk" => {
                let max_radius = config.max_radius.unwrap_or(DEFAULT_MAX_RADIUS);
                check_radius("uniform_disk", "max_radius", max_radius)?;
                Ok(Domain::UniformDisk { max_radius })
            }
            other => Err(Error::DomainConfig(format!("Unknown domain type: {}", other))),
        }
    }
}

fn check_radius(domain: &str, field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::DomainConfig(format!(
            "{} {} must be a finite non-negative number, got {}",
            domain, field, value
        )))
    }
}

fn endpoint(value: Option<[f64; 2]>, field: &str) -> Result<Complex64> {
    match value {
        Some([re, im]) if re.is_finite() && im.is_finite() => Ok(Complex64::new(re, im)),
        Some(pair) => Err(Error::DomainConfig(format!(
            "line {} must be finite, got {:?}",
            field, pair
        ))),
        None => Err(Error::DomainConfig(format!("line domain requires '{}' as [re, im]", field))),
    }
}

// =============================================================================
// SAMPLING
// =============================================================================

/// A domain plus the server-side values that pin its output down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainSpec {
    pub domain: Domain,
    pub sample_count: usize,
    pub seed: Option<u64>,
}

impl DomainSpec {
    pub fn new(domain: Domain, sample_count: usize, seed: Option<u64>) -> Self {
        DomainSpec { domain, sample_count, seed }
    }

    /// Draw `sample_count` points.
    ///
    /// Angles are drawn as one block before radii (or line parameters), so
    /// the first `n` draws of the generator always go to the same field.
    pub fn sample(&self) -> Vec<Complex64> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let n = self.sample_count;

        match self.domain {
            Domain::UnitCircle => uniform_block(&mut rng, 0.0, 2.0 * PI, n)
                .into_iter()
                .map(|theta| Complex64::from_polar(1.0, theta))
                .collect(),
            Domain::Annulus { min_radius, max_radius } => {
                let angles = uniform_block(&mut rng, 0.0, 2.0 * PI, n);
                let r_squared = uniform_block(&mut rng, min_radius * min_radius, max_radius * max_radius, n);
                polar_points(&angles, &r_squared, min_radius, max_radius)
            }
            Domain::Line { start, end } => uniform_block(&mut rng, 0.0, 1.0, n)
                .into_iter()
                .map(|t| start + (end - start) * t)
                .collect(),
            Domain::UniformDisk { max_radius } => {
                let angles = uniform_block(&mut rng, 0.0, 2.0 * PI, n);
                let r_squared = uniform_block(&mut rng, 0.0, max_radius * max_radius, n);
                polar_points(&angles, &r_squared, 0.0, max_radius)
            }
        }
    }
}

// Scaled unit draws instead of `gen_range`, which rejects an empty range
// (a zero-width annulus is legal).
fn uniform_block(rng: &mut StdRng, lo: f64, hi: f64, n: usize) -> Vec<f64> {
    (0..n).map(|_| lo + (hi - lo) * rng.gen::<f64>()).collect()
}

fn polar_points(angles: &[f64], r_squared: &[f64], min_r: f64, max_r: f64) -> Vec<Complex64> {
    angles
        .iter()
        .zip(r_squared)
        // clamp: sqrt of a rounded r² can land an ulp outside the band
        .map(|(&theta, &r2)| Complex64::from_polar(r2.sqrt().clamp(min_r, max_r), theta))
        .collect()
}
