//! Sweeps over the allocation space: the efficient frontier by varying λ,
//! and a seeded random-portfolio search for the best Sharpe ratio.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ks_types::OptimizerError;

use crate::constraints::Constraints;
use crate::markowitz::{optimize_from, validate_inputs, Allocation};
use crate::settings::SolverSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub risk_aversion: f64,
    pub allocation: Allocation,
}

/// Optimal allocations for `points` evenly spaced λ from 1 down to 0, so the
/// points run from minimum variance towards maximum return. Each solve is
/// warm-started from the previous one; points whose solve fails are left out.
pub fn efficient_frontier(
    expected_returns: &[f64],
    covariance: &[Vec<f64>],
    constraints: &Constraints,
    settings: &SolverSettings,
    points: usize,
) -> Result<Vec<FrontierPoint>, OptimizerError> {
    if points < 2 {
        return Err(OptimizerError::invalid("points", "a frontier needs at least two points"));
    }
    let mut frontier = Vec::with_capacity(points);
    let mut warm: Option<Vec<f64>> = None;
    for k in 0..points {
        let risk_aversion = 1.0 - k as f64 / (points - 1) as f64;
        let result = optimize_from(
            expected_returns,
            covariance,
            risk_aversion,
            constraints,
            settings,
            warm.as_deref(),
        )?;
        match result.allocation {
            Some(allocation) => {
                warm = Some(allocation.weights.clone());
                frontier.push(FrontierPoint {
                    risk_aversion,
                    allocation,
                });
            }
            None => debug!(risk_aversion, status = ?result.status, "frontier point skipped"),
        }
    }
    Ok(frontier)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomSearchResult {
    /// Highest-Sharpe sampled portfolio.
    pub best: Allocation,
    pub samples: usize,
    pub seed: u64,
}

/// Sample long-only portfolios (normalised uniform weights) and keep the one
/// with the highest Sharpe ratio.
pub fn random_search(
    expected_returns: &[f64],
    covariance: &[Vec<f64>],
    samples: usize,
    seed: u64,
    risk_free_rate: f64,
) -> Result<RandomSearchResult, OptimizerError> {
    let n = validate_inputs(expected_returns, covariance, 0.0)?;
    if samples == 0 {
        return Err(OptimizerError::invalid("samples", "must be positive"));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut best: Option<Allocation> = None;
    for _ in 0..samples {
        let raw: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() + f64::EPSILON).collect();
        let total: f64 = raw.iter().sum();
        let weights = raw.into_iter().map(|w| w / total).collect();
        let candidate = Allocation::evaluate(weights, expected_returns, covariance, risk_free_rate);
        if best.as_ref().map_or(true, |b| candidate.sharpe_ratio > b.sharpe_ratio) {
            best = Some(candidate);
        }
    }
    let best = best.ok_or_else(|| OptimizerError::invalid("samples", "no portfolio sampled"))?;
    Ok(RandomSearchResult { best, samples, seed })
}
