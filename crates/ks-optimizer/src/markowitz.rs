//! Mean-variance allocation: minimise `λ·wᵀΣw − (1−λ)·wᵀμ` over the
//! feasible region.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ks_types::OptimizerError;

use crate::constraints::{Constraints, GroupConstraint};
use crate::qp::{QpOutcome, QpProblem};
use crate::settings::SolverSettings;

/// How the solve ended. Only `Optimal` and `Regularized` carry weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum OptimizationStatus {
    Optimal,
    /// Covariance was singular; `ridge·I` was added before solving.
    Regularized { ridge: f64 },
    Infeasible { reason: String },
    SolverDivergence {
        iterations: usize,
        primal_residual: f64,
        dual_residual: f64,
    },
}

impl OptimizationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Optimal | Self::Regularized { .. })
    }
}

/// Weights and their risk/return profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    /// Standard deviation `√(wᵀΣw)` under the supplied covariance.
    pub risk: f64,
    pub sharpe_ratio: f64,
}

impl Allocation {
    pub(crate) fn evaluate(weights: Vec<f64>, mu: &[f64], cov: &[Vec<f64>], risk_free_rate: f64) -> Self {
        let expected_return = weights.iter().zip(mu).map(|(w, m)| w * m).sum::<f64>();
        let variance: f64 = weights
            .iter()
            .enumerate()
            .map(|(i, wi)| wi * cov[i].iter().zip(&weights).map(|(c, wj)| c * wj).sum::<f64>())
            .sum();
        let risk = variance.max(0.0).sqrt();
        let sharpe_ratio = if risk > 1e-12 {
            (expected_return - risk_free_rate) / risk
        } else {
            0.0
        };
        Self {
            weights,
            expected_return,
            risk,
            sharpe_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub status: OptimizationStatus,
    pub allocation: Option<Allocation>,
    pub risk_aversion: f64,
    pub iterations: usize,
    pub num_assets: usize,
}

impl OptimizationResult {
    fn failed(status: OptimizationStatus, risk_aversion: f64, iterations: usize, num_assets: usize) -> Self {
        Self {
            status,
            allocation: None,
            risk_aversion,
            iterations,
            num_assets,
        }
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.allocation.as_ref().map(|a| a.weights.as_slice())
    }

    /// Solved weights, or `1/n` each when the solve failed.
    pub fn weights_or_equal(&self) -> Vec<f64> {
        match self.weights() {
            Some(w) => w.to_vec(),
            None => vec![1.0 / self.num_assets.max(1) as f64; self.num_assets],
        }
    }
}

/// Check shapes and values; returns the dimension.
pub(crate) fn validate_inputs(mu: &[f64], cov: &[Vec<f64>], risk_aversion: f64) -> Result<usize, OptimizerError> {
    let n = mu.len();
    if n == 0 {
        return Err(OptimizerError::invalid("expected_returns", "no instruments"));
    }
    if !risk_aversion.is_finite() || !(0.0..=1.0).contains(&risk_aversion) {
        return Err(OptimizerError::invalid(
            "risk_aversion",
            format!("{risk_aversion} is outside [0, 1]"),
        ));
    }
    if let Some(i) = mu.iter().position(|m| !m.is_finite()) {
        return Err(OptimizerError::invalid(
            "expected_returns",
            format!("entry {i} is not finite"),
        ));
    }
    if cov.len() != n || cov.iter().any(|row| row.len() != n) {
        return Err(OptimizerError::invalid("covariance", format!("must be {n}x{n}")));
    }
    for i in 0..n {
        if cov[i].iter().any(|c| !c.is_finite()) {
            return Err(OptimizerError::invalid("covariance", format!("row {i} is not finite")));
        }
        if cov[i][i] < 0.0 {
            return Err(OptimizerError::invalid("covariance", format!("negative variance at {i}")));
        }
        for j in 0..i {
            let (a, b) = (cov[i][j], cov[j][i]);
            if (a - b).abs() > 1e-10 * (1.0 + a.abs().max(b.abs())) {
                return Err(OptimizerError::invalid(
                    "covariance",
                    format!("not symmetric at ({i}, {j})"),
                ));
            }
        }
    }
    Ok(n)
}

/// Covariance as a matrix, with the ridge applied when it is singular.
fn regularize(cov: &[Vec<f64>], ridge: f64) -> Result<(DMatrix<f64>, Option<f64>), OptimizerError> {
    let n = cov.len();
    let sigma = DMatrix::from_fn(n, n, |i, j| cov[i][j]);
    let eigenvalues = sigma.clone().symmetric_eigenvalues();
    let scale = eigenvalues.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let min = eigenvalues.iter().fold(f64::INFINITY, |m, v| m.min(*v));
    if min > 1e-12 * scale {
        return Ok((sigma, None));
    }
    if min < -1e-10 * scale {
        return Err(OptimizerError::invalid(
            "covariance",
            format!("not positive semi-definite (eigenvalue {min:.3e})"),
        ));
    }
    let applied = ridge + (-min).max(0.0);
    Ok((sigma + DMatrix::identity(n, n) * applied, Some(applied)))
}

/// Closest point to `w` (Euclidean) with `Σw = 1` inside the boxes, by
/// bisection on the shift `τ` in `clamp(w − τ)`.
fn project_to_budget(w: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    let shifted = |tau: f64| -> Vec<f64> {
        w.iter()
            .zip(bounds)
            .map(|(x, &(lo, hi))| (x - tau).clamp(lo, hi))
            .collect()
    };
    let mut lo = w.iter().zip(bounds).map(|(x, b)| x - b.1).fold(f64::INFINITY, f64::min);
    let mut hi = w.iter().zip(bounds).map(|(x, b)| x - b.0).fold(f64::NEG_INFINITY, f64::max);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if shifted(mid).iter().sum::<f64>() > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    shifted(0.5 * (lo + hi))
}

/// Slack allowed on a group limit after [`project_feasible`].
const GROUP_TOLERANCE: f64 = 1e-10;

fn group_sum(w: &[f64], group: &GroupConstraint) -> f64 {
    group.members.iter().map(|&i| w[i]).sum()
}

/// Closest point to `w` whose member sum lies within the group's limits.
fn project_group(w: &[f64], group: &GroupConstraint) -> Vec<f64> {
    let mut out = w.to_vec();
    if group.members.is_empty() {
        return out;
    }
    let sum = group_sum(w, group);
    let excess = if sum > group.upper() {
        sum - group.upper()
    } else if sum < group.lower() {
        sum - group.lower()
    } else {
        return out;
    };
    let shift = excess / group.members.len() as f64;
    for &i in &group.members {
        out[i] -= shift;
    }
    out
}

fn dykstra_step(x: &[f64], increment: &mut [f64], project: impl Fn(&[f64]) -> Vec<f64>) -> Vec<f64> {
    let y: Vec<f64> = x.iter().zip(increment.iter()).map(|(a, b)| a + b).collect();
    let projected = project(&y);
    for ((inc, a), b) in increment.iter_mut().zip(&y).zip(&projected) {
        *inc = a - b;
    }
    projected
}

/// Euclidean projection onto budget, boxes and group limits by Dykstra's
/// alternating projections. The budget-and-box step always runs last.
fn project_feasible(w: &[f64], bounds: &[(f64, f64)], groups: &[GroupConstraint]) -> Vec<f64> {
    const MAX_SWEEPS: usize = 1_000;
    if groups.is_empty() {
        return project_to_budget(w, bounds);
    }
    let mut x = w.to_vec();
    let mut increments = vec![vec![0.0; w.len()]; groups.len() + 1];
    for sweep in 0..MAX_SWEEPS {
        x = dykstra_step(&x, &mut increments[0], |y| project_to_budget(y, bounds));
        let satisfied = groups.iter().all(|g| {
            let sum = group_sum(&x, g);
            sum >= g.lower() - GROUP_TOLERANCE && sum <= g.upper() + GROUP_TOLERANCE
        });
        if satisfied || sweep + 1 == MAX_SWEEPS {
            break;
        }
        for (k, group) in groups.iter().enumerate() {
            x = dykstra_step(&x, &mut increments[k + 1], |y| project_group(y, group));
        }
    }
    x
}

fn build_problem(
    sigma: &DMatrix<f64>,
    mu: &[f64],
    risk_aversion: f64,
    bounds: &[(f64, f64)],
    constraints: &Constraints,
) -> QpProblem {
    let n = mu.len();
    let rows = 1 + n + constraints.groups.len();
    let mut a = DMatrix::zeros(rows, n);
    let mut l = DVector::zeros(rows);
    let mut u = DVector::zeros(rows);

    for j in 0..n {
        a[(0, j)] = 1.0;
    }
    l[0] = 1.0;
    u[0] = 1.0;
    for (i, &(lo, hi)) in bounds.iter().enumerate() {
        a[(1 + i, i)] = 1.0;
        l[1 + i] = lo;
        u[1 + i] = hi;
    }
    for (g, group) in constraints.groups.iter().enumerate() {
        let row = 1 + n + g;
        for &member in &group.members {
            a[(row, member)] = 1.0;
        }
        l[row] = group.lower();
        u[row] = group.upper();
    }

    let mut p = sigma * (2.0 * risk_aversion);
    let mut q = DVector::from_iterator(n, mu.iter().map(|m| -(1.0 - risk_aversion) * m));
    // Unit-scale the objective; the minimiser is unchanged.
    let scale = p.amax().max(q.amax());
    if scale > 0.0 {
        p /= scale;
        q /= scale;
    }
    QpProblem { p, q, a, l, u }
}

/// Optimise from an equal-weight start.
pub fn optimize(
    expected_returns: &[f64],
    covariance: &[Vec<f64>],
    risk_aversion: f64,
    constraints: &Constraints,
    settings: &SolverSettings,
) -> Result<OptimizationResult, OptimizerError> {
    optimize_from(expected_returns, covariance, risk_aversion, constraints, settings, None)
}

/// Mean-variance optimisation as a pure function of its inputs.
///
/// `risk_aversion` is λ in `[0, 1]`. Malformed input is an error; an empty
/// feasible region, a singular covariance and an exhausted iteration budget
/// are reported through [`OptimizationResult::status`].
pub fn optimize_from(
    expected_returns: &[f64],
    covariance: &[Vec<f64>],
    risk_aversion: f64,
    constraints: &Constraints,
    settings: &SolverSettings,
    warm_start: Option<&[f64]>,
) -> Result<OptimizationResult, OptimizerError> {
    settings.validate()?;
    let n = validate_inputs(expected_returns, covariance, risk_aversion)?;
    let bounds = constraints.resolve(n)?;
    if let Some(start) = warm_start {
        if start.len() != n || start.iter().any(|w| !w.is_finite()) {
            return Err(OptimizerError::invalid("warm_start", format!("expected {n} finite weights")));
        }
    }

    if let Some(reason) = constraints.infeasibility(&bounds) {
        warn!(%reason, "allocation constraints are infeasible");
        return Ok(OptimizationResult::failed(
            OptimizationStatus::Infeasible { reason },
            risk_aversion,
            0,
            n,
        ));
    }

    if n == 1 {
        if let Some(group) = constraints.groups.iter().find(|g| g.lower() > 1.0 || g.upper() < 1.0) {
            let reason = format!("group {} excludes the only instrument", group.name);
            warn!(%reason, "allocation constraints are infeasible");
            return Ok(OptimizationResult::failed(
                OptimizationStatus::Infeasible { reason },
                risk_aversion,
                0,
                n,
            ));
        }
        let allocation = Allocation::evaluate(vec![1.0], expected_returns, covariance, settings.risk_free_rate);
        return Ok(OptimizationResult {
            status: OptimizationStatus::Optimal,
            allocation: Some(allocation),
            risk_aversion,
            iterations: 0,
            num_assets: 1,
        });
    }

    let (sigma, ridge) = regularize(covariance, settings.ridge)?;
    if let Some(ridge) = ridge {
        warn!(ridge, "covariance is singular; regularising");
    }

    let problem = build_problem(&sigma, expected_returns, risk_aversion, &bounds, constraints);
    let start = match warm_start {
        Some(w) => DVector::from_column_slice(w),
        None => DVector::from_vec(project_feasible(&vec![1.0 / n as f64; n], &bounds, &constraints.groups)),
    };
    let solution = problem.solve(settings, Some(&start));
    debug!(assets = n, iterations = solution.iterations, outcome = ?solution.outcome, "qp solved");

    let status = match solution.outcome {
        QpOutcome::Solved => match ridge {
            Some(ridge) => OptimizationStatus::Regularized { ridge },
            None => OptimizationStatus::Optimal,
        },
        QpOutcome::PrimalInfeasible => OptimizationStatus::Infeasible {
            reason: "no allocation satisfies the bounds and group limits".to_string(),
        },
        QpOutcome::MaxIterations {
            primal_residual,
            dual_residual,
        } => OptimizationStatus::SolverDivergence {
            iterations: solution.iterations,
            primal_residual,
            dual_residual,
        },
        QpOutcome::Singular => OptimizationStatus::SolverDivergence {
            iterations: 0,
            primal_residual: f64::MAX,
            dual_residual: f64::MAX,
        },
    };

    if !status.is_success() {
        warn!(?status, "optimisation did not produce an allocation");
        return Ok(OptimizationResult::failed(status, risk_aversion, solution.iterations, n));
    }

    let weights = project_feasible(solution.x.as_slice(), &bounds, &constraints.groups);
    let allocation = Allocation::evaluate(weights, expected_returns, covariance, settings.risk_free_rate);
    Ok(OptimizationResult {
        status,
        allocation: Some(allocation),
        risk_aversion,
        iterations: solution.iterations,
        num_assets: n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn diagonal(vars: &[f64]) -> Vec<Vec<f64>> {
        (0..vars.len())
            .map(|i| (0..vars.len()).map(|j| if i == j { vars[i] } else { 0.0 }).collect())
            .collect()
    }

    /// Budget-only optimum for diagonal Σ from the KKT conditions.
    fn diagonal_optimum(mu: &[f64], vars: &[f64], lambda: f64) -> Vec<f64> {
        let a: Vec<f64> = vars.iter().map(|v| 1.0 / (2.0 * lambda * v)).collect();
        let nu = (a.iter().zip(mu).map(|(a, m)| a * (1.0 - lambda) * m).sum::<f64>() - 1.0) / a.iter().sum::<f64>();
        a.iter().zip(mu).map(|(a, m)| a * ((1.0 - lambda) * m - nu)).collect()
    }

    fn assert_feasible(weights: &[f64], lo: f64, hi: f64) {
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(weights.iter().all(|w| *w >= lo && *w <= hi), "{weights:?}");
    }

    #[test]
    fn matches_closed_form_when_bounds_are_slack() {
        let mu = [0.08, 0.12];
        let vars = [0.04, 0.09];
        let result = optimize(&mu, &diagonal(&vars), 0.5, &Constraints::long_only(), &SolverSettings::default()).unwrap();
        assert_eq!(result.status, OptimizationStatus::Optimal);
        let weights = result.weights().unwrap();
        let expected = diagonal_optimum(&mu, &vars, 0.5);
        assert_relative_eq!(weights[0], expected[0], epsilon = 1e-4);
        assert_relative_eq!(weights[1], expected[1], epsilon = 1e-4);
        assert_feasible(weights, 0.0, 1.0);
    }

    #[test]
    fn full_risk_aversion_gives_minimum_variance() {
        let result = optimize(
            &[0.08, 0.12],
            &diagonal(&[0.04, 0.09]),
            1.0,
            &Constraints::long_only(),
            &SolverSettings::default(),
        )
        .unwrap();
        let weights = result.weights().unwrap();
        assert_relative_eq!(weights[0], 25.0 / (25.0 + 100.0 / 9.0), epsilon = 1e-4);
        let allocation = result.allocation.as_ref().unwrap();
        assert_relative_eq!(allocation.risk, (weights[0].powi(2) * 0.04 + weights[1].powi(2) * 0.09).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn long_only_bounds_bind() {
        // The third asset is dominated and would be shorted without bounds.
        let mu = [0.10, 0.12, -0.05];
        let cov = vec![
            vec![0.04, 0.01, 0.0],
            vec![0.01, 0.09, 0.0],
            vec![0.0, 0.0, 0.16],
        ];
        let long = optimize(&mu, &cov, 0.3, &Constraints::long_only(), &SolverSettings::default()).unwrap();
        let weights = long.weights().unwrap();
        assert_feasible(weights, 0.0, 1.0);
        assert!(weights[2] < 1e-6);

        let short = optimize(&mu, &cov, 0.3, &Constraints::with_short(), &SolverSettings::default()).unwrap();
        let weights = short.weights().unwrap();
        assert_feasible(weights, -1.0, 1.0);
        assert!(weights[2] < -0.01);
    }

    #[test]
    fn group_cap_is_respected() {
        let mu = [0.10, 0.12, 0.04];
        let cov = diagonal(&[0.04, 0.05, 0.02]);
        let constraints = Constraints::long_only().with_group(GroupConstraint::cap("growth", vec![0, 1], 0.3));
        let result = optimize(&mu, &cov, 0.2, &constraints, &SolverSettings::default()).unwrap();
        let weights = result.weights().unwrap();
        assert_feasible(weights, 0.0, 1.0);
        assert!(weights[0] + weights[1] <= 0.3 + 1e-9, "{weights:?}");
    }

    #[test]
    fn polish_pulls_group_sums_inside_limits() {
        let bounds = [(0.0, 1.0); 4];
        let groups = [
            GroupConstraint::cap("growth", vec![0, 1], 0.3),
            GroupConstraint::new("defensive", vec![3]).with_min(0.25),
        ];
        // Budget and both groups violated.
        let w = project_feasible(&[0.2, 0.1500004, 0.45, 0.2], &bounds, &groups);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12, "{w:?}");
        assert!(w.iter().all(|x| (0.0..=1.0).contains(x)), "{w:?}");
        assert!(w[0] + w[1] <= 0.3 + GROUP_TOLERANCE, "{w:?}");
        assert!(w[3] >= 0.25 - GROUP_TOLERANCE, "{w:?}");
        // Already-feasible points come back unchanged.
        let feasible = [0.1, 0.2, 0.4, 0.3];
        let same = project_feasible(&feasible, &bounds, &groups);
        for (a, b) in same.iter().zip(feasible) {
            assert_relative_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn single_instrument_gets_full_weight() {
        for lambda in [0.0, 0.3, 1.0] {
            let result = optimize(&[0.05], &[vec![0.02]], lambda, &Constraints::long_only(), &SolverSettings::default()).unwrap();
            assert_eq!(result.weights(), Some(&[1.0][..]));
            assert_eq!(result.status, OptimizationStatus::Optimal);
        }
    }

    #[test]
    fn infeasible_caps_report_status() {
        let capped = Constraints::long_only().with_group(GroupConstraint::cap("all", vec![0, 1], 0.6));
        let result = optimize(&[0.1, 0.1], &diagonal(&[0.04, 0.04]), 0.5, &capped, &SolverSettings::default()).unwrap();
        assert!(matches!(result.status, OptimizationStatus::Infeasible { .. }));
        assert!(result.allocation.is_none());
        assert_eq!(result.weights_or_equal(), vec![0.5, 0.5]);

        // Overlapping caps are beyond the bound arithmetic; the solver must certify.
        let overlapping = Constraints::long_only()
            .with_group(GroupConstraint::cap("a", vec![0, 1], 0.3))
            .with_group(GroupConstraint::cap("b", vec![1, 2], 0.3));
        let result = optimize(&[0.1, 0.1, 0.1], &diagonal(&[0.04; 3]), 0.5, &overlapping, &SolverSettings::default()).unwrap();
        assert!(matches!(result.status, OptimizationStatus::Infeasible { .. }), "{:?}", result.status);
    }

    #[test]
    fn singular_covariance_is_regularized() {
        let cov = vec![vec![0.04, 0.04], vec![0.04, 0.04]];
        let result = optimize(&[0.08, 0.08], &cov, 1.0, &Constraints::long_only(), &SolverSettings::default()).unwrap();
        assert!(matches!(result.status, OptimizationStatus::Regularized { ridge } if ridge > 0.0));
        let allocation = result.allocation.unwrap();
        assert_feasible(&allocation.weights, 0.0, 1.0);
        assert_relative_eq!(allocation.risk, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn exhausted_budget_reports_divergence() {
        let result = optimize(
            &[0.10, 0.12, 0.04],
            &diagonal(&[0.04, 0.05, 0.02]),
            0.5,
            &Constraints::long_only(),
            &SolverSettings::default().with_max_iterations(2),
        )
        .unwrap();
        assert!(matches!(result.status, OptimizationStatus::SolverDivergence { iterations: 2, .. }));
        assert!(result.weights().is_none());
    }

    #[test]
    fn malformed_input_is_an_error() {
        let settings = SolverSettings::default();
        let lo = Constraints::long_only();
        assert!(optimize(&[], &[], 0.5, &lo, &settings).is_err());
        assert!(optimize(&[0.1, 0.2], &diagonal(&[0.04]), 0.5, &lo, &settings).is_err());
        assert!(optimize(&[0.1], &[vec![0.04]], 1.5, &lo, &settings).is_err());
        assert!(optimize(&[f64::NAN], &[vec![0.04]], 0.5, &lo, &settings).is_err());
        assert!(optimize(&[0.1, 0.1], &[vec![0.04, 0.01], vec![0.02, 0.04]], 0.5, &lo, &settings).is_err());
        let indefinite = vec![vec![0.01, 0.05], vec![0.05, 0.01]];
        assert!(matches!(
            optimize(&[0.1, 0.1], &indefinite, 0.5, &lo, &settings),
            Err(OptimizerError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn sharpe_uses_risk_free_rate() {
        let settings = SolverSettings::default().with_risk_free_rate(0.02);
        let result = optimize(&[0.08, 0.12], &diagonal(&[0.04, 0.09]), 0.5, &Constraints::long_only(), &settings).unwrap();
        let a = result.allocation.unwrap();
        assert_relative_eq!(a.sharpe_ratio, (a.expected_return - 0.02) / a.risk, epsilon = 1e-12);
    }

    #[test]
    fn projection_restores_budget() {
        let w = project_to_budget(&[0.7, 0.5, -0.1], &[(0.0, 1.0); 3]);
        assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(w.iter().all(|x| (0.0..=1.0).contains(x)));
        assert_relative_eq!(w[0] - w[1], 0.2, epsilon = 1e-9);
    }
}
