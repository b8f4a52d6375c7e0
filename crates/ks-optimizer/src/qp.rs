//! Operator-splitting (ADMM) solver for convex quadratic programs
//!
//! ```text
//! minimise   ½ xᵀPx + qᵀx
//! subject to l ≤ Ax ≤ u
//! ```
//!
//! Each iteration solves one linear system with the fixed matrix
//! `P + σI + Aᵀ diag(ρ) A`, factorised once by Cholesky and refactorised only
//! when the step size ρ is adapted. Rows with `l == u` get a larger ρ.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::settings::SolverSettings;

const EQUALITY_RHO_SCALE: f64 = 1e3;
const RHO_MIN: f64 = 1e-6;
const RHO_MAX: f64 = 1e6;
const ADAPT_INTERVAL: usize = 25;
const ADAPT_THRESHOLD: f64 = 5.0;
const INFEASIBILITY_TOL: f64 = 1e-5;

#[derive(Debug, Clone)]
pub(crate) struct QpProblem {
    pub p: DMatrix<f64>,
    pub q: DVector<f64>,
    pub a: DMatrix<f64>,
    pub l: DVector<f64>,
    pub u: DVector<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QpOutcome {
    Solved,
    PrimalInfeasible,
    MaxIterations {
        primal_residual: f64,
        dual_residual: f64,
    },
    /// The linear system could not be factorised.
    Singular,
}

#[derive(Debug, Clone)]
pub(crate) struct QpSolution {
    pub x: DVector<f64>,
    pub iterations: usize,
    pub outcome: QpOutcome,
}

fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
}

fn project(v: &DVector<f64>, l: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(v.len(), v.iter().zip(l.iter().zip(u.iter())).map(|(x, (lo, hi))| x.max(*lo).min(*hi)))
}

impl QpProblem {
    fn rho_vector(&self, rho: f64) -> DVector<f64> {
        DVector::from_iterator(
            self.l.len(),
            self.l.iter().zip(self.u.iter()).map(|(lo, hi)| {
                if (hi - lo).abs() < 1e-12 {
                    rho * EQUALITY_RHO_SCALE
                } else {
                    rho
                }
            }),
        )
    }

    fn factorise(&self, sigma: f64, rho: &DVector<f64>) -> Option<Cholesky<f64, Dyn>> {
        let n = self.q.len();
        let weighted = DMatrix::from_diagonal(rho) * &self.a;
        let kkt = &self.p + DMatrix::identity(n, n) * sigma + self.a.transpose() * weighted;
        kkt.cholesky()
    }

    /// `Aᵀδy ≈ 0` with `uᵀδy₊ + lᵀδy₋ < 0` proves `{x : l ≤ Ax ≤ u}` empty.
    fn certifies_infeasibility(&self, at: &DMatrix<f64>, delta_y: &DVector<f64>) -> bool {
        let norm = inf_norm(delta_y);
        if norm <= 1e-12 {
            return false;
        }
        let tol = INFEASIBILITY_TOL * norm;
        if inf_norm(&(at * delta_y)) > tol {
            return false;
        }
        let support: f64 = delta_y
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                if d > 0.0 {
                    self.u[i] * d
                } else if d < 0.0 {
                    self.l[i] * d
                } else {
                    0.0
                }
            })
            .sum();
        support < -tol
    }

    /// Solve from `warm_start` (zeros when absent). Deterministic in its inputs.
    pub fn solve(&self, settings: &SolverSettings, warm_start: Option<&DVector<f64>>) -> QpSolution {
        let n = self.q.len();
        let alpha = settings.alpha;
        let at = self.a.transpose();

        let mut x = warm_start.cloned().unwrap_or_else(|| DVector::zeros(n));
        let mut z = project(&(&self.a * &x), &self.l, &self.u);
        let mut y = DVector::zeros(self.l.len());

        let mut rho = settings.rho;
        let mut rho_vec = self.rho_vector(rho);
        let mut kkt = match self.factorise(settings.sigma, &rho_vec) {
            Some(f) => f,
            None => {
                return QpSolution {
                    x,
                    iterations: 0,
                    outcome: QpOutcome::Singular,
                }
            }
        };

        let mut primal = f64::MAX;
        let mut dual = f64::MAX;
        for iteration in 1..=settings.max_iterations {
            let rhs = &x * settings.sigma - &self.q + &at * (rho_vec.component_mul(&z) - &y);
            let x_tilde = kkt.solve(&rhs);
            let z_tilde = &self.a * &x_tilde;

            let x_next = &x_tilde * alpha + &x * (1.0 - alpha);
            let z_relaxed = &z_tilde * alpha + &z * (1.0 - alpha);
            let z_next = project(&(&z_relaxed + y.component_div(&rho_vec)), &self.l, &self.u);
            let delta_y = rho_vec.component_mul(&(&z_relaxed - &z_next));
            y += &delta_y;
            x = x_next;
            z = z_next;

            let ax = &self.a * &x;
            let px = &self.p * &x;
            let aty = &at * &y;
            primal = inf_norm(&(&ax - &z));
            dual = inf_norm(&(&px + &self.q + &aty));
            let primal_scale = inf_norm(&ax).max(inf_norm(&z));
            let dual_scale = inf_norm(&px).max(inf_norm(&aty)).max(inf_norm(&self.q));

            if primal <= settings.eps_abs + settings.eps_rel * primal_scale
                && dual <= settings.eps_abs + settings.eps_rel * dual_scale
            {
                return QpSolution {
                    x,
                    iterations: iteration,
                    outcome: QpOutcome::Solved,
                };
            }
            if self.certifies_infeasibility(&at, &delta_y) {
                return QpSolution {
                    x,
                    iterations: iteration,
                    outcome: QpOutcome::PrimalInfeasible,
                };
            }

            if iteration % ADAPT_INTERVAL == 0 && primal > 0.0 && dual > 0.0 {
                let ratio = (primal / primal_scale.max(1e-12)) / (dual / dual_scale.max(1e-12));
                let candidate = (rho * ratio.sqrt()).clamp(RHO_MIN, RHO_MAX);
                if candidate.is_finite() && (candidate > rho * ADAPT_THRESHOLD || candidate < rho / ADAPT_THRESHOLD) {
                    let candidate_vec = self.rho_vector(candidate);
                    if let Some(f) = self.factorise(settings.sigma, &candidate_vec) {
                        rho = candidate;
                        rho_vec = candidate_vec;
                        kkt = f;
                    }
                }
            }
        }

        QpSolution {
            x,
            iterations: settings.max_iterations,
            outcome: QpOutcome::MaxIterations {
                primal_residual: primal,
                dual_residual: dual,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn box_constrained_quadratic() {
        // min (x0 - 2)² + (x1 + 1)²  s.t. 0 ≤ x ≤ 1  →  x = (1, 0)
        let problem = QpProblem {
            p: DMatrix::identity(2, 2) * 2.0,
            q: DVector::from_vec(vec![-4.0, 2.0]),
            a: DMatrix::identity(2, 2),
            l: DVector::from_vec(vec![0.0, 0.0]),
            u: DVector::from_vec(vec![1.0, 1.0]),
        };
        let solution = problem.solve(&SolverSettings::default(), None);
        assert_eq!(solution.outcome, QpOutcome::Solved);
        assert_relative_eq!(solution.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(solution.x[1], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn equality_constrained_quadratic() {
        // min x0² + x1²  s.t. x0 + x1 = 1  →  x = (0.5, 0.5)
        let problem = QpProblem {
            p: DMatrix::identity(2, 2) * 2.0,
            q: DVector::zeros(2),
            a: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            l: DVector::from_vec(vec![1.0]),
            u: DVector::from_vec(vec![1.0]),
        };
        let solution = problem.solve(&SolverSettings::default(), None);
        assert_eq!(solution.outcome, QpOutcome::Solved);
        assert_relative_eq!(solution.x[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(solution.x[1], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn contradictory_rows_are_certified_infeasible() {
        // x ≥ 2 and x ≤ 1 through two separate rows.
        let problem = QpProblem {
            p: DMatrix::identity(1, 1),
            q: DVector::zeros(1),
            a: DMatrix::from_row_slice(2, 1, &[1.0, 1.0]),
            l: DVector::from_vec(vec![2.0, f64::NEG_INFINITY]),
            u: DVector::from_vec(vec![f64::INFINITY, 1.0]),
        };
        let solution = problem.solve(&SolverSettings::default(), None);
        assert_eq!(solution.outcome, QpOutcome::PrimalInfeasible);
    }

    #[test]
    fn iteration_budget_is_reported() {
        let problem = QpProblem {
            p: DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]),
            q: DVector::from_vec(vec![-1.0, -3.0]),
            a: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            l: DVector::from_vec(vec![1.0]),
            u: DVector::from_vec(vec![1.0]),
        };
        let solution = problem.solve(&SolverSettings::default().with_max_iterations(2), None);
        assert_eq!(solution.iterations, 2);
        assert!(matches!(solution.outcome, QpOutcome::MaxIterations { .. }));
    }
}
