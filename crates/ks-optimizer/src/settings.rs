use serde::{Deserialize, Serialize};

use ks_types::OptimizerError;

/// ADMM solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Iteration budget before reporting `SolverDivergence`.
    pub max_iterations: usize,
    pub eps_abs: f64,
    pub eps_rel: f64,
    /// Initial ADMM step size; adapted while solving.
    pub rho: f64,
    /// Proximal regularisation of the linear system.
    pub sigma: f64,
    /// Over-relaxation in (0, 2).
    pub alpha: f64,
    /// Multiple of the identity added to a singular covariance matrix.
    pub ridge: f64,
    /// Annual risk-free rate used for the Sharpe ratio.
    pub risk_free_rate: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            eps_abs: 1e-7,
            eps_rel: 1e-7,
            rho: 0.1,
            sigma: 1e-6,
            alpha: 1.6,
            ridge: 1e-8,
            risk_free_rate: 0.0,
        }
    }
}

impl SolverSettings {
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_tolerances(mut self, eps_abs: f64, eps_rel: f64) -> Self {
        self.eps_abs = eps_abs;
        self.eps_rel = eps_rel;
        self
    }

    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OptimizerError> {
        if self.max_iterations == 0 {
            return Err(OptimizerError::invalid("max_iterations", "must be positive"));
        }
        for (name, value) in [
            ("eps_abs", self.eps_abs),
            ("eps_rel", self.eps_rel),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(OptimizerError::invalid(name, "must be finite and non-negative"));
            }
        }
        if self.eps_abs == 0.0 && self.eps_rel == 0.0 {
            return Err(OptimizerError::invalid("eps_abs", "at least one tolerance must be positive"));
        }
        for (name, value) in [("rho", self.rho), ("sigma", self.sigma), ("ridge", self.ridge)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(OptimizerError::invalid(name, "must be positive and finite"));
            }
        }
        if !self.alpha.is_finite() || self.alpha <= 0.0 || self.alpha >= 2.0 {
            return Err(OptimizerError::invalid("alpha", "must lie in (0, 2)"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(OptimizerError::invalid("risk_free_rate", "must be finite"));
        }
        Ok(())
    }
}
