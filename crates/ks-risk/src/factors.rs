//! Risk factors and their joint distribution.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use ks_types::{MarketState, RiskError};

/// A market quantity shocked by the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskFactor {
    /// Parallel absolute shift of the discount curve.
    Rates,
    /// Log return of an underlying's spot.
    Spot(String),
    /// Log change of an underlying's whole volatility surface.
    Volatility(String),
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskFactor::Rates => write!(f, "rates"),
            RiskFactor::Spot(u) => write!(f, "spot:{u}"),
            RiskFactor::Volatility(u) => write!(f, "vol:{u}"),
        }
    }
}

/// Annualised drift and covariance of the factor shocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorModel {
    pub factors: Vec<RiskFactor>,
    pub drift: Vec<f64>,
    /// Row-major, `factors.len()` square.
    pub covariance: Vec<Vec<f64>>,
}

impl FactorModel {
    pub fn new(factors: Vec<RiskFactor>, drift: Vec<f64>, covariance: Vec<Vec<f64>>) -> Result<Self, RiskError> {
        let model = Self {
            factors,
            drift,
            covariance,
        };
        model.validate()?;
        Ok(model)
    }

    /// Uncorrelated factors with zero drift and the given annual volatilities.
    pub fn independent(factors: Vec<(RiskFactor, f64)>) -> Result<Self, RiskError> {
        let n = factors.len();
        let mut covariance = vec![vec![0.0; n]; n];
        for (i, (_, vol)) in factors.iter().enumerate() {
            covariance[i][i] = vol * vol;
        }
        Self::new(
            factors.into_iter().map(|(f, _)| f).collect(),
            vec![0.0; n],
            covariance,
        )
    }

    /// Sample mean and (n − 1) covariance of per-period factor changes, scaled
    /// to annual units by `periods_per_year`.
    pub fn estimate(
        factors: Vec<RiskFactor>,
        history: &[Vec<f64>],
        periods_per_year: f64,
    ) -> Result<Self, RiskError> {
        if history.len() < 2 {
            return Err(RiskError::invalid("history", "need at least two observations"));
        }
        if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
            return Err(RiskError::invalid("periods_per_year", "must be positive"));
        }
        let n = factors.len();
        if let Some(bad) = history.iter().position(|row| row.len() != n) {
            return Err(RiskError::invalid(
                "history",
                format!("observation {bad} has {} values for {n} factors", history[bad].len()),
            ));
        }

        let count = history.len() as f64;
        let mean: Vec<f64> = (0..n)
            .map(|j| history.iter().map(|row| row[j]).sum::<f64>() / count)
            .collect();
        let covariance = crate::metrics::sample_covariance(history)
            .into_iter()
            .map(|row| row.into_iter().map(|c| c * periods_per_year).collect())
            .collect();
        let drift = mean.into_iter().map(|m| m * periods_per_year).collect();
        Self::new(factors, drift, covariance)
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    fn validate(&self) -> Result<(), RiskError> {
        let n = self.factors.len();
        if n == 0 {
            return Err(RiskError::invalid("factors", "factor model has no factors"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.factors.iter().find(|f| !seen.insert(*f)) {
            return Err(RiskError::invalid("factors", format!("{dup} listed twice")));
        }
        if self.drift.len() != n {
            return Err(RiskError::invalid(
                "drift",
                format!("{} entries for {n} factors", self.drift.len()),
            ));
        }
        if self.covariance.len() != n || self.covariance.iter().any(|row| row.len() != n) {
            return Err(RiskError::invalid("covariance", format!("must be {n}x{n}")));
        }
        if self.drift.iter().chain(self.covariance.iter().flatten()).any(|v| !v.is_finite()) {
            return Err(RiskError::invalid("covariance", "entries must be finite"));
        }
        for i in 0..n {
            if self.covariance[i][i] < 0.0 {
                return Err(RiskError::invalid("covariance", format!("negative variance for {}", self.factors[i])));
            }
            for j in 0..i {
                let (a, b) = (self.covariance[i][j], self.covariance[j][i]);
                if (a - b).abs() > 1e-12 * (1.0 + a.abs().max(b.abs())) {
                    return Err(RiskError::invalid("covariance", "matrix is not symmetric"));
                }
            }
        }
        Ok(())
    }

    /// Check that every factor refers to data present in `market`.
    pub fn check_market(&self, market: &MarketState) -> Result<(), RiskError> {
        for factor in &self.factors {
            match factor {
                RiskFactor::Rates => {}
                RiskFactor::Spot(u) if market.quote(u).is_none() => {
                    return Err(RiskError::invalid("factors", format!("no quote for {u}")));
                }
                RiskFactor::Volatility(u) if market.vol_surface(u).is_none() => {
                    return Err(RiskError::invalid("factors", format!("no volatility surface for {u}")));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Loading matrix `L` with `L Lᵀ = covariance`.
    ///
    /// Cholesky when the matrix is positive definite; otherwise a symmetric
    /// eigen decomposition with tiny negative eigenvalues clipped to zero.
    pub fn loadings(&self) -> Result<DMatrix<f64>, RiskError> {
        self.validate()?;
        let n = self.len();
        let cov = DMatrix::from_fn(n, n, |i, j| self.covariance[i][j]);
        if let Some(chol) = cov.clone().cholesky() {
            return Ok(chol.l());
        }

        let eigen = SymmetricEigen::new(cov);
        let scale = eigen.eigenvalues.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let floor = -1e-10 * scale.max(1.0);
        if let Some(min) = eigen.eigenvalues.iter().copied().find(|&v| v < floor) {
            return Err(RiskError::invalid(
                "covariance",
                format!("matrix is not positive semi-definite (eigenvalue {min:.3e})"),
            ));
        }
        let roots = DVector::from_iterator(n, eigen.eigenvalues.iter().map(|v| v.max(0.0).sqrt()));
        Ok(eigen.eigenvectors * DMatrix::from_diagonal(&roots))
    }
}
