//! Risk statistics over simulated or historical return samples.
//!
//! Returns are fractions of capital (0.01 = +1 %). VaR and CVaR are reported
//! as positive loss fractions.

use serde::{Deserialize, Serialize};

use ks_pricing::math::{norm_inv_cdf, norm_pdf};

use crate::simulation::SimulationParams;

/// Aggregated output of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub num_paths: usize,
    pub seed: u64,
    /// Horizon in years.
    pub horizon: f64,
    pub confidence: f64,
    /// Denominator of the portfolio return: |cash| plus gross position exposure.
    pub capital: f64,

    pub expected_return: f64,
    /// Sample standard deviation of the portfolio return.
    pub volatility: f64,
    pub var: f64,
    pub cvar: f64,
    /// Largest simulated loss fraction.
    pub max_loss: f64,
    pub probability_of_loss: f64,

    /// Position order of the portfolio.
    pub instrument_ids: Vec<String>,
    pub instrument_expected_returns: Vec<f64>,
    /// Sample covariance of instrument returns over the horizon.
    pub instrument_covariance: Vec<Vec<f64>>,

    /// Portfolio returns, sorted ascending.
    pub return_distribution: Vec<f64>,
}

impl RiskMetrics {
    /// Reduce per-path samples. `instrument_returns` is path-major.
    pub(crate) fn from_samples(
        mut portfolio_returns: Vec<f64>,
        instrument_returns: &[Vec<f64>],
        instrument_ids: Vec<String>,
        params: &SimulationParams,
        capital: f64,
    ) -> Self {
        let n = portfolio_returns.len();
        let expected_return = mean(&portfolio_returns);
        let volatility = sample_variance(&portfolio_returns, expected_return).sqrt();
        let losses = portfolio_returns.iter().filter(|r| **r < 0.0).count();

        let instrument_expected_returns = (0..instrument_ids.len())
            .map(|j| instrument_returns.iter().map(|row| row[j]).sum::<f64>() / n as f64)
            .collect();
        let instrument_covariance = sample_covariance(instrument_returns);

        portfolio_returns.sort_by(f64::total_cmp);
        let var = var_from_sorted(&portfolio_returns, params.confidence);
        let cvar = shortfall_from_sorted(&portfolio_returns, var);
        let max_loss = portfolio_returns.first().map(|r| -r).unwrap_or(0.0);

        Self {
            num_paths: n,
            seed: params.seed,
            horizon: params.horizon,
            confidence: params.confidence,
            capital,
            expected_return,
            volatility,
            var,
            cvar,
            max_loss,
            probability_of_loss: losses as f64 / n as f64,
            instrument_ids,
            instrument_expected_returns,
            instrument_covariance,
            return_distribution: portfolio_returns,
        }
    }

    /// VaR in currency units.
    pub fn var_amount(&self) -> f64 {
        self.var * self.capital
    }

    /// CVaR in currency units.
    pub fn cvar_amount(&self) -> f64 {
        self.cvar * self.capital
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Linear interpolation between order statistics at `h = p·(n − 1)`.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let h = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// VaR from ascending returns: the α-quantile of losses, i.e. minus the
/// (1 − α)-quantile of returns.
fn var_from_sorted(sorted_returns: &[f64], confidence: f64) -> f64 {
    -quantile_sorted(sorted_returns, 1.0 - confidence)
}

/// Mean loss strictly beyond `var`; `var` itself when no loss exceeds it.
fn shortfall_from_sorted(sorted_returns: &[f64], var: f64) -> f64 {
    let tail: Vec<f64> = sorted_returns
        .iter()
        .map(|r| -r)
        .take_while(|loss| *loss > var)
        .collect();
    if tail.is_empty() {
        var
    } else {
        mean(&tail)
    }
}

/// Historical VaR of a return sample at `confidence` (e.g. 0.95).
pub fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    var_from_sorted(&sorted, confidence)
}

/// Historical expected shortfall (CVaR) of a return sample.
pub fn historical_expected_shortfall(returns: &[f64], confidence: f64) -> f64 {
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let var = var_from_sorted(&sorted, confidence);
    shortfall_from_sorted(&sorted, var)
}

/// Gaussian VaR for returns with the given mean and standard deviation.
pub fn parametric_var(mean: f64, sd: f64, confidence: f64) -> f64 {
    -mean + sd * norm_inv_cdf(confidence)
}

/// Gaussian expected shortfall.
pub fn parametric_cvar(mean: f64, sd: f64, confidence: f64) -> f64 {
    -mean + sd * norm_pdf(norm_inv_cdf(confidence)) / (1.0 - confidence)
}

/// Sample covariance (n − 1 denominator) of observations given as rows.
pub fn sample_covariance(samples: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let dim = samples.first().map(|row| row.len()).unwrap_or(0);
    let mut cov = vec![vec![0.0; dim]; dim];
    if samples.len() < 2 {
        return cov;
    }
    let count = samples.len() as f64;
    let means: Vec<f64> = (0..dim)
        .map(|j| samples.iter().map(|row| row[j]).sum::<f64>() / count)
        .collect();
    for row in samples {
        for i in 0..dim {
            let di = row[i] - means[i];
            for j in 0..=i {
                cov[i][j] += di * (row[j] - means[j]);
            }
        }
    }
    for i in 0..dim {
        for j in 0..=i {
            cov[i][j] /= count - 1.0;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::StandardNormal;

    #[test]
    fn var_interpolates_order_statistics() {
        // Losses 1..=5 %: h = 0.8 * 4 = 3.2 → between 4 % and 5 %.
        let returns = vec![-0.01, -0.05, -0.03, -0.02, -0.04];
        assert_relative_eq!(historical_var(&returns, 0.8), 0.042, epsilon = 1e-12);
        // Only the 5 % loss lies strictly beyond 4.2 %.
        assert_relative_eq!(historical_expected_shortfall(&returns, 0.8), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn cvar_falls_back_to_var_without_tail() {
        let flat = vec![-0.02; 10];
        assert_relative_eq!(historical_var(&flat, 0.95), 0.02);
        assert_relative_eq!(historical_expected_shortfall(&flat, 0.95), 0.02);
    }

    #[test]
    fn parametric_reference_values() {
        assert_relative_eq!(parametric_var(0.0, 1.0, 0.95), 1.644_853_626_951_472_2, epsilon = 1e-9);
        assert_relative_eq!(parametric_cvar(0.0, 1.0, 0.95), 2.062_712_807_507_278, epsilon = 1e-9);
        assert_relative_eq!(parametric_var(0.01, 0.02, 0.99), -0.01 + 0.02 * 2.326_347_874_040_841, epsilon = 1e-9);
    }

    #[test]
    fn sample_covariance_matches_hand_computation() {
        let samples = vec![vec![1.0, 2.0], vec![3.0, 6.0], vec![5.0, 10.0]];
        let cov = sample_covariance(&samples);
        assert_relative_eq!(cov[0][0], 4.0);
        assert_relative_eq!(cov[0][1], 8.0);
        assert_relative_eq!(cov[1][0], 8.0);
        assert_relative_eq!(cov[1][1], 16.0);
    }

    fn gaussian_errors(n: usize, seed: u64) -> (f64, f64) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sample: Vec<f64> = (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
        (
            (historical_var(&sample, 0.95) - parametric_var(0.0, 1.0, 0.95)).abs(),
            (historical_expected_shortfall(&sample, 0.95) - parametric_cvar(0.0, 1.0, 0.95)).abs(),
        )
    }

    #[test]
    fn sample_estimators_converge_to_gaussian_closed_form() {
        let seeds = [1_u64, 2, 3, 4, 5];
        let average = |n: usize| {
            let (var, cvar) = seeds
                .iter()
                .map(|&s| gaussian_errors(n, s))
                .fold((0.0, 0.0), |(a, b), (v, c)| (a + v, b + c));
            (var / seeds.len() as f64, cvar / seeds.len() as f64)
        };
        let (var_small, cvar_small) = average(1_000);
        let (var_large, cvar_large) = average(100_000);
        assert!(var_large < var_small, "VaR error {var_large} did not shrink from {var_small}");
        assert!(cvar_large < cvar_small, "CVaR error {cvar_large} did not shrink from {cvar_small}");
        assert!(var_large < 0.03);
        assert!(cvar_large < 0.03);
    }
}
