//! Turning factor shocks into shocked market snapshots.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use ks_types::MarketState;

use crate::factors::{FactorModel, RiskFactor};

/// Draws correlated factor shocks over a fixed horizon.
#[derive(Debug, Clone)]
pub struct ScenarioGenerator {
    factors: Vec<RiskFactor>,
    /// drift · h
    mean: Vec<f64>,
    /// L · √h
    scaled_loadings: DMatrix<f64>,
}

impl ScenarioGenerator {
    pub fn new(model: &FactorModel, loadings: DMatrix<f64>, horizon: f64) -> Self {
        Self {
            factors: model.factors.clone(),
            mean: model.drift.iter().map(|mu| mu * horizon).collect(),
            scaled_loadings: loadings * horizon.sqrt(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.factors.len()
    }

    /// One shock vector: `drift·h + L·z·√h` with `z` standard normal.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let n = self.dimension();
        let z = DVector::from_iterator(n, (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)));
        let correlated = &self.scaled_loadings * z;
        self.mean
            .iter()
            .zip(correlated.iter())
            .map(|(mean, x)| mean + x)
            .collect()
    }

    /// Market with `shock` applied: the curve shifted, spots moved by
    /// `exp(x)` and volatility surfaces scaled by `exp(x)`.
    pub fn apply(&self, base: &MarketState, shock: &[f64]) -> MarketState {
        shock_market(base, &self.factors, shock)
    }
}

/// Apply one shock per factor to a copy of `base`.
pub fn shock_market(base: &MarketState, factors: &[RiskFactor], shock: &[f64]) -> MarketState {
    let mut market = base.clone();
    let rate_shift: f64 = factors
        .iter()
        .zip(shock)
        .filter(|(f, _)| matches!(f, RiskFactor::Rates))
        .map(|(_, x)| *x)
        .sum();
    if rate_shift != 0.0 {
        market.curve = market.curve.shifted(rate_shift);
    }

    for (factor, &x) in factors.iter().zip(shock) {
        match factor {
            RiskFactor::Rates => {}
            RiskFactor::Spot(underlying) => {
                if let Some(quote) = market.quotes.get_mut(underlying) {
                    quote.spot *= x.exp();
                }
            }
            RiskFactor::Volatility(underlying) => {
                if let Some(surface) = market.vol_surfaces.get_mut(underlying) {
                    *surface = surface.scaled(x.exp());
                }
            }
        }
    }
    market
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ks_types::{Compounding, UnderlyingQuote, VolSurface, YieldCurve};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn market() -> MarketState {
        MarketState::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            YieldCurve::flat(0.04, Compounding::Continuous),
        )
        .with_quote("SPX", UnderlyingQuote::new(5000.0, 0.0))
        .with_vol_surface("SPX", VolSurface::flat(0.2))
    }

    fn factors() -> Vec<RiskFactor> {
        vec![
            RiskFactor::Rates,
            RiskFactor::Spot("SPX".into()),
            RiskFactor::Volatility("SPX".into()),
        ]
    }

    #[test]
    fn shocks_move_each_factor() {
        let shocked = shock_market(&market(), &factors(), &[0.001, 0.1, -0.5]);
        assert_relative_eq!(shocked.curve.zero_rate(2.0), 0.041, epsilon = 1e-12);
        assert_relative_eq!(shocked.quote("SPX").unwrap().spot, 5000.0 * 0.1_f64.exp(), epsilon = 1e-9);
        assert_relative_eq!(
            shocked.vol_surface("SPX").unwrap().vol(5000.0, 1.0),
            0.2 * (-0.5_f64).exp(),
            epsilon = 1e-12
        );
        // Base snapshot untouched.
        assert_eq!(market().quote("SPX").unwrap().spot, 5000.0);
    }

    #[test]
    fn generated_shocks_have_model_moments() {
        let model = FactorModel::new(
            vec![RiskFactor::Spot("A".into()), RiskFactor::Spot("B".into())],
            vec![0.0, 0.0],
            vec![vec![0.04, 0.024], vec![0.024, 0.09]],
        )
        .unwrap();
        let generator = ScenarioGenerator::new(&model, model.loadings().unwrap(), 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let draws: Vec<Vec<f64>> = (0..40_000).map(|_| generator.draw(&mut rng)).collect();
        let cov = crate::metrics::sample_covariance(&draws);
        assert_relative_eq!(cov[0][0], 0.04, max_relative = 0.05);
        assert_relative_eq!(cov[1][1], 0.09, max_relative = 0.05);
        assert_relative_eq!(cov[0][1], 0.024, max_relative = 0.1);
    }
}
