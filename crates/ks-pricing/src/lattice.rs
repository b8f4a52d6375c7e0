//! Cox-Ross-Rubinstein binomial lattice for American exercise.
//!
//! Every price is computed twice, at `steps` and `2 * steps`, and the finer
//! value is returned only when the two agree to within
//! `tolerance * strike`. Delta, gamma and theta are read off the first two
//! time slices of the fine tree; vega and rho are bump-and-reprice.

use serde::{Deserialize, Serialize};

use ks_types::{OptionRight, PricingError};

use crate::option::{ModelGreeks, OptionInputs};

/// Lattice resolution and convergence requirement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeConfig {
    /// Steps in the coarse tree; the fine tree uses twice as many.
    pub steps: usize,
    /// Maximum coarse/fine disagreement, as a fraction of strike.
    pub tolerance: f64,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            steps: 500,
            tolerance: 1e-4,
        }
    }
}

impl LatticeConfig {
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

#[inline(always)]
fn intrinsic(right: OptionRight, spot: f64, strike: f64) -> f64 {
    match right {
        OptionRight::Call => (spot - strike).max(0.0),
        OptionRight::Put => (strike - spot).max(0.0),
    }
}

/// Values at the root and the first two time slices.
struct Tree {
    price: f64,
    /// (down, up) at step 1.
    step1: [f64; 2],
    /// (down-down, up-down, up-up) at step 2.
    step2: [f64; 3],
    up: f64,
    dt: f64,
}

fn build(i: &OptionInputs, steps: usize, instrument: &str) -> Result<Tree, PricingError> {
    if steps == 0 {
        return Err(PricingError::numerical(instrument, "lattice needs at least one step"));
    }

    let dt = i.expiry / steps as f64;
    let u = (i.volatility * dt.sqrt()).exp();
    let d = 1.0 / u;
    let growth = ((i.rate - i.carry) * dt).exp();
    let p = (growth - d) / (u - d);
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(PricingError::numerical(
            instrument,
            format!("risk-neutral probability {p} is outside [0, 1]"),
        ));
    }
    let disc = (-i.rate * dt).exp();
    let disc_p = disc * p;
    let disc_1mp = disc * (1.0 - p);
    let ratio = u / d;

    let mut values = vec![0.0_f64; steps + 1];
    let mut st = i.spot * d.powi(steps as i32);
    for value in values.iter_mut() {
        *value = intrinsic(i.right, st, i.strike);
        st *= ratio;
    }

    let mut step1 = [0.0; 2];
    let mut step2 = [0.0; 3];
    if steps == 2 {
        step2.copy_from_slice(&values[..3]);
    }

    let mut base = i.spot * d.powi(steps as i32 - 1);
    for level in (0..steps).rev() {
        let mut st = base;
        for j in 0..=level {
            let continuation = disc_p.mul_add(values[j + 1], disc_1mp * values[j]);
            values[j] = continuation.max(intrinsic(i.right, st, i.strike));
            st *= ratio;
        }
        base *= u;
        match level {
            2 => step2.copy_from_slice(&values[..3]),
            1 => step1.copy_from_slice(&values[..2]),
            _ => {}
        }
    }
    if steps == 1 {
        step1 = [intrinsic(i.right, i.spot * d, i.strike), intrinsic(i.right, i.spot * u, i.strike)];
    }

    Ok(Tree {
        price: values[0],
        step1,
        step2,
        up: u,
        dt,
    })
}

fn converged_tree(i: &OptionInputs, config: &LatticeConfig, instrument: &str) -> Result<Tree, PricingError> {
    let coarse = build(i, config.steps, instrument)?;
    let fine = build(i, config.steps * 2, instrument)?;
    let gap = (fine.price - coarse.price).abs();
    if !fine.price.is_finite() || gap > config.tolerance * i.strike {
        return Err(PricingError::numerical(
            instrument,
            format!(
                "lattice did not converge: {} steps gave {:.8}, {} steps gave {:.8}",
                config.steps,
                coarse.price,
                config.steps * 2,
                fine.price
            ),
        ));
    }
    Ok(fine)
}

/// American price per unit of underlying.
pub fn american_price(i: &OptionInputs, config: &LatticeConfig, instrument: &str) -> Result<f64, PricingError> {
    converged_tree(i, config, instrument).map(|tree| tree.price)
}

/// American price and greeks per unit of underlying.
pub fn american_with_greeks(
    i: &OptionInputs,
    config: &LatticeConfig,
    instrument: &str,
) -> Result<(f64, ModelGreeks), PricingError> {
    let tree = converged_tree(i, config, instrument)?;
    let s = i.spot;
    let u = tree.up;
    let d = 1.0 / u;

    let delta = (tree.step1[1] - tree.step1[0]) / (s * u - s * d);
    let s_uu = s * u * u;
    let s_dd = s * d * d;
    let upper = (tree.step2[2] - tree.step2[1]) / (s_uu - s);
    let lower = (tree.step2[1] - tree.step2[0]) / (s - s_dd);
    let gamma = (upper - lower) / (0.5 * (s_uu - s_dd));
    let theta = (tree.step2[1] - tree.price) / (2.0 * tree.dt);

    let fine_steps = config.steps * 2;
    let reprice = |inputs: OptionInputs| build(&inputs, fine_steps, instrument).map(|t| t.price);

    let vol_bump = (0.5 * i.volatility).min(0.01);
    let vega = (reprice(OptionInputs {
        volatility: i.volatility + vol_bump,
        ..*i
    })? - reprice(OptionInputs {
        volatility: i.volatility - vol_bump,
        ..*i
    })?) / (2.0 * vol_bump);

    let rate_bump = 1e-4;
    let rho = (reprice(OptionInputs {
        rate: i.rate + rate_bump,
        ..*i
    })? - reprice(OptionInputs {
        rate: i.rate - rate_bump,
        ..*i
    })?) / (2.0 * rate_bump);

    Ok((
        tree.price,
        ModelGreeks {
            delta,
            gamma,
            theta: theta / 365.0,
            vega: vega / 100.0,
            rho: rho / 100.0,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::{black_scholes, black_scholes_price};
    use approx::assert_relative_eq;

    fn inputs(right: OptionRight, carry: f64) -> OptionInputs {
        OptionInputs {
            right,
            spot: 100.0,
            strike: 100.0,
            rate: 0.05,
            carry,
            volatility: 0.20,
            expiry: 1.0,
        }
    }

    #[test]
    fn american_call_without_carry_matches_european() {
        let i = inputs(OptionRight::Call, 0.0);
        let american = american_price(&i, &LatticeConfig::default(), "C").unwrap();
        assert_relative_eq!(american, black_scholes_price(&i), epsilon = 5e-3);
    }

    #[test]
    fn american_put_carries_early_exercise_premium() {
        let i = inputs(OptionRight::Put, 0.0);
        let american = american_price(&i, &LatticeConfig::default(), "P").unwrap();
        let european = black_scholes_price(&i);
        assert!(american > european + 0.1, "american {american} vs european {european}");
        // Reference value for these inputs is about 6.09.
        assert_relative_eq!(american, 6.09, epsilon = 0.02);
    }

    #[test]
    fn deep_in_the_money_put_is_worth_intrinsic() {
        let i = OptionInputs {
            spot: 50.0,
            ..inputs(OptionRight::Put, 0.0)
        };
        let american = american_price(&i, &LatticeConfig::default(), "P").unwrap();
        assert_relative_eq!(american, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn lattice_greeks_close_to_closed_form() {
        // With no early exercise premium the tree should reproduce BSM greeks.
        let i = inputs(OptionRight::Call, 0.0);
        let (_, tree) = american_with_greeks(&i, &LatticeConfig::default(), "C").unwrap();
        let (_, bs) = black_scholes(&i);
        assert_relative_eq!(tree.delta, bs.delta, epsilon = 5e-3);
        assert_relative_eq!(tree.gamma, bs.gamma, epsilon = 1e-3);
        assert_relative_eq!(tree.theta, bs.theta, epsilon = 1e-3);
        assert_relative_eq!(tree.vega, bs.vega, epsilon = 5e-3);
        assert_relative_eq!(tree.rho, bs.rho, epsilon = 5e-3);
    }

    #[test]
    fn coarse_tree_fails_tight_tolerance() {
        let i = inputs(OptionRight::Put, 0.0);
        let config = LatticeConfig::default().with_steps(2).with_tolerance(1e-6);
        let err = american_price(&i, &config, "P").unwrap_err();
        assert!(matches!(err, PricingError::NumericalInstability { .. }));
        assert_eq!(err.instrument(), "P");
    }

    #[test]
    fn zero_steps_is_rejected() {
        let config = LatticeConfig::default().with_steps(0);
        assert!(matches!(
            american_price(&inputs(OptionRight::Put, 0.0), &config, "P"),
            Err(PricingError::NumericalInstability { .. })
        ));
    }
}
