//! Black-Scholes-Merton pricing for European options, lattice dispatch for
//! American ones, and implied volatility.

use rust_decimal::Decimal;

use ks_types::{ExerciseStyle, MarketState, OptionRight, OptionTerms, PricingError};

use crate::greeks::Greeks;
use crate::lattice::{self, LatticeConfig};
use crate::math::{norm_cdf, norm_pdf, to_decimal, to_f64};
use crate::solver::{newton_bracketed, RootConfig};

/// Model inputs resolved from the terms and the market snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionInputs {
    pub right: OptionRight,
    pub spot: f64,
    pub strike: f64,
    /// Continuously-compounded risk-free rate to expiry.
    pub rate: f64,
    /// Continuous dividend / convenience yield.
    pub carry: f64,
    pub volatility: f64,
    /// Time to expiry in years.
    pub expiry: f64,
}

impl OptionInputs {
    /// Look up spot, carry, rate and volatility for `terms` and check that
    /// the resulting model inputs are usable.
    pub fn resolve(terms: &OptionTerms, market: &MarketState) -> Result<Self, PricingError> {
        let id = terms.id.as_str();
        let expiry = market.time_to(terms.maturity);
        if expiry <= 0.0 {
            return Err(PricingError::invalid_terms(
                id,
                format!("option expired on {}", terms.maturity),
            ));
        }
        let strike = to_f64(terms.strike);
        if !strike.is_finite() || strike <= 0.0 {
            return Err(PricingError::invalid_terms(id, "strike must be positive"));
        }
        if terms.multiplier <= Decimal::ZERO {
            return Err(PricingError::invalid_terms(id, "multiplier must be positive"));
        }

        let quote = market.quote(&terms.underlying).ok_or_else(|| {
            PricingError::missing_data(id, format!("no quote for {}", terms.underlying))
        })?;
        if !quote.spot.is_finite() || quote.spot <= 0.0 {
            return Err(PricingError::invalid_terms(
                id,
                format!("spot for {} must be positive", terms.underlying),
            ));
        }
        let surface = market.vol_surface(&terms.underlying).ok_or_else(|| {
            PricingError::missing_data(id, format!("no volatility surface for {}", terms.underlying))
        })?;
        let volatility = surface.vol(strike, expiry);
        if !volatility.is_finite() || volatility <= 0.0 {
            return Err(PricingError::invalid_terms(
                id,
                format!("volatility must be positive, got {volatility}"),
            ));
        }

        Ok(Self {
            right: terms.right,
            spot: quote.spot,
            strike,
            rate: market.curve.continuous_rate(expiry),
            carry: quote.carry_yield,
            volatility,
            expiry,
        })
    }
}

/// Per-unit greeks in trading units: theta per calendar day, vega and rho
/// per 1% move.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

impl ModelGreeks {
    /// Scale to a whole contract and convert.
    pub fn to_greeks(&self, multiplier: f64, instrument: &str) -> Result<Greeks, PricingError> {
        Ok(Greeks {
            delta: to_decimal(self.delta * multiplier, instrument, "delta")?,
            gamma: to_decimal(self.gamma * multiplier, instrument, "gamma")?,
            theta: to_decimal(self.theta * multiplier, instrument, "theta")?,
            vega: to_decimal(self.vega * multiplier, instrument, "vega")?,
            rho: to_decimal(self.rho * multiplier, instrument, "rho")?,
        })
    }
}

fn d1_d2(i: &OptionInputs) -> (f64, f64) {
    let vol_sqrt_t = i.volatility * i.expiry.sqrt();
    let d1 = ((i.spot / i.strike).ln() + (i.rate - i.carry + 0.5 * i.volatility * i.volatility) * i.expiry)
        / vol_sqrt_t;
    (d1, d1 - vol_sqrt_t)
}

/// European price per unit of underlying.
pub fn black_scholes_price(i: &OptionInputs) -> f64 {
    let (d1, d2) = d1_d2(i);
    let disc = (-i.rate * i.expiry).exp();
    let carry_disc = (-i.carry * i.expiry).exp();
    match i.right {
        OptionRight::Call => i.spot * carry_disc * norm_cdf(d1) - i.strike * disc * norm_cdf(d2),
        OptionRight::Put => i.strike * disc * norm_cdf(-d2) - i.spot * carry_disc * norm_cdf(-d1),
    }
}

/// European price and greeks per unit of underlying.
pub fn black_scholes(i: &OptionInputs) -> (f64, ModelGreeks) {
    let (d1, d2) = d1_d2(i);
    let s = i.spot;
    let k = i.strike;
    let t = i.expiry;
    let disc = (-i.rate * t).exp();
    let carry_disc = (-i.carry * t).exp();

    let price = black_scholes_price(i);

    let delta = match i.right {
        OptionRight::Call => carry_disc * norm_cdf(d1),
        OptionRight::Put => -carry_disc * norm_cdf(-d1),
    };
    let gamma = carry_disc * norm_pdf(d1) / (s * i.volatility * t.sqrt());

    let theta_common = -(s * carry_disc * norm_pdf(d1) * i.volatility) / (2.0 * t.sqrt());
    let theta = match i.right {
        OptionRight::Call => {
            theta_common - i.rate * k * disc * norm_cdf(d2) + i.carry * s * carry_disc * norm_cdf(d1)
        }
        OptionRight::Put => {
            theta_common + i.rate * k * disc * norm_cdf(-d2) - i.carry * s * carry_disc * norm_cdf(-d1)
        }
    };

    let vega = s * carry_disc * norm_pdf(d1) * t.sqrt();
    let rho = match i.right {
        OptionRight::Call => k * t * disc * norm_cdf(d2),
        OptionRight::Put => -k * t * disc * norm_cdf(-d2),
    };

    (
        price,
        ModelGreeks {
            delta,
            gamma,
            theta: theta / 365.0,
            vega: vega / 100.0,
            rho: rho / 100.0,
        },
    )
}

/// Contract price and greeks.
pub fn price_option(
    terms: &OptionTerms,
    market: &MarketState,
    config: &LatticeConfig,
) -> Result<(Decimal, Greeks), PricingError> {
    let inputs = OptionInputs::resolve(terms, market)?;
    let (unit_price, greeks) = match terms.style {
        ExerciseStyle::European => black_scholes(&inputs),
        ExerciseStyle::American => lattice::american_with_greeks(&inputs, config, &terms.id)?,
    };
    let multiplier = to_f64(terms.multiplier);
    let price = to_decimal(unit_price * multiplier, &terms.id, "option price")?;
    Ok((price, greeks.to_greeks(multiplier, &terms.id)?))
}

/// Contract price only.
pub fn option_value(
    terms: &OptionTerms,
    market: &MarketState,
    config: &LatticeConfig,
) -> Result<f64, PricingError> {
    let inputs = OptionInputs::resolve(terms, market)?;
    let unit_price = match terms.style {
        ExerciseStyle::European => black_scholes_price(&inputs),
        ExerciseStyle::American => lattice::american_price(&inputs, config, &terms.id)?,
    };
    let value = unit_price * to_f64(terms.multiplier);
    if !value.is_finite() {
        return Err(PricingError::numerical(&terms.id, "option value is not finite"));
    }
    Ok(value)
}

/// Volatility that reproduces `premium`, the per-contract price of a
/// European option. The surface volatility is ignored except as the
/// starting guess.
pub fn implied_volatility(
    terms: &OptionTerms,
    market: &MarketState,
    premium: f64,
) -> Result<f64, PricingError> {
    let id = terms.id.as_str();
    if terms.style != ExerciseStyle::European {
        return Err(PricingError::invalid_terms(
            id,
            "implied volatility is only defined for European exercise",
        ));
    }
    let inputs = OptionInputs::resolve(terms, market)?;
    let target = premium / to_f64(terms.multiplier);
    if !target.is_finite() || target <= 0.0 {
        return Err(PricingError::invalid_terms(id, "premium must be positive"));
    }

    let objective = |sigma: f64| {
        let trial = OptionInputs {
            volatility: sigma,
            ..inputs
        };
        let (price, greeks) = black_scholes(&trial);
        (price - target, greeks.vega * 100.0)
    };
    let config = RootConfig {
        tolerance: 1e-10,
        ..RootConfig::default()
    };
    newton_bracketed(objective, 1e-6, 5.0, inputs.volatility, &config)
        .map(|root| root.value)
        .ok_or_else(|| {
            PricingError::numerical(id, format!("implied volatility for premium {premium} did not converge"))
        })
}
