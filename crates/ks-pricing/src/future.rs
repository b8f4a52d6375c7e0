//! Cost-of-carry valuation of futures positions.

use ks_types::{FutureTerms, MarketState, PricingError};
use rust_decimal::Decimal;

use crate::greeks::FutureRisk;
use crate::math::{to_decimal, to_f64};
use crate::pricer::curve_dv01;

/// Spot, forward and carry inputs for one contract.
#[derive(Debug, Clone, Copy)]
struct Carry {
    spot: f64,
    forward: f64,
    /// exp((r - q) * T)
    growth: f64,
    /// Years to delivery.
    expiry: f64,
    multiplier: f64,
}

fn carry(terms: &FutureTerms, market: &MarketState) -> Result<Carry, PricingError> {
    let expiry = market.time_to(terms.maturity);
    if expiry < 0.0 {
        return Err(PricingError::invalid_terms(
            &terms.id,
            format!("delivery date {} is before {}", terms.maturity, market.as_of),
        ));
    }
    if terms.multiplier <= Decimal::ZERO {
        return Err(PricingError::invalid_terms(&terms.id, "multiplier must be positive"));
    }
    let quote = market.quote(&terms.underlying).ok_or_else(|| {
        PricingError::missing_data(&terms.id, format!("no quote for {}", terms.underlying))
    })?;
    let rate = market.curve.continuous_rate(expiry);
    let growth = ((rate - quote.carry_yield) * expiry).exp();
    Ok(Carry {
        spot: quote.spot,
        forward: quote.spot * growth,
        growth,
        expiry,
        multiplier: to_f64(terms.multiplier),
    })
}

/// Fair forward price `S * exp((r - q) * T)`.
pub fn forward_price(terms: &FutureTerms, market: &MarketState) -> Result<f64, PricingError> {
    carry(terms, market).map(|c| c.forward)
}

/// Mark-to-market of one contract against its trade price.
pub fn future_value(terms: &FutureTerms, market: &MarketState) -> Result<f64, PricingError> {
    let c = carry(terms, market)?;
    let value = c.multiplier * (c.forward - to_f64(terms.trade_price));
    if !value.is_finite() {
        return Err(PricingError::numerical(&terms.id, "future value is not finite"));
    }
    Ok(value)
}

/// Price change carried into the next contract when rolling from
/// `previous` to `current`.
pub fn roll_adjustment(current: f64, previous: f64) -> f64 {
    current - previous
}

/// Mark-to-market plus carry sensitivities and margin.
pub fn price_future(
    terms: &FutureTerms,
    market: &MarketState,
    curve_bump: f64,
    initial_margin_rate: f64,
) -> Result<(Decimal, FutureRisk), PricingError> {
    let c = carry(terms, market)?;
    let value = future_value(terms, market)?;
    let dv01 = curve_dv01(market, curve_bump, |bumped| future_value(terms, bumped))?;
    let id = terms.id.as_str();
    let risk = FutureRisk {
        forward_price: to_decimal(c.forward, id, "forward price")?,
        notional: to_decimal(c.multiplier * c.forward, id, "notional")?,
        delta: to_decimal(c.multiplier * c.growth, id, "delta")?,
        dv01: to_decimal(dv01, id, "dv01")?,
        basis: c.growth - 1.0,
        initial_margin: to_decimal(initial_margin_rate * c.multiplier * c.spot, id, "initial margin")?,
    };
    tracing::trace!(instrument = id, expiry = c.expiry, forward = c.forward, "priced future");
    Ok((to_decimal(value, id, "future value")?, risk))
}
