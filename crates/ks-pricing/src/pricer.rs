//! Single entry point dispatching over the instrument families.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ks_types::{Instrument, MarketState, PricingError};

use crate::bond::{bond_value, price_bond};
use crate::future::{future_value, price_future};
use crate::greeks::Sensitivities;
use crate::lattice::LatticeConfig;
use crate::option::{option_value, price_option};
use crate::swap::{price_swap, swap_value};

/// Model settings shared by every pricing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub lattice: LatticeConfig,
    /// Parallel curve shift used for DV01, in rate units.
    pub curve_bump: f64,
    /// Futures initial margin as a fraction of spot notional.
    pub initial_margin_rate: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            lattice: LatticeConfig::default(),
            curve_bump: 1e-4,
            initial_margin_rate: 0.10,
        }
    }
}

impl PricingConfig {
    pub fn with_lattice(mut self, lattice: LatticeConfig) -> Self {
        self.lattice = lattice;
        self
    }

    pub fn with_curve_bump(mut self, bump: f64) -> Self {
        self.curve_bump = bump;
        self
    }

    pub fn with_initial_margin_rate(mut self, rate: f64) -> Self {
        self.initial_margin_rate = rate;
        self
    }
}

/// Price of one unit of an instrument with its sensitivities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceResult {
    pub instrument_id: String,
    pub price: Decimal,
    pub sensitivities: Sensitivities,
}

impl PriceResult {
    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(f64::NAN)
    }

    /// Capital tied up per unit: |price| for bonds and options, forward
    /// notional for futures, notional for swaps.
    pub fn exposure(&self) -> f64 {
        match &self.sensitivities {
            Sensitivities::Bond(_) | Sensitivities::Option(_) => self.price_f64().abs(),
            Sensitivities::Future(risk) => risk.notional.to_f64().unwrap_or(f64::NAN).abs(),
            Sensitivities::Swap(risk) => risk.notional.to_f64().unwrap_or(f64::NAN).abs(),
        }
    }
}

/// Price and sensitivities of one unit of `instrument`.
pub fn price(
    instrument: &Instrument,
    market: &MarketState,
    config: &PricingConfig,
) -> Result<PriceResult, PricingError> {
    let (price, sensitivities) = match instrument {
        Instrument::Bond(terms) => {
            let (price, risk) = price_bond(terms, market, config.curve_bump)?;
            (price, Sensitivities::Bond(risk))
        }
        Instrument::Option(terms) => {
            let (price, greeks) = price_option(terms, market, &config.lattice)?;
            (price, Sensitivities::Option(greeks))
        }
        Instrument::Future(terms) => {
            let (price, risk) =
                price_future(terms, market, config.curve_bump, config.initial_margin_rate)?;
            (price, Sensitivities::Future(risk))
        }
        Instrument::Swap(terms) => {
            let (price, risk) = price_swap(terms, market, config.curve_bump)?;
            (price, Sensitivities::Swap(risk))
        }
    };
    debug!(instrument = instrument.id(), family = instrument.family(), %price, "priced");
    Ok(PriceResult {
        instrument_id: instrument.id().to_string(),
        price,
        sensitivities,
    })
}

/// Price of one unit of `instrument` without sensitivities.
pub fn value(
    instrument: &Instrument,
    market: &MarketState,
    config: &PricingConfig,
) -> Result<f64, PricingError> {
    match instrument {
        Instrument::Bond(terms) => bond_value(terms, market),
        Instrument::Option(terms) => option_value(terms, market, &config.lattice),
        Instrument::Future(terms) => future_value(terms, market),
        Instrument::Swap(terms) => swap_value(terms, market),
    }
}

/// Value gained for a 1bp parallel fall in the curve, from a central
/// difference of `bump` either side.
pub(crate) fn curve_dv01<F>(market: &MarketState, bump: f64, value: F) -> Result<f64, PricingError>
where
    F: Fn(&MarketState) -> Result<f64, PricingError>,
{
    let bump = if bump > 0.0 && bump.is_finite() { bump } else { 1e-4 };
    let down = value(&market.clone().with_curve(market.curve.shifted(-bump)))?;
    let up = value(&market.clone().with_curve(market.curve.shifted(bump)))?;
    Ok((down - up) / (2.0 * bump) * 1e-4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ks_types::{
        BondTerms, Compounding, DayCount, Frequency, FutureTerms, OptionRight, OptionTerms,
        SwapDirection, SwapTerms, UnderlyingQuote, VolSurface, YieldCurve,
    };
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn market() -> MarketState {
        MarketState::new(d(2025, 1, 1), YieldCurve::flat(0.04, Compounding::Annual))
            .with_quote("SPX", UnderlyingQuote::new(5000.0, 0.015))
            .with_vol_surface("SPX", VolSurface::flat(0.18))
    }

    fn book() -> Vec<Instrument> {
        vec![
            BondTerms::new("UST-10Y", dec!(1000), 0.05, d(2035, 1, 1), Frequency::Annual, DayCount::ActActIsda).into(),
            OptionTerms::new(
                "SPX-P",
                "SPX",
                OptionRight::Put,
                dec!(4800),
                d(2025, 12, 19),
                ks_types::ExerciseStyle::European,
                dec!(100),
            )
            .into(),
            FutureTerms::new("ESZ5", "SPX", d(2025, 12, 19), dec!(50), dec!(5050)).into(),
            SwapTerms::vanilla(
                "IRS-5Y",
                dec!(1_000_000),
                0.04,
                "SOFR",
                SwapDirection::PayFixed,
                d(2025, 1, 1),
                5,
                Frequency::Quarterly,
            )
            .into(),
        ]
    }

    #[test]
    fn test_price_and_value_agree() {
        let config = PricingConfig::default();
        let m = market();
        for instrument in book() {
            let result = price(&instrument, &m, &config).unwrap();
            let fast = value(&instrument, &m, &config).unwrap();
            assert_eq!(result.instrument_id, instrument.id());
            assert_relative_eq!(result.price_f64(), fast, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_sensitivities_match_family() {
        let config = PricingConfig::default();
        let m = market();
        let results: Vec<_> = book().iter().map(|i| price(i, &m, &config).unwrap()).collect();
        assert!(matches!(results[0].sensitivities, Sensitivities::Bond(_)));
        assert!(matches!(results[1].sensitivities, Sensitivities::Option(_)));
        assert!(matches!(results[2].sensitivities, Sensitivities::Future(_)));
        assert!(matches!(results[3].sensitivities, Sensitivities::Swap(_)));

        assert_relative_eq!(results[0].exposure(), results[0].price_f64());
        assert_relative_eq!(results[3].exposure(), 1_000_000.0);
        match &results[2].sensitivities {
            Sensitivities::Future(risk) => {
                assert_relative_eq!(results[2].exposure(), risk.notional.to_f64().unwrap());
                assert_eq!(risk.initial_margin, dec!(25000));
            }
            other => panic!("unexpected sensitivities {other:?}"),
        }
    }

    #[test]
    fn test_errors_name_instrument() {
        let config = PricingConfig::default();
        let bare = MarketState::new(d(2025, 1, 1), YieldCurve::flat(0.04, Compounding::Annual));
        let err = value(&book()[1], &bare, &config).unwrap_err();
        assert_eq!(err.instrument(), "SPX-P");
        assert!(matches!(err, PricingError::MissingMarketData { .. }));
    }

    #[test]
    fn test_price_result_serializes() {
        let config = PricingConfig::default();
        let result = price(&book()[0], &market(), &config).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"family\":\"Bond\""));
        let back: PriceResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.instrument_id, "UST-10Y");
        assert_eq!(back.price, result.price);
    }

    #[test]
    fn test_config_builders() {
        let config = PricingConfig::default()
            .with_curve_bump(5e-5)
            .with_initial_margin_rate(0.12)
            .with_lattice(LatticeConfig::default().with_steps(200));
        assert_eq!(config.lattice.steps, 200);
        assert_eq!(config.curve_bump, 5e-5);
        assert_eq!(config.initial_margin_rate, 0.12);
    }
}
