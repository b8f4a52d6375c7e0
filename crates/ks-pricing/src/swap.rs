//! Fixed-for-floating swap valuation with projected forwards.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use ks_types::{MarketState, PricingError, SwapDirection, SwapTerms};

use crate::greeks::SwapRisk;
use crate::math::{to_decimal, to_f64};
use crate::pricer::curve_dv01;

/// Leg values of the unsettled part of the schedule, per the holder's notional.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegValues {
    pub fixed: f64,
    pub floating: f64,
    /// Notional times Σ τ_fixed · DF.
    pub annuity: f64,
}

impl LegValues {
    fn signed(&self, direction: SwapDirection) -> f64 {
        match direction {
            SwapDirection::ReceiveFixed => self.fixed - self.floating,
            SwapDirection::PayFixed => self.floating - self.fixed,
        }
    }
}

fn validate(terms: &SwapTerms, as_of: NaiveDate) -> Result<(), PricingError> {
    let id = terms.id.as_str();
    if terms.schedule.is_empty() {
        return Err(PricingError::invalid_terms(id, "swap schedule is empty"));
    }
    if terms.notional <= Decimal::ZERO {
        return Err(PricingError::invalid_terms(id, "notional must be positive"));
    }
    for (idx, period) in terms.schedule.iter().enumerate() {
        if period.reset_date >= period.payment_date {
            return Err(PricingError::invalid_terms(
                id,
                format!("period {idx} resets on {} but pays on {}", period.reset_date, period.payment_date),
            ));
        }
    }
    for (idx, pair) in terms.schedule.windows(2).enumerate() {
        if pair[1].reset_date <= pair[0].reset_date {
            return Err(PricingError::invalid_terms(
                id,
                format!("reset dates are not strictly increasing at period {}", idx + 1),
            ));
        }
        if pair[1].payment_date < pair[0].payment_date {
            return Err(PricingError::invalid_terms(
                id,
                format!("payment dates decrease at period {}", idx + 1),
            ));
        }
    }
    if terms.schedule.iter().all(|p| p.payment_date <= as_of) {
        return Err(PricingError::invalid_terms(id, format!("every payment settled before {as_of}")));
    }
    Ok(())
}

/// Values of both legs over periods paying after the valuation date.
///
/// Periods that reset before the valuation date use the index fixing in the
/// market; later resets project the simple forward off the curve.
pub fn leg_values(terms: &SwapTerms, market: &MarketState) -> Result<LegValues, PricingError> {
    validate(terms, market.as_of)?;
    let notional = to_f64(terms.notional);
    let as_of = market.as_of;

    let mut legs = LegValues {
        fixed: 0.0,
        floating: 0.0,
        annuity: 0.0,
    };
    for period in terms.schedule.iter().filter(|p| p.payment_date > as_of) {
        let t_pay = market.time_to(period.payment_date);
        let df_pay = market.curve.discount_factor(t_pay);
        let tau_fixed = terms.fixed_day_count.year_fraction(period.reset_date, period.payment_date);
        let tau_float = terms.floating_day_count.year_fraction(period.reset_date, period.payment_date);

        let index_rate = if period.reset_date < as_of {
            *market.fixings.get(&terms.floating_index).ok_or_else(|| {
                PricingError::missing_data(
                    &terms.id,
                    format!("no fixing for {} reset on {}", terms.floating_index, period.reset_date),
                )
            })?
        } else {
            let t_reset = market.time_to(period.reset_date);
            market.curve.forward_rate(t_reset, t_pay, tau_float)
        };

        legs.annuity += notional * tau_fixed * df_pay;
        legs.floating += notional * (index_rate + terms.floating_spread) * tau_float * df_pay;
    }
    legs.fixed = terms.fixed_rate * legs.annuity;

    if !legs.fixed.is_finite() || !legs.floating.is_finite() {
        return Err(PricingError::numerical(&terms.id, "swap leg value is not finite"));
    }
    Ok(legs)
}

/// Value to the holder: fixed minus floating when receiving fixed.
pub fn swap_value(terms: &SwapTerms, market: &MarketState) -> Result<f64, PricingError> {
    leg_values(terms, market).map(|legs| legs.signed(terms.direction))
}

/// Fixed rate at which the remaining swap is worth zero.
pub fn par_rate(terms: &SwapTerms, market: &MarketState) -> Result<f64, PricingError> {
    let legs = leg_values(terms, market)?;
    if legs.annuity <= 0.0 {
        return Err(PricingError::numerical(&terms.id, "swap annuity is not positive"));
    }
    Ok(legs.floating / legs.annuity)
}

/// Value plus leg breakdown, annuity, par rate and DV01.
pub fn price_swap(
    terms: &SwapTerms,
    market: &MarketState,
    curve_bump: f64,
) -> Result<(Decimal, SwapRisk), PricingError> {
    let legs = leg_values(terms, market)?;
    let value = legs.signed(terms.direction);
    let par = if legs.annuity > 0.0 {
        legs.floating / legs.annuity
    } else {
        0.0
    };
    let dv01 = curve_dv01(market, curve_bump, |bumped| swap_value(terms, bumped))?;

    let id = terms.id.as_str();
    let risk = SwapRisk {
        notional: terms.notional,
        fixed_leg_pv: to_decimal(legs.fixed, id, "fixed leg")?,
        floating_leg_pv: to_decimal(legs.floating, id, "floating leg")?,
        annuity: to_decimal(legs.annuity, id, "annuity")?,
        par_rate: par,
        dv01: to_decimal(dv01, id, "dv01")?,
    };
    Ok((to_decimal(value, id, "swap value")?, risk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ks_types::{Compounding, DayCount, Frequency, SwapPeriod, YieldCurve};
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn market(as_of: NaiveDate) -> MarketState {
        MarketState::new(as_of, YieldCurve::flat(0.04, Compounding::Continuous))
    }

    fn five_year(fixed: f64, direction: SwapDirection) -> SwapTerms {
        SwapTerms::vanilla(
            "IRS-5Y",
            dec!(10_000_000),
            fixed,
            "SOFR",
            direction,
            d(2025, 1, 1),
            5,
            Frequency::Quarterly,
        )
    }

    #[test]
    fn test_floating_leg_telescopes_at_inception() {
        let m = market(d(2025, 1, 1));
        let swap = five_year(0.04, SwapDirection::ReceiveFixed)
            .with_day_counts(DayCount::Act360, DayCount::Act360);
        let legs = leg_values(&swap, &m).unwrap();
        let t_end = m.time_to(d(2030, 1, 1));
        let expected = 10_000_000.0 * (1.0 - m.curve.discount_factor(t_end));
        assert_relative_eq!(legs.floating, expected, max_relative = 1e-10);
    }

    #[test]
    fn test_par_swap_is_worth_zero() {
        let m = market(d(2025, 1, 1));
        let at_zero = five_year(0.0, SwapDirection::ReceiveFixed);
        let par = par_rate(&at_zero, &m).unwrap();
        let at_par = five_year(par, SwapDirection::ReceiveFixed);
        assert_relative_eq!(swap_value(&at_par, &m).unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_direction_flips_sign() {
        let m = market(d(2025, 1, 1));
        let receive = swap_value(&five_year(0.05, SwapDirection::ReceiveFixed), &m).unwrap();
        let pay = swap_value(&five_year(0.05, SwapDirection::PayFixed), &m).unwrap();
        assert!(receive > 0.0, "above-par receiver should be an asset");
        assert_relative_eq!(receive, -pay, epsilon = 1e-9);
    }

    #[test]
    fn test_receiver_gains_when_rates_fall() {
        let m = market(d(2025, 1, 1));
        let (_, risk) = price_swap(&five_year(0.04, SwapDirection::ReceiveFixed), &m, 1e-4).unwrap();
        let dv01 = risk.dv01.to_f64().unwrap();
        assert!(dv01 > 0.0);
        // Close to the annuity times one basis point.
        let pv01 = risk.annuity.to_f64().unwrap() * 1e-4;
        assert_relative_eq!(dv01, pv01, max_relative = 0.05);
    }

    #[test]
    fn test_settled_periods_and_fixings() {
        let swap = five_year(0.04, SwapDirection::PayFixed);
        let mid_period = market(d(2025, 2, 15));
        assert!(matches!(
            swap_value(&swap, &mid_period),
            Err(PricingError::MissingMarketData { .. })
        ));

        let fixed = mid_period.clone().with_fixing("SOFR", 0.043);
        let legs = leg_values(&swap, &fixed).unwrap();
        let all = leg_values(&swap, &market(d(2025, 1, 1))).unwrap();
        assert!(legs.annuity < all.annuity * 1.01);
        assert!(swap_value(&swap, &fixed).is_ok());

        // Past the first payment: that period no longer contributes.
        let later = market(d(2025, 5, 1)).with_fixing("SOFR", 0.043);
        let later_legs = leg_values(&swap, &later).unwrap();
        assert!(later_legs.annuity < legs.annuity);
    }

    #[test]
    fn test_invalid_schedules() {
        let m = market(d(2025, 1, 1));
        let empty = SwapTerms::new("EMPTY", dec!(1_000_000), 0.04, "SOFR", SwapDirection::PayFixed, vec![]);
        assert!(matches!(swap_value(&empty, &m), Err(PricingError::InvalidTerms { .. })));

        let backwards = SwapTerms::new(
            "BACK",
            dec!(1_000_000),
            0.04,
            "SOFR",
            SwapDirection::PayFixed,
            vec![
                SwapPeriod { reset_date: d(2025, 7, 1), payment_date: d(2026, 1, 1) },
                SwapPeriod { reset_date: d(2025, 1, 1), payment_date: d(2025, 7, 1) },
            ],
        );
        assert!(matches!(swap_value(&backwards, &m), Err(PricingError::InvalidTerms { .. })));

        let inverted = SwapTerms::new(
            "INV",
            dec!(1_000_000),
            0.04,
            "SOFR",
            SwapDirection::PayFixed,
            vec![SwapPeriod { reset_date: d(2025, 7, 1), payment_date: d(2025, 7, 1) }],
        );
        assert!(matches!(swap_value(&inverted, &m), Err(PricingError::InvalidTerms { .. })));

        let settled = five_year(0.04, SwapDirection::PayFixed);
        let err = swap_value(&settled, &market(d(2031, 1, 1))).unwrap_err();
        assert!(matches!(err, PricingError::InvalidTerms { .. }));
        assert_eq!(err.instrument(), "IRS-5Y");
    }
}
