//! Fixed-coupon bond valuation off the discount curve, plus yield analytics.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use ks_types::{coupon_schedule, BondTerms, MarketState, PricingError};

use crate::greeks::BondRisk;
use crate::math::{to_decimal, to_f64};
use crate::pricer::curve_dv01;
use crate::solver::{newton_bracketed, RootConfig};

#[derive(Debug, Clone, Copy)]
struct Cashflow {
    /// Years from the valuation date under the bond's day count.
    time: f64,
    amount: f64,
}

/// Remaining cashflows and the accrued coupon at `as_of`.
struct CashflowSchedule {
    flows: Vec<Cashflow>,
    accrued: f64,
    periods_per_year: f64,
}

fn validate(terms: &BondTerms, as_of: NaiveDate) -> Result<(), PricingError> {
    if terms.maturity <= as_of {
        return Err(PricingError::invalid_terms(
            &terms.id,
            format!("maturity {} is not after {}", terms.maturity, as_of),
        ));
    }
    if !terms.coupon_rate.is_finite() || terms.coupon_rate < 0.0 {
        return Err(PricingError::invalid_terms(
            &terms.id,
            format!("coupon rate {} is negative", terms.coupon_rate),
        ));
    }
    if terms.face_value <= Decimal::ZERO {
        return Err(PricingError::invalid_terms(&terms.id, "face value must be positive"));
    }
    Ok(())
}

fn schedule(terms: &BondTerms, as_of: NaiveDate) -> Result<CashflowSchedule, PricingError> {
    validate(terms, as_of)?;

    let face = to_f64(terms.face_value);
    let periods_per_year = terms.frequency.per_year() as f64;
    let coupon = face * terms.coupon_rate / periods_per_year;
    let (dates, previous) = coupon_schedule(terms.maturity, terms.frequency, as_of);
    let last = dates.len().saturating_sub(1);

    let flows: Vec<Cashflow> = dates
        .iter()
        .enumerate()
        .map(|(idx, &date)| Cashflow {
            time: terms.day_count.year_fraction(as_of, date),
            amount: if idx == last { coupon + face } else { coupon },
        })
        .collect();

    let accrued = match dates.first() {
        Some(&next) => {
            let period = terms.day_count.year_fraction(previous, next);
            if period > 0.0 {
                coupon * terms.day_count.year_fraction(previous, as_of) / period
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    Ok(CashflowSchedule {
        flows,
        accrued,
        periods_per_year,
    })
}

fn curve_value(flows: &[Cashflow], market: &MarketState) -> f64 {
    flows
        .iter()
        .map(|cf| cf.amount * market.curve.discount_factor(cf.time))
        .sum()
}

/// Dirty value of one bond: every remaining coupon and the face discounted
/// off the market curve.
pub fn bond_value(terms: &BondTerms, market: &MarketState) -> Result<f64, PricingError> {
    let schedule = schedule(terms, market.as_of)?;
    let value = curve_value(&schedule.flows, market);
    if !value.is_finite() {
        return Err(PricingError::numerical(&terms.id, "bond value is not finite"));
    }
    Ok(value)
}

/// Coupon accrued since the last payment date.
pub fn accrued_interest(terms: &BondTerms, as_of: NaiveDate) -> Result<f64, PricingError> {
    schedule(terms, as_of).map(|s| s.accrued)
}

fn yield_discount(y: f64, periods_per_year: f64, t: f64) -> f64 {
    (1.0 + y / periods_per_year).powf(-periods_per_year * t)
}

/// Dirty price at yield `y`, compounded at the coupon frequency.
pub fn price_from_yield(terms: &BondTerms, as_of: NaiveDate, y: f64) -> Result<f64, PricingError> {
    let schedule = schedule(terms, as_of)?;
    Ok(schedule
        .flows
        .iter()
        .map(|cf| cf.amount * yield_discount(y, schedule.periods_per_year, cf.time))
        .sum())
}

/// Yield (compounded at the coupon frequency) whose discounting reproduces
/// `dirty_price`.
pub fn yield_to_maturity(terms: &BondTerms, as_of: NaiveDate, dirty_price: f64) -> Result<f64, PricingError> {
    let schedule = schedule(terms, as_of)?;
    solve_yield(&terms.id, &schedule, dirty_price)
}

fn solve_yield(id: &str, schedule: &CashflowSchedule, dirty_price: f64) -> Result<f64, PricingError> {
    if !dirty_price.is_finite() || dirty_price <= 0.0 {
        return Err(PricingError::invalid_terms(id, format!("price {dirty_price} must be positive")));
    }
    let f = schedule.periods_per_year;
    let objective = |y: f64| {
        let base = 1.0 + y / f;
        schedule.flows.iter().fold((-dirty_price, 0.0), |(value, slope), cf| {
            let df = base.powf(-f * cf.time);
            (value + cf.amount * df, slope - cf.amount * cf.time * df / base)
        })
    };
    let lo = -0.99 * f.min(1.0);
    newton_bracketed(objective, lo, 10.0, 0.05, &RootConfig::default())
        .map(|root| root.value)
        .ok_or_else(|| PricingError::numerical(id, format!("no yield reproduces price {dirty_price}")))
}

/// Macaulay duration, modified duration and convexity at yield `y`.
fn yield_risk(schedule: &CashflowSchedule, y: f64) -> (f64, f64, f64) {
    let f = schedule.periods_per_year;
    let base = 1.0 + y / f;
    let (pv, weighted, curvature) = schedule.flows.iter().fold((0.0, 0.0, 0.0), |(pv, w, c), cf| {
        let df = yield_discount(y, f, cf.time);
        let flow = cf.amount * df;
        (pv + flow, w + cf.time * flow, c + cf.time * (cf.time + 1.0 / f) * flow)
    });
    let macaulay = weighted / pv;
    (macaulay, macaulay / base, curvature / (pv * base * base))
}

/// Dirty price plus clean price, accrued, yield and rate risk.
pub fn price_bond(
    terms: &BondTerms,
    market: &MarketState,
    curve_bump: f64,
) -> Result<(Decimal, BondRisk), PricingError> {
    let schedule = schedule(terms, market.as_of)?;
    let dirty = curve_value(&schedule.flows, market);
    let ytm = solve_yield(&terms.id, &schedule, dirty)?;
    let (macaulay, modified, convexity) = yield_risk(&schedule, ytm);
    let dv01 = curve_dv01(market, curve_bump, |bumped| {
        Ok(curve_value(&schedule.flows, bumped))
    })?;

    let risk = BondRisk {
        clean_price: to_decimal(dirty - schedule.accrued, &terms.id, "clean price")?,
        accrued_interest: to_decimal(schedule.accrued, &terms.id, "accrued interest")?,
        yield_to_maturity: ytm,
        macaulay_duration: macaulay,
        modified_duration: modified,
        convexity,
        dv01: to_decimal(dv01, &terms.id, "dv01")?,
    };
    Ok((to_decimal(dirty, &terms.id, "bond price")?, risk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ks_types::{Compounding, DayCount, Frequency, YieldCurve};
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ten_year(coupon: f64) -> BondTerms {
        BondTerms::new(
            "UST-10Y",
            dec!(1000),
            coupon,
            d(2035, 1, 1),
            Frequency::Annual,
            DayCount::ActActIsda,
        )
    }

    fn flat(rate: f64) -> MarketState {
        MarketState::new(d(2025, 1, 1), YieldCurve::flat(rate, Compounding::Annual))
    }

    #[test]
    fn test_premium_and_discount() {
        let bond = ten_year(0.05);
        let premium = bond_value(&bond, &flat(0.04)).unwrap();
        let discount = bond_value(&bond, &flat(0.06)).unwrap();
        assert!(premium > 1000.0, "premium bond priced at {premium}");
        assert!(discount < 1000.0, "discount bond priced at {discount}");
        let annuity = (1.0 - 1.04_f64.powi(-10)) / 0.04;
        assert_relative_eq!(premium, 50.0 * annuity + 1000.0 * 1.04_f64.powi(-10), epsilon = 1e-9);
    }

    #[test]
    fn test_price_non_increasing_in_rate() {
        let bond = ten_year(0.05);
        let mut last = f64::INFINITY;
        for bp in (0..=1000).step_by(25) {
            let price = bond_value(&bond, &flat(bp as f64 / 10_000.0)).unwrap();
            assert!(price <= last, "price rose from {last} to {price} at {bp}bp");
            last = price;
        }
    }

    #[test]
    fn test_par_bond_yield_equals_coupon() {
        let bond = ten_year(0.05);
        let (price, risk) = price_bond(&bond, &flat(0.05), 1e-4).unwrap();
        assert_relative_eq!(price.to_f64().unwrap(), 1000.0, epsilon = 1e-6);
        assert_relative_eq!(risk.yield_to_maturity, 0.05, epsilon = 1e-10);
        assert_eq!(risk.accrued_interest, Decimal::ZERO);
    }

    #[test]
    fn test_duration_and_dv01() {
        let bond = ten_year(0.05);
        let (price, risk) = price_bond(&bond, &flat(0.04), 1e-4).unwrap();
        let price = price.to_f64().unwrap();
        assert!(risk.macaulay_duration > 7.0 && risk.macaulay_duration < 10.0);
        assert_relative_eq!(risk.modified_duration, risk.macaulay_duration / 1.04, epsilon = 1e-9);
        assert!(risk.convexity > 0.0);
        // Flat annual curve: a curve bump is a yield bump.
        let expected = risk.modified_duration * price * 1e-4;
        assert_relative_eq!(risk.dv01.to_f64().unwrap(), expected, max_relative = 1e-3);
    }

    #[test]
    fn test_yield_roundtrip() {
        let bond = BondTerms::new(
            "CORP-7Y",
            dec!(100),
            0.0375,
            d(2031, 9, 15),
            Frequency::SemiAnnual,
            DayCount::Thirty360,
        );
        let as_of = d(2025, 3, 1);
        let price = price_from_yield(&bond, as_of, 0.0425).unwrap();
        let ytm = yield_to_maturity(&bond, as_of, price).unwrap();
        assert_relative_eq!(ytm, 0.0425, epsilon = 1e-10);
    }

    #[test]
    fn test_accrued_interest_mid_period() {
        let bond = BondTerms::new(
            "CORP",
            dec!(1000),
            0.06,
            d(2030, 12, 31),
            Frequency::SemiAnnual,
            DayCount::Thirty360,
        );
        // Three of six months since the 30 Jun coupon.
        let accrued = accrued_interest(&bond, d(2025, 9, 30)).unwrap();
        assert_relative_eq!(accrued, 15.0, epsilon = 1e-9);

        let market = MarketState::new(d(2025, 9, 30), YieldCurve::flat(0.05, Compounding::Annual));
        let (dirty, risk) = price_bond(&bond, &market, 1e-4).unwrap();
        assert_relative_eq!(
            dirty.to_f64().unwrap() - risk.clean_price.to_f64().unwrap(),
            15.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_invalid_terms() {
        let market = flat(0.04);
        let matured = BondTerms::new("OLD", dec!(1000), 0.05, d(2025, 1, 1), Frequency::Annual, DayCount::Act365Fixed);
        assert!(matches!(bond_value(&matured, &market), Err(PricingError::InvalidTerms { .. })));

        let negative = ten_year(-0.01);
        let err = bond_value(&negative, &market).unwrap_err();
        assert!(matches!(err, PricingError::InvalidTerms { .. }));
        assert_eq!(err.instrument(), "UST-10Y");

        let mut no_face = ten_year(0.05);
        no_face.face_value = Decimal::ZERO;
        assert!(bond_value(&no_face, &market).is_err());
    }
}
