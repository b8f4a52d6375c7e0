//! Instrument definitions: a closed set of bond, option, future and swap terms.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::daycount::{forward_schedule, DayCount, Frequency};

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    Call,
    Put,
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionRight::Call => write!(f, "Call"),
            OptionRight::Put => write!(f, "Put"),
        }
    }
}

/// Exercise style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExerciseStyle {
    /// Can only be exercised at expiration.
    European,
    /// Can be exercised any time before expiration.
    American,
}

impl fmt::Display for ExerciseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExerciseStyle::European => write!(f, "European"),
            ExerciseStyle::American => write!(f, "American"),
        }
    }
}

/// Fixed-coupon bullet bond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondTerms {
    pub id: String,
    pub face_value: Decimal,
    /// Annual coupon rate (e.g. 0.05 = 5 %), paid in `frequency` instalments.
    pub coupon_rate: f64,
    pub maturity: NaiveDate,
    pub frequency: Frequency,
    pub day_count: DayCount,
}

impl BondTerms {
    pub fn new(
        id: &str,
        face_value: Decimal,
        coupon_rate: f64,
        maturity: NaiveDate,
        frequency: Frequency,
        day_count: DayCount,
    ) -> Self {
        Self {
            id: id.to_string(),
            face_value,
            coupon_rate,
            maturity,
            frequency,
            day_count,
        }
    }
}

/// A single option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTerms {
    pub id: String,
    /// Key into the market state's quotes and volatility surfaces.
    pub underlying: String,
    pub strike: Decimal,
    pub maturity: NaiveDate,
    pub style: ExerciseStyle,
    pub right: OptionRight,
    /// Units of underlying per contract.
    pub multiplier: Decimal,
}

impl OptionTerms {
    pub fn new(
        id: &str,
        underlying: &str,
        right: OptionRight,
        strike: Decimal,
        maturity: NaiveDate,
        style: ExerciseStyle,
        multiplier: Decimal,
    ) -> Self {
        Self {
            id: id.to_string(),
            underlying: underlying.to_string(),
            strike,
            maturity,
            style,
            right,
            multiplier,
        }
    }

    /// Convenience constructor for a single-unit European option.
    pub fn european(
        id: &str,
        underlying: &str,
        right: OptionRight,
        strike: Decimal,
        maturity: NaiveDate,
    ) -> Self {
        Self::new(
            id,
            underlying,
            right,
            strike,
            maturity,
            ExerciseStyle::European,
            Decimal::ONE,
        )
    }

    /// Convenience constructor for a single-unit American option.
    pub fn american(
        id: &str,
        underlying: &str,
        right: OptionRight,
        strike: Decimal,
        maturity: NaiveDate,
    ) -> Self {
        Self::new(
            id,
            underlying,
            right,
            strike,
            maturity,
            ExerciseStyle::American,
            Decimal::ONE,
        )
    }

    /// Intrinsic value per unit of underlying given the current spot.
    pub fn intrinsic_value(&self, spot: Decimal) -> Decimal {
        let iv = match self.right {
            OptionRight::Call => spot - self.strike,
            OptionRight::Put => self.strike - spot,
        };
        iv.max(Decimal::ZERO)
    }
}

/// Exchange-traded future held from `trade_price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureTerms {
    pub id: String,
    pub underlying: String,
    pub maturity: NaiveDate,
    pub multiplier: Decimal,
    /// Price at which the position was opened; mark-to-market is measured from it.
    pub trade_price: Decimal,
}

impl FutureTerms {
    pub fn new(
        id: &str,
        underlying: &str,
        maturity: NaiveDate,
        multiplier: Decimal,
        trade_price: Decimal,
    ) -> Self {
        Self {
            id: id.to_string(),
            underlying: underlying.to_string(),
            maturity,
            multiplier,
            trade_price,
        }
    }
}

/// Which leg the holder receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapDirection {
    ReceiveFixed,
    PayFixed,
}

/// One accrual period of a swap. The floating rate fixes on `reset_date`
/// and both legs pay on `payment_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPeriod {
    pub reset_date: NaiveDate,
    pub payment_date: NaiveDate,
}

/// Fixed-for-floating interest rate swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapTerms {
    pub id: String,
    pub notional: Decimal,
    pub fixed_rate: f64,
    /// Name of the floating index; looked up in the market state's fixings.
    pub floating_index: String,
    pub direction: SwapDirection,
    pub schedule: Vec<SwapPeriod>,
    pub fixed_day_count: DayCount,
    pub floating_day_count: DayCount,
    /// Spread over the floating index.
    pub floating_spread: f64,
}

impl SwapTerms {
    /// Swap with an explicit schedule.
    pub fn new(
        id: &str,
        notional: Decimal,
        fixed_rate: f64,
        floating_index: &str,
        direction: SwapDirection,
        schedule: Vec<SwapPeriod>,
    ) -> Self {
        Self {
            id: id.to_string(),
            notional,
            fixed_rate,
            floating_index: floating_index.to_string(),
            direction,
            schedule,
            fixed_day_count: DayCount::Thirty360,
            floating_day_count: DayCount::Act360,
            floating_spread: 0.0,
        }
    }

    /// Regular swap starting at `start` running for `tenor_years` with
    /// periods of `frequency`; each period resets at its start.
    #[allow(clippy::too_many_arguments)]
    pub fn vanilla(
        id: &str,
        notional: Decimal,
        fixed_rate: f64,
        floating_index: &str,
        direction: SwapDirection,
        start: NaiveDate,
        tenor_years: u32,
        frequency: Frequency,
    ) -> Self {
        let payments = forward_schedule(start, frequency, tenor_years * frequency.per_year());
        let mut reset = start;
        let schedule = payments
            .into_iter()
            .map(|payment_date| {
                let period = SwapPeriod {
                    reset_date: reset,
                    payment_date,
                };
                reset = payment_date;
                period
            })
            .collect();
        Self::new(id, notional, fixed_rate, floating_index, direction, schedule)
    }

    pub fn with_day_counts(mut self, fixed: DayCount, floating: DayCount) -> Self {
        self.fixed_day_count = fixed;
        self.floating_day_count = floating;
        self
    }

    pub fn with_spread(mut self, spread: f64) -> Self {
        self.floating_spread = spread;
        self
    }

    /// Years from `as_of` to the final payment (zero for an empty schedule).
    pub fn tenor_years(&self, as_of: NaiveDate) -> f64 {
        self.schedule
            .last()
            .map(|p| DayCount::Act365Fixed.year_fraction(as_of, p.payment_date).max(0.0))
            .unwrap_or(0.0)
    }
}

/// The instruments the pricing library understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Instrument {
    Bond(BondTerms),
    Option(OptionTerms),
    Future(FutureTerms),
    Swap(SwapTerms),
}

impl Instrument {
    pub fn id(&self) -> &str {
        match self {
            Instrument::Bond(b) => &b.id,
            Instrument::Option(o) => &o.id,
            Instrument::Future(f) => &f.id,
            Instrument::Swap(s) => &s.id,
        }
    }

    /// Underlying reference for spot/vol driven instruments.
    pub fn underlying(&self) -> Option<&str> {
        match self {
            Instrument::Option(o) => Some(&o.underlying),
            Instrument::Future(f) => Some(&f.underlying),
            Instrument::Bond(_) | Instrument::Swap(_) => None,
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            Instrument::Bond(_) => "bond",
            Instrument::Option(_) => "option",
            Instrument::Future(_) => "future",
            Instrument::Swap(_) => "swap",
        }
    }
}

impl From<BondTerms> for Instrument {
    fn from(terms: BondTerms) -> Self {
        Instrument::Bond(terms)
    }
}

impl From<OptionTerms> for Instrument {
    fn from(terms: OptionTerms) -> Self {
        Instrument::Option(terms)
    }
}

impl From<FutureTerms> for Instrument {
    fn from(terms: FutureTerms) -> Self {
        Instrument::Future(terms)
    }
}

impl From<SwapTerms> for Instrument {
    fn from(terms: SwapTerms) -> Self {
        Instrument::Swap(terms)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Bond(b) => write!(
                f,
                "{} bond {} {:.3}% {}",
                b.id,
                b.face_value,
                b.coupon_rate * 100.0,
                b.maturity.format("%Y-%m-%d")
            ),
            Instrument::Option(o) => write!(
                f,
                "{} {} {} {} {} ({})",
                o.id,
                o.underlying,
                o.maturity.format("%Y-%m-%d"),
                o.strike,
                o.right,
                o.style
            ),
            Instrument::Future(fut) => write!(
                f,
                "{} {} future {} x{}",
                fut.id,
                fut.underlying,
                fut.maturity.format("%Y-%m-%d"),
                fut.multiplier
            ),
            Instrument::Swap(s) => write!(
                f,
                "{} swap {} {:.3}% vs {}",
                s.id,
                s.notional,
                s.fixed_rate * 100.0,
                s.floating_index
            ),
        }
    }
}
