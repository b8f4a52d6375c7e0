use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whole-contract option sensitivities (unit greeks times the multiplier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: Decimal,
    pub gamma: Decimal,
    /// Value change over one calendar day.
    pub theta: Decimal,
    /// Per vol point.
    pub vega: Decimal,
    /// Per rate point.
    pub rho: Decimal,
}

/// Yield-based and curve-based risk of a bond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondRisk {
    pub clean_price: Decimal,
    pub accrued_interest: Decimal,
    /// Yield (compounded at the coupon frequency) that reprices the curve value.
    pub yield_to_maturity: f64,
    pub macaulay_duration: f64,
    pub modified_duration: f64,
    pub convexity: f64,
    /// Value gained for a 1bp parallel fall in the curve.
    pub dv01: Decimal,
}

/// Cost-of-carry risk of a future.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureRisk {
    pub forward_price: Decimal,
    /// Multiplier times forward price.
    pub notional: Decimal,
    /// Value change per unit move in spot.
    pub delta: Decimal,
    pub dv01: Decimal,
    /// (forward − spot) / spot.
    pub basis: f64,
    pub initial_margin: Decimal,
}

/// Leg values and rate risk of a swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRisk {
    pub notional: Decimal,
    pub fixed_leg_pv: Decimal,
    pub floating_leg_pv: Decimal,
    /// PV of one unit of fixed rate over the remaining schedule (times notional).
    pub annuity: Decimal,
    /// Fixed rate that would make the swap worth zero.
    pub par_rate: f64,
    pub dv01: Decimal,
}

/// Sensitivities reported alongside a price, one shape per instrument family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family")]
pub enum Sensitivities {
    Bond(BondRisk),
    Option(Greeks),
    Future(FutureRisk),
    Swap(SwapRisk),
}
