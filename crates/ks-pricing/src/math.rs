//! Normal distribution helpers and float → decimal conversion.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;

use ks_types::PricingError;

/// Standard normal cumulative distribution function.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal probability density function.
pub fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Inverse of [`norm_cdf`] for `p` in (0, 1).
pub fn norm_inv_cdf(p: f64) -> f64 {
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Convert a model output to `Decimal`, rejecting NaN and infinities.
pub fn to_decimal(value: f64, instrument: &str, what: &str) -> Result<Decimal, PricingError> {
    if !value.is_finite() {
        return Err(PricingError::numerical(
            instrument,
            format!("{what} is not finite ({value})"),
        ));
    }
    Decimal::from_f64(value).ok_or_else(|| {
        PricingError::numerical(instrument, format!("{what} {value} is out of decimal range"))
    })
}

/// Lossy `Decimal` → `f64`; out-of-range values come back as NaN so the
/// caller's finiteness checks reject them.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}
