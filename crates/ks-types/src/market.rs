//! Market snapshot consumed by the pricing library: discount curve,
//! volatility surfaces, underlying quotes and index fixings.
//!
//! A [`MarketState`] is built once by the data collaborator and then only
//! read; scenario generation derives new states through the `shifted` /
//! `scaled` / `with_*` helpers instead of mutating in place.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::daycount::DayCount;
use crate::errors::{KsError, KsResult};
use crate::validation_error;

/// How the curve's zero rates compound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compounding {
    #[default]
    Continuous,
    Annual,
}

/// A single zero-rate pillar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Tenor in years.
    pub tenor: f64,
    /// Zero rate at that tenor (e.g. 0.04 = 4 %).
    pub rate: f64,
}

/// Zero-rate curve, linearly interpolated with flat extrapolation.
///
/// Deserialisation goes through [`YieldCurve::new`], so a curve read from
/// JSON holds the same invariants as one built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveData")]
pub struct YieldCurve {
    points: Vec<CurvePoint>,
    compounding: Compounding,
}

#[derive(Deserialize)]
struct CurveData {
    points: Vec<CurvePoint>,
    #[serde(default)]
    compounding: Compounding,
}

impl TryFrom<CurveData> for YieldCurve {
    type Error = KsError;

    fn try_from(data: CurveData) -> Result<Self, Self::Error> {
        YieldCurve::new(data.points, data.compounding)
    }
}

impl YieldCurve {
    pub fn new(mut points: Vec<CurvePoint>, compounding: Compounding) -> KsResult<Self> {
        if points.is_empty() {
            return Err(validation_error!("yield curve needs at least one point"));
        }
        if points.iter().any(|p| !p.tenor.is_finite() || !p.rate.is_finite() || p.tenor < 0.0) {
            return Err(validation_error!("yield curve points must be finite with non-negative tenors"));
        }
        points.sort_by(|a, b| a.tenor.total_cmp(&b.tenor));
        if points.windows(2).any(|w| w[0].tenor == w[1].tenor) {
            return Err(validation_error!("yield curve tenors must be distinct"));
        }
        Ok(Self {
            points,
            compounding,
        })
    }

    /// Single-rate curve.
    pub fn flat(rate: f64, compounding: Compounding) -> Self {
        Self {
            points: vec![CurvePoint { tenor: 1.0, rate }],
            compounding,
        }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn compounding(&self) -> Compounding {
        self.compounding
    }

    /// Interpolated zero rate in the curve's own compounding.
    pub fn zero_rate(&self, t: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if t <= first.tenor {
            return first.rate;
        }
        if t >= last.tenor {
            return last.rate;
        }
        let idx = self.points.partition_point(|p| p.tenor <= t);
        let lo = self.points[idx - 1];
        let hi = self.points[idx];
        let w = (t - lo.tenor) / (hi.tenor - lo.tenor);
        lo.rate + w * (hi.rate - lo.rate)
    }

    /// Continuously-compounded equivalent of the zero rate at `t`.
    pub fn continuous_rate(&self, t: f64) -> f64 {
        let r = self.zero_rate(t);
        match self.compounding {
            Compounding::Continuous => r,
            Compounding::Annual => (1.0 + r).ln(),
        }
    }

    pub fn discount_factor(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 1.0;
        }
        let r = self.zero_rate(t);
        match self.compounding {
            Compounding::Continuous => (-r * t).exp(),
            Compounding::Annual => (1.0 + r).powf(-t),
        }
    }

    /// Simple forward rate for an accrual of length `tau` between `t1` and `t2`.
    pub fn forward_rate(&self, t1: f64, t2: f64, tau: f64) -> f64 {
        if tau <= 0.0 {
            return self.zero_rate(t2);
        }
        (self.discount_factor(t1) / self.discount_factor(t2) - 1.0) / tau
    }

    /// New curve with every zero rate moved by `bump`.
    pub fn shifted(&self, bump: f64) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| CurvePoint {
                    tenor: p.tenor,
                    rate: p.rate + bump,
                })
                .collect(),
            compounding: self.compounding,
        }
    }
}

/// One implied-volatility quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolPoint {
    pub strike: f64,
    /// Maturity in years.
    pub maturity: f64,
    pub vol: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Smile {
    maturity: f64,
    /// (strike, vol) sorted by strike.
    quotes: Vec<(f64, f64)>,
}

impl Smile {
    fn vol(&self, strike: f64) -> f64 {
        let first = self.quotes[0];
        let last = self.quotes[self.quotes.len() - 1];
        if strike <= first.0 {
            return first.1;
        }
        if strike >= last.0 {
            return last.1;
        }
        let idx = self.quotes.partition_point(|q| q.0 <= strike);
        let (k0, v0) = self.quotes[idx - 1];
        let (k1, v1) = self.quotes[idx];
        v0 + (strike - k0) / (k1 - k0) * (v1 - v0)
    }
}

/// Implied-volatility surface: linear in strike within a maturity slice,
/// linear in total variance across maturities, flat outside the quoted range.
///
/// Serialised as its quote list and rebuilt through [`VolSurface::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SurfaceData", into = "SurfaceData")]
pub struct VolSurface {
    smiles: Vec<Smile>,
}

#[derive(Serialize, Deserialize)]
struct SurfaceData {
    points: Vec<VolPoint>,
}

impl TryFrom<SurfaceData> for VolSurface {
    type Error = KsError;

    fn try_from(data: SurfaceData) -> Result<Self, Self::Error> {
        VolSurface::new(data.points)
    }
}

impl From<VolSurface> for SurfaceData {
    fn from(surface: VolSurface) -> Self {
        SurfaceData {
            points: surface.points(),
        }
    }
}

impl VolSurface {
    pub fn new(points: Vec<VolPoint>) -> KsResult<Self> {
        if points.is_empty() {
            return Err(validation_error!("volatility surface needs at least one point"));
        }
        if points
            .iter()
            .any(|p| !p.strike.is_finite() || !p.maturity.is_finite() || !p.vol.is_finite())
        {
            return Err(validation_error!("volatility surface points must be finite"));
        }

        let mut smiles: Vec<Smile> = Vec::new();
        let mut sorted = points;
        sorted.sort_by(|a, b| a.maturity.total_cmp(&b.maturity).then(a.strike.total_cmp(&b.strike)));
        for p in sorted {
            match smiles.last_mut() {
                Some(smile) if smile.maturity == p.maturity => smile.quotes.push((p.strike, p.vol)),
                _ => smiles.push(Smile {
                    maturity: p.maturity,
                    quotes: vec![(p.strike, p.vol)],
                }),
            }
        }
        Ok(Self { smiles })
    }

    /// Surface returning `vol` everywhere.
    pub fn flat(vol: f64) -> Self {
        Self {
            smiles: vec![Smile {
                maturity: 1.0,
                quotes: vec![(0.0, vol)],
            }],
        }
    }

    /// Quotes ordered by maturity, then strike.
    pub fn points(&self) -> Vec<VolPoint> {
        self.smiles
            .iter()
            .flat_map(|s| {
                s.quotes.iter().map(move |&(strike, vol)| VolPoint {
                    strike,
                    maturity: s.maturity,
                    vol,
                })
            })
            .collect()
    }

    pub fn vol(&self, strike: f64, maturity: f64) -> f64 {
        let first = &self.smiles[0];
        let last = &self.smiles[self.smiles.len() - 1];
        if maturity <= first.maturity {
            return first.vol(strike);
        }
        if maturity >= last.maturity {
            return last.vol(strike);
        }
        let idx = self.smiles.partition_point(|s| s.maturity <= maturity);
        let lo = &self.smiles[idx - 1];
        let hi = &self.smiles[idx];
        let w_lo = lo.vol(strike).powi(2) * lo.maturity;
        let w_hi = hi.vol(strike).powi(2) * hi.maturity;
        let w = w_lo + (w_hi - w_lo) * (maturity - lo.maturity) / (hi.maturity - lo.maturity);
        (w.max(0.0) / maturity).sqrt()
    }

    /// New surface with every vol multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            smiles: self
                .smiles
                .iter()
                .map(|s| Smile {
                    maturity: s.maturity,
                    quotes: s.quotes.iter().map(|&(k, v)| (k, v * factor)).collect(),
                })
                .collect(),
        }
    }
}

/// Spot reference for an underlying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingQuote {
    pub spot: f64,
    /// Continuous dividend or convenience yield.
    pub carry_yield: f64,
}

impl UnderlyingQuote {
    pub fn new(spot: f64, carry_yield: f64) -> Self {
        Self { spot, carry_yield }
    }

    /// Cost-of-carry forward for maturity `t` at continuous rate `r`.
    pub fn forward(&self, t: f64, r: f64) -> f64 {
        self.spot * ((r - self.carry_yield) * t).exp()
    }
}

/// Read-only market snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub as_of: NaiveDate,
    pub curve: YieldCurve,
    pub quotes: BTreeMap<String, UnderlyingQuote>,
    pub vol_surfaces: BTreeMap<String, VolSurface>,
    /// Current fixing per floating index.
    pub fixings: BTreeMap<String, f64>,
}

impl MarketState {
    pub fn new(as_of: NaiveDate, curve: YieldCurve) -> Self {
        Self {
            as_of,
            curve,
            quotes: BTreeMap::new(),
            vol_surfaces: BTreeMap::new(),
            fixings: BTreeMap::new(),
        }
    }

    pub fn with_quote(mut self, underlying: &str, quote: UnderlyingQuote) -> Self {
        self.quotes.insert(underlying.to_string(), quote);
        self
    }

    pub fn with_vol_surface(mut self, underlying: &str, surface: VolSurface) -> Self {
        self.vol_surfaces.insert(underlying.to_string(), surface);
        self
    }

    pub fn with_fixing(mut self, index: &str, rate: f64) -> Self {
        self.fixings.insert(index.to_string(), rate);
        self
    }

    pub fn with_curve(mut self, curve: YieldCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn quote(&self, underlying: &str) -> Option<&UnderlyingQuote> {
        self.quotes.get(underlying)
    }

    pub fn vol_surface(&self, underlying: &str) -> Option<&VolSurface> {
        self.vol_surfaces.get(underlying)
    }

    /// ACT/365F time from the snapshot date to `date`.
    pub fn time_to(&self, date: NaiveDate) -> f64 {
        DayCount::Act365Fixed.year_fraction(self.as_of, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn curve() -> YieldCurve {
        YieldCurve::new(
            vec![
                CurvePoint { tenor: 5.0, rate: 0.04 },
                CurvePoint { tenor: 1.0, rate: 0.02 },
            ],
            Compounding::Continuous,
        )
        .unwrap()
    }

    #[test]
    fn curve_interpolates_and_extrapolates_flat() {
        let c = curve();
        assert_relative_eq!(c.zero_rate(0.5), 0.02);
        assert_relative_eq!(c.zero_rate(3.0), 0.03, epsilon = 1e-12);
        assert_relative_eq!(c.zero_rate(10.0), 0.04);
        assert_relative_eq!(c.discount_factor(3.0), (-0.09_f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(c.discount_factor(0.0), 1.0);
    }

    #[test]
    fn curve_rejects_duplicate_tenors() {
        let result = YieldCurve::new(
            vec![
                CurvePoint { tenor: 1.0, rate: 0.02 },
                CurvePoint { tenor: 1.0, rate: 0.03 },
            ],
            Compounding::Annual,
        );
        assert!(result.is_err());
        assert!(YieldCurve::new(vec![], Compounding::Annual).is_err());
    }

    #[test]
    fn annual_compounding_discount() {
        let c = YieldCurve::flat(0.05, Compounding::Annual);
        assert_relative_eq!(c.discount_factor(2.0), 1.0 / 1.05_f64.powi(2), epsilon = 1e-12);
        assert_relative_eq!(c.continuous_rate(2.0), 1.05_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn forward_rate_consistent_with_discount_factors() {
        let c = curve();
        let f = c.forward_rate(1.0, 2.0, 1.0);
        assert_relative_eq!(
            (1.0 + f) * c.discount_factor(2.0),
            c.discount_factor(1.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn shifted_curve_moves_every_pillar() {
        let bumped = curve().shifted(0.001);
        assert_relative_eq!(bumped.zero_rate(1.0), 0.021, epsilon = 1e-12);
        assert_relative_eq!(bumped.zero_rate(5.0), 0.041, epsilon = 1e-12);
    }

    #[test]
    fn vol_surface_interpolation() {
        let surface = VolSurface::new(vec![
            VolPoint { strike: 90.0, maturity: 1.0, vol: 0.25 },
            VolPoint { strike: 110.0, maturity: 1.0, vol: 0.15 },
            VolPoint { strike: 90.0, maturity: 2.0, vol: 0.25 },
            VolPoint { strike: 110.0, maturity: 2.0, vol: 0.15 },
        ])
        .unwrap();
        assert_relative_eq!(surface.vol(100.0, 1.0), 0.20, epsilon = 1e-12);
        assert_relative_eq!(surface.vol(80.0, 0.5), 0.25, epsilon = 1e-12);
        // Same smile at both slices: total-variance interpolation returns it unchanged.
        assert_relative_eq!(surface.vol(100.0, 1.5), 0.20, epsilon = 1e-12);
        assert_relative_eq!(surface.scaled(2.0).vol(100.0, 1.0), 0.40, epsilon = 1e-12);
    }

    #[test]
    fn deserialized_curve_is_validated() {
        let err = serde_json::from_str::<YieldCurve>(r#"{"points":[]}"#).unwrap_err();
        assert!(err.to_string().contains("at least one point"), "{err}");
        let err = serde_json::from_str::<YieldCurve>(
            r#"{"points":[{"tenor":1.0,"rate":0.02},{"tenor":1.0,"rate":0.03}],"compounding":"Annual"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("distinct"), "{err}");

        // Unsorted pillars come back sorted, as from `new`.
        let c: YieldCurve = serde_json::from_str(
            r#"{"points":[{"tenor":5.0,"rate":0.04},{"tenor":1.0,"rate":0.02}]}"#,
        )
        .unwrap();
        assert_eq!(c, curve());
        assert_relative_eq!(c.zero_rate(3.0), 0.03, epsilon = 1e-12);
    }

    #[test]
    fn deserialized_surface_is_validated() {
        let err = serde_json::from_str::<VolSurface>(r#"{"points":[]}"#).unwrap_err();
        assert!(err.to_string().contains("at least one point"), "{err}");

        let surface = VolSurface::new(vec![
            VolPoint { strike: 110.0, maturity: 2.0, vol: 0.15 },
            VolPoint { strike: 90.0, maturity: 1.0, vol: 0.25 },
            VolPoint { strike: 110.0, maturity: 1.0, vol: 0.15 },
        ])
        .unwrap();
        let json = serde_json::to_string(&surface).unwrap();
        let back: VolSurface = serde_json::from_str(&json).unwrap();
        assert_eq!(back, surface);
        assert_eq!(back.points().len(), 3);
    }

    #[test]
    fn market_with_empty_curve_fails_to_load() {
        let json = r#"{
            "as_of": "2025-01-01",
            "curve": {"points": [], "compounding": "Continuous"},
            "quotes": {},
            "vol_surfaces": {},
            "fixings": {}
        }"#;
        assert!(serde_json::from_str::<MarketState>(json).is_err());
    }

    #[test]
    fn market_builders() {
        let as_of = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let market = MarketState::new(as_of, curve())
            .with_quote("SPX", UnderlyingQuote::new(5000.0, 0.015))
            .with_vol_surface("SPX", VolSurface::flat(0.18))
            .with_fixing("SOFR", 0.043);
        assert_eq!(market.quote("SPX").unwrap().spot, 5000.0);
        assert_relative_eq!(market.vol_surface("SPX").unwrap().vol(4000.0, 3.0), 0.18);
        assert_eq!(market.fixings.get("SOFR"), Some(&0.043));
        let later = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_relative_eq!(market.time_to(later), 1.0);
    }
}
