// Evaluate a small multi-asset book and print the report as JSON.
//
//   RUST_LOG=info cargo run -p ks-engine --example price_portfolio

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

use ks_engine::{EngineConfig, EvaluationRequest, FactorModelSpec, GroupSpec, OptimizationParams, PortfolioEngine};
use ks_pricing::{LatticeConfig, PricingConfig};
use ks_risk::{FactorModel, RiskFactor, SimulationParams};
use ks_types::{
    BondTerms, Compounding, CurvePoint, DayCount, Frequency, FutureTerms, MarketState, OptionRight, OptionTerms,
    Portfolio, SwapDirection, SwapTerms, UnderlyingQuote, VolPoint, VolSurface, YieldCurve,
};

fn date(y: i32, m: u32, d: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| anyhow::anyhow!("invalid date {y}-{m}-{d}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let curve = YieldCurve::new(
        vec![
            CurvePoint { tenor: 0.25, rate: 0.043 },
            CurvePoint { tenor: 1.0, rate: 0.041 },
            CurvePoint { tenor: 5.0, rate: 0.039 },
            CurvePoint { tenor: 10.0, rate: 0.042 },
        ],
        Compounding::Continuous,
    )?;
    let surface = VolSurface::new(vec![
        VolPoint { strike: 4500.0, maturity: 0.5, vol: 0.21 },
        VolPoint { strike: 5000.0, maturity: 0.5, vol: 0.18 },
        VolPoint { strike: 5500.0, maturity: 0.5, vol: 0.16 },
        VolPoint { strike: 4500.0, maturity: 2.0, vol: 0.22 },
        VolPoint { strike: 5000.0, maturity: 2.0, vol: 0.20 },
        VolPoint { strike: 5500.0, maturity: 2.0, vol: 0.185 },
    ])?;
    let market = MarketState::new(date(2025, 1, 2)?, curve)
        .with_quote("SPX", UnderlyingQuote::new(5000.0, 0.014))
        .with_vol_surface("SPX", surface)
        .with_fixing("SOFR", 0.0431);

    let portfolio = Portfolio::new("demo-book", dec!(250_000))
        .with_position(
            BondTerms::new("UST-2030", dec!(1000), 0.0425, date(2030, 5, 15)?, Frequency::SemiAnnual, DayCount::ActActIsda),
            dec!(200),
        )?
        .with_position(OptionTerms::american("SPX-P-4800", "SPX", OptionRight::Put, dec!(4800), date(2025, 9, 19)?), dec!(25))?
        .with_position(FutureTerms::new("ESH6", "SPX", date(2026, 3, 20)?, dec!(50), dec!(5075)), dec!(3))?
        .with_position(
            SwapTerms::vanilla(
                "IRS-5Y",
                dec!(2_000_000),
                0.0395,
                "SOFR",
                SwapDirection::PayFixed,
                date(2024, 10, 2)?,
                5,
                Frequency::Quarterly,
            ),
            dec!(1),
        )?;

    let model = FactorModel::new(
        vec![
            RiskFactor::Rates,
            RiskFactor::Spot("SPX".into()),
            RiskFactor::Volatility("SPX".into()),
        ],
        vec![0.0, 0.07, 0.0],
        vec![
            vec![0.000_09, -0.000_36, 0.0],
            vec![-0.000_36, 0.0324, -0.018],
            vec![0.0, -0.018, 0.0625],
        ],
    )?;
    let request = EvaluationRequest::new(FactorModelSpec::Supplied(model))
        .with_simulation(SimulationParams::default().with_paths(5_000).with_horizon(10.0 / 252.0).with_confidence(0.99))
        .with_optimization(
            OptimizationParams::default()
                .with_risk_aversion(0.6)
                .with_group(GroupSpec::cap("equity", &["SPX-P-4800", "ESH6"], 0.5)),
        );

    // Coarser lattice for scenario revaluation of the American put.
    let lattice = LatticeConfig::default().with_steps(100).with_tolerance(1e-3);
    let pricing = PricingConfig::default().with_lattice(lattice);
    let config = EngineConfig::default().with_pricing(pricing).with_env_overrides()?;
    let engine = PortfolioEngine::new(config)?;
    let report = engine.evaluate(&portfolio, &market, &request)?;
    println!("{}", report.to_json()?);
    Ok(())
}
