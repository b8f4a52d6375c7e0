//! Monte Carlo risk engine for Keystone.
//!
//! Provides:
//! - Factor models (supplied, independent or estimated from history)
//! - Scenario generation with deterministic per-batch random streams
//! - Parallel full revaluation through the pricing library
//! - VaR / CVaR and distribution statistics, plus historical and
//!   parametric estimators for standalone use

pub mod events;
pub mod factors;
pub mod metrics;
pub mod scenario;
pub mod simulation;

pub use events::SimulationEvent;
pub use factors::{FactorModel, RiskFactor};
pub use metrics::{
    historical_expected_shortfall, historical_var, parametric_cvar, parametric_var,
    sample_covariance, RiskMetrics,
};
pub use simulation::{CancellationToken, MonteCarloEngine, SimulationParams};
