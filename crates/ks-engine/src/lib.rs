// Keystone portfolio aggregator
// Prices every position, simulates portfolio risk and optimises the allocation
// in one call, returning a serialisable report.

pub mod config;
pub mod engine;
pub mod report;
pub mod request;

pub use config::EngineConfig;
pub use engine::PortfolioEngine;
pub use report::{AllocationReport, AllocationSource, InstrumentWeight, PortfolioReport, PricedPosition};
pub use request::{EvaluationRequest, FactorModelSpec, GroupSpec, OptimizationParams};
