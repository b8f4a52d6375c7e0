// Combined evaluation output handed to CLI and visualisation consumers

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ks_optimizer::OptimizationResult;
use ks_pricing::Sensitivities;
use ks_risk::RiskMetrics;
use ks_types::KsResult;

/// One position after pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedPosition {
    pub instrument_id: String,
    pub family: String,
    pub quantity: Decimal,
    /// Unit price.
    pub price: Decimal,
    /// `quantity * price`
    pub market_value: Decimal,
    pub sensitivities: Sensitivities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationSource {
    Optimized,
    /// The optimizer failed; every instrument gets `1/n`.
    EqualWeightFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentWeight {
    pub instrument_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationReport {
    pub weights: Vec<InstrumentWeight>,
    pub source: AllocationSource,
}

impl AllocationReport {
    pub fn weight_of(&self, instrument_id: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|w| w.instrument_id == instrument_id)
            .map(|w| w.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub id: Uuid,
    pub portfolio: String,
    pub generated_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    pub positions: Vec<PricedPosition>,
    pub cash: Decimal,
    /// Cash plus the market value of every position.
    pub total_value: Decimal,
    pub risk: RiskMetrics,
    pub optimization: OptimizationResult,
    /// Absent when the optimizer failed and the fallback is disabled.
    pub allocation: Option<AllocationReport>,
}

impl PortfolioReport {
    pub fn to_json(&self) -> KsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> KsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn position(&self, instrument_id: &str) -> Option<&PricedPosition> {
        self.positions.iter().find(|p| p.instrument_id == instrument_id)
    }
}
