// What the caller asks of one evaluation: simulation size, factor model
// source and optimisation preferences.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use ks_optimizer::{Constraints, GroupConstraint};
use ks_risk::{FactorModel, RiskFactor, SimulationParams};
use ks_types::{OptimizerError, RiskError};

/// Where the factor covariance comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FactorModelSpec {
    Supplied(FactorModel),
    /// Estimated from per-period factor changes, one row per observation.
    Historical {
        factors: Vec<RiskFactor>,
        observations: Vec<Vec<f64>>,
        periods_per_year: f64,
    },
}

impl FactorModelSpec {
    pub fn resolve(&self) -> Result<FactorModel, RiskError> {
        match self {
            FactorModelSpec::Supplied(model) => Ok(model.clone()),
            FactorModelSpec::Historical {
                factors,
                observations,
                periods_per_year,
            } => FactorModel::estimate(factors.clone(), observations, *periods_per_year),
        }
    }
}

/// Group limit referring to instruments by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub instruments: Vec<String>,
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
}

impl GroupSpec {
    pub fn cap(name: &str, instruments: &[&str], max_weight: f64) -> Self {
        Self {
            name: name.to_string(),
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            min_weight: None,
            max_weight: Some(max_weight),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationParams {
    /// λ in `[0, 1]`: 1 minimises variance only, 0 maximises return only.
    pub risk_aversion: f64,
    pub allow_short: bool,
    /// Per-instrument `(min, max)` weights; others keep the default box.
    pub bounds: BTreeMap<String, (f64, f64)>,
    pub groups: Vec<GroupSpec>,
}

impl Default for OptimizationParams {
    fn default() -> Self {
        Self {
            risk_aversion: 0.5,
            allow_short: false,
            bounds: BTreeMap::new(),
            groups: Vec::new(),
        }
    }
}

impl OptimizationParams {
    pub fn with_risk_aversion(mut self, lambda: f64) -> Self {
        self.risk_aversion = lambda;
        self
    }

    pub fn with_short(mut self) -> Self {
        self.allow_short = true;
        self
    }

    pub fn with_bound(mut self, instrument: &str, min: f64, max: f64) -> Self {
        self.bounds.insert(instrument.to_string(), (min, max));
        self
    }

    pub fn with_group(mut self, group: GroupSpec) -> Self {
        self.groups.push(group);
        self
    }

    /// Index-based constraints for instruments in `ids` order.
    pub fn constraints(&self, ids: &[&str]) -> Result<Constraints, OptimizerError> {
        let index_of = |id: &str| {
            ids.iter()
                .position(|candidate| *candidate == id)
                .ok_or_else(|| OptimizerError::invalid("constraints", format!("unknown instrument {id}")))
        };

        let mut constraints = if self.allow_short {
            Constraints::with_short()
        } else {
            Constraints::long_only()
        };
        if !self.bounds.is_empty() {
            let mut bounds = vec![constraints.default_bounds(); ids.len()];
            for (id, &bound) in &self.bounds {
                bounds[index_of(id)?] = bound;
            }
            constraints = constraints.with_bounds(bounds);
        }
        for group in &self.groups {
            let members = group
                .instruments
                .iter()
                .map(|id| index_of(id))
                .collect::<Result<Vec<_>, _>>()?;
            let mut resolved = GroupConstraint::new(&group.name, members);
            resolved.min_weight = group.min_weight;
            resolved.max_weight = group.max_weight;
            constraints = constraints.with_group(resolved);
        }
        Ok(constraints)
    }
}

/// One aggregate evaluation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub simulation: SimulationParams,
    pub factor_model: FactorModelSpec,
    pub optimization: OptimizationParams,
}

impl EvaluationRequest {
    pub fn new(factor_model: FactorModelSpec) -> Self {
        Self {
            simulation: SimulationParams::default(),
            factor_model,
            optimization: OptimizationParams::default(),
        }
    }

    pub fn with_simulation(mut self, simulation: SimulationParams) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn with_optimization(mut self, optimization: OptimizationParams) -> Self {
        self.optimization = optimization;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_map_to_indices() {
        let params = OptimizationParams::default()
            .with_bound("B", 0.1, 0.6)
            .with_group(GroupSpec::cap("rates", &["A", "C"], 0.4));
        let constraints = params.constraints(&["A", "B", "C"]).unwrap();
        assert_eq!(constraints.bounds, Some(vec![(0.0, 1.0), (0.1, 0.6), (0.0, 1.0)]));
        assert_eq!(constraints.groups[0].members, vec![0, 2]);
        assert_eq!(constraints.groups[0].max_weight, Some(0.4));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let params = OptimizationParams::default().with_group(GroupSpec::cap("x", &["Z"], 0.5));
        assert!(matches!(
            params.constraints(&["A"]),
            Err(OptimizerError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn historical_spec_estimates_model() {
        let spec = FactorModelSpec::Historical {
            factors: vec![RiskFactor::Rates],
            observations: vec![vec![0.0001], vec![-0.0001], vec![0.0002]],
            periods_per_year: 252.0,
        };
        let model = spec.resolve().unwrap();
        assert_eq!(model.factors, vec![RiskFactor::Rates]);
        assert!(model.covariance[0][0] > 0.0);
    }
}
