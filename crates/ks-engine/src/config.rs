// Engine configuration: JSON file contents plus environment overrides

use serde::{Deserialize, Serialize};

use ks_optimizer::SolverSettings;
use ks_pricing::PricingConfig;
use ks_types::{config_error, KsResult};

/// Environment variable overriding [`EngineConfig::worker_threads`].
pub const WORKER_THREADS_ENV: &str = "KEYSTONE_WORKER_THREADS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the engine's rayon pool; 0 uses the available parallelism.
    pub worker_threads: usize,
    pub pricing: PricingConfig,
    pub solver: SolverSettings,
    /// Report an equal-weight allocation when the optimizer fails.
    pub fallback_to_equal_weight: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            pricing: PricingConfig::default(),
            solver: SolverSettings::default(),
            fallback_to_equal_weight: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document (missing fields take defaults) and apply
    /// environment overrides.
    pub fn from_json_str(json: &str) -> KsResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.with_env_overrides()
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_solver(mut self, solver: SolverSettings) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_equal_weight = enabled;
        self
    }

    pub fn with_env_overrides(self) -> KsResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> KsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(WORKER_THREADS_ENV) {
            self.worker_threads = raw
                .trim()
                .parse()
                .map_err(|_| config_error!("{WORKER_THREADS_ENV}={raw:?} is not a thread count"))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> KsResult<()> {
        if self.pricing.lattice.steps == 0 {
            return Err(config_error!("lattice steps must be positive"));
        }
        if !self.pricing.initial_margin_rate.is_finite() || self.pricing.initial_margin_rate < 0.0 {
            return Err(config_error!("initial margin rate must be non-negative"));
        }
        Ok(())
    }
}
