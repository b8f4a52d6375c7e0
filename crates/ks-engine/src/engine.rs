// Portfolio engine: price -> simulate -> optimise -> report

use chrono::Utc;
use crossbeam_channel::Sender;
use rayon::prelude::*;
use rayon::ThreadPool;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{info, warn};
use uuid::Uuid;

use ks_optimizer::{optimize, OptimizationResult};
use ks_pricing::{price, PriceResult};
use ks_risk::{CancellationToken, MonteCarloEngine, RiskMetrics, SimulationEvent};
use ks_types::{
    config_error, KsError, KsResult, MarketState, Portfolio, PortfolioError, PricingError,
};

use crate::config::EngineConfig;
use crate::report::{AllocationReport, AllocationSource, InstrumentWeight, PortfolioReport, PricedPosition};
use crate::request::EvaluationRequest;

/// Composition root for one or many evaluations.
///
/// Cloning is cheap and shares the worker pool.
#[derive(Clone)]
pub struct PortfolioEngine {
    config: EngineConfig,
    pool: Arc<ThreadPool>,
    progress: Option<Sender<SimulationEvent>>,
}

impl std::fmt::Debug for PortfolioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioEngine")
            .field("config", &self.config)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl PortfolioEngine {
    pub fn new(config: EngineConfig) -> KsResult<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("keystone-worker-{i}"))
            .build()
            .map_err(|e| config_error!("cannot start worker pool: {e}"))?;
        info!(threads = pool.current_num_threads(), "Initializing Keystone portfolio engine");
        Ok(Self {
            config,
            pool: Arc::new(pool),
            progress: None,
        })
    }

    /// Forward simulation progress events to `sender`.
    pub fn with_progress(mut self, sender: Sender<SimulationEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a full evaluation on the calling thread.
    pub fn evaluate(
        &self,
        portfolio: &Portfolio,
        market: &MarketState,
        request: &EvaluationRequest,
    ) -> KsResult<PortfolioReport> {
        self.evaluate_cancellable(portfolio, market, request, &CancellationToken::new())
    }

    /// As [`Self::evaluate`]; cancelling `token` stops the simulation at the
    /// next batch boundary and yields `RiskError::Cancelled`.
    pub fn evaluate_cancellable(
        &self,
        portfolio: &Portfolio,
        market: &MarketState,
        request: &EvaluationRequest,
        token: &CancellationToken,
    ) -> KsResult<PortfolioReport> {
        portfolio.validate()?;
        info!(
            portfolio = %portfolio.name,
            positions = portfolio.len(),
            as_of = %market.as_of,
            "Starting portfolio evaluation"
        );

        let positions = self.price_positions(portfolio, market)?;
        let total_value = total_value(portfolio.cash, &positions)?;

        let model = request.factor_model.resolve()?;
        let mut simulator = MonteCarloEngine::new(self.config.pricing.clone())
            .with_thread_pool(Arc::clone(&self.pool))
            .with_cancellation(token.clone());
        if let Some(sender) = &self.progress {
            simulator = simulator.with_events(sender.clone());
        }
        let risk = simulator.simulate(portfolio, market, &model, &request.simulation)?;

        let optimization = self.optimize_allocation(portfolio, &risk, request)?;
        let allocation = self.allocation(portfolio, &optimization);

        info!(
            portfolio = %portfolio.name,
            %total_value,
            var = risk.var,
            cvar = risk.cvar,
            status = ?optimization.status,
            "Portfolio evaluation complete"
        );
        Ok(PortfolioReport {
            id: Uuid::new_v4(),
            portfolio: portfolio.name.clone(),
            generated_at: Utc::now(),
            as_of: market.as_of,
            positions,
            cash: portfolio.cash,
            total_value,
            risk,
            optimization,
            allocation,
        })
    }

    /// Evaluate on a blocking thread, cancelling the simulation if it does not
    /// finish within `timeout`.
    pub async fn evaluate_with_timeout(
        &self,
        portfolio: Portfolio,
        market: MarketState,
        request: EvaluationRequest,
        timeout: Duration,
    ) -> KsResult<PortfolioReport> {
        let token = CancellationToken::new();
        let engine = self.clone();
        let worker_token = token.clone();
        let mut handle = tokio::task::spawn_blocking(move || {
            engine.evaluate_cancellable(&portfolio, &market, &request, &worker_token)
        });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined_outcome(joined),
            Err(_) => {
                warn!(?timeout, "Evaluation timed out; cancelling simulation");
                token.cancel();
                // The worker stops at its next batch boundary. A run that
                // had already finished keeps its outcome.
                joined_outcome(handle.await)
            }
        }
    }

    /// Price every position in parallel; the first failure in position order
    /// is reported.
    fn price_positions(&self, portfolio: &Portfolio, market: &MarketState) -> KsResult<Vec<PricedPosition>> {
        let pricing = &self.config.pricing;
        let results: Vec<Result<PriceResult, PricingError>> = self.pool.install(|| {
            portfolio
                .positions
                .par_iter()
                .map(|position| price(&position.instrument, market, pricing))
                .collect()
        });

        portfolio
            .positions
            .iter()
            .zip(results)
            .map(|(position, result)| -> KsResult<PricedPosition> {
                let result = result?;
                let market_value = result.price.checked_mul(position.quantity).ok_or_else(|| {
                    PortfolioError::NonFinite {
                        instrument: result.instrument_id.clone(),
                        field: "market_value".to_string(),
                    }
                })?;
                Ok(PricedPosition {
                    instrument_id: result.instrument_id,
                    family: position.instrument.family().to_string(),
                    quantity: position.quantity,
                    price: result.price,
                    market_value,
                    sensitivities: result.sensitivities,
                })
            })
            .collect()
    }

    /// Optimise over the simulated instrument returns, annualised by the
    /// horizon.
    fn optimize_allocation(
        &self,
        portfolio: &Portfolio,
        risk: &RiskMetrics,
        request: &EvaluationRequest,
    ) -> KsResult<OptimizationResult> {
        let ids = portfolio.instrument_ids();
        let constraints = request.optimization.constraints(&ids)?;
        let per_year = 1.0 / risk.horizon;
        let mu: Vec<f64> = risk.instrument_expected_returns.iter().map(|m| m * per_year).collect();
        let covariance: Vec<Vec<f64>> = risk
            .instrument_covariance
            .iter()
            .map(|row| row.iter().map(|c| c * per_year).collect())
            .collect();
        Ok(optimize(
            &mu,
            &covariance,
            request.optimization.risk_aversion,
            &constraints,
            &self.config.solver,
        )?)
    }

    fn allocation(&self, portfolio: &Portfolio, optimization: &OptimizationResult) -> Option<AllocationReport> {
        let (weights, source) = match optimization.weights() {
            Some(weights) => (weights.to_vec(), AllocationSource::Optimized),
            None if self.config.fallback_to_equal_weight => {
                warn!(status = ?optimization.status, "Optimizer failed; using equal weights");
                (optimization.weights_or_equal(), AllocationSource::EqualWeightFallback)
            }
            None => return None,
        };
        Some(AllocationReport {
            weights: portfolio
                .instrument_ids()
                .into_iter()
                .zip(weights)
                .map(|(id, weight)| InstrumentWeight {
                    instrument_id: id.to_string(),
                    weight,
                })
                .collect(),
            source,
        })
    }
}

/// Result of a joined evaluation worker; only a panicked or aborted task is
/// turned into an error here.
fn joined_outcome(joined: Result<KsResult<PortfolioReport>, JoinError>) -> KsResult<PortfolioReport> {
    joined.map_err(|e| KsError::Internal(format!("evaluation task failed: {e}")))?
}

fn total_value(cash: Decimal, positions: &[PricedPosition]) -> KsResult<Decimal> {
    positions.iter().try_fold(cash, |acc, p| {
        acc.checked_add(p.market_value).ok_or_else(|| {
            KsError::from(PortfolioError::NonFinite {
                instrument: p.instrument_id.clone(),
                field: "total_value".to_string(),
            })
        })
    })
}
