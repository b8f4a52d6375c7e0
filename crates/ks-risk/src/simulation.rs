//! Monte Carlo simulation driver.
//!
//! Paths are split into fixed-size batches. Batch `b` draws from its own
//! ChaCha8 stream (`seed`, stream `b`), batches run on rayon, and results are
//! gathered in batch order before any reduction, so a given seed produces
//! bit-identical metrics regardless of thread count or scheduling.

use crossbeam_channel::Sender;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPool;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use ks_pricing::{price, value, PricingConfig};
use ks_types::{MarketState, Portfolio, RiskError};

use crate::events::SimulationEvent;
use crate::factors::FactorModel;
use crate::metrics::RiskMetrics;
use crate::scenario::ScenarioGenerator;

/// Size and reproducibility settings of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub num_paths: usize,
    /// Horizon in years (1/252 = one trading day).
    pub horizon: f64,
    pub seed: u64,
    /// VaR / CVaR confidence level in (0, 1).
    pub confidence: f64,
    /// Paths per batch; also the cancellation granularity.
    pub batch_size: usize,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            num_paths: 10_000,
            horizon: 1.0 / 252.0,
            seed: 42,
            confidence: 0.95,
            batch_size: 1024,
        }
    }
}

impl SimulationParams {
    pub fn with_paths(mut self, num_paths: usize) -> Self {
        self.num_paths = num_paths;
        self
    }

    pub fn with_horizon(mut self, horizon: f64) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn validate(&self) -> Result<(), RiskError> {
        if self.num_paths < 2 {
            return Err(RiskError::invalid("num_paths", "must be at least 2"));
        }
        if !self.confidence.is_finite() || self.confidence <= 0.0 || self.confidence >= 1.0 {
            return Err(RiskError::invalid(
                "confidence",
                format!("{} is outside (0, 1)", self.confidence),
            ));
        }
        if !self.horizon.is_finite() || self.horizon <= 0.0 {
            return Err(RiskError::invalid("horizon", "must be positive and finite"));
        }
        if self.batch_size == 0 {
            return Err(RiskError::invalid("batch_size", "must be positive"));
        }
        Ok(())
    }

    pub fn total_batches(&self) -> usize {
        self.num_paths.div_ceil(self.batch_size.max(1))
    }
}

/// Cooperative cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Base state of one position.
struct Holding {
    quantity: f64,
    base_value: f64,
    exposure: f64,
}

/// Per-path output of one batch.
struct BatchOutput {
    portfolio_returns: Vec<f64>,
    instrument_returns: Vec<Vec<f64>>,
}

enum BatchStatus {
    Done(BatchOutput),
    Skipped,
    Failed(RiskError),
}

/// Full-revaluation Monte Carlo engine.
pub struct MonteCarloEngine {
    pricing: PricingConfig,
    pool: Option<Arc<ThreadPool>>,
    events: Option<Sender<SimulationEvent>>,
    cancel: CancellationToken,
}

impl MonteCarloEngine {
    pub fn new(pricing: PricingConfig) -> Self {
        Self {
            pricing,
            pool: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Run batches on `pool` instead of the global rayon pool.
    pub fn with_thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_events(mut self, sender: Sender<SimulationEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Simulate the horizon P&L distribution of `portfolio`.
    pub fn simulate(
        &self,
        portfolio: &Portfolio,
        market: &MarketState,
        model: &FactorModel,
        params: &SimulationParams,
    ) -> Result<RiskMetrics, RiskError> {
        params.validate()?;
        portfolio
            .validate()
            .map_err(|e| RiskError::invalid("portfolio", e.to_string()))?;
        model.check_market(market)?;
        let generator = ScenarioGenerator::new(model, model.loadings()?, params.horizon);

        let holdings = portfolio
            .positions
            .iter()
            .map(|position| {
                let result = price(&position.instrument, market, &self.pricing)
                    .map_err(|source| RiskError::Revaluation { path: 0, source })?;
                Ok(Holding {
                    quantity: position.quantity.to_f64().unwrap_or(f64::NAN),
                    base_value: result.price_f64(),
                    exposure: result.exposure(),
                })
            })
            .collect::<Result<Vec<_>, RiskError>>()?;

        let capital = portfolio.cash.to_f64().unwrap_or(f64::NAN).abs()
            + holdings
                .iter()
                .map(|h| h.quantity.abs() * h.exposure)
                .sum::<f64>();
        if !capital.is_finite() || capital <= 0.0 {
            return Err(RiskError::invalid(
                "portfolio",
                format!("capital base {capital} must be positive and finite"),
            ));
        }

        let total_batches = params.total_batches();
        info!(
            portfolio = %portfolio.name,
            positions = holdings.len(),
            paths = params.num_paths,
            batches = total_batches,
            seed = params.seed,
            "starting simulation"
        );
        self.emit(SimulationEvent::Started {
            num_paths: params.num_paths,
            total_batches,
        });

        let completed = AtomicUsize::new(0);
        let run_batch = |batch: usize| -> BatchStatus {
            if self.cancel.is_cancelled() {
                return BatchStatus::Skipped;
            }
            let start = batch * params.batch_size;
            let end = (start + params.batch_size).min(params.num_paths);
            let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
            rng.set_stream(batch as u64);

            let mut output = BatchOutput {
                portfolio_returns: Vec::with_capacity(end - start),
                instrument_returns: Vec::with_capacity(end - start),
            };
            for path in start..end {
                let shock = generator.draw(&mut rng);
                let shocked = generator.apply(market, &shock);
                let mut pnl = 0.0;
                let mut returns = Vec::with_capacity(holdings.len());
                for (position, holding) in portfolio.positions.iter().zip(&holdings) {
                    let revalued = match value(&position.instrument, &shocked, &self.pricing) {
                        Ok(v) => v,
                        Err(source) => return BatchStatus::Failed(RiskError::Revaluation { path, source }),
                    };
                    let change = revalued - holding.base_value;
                    pnl += holding.quantity * change;
                    returns.push(if holding.exposure > 0.0 {
                        change / holding.exposure
                    } else {
                        0.0
                    });
                }
                output.portfolio_returns.push(pnl / capital);
                output.instrument_returns.push(returns);
            }

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(batch, paths = end - start, done, total_batches, "batch complete");
            self.emit(SimulationEvent::BatchCompleted {
                batch,
                completed: done,
                total_batches,
            });
            BatchStatus::Done(output)
        };

        let statuses: Vec<BatchStatus> = match &self.pool {
            Some(pool) => pool.install(|| (0..total_batches).into_par_iter().map(run_batch).collect()),
            None => (0..total_batches).into_par_iter().map(run_batch).collect(),
        };

        // Only batches that never started mark the run as cancelled; a token
        // flipped after the last batch finished leaves the result intact.
        if statuses.iter().any(|s| matches!(s, BatchStatus::Skipped)) {
            let completed_batches = completed.load(Ordering::SeqCst);
            warn!(completed_batches, total_batches, "simulation cancelled");
            self.emit(SimulationEvent::Cancelled {
                completed_batches,
                total_batches,
            });
            return Err(RiskError::Cancelled {
                completed_batches,
                total_batches,
            });
        }

        let mut portfolio_returns = Vec::with_capacity(params.num_paths);
        let mut instrument_returns = Vec::with_capacity(params.num_paths);
        for status in statuses {
            match status {
                BatchStatus::Done(output) => {
                    portfolio_returns.extend(output.portfolio_returns);
                    instrument_returns.extend(output.instrument_returns);
                }
                BatchStatus::Failed(err) => return Err(err),
                BatchStatus::Skipped => {}
            }
        }

        let ids = portfolio.instrument_ids().into_iter().map(String::from).collect();
        let metrics = RiskMetrics::from_samples(portfolio_returns, &instrument_returns, ids, params, capital);
        info!(
            var = metrics.var,
            cvar = metrics.cvar,
            expected_return = metrics.expected_return,
            "simulation finished"
        );
        self.emit(SimulationEvent::Finished {
            num_paths: params.num_paths,
        });
        Ok(metrics)
    }

    fn emit(&self, event: SimulationEvent) {
        if let Some(tx) = &self.events {
            // Best-effort send; a dropped receiver is not an error.
            let _ = tx.try_send(event);
        }
    }
}
