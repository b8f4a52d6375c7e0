//! Progress events published while a simulation runs.

use serde::{Deserialize, Serialize};

/// Progress notification from [`crate::MonteCarloEngine`].
///
/// Batches run in parallel, so `BatchCompleted` events may arrive in any
/// order; `completed` is the running count at the time of sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimulationEvent {
    Started {
        num_paths: usize,
        total_batches: usize,
    },
    BatchCompleted {
        batch: usize,
        completed: usize,
        total_batches: usize,
    },
    Finished {
        num_paths: usize,
    },
    Cancelled {
        completed_batches: usize,
        total_batches: usize,
    },
}
