//! # ks-pricing
//!
//! Pure pricing functions mapping instrument terms and a market snapshot to a
//! price and risk sensitivities. Nothing here mutates its inputs, so every
//! function is safe to call from many threads over the same snapshot.

pub mod bond;
pub mod future;
pub mod greeks;
pub mod lattice;
pub mod math;
pub mod option;
pub mod pricer;
pub mod solver;
pub mod swap;

pub use greeks::*;
pub use lattice::LatticeConfig;
pub use pricer::*;
