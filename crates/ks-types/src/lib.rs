pub mod daycount;
pub mod errors;
pub mod instrument;
pub mod market;
pub mod portfolio;

pub use daycount::*;
pub use errors::*;
pub use instrument::*;
pub use market::*;
pub use portfolio::*;
