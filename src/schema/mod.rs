//! Schema module - Parameter space, run configuration and report types.

mod evolution;
mod parameter;

pub use evolution::*;
pub use parameter::*;
