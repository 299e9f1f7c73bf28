//! Configuration types and defaults.

mod defaults;
mod leader;
mod port_range;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use leader::*;
pub use port_range::*;
