//! The VM manager: the registry of provisioned machines and every lifecycle call on them.

mod create;
mod lifecycle;
mod manager;
mod shutdown;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use create::*;
pub use manager::*;
pub use shutdown::*;
