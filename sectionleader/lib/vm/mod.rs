//! Machine identity, lifecycle state and the per-machine record.

mod id;
mod record;
mod state;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use id::*;
pub use record::*;
pub use state::*;
