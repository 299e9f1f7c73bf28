//! Provisioning of one machine, from an empty directory to a reachable guest.

mod guard;
mod pipeline;
mod resources;
mod stage;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use guard::*;
pub use pipeline::*;
pub use resources::*;
pub use stage::*;
