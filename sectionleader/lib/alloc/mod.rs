//! The allocators behind every machine: display names, subnets and ports.
//!
//! Each allocator is a plain owned value with no interior locking. The VM manager owns one of
//! each and decides which lock guards it.

mod identity;
mod network;
mod ports;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use identity::*;
pub use network::*;
pub use ports::*;
