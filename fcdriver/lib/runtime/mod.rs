//! `fcdriver::runtime` supervises the hypervisor child process.

mod supervisor;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use supervisor::*;
