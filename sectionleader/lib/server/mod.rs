//! HTTP surface for managing machines remotely.
//!
//! The API is deliberately thin: every endpoint forwards to one [`VmManager`](crate::manager::VmManager)
//! call and reports a coarse status. Timeouts answer `504`, unknown machines `404`, calls that do
//! not fit the machine's state `409`, and everything else `500`.

mod handlers;
mod routes;
mod state;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use handlers::*;
pub use routes::*;
pub use state::*;
pub use types::*;
