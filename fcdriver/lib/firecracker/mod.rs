//! The Firecracker implementation of [`HypervisorDriver`](crate::HypervisorDriver).
//!
//! Each VM gets its own network namespace named `fc-<vm_id>`. The CNI network list named in the
//! launch spec is attached to that namespace with `cnitool`, and Firecracker is started inside it
//! with `ip netns exec`. The `tc-redirect-tap` plugin exposes the namespace's veth as `tap0`,
//! which becomes the guest's `eth0`.

mod api;
mod driver;
mod network;
mod session;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use api::*;
pub use driver::*;
pub use network::*;
pub use session::*;
