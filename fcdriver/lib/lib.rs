//! `fcdriver` is the hypervisor side of sectionleader.
//!
//! It exposes the narrow [`HypervisorDriver`] capability the VM manager depends on, and one
//! implementation of it, [`FirecrackerDriver`], which runs each microVM as a Firecracker process
//! inside its own network namespace and drives it through the Firecracker HTTP API.
//!
//! # Modules
//!
//! - [`driver`] - The driver trait and the launch specification
//! - [`firecracker`] - The Firecracker implementation (API client, CNI plumbing, sessions)
//! - [`runtime`] - Supervision of the hypervisor child process
//! - [`path`] - Binary resolution and well-known file names

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod driver;
pub mod error;
pub mod firecracker;
pub mod path;
pub mod runtime;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use driver::*;
pub use error::*;
pub use firecracker::{FirecrackerDriver, FirecrackerSession};
pub use path::*;
pub use runtime::*;
