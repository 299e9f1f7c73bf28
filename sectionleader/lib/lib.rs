//! `sectionleader` provisions, tracks and tears down short-lived Firecracker microVMs.
//!
//! # Overview
//!
//! A single process owns a fleet of microVMs. For each machine it:
//! - stages a private root filesystem and kernel copy
//! - assigns an isolated /30 subnet and writes the CNI network list for it
//! - launches Firecracker through the [`fcdriver`] crate and waits for the guest to start
//! - gives the machine a display name, forwarding ports and a tunnel client config
//!
//! Machines are `Active`, `Paused` or `Stopped`. `Stopped` is final.
//!
//! # Architecture
//!
//! - **Manager**: the registry of live machines and every lifecycle call on them
//! - **Provision**: the per-machine pipeline and its rollback
//! - **Alloc**: display names, subnets and port pools
//! - **Firewall**: the NAT rules that forward host ports into a guest
//! - **Server**: a thin HTTP surface over the manager
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use fcdriver::FirecrackerDriver;
//! use sectionleader::{config::LeaderConfig, firewall::IptablesRunner, manager::VmManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = VmManager::new(
//!         LeaderConfig::default(),
//!         FirecrackerDriver::new(),
//!         Arc::new(IptablesRunner::new()),
//!     )?;
//!
//!     let machine = manager.create_vm().wait(Duration::from_secs(20)).await?;
//!     println!("{} is up at {}", machine.name, machine.local_ip);
//!
//!     manager.shutdown_all().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`alloc`] - Name, subnet and port allocators
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration types and validation
//! - [`firewall`] - Port forwarding rules
//! - [`manager`] - Machine registry and lifecycle
//! - [`provision`] - Provisioning pipeline
//! - [`server`] - REST API server implementation
//! - [`tunnel`] - Tunnel client config files
//! - [`vm`] - Machine ids, states and records

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod alloc;
pub mod cli;
pub mod config;
pub mod firewall;
pub mod manager;
pub mod provision;
pub mod server;
pub mod tunnel;
pub mod vm;

pub use error::*;
pub use log::*;
