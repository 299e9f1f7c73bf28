//! The hypervisor capability the VM manager is written against.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use getset::Getters;
use ipnetwork::Ipv4Network;
use typed_builder::TypedBuilder;

use crate::DriverResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A fully resolved description of one microVM launch.
///
/// Every path in here is already specific to the VM being launched; the driver does not invent
/// any file locations of its own.
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LaunchSpec {
    /// The unique identifier of the VM, used for the API socket, namespace and log naming.
    #[builder(setter(into))]
    vm_id: String,

    /// The uncompressed kernel image to boot.
    #[builder(setter(into))]
    kernel_image: PathBuf,

    /// The ext4 image attached as the root drive.
    #[builder(setter(into))]
    root_drive: PathBuf,

    /// Where the hypervisor should create its API socket.
    #[builder(setter(into))]
    socket_path: PathBuf,

    /// File receiving the hypervisor's stdout.
    #[builder(setter(into))]
    stdout_path: PathBuf,

    /// File receiving the hypervisor's stderr.
    #[builder(setter(into))]
    stderr_path: PathBuf,

    /// The name of the CNI network list describing this VM's subnet.
    #[builder(setter(into))]
    network_name: String,

    /// Directory holding CNI network lists.
    #[builder(setter(into))]
    cni_conf_dir: PathBuf,

    /// Directory holding CNI plugin binaries.
    #[builder(setter(into))]
    cni_bin_dir: PathBuf,

    /// Number of vCPUs.
    #[builder(default = 1)]
    vcpu_count: u8,

    /// Guest memory in MiB.
    #[builder(default = 512)]
    mem_size_mib: u32,

    /// Explicit hypervisor binary. Looked up on `PATH` when absent.
    #[builder(default, setter(into))]
    binary: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A running (or launching) hypervisor session.
pub trait HypervisorSession: Send + Sync + 'static {
    /// The network assigned to the guest's interface, host bits included.
    fn address(&self) -> Ipv4Network;
}

/// The operations the VM manager needs from a hypervisor.
///
/// Sessions are shared between the task that waits on the VM and the lifecycle calls made on
/// it, so every method takes the session by shared reference.
#[async_trait]
pub trait HypervisorDriver: Send + Sync + 'static {
    /// The handle to one launched VM.
    type Session: HypervisorSession;

    /// Prepares a session from a launch specification.
    ///
    /// Fails immediately if the hypervisor binary is missing, unreadable or not executable.
    async fn launch(&self, spec: LaunchSpec) -> DriverResult<Self::Session>;

    /// Boots the session and reports whether it came up before `deadline` elapsed.
    async fn await_ready(&self, session: &Self::Session, deadline: Duration) -> bool;

    /// Pauses the guest.
    async fn pause(&self, session: &Self::Session, deadline: Duration) -> DriverResult<()>;

    /// Resumes a paused guest.
    async fn resume(&self, session: &Self::Session, deadline: Duration) -> DriverResult<()>;

    /// Asks the guest to shut down and waits for the hypervisor to exit.
    async fn shutdown(&self, session: &Self::Session, deadline: Duration) -> DriverResult<()>;

    /// Kills the hypervisor and releases everything the session holds. Safe to call repeatedly.
    async fn force_stop(&self, session: &Self::Session) -> DriverResult<()>;

    /// Resolves once the hypervisor process has exited.
    async fn wait(&self, session: &Self::Session) -> DriverResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
