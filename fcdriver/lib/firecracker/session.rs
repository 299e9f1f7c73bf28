use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use ipnetwork::Ipv4Network;

use crate::{HypervisorSession, ProcessSupervisor};

use super::{
    api::ApiClient,
    network::{CniNetwork, GuestNetwork},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One Firecracker process, its network namespace and its API socket.
#[derive(Debug)]
pub struct FirecrackerSession {
    pub(super) vm_id: String,
    pub(super) api: ApiClient,
    pub(super) network: CniNetwork,
    pub(super) guest: GuestNetwork,
    pub(super) process: ProcessSupervisor,
    pub(super) torn_down: AtomicBool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FirecrackerSession {
    /// The VM identifier given to Firecracker.
    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    /// The API socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.api.socket_path().to_path_buf()
    }

    /// The guest's gateway and address.
    pub fn guest(&self) -> GuestNetwork {
        self.guest
    }

    /// The Firecracker process ID.
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Kills the process and removes the namespace and socket. Only the first call does work.
    pub(super) async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.process.kill();
        self.process.wait().await;
        self.network.teardown().await;

        if let Err(e) = tokio::fs::remove_file(self.api.socket_path()).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(vm_id = %self.vm_id, error = %e, "failed to remove api socket");
            }
        }

        tracing::debug!(vm_id = %self.vm_id, "session torn down");
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl HypervisorSession for FirecrackerSession {
    fn address(&self) -> Ipv4Network {
        self.guest.address
    }
}
