use std::{sync::Arc, time::Duration};

use fcdriver::HypervisorDriver;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    vm::{MachineId, MachineInfo},
    LeaderError, LeaderResult,
};

use super::VmManager;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The caller's side of an in-flight provisioning attempt.
#[derive(Debug)]
pub struct ProvisionHandle {
    id: MachineId,
    rx: oneshot::Receiver<LeaderResult<MachineInfo>>,
    token: CancellationToken,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> VmManager<D> {
    /// Starts provisioning a new machine and returns immediately.
    ///
    /// Attempts are admitted one at a time. The record is only published if the attempt
    /// finished and nobody gave up on it; otherwise everything it acquired is given back.
    pub fn create_vm(&self) -> ProvisionHandle {
        let id = MachineId::new();
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        let manager = self.clone();
        let cancel = token.clone();
        tokio::spawn(async move {
            let result = manager.provision(id, &cancel).await;
            if let Err(Ok(_)) = tx.send(result) {
                tracing::warn!(%id, "nobody is waiting for the new machine, shutting it down");
                if let Err(e) = manager.graceful_shutdown_vm(&id).await {
                    tracing::warn!(%id, error = %e, "failed to shut down abandoned machine");
                }
            }
        });

        tracing::info!(%id, "provisioning requested");
        ProvisionHandle { id, rx, token }
    }

    /// Provisions a machine and waits for it up to the configured create timeout.
    pub async fn create_vm_and_wait(&self) -> LeaderResult<MachineInfo> {
        let timeout = self.inner.config.get_timeouts().create;
        self.create_vm().wait(timeout).await
    }

    async fn provision(&self, id: MachineId, cancel: &CancellationToken) -> LeaderResult<MachineInfo> {
        let _admitted = self.inner.admission.lock().await;
        if cancel.is_cancelled() {
            return Err(LeaderError::ProvisioningCancelled);
        }

        let record = self.inner.pipeline.run(id, cancel).await?;

        let mut registry = self.inner.registry.write().await;
        if cancel.is_cancelled() {
            drop(registry);
            tracing::info!(%id, "provisioning was abandoned, discarding machine");
            self.inner.pipeline.discard(record).await;
            return Err(LeaderError::ProvisioningCancelled);
        }

        let info = record.info();
        registry.live.insert(id, Arc::new(Mutex::new(record)));

        tracing::info!(%id, name = %info.name, ip = %info.local_ip, "machine is active");
        Ok(info)
    }
}

impl ProvisionHandle {
    /// The id minted for the new machine.
    pub fn id(&self) -> MachineId {
        self.id
    }

    /// Abandons the attempt. Whatever it acquired is given back.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the attempt to finish.
    ///
    /// On timeout the attempt is cancelled and `ProvisioningTimedOut` is returned, unless it
    /// succeeded in the meantime.
    pub async fn wait(mut self, timeout: Duration) -> LeaderResult<MachineInfo> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LeaderError::custom(anyhow::anyhow!(
                "provisioning task for {} ended without a result",
                self.id
            ))),
            Err(_) => {
                self.token.cancel();
                self.rx.close();
                match self.rx.try_recv() {
                    Ok(Ok(info)) => Ok(info),
                    _ => {
                        tracing::warn!(id = %self.id, ?timeout, "provisioning timed out");
                        Err(LeaderError::ProvisioningTimedOut(timeout))
                    }
                }
            }
        }
    }
}
