use std::net::Ipv4Addr;

use fcdriver::HypervisorDriver;
use futures::future::join_all;
use tokio::sync::oneshot;

use crate::{
    alloc::{PortAssignment, SubnetLease},
    vm::{MachineId, Transition, VmState},
    LeaderError, LeaderResult,
};

use super::{Lookup, VmManager};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Resolves once a machine's shutdown has finished.
#[derive(Debug)]
pub struct ShutdownSignal {
    id: MachineId,
    rx: oneshot::Receiver<bool>,
}

/// What a destroyed machine gives back.
struct Leftovers {
    ip: Ipv4Addr,
    ports: PortAssignment,
    subnet: SubnetLease,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> VmManager<D> {
    /// Starts shutting down machine `id` and returns a signal for its completion.
    ///
    /// The machine reads as `Stopped` from the moment this returns, so a second call fails
    /// with `InvalidStateTransition`. A guest that does not shut down in time is force-stopped.
    /// The signal carries `false` only when both paths failed.
    pub async fn graceful_shutdown_vm(&self, id: &MachineId) -> LeaderResult<ShutdownSignal> {
        let record = match self.lookup(id).await? {
            Lookup::Live(record) => record,
            Lookup::Retired => {
                return Err(LeaderError::InvalidStateTransition {
                    id: *id,
                    from: VmState::Stopped,
                    operation: Transition::Shutdown.as_str(),
                })
            }
        };

        let (guard, session, leftovers) = {
            let mut record = record.lock().await;
            record.transition(Transition::Shutdown)?;
            let leftovers = Leftovers {
                ip: record.get_address().ip(),
                ports: *record.get_ports(),
                subnet: record.get_subnet().clone(),
            };

            (record.take_cancel(), record.get_session().clone(), leftovers)
        };

        tracing::info!(%id, "shutting down machine");

        let (tx, rx) = oneshot::channel();
        let manager = self.clone();
        let id = *id;
        tokio::spawn(async move {
            let deadline = manager.inner.config.get_timeouts().shutdown;
            let graceful = match tokio::time::timeout(
                deadline,
                manager.inner.driver.shutdown(&session, deadline),
            )
            .await
            {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(%id, error = %e, "graceful shutdown failed, forcing stop");
                    false
                }
                Err(_) => {
                    tracing::warn!(%id, ?deadline, "graceful shutdown timed out, forcing stop");
                    false
                }
            };

            let forced = match guard {
                Some(guard) => match guard.stop().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(%id, error = %e, "forced stop failed");
                        false
                    }
                },
                None => false,
            };

            manager.destroy(id, leftovers).await;

            let stopped = graceful || forced;
            tracing::info!(%id, graceful, stopped, "machine shut down");
            let _ = tx.send(stopped);
        });

        Ok(ShutdownSignal { id, rx })
    }

    /// Shuts down every live machine and waits for all of them under one shared deadline.
    ///
    /// Returns `Timeout` if any machine has not finished by then and `ShutdownFailed` if any
    /// could not be stopped at all.
    pub async fn shutdown_all(&self) -> LeaderResult<()> {
        let ids: Vec<MachineId> = self
            .inner
            .registry
            .read()
            .await
            .live
            .keys()
            .copied()
            .collect();

        tracing::info!(count = ids.len(), "shutting down all machines");

        // Dispatch happens inside the deadline: a record held by an in-flight pause or resume
        // must not delay the rest.
        let shutdowns = ids.into_iter().map(|id| {
            let manager = self.clone();
            tokio::spawn(async move {
                match manager.graceful_shutdown_vm(&id).await {
                    Ok(signal) => Ok(Some(signal.wait().await)),
                    Err(e @ LeaderError::InvalidStateTransition { .. })
                    | Err(e @ LeaderError::NotFound(_)) => {
                        tracing::debug!(%id, error = %e, "machine is already shutting down");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
        });

        let deadline = self.inner.config.get_timeouts().shutdown_all;
        let results = tokio::time::timeout(deadline, join_all(shutdowns))
            .await
            .map_err(|_| LeaderError::Timeout {
                operation: "shutdown all",
                timeout: deadline,
            })?;

        let mut failed = 0;
        for result in results {
            match result {
                Ok(Ok(Some(true)) | Ok(None)) => {}
                Ok(Ok(Some(false))) => failed += 1,
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    tracing::error!(error = %e, "shutdown task panicked");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(LeaderError::ShutdownFailed { failed });
        }

        tracing::info!("all machines shut down");
        Ok(())
    }

    /// Removes a stopped machine from the registry and tears down what it holds on the host.
    async fn destroy(&self, id: MachineId, leftovers: Leftovers) {
        let resources = &self.inner.resources;

        let _ = resources
            .firewall
            .cleanup_port_forwarding(leftovers.ip, leftovers.ports.local_forward)
            .await;

        if let Err(e) = resources.tunnel.remove(&id).await {
            tracing::warn!(%id, error = %e, "failed to remove tunnel config");
        }

        {
            let mut registry = self.inner.registry.write().await;
            registry.live.remove(&id);
            registry.retired.insert(id);
        }

        if *self.inner.config.get_reclaim_resources() {
            resources.subnets.lock().await.release(&leftovers.subnet).await;
            resources.ports.lock().await.release(&leftovers.ports);
            resources.names.write().await.release(&id);
            tracing::debug!(%id, "returned subnet, ports and name to their pools");
        }
    }
}

impl ShutdownSignal {
    /// The machine being shut down.
    pub fn id(&self) -> MachineId {
        self.id
    }

    /// Waits for the shutdown to finish. Returns whether the machine was stopped.
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}
