use std::{net::Ipv4Addr, path::PathBuf, sync::Arc};

use fcdriver::{HypervisorDriver, HypervisorSession, LaunchSpec};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    alloc::{PortAssignment, SubnetLease},
    config::LeaderConfig,
    vm::{MachineId, VmRecord},
    LeaderError, LeaderResult,
};

use super::{discard_filesystem, stage_filesystem, Resources, SessionGuard};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Turns a fresh machine id into a running, reachable machine.
///
/// Steps run in order and stop at the first failure: stage the filesystem, allocate a
/// subnet, launch the hypervisor, wait for it to start, then name the machine, assign ports,
/// install forwarding rules and write the tunnel config. A failed attempt gives back
/// everything it took.
#[derive(Debug)]
pub struct Pipeline<D: HypervisorDriver> {
    driver: Arc<D>,
    config: Arc<LeaderConfig>,
    resources: Arc<Resources>,
}

/// What an attempt has acquired so far.
#[derive(Debug, Default)]
struct Acquired {
    dir: Option<PathBuf>,
    subnet: Option<SubnetLease>,
    guard: Option<SessionGuard>,
    named: bool,
    ports: Option<PortAssignment>,
    forwarding: Option<(Ipv4Addr, u16)>,
    tunnel: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> Pipeline<D> {
    /// Creates a pipeline over shared resources.
    pub fn new(driver: Arc<D>, config: Arc<LeaderConfig>, resources: Arc<Resources>) -> Self {
        Self {
            driver,
            config,
            resources,
        }
    }

    /// Provisions machine `id`. Stops with `ProvisioningCancelled` once `cancel` fires.
    pub async fn run(
        &self,
        id: MachineId,
        cancel: &CancellationToken,
    ) -> LeaderResult<VmRecord<D::Session>> {
        let mut acquired = Acquired::default();
        match self.steps(id, cancel, &mut acquired).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::error!(%id, error = %e, "provisioning failed, rolling back");
                self.unwind(id, acquired).await;
                Err(e)
            }
        }
    }

    /// Gives back everything a provisioned record holds. Used when a finished attempt is not
    /// wanted anymore.
    pub async fn discard(&self, mut record: VmRecord<D::Session>) {
        let id = *record.get_id();
        let ports = *record.get_ports();
        let acquired = Acquired {
            dir: Some(self.config.vm_dir(&id)),
            subnet: Some(record.get_subnet().clone()),
            guard: record.take_cancel(),
            named: true,
            ports: Some(ports),
            forwarding: Some((record.get_address().ip(), ports.local_forward)),
            tunnel: true,
        };

        self.unwind(id, acquired).await;
    }

    async fn steps(
        &self,
        id: MachineId,
        cancel: &CancellationToken,
        acquired: &mut Acquired,
    ) -> LeaderResult<VmRecord<D::Session>> {
        checkpoint(cancel)?;
        acquired.dir = Some(self.config.vm_dir(&id));
        let staged = stage_filesystem(&self.config, &id).await?;

        checkpoint(cancel)?;
        let subnet = self
            .resources
            .subnets
            .lock()
            .await
            .allocate(&id)
            .await
            .map_err(|e| LeaderError::NetworkAllocationFailed(Box::new(e)))?;
        acquired.subnet = Some(subnet.clone());

        checkpoint(cancel)?;
        let spec = LaunchSpec::builder()
            .vm_id(id.to_string())
            .kernel_image(staged.get_kernel_image())
            .root_drive(staged.get_root_drive())
            .socket_path(self.config.socket_path(&id))
            .stdout_path(staged.get_stdout_log())
            .stderr_path(staged.get_stderr_log())
            .network_name(subnet.get_network_name())
            .cni_conf_dir(self.config.get_cni_conf_dir())
            .cni_bin_dir(self.config.get_cni_bin_dir())
            .vcpu_count(*self.config.get_vcpu_count())
            .mem_size_mib(*self.config.get_mem_size_mib())
            .binary(self.config.get_firecracker_bin().clone())
            .build();

        let session = self
            .driver
            .launch(spec)
            .await
            .map(Arc::new)
            .map_err(|e| LeaderError::HypervisorLaunchFailed(e.to_string()))?;
        acquired.guard = Some(SessionGuard::spawn(
            self.driver.clone(),
            session.clone(),
            id.to_string(),
        ));

        self.await_ready(&session, cancel).await?;
        let address = session.address();
        tracing::info!(%id, %address, "hypervisor started");

        let name = self.resources.names.write().await.generate_new_name(id)?;
        acquired.named = true;

        let ports = self.resources.ports.lock().await.allocate()?;
        acquired.ports = Some(ports);

        acquired.forwarding = Some((address.ip(), ports.local_forward));
        self.resources
            .firewall
            .setup_port_forwarding(address.ip(), ports.local_forward)
            .await?;

        acquired.tunnel = true;
        self.resources
            .tunnel
            .write(&id, &name, address.ip(), ports.remote, ports.game_remote)
            .await?;

        checkpoint(cancel)?;

        let guard = acquired.guard.take().ok_or_else(|| {
            LeaderError::custom(anyhow::anyhow!("session guard missing for {id}"))
        })?;

        let record = VmRecord::builder()
            .id(id)
            .name(name)
            .address(address)
            .ports(ports)
            .subnet(subnet)
            .cancel(guard)
            .session(session)
            .build();

        tracing::info!(
            %id,
            name = %record.get_name(),
            remote_port = ports.remote,
            local_port = ports.local_forward,
            game_remote_port = ports.game_remote,
            "machine provisioned"
        );

        Ok(record)
    }

    async fn await_ready(
        &self,
        session: &Arc<D::Session>,
        cancel: &CancellationToken,
    ) -> LeaderResult<()> {
        let deadline = self.config.get_timeouts().readiness;
        let (started_tx, started_rx) = oneshot::channel();

        let driver = self.driver.clone();
        let starting = session.clone();
        tokio::spawn(async move {
            let started = driver.await_ready(&starting, deadline).await;
            let _ = started_tx.send(started);
        });

        tokio::select! {
            started = started_rx => match started {
                Ok(true) => Ok(()),
                Ok(false) => Err(LeaderError::HypervisorLaunchFailed(
                    "hypervisor reported that the machine failed to start".to_string(),
                )),
                Err(_) => Err(LeaderError::HypervisorLaunchFailed(
                    "hypervisor gave no start signal".to_string(),
                )),
            },
            _ = tokio::time::sleep(deadline) => Err(LeaderError::ReadinessTimeout(deadline)),
            _ = cancel.cancelled() => Err(LeaderError::ProvisioningCancelled),
        }
    }

    async fn unwind(&self, id: MachineId, acquired: Acquired) {
        let resources = &self.resources;

        if acquired.tunnel {
            if let Err(e) = resources.tunnel.remove(&id).await {
                tracing::warn!(%id, error = %e, "failed to remove tunnel config");
            }
        }

        if let Some((ip, local_port)) = acquired.forwarding {
            let _ = resources.firewall.cleanup_port_forwarding(ip, local_port).await;
        }

        if let Some(ports) = acquired.ports {
            resources.ports.lock().await.release(&ports);
        }

        if acquired.named {
            resources.names.write().await.release(&id);
        }

        if let Some(guard) = acquired.guard {
            if let Err(e) = guard.stop().await {
                tracing::warn!(%id, error = %e, "failed to stop hypervisor during rollback");
            }
        }

        if let Some(subnet) = acquired.subnet {
            resources.subnets.lock().await.release(&subnet).await;
        }

        if let Some(dir) = acquired.dir {
            discard_filesystem(&dir).await;
        }

        tracing::debug!(%id, "rollback finished");
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn checkpoint(cancel: &CancellationToken) -> LeaderResult<()> {
    if cancel.is_cancelled() {
        return Err(LeaderError::ProvisioningCancelled);
    }

    Ok(())
}
