use std::{
    path::Path,
    process::Stdio,
    sync::atomic::AtomicBool,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, process::Command};

use crate::{
    resolve_binary, DriverError, DriverResult, HypervisorDriver, LaunchSpec, ProcessSupervisor,
    CNITOOL_BINARY_NAME, FIRECRACKER_BINARY_NAME, IP_BINARY_NAME,
};

use super::{
    api::{
        ApiClient, BootSource, Drive, InstanceAction, MachineConfig, NetworkInterface,
        VmStateChange,
    },
    network::{kernel_ip_arg, CniNetwork, TAP_DEVICE_NAME},
    session::FirecrackerSession,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const BASE_BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off";

const SOCKET_WAIT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Launches Firecracker inside a fresh network namespace and drives it over its API socket.
#[derive(Debug, Clone, Default)]
pub struct FirecrackerDriver;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FirecrackerDriver {
    /// Creates a driver.
    pub fn new() -> Self {
        Self
    }

    async fn configure(&self, spec: &LaunchSpec, session: &FirecrackerSession) -> DriverResult<()> {
        let api = &session.api;
        api.put(
            "/machine-config",
            &MachineConfig {
                vcpu_count: *spec.get_vcpu_count(),
                mem_size_mib: *spec.get_mem_size_mib(),
            },
        )
        .await?;

        api.put(
            "/boot-source",
            &BootSource {
                kernel_image_path: spec.get_kernel_image().display().to_string(),
                boot_args: format!("{BASE_BOOT_ARGS} {}", kernel_ip_arg(&session.guest)),
            },
        )
        .await?;

        api.put(
            "/drives/rootfs",
            &Drive {
                drive_id: "rootfs".to_string(),
                path_on_host: spec.get_root_drive().display().to_string(),
                is_root_device: true,
                is_read_only: false,
            },
        )
        .await?;

        api.put(
            "/network-interfaces/eth0",
            &NetworkInterface {
                iface_id: "eth0".to_string(),
                host_dev_name: TAP_DEVICE_NAME.to_string(),
            },
        )
        .await
    }

    async fn boot(&self, session: &FirecrackerSession) -> DriverResult<()> {
        session.api.put("/actions", &InstanceAction::start()).await?;

        loop {
            if session.process.has_exited() {
                return Err(DriverError::ProcessExited);
            }

            match session.api.instance_info().await {
                Ok(info) if info.is_running() => return Ok(()),
                Ok(info) => tracing::trace!(vm_id = %session.vm_id, state = %info.state, "waiting for boot"),
                Err(e) => tracing::trace!(vm_id = %session.vm_id, error = %e, "instance info unavailable"),
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl HypervisorDriver for FirecrackerDriver {
    type Session = FirecrackerSession;

    async fn launch(&self, spec: LaunchSpec) -> DriverResult<FirecrackerSession> {
        let firecracker = resolve_binary(spec.get_binary().as_deref(), FIRECRACKER_BINARY_NAME)?;
        let ip = resolve_binary(None, IP_BINARY_NAME)?;
        let cnitool = resolve_binary(None, CNITOOL_BINARY_NAME)?;

        let vm_id = spec.get_vm_id().clone();
        let network = CniNetwork::new(
            &vm_id,
            spec.get_network_name(),
            &ip,
            cnitool,
            spec.get_cni_conf_dir(),
            spec.get_cni_bin_dir(),
        );

        let guest = network.setup().await?;

        let child = match spawn_firecracker(&spec, &network, &firecracker).await {
            Ok(child) => child,
            Err(e) => {
                network.teardown().await;
                return Err(e);
            }
        };

        tracing::info!(
            vm_id = %vm_id,
            pid = ?child.id(),
            namespace = %network.namespace(),
            address = %guest.address,
            "spawned firecracker"
        );

        let session = FirecrackerSession {
            api: ApiClient::new(spec.get_socket_path()),
            process: ProcessSupervisor::spawn(child, format!("firecracker-{vm_id}")),
            vm_id,
            network,
            guest,
            torn_down: AtomicBool::new(false),
        };

        let configured = async {
            wait_for_socket(spec.get_socket_path(), &session).await?;
            self.configure(&spec, &session).await
        };

        if let Err(e) = configured.await {
            session.teardown().await;
            return Err(e);
        }

        Ok(session)
    }

    async fn await_ready(&self, session: &FirecrackerSession, deadline: Duration) -> bool {
        match tokio::time::timeout(deadline, self.boot(session)).await {
            Ok(Ok(())) => {
                tracing::info!(vm_id = %session.vm_id, "guest is running");
                true
            }
            Ok(Err(e)) => {
                tracing::error!(vm_id = %session.vm_id, error = %e, "guest failed to boot");
                false
            }
            Err(_) => {
                tracing::error!(vm_id = %session.vm_id, ?deadline, "guest did not boot in time");
                false
            }
        }
    }

    async fn pause(&self, session: &FirecrackerSession, deadline: Duration) -> DriverResult<()> {
        with_deadline(
            "pause",
            deadline,
            session.api.patch("/vm", &VmStateChange::paused()),
        )
        .await
    }

    async fn resume(&self, session: &FirecrackerSession, deadline: Duration) -> DriverResult<()> {
        with_deadline(
            "resume",
            deadline,
            session.api.patch("/vm", &VmStateChange::resumed()),
        )
        .await
    }

    async fn shutdown(&self, session: &FirecrackerSession, deadline: Duration) -> DriverResult<()> {
        let graceful = async {
            session
                .api
                .put("/actions", &InstanceAction::ctrl_alt_del())
                .await?;
            let code = session.process.wait().await;
            tracing::info!(vm_id = %session.vm_id, code, "firecracker exited after shutdown");
            Ok(())
        };

        with_deadline("shutdown", deadline, graceful).await?;
        session.teardown().await;
        Ok(())
    }

    async fn force_stop(&self, session: &FirecrackerSession) -> DriverResult<()> {
        session.teardown().await;
        Ok(())
    }

    async fn wait(&self, session: &FirecrackerSession) -> DriverResult<()> {
        match session.process.wait().await {
            0 => Ok(()),
            code => Err(DriverError::ProcessFailed(code)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn spawn_firecracker(
    spec: &LaunchSpec,
    network: &CniNetwork,
    firecracker: &Path,
) -> DriverResult<tokio::process::Child> {
    let socket_path = spec.get_socket_path();
    if let Err(e) = tokio::fs::remove_file(socket_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(e.into());
        }
    }

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(spec.get_stdout_path())
        .await?
        .into_std()
        .await;
    let stderr = OpenOptions::new()
        .create(true)
        .append(true)
        .open(spec.get_stderr_path())
        .await?
        .into_std()
        .await;

    let child = Command::new(network.ip_bin())
        .args(["netns", "exec", network.namespace()])
        .arg(firecracker)
        .arg("--api-sock")
        .arg(socket_path)
        .arg("--id")
        .arg(spec.get_vm_id())
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()?;

    Ok(child)
}

async fn wait_for_socket(socket_path: &Path, session: &FirecrackerSession) -> DriverResult<()> {
    let started = Instant::now();
    while started.elapsed() < SOCKET_WAIT {
        if session.process.has_exited() {
            return Err(DriverError::ProcessExited);
        }

        if tokio::fs::try_exists(socket_path).await.unwrap_or(false) {
            return Ok(());
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Err(DriverError::SocketUnavailable(
        socket_path.display().to_string(),
    ))
}

async fn with_deadline<F>(operation: &'static str, timeout: Duration, future: F) -> DriverResult<()>
where
    F: std::future::Future<Output = DriverResult<()>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout { operation, timeout }),
    }
}
