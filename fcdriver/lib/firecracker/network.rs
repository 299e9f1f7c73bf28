//! Per-VM network namespaces wired up through `cnitool`.

use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
    process::Stdio,
};

use ipnetwork::Ipv4Network;
use serde::Deserialize;
use tokio::process::Command;

use crate::{netns_path, DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Interface name CNI creates inside the namespace.
pub const CNI_IFNAME: &str = "veth0";

/// Tap device handed to the guest by the `tc-redirect-tap` plugin.
pub const TAP_DEVICE_NAME: &str = "tap0";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The address CNI handed to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestNetwork {
    /// Guest address with its prefix.
    pub address: Ipv4Network,

    /// Default gateway for the guest.
    pub gateway: Ipv4Addr,
}

/// A network namespace plus the CNI network attached to it.
#[derive(Debug, Clone)]
pub struct CniNetwork {
    namespace: String,
    network_name: String,
    ip_bin: PathBuf,
    cnitool_bin: PathBuf,
    cni_conf_dir: PathBuf,
    cni_bin_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CniResult {
    #[serde(default)]
    ips: Vec<CniIp>,
}

#[derive(Debug, Deserialize)]
struct CniIp {
    address: String,
    #[serde(default)]
    gateway: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CniNetwork {
    /// Describes the namespace `fc-<vm_id>` attached to CNI network `network_name`.
    pub fn new(
        vm_id: &str,
        network_name: impl Into<String>,
        ip_bin: impl Into<PathBuf>,
        cnitool_bin: impl Into<PathBuf>,
        cni_conf_dir: impl Into<PathBuf>,
        cni_bin_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            namespace: format!("fc-{vm_id}"),
            network_name: network_name.into(),
            ip_bin: ip_bin.into(),
            cnitool_bin: cnitool_bin.into(),
            cni_conf_dir: cni_conf_dir.into(),
            cni_bin_dir: cni_bin_dir.into(),
        }
    }

    /// The namespace name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The `ip` binary used for namespace management.
    pub fn ip_bin(&self) -> &Path {
        &self.ip_bin
    }

    /// Creates the namespace and attaches the CNI network, returning the guest address.
    pub async fn setup(&self) -> DriverResult<GuestNetwork> {
        run(
            Command::new(&self.ip_bin).args(["netns", "add", self.namespace.as_str()]),
            "ip netns add",
        )
        .await?;

        let output = match run(&mut self.cnitool("add"), "cnitool add").await {
            Ok(output) => output,
            Err(e) => {
                let _ = run(
                    Command::new(&self.ip_bin).args(["netns", "delete", self.namespace.as_str()]),
                    "ip netns delete",
                )
                .await;
                return Err(e);
            }
        };

        let guest = match parse_cni_result(&output) {
            Ok(guest) => guest,
            Err(e) => {
                self.teardown().await;
                return Err(e);
            }
        };
        tracing::debug!(
            namespace = %self.namespace,
            address = %guest.address,
            gateway = %guest.gateway,
            "attached cni network"
        );
        Ok(guest)
    }

    /// Detaches the CNI network and deletes the namespace. Failures are logged.
    pub async fn teardown(&self) {
        if let Err(e) = run(&mut self.cnitool("del"), "cnitool del").await {
            tracing::warn!(namespace = %self.namespace, error = %e, "failed to detach cni network");
        }

        if let Err(e) = run(
            Command::new(&self.ip_bin).args(["netns", "delete", self.namespace.as_str()]),
            "ip netns delete",
        )
        .await
        {
            tracing::warn!(namespace = %self.namespace, error = %e, "failed to delete network namespace");
        }
    }

    fn cnitool(&self, verb: &str) -> Command {
        let mut command = Command::new(&self.cnitool_bin);
        command
            .arg(verb)
            .arg(&self.network_name)
            .arg(netns_path(&self.namespace))
            .env("CNI_PATH", &self.cni_bin_dir)
            .env("NETCONFPATH", &self.cni_conf_dir)
            .env("CNI_IFNAME", CNI_IFNAME)
            .env("CNI_ARGS", format!("TC_REDIRECT_TAP_NAME={TAP_DEVICE_NAME}"));
        command
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts the first IPv4 address and its gateway from a CNI result document.
pub fn parse_cni_result(output: &[u8]) -> DriverResult<GuestNetwork> {
    let result: CniResult = serde_json::from_slice(output)?;

    for ip in result.ips {
        let Ok(address) = ip.address.parse::<Ipv4Network>() else {
            continue;
        };

        let gateway = match ip.gateway.and_then(|g| g.parse::<Ipv4Addr>().ok()) {
            Some(gateway) => gateway,
            None => address
                .iter()
                .nth(1)
                .ok_or_else(|| DriverError::Network(format!("no gateway for {address}")))?,
        };

        return Ok(GuestNetwork { address, gateway });
    }

    Err(DriverError::Network(
        "cni result carries no ipv4 address".to_string(),
    ))
}

/// Builds the kernel `ip=` argument that configures `eth0` statically.
pub fn kernel_ip_arg(guest: &GuestNetwork) -> String {
    format!(
        "ip={}::{}:{}::eth0:off",
        guest.address.ip(),
        guest.gateway,
        guest.address.mask()
    )
}

async fn run(command: &mut Command, what: &str) -> DriverResult<Vec<u8>> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(DriverError::Network(format!(
            "{what} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output.stdout)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
