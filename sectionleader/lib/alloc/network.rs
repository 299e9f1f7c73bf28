use std::{
    collections::BTreeSet,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use getset::Getters;
use ipnetwork::Ipv4Network;
use serde::Serialize;

use crate::{vm::MachineId, LeaderError, LeaderResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CNI_VERSION: &str = "0.4.0";

const SUBNET_PREFIX: u8 = 30;

const SUBNET_STRIDE: u32 = 4;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Hands out /30 subnets and writes the CNI network list describing each one.
///
/// Identifier `n` (counting from 1) maps to the subnet at `base + 4n`. The lowest free
/// identifier is always handed out first.
#[derive(Debug)]
pub struct SubnetAllocator {
    base: Ipv4Addr,
    pool_size: u16,
    conf_dir: PathBuf,
    used: BTreeSet<u16>,
}

/// One allocated subnet and the network list written for it.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SubnetLease {
    /// The pool identifier, starting at 1.
    ordinal: u16,

    /// The /30 subnet.
    subnet: Ipv4Network,

    /// The CNI network name, `fcnet-<id>`.
    network_name: String,

    /// Where the network list was written.
    conf_path: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkList<'a> {
    cni_version: &'static str,
    name: &'a str,
    plugins: Vec<Plugin>,
}

#[derive(Debug, Serialize)]
struct Plugin {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipam: Option<Ipam>,
}

#[derive(Debug, Serialize)]
struct Ipam {
    #[serde(rename = "type")]
    kind: &'static str,
    subnet: String,
    routes: Vec<Route>,
}

#[derive(Debug, Serialize)]
struct Route {
    dst: &'static str,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SubnetAllocator {
    /// Creates an allocator over identifiers `1..=pool_size` writing into `conf_dir`.
    pub fn new(base: Ipv4Addr, pool_size: u16, conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            base,
            pool_size,
            conf_dir: conf_dir.into(),
            used: BTreeSet::new(),
        }
    }

    /// Claims the lowest free subnet for `id` and writes `fcnet-<id>.conflist`.
    ///
    /// The identifier is only kept if the file was written.
    pub async fn allocate(&mut self, id: &MachineId) -> LeaderResult<SubnetLease> {
        let ordinal = (1..=self.pool_size)
            .find(|n| !self.used.contains(n))
            .ok_or(LeaderError::AllocationExhausted { pool: "subnet" })?;

        let subnet = self.subnet_for(ordinal)?;
        let network_name = format!("fcnet-{id}");
        let conf_path = self.conf_dir.join(format!("{network_name}.conflist"));

        let document = serde_json::to_vec_pretty(&NetworkList::new(&network_name, subnet))?;
        tokio::fs::create_dir_all(&self.conf_dir).await?;
        tokio::fs::write(&conf_path, document).await?;

        self.used.insert(ordinal);
        tracing::info!(%id, %subnet, path = %conf_path.display(), "allocated subnet");

        Ok(SubnetLease {
            ordinal,
            subnet,
            network_name,
            conf_path,
        })
    }

    /// Returns a lease to the pool and removes its network list.
    pub async fn release(&mut self, lease: &SubnetLease) {
        self.used.remove(&lease.ordinal);
        remove_conf(&lease.conf_path).await;
        tracing::debug!(subnet = %lease.subnet, "released subnet");
    }

    /// Number of subnets in use.
    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    /// Number of subnets in the pool.
    pub fn capacity(&self) -> usize {
        usize::from(self.pool_size)
    }

    fn subnet_for(&self, ordinal: u16) -> LeaderResult<Ipv4Network> {
        let network = u32::from(self.base)
            .checked_add(SUBNET_STRIDE * u32::from(ordinal))
            .ok_or(LeaderError::AllocationExhausted { pool: "subnet" })?;

        Ipv4Network::new(Ipv4Addr::from(network), SUBNET_PREFIX).map_err(LeaderError::custom)
    }
}

impl<'a> NetworkList<'a> {
    fn new(name: &'a str, subnet: Ipv4Network) -> Self {
        Self {
            cni_version: CNI_VERSION,
            name,
            plugins: vec![
                Plugin {
                    kind: "ptp",
                    ipam: Some(Ipam {
                        kind: "host-local",
                        subnet: subnet.to_string(),
                        routes: vec![Route { dst: "0.0.0.0/0" }],
                    }),
                },
                Plugin {
                    kind: "firewall",
                    ipam: None,
                },
                Plugin {
                    kind: "tc-redirect-tap",
                    ipam: None,
                },
            ],
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn remove_conf(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove network list");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
