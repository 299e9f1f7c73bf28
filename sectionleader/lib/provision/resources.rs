use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::{
    alloc::{NameRegistry, PortAllocator, SubnetAllocator},
    config::LeaderConfig,
    firewall::{FirewallController, RuleRunner},
    tunnel::TunnelConfig,
    LeaderResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The allocators and host-side collaborators shared by provisioning and teardown.
///
/// Each allocator has its own lock. Subnets and ports are only touched while provisioning
/// (which already holds the admission lock) or when a destroyed machine's resources are
/// returned.
#[derive(Debug)]
pub struct Resources {
    /// Display names.
    pub names: RwLock<NameRegistry>,

    /// Subnet pool and CNI network lists.
    pub subnets: Mutex<SubnetAllocator>,

    /// Remote, local forward and game port pools.
    pub ports: Mutex<PortAllocator>,

    /// Port forwarding rules.
    pub firewall: FirewallController,

    /// Tunnel client configs.
    pub tunnel: TunnelConfig,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Resources {
    /// Builds every allocator from the config.
    pub fn from_config(
        config: &LeaderConfig,
        runner: Arc<dyn RuleRunner>,
        names: NameRegistry,
    ) -> LeaderResult<Self> {
        let ports = PortAllocator::new(
            *config.get_remote_ports(),
            *config.get_local_forward_ports(),
            *config.get_game_ports(),
        )?;

        Ok(Self {
            names: RwLock::new(names),
            subnets: Mutex::new(SubnetAllocator::new(
                *config.get_subnet_base(),
                *config.get_subnet_pool_size(),
                config.get_cni_conf_dir(),
            )),
            ports: Mutex::new(ports),
            firewall: FirewallController::new(
                runner,
                *config.get_local_forward_ports(),
                *config.get_game_port(),
            ),
            tunnel: TunnelConfig::new(
                config.tunnel_dir(),
                *config.get_remote_ports(),
                *config.get_game_ports(),
                *config.get_ssh_port(),
                *config.get_game_port(),
            ),
        })
    }
}
