use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable overriding the home directory.
pub const SECTIONLEADER_HOME_ENV_VAR: &str = "SECTIONLEADER_HOME";

/// Environment variable naming a config file to load.
pub const SECTIONLEADER_CONFIG_ENV_VAR: &str = "SECTIONLEADER_CONFIG";

/// Home directory name under the user's home.
pub const SECTIONLEADER_HOME_DIR: &str = ".sectionleader";

/// Sub-directory of the home directory holding one working directory per machine.
pub const VMS_SUBDIR: &str = "vms";

/// The default number of vCPUs per machine.
pub const DEFAULT_VCPU_COUNT: u8 = 1;

/// The default guest memory in MiB.
pub const DEFAULT_MEM_SIZE_MIB: u32 = 512;

/// Reference kernel image copied into every machine's directory.
pub const DEFAULT_KERNEL_IMAGE: &str = "_ref/vmlinux";

/// Reference squashfs unpacked into every machine's directory.
pub const DEFAULT_SQUASHFS: &str = "_ref/squashfs";

/// Script that turns an unpacked squashfs into `fs.ext4`.
pub const DEFAULT_PREPARE_SCRIPT: &str = "./prepVM.sh";

/// Directory the CNI network lists are written to.
pub const DEFAULT_CNI_CONF_DIR: &str = "/etc/cni/conf.d";

/// Directory the CNI plugin binaries live in.
pub const DEFAULT_CNI_BIN_DIR: &str = "/opt/cni/bin";

/// Directory for the Firecracker API sockets.
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// Ports tunnelled to each guest's SSH port.
pub const DEFAULT_REMOTE_PORTS: (u16, u16) = (8000, 9000);

/// Ports tunnelled to each guest's game port.
pub const DEFAULT_GAME_PORTS: (u16, u16) = (9001, 10000);

/// Host ports forwarded by firewall rules to each guest's game port.
pub const DEFAULT_LOCAL_FORWARD_PORTS: (u16, u16) = (20000, 21000);

/// SSH port inside the guest.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Game server port inside the guest.
pub const DEFAULT_GAME_PORT: u16 = 25565;

/// First address of the subnet pool. Identifier `n` maps to the /30 at `base + 4n`.
pub const DEFAULT_SUBNET_BASE: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 0);

/// Number of subnets in the pool.
pub const DEFAULT_SUBNET_POOL_SIZE: u16 = 254;

/// Upper bound on the subnet pool size.
pub const MAX_SUBNET_POOL_SIZE: u16 = 254;

/// Address reported to clients for reaching tunnelled ports.
pub const DEFAULT_PUBLIC_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Default address of the HTTP server.
pub const DEFAULT_SERVER_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 3456);

/// How long a caller waits for a provisioning attempt.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(20);

/// How long the hypervisor has to report that the guest started.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on pause and resume calls.
pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on one machine's graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on waiting for every machine to shut down.
pub const DEFAULT_SHUTDOWN_ALL_TIMEOUT: Duration = Duration::from_secs(5);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `$SECTIONLEADER_HOME`, else `~/.sectionleader`, else `./.sectionleader`.
pub fn default_home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(SECTIONLEADER_HOME_ENV_VAR) {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SECTIONLEADER_HOME_DIR)
}
