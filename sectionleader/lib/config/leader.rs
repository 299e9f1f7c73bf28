use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{vm::MachineId, LeaderError, LeaderResult};

use super::{defaults::*, PortRange};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything the VM manager needs to know, fixed at process start.
///
/// ## Example
///
/// ```toml
/// home_dir = "/var/lib/sectionleader"
/// kernel_image = "/var/lib/sectionleader/_ref/vmlinux"
/// remote_ports = "8000-9000"
/// reclaim_resources = true
///
/// [rootfs]
/// kind = "image"
/// path = "/var/lib/sectionleader/_ref/rootfs.ext4"
///
/// [timeouts]
/// create = 20
/// shutdown_all = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct LeaderConfig {
    /// Root of all per-machine state.
    #[builder(default = default_home_dir(), setter(into))]
    home_dir: PathBuf,

    /// Kernel image copied into each machine's directory.
    #[builder(default = PathBuf::from(DEFAULT_KERNEL_IMAGE), setter(into))]
    kernel_image: PathBuf,

    /// Where each machine's root filesystem comes from.
    #[builder(default)]
    rootfs: RootfsSource,

    /// Explicit Firecracker binary. Looked up on `PATH` when absent.
    #[builder(default, setter(strip_option, into))]
    firecracker_bin: Option<PathBuf>,

    /// Directory the CNI network lists are written to.
    #[builder(default = PathBuf::from(DEFAULT_CNI_CONF_DIR), setter(into))]
    cni_conf_dir: PathBuf,

    /// Directory holding the CNI plugins.
    #[builder(default = PathBuf::from(DEFAULT_CNI_BIN_DIR), setter(into))]
    cni_bin_dir: PathBuf,

    /// Directory the tunnel client configs are written to. Defaults to `<home>/frpc`.
    #[builder(default, setter(strip_option, into))]
    tunnel_config_dir: Option<PathBuf>,

    /// Directory for the Firecracker API sockets.
    #[builder(default = PathBuf::from(DEFAULT_SOCKET_DIR), setter(into))]
    socket_dir: PathBuf,

    /// vCPUs per machine.
    #[builder(default = DEFAULT_VCPU_COUNT)]
    vcpu_count: u8,

    /// Guest memory in MiB.
    #[builder(default = DEFAULT_MEM_SIZE_MIB)]
    mem_size_mib: u32,

    /// Ports tunnelled to the guests' SSH port.
    #[builder(default = PortRange::from_bounds(DEFAULT_REMOTE_PORTS))]
    remote_ports: PortRange,

    /// Ports tunnelled to the guests' game port.
    #[builder(default = PortRange::from_bounds(DEFAULT_GAME_PORTS))]
    game_ports: PortRange,

    /// Host ports forwarded to the guests' game port.
    #[builder(default = PortRange::from_bounds(DEFAULT_LOCAL_FORWARD_PORTS))]
    local_forward_ports: PortRange,

    /// SSH port inside the guest.
    #[builder(default = DEFAULT_SSH_PORT)]
    ssh_port: u16,

    /// Game port inside the guest.
    #[builder(default = DEFAULT_GAME_PORT)]
    game_port: u16,

    /// First address of the subnet pool.
    #[builder(default = DEFAULT_SUBNET_BASE)]
    subnet_base: Ipv4Addr,

    /// Number of /30 subnets in the pool.
    #[builder(default = DEFAULT_SUBNET_POOL_SIZE)]
    subnet_pool_size: u16,

    /// Deadlines for the manager's operations.
    #[builder(default)]
    timeouts: Timeouts,

    /// Address reported to clients.
    #[builder(default = DEFAULT_PUBLIC_IP)]
    public_ip: Ipv4Addr,

    /// Return subnets, ports and names to their pools when a machine is destroyed.
    #[builder(default = false)]
    reclaim_resources: bool,
}

/// Where a machine's root filesystem comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RootfsSource {
    /// An ext4 image copied as-is.
    Image {
        /// The reference image.
        path: PathBuf,
    },

    /// A squashfs unpacked with `unsquashfs`, then turned into `fs.ext4` by a script that is
    /// given the machine's directory as its only argument.
    Squashfs {
        /// The reference squashfs.
        path: PathBuf,

        /// The preparation script.
        prepare_script: PathBuf,
    },
}

/// Deadlines, written in seconds (fractions allowed).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct Timeouts {
    /// How long a caller waits for provisioning.
    #[serde(with = "duration_secs")]
    #[builder(default = DEFAULT_CREATE_TIMEOUT)]
    pub create: Duration,

    /// How long the hypervisor has to report the guest started.
    #[serde(with = "duration_secs")]
    #[builder(default = DEFAULT_READINESS_TIMEOUT)]
    pub readiness: Duration,

    /// Bound on pause and resume.
    #[serde(with = "duration_secs")]
    #[builder(default = DEFAULT_LIFECYCLE_TIMEOUT)]
    pub lifecycle: Duration,

    /// Bound on one machine's graceful shutdown.
    #[serde(with = "duration_secs")]
    #[builder(default = DEFAULT_SHUTDOWN_TIMEOUT)]
    pub shutdown: Duration,

    /// Bound on the whole shutdown-all fan-in.
    #[serde(with = "duration_secs")]
    #[builder(default = DEFAULT_SHUTDOWN_ALL_TIMEOUT)]
    pub shutdown_all: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LeaderConfig {
    /// Loads a TOML file, filling unspecified fields with defaults, and validates the result.
    pub async fn load(path: impl AsRef<Path>) -> LeaderResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let config: LeaderConfig = toml::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Checks ranges, pool sizes and machine sizing.
    pub fn validate(&self) -> LeaderResult<()> {
        let ranges = [
            ("remote_ports", &self.remote_ports),
            ("game_ports", &self.game_ports),
            ("local_forward_ports", &self.local_forward_ports),
        ];

        for (i, (name_a, a)) in ranges.iter().enumerate() {
            for (name_b, b) in &ranges[i + 1..] {
                if a.overlaps(b) {
                    return Err(LeaderError::InvalidConfig(format!(
                        "{name_a} ({a}) overlaps {name_b} ({b})"
                    )));
                }
            }
        }

        if self.subnet_pool_size == 0 || self.subnet_pool_size > MAX_SUBNET_POOL_SIZE {
            return Err(LeaderError::InvalidConfig(format!(
                "subnet_pool_size must be between 1 and {MAX_SUBNET_POOL_SIZE}, got {}",
                self.subnet_pool_size
            )));
        }

        let base = u32::from(self.subnet_base);
        if base % 4 != 0 {
            return Err(LeaderError::InvalidConfig(format!(
                "subnet_base {} is not aligned to a /30",
                self.subnet_base
            )));
        }

        if base
            .checked_add(4 * u32::from(self.subnet_pool_size) + 3)
            .is_none()
        {
            return Err(LeaderError::InvalidConfig(
                "subnet pool runs past 255.255.255.255".to_string(),
            ));
        }

        if self.vcpu_count == 0 || self.mem_size_mib == 0 {
            return Err(LeaderError::InvalidConfig(
                "vcpu_count and mem_size_mib must be non-zero".to_string(),
            ));
        }

        if self.ssh_port == 0 || self.game_port == 0 {
            return Err(LeaderError::InvalidConfig(
                "ssh_port and game_port must be non-zero".to_string(),
            ));
        }

        let t = &self.timeouts;
        if [t.create, t.readiness, t.lifecycle, t.shutdown, t.shutdown_all]
            .iter()
            .any(Duration::is_zero)
        {
            return Err(LeaderError::InvalidConfig(
                "timeouts must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The working directory of one machine.
    pub fn vm_dir(&self, id: &MachineId) -> PathBuf {
        self.home_dir.join(VMS_SUBDIR).join(id.to_string())
    }

    /// The API socket path of one machine.
    pub fn socket_path(&self, id: &MachineId) -> PathBuf {
        self.socket_dir.join(format!("firecracker-{id}.socket"))
    }

    /// The directory tunnel configs are written to.
    pub fn tunnel_dir(&self) -> PathBuf {
        self.tunnel_config_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("frpc"))
    }

    /// Points the config at a different home directory.
    pub fn set_home_dir(&mut self, home_dir: impl Into<PathBuf>) {
        self.home_dir = home_dir.into();
    }

    /// Overrides the Firecracker binary.
    pub fn set_firecracker_bin(&mut self, binary: impl Into<PathBuf>) {
        self.firecracker_bin = Some(binary.into());
    }

    /// Turns resource reclamation on or off.
    pub fn set_reclaim_resources(&mut self, reclaim: bool) {
        self.reclaim_resources = reclaim;
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for LeaderConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for RootfsSource {
    fn default() -> Self {
        RootfsSource::Squashfs {
            path: PathBuf::from(DEFAULT_SQUASHFS),
            prepare_script: PathBuf::from(DEFAULT_PREPARE_SCRIPT),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Modules
//--------------------------------------------------------------------------------------------------

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LeaderConfig::default();
        config.validate().unwrap();

        assert_eq!(config.get_vcpu_count(), &1);
        assert_eq!(config.get_mem_size_mib(), &512);
        assert_eq!(config.get_remote_ports().to_string(), "8000-9000");
        assert_eq!(config.get_game_port(), &25565);
        assert_eq!(config.get_subnet_pool_size(), &254);
        assert_eq!(config.get_timeouts().create, Duration::from_secs(20));
        assert!(!config.get_reclaim_resources());
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let config = LeaderConfig::builder()
            .game_ports("8500-9500".parse().unwrap())
            .build();

        assert!(matches!(
            config.validate(),
            Err(LeaderError::InvalidConfig(msg)) if msg.contains("game_ports")
        ));
    }

    #[test]
    fn test_bad_subnet_pool_rejected() {
        for config in [
            LeaderConfig::builder().subnet_pool_size(0).build(),
            LeaderConfig::builder().subnet_pool_size(255).build(),
            LeaderConfig::builder()
                .subnet_base(Ipv4Addr::new(172, 16, 0, 2))
                .build(),
            LeaderConfig::builder()
                .subnet_base(Ipv4Addr::new(255, 255, 255, 0))
                .build(),
        ] {
            assert!(matches!(
                config.validate(),
                Err(LeaderError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: LeaderConfig = toml::from_str(
            r#"
            home_dir = "/srv/sl"
            local_forward_ports = "30000-30010"
            reclaim_resources = true

            [rootfs]
            kind = "image"
            path = "/srv/sl/rootfs.ext4"

            [timeouts]
            create = 0.5
            shutdown_all = 2
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.get_home_dir(), Path::new("/srv/sl"));
        assert_eq!(config.get_local_forward_ports().len(), 11);
        assert!(*config.get_reclaim_resources());
        assert_eq!(
            config.get_rootfs(),
            &RootfsSource::Image {
                path: PathBuf::from("/srv/sl/rootfs.ext4")
            }
        );
        assert_eq!(config.get_timeouts().create, Duration::from_millis(500));
        assert_eq!(config.get_timeouts().shutdown_all, Duration::from_secs(2));
        assert_eq!(config.get_timeouts().lifecycle, Duration::from_secs(5));
        assert_eq!(config.get_cni_conf_dir(), Path::new("/etc/cni/conf.d"));
    }

    #[test]
    fn test_derived_paths() {
        let config = LeaderConfig::builder()
            .home_dir("/srv/sl")
            .socket_dir("/run/sl")
            .build();
        let id = MachineId::new();

        assert_eq!(config.vm_dir(&id), PathBuf::from(format!("/srv/sl/vms/{id}")));
        assert_eq!(
            config.socket_path(&id),
            PathBuf::from(format!("/run/sl/firecracker-{id}.socket"))
        );
        assert_eq!(config.tunnel_dir(), PathBuf::from("/srv/sl/frpc"));
    }

    #[tokio::test]
    async fn test_load_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sectionleader.toml");
        tokio::fs::write(&path, "remote_ports = \"20000-20500\"\n")
            .await
            .unwrap();

        assert!(matches!(
            LeaderConfig::load(&path).await,
            Err(LeaderError::InvalidConfig(_))
        ));
    }
}
