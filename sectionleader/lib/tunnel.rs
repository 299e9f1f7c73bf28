//! Reverse tunnel client configuration.
//!
//! One TOML file per machine, read by an external `frpc` process, maps the guest's SSH and
//! game ports onto the public ports assigned to it.

use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{config::PortRange, vm::MachineId, LeaderError, LeaderResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes and removes per-machine tunnel configs.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    dir: PathBuf,
    remote_ports: PortRange,
    game_ports: PortRange,
    ssh_port: u16,
    game_port: u16,
}

/// The document written for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelDocument {
    /// The forwarded ports.
    pub proxies: Vec<Proxy>,
}

/// One forwarded port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    /// Unique proxy name.
    pub name: String,

    /// Always `tcp`.
    #[serde(rename = "type")]
    pub conn_type: String,

    /// The guest's address.
    #[serde(rename = "localIP")]
    pub local_ip: Ipv4Addr,

    /// The port inside the guest.
    pub local_port: u16,

    /// The public port.
    pub remote_port: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TunnelConfig {
    /// Creates a writer for `dir`.
    pub fn new(
        dir: impl Into<PathBuf>,
        remote_ports: PortRange,
        game_ports: PortRange,
        ssh_port: u16,
        game_port: u16,
    ) -> Self {
        Self {
            dir: dir.into(),
            remote_ports,
            game_ports,
            ssh_port,
            game_port,
        }
    }

    /// The path of a machine's config.
    pub fn path_for(&self, id: &MachineId) -> PathBuf {
        self.dir.join(format!("{id}.toml"))
    }

    /// Writes `<name>-ssh` and `<name>-game` proxies for the machine.
    pub async fn write(
        &self,
        id: &MachineId,
        name: &str,
        local_ip: Ipv4Addr,
        remote_port: u16,
        game_remote_port: u16,
    ) -> LeaderResult<PathBuf> {
        if !self.remote_ports.contains(remote_port) {
            return Err(LeaderError::InvalidPortRange(format!(
                "remote port {remote_port} outside {}",
                self.remote_ports
            )));
        }

        if !self.game_ports.contains(game_remote_port) {
            return Err(LeaderError::InvalidPortRange(format!(
                "game remote port {game_remote_port} outside {}",
                self.game_ports
            )));
        }

        let document = TunnelDocument {
            proxies: vec![
                Proxy {
                    name: format!("{name}-ssh"),
                    conn_type: "tcp".to_string(),
                    local_ip,
                    local_port: self.ssh_port,
                    remote_port,
                },
                Proxy {
                    name: format!("{name}-game"),
                    conn_type: "tcp".to_string(),
                    local_ip,
                    local_port: self.game_port,
                    remote_port: game_remote_port,
                },
            ],
        };

        let path = self.path_for(id);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, toml::to_string(&document)?).await?;
        tracing::info!(%id, path = %path.display(), "wrote tunnel config");

        Ok(path)
    }

    /// Deletes a machine's config. A missing file is not an error.
    pub async fn remove(&self, id: &MachineId) -> LeaderResult<()> {
        remove_if_exists(&self.path_for(id)).await
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn remove_if_exists(path: &Path) -> LeaderResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(dir: &Path) -> TunnelConfig {
        TunnelConfig::new(
            dir,
            "8000-9000".parse().unwrap(),
            "9001-10000".parse().unwrap(),
            22,
            25565,
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_write_two_proxies() {
        let dir = tempfile::tempdir().unwrap();
        let id = MachineId::new();
        let path = tunnel(dir.path())
            .write(&id, "bold-otter", Ipv4Addr::new(172, 16, 0, 6), 8000, 9001)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join(format!("{id}.toml")));

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("[[proxies]]"));
        assert!(contents.contains(r#"localIP = "172.16.0.6""#));

        let document: TunnelDocument = toml::from_str(&contents).unwrap();
        assert_eq!(document.proxies.len(), 2);
        assert_eq!(document.proxies[0].name, "bold-otter-ssh");
        assert_eq!(document.proxies[0].local_port, 22);
        assert_eq!(document.proxies[0].remote_port, 8000);
        assert_eq!(document.proxies[1].name, "bold-otter-game");
        assert_eq!(document.proxies[1].local_port, 25565);
        assert_eq!(document.proxies[1].remote_port, 9001);
        assert!(document.proxies.iter().all(|p| p.conn_type == "tcp"));
    }

    #[test_log::test(tokio::test)]
    async fn test_rejects_ports_outside_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let id = MachineId::new();
        let ip = Ipv4Addr::new(172, 16, 0, 6);

        assert!(matches!(
            tunnel(dir.path()).write(&id, "x", ip, 7999, 9001).await,
            Err(LeaderError::InvalidPortRange(_))
        ));
        assert!(matches!(
            tunnel(dir.path()).write(&id, "x", ip, 8000, 8000).await,
            Err(LeaderError::InvalidPortRange(_))
        ));
        assert!(!tunnel(dir.path()).path_for(&id).exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let tunnel = tunnel(dir.path());
        let id = MachineId::new();

        tunnel
            .write(&id, "x", Ipv4Addr::new(10, 0, 0, 2), 8000, 9001)
            .await
            .unwrap();
        tunnel.remove(&id).await.unwrap();
        assert!(!tunnel.path_for(&id).exists());
        tunnel.remove(&id).await.unwrap();
    }
}
