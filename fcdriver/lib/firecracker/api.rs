//! A minimal client for the Firecracker HTTP API served on a Unix socket.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    header::{ACCEPT, CONTENT_TYPE, HOST},
    Method, Request,
};
use hyper_util::rt::TokioIo;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::UnixStream;

use crate::{DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Client for one VM's API socket. Every request opens a fresh connection.
#[derive(Debug, Clone)]
pub struct ApiClient {
    socket_path: PathBuf,
}

/// Body of `PUT /machine-config`.
#[derive(Debug, Clone, Serialize)]
pub struct MachineConfig {
    /// Number of vCPUs.
    pub vcpu_count: u8,

    /// Guest memory in MiB.
    pub mem_size_mib: u32,
}

/// Body of `PUT /boot-source`.
#[derive(Debug, Clone, Serialize)]
pub struct BootSource {
    /// Path to the kernel image on the host.
    pub kernel_image_path: String,

    /// Kernel command line.
    pub boot_args: String,
}

/// Body of `PUT /drives/{drive_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct Drive {
    /// The drive identifier.
    pub drive_id: String,

    /// Path to the backing image on the host.
    pub path_on_host: String,

    /// Whether this is the root device.
    pub is_root_device: bool,

    /// Whether the guest sees the drive read-only.
    pub is_read_only: bool,
}

/// Body of `PUT /network-interfaces/{iface_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    /// The guest interface identifier.
    pub iface_id: String,

    /// The tap device on the host side.
    pub host_dev_name: String,
}

/// Body of `PUT /actions`.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceAction {
    /// `InstanceStart`, `SendCtrlAltDel` or `FlushMetrics`.
    pub action_type: &'static str,
}

/// Body of `PATCH /vm`.
#[derive(Debug, Clone, Serialize)]
pub struct VmStateChange {
    /// `Paused` or `Resumed`.
    pub state: &'static str,
}

/// Response of `GET /`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceInfo {
    /// The instance identifier given on the command line.
    #[serde(default)]
    pub id: String,

    /// `Not started`, `Running` or `Paused`.
    pub state: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ApiClient {
    /// Creates a client for the socket at `socket_path`.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends a `PUT` with a JSON body.
    pub async fn put(&self, path: &str, body: &impl Serialize) -> DriverResult<()> {
        let body = serde_json::to_vec(body)?;
        self.request(Method::PUT, path, Some(body)).await?;
        Ok(())
    }

    /// Sends a `PATCH` with a JSON body.
    pub async fn patch(&self, path: &str, body: &impl Serialize) -> DriverResult<()> {
        let body = serde_json::to_vec(body)?;
        self.request(Method::PATCH, path, Some(body)).await?;
        Ok(())
    }

    /// Sends a `GET` and decodes the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> DriverResult<T> {
        let bytes = self.request(Method::GET, path, None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns the instance information.
    pub async fn instance_info(&self) -> DriverResult<InstanceInfo> {
        self.get("/").await
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> DriverResult<Bytes> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "firecracker api connection closed with error");
            }
        });

        let request = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, "localhost")
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        tracing::trace!(%method, path, "firecracker api request");
        let response = sender.send_request(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            return Err(DriverError::Api {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes)
    }
}

impl InstanceAction {
    /// Boots the configured guest.
    pub fn start() -> Self {
        Self {
            action_type: "InstanceStart",
        }
    }

    /// Asks the guest to reboot, which Firecracker treats as a shutdown.
    pub fn ctrl_alt_del() -> Self {
        Self {
            action_type: "SendCtrlAltDel",
        }
    }
}

impl VmStateChange {
    /// Pauses the guest vCPUs.
    pub fn paused() -> Self {
        Self { state: "Paused" }
    }

    /// Resumes the guest vCPUs.
    pub fn resumed() -> Self {
        Self { state: "Resumed" }
    }
}

impl InstanceInfo {
    /// Returns `true` when the guest is booted and not paused.
    pub fn is_running(&self) -> bool {
        self.state == "Running"
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
