use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::vm::{MachineId, MachineInfo, VmState};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Response body for `GET /status`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Number of live machines
    pub machines: usize,
    /// Address clients reach tunnelled ports on
    pub public_ip: Ipv4Addr,
}

/// Response body for `GET /machines`
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    /// Live machines, oldest first
    pub machines: Vec<MachineInfo>,
}

/// Response body for `POST /machines`
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Id of the new machine
    pub machine_id: MachineId,
    /// Display name of the new machine
    pub machine_name: String,
    /// Guest address
    pub local_ip: Ipv4Addr,
    /// Public port tunnelled to the guest's SSH port
    pub remote_port: u16,
    /// Host port forwarded to the guest's game port
    pub local_port: u16,
    /// Public port tunnelled to the guest's game port
    pub game_remote_port: u16,
    /// Address clients reach tunnelled ports on
    pub remote_ip: Ipv4Addr,
}

/// Response body for the pause, resume and stop endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct LifecycleResponse {
    /// Id of the machine
    pub machine_id: MachineId,
    /// State after the call
    pub state: VmState,
}

/// Response body for `POST /shutdown-all`
#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownAllResponse {
    /// Machines still live after the shutdown
    pub remaining: usize,
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl CreateResponse {
    /// Builds the response for a new machine.
    pub fn new(info: MachineInfo, remote_ip: Ipv4Addr) -> Self {
        Self {
            machine_id: info.id,
            machine_name: info.name,
            local_ip: info.local_ip,
            remote_port: info.remote_port,
            local_port: info.local_port,
            game_remote_port: info.game_remote_port,
            remote_ip,
        }
    }
}
