use std::{net::Ipv4Addr, sync::Arc};

use chrono::{DateTime, Utc};
use getset::Getters;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    alloc::{PortAssignment, SubnetLease},
    provision::SessionGuard,
    LeaderResult,
};

use super::{MachineId, Transition, VmState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The authoritative state of one provisioned machine.
///
/// Everything but `state` is fixed at construction. The record owns the session and its guard,
/// and hands the guard out at most once.
#[derive(Debug, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct VmRecord<S> {
    /// The machine's identifier.
    id: MachineId,

    /// The current lifecycle state.
    #[builder(default = VmState::Active)]
    #[getset(skip)]
    state: VmState,

    /// The display name.
    #[builder(setter(into))]
    name: String,

    /// The guest address with its prefix.
    address: Ipv4Network,

    /// When provisioning finished.
    #[builder(default = Utc::now())]
    created_at: DateTime<Utc>,

    /// Externally reachable ports.
    ports: PortAssignment,

    /// The subnet the guest lives in.
    subnet: SubnetLease,

    /// Stops the hypervisor and releases the session.
    #[builder(default, setter(strip_option))]
    #[getset(skip)]
    cancel: Option<SessionGuard>,

    /// The hypervisor session.
    session: Arc<S>,
}

/// A point-in-time copy of a machine's public details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    /// The machine's identifier.
    pub id: MachineId,

    /// The display name.
    pub name: String,

    /// The guest's IPv4 address.
    pub local_ip: Ipv4Addr,

    /// The guest's subnet.
    pub subnet: Ipv4Network,

    /// Public port tunnelled to the guest's SSH port.
    pub remote_port: u16,

    /// Host port forwarded to the guest's game port.
    pub local_port: u16,

    /// Public port tunnelled to the guest's game port.
    pub game_remote_port: u16,

    /// The lifecycle state at the time of the snapshot.
    pub state: VmState,

    /// When provisioning finished.
    pub created_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<S> VmRecord<S> {
    /// The current lifecycle state.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Checks that `transition` is allowed from the current state and returns the next state
    /// without applying it.
    pub fn check(&self, transition: Transition) -> LeaderResult<VmState> {
        self.state.apply(self.id, transition)
    }

    /// Applies `transition`.
    pub fn transition(&mut self, transition: Transition) -> LeaderResult<VmState> {
        self.state = self.check(transition)?;
        Ok(self.state)
    }

    /// Takes the session guard. Returns `None` on every call after the first.
    pub fn take_cancel(&mut self) -> Option<SessionGuard> {
        self.cancel.take()
    }

    /// Returns a serializable snapshot.
    pub fn info(&self) -> MachineInfo {
        MachineInfo {
            id: self.id,
            name: self.name.clone(),
            local_ip: self.address.ip(),
            subnet: *self.subnet.get_subnet(),
            remote_port: self.ports.remote,
            local_port: self.ports.local_forward,
            game_remote_port: self.ports.game_remote,
            state: self.state,
            created_at: self.created_at,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{alloc::SubnetAllocator, LeaderError};

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_record_lifecycle_and_snapshot() -> anyhow::Result<()> {
        let conf_dir = tempfile::tempdir()?;
        let mut subnets = SubnetAllocator::new(Ipv4Addr::new(172, 16, 0, 0), 4, conf_dir.path());

        let id = MachineId::new();
        let subnet = subnets.allocate(&id).await?;
        let address = Ipv4Network::new(Ipv4Addr::new(172, 16, 0, 6), 30)?;
        let ports = PortAssignment {
            remote: 8000,
            local_forward: 20000,
            game_remote: 9001,
        };

        let mut record = VmRecord::builder()
            .id(id)
            .name("brave-otter")
            .address(address)
            .ports(ports)
            .subnet(subnet)
            .session(Arc::new(()))
            .build();

        assert_eq!(record.state(), VmState::Active);
        assert!(record.take_cancel().is_none());

        assert_eq!(record.transition(Transition::Pause)?, VmState::Paused);
        assert!(matches!(
            record.transition(Transition::Pause),
            Err(LeaderError::InvalidStateTransition {
                from: VmState::Paused,
                ..
            })
        ));
        assert_eq!(record.state(), VmState::Paused);

        let info = record.info();
        assert_eq!(info.id, id);
        assert_eq!(info.name, "brave-otter");
        assert_eq!(info.local_ip, Ipv4Addr::new(172, 16, 0, 6));
        assert_eq!(info.subnet.to_string(), "172.16.0.4/30");
        assert_eq!(info.remote_port, 8000);
        assert_eq!(info.local_port, 20000);
        assert_eq!(info.game_remote_port, 9001);
        assert_eq!(info.state, VmState::Paused);

        record.transition(Transition::Shutdown)?;
        assert!(record.check(Transition::Resume).is_err());

        Ok(())
    }
}
