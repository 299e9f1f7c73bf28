use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{LeaderError, LeaderResult};

use super::MachineId;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle state of a machine.
///
/// `Active` and `Paused` move back and forth. Either can move to `Stopped`, which is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    /// Running.
    Active,

    /// vCPUs suspended.
    Paused,

    /// Shut down, or shutting down.
    Stopped,
}

/// A lifecycle call that changes a machine's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Active` to `Paused`.
    Pause,

    /// `Paused` to `Active`.
    Resume,

    /// Anything but `Stopped` to `Stopped`.
    Shutdown,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VmState {
    /// Returns the state `transition` leads to, or `InvalidStateTransition` when it is not
    /// allowed from `self`.
    pub fn apply(self, id: MachineId, transition: Transition) -> LeaderResult<VmState> {
        let next = match (self, transition) {
            (VmState::Active, Transition::Pause) => VmState::Paused,
            (VmState::Paused, Transition::Resume) => VmState::Active,
            (VmState::Active | VmState::Paused, Transition::Shutdown) => VmState::Stopped,
            _ => {
                return Err(LeaderError::InvalidStateTransition {
                    id,
                    from: self,
                    operation: transition.as_str(),
                })
            }
        };

        Ok(next)
    }
}

impl Transition {
    /// The operation name used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Shutdown => "shutdown",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Active => "active",
            VmState::Paused => "paused",
            VmState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
