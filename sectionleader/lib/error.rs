use std::{
    error::Error,
    fmt::{self, Display},
    time::Duration,
};

use fcdriver::DriverError;
use thiserror::Error;

use crate::vm::{MachineId, VmState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a sectionleader operation.
pub type LeaderResult<T> = Result<T, LeaderError>;

/// An error that occurred while provisioning, controlling or tearing down a VM.
#[derive(pretty_error_debug::Debug, Error)]
pub enum LeaderError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred when encoding or decoding JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred when parsing a TOML configuration file.
    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// An error that occurred when serializing TOML.
    #[error("toml encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A background task panicked or was aborted.
    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A resource pool has no free entries left.
    #[error("{pool} pool exhausted")]
    AllocationExhausted {
        /// The pool that ran out.
        pool: &'static str,
    },

    /// No unused display name could be generated.
    #[error("could not generate an unused name after {attempts} attempts")]
    NameGenerationExhausted {
        /// How many candidates were tried.
        attempts: usize,
    },

    /// A lifecycle call was made from a state that does not allow it.
    #[error("cannot {operation} machine {id} while it is {from}")]
    InvalidStateTransition {
        /// The machine the call targeted.
        id: MachineId,

        /// The state the machine was in.
        from: VmState,

        /// The rejected operation.
        operation: &'static str,
    },

    /// The hypervisor driver reported a failure.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// An operation did not complete within its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,

        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// An unknown machine id or name.
    #[error("not found: {0}")]
    NotFound(String),

    /// The root filesystem could not be staged.
    #[error("filesystem staging failed: {0}")]
    FilesystemStageFailed(String),

    /// No subnet could be assigned, or its network configuration could not be written.
    #[error("network allocation failed: {0}")]
    NetworkAllocationFailed(#[source] Box<LeaderError>),

    /// The hypervisor could not be launched or reported that it failed to start.
    #[error("hypervisor launch failed: {0}")]
    HypervisorLaunchFailed(String),

    /// The hypervisor gave no start signal before the readiness deadline.
    #[error("hypervisor did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    /// The caller stopped waiting for a provisioning attempt.
    #[error("provisioning timed out after {0:?}")]
    ProvisioningTimedOut(Duration),

    /// A provisioning attempt was cancelled before it finished.
    #[error("provisioning was cancelled")]
    ProvisioningCancelled,

    /// A port forwarding rule could not be installed.
    #[error("firewall setup failed: {0}")]
    FirewallSetupFailed(String),

    /// Some machines could neither be shut down gracefully nor force-stopped.
    #[error("{failed} machine(s) failed to stop")]
    ShutdownFailed {
        /// How many machines reported failure.
        failed: usize,
    },

    /// The configuration is not usable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A port range string could not be parsed or is empty.
    #[error("invalid port range: {0}")]
    InvalidPortRange(String),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LeaderError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> LeaderError {
        LeaderError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns `true` when the error means "no answer in time" rather than an ordinary failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            LeaderError::Timeout { .. }
            | LeaderError::ReadinessTimeout(_)
            | LeaderError::ProvisioningTimedOut(_) => true,
            LeaderError::Driver(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` when a resource pool ran out, directly or underneath a pipeline failure.
    pub fn is_exhausted(&self) -> bool {
        match self {
            LeaderError::AllocationExhausted { .. } | LeaderError::NameGenerationExhausted { .. } => {
                true
            }
            LeaderError::NetworkAllocationFailed(inner) => inner.is_exhausted(),
            _ => false,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(LeaderError::ProvisioningTimedOut(Duration::from_secs(20)).is_timeout());
        assert!(LeaderError::ReadinessTimeout(Duration::from_secs(5)).is_timeout());
        assert!(LeaderError::Driver(DriverError::Timeout {
            operation: "pause",
            timeout: Duration::from_secs(5),
        })
        .is_timeout());

        assert!(!LeaderError::NotFound("x".into()).is_timeout());
        assert!(!LeaderError::Driver(DriverError::ProcessExited).is_timeout());
    }

    #[test]
    fn test_exhaustion_seen_through_network_failure() {
        let err = LeaderError::NetworkAllocationFailed(Box::new(
            LeaderError::AllocationExhausted { pool: "subnet" },
        ));
        assert!(err.is_exhausted());
        assert!(!err.is_timeout());

        let err = LeaderError::NetworkAllocationFailed(Box::new(LeaderError::Io(
            std::io::Error::other("disk full"),
        )));
        assert!(!err.is_exhausted());
    }
}
