use std::time::Duration;

use fcdriver::HypervisorDriver;

use crate::{
    vm::{MachineId, Transition, VmState},
    LeaderError, LeaderResult,
};

use super::{Lookup, VmManager};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> VmManager<D> {
    /// Pauses an `Active` machine.
    pub async fn pause_vm(&self, id: &MachineId) -> LeaderResult<()> {
        self.drive(id, Transition::Pause).await
    }

    /// Resumes a `Paused` machine.
    pub async fn resume_vm(&self, id: &MachineId) -> LeaderResult<()> {
        self.drive(id, Transition::Resume).await
    }

    /// Runs a pause or resume under the record lock. The state only changes once the driver
    /// call succeeded.
    async fn drive(&self, id: &MachineId, transition: Transition) -> LeaderResult<()> {
        let record = match self.lookup(id).await? {
            Lookup::Live(record) => record,
            Lookup::Retired => {
                return Err(LeaderError::InvalidStateTransition {
                    id: *id,
                    from: VmState::Stopped,
                    operation: transition.as_str(),
                })
            }
        };

        let mut record = record.lock().await;
        record.check(transition)?;

        let deadline = self.inner.config.get_timeouts().lifecycle;
        let session = record.get_session().clone();
        let driver = &self.inner.driver;
        let call = async {
            match transition {
                Transition::Pause => driver.pause(&session, deadline).await,
                Transition::Resume => driver.resume(&session, deadline).await,
                Transition::Shutdown => Ok(()),
            }
        };

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(())) => {
                let state = record.transition(transition)?;
                tracing::info!(%id, %state, "{} succeeded", transition.as_str());
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(%id, error = %e, "{} failed", transition.as_str());
                Err(e.into())
            }
            Err(_) => {
                tracing::error!(%id, ?deadline, "{} timed out", transition.as_str());
                Err(timeout_error(transition, deadline))
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn timeout_error(transition: Transition, timeout: Duration) -> LeaderError {
    LeaderError::Timeout {
        operation: transition.as_str(),
        timeout,
    }
}
