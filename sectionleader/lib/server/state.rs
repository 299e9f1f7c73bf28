use fcdriver::HypervisorDriver;

use crate::manager::VmManager;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Shared state handed to every request handler.
pub struct ServerState<D: HypervisorDriver> {
    manager: VmManager<D>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> ServerState<D> {
    /// Creates server state around a manager.
    pub fn new(manager: VmManager<D>) -> Self {
        Self { manager }
    }

    /// The manager requests are forwarded to.
    pub fn manager(&self) -> &VmManager<D> {
        &self.manager
    }
}

//-------------------------------------------------------------------------------------------------
// Trait Implementations
//-------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> Clone for ServerState<D> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}
