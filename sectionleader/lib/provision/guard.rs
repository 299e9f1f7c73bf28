use std::sync::Arc;

use fcdriver::{DriverResult, HypervisorDriver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::LeaderResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The teardown capability of one hypervisor session.
///
/// A background task watches the session. When the guard is stopped the task force-stops the
/// session and reports the result. Stopping consumes the guard, so the session is released
/// exactly once.
#[derive(Debug)]
pub struct SessionGuard {
    token: CancellationToken,
    task: JoinHandle<DriverResult<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SessionGuard {
    /// Starts watching `session`.
    pub fn spawn<D>(driver: Arc<D>, session: Arc<D::Session>, name: String) -> Self
    where
        D: HypervisorDriver,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                result = driver.wait(&session) => {
                    match result {
                        Ok(()) => tracing::info!(vm = %name, "hypervisor exited"),
                        Err(e) => tracing::warn!(vm = %name, error = %e, "hypervisor exited with error"),
                    }
                    cancelled.cancelled().await;
                }
            }

            tracing::debug!(vm = %name, "releasing hypervisor session");
            driver.force_stop(&session).await
        });

        Self { token, task }
    }

    /// Force-stops the session and waits for the watcher to finish.
    pub async fn stop(self) -> LeaderResult<()> {
        self.token.cancel();
        self.task.await??;
        Ok(())
    }
}
