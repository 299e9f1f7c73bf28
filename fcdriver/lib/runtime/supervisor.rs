use tokio::{
    process::Child,
    sync::{broadcast, watch},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Owns a hypervisor child process on a background task.
///
/// The task waits for the child to exit or for a kill request, whichever comes first, and then
/// publishes the exit code. Any number of callers can wait for that exit concurrently. Dropping
/// the handle counts as a kill request.
#[derive(Debug)]
pub struct ProcessSupervisor {
    /// Name used in log lines.
    name: String,

    /// The child's process ID, if the OS reported one.
    pid: Option<u32>,

    /// The channel to send kill requests to the reaper task.
    kill_tx: broadcast::Sender<()>,

    /// Exit code of the child once it has been reaped.
    exit_rx: watch::Receiver<Option<i32>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProcessSupervisor {
    /// Hands `child` to a reaper task and returns the handle controlling it.
    pub fn spawn(mut child: Child, name: impl Into<String>) -> Self {
        let name = name.into();
        let pid = child.id();
        let (kill_tx, mut kill_rx) = broadcast::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);

        let task_name = name.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx.recv() => {
                    tracing::info!(name = %task_name, "killing hypervisor process");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(name = %task_name, error = %e, "failed to send kill");
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => {
                    tracing::info!(name = %task_name, %status, "hypervisor process exited");
                    status.code().unwrap_or(-1)
                }
                Err(e) => {
                    tracing::error!(name = %task_name, error = %e, "error waiting for hypervisor process");
                    -1
                }
            };

            let _ = exit_tx.send(Some(code));
        });

        Self {
            name,
            pid,
            kill_tx,
            exit_rx,
        }
    }

    /// Returns the child's process ID.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns `true` once the child has been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Requests the child be killed. Does nothing if it already exited.
    pub fn kill(&self) {
        if self.kill_tx.send(()).is_err() {
            tracing::debug!(name = %self.name, "kill requested after process exit");
        }
    }

    /// Waits for the child to exit and returns its exit code (`-1` when killed by a signal).
    pub async fn wait(&self) -> i32 {
        let mut exit_rx = self.exit_rx.clone();
        let code = match exit_rx.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(-1),
            // The reaper only drops its sender after publishing.
            Err(_) => -1,
        };
        code
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::process::Command;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_supervisor_reports_exit_code() {
        let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let supervisor = ProcessSupervisor::spawn(child, "exit-3");

        assert_eq!(supervisor.wait().await, 3);
        assert!(supervisor.has_exited());
    }

    #[test_log::test(tokio::test)]
    async fn test_supervisor_kill_stops_child() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let supervisor = ProcessSupervisor::spawn(child, "sleeper");
        assert!(supervisor.pid().is_some());
        assert!(!supervisor.has_exited());

        supervisor.kill();
        let code = tokio::time::timeout(Duration::from_secs(5), supervisor.wait())
            .await
            .expect("child should exit after kill");
        assert_eq!(code, -1);

        // A second kill after exit is harmless.
        supervisor.kill();
        assert_eq!(supervisor.wait().await, -1);
    }
}
