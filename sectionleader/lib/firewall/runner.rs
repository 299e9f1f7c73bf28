use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{LeaderError, LeaderResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Name of the iptables binary looked up on `PATH`.
pub const IPTABLES_BINARY_NAME: &str = "iptables";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Applies one rule to the host's packet filter.
#[async_trait]
pub trait RuleRunner: Send + Sync + 'static {
    /// Runs the filter tool with `args`. An error carries the tool's output.
    async fn run(&self, args: &[String]) -> LeaderResult<()>;
}

/// Runs rules through the `iptables` binary.
#[derive(Debug, Clone)]
pub struct IptablesRunner {
    binary: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IptablesRunner {
    /// Uses `iptables` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary(IPTABLES_BINARY_NAME)
    }

    /// Uses a specific binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for IptablesRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleRunner for IptablesRunner {
    async fn run(&self, args: &[String]) -> LeaderResult<()> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let mut message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if message.is_empty() {
                message = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }

            return Err(LeaderError::FirewallSetupFailed(format!(
                "{} {} exited with {}: {message}",
                self.binary.display(),
                args.join(" "),
                output.status
            )));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
