//! Port forwarding from host ports into guests.
//!
//! Every machine gets four rules keyed by its own address and local port, so installs for
//! different machines never touch each other's rules and need no in-process lock.

mod rules;
mod runner;

use std::{net::Ipv4Addr, sync::Arc};

use crate::{config::PortRange, LeaderError, LeaderResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use rules::*;
pub use runner::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Installs and removes the forwarding rules for one machine at a time.
#[derive(Clone)]
pub struct FirewallController {
    runner: Arc<dyn RuleRunner>,
    local_ports: PortRange,
    guest_port: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FirewallController {
    /// Creates a controller forwarding ports in `local_ports` to `guest_port`.
    pub fn new(runner: Arc<dyn RuleRunner>, local_ports: PortRange, guest_port: u16) -> Self {
        Self {
            runner,
            local_ports,
            guest_port,
        }
    }

    /// Routes `localhost:local_port` and external traffic on `local_port` to the guest.
    ///
    /// Rules are installed in order. The first failure is returned and the rules already in
    /// place are left there; [`cleanup_port_forwarding`](Self::cleanup_port_forwarding) removes
    /// them.
    pub async fn setup_port_forwarding(&self, vm_ip: Ipv4Addr, local_port: u16) -> LeaderResult<()> {
        if !self.local_ports.contains(local_port) {
            return Err(LeaderError::FirewallSetupFailed(format!(
                "local port {local_port} outside allowed range {}",
                self.local_ports
            )));
        }

        for rule in forwarding_rules(vm_ip, local_port, self.guest_port) {
            let args = rule.args(RuleAction::Append);
            if let Err(e) = self.runner.run(&args).await {
                tracing::error!(chain = rule.chain(), error = %e, "failed to add forwarding rule");
                return Err(match e {
                    LeaderError::FirewallSetupFailed(_) => e,
                    other => LeaderError::FirewallSetupFailed(other.to_string()),
                });
            }
            tracing::debug!(chain = rule.chain(), "added forwarding rule");
        }

        tracing::info!(
            %vm_ip,
            local_port,
            guest_port = self.guest_port,
            "port forwarding set up"
        );
        Ok(())
    }

    /// Removes the four rules. Failures are logged and never returned, since a rule may
    /// already be gone.
    pub async fn cleanup_port_forwarding(&self, vm_ip: Ipv4Addr, local_port: u16) -> LeaderResult<()> {
        for rule in forwarding_rules(vm_ip, local_port, self.guest_port) {
            let args = rule.args(RuleAction::Delete);
            match self.runner.run(&args).await {
                Ok(()) => tracing::debug!(chain = rule.chain(), "removed forwarding rule"),
                Err(e) => tracing::warn!(
                    chain = rule.chain(),
                    error = %e,
                    "failed to remove forwarding rule (may not exist)"
                ),
            }
        }

        tracing::info!(%vm_ip, local_port, "port forwarding cleaned up");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::fmt::Debug for FirewallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirewallController")
            .field("local_ports", &self.local_ports)
            .field("guest_port", &self.guest_port)
            .finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Records every call and fails the calls whose chain is listed.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
        failing_chains: Vec<&'static str>,
    }

    #[async_trait]
    impl RuleRunner for Recorder {
        async fn run(&self, args: &[String]) -> LeaderResult<()> {
            self.calls.lock().unwrap().push(args.to_vec());
            if self
                .failing_chains
                .iter()
                .any(|chain| args.iter().any(|a| a == chain))
            {
                return Err(LeaderError::FirewallSetupFailed("no such rule".into()));
            }
            Ok(())
        }
    }

    fn controller(recorder: Arc<Recorder>) -> FirewallController {
        FirewallController::new(recorder, "20000-21000".parse().unwrap(), 25565)
    }

    #[test_log::test(tokio::test)]
    async fn test_setup_installs_four_rules_in_order() {
        let recorder = Arc::new(Recorder::default());
        controller(recorder.clone())
            .setup_port_forwarding(Ipv4Addr::new(172, 16, 0, 6), 20000)
            .await
            .unwrap();

        let calls = recorder.calls.lock().unwrap();
        let chains: Vec<&str> = calls
            .iter()
            .map(|c| c.iter().find(|a| a.chars().all(|ch| ch.is_ascii_uppercase())).unwrap().as_str())
            .collect();
        assert_eq!(chains, vec!["OUTPUT", "PREROUTING", "FORWARD", "POSTROUTING"]);
        assert!(calls.iter().all(|c| c.contains(&"-A".to_string())));
    }

    #[test_log::test(tokio::test)]
    async fn test_setup_stops_at_first_failure_without_rollback() {
        let recorder = Arc::new(Recorder {
            failing_chains: vec!["FORWARD"],
            ..Default::default()
        });

        let result = controller(recorder.clone())
            .setup_port_forwarding(Ipv4Addr::new(172, 16, 0, 6), 20000)
            .await;
        assert!(matches!(result, Err(LeaderError::FirewallSetupFailed(_))));

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| !c.contains(&"-D".to_string())));
    }

    #[test_log::test(tokio::test)]
    async fn test_setup_rejects_port_outside_range() {
        let recorder = Arc::new(Recorder::default());
        let result = controller(recorder.clone())
            .setup_port_forwarding(Ipv4Addr::new(172, 16, 0, 6), 8000)
            .await;

        assert!(matches!(result, Err(LeaderError::FirewallSetupFailed(_))));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_cleanup_swallows_failures() {
        let recorder = Arc::new(Recorder {
            failing_chains: vec!["OUTPUT", "PREROUTING", "FORWARD", "POSTROUTING"],
            ..Default::default()
        });

        controller(recorder.clone())
            .cleanup_port_forwarding(Ipv4Addr::new(172, 16, 0, 6), 20000)
            .await
            .unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|c| c.contains(&"-D".to_string())));
    }
}
