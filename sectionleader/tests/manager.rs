mod common;

use std::{collections::HashSet, sync::Arc, time::Duration};

use common::{FakeDriver, Readiness, RecordingRunner, Workspace};
use sectionleader::{
    alloc::NameRegistry,
    config::{LeaderConfig, Timeouts},
    manager::VmManager,
    vm::{MachineId, VmState},
    LeaderError,
};

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn manager(config: LeaderConfig) -> (VmManager<FakeDriver>, FakeDriver, Arc<RecordingRunner>) {
    let driver = FakeDriver::new();
    let runner = RecordingRunner::new();
    let manager = VmManager::new(config, driver.clone(), runner.clone()).unwrap();
    (manager, driver, runner)
}

async fn subnets_in_use(manager: &VmManager<FakeDriver>) -> usize {
    manager.resources().subnets.lock().await.in_use()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_machines_get_distinct_resources() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let config = workspace.config();
    let (manager, driver, runner) = manager(config.clone());

    let mut machines = Vec::new();
    for _ in 0..3 {
        machines.push(manager.create_vm_and_wait().await?);
    }

    let subnets: HashSet<_> = machines.iter().map(|m| m.subnet.to_string()).collect();
    let expected: HashSet<_> = ["172.16.0.4/30", "172.16.0.8/30", "172.16.0.12/30"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(subnets, expected);

    let names: HashSet<_> = machines.iter().map(|m| m.name.clone()).collect();
    let remote: HashSet<_> = machines.iter().map(|m| m.remote_port).collect();
    let local: HashSet<_> = machines.iter().map(|m| m.local_port).collect();
    let game: HashSet<_> = machines.iter().map(|m| m.game_remote_port).collect();
    assert_eq!(names.len(), 3);
    assert_eq!(remote.len(), 3);
    assert_eq!(local.len(), 3);
    assert_eq!(game.len(), 3);

    for machine in &machines {
        assert_eq!(machine.state, VmState::Active);
        assert!(config.get_remote_ports().contains(machine.remote_port));
        assert!(config.get_local_forward_ports().contains(machine.local_port));
        assert!(config.get_game_ports().contains(machine.game_remote_port));
        assert!(config.tunnel_dir().join(format!("{}.toml", machine.id)).exists());
        assert!(workspace
            .path()
            .join("cni")
            .join(format!("fcnet-{}.conflist", machine.id))
            .exists());

        let by_name = manager.get_by_name(&machine.name).await?;
        assert_eq!(by_name.id, machine.id);
    }

    assert_eq!(manager.len().await, 3);
    assert_eq!(driver.launches(), 3);
    assert_eq!(runner.appends(), 12);

    let listed: Vec<MachineId> = manager.list().await.iter().map(|m| m.id).collect();
    let created: Vec<MachineId> = machines.iter().map(|m| m.id).collect();
    assert_eq!(listed, created);

    manager.shutdown_all().await?;

    assert!(manager.is_empty().await);
    assert_eq!(driver.force_stops(), 3);
    assert_eq!(driver.live(), 0);
    assert_eq!(runner.deletes(), 12);
    for machine in &machines {
        assert!(!config.tunnel_dir().join(format!("{}.toml", machine.id)).exists());
        assert_eq!(manager.state(&machine.id).await?, VmState::Stopped);
    }

    // Without reclamation the subnets stay marked as used.
    assert_eq!(subnets_in_use(&manager).await, 3);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_pause_on_paused_machine_is_rejected() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, _) = manager(workspace.config());

    let machine = manager.create_vm_and_wait().await?;
    manager.pause_vm(&machine.id).await?;
    assert_eq!(manager.state(&machine.id).await?, VmState::Paused);

    let err = manager.pause_vm(&machine.id).await.unwrap_err();
    assert!(matches!(
        err,
        LeaderError::InvalidStateTransition {
            from: VmState::Paused,
            operation: "pause",
            ..
        }
    ));
    assert_eq!(manager.state(&machine.id).await?, VmState::Paused);
    assert_eq!(driver.pauses(), 1);

    manager.resume_vm(&machine.id).await?;
    assert_eq!(manager.state(&machine.id).await?, VmState::Active);
    assert!(manager.resume_vm(&machine.id).await.is_err());
    assert_eq!(driver.resumes(), 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_pause_keeps_state() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, _) = manager(workspace.config());

    let machine = manager.create_vm_and_wait().await?;
    driver.set_pause_fails(true);

    let err = manager.pause_vm(&machine.id).await.unwrap_err();
    assert!(matches!(err, LeaderError::Driver(_)));
    assert_eq!(manager.state(&machine.id).await?, VmState::Active);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_stopped_is_terminal() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, _) = manager(workspace.config());

    let machine = manager.create_vm_and_wait().await?;
    let signal = manager.graceful_shutdown_vm(&machine.id).await?;

    // The state flips before the driver call finishes.
    assert!(matches!(
        manager.graceful_shutdown_vm(&machine.id).await,
        Err(LeaderError::InvalidStateTransition {
            from: VmState::Stopped,
            ..
        })
    ));

    assert_eq!(signal.id(), machine.id);
    assert!(signal.wait().await);
    assert_eq!(driver.shutdowns(), 1);
    assert_eq!(driver.force_stops(), 1);

    for result in [
        manager.pause_vm(&machine.id).await,
        manager.resume_vm(&machine.id).await,
        manager.graceful_shutdown_vm(&machine.id).await.map(|_| ()),
    ] {
        assert!(matches!(
            result,
            Err(LeaderError::InvalidStateTransition {
                from: VmState::Stopped,
                ..
            })
        ));
    }

    assert_eq!(manager.state(&machine.id).await?, VmState::Stopped);
    assert!(matches!(
        manager.get(&machine.id).await,
        Err(LeaderError::NotFound(_))
    ));
    assert!(matches!(
        manager.state(&MachineId::new()).await,
        Err(LeaderError::NotFound(_))
    ));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_graceful_shutdown_escalates() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, _) = manager(workspace.config());

    let machine = manager.create_vm_and_wait().await?;
    driver.set_shutdown_fails(true);

    let signal = manager.graceful_shutdown_vm(&machine.id).await?;
    assert!(signal.wait().await);
    assert_eq!(driver.shutdowns(), 1);
    assert_eq!(driver.force_stops(), 1);
    assert_eq!(driver.live(), 0);
    assert!(manager.is_empty().await);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_shutdown_all_is_bounded_by_one_deadline() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let timeouts = Timeouts::builder()
        .create(Duration::from_secs(2))
        .readiness(Duration::from_millis(200))
        .lifecycle(Duration::from_millis(200))
        .shutdown(Duration::from_secs(5))
        .shutdown_all(Duration::from_millis(300))
        .build();
    let (manager, driver, _) = manager(workspace.config_with_timeouts(3, false, timeouts));

    for _ in 0..3 {
        manager.create_vm_and_wait().await?;
    }

    driver.set_shutdown_delay(Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    let err = manager.shutdown_all().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        LeaderError::Timeout {
            operation: "shutdown all",
            ..
        }
    ));
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");

    // Every machine was already marked stopped when the deadline passed.
    for machine in manager.list().await {
        assert_eq!(machine.state, VmState::Stopped);
    }

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_shutdown_all_deadline_covers_busy_machines() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let timeouts = Timeouts::builder()
        .create(Duration::from_secs(2))
        .readiness(Duration::from_millis(200))
        .lifecycle(Duration::from_secs(2))
        .shutdown(Duration::from_millis(100))
        .shutdown_all(Duration::from_millis(300))
        .build();
    let (manager, driver, _) = manager(workspace.config_with_timeouts(3, false, timeouts));

    let machine = manager.create_vm_and_wait().await?;
    driver.set_pause_delay(Duration::from_secs(5));

    let pausing = {
        let manager = manager.clone();
        let id = machine.id;
        tokio::spawn(async move { manager.pause_vm(&id).await })
    };
    while driver.pauses() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let started = tokio::time::Instant::now();
    let err = manager.shutdown_all().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");

    // The pause gives up at the lifecycle deadline.
    assert!(pausing.await?.is_err());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_concurrent_creates_get_distinct_resources() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, _) = manager(workspace.config_with(4, false));

    let creates: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.create_vm_and_wait().await })
        })
        .collect();

    let mut machines = Vec::new();
    for create in creates {
        machines.push(create.await??);
    }

    let ids: HashSet<_> = machines.iter().map(|m| m.id).collect();
    let names: HashSet<_> = machines.iter().map(|m| m.name.clone()).collect();
    let subnets: HashSet<_> = machines.iter().map(|m| m.subnet.to_string()).collect();
    let remote: HashSet<_> = machines.iter().map(|m| m.remote_port).collect();
    let local: HashSet<_> = machines.iter().map(|m| m.local_port).collect();
    let game: HashSet<_> = machines.iter().map(|m| m.game_remote_port).collect();
    for distinct in [ids.len(), names.len(), subnets.len(), remote.len(), local.len(), game.len()] {
        assert_eq!(distinct, 4);
    }

    assert_eq!(manager.len().await, 4);
    assert_eq!(driver.launches(), 4);
    assert_eq!(subnets_in_use(&manager).await, 4);

    manager.shutdown_all().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_shutdown_all_on_empty_fleet() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, _, _) = manager(workspace.config());

    manager.shutdown_all().await?;
    assert!(manager.is_empty().await);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_subnet_exhaustion_fails_before_launch() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let config = workspace.config_with(2, false);
    let (manager, driver, _) = manager(config.clone());

    manager.create_vm_and_wait().await?;
    manager.create_vm_and_wait().await?;

    let handle = manager.create_vm();
    let id = handle.id();
    let err = handle.wait(Duration::from_secs(2)).await.unwrap_err();

    assert!(matches!(err, LeaderError::NetworkAllocationFailed(_)));
    assert!(err.is_exhausted());
    assert_eq!(driver.launches(), 2);
    assert_eq!(manager.len().await, 2);
    assert!(!config.vm_dir(&id).exists());
    assert!(matches!(manager.get(&id).await, Err(LeaderError::NotFound(_))));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_reclaimed_resources_are_reused() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, _, _) = manager(workspace.config_with(1, true));

    let first = manager.create_vm_and_wait().await?;
    assert!(manager.graceful_shutdown_vm(&first.id).await?.wait().await);
    assert_eq!(subnets_in_use(&manager).await, 0);
    assert!(manager.resolve(&first.name).await.is_err());

    let second = manager.create_vm_and_wait().await?;
    assert_eq!(second.subnet, first.subnet);
    assert_eq!(second.remote_port, first.remote_port);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_resources_leak_without_reclaim() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, _, _) = manager(workspace.config_with(1, false));

    let first = manager.create_vm_and_wait().await?;
    assert!(manager.graceful_shutdown_vm(&first.id).await?.wait().await);
    assert_eq!(manager.resolve(&first.name).await?, first.id);

    let err = manager.create_vm_and_wait().await.unwrap_err();
    assert!(err.is_exhausted());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_readiness_failure_rolls_back() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, runner) = manager(workspace.config());
    driver.set_readiness(Readiness::Fails(Duration::from_millis(10)));

    let err = manager.create_vm_and_wait().await.unwrap_err();
    assert!(matches!(err, LeaderError::HypervisorLaunchFailed(_)));

    assert_eq!(driver.launches(), 1);
    assert_eq!(driver.force_stops(), 1);
    assert_eq!(driver.live(), 0);
    assert_eq!(subnets_in_use(&manager).await, 0);
    assert!(manager.is_empty().await);
    assert!(runner.calls().is_empty());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_readiness_timeout_rolls_back() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, _) = manager(workspace.config());
    driver.set_readiness(Readiness::Hangs);

    let err = manager.create_vm_and_wait().await.unwrap_err();
    assert!(matches!(err, LeaderError::ReadinessTimeout(_)));
    assert!(err.is_timeout());

    assert_eq!(driver.live(), 0);
    assert_eq!(subnets_in_use(&manager).await, 0);
    assert!(manager.is_empty().await);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_launch_failure_releases_subnet() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let config = workspace.config();
    let (manager, driver, _) = manager(config.clone());
    driver.set_launch_fails(true);

    let handle = manager.create_vm();
    let id = handle.id();
    let err = handle.wait(Duration::from_secs(2)).await.unwrap_err();

    assert!(matches!(err, LeaderError::HypervisorLaunchFailed(_)));
    assert_eq!(subnets_in_use(&manager).await, 0);
    assert!(!config.vm_dir(&id).exists());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_create_timeout_cancels_provisioning() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let timeouts = Timeouts::builder()
        .readiness(Duration::from_secs(5))
        .build();
    let (manager, driver, _) = manager(workspace.config_with_timeouts(3, false, timeouts));
    driver.set_readiness(Readiness::Ready(Duration::from_secs(2)));

    let err = manager
        .create_vm()
        .wait(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, LeaderError::ProvisioningTimedOut(_)));

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(driver.launches(), 1);
    assert_eq!(driver.force_stops(), 1);
    assert_eq!(driver.live(), 0);
    assert_eq!(subnets_in_use(&manager).await, 0);
    assert!(manager.is_empty().await);

    // The admission lock was released.
    driver.set_readiness(Readiness::Ready(Duration::ZERO));
    manager.create_vm_and_wait().await?;

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_firewall_failure_rolls_back() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let (manager, driver, runner) = manager(workspace.config());
    runner.fail_on_call(1);

    let err = manager.create_vm_and_wait().await.unwrap_err();
    assert!(matches!(err, LeaderError::FirewallSetupFailed(_)));

    // One rule went in, the second failed and nothing else was tried before cleanup.
    assert_eq!(runner.appends(), 2);
    assert_eq!(runner.deletes(), 4);
    assert_eq!(driver.live(), 0);
    assert_eq!(subnets_in_use(&manager).await, 0);
    assert!(manager.resources().names.read().await.is_empty());

    let ports = manager.resources().ports.lock().await;
    assert_eq!(ports.remote().in_use(), 0);
    assert_eq!(ports.local_forward().in_use(), 0);
    assert_eq!(ports.game_remote().in_use(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_name_exhaustion_rolls_back() -> anyhow::Result<()> {
    let workspace = Workspace::new();
    let driver = FakeDriver::new();
    let names = NameRegistry::with_generator(|| "lonely-otter".to_string());
    let manager = VmManager::with_names(
        workspace.config(),
        driver.clone(),
        RecordingRunner::new(),
        names,
    )?;

    let first = manager.create_vm_and_wait().await?;
    assert_eq!(first.name, "lonely-otter");

    let err = manager.create_vm_and_wait().await.unwrap_err();
    assert!(matches!(err, LeaderError::NameGenerationExhausted { .. }));
    assert!(err.is_exhausted());

    assert_eq!(driver.launches(), 2);
    assert_eq!(driver.live(), 1);
    assert_eq!(subnets_in_use(&manager).await, 1);
    assert_eq!(manager.len().await, 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_invalid_config_is_rejected() {
    let workspace = Workspace::new();
    let config = workspace.config_with(0, false);
    let result = VmManager::new(config, FakeDriver::new(), RecordingRunner::new());
    assert!(matches!(result, Err(LeaderError::InvalidConfig(_))));
}
