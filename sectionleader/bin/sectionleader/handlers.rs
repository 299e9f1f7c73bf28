use std::{future::IntoFuture, net::SocketAddr, sync::Arc};

use fcdriver::FirecrackerDriver;
use sectionleader::{
    cli::SectionleaderArgs,
    config::LeaderConfig,
    firewall::IptablesRunner,
    manager::VmManager,
    server::{create_router, ServerState},
    LeaderResult,
};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
};

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Serves the HTTP API until a termination signal arrives, then shuts every machine down.
pub async fn serve_subcommand(
    manager: VmManager<FirecrackerDriver>,
    addr: SocketAddr,
) -> LeaderResult<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "serving machine API");

    let router = create_router(ServerState::new(manager.clone()));
    tokio::select! {
        result = axum::serve(listener, router).into_future() => result?,
        signal = wait_for_signal() => {
            let signal = signal?;
            tracing::info!(signal, "received termination signal");
            shutdown_everything(&manager).await;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Loads the config file named on the command line, or the defaults, and applies flag overrides.
pub async fn load_config(args: &SectionleaderArgs) -> LeaderResult<LeaderConfig> {
    let mut config = match &args.config {
        Some(path) => LeaderConfig::load(path).await?,
        None => LeaderConfig::default(),
    };

    if let Some(home) = &args.home {
        config.set_home_dir(home);
    }

    if let Some(binary) = &args.firecracker_bin {
        config.set_firecracker_bin(binary);
    }

    if args.reclaim {
        config.set_reclaim_resources(true);
    }

    config.validate()?;
    Ok(config)
}

/// Creates a manager backed by Firecracker and iptables.
pub fn build_manager(config: LeaderConfig) -> LeaderResult<VmManager<FirecrackerDriver>> {
    tracing::debug!(home = %config.get_home_dir().display(), "creating machine manager");
    VmManager::new(config, FirecrackerDriver::new(), Arc::new(IptablesRunner::new()))
}

/// Resolves with the name of the first SIGINT, SIGTERM or SIGQUIT.
pub async fn wait_for_signal() -> LeaderResult<&'static str> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };

    Ok(name)
}

/// Shuts every machine down. Failures are logged; the process exits either way.
pub async fn shutdown_everything(manager: &VmManager<FirecrackerDriver>) {
    match manager.shutdown_all().await {
        Ok(()) => tracing::info!("all machines stopped"),
        Err(e) => tracing::error!(error = %e, "shutdown did not finish cleanly, exiting anyway"),
    }
}
