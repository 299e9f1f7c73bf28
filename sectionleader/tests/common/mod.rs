//! Test doubles for the hypervisor and the firewall.

#![allow(dead_code)]

use std::{
    net::Ipv4Addr,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use fcdriver::{DriverError, DriverResult, HypervisorDriver, HypervisorSession, LaunchSpec};
use ipnetwork::Ipv4Network;
use sectionleader::{
    config::{LeaderConfig, RootfsSource, Timeouts},
    firewall::RuleRunner,
    LeaderError, LeaderResult,
};
use tempfile::TempDir;
use tokio::sync::watch;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How the fake hypervisor answers the start signal.
#[derive(Debug, Clone, Copy)]
pub enum Readiness {
    /// Reports success after the delay.
    Ready(Duration),

    /// Reports failure after the delay.
    Fails(Duration),

    /// Never reports.
    Hangs,
}

/// A hypervisor that only counts calls and follows a script.
#[derive(Debug, Clone)]
pub struct FakeDriver {
    inner: Arc<FakeState>,
}

#[derive(Debug)]
struct FakeState {
    readiness: Mutex<Readiness>,
    launch_fails: AtomicBool,
    pause_fails: AtomicBool,
    shutdown_fails: AtomicBool,
    shutdown_delay: Mutex<Duration>,
    pause_delay: Mutex<Duration>,
    next_address: AtomicU32,
    launches: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    shutdowns: AtomicUsize,
    force_stops: AtomicUsize,
    live: AtomicUsize,
}

/// One fake hypervisor process.
#[derive(Debug)]
pub struct FakeSession {
    address: Ipv4Network,
    exited: watch::Sender<bool>,
}

/// Records every firewall call and optionally fails one of them.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on_call: Mutex<Option<usize>>,
}

/// Directories and reference files backing one test manager.
pub struct Workspace {
    pub dir: TempDir,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeState {
                readiness: Mutex::new(Readiness::Ready(Duration::ZERO)),
                launch_fails: AtomicBool::new(false),
                pause_fails: AtomicBool::new(false),
                shutdown_fails: AtomicBool::new(false),
                shutdown_delay: Mutex::new(Duration::ZERO),
                pause_delay: Mutex::new(Duration::ZERO),
                next_address: AtomicU32::new(0),
                launches: AtomicUsize::new(0),
                pauses: AtomicUsize::new(0),
                resumes: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                force_stops: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        *self.inner.readiness.lock().unwrap() = readiness;
    }

    pub fn set_launch_fails(&self, fails: bool) {
        self.inner.launch_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_pause_fails(&self, fails: bool) {
        self.inner.pause_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_shutdown_fails(&self, fails: bool) {
        self.inner.shutdown_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_shutdown_delay(&self, delay: Duration) {
        *self.inner.shutdown_delay.lock().unwrap() = delay;
    }

    pub fn set_pause_delay(&self, delay: Duration) {
        *self.inner.pause_delay.lock().unwrap() = delay;
    }

    pub fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.inner.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.inner.resumes.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.inner.shutdowns.load(Ordering::SeqCst)
    }

    pub fn force_stops(&self) -> usize {
        self.inner.force_stops.load(Ordering::SeqCst)
    }

    /// Sessions launched and not yet force-stopped.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the `n`th call, counting from zero.
    pub fn fail_on_call(&self, n: usize) {
        *self.fail_on_call.lock().unwrap() = Some(n);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose first argument is `-A`.
    pub fn appends(&self) -> usize {
        self.count_action("-A")
    }

    /// Calls whose first argument is `-D`.
    pub fn deletes(&self) -> usize {
        self.count_action("-D")
    }

    fn count_action(&self, action: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args.iter().any(|arg| arg == action))
            .count()
    }
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("_ref");
        std::fs::create_dir_all(&reference).unwrap();
        std::fs::write(reference.join("vmlinux"), b"kernel").unwrap();
        std::fs::write(reference.join("rootfs.ext4"), b"rootfs").unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A config rooted in this workspace with millisecond-scale deadlines.
    pub fn config(&self) -> LeaderConfig {
        self.config_with(3, false)
    }

    pub fn config_with(&self, subnet_pool_size: u16, reclaim: bool) -> LeaderConfig {
        self.config_with_timeouts(subnet_pool_size, reclaim, fast_timeouts())
    }

    pub fn config_with_timeouts(
        &self,
        subnet_pool_size: u16,
        reclaim: bool,
        timeouts: Timeouts,
    ) -> LeaderConfig {
        let root = self.path();
        LeaderConfig::builder()
            .home_dir(root.join("home"))
            .kernel_image(root.join("_ref/vmlinux"))
            .rootfs(RootfsSource::Image {
                path: root.join("_ref/rootfs.ext4"),
            })
            .cni_conf_dir(root.join("cni"))
            .tunnel_config_dir(root.join("frpc"))
            .socket_dir(root.join("sockets"))
            .subnet_pool_size(subnet_pool_size)
            .reclaim_resources(reclaim)
            .timeouts(timeouts)
            .build()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Millisecond-scale deadlines.
pub fn fast_timeouts() -> Timeouts {
    Timeouts::builder()
        .create(Duration::from_secs(2))
        .readiness(Duration::from_millis(200))
        .lifecycle(Duration::from_millis(200))
        .shutdown(Duration::from_millis(200))
        .shutdown_all(Duration::from_millis(500))
        .build()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl HypervisorSession for FakeSession {
    fn address(&self) -> Ipv4Network {
        self.address
    }
}

#[async_trait]
impl HypervisorDriver for FakeDriver {
    type Session = FakeSession;

    async fn launch(&self, _spec: LaunchSpec) -> DriverResult<FakeSession> {
        if self.inner.launch_fails.load(Ordering::SeqCst) {
            return Err(DriverError::ProcessExited);
        }

        self.inner.launches.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_add(1, Ordering::SeqCst);

        let n = self.inner.next_address.fetch_add(1, Ordering::SeqCst);
        let ip = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 200, 0, 0)) + 4 * (n + 1) + 2);
        let (exited, _) = watch::channel(false);

        Ok(FakeSession {
            address: Ipv4Network::new(ip, 30).unwrap(),
            exited,
        })
    }

    async fn await_ready(&self, _session: &FakeSession, _deadline: Duration) -> bool {
        let readiness = *self.inner.readiness.lock().unwrap();
        match readiness {
            Readiness::Ready(delay) => {
                tokio::time::sleep(delay).await;
                true
            }
            Readiness::Fails(delay) => {
                tokio::time::sleep(delay).await;
                false
            }
            Readiness::Hangs => std::future::pending().await,
        }
    }

    async fn pause(&self, _session: &FakeSession, _deadline: Duration) -> DriverResult<()> {
        self.inner.pauses.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.pause_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if self.inner.pause_fails.load(Ordering::SeqCst) {
            return Err(DriverError::ProcessExited);
        }

        Ok(())
    }

    async fn resume(&self, _session: &FakeSession, _deadline: Duration) -> DriverResult<()> {
        self.inner.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self, session: &FakeSession, _deadline: Duration) -> DriverResult<()> {
        self.inner.shutdowns.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.shutdown_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if self.inner.shutdown_fails.load(Ordering::SeqCst) {
            return Err(DriverError::ProcessExited);
        }

        session.exited.send_replace(true);
        Ok(())
    }

    async fn force_stop(&self, session: &FakeSession) -> DriverResult<()> {
        self.inner.force_stops.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        session.exited.send_replace(true);
        Ok(())
    }

    async fn wait(&self, session: &FakeSession) -> DriverResult<()> {
        let mut exited = session.exited.subscribe();
        let _ = exited.wait_for(|exited| *exited).await;
        Ok(())
    }
}

#[async_trait]
impl RuleRunner for RecordingRunner {
    async fn run(&self, args: &[String]) -> LeaderResult<()> {
        let mut calls = self.calls.lock().unwrap();
        let n = calls.len();
        calls.push(args.to_vec());

        if *self.fail_on_call.lock().unwrap() == Some(n) {
            return Err(LeaderError::FirewallSetupFailed(format!(
                "rule {n} rejected"
            )));
        }

        Ok(())
    }
}
