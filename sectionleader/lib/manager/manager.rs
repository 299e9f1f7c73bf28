use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use fcdriver::HypervisorDriver;
use tokio::sync::{Mutex, RwLock};

use crate::{
    alloc::NameRegistry,
    config::LeaderConfig,
    firewall::RuleRunner,
    provision::{Pipeline, Resources},
    vm::{MachineId, MachineInfo, VmRecord, VmState},
    LeaderError, LeaderResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Owns every provisioned machine and serializes the calls made on them.
///
/// Creation is admitted one at a time so the allocators never race. Lifecycle calls take the
/// registry lock only long enough to find a record and then lock that record, so a slow
/// provisioning never blocks machines that already run.
///
/// Cloning is cheap and every clone manages the same machines.
pub struct VmManager<D: HypervisorDriver> {
    pub(super) inner: Arc<Inner<D>>,
}

pub(super) struct Inner<D: HypervisorDriver> {
    pub(super) driver: Arc<D>,
    pub(super) config: Arc<LeaderConfig>,
    pub(super) resources: Arc<Resources>,
    pub(super) pipeline: Pipeline<D>,
    pub(super) admission: Mutex<()>,
    pub(super) registry: RwLock<Registry<D::Session>>,
}

pub(super) struct Registry<S> {
    pub(super) live: HashMap<MachineId, Arc<Mutex<VmRecord<S>>>>,
    pub(super) retired: HashSet<MachineId>,
}

/// A registry entry or a reason there is none.
pub(super) enum Lookup<S> {
    Live(Arc<Mutex<VmRecord<S>>>),
    Retired,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> VmManager<D> {
    /// Creates a manager. Fails if the config does not validate.
    pub fn new(config: LeaderConfig, driver: D, runner: Arc<dyn RuleRunner>) -> LeaderResult<Self> {
        Self::with_names(config, driver, runner, NameRegistry::new())
    }

    /// Creates a manager with a specific name registry.
    pub fn with_names(
        config: LeaderConfig,
        driver: D,
        runner: Arc<dyn RuleRunner>,
        names: NameRegistry,
    ) -> LeaderResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let driver = Arc::new(driver);
        let resources = Arc::new(Resources::from_config(&config, runner, names)?);
        let pipeline = Pipeline::new(driver.clone(), config.clone(), resources.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                driver,
                config,
                resources,
                pipeline,
                admission: Mutex::new(()),
                registry: RwLock::new(Registry {
                    live: HashMap::new(),
                    retired: HashSet::new(),
                }),
            }),
        })
    }

    /// The manager's configuration.
    pub fn config(&self) -> &LeaderConfig {
        &self.inner.config
    }

    /// The allocators shared with provisioning.
    pub fn resources(&self) -> &Resources {
        &self.inner.resources
    }

    /// Returns a snapshot of machine `id`.
    pub async fn get(&self, id: &MachineId) -> LeaderResult<MachineInfo> {
        match self.lookup(id).await? {
            Lookup::Live(record) => Ok(record.lock().await.info()),
            Lookup::Retired => Err(LeaderError::NotFound(id.to_string())),
        }
    }

    /// Returns a snapshot of the machine called `name`.
    pub async fn get_by_name(&self, name: &str) -> LeaderResult<MachineInfo> {
        let id = self.resolve(name).await?;
        self.get(&id).await
    }

    /// Resolves a display name to a machine id.
    pub async fn resolve(&self, name: &str) -> LeaderResult<MachineId> {
        self.inner.resources.names.read().await.get_id(name)
    }

    /// Returns snapshots of every live machine, oldest first.
    pub async fn list(&self) -> Vec<MachineInfo> {
        let records: Vec<_> = self
            .inner
            .registry
            .read()
            .await
            .live
            .values()
            .cloned()
            .collect();

        let mut infos = Vec::with_capacity(records.len());
        for record in records {
            infos.push(record.lock().await.info());
        }

        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    /// Number of live machines.
    pub async fn len(&self) -> usize {
        self.inner.registry.read().await.live.len()
    }

    /// Whether no machine is live.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The lifecycle state of machine `id`. Machines that were shut down report `Stopped`.
    pub async fn state(&self, id: &MachineId) -> LeaderResult<VmState> {
        match self.lookup(id).await? {
            Lookup::Live(record) => Ok(record.lock().await.state()),
            Lookup::Retired => Ok(VmState::Stopped),
        }
    }

    pub(super) async fn lookup(&self, id: &MachineId) -> LeaderResult<Lookup<D::Session>> {
        let registry = self.inner.registry.read().await;
        if let Some(record) = registry.live.get(id) {
            return Ok(Lookup::Live(record.clone()));
        }

        if registry.retired.contains(id) {
            return Ok(Lookup::Retired);
        }

        Err(LeaderError::NotFound(id.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<D: HypervisorDriver> Clone for VmManager<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: HypervisorDriver> std::fmt::Debug for VmManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
