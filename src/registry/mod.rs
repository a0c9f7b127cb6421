//! The authoritative in-memory view of the runtime's containers and images.
//!
//! A [`Registry`] owns a background task that polls the runtime at a fixed
//! interval and reconciles the indexes. Readers take a shared lock; the loop
//! takes the exclusive lock only while mutating, and watchers are called after
//! it is released.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::container::{self, Container, ContainerID, ContainerOptions, StatsGatherer};
use crate::grpc::Endpoint;
use crate::image::Image;
use crate::report::Node;
use crate::runtime::{ClientFactory, ContainerDetail, RuntimeClient};

mod error;
mod reconcile;

pub use error::{Error, Result};

/// Receives the node of every created, changed or removed container.
pub type Watcher = Arc<dyn Fn(Node) + Send + Sync>;

/// Builds the [`Container`] for a newly observed runtime container.
pub type ContainerFactory =
    Arc<dyn Fn(ContainerDetail, &ContainerOptions) -> container::Result<Container> + Send + Sync>;

pub fn default_container_factory() -> ContainerFactory {
    Arc::new(Container::new)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    pub endpoint: Endpoint,
    pub poll_interval: Duration,
    pub collect_stats: bool,
    pub container: ContainerOptions,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            poll_interval: Duration::from_secs(5),
            collect_stats: true,
            container: ContainerOptions::default(),
        }
    }
}

/// A runtime-managed network. The runtime API exposes none, so the list stays empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub subnets: Vec<String>,
}

/// The value of the only key in `map` starting with `prefix`, if exactly one does.
pub fn unique_prefix_match<'a, K, V>(map: &'a BTreeMap<K, V>, prefix: &str) -> Option<&'a V>
where
    K: Borrow<str> + Ord,
{
    let mut matches = map
        .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(|(key, _)| Borrow::<str>::borrow(*key).starts_with(prefix));

    let (_, value) = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(value)
}

#[derive(Default)]
struct State {
    containers: BTreeMap<ContainerID, Arc<Container>>,
    pids: HashMap<u32, Arc<Container>>,
    images: BTreeMap<String, Image>,
    networks: Vec<Network>,
    /// Snapshotted before dispatch so callbacks never run under the lock.
    watchers: Vec<Watcher>,
}

struct Inner {
    state: RwLock<State>,
    client: Arc<dyn RuntimeClient>,
    gatherer: Arc<dyn StatsGatherer>,
    factory: ContainerFactory,
    options: RegistryOptions,
}

impl Inner {
    fn new(
        client: Arc<dyn RuntimeClient>,
        options: RegistryOptions,
        factory: ContainerFactory,
    ) -> Self {
        Self {
            state: RwLock::new(State::default()),
            gatherer: client.stats_gatherer(),
            client,
            factory,
            options,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
    shutdown: mpsc::Sender<oneshot::Sender<()>>,
}

impl Registry {
    /// Connects to the runtime and starts the reconciliation loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the client factory cannot reach the runtime.
    /// No loop is started in that case.
    pub async fn new(
        options: RegistryOptions,
        client_factory: &dyn ClientFactory,
        container_factory: ContainerFactory,
    ) -> Result<Self> {
        let client = client_factory
            .connect(&options.endpoint)
            .await
            .map_err(Error::Connect)?;
        log::debug!("connected to runtime at {}", options.endpoint);

        let inner = Arc::new(Inner::new(client, options, container_factory));
        let (shutdown, rx) = mpsc::channel(1);
        tokio::spawn(reconcile::run(Arc::clone(&inner), rx));

        Ok(Self { inner, shutdown })
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.inner.options
    }

    /// Visits every container while holding the read lock.
    pub fn walk_containers(&self, mut visit: impl FnMut(&Arc<Container>)) {
        for container in self.inner.read().containers.values() {
            visit(container);
        }
    }

    pub fn walk_images(&self, mut visit: impl FnMut(&Image)) {
        for image in self.inner.read().images.values() {
            visit(image);
        }
    }

    pub fn walk_networks(&self, mut visit: impl FnMut(&Network)) {
        for network in &self.inner.read().networks {
            visit(network);
        }
    }

    pub fn get_container(&self, id: &str) -> Option<Arc<Container>> {
        self.inner.read().containers.get(id).cloned()
    }

    /// The only container whose ID starts with `prefix`, if exactly one does.
    pub fn get_container_by_prefix(&self, prefix: &str) -> Option<Arc<Container>> {
        unique_prefix_match(&self.inner.read().containers, prefix).cloned()
    }

    /// Runs `with_lookup` with a PID lookup that is consistent for the whole call.
    pub fn locked_pid_lookup<R>(
        &self,
        with_lookup: impl FnOnce(&dyn Fn(u32) -> Option<Arc<Container>>) -> R,
    ) -> R {
        let state = self.inner.read();
        let lookup = |pid: u32| state.pids.get(&pid).cloned();
        with_lookup(&lookup)
    }

    pub fn watch_container_updates(&self, watcher: impl Fn(Node) + Send + Sync + 'static) {
        self.inner.write().watchers.push(Arc::new(watcher));
    }

    /// Deregisters all watchers and waits until the loop and every stats collection have stopped.
    pub async fn stop(&self) {
        self.inner.write().watchers.clear();

        let (ack, done) = oneshot::channel();
        if self.shutdown.send(ack).await.is_ok() {
            let _ = done.await;
        }
        self.inner.stop_all_stats();
        log::debug!("registry stopped");
    }
}

#[cfg(test)]
impl Registry {
    /// A registry without a background loop, driven by [`Registry::reconcile_once`].
    pub(crate) fn unstarted(client: Arc<dyn RuntimeClient>, options: RegistryOptions) -> Self {
        let inner = Arc::new(Inner::new(client, options, default_container_factory()));
        let (shutdown, _) = mpsc::channel(1);
        Self { inner, shutdown }
    }

    pub(crate) async fn reconcile_once(&self) -> Result<()> {
        self.inner.reconcile().await
    }
}
