//! A single runtime container: identity, live state, graph projection and
//! stats collection.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::image::trim_image_id;
use crate::report::{self, Metric, MetricSample, Node};
use crate::runtime::{ContainerDetail, ContainerState, NetworkMode};

mod error;
pub mod node;
mod stats;

pub use error::{Error, Result};
pub use stats::{STATS_BUFFER_CAPACITY, StatsBuffer, StatsGatherer, StatsRequest, StatsSample};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// Samples in flight between a gatherer and the buffer.
const STATS_CHANNEL_CAPACITY: usize = 16;

/// A validated container identifier.
///
/// # Examples
///
/// ```
/// # use cri_probe::container::ContainerID;
/// let container_id = ContainerID::new("4f2a9c0e").unwrap();
/// assert_eq!(container_id.as_ref(), "4f2a9c0e");
/// assert!(ContainerID::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty or longer
    /// than [`CONTAINER_ID_MAX_LEN`].
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > CONTAINER_ID_MAX_LEN {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settings shared by every container of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    pub host_id: String,
    /// Reduce the recorded command line to the executable.
    pub no_command_line_arguments: bool,
    /// Leave environment variables out of the node.
    pub no_environment_variables: bool,
}

/// Addresses of a container as reported in its node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ips: Vec<String>,
    /// `<host_id>;<ip>` for host-scoped addresses, `;<ip>` otherwise.
    pub ips_with_scopes: Vec<String>,
}

#[derive(Debug)]
struct StatsCollection {
    done: oneshot::Sender<()>,
    generation: u64,
}

#[derive(Debug)]
pub struct Container {
    id: ContainerID,
    created_at: Option<DateTime<Utc>>,
    image: String,
    host_id: String,
    base_node: Node,
    inner: RwLock<ContainerDetail>,
    stats: Arc<RwLock<StatsBuffer>>,
    collection: Arc<Mutex<Option<StatsCollection>>>,
    generation: AtomicU64,
}

impl Container {
    pub fn new(detail: ContainerDetail, options: &ContainerOptions) -> Result<Self> {
        let id = ContainerID::new(&detail.id)?;
        let image = trim_image_id(&detail.image_ref).to_owned();
        let base_node = base_node(&detail, &image, options);

        Ok(Self {
            id,
            created_at: detail.created_at,
            image,
            host_id: options.host_id.clone(),
            base_node,
            inner: RwLock::new(detail),
            stats: Arc::new(RwLock::new(StatsBuffer::new())),
            collection: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Image identifier without the digest scheme.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.read().pid
    }

    pub fn hostname(&self) -> String {
        self.read().hostname.clone()
    }

    pub fn state(&self) -> ContainerState {
        self.read().state
    }

    pub fn state_string(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn has_tty(&self) -> bool {
        self.read().tty
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.read().network_mode.clone()
    }

    pub fn ip_addresses(&self) -> Vec<IpAddr> {
        self.read().ip_addresses.clone()
    }

    /// Replaces the mutable state. ID, creation time and base projection stay untouched.
    pub fn update_state(&self, detail: ContainerDetail) {
        if detail.id != self.id.as_ref() {
            log::warn!(
                "ignoring id `{}` in state update of container {}",
                detail.id,
                self.id
            );
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = detail;
    }

    /// Own addresses without loopback, tagged as host-scoped when they appear in `local_addresses`.
    pub fn network_info(&self, local_addresses: &[IpAddr]) -> NetworkInfo {
        let mut info = NetworkInfo::default();
        for ip in self.read().ip_addresses.iter().filter(|ip| !ip.is_loopback()) {
            info.ips.push(ip.to_string());
            if local_addresses.contains(ip) {
                info.ips_with_scopes.push(format!("{};{ip}", self.host_id));
            } else {
                info.ips_with_scopes.push(format!(";{ip}"));
            }
        }
        info
    }

    /// The container's node: cached base properties plus the current state and metrics.
    pub fn node(&self) -> Node {
        let now = Utc::now();
        let mut node = {
            let inner = self.read();
            let mut node = self
                .base_node
                .clone()
                .with_latest(node::CONTAINER_NAME, inner.name.as_str())
                .with_latest(node::CONTAINER_STATE, inner.state.as_str())
                .with_latest(node::CONTAINER_STATE_HUMAN, human_state(&inner, now));
            if inner.state == ContainerState::Running {
                let uptime = inner
                    .started_at
                    .and_then(|started| (now - started).to_std().ok())
                    .unwrap_or_default();
                node = node
                    .with_latest(node::CONTAINER_UPTIME, uptime.as_secs().to_string())
                    .with_latest(
                        node::CONTAINER_RESTART_COUNT,
                        inner.restart_count.to_string(),
                    )
                    .with_latest(
                        node::CONTAINER_NETWORK_MODE,
                        inner.network_mode.to_string(),
                    );
            }
            node
        };
        for (key, metric) in self.metrics() {
            node = node.with_metric(key, metric);
        }
        node
    }

    /// Memory and CPU series computed from the retained samples.
    pub fn metrics(&self) -> BTreeMap<&'static str, Metric> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        let mut metrics = BTreeMap::new();

        let memory: Vec<MetricSample> = stats
            .samples()
            .filter_map(|s| {
                s.memory_bytes().map(|bytes| MetricSample {
                    timestamp: s.timestamp,
                    value: bytes as f64,
                })
            })
            .collect();
        if !memory.is_empty() {
            let mut metric = Metric::new(memory);
            let limit = stats.latest().and_then(|s| {
                Some(s.memory_bytes()? as f64 + s.memory_available_bytes? as f64)
            });
            if let Some(limit) = limit {
                metric = metric.with_max(limit);
            }
            metrics.insert(node::MEMORY_USAGE, metric);
        }

        let mut cpu = Vec::new();
        let mut previous: Option<&StatsSample> = None;
        for sample in stats.samples() {
            if let Some(percent) = cpu_percent(previous, sample) {
                cpu.push(MetricSample {
                    timestamp: sample.timestamp,
                    value: percent,
                });
            }
            previous = Some(sample);
        }
        if !cpu.is_empty() {
            metrics.insert(node::CPU_TOTAL_USAGE, Metric::new(cpu).with_max(100.0));
        }

        metrics
    }

    pub fn latest_stats(&self) -> Option<StatsSample> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest()
            .copied()
    }

    pub fn is_gathering_stats(&self) -> bool {
        self.collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Starts a stats collection unless one is already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_gathering_stats(&self, gatherer: Arc<dyn StatsGatherer>) {
        let mut slot = self
            .collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (samples_tx, mut samples_rx) = mpsc::channel(STATS_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        *slot = Some(StatsCollection {
            done: done_tx,
            generation,
        });
        drop(slot);

        let request = StatsRequest {
            container_id: self.id.to_string(),
            samples: samples_tx,
            done: done_rx,
        };
        let id = self.id.clone();
        tokio::spawn(async move {
            match gatherer.stats(request).await {
                Ok(()) => log::debug!("stats of container {id} ended"),
                Err(err) => log::warn!("stats of container {id} failed: {err}"),
            }
        });

        let id = self.id.clone();
        let stats = Arc::clone(&self.stats);
        let collection = Arc::clone(&self.collection);
        tokio::spawn(async move {
            let mut warned = false;
            while let Some(sample) = samples_rx.recv().await {
                let evicted = stats
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(sample);
                if evicted.is_some() {
                    if warned {
                        log::trace!("container {id}: dropped oldest stats sample");
                    } else {
                        log::warn!(
                            "container {id}: stats buffer full, dropping oldest samples"
                        );
                        warned = true;
                    }
                }
            }

            // Stream ended; leave the slot free for a restart unless a newer collection took it.
            let mut slot = collection.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|c| c.generation == generation) {
                *slot = None;
            }
        });
    }

    /// Signals the active stats collection to end. No-op when none is active.
    pub fn stop_gathering_stats(&self) {
        let collection = self
            .collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(collection) = collection {
            // The producer may already be gone.
            let _ = collection.done.send(());
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ContainerDetail> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn base_node(detail: &ContainerDetail, image: &str, options: &ContainerOptions) -> Node {
    let command = if options.no_command_line_arguments {
        detail.command.first().cloned().unwrap_or_default()
    } else {
        detail.command.join(" ")
    };

    let mut node = Node::new(report::make_container_node_id(&detail.id), report::CONTAINER)
        .with_latest(node::CONTAINER_ID, detail.id.as_str())
        .with_latest(node::CONTAINER_NAME, detail.name.as_str())
        .with_latest(node::CONTAINER_COMMAND, command)
        .with_latest(node::CONTAINER_IMAGE_ID, image)
        .with_latest(node::CONTAINER_IMAGE_NAME, detail.image.as_str())
        .with_latest(node::CONTAINER_HOSTNAME, detail.hostname.as_str())
        .with_prefixed_latests(node::LABEL_PREFIX, &detail.labels);
    if let Some(created) = detail.created_at {
        node = node.with_latest(node::CONTAINER_CREATED, created.to_rfc3339());
    }
    if !options.no_environment_variables {
        node = node.with_prefixed_latests(node::ENV_PREFIX, &crate::runtime::cri::env_map(&detail.env));
    }
    if !image.is_empty() {
        node = node.with_parent(
            report::CONTAINER_IMAGE,
            report::make_container_image_node_id(image),
        );
    }
    node
}

fn human_state(detail: &ContainerDetail, now: DateTime<Utc>) -> String {
    let since = |at: Option<DateTime<Utc>>| {
        node::human_duration(
            at.and_then(|at| (now - at).to_std().ok())
                .unwrap_or_default(),
        )
    };
    match detail.state {
        ContainerState::Running => format!("Up {}", since(detail.started_at)),
        ContainerState::Paused => format!("Up {} (Paused)", since(detail.started_at)),
        ContainerState::Exited => format!(
            "Exited ({}) {} ago",
            detail.exit_code,
            since(detail.finished_at)
        ),
        ContainerState::Created => "Created".to_owned(),
        ContainerState::Deleted => "Deleted".to_owned(),
        ContainerState::Unknown => "Unknown".to_owned(),
    }
}

/// CPU usage in percent of one core.
fn cpu_percent(previous: Option<&StatsSample>, sample: &StatsSample) -> Option<f64> {
    if let Some(nano_cores) = sample.cpu_usage_nano_cores {
        return Some(nano_cores as f64 / 1e7);
    }

    let previous = previous?;
    let used = sample
        .cpu_usage_core_nanos?
        .checked_sub(previous.cpu_usage_core_nanos?)?;
    let elapsed = (sample.timestamp - previous.timestamp).num_nanoseconds()?;
    (elapsed > 0).then(|| used as f64 / elapsed as f64 * 100.0)
}
