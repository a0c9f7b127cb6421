//! In-memory runtime for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    ClientFactory, ContainerDetail, ContainerSummary, Error, ImageSummary, Result, RuntimeClient,
    SandboxStatus,
};
use crate::container::{StatsGatherer, StatsRequest, StatsSample};
use crate::grpc::Endpoint;

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<String, ContainerDetail>,
    /// Listed, but gone by the time their status is requested.
    vanishing: HashSet<String>,
    /// Status lookups fail with `Unavailable`.
    unavailable_status: HashSet<String>,
    sandboxes: HashMap<String, SandboxStatus>,
    images: Vec<ImageSummary>,
    fail_lists: bool,
    end_stats_immediately: bool,
    active_stats: usize,
    stopped: Vec<String>,
    removed: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn upsert_container(&self, detail: ContainerDetail) {
        self.state().containers.insert(detail.id.clone(), detail);
    }

    pub(crate) fn remove(&self, id: &str) {
        self.state().containers.remove(id);
    }

    /// Keeps `id` in listings while its status lookups fail with `NotFound`.
    pub(crate) fn vanish(&self, id: &str) {
        let mut state = self.state();
        state.containers.remove(id);
        state.vanishing.insert(id.to_owned());
    }

    pub(crate) fn fail_status(&self, id: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.unavailable_status.insert(id.to_owned());
        } else {
            state.unavailable_status.remove(id);
        }
    }

    pub(crate) fn set_sandbox(&self, sandbox: SandboxStatus) {
        self.state().sandboxes.insert(sandbox.id.clone(), sandbox);
    }

    pub(crate) fn set_images(&self, images: Vec<ImageSummary>) {
        self.state().images = images;
    }

    pub(crate) fn fail_lists(&self, fail: bool) {
        self.state().fail_lists = fail;
    }

    pub(crate) fn end_stats_immediately(&self, end: bool) {
        self.state().end_stats_immediately = end;
    }

    pub(crate) fn active_stats(&self) -> usize {
        self.state().active_stats
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.state().stopped.clone()
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }
}

fn unavailable(operation: &'static str) -> Error {
    Error::rpc(operation, tonic::Status::unavailable("runtime is down"))
}

fn not_found(operation: &'static str, id: &str) -> Error {
    Error::rpc(operation, tonic::Status::not_found(format!("{id} not found")))
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let state = self.state();
        if state.fail_lists {
            return Err(unavailable("ListContainers"));
        }
        let mut listed: Vec<ContainerSummary> = state
            .containers
            .values()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                pod_sandbox_id: c.pod_sandbox_id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                image_ref: c.image_ref.clone(),
                state: c.state,
                created_at: c.created_at,
                labels: c.labels.clone(),
            })
            .collect();
        listed.extend(state.vanishing.iter().map(|id| ContainerSummary {
            id: id.clone(),
            ..ContainerSummary::default()
        }));
        Ok(listed)
    }

    async fn container_status(&self, id: &str) -> Result<ContainerDetail> {
        let state = self.state();
        if state.unavailable_status.contains(id) {
            return Err(unavailable("ContainerStatus"));
        }
        state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("ContainerStatus", id))
    }

    async fn pod_sandbox_status(&self, sandbox_id: &str, _verbose: bool) -> Result<SandboxStatus> {
        self.state()
            .sandboxes
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| not_found("PodSandboxStatus", sandbox_id))
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let state = self.state();
        if state.fail_lists {
            return Err(unavailable("ListImages"));
        }
        Ok(state.images.clone())
    }

    async fn stop_container(&self, id: &str, _timeout: i64) -> Result<()> {
        self.state().stopped.push(id.to_owned());
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.state().removed.push(id.to_owned());
        Ok(())
    }

    fn stats_gatherer(&self) -> Arc<dyn StatsGatherer> {
        Arc::new(self.clone())
    }
}

/// Sends a single sample, then idles until cancelled.
#[async_trait]
impl StatsGatherer for FakeRuntime {
    async fn stats(&self, request: StatsRequest) -> Result<()> {
        if self.state().end_stats_immediately {
            return Ok(());
        }
        self.state().active_stats += 1;

        let mut sample = StatsSample::new(Utc::now());
        sample.memory_working_set_bytes = Some(64 << 20);
        sample.memory_available_bytes = Some(64 << 20);
        sample.cpu_usage_nano_cores = Some(50_000_000);
        if request.samples.send(sample).await.is_ok() {
            let _ = request.done.await;
        }

        self.state().active_stats -= 1;
        Ok(())
    }
}

/// Hands out clones of one [`FakeRuntime`], or refuses to connect.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeFactory {
    pub(crate) runtime: FakeRuntime,
    pub(crate) refuse: bool,
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RuntimeClient>> {
        if self.refuse {
            return Err(Error::Endpoint(crate::grpc::Error::SocketUnreachable {
                path: endpoint.path().to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }));
        }
        Ok(Arc::new(self.runtime.clone()))
    }
}
