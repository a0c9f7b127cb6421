//! Access to the container runtime.
//!
//! [`RuntimeClient`] is the narrow surface the registry polls. The production
//! implementation in [`cri`] speaks the CRI v1 gRPC API over a unix socket;
//! tests use the in-memory runtime from `fake`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::container::StatsGatherer;
use crate::grpc::Endpoint;

pub mod cri;
mod error;
#[cfg(test)]
pub(crate) mod fake;
mod types;

pub use error::{Error, Result};
pub use types::{
    ContainerDetail, ContainerState, ContainerSummary, ImageSummary, NetworkMode, SandboxStatus,
};

/// One RPC per call. Every call may fail independently.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    async fn container_status(&self, id: &str) -> Result<ContainerDetail>;

    async fn pod_sandbox_status(&self, sandbox_id: &str, verbose: bool) -> Result<SandboxStatus>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// Stops the container, killing it after `timeout` seconds.
    async fn stop_container(&self, id: &str, timeout: i64) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// The gatherer used to stream stats of containers served by this client.
    fn stats_gatherer(&self) -> Arc<dyn StatsGatherer>;
}

/// Creates connected runtime clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RuntimeClient>>;
}
