//! [`RuntimeClient`] over the CRI v1 gRPC services.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tonic::transport::Channel;

use super::{
    ClientFactory, ContainerDetail, ContainerState, ContainerSummary, Error, ImageSummary,
    NetworkMode, Result, RuntimeClient, SandboxStatus,
};
use crate::container::{StatsGatherer, StatsRequest, StatsSample};
use crate::cri_api::v1 as cri;
use crate::cri_api::v1::image_service_client::ImageServiceClient;
use crate::cri_api::v1::runtime_service_client::RuntimeServiceClient;
use crate::error::ResultOkLogExt;
use crate::grpc::{self, Endpoint};

/// How often a running stats collection polls `ContainerStats`.
const STATS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Key of the JSON document in a verbose `ContainerStatus` response.
const VERBOSE_INFO_KEY: &str = "info";

#[derive(Debug, Clone)]
pub struct CriClient {
    runtime: RuntimeServiceClient<Channel>,
    images: ImageServiceClient<Channel>,
}

impl CriClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            runtime: RuntimeServiceClient::new(channel.clone()),
            images: ImageServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl RuntimeClient for CriClient {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let response = self
            .runtime
            .clone()
            .list_containers(cri::ListContainersRequest { filter: None })
            .await
            .map_err(|status| Error::rpc("ListContainers", status))?
            .into_inner();

        Ok(response
            .containers
            .into_iter()
            .map(container_summary)
            .collect())
    }

    async fn container_status(&self, id: &str) -> Result<ContainerDetail> {
        let response = self
            .runtime
            .clone()
            .container_status(cri::ContainerStatusRequest {
                container_id: id.to_owned(),
                verbose: true,
            })
            .await
            .map_err(|status| Error::rpc("ContainerStatus", status))?
            .into_inner();

        let status = response
            .status
            .ok_or(Error::EmptyResponse("ContainerStatus"))?;
        let mut detail = container_detail(status);
        apply_verbose_info(id, &response.info, &mut detail);

        Ok(detail)
    }

    async fn pod_sandbox_status(&self, sandbox_id: &str, verbose: bool) -> Result<SandboxStatus> {
        let response = self
            .runtime
            .clone()
            .pod_sandbox_status(cri::PodSandboxStatusRequest {
                pod_sandbox_id: sandbox_id.to_owned(),
                verbose,
            })
            .await
            .map_err(|status| Error::rpc("PodSandboxStatus", status))?
            .into_inner();

        let status = response
            .status
            .ok_or(Error::EmptyResponse("PodSandboxStatus"))?;

        Ok(sandbox_status(status))
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let response = self
            .images
            .clone()
            .list_images(cri::ListImagesRequest { filter: None })
            .await
            .map_err(|status| Error::rpc("ListImages", status))?
            .into_inner();

        Ok(response
            .images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
                repo_digests: image.repo_digests,
                size: image.size,
                annotations: image.spec.map(|spec| spec.annotations).unwrap_or_default(),
            })
            .collect())
    }

    async fn stop_container(&self, id: &str, timeout: i64) -> Result<()> {
        self.runtime
            .clone()
            .stop_container(cri::StopContainerRequest {
                container_id: id.to_owned(),
                timeout,
            })
            .await
            .map_err(|status| Error::rpc("StopContainer", status))?;

        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.runtime
            .clone()
            .remove_container(cri::RemoveContainerRequest {
                container_id: id.to_owned(),
            })
            .await
            .map_err(|status| Error::rpc("RemoveContainer", status))?;

        Ok(())
    }

    fn stats_gatherer(&self) -> Arc<dyn StatsGatherer> {
        Arc::new(CriStatsGatherer {
            runtime: self.runtime.clone(),
            interval: STATS_POLL_INTERVAL,
        })
    }
}

/// Connects [`CriClient`]s to unix socket endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriClientFactory;

#[async_trait]
impl ClientFactory for CriClientFactory {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RuntimeClient>> {
        let channel = grpc::channel_for_endpoint(endpoint).await?;

        Ok(Arc::new(CriClient::new(channel)))
    }
}

/// Polls `ContainerStats` until the request is cancelled or the container is gone.
#[derive(Debug, Clone)]
struct CriStatsGatherer {
    runtime: RuntimeServiceClient<Channel>,
    interval: Duration,
}

#[async_trait]
impl StatsGatherer for CriStatsGatherer {
    async fn stats(&self, mut request: StatsRequest) -> Result<()> {
        let mut client = self.runtime.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut request.done => return Ok(()),
                _ = ticker.tick() => {}
            }

            let response = client
                .container_stats(cri::ContainerStatsRequest {
                    container_id: request.container_id.clone(),
                })
                .await;
            let stats = match response {
                Ok(response) => response.into_inner().stats,
                Err(status) if status.code() == tonic::Code::NotFound => {
                    log::debug!("container {} is gone, ending stats", request.container_id);
                    return Ok(());
                }
                Err(status) => return Err(Error::rpc("ContainerStats", status)),
            };
            let Some(stats) = stats else {
                continue;
            };

            if request.samples.send(stats_sample(stats)).await.is_err() {
                return Ok(());
            }
        }
    }
}

fn timestamp(nanos: i64) -> Option<DateTime<Utc>> {
    (nanos != 0).then(|| DateTime::from_timestamp_nanos(nanos))
}

fn container_state(state: cri::ContainerState) -> ContainerState {
    match state {
        cri::ContainerState::ContainerCreated => ContainerState::Created,
        cri::ContainerState::ContainerRunning => ContainerState::Running,
        cri::ContainerState::ContainerExited => ContainerState::Exited,
        cri::ContainerState::ContainerUnknown => ContainerState::Unknown,
    }
}

fn image_name(spec: Option<&cri::ImageSpec>) -> String {
    spec.map(|spec| {
        if spec.user_specified_image.is_empty() {
            spec.image.clone()
        } else {
            spec.user_specified_image.clone()
        }
    })
    .unwrap_or_default()
}

fn container_summary(container: cri::Container) -> ContainerSummary {
    let state = container_state(container.state());
    let image_ref = if container.image_id.is_empty() {
        container.image_ref
    } else {
        container.image_id
    };

    ContainerSummary {
        name: container.metadata.map(|m| m.name).unwrap_or_default(),
        image: image_name(container.image.as_ref()),
        image_ref,
        state,
        created_at: timestamp(container.created_at),
        labels: container.labels,
        pod_sandbox_id: container.pod_sandbox_id,
        id: container.id,
    }
}

fn container_detail(status: cri::ContainerStatus) -> ContainerDetail {
    let state = container_state(status.state());
    let (name, restart_count) = status
        .metadata
        .map(|m| (m.name, m.attempt))
        .unwrap_or_default();
    let image_ref = if status.image_id.is_empty() {
        status.image_ref
    } else {
        status.image_id
    };

    ContainerDetail {
        name,
        image: image_name(status.image.as_ref()),
        image_ref,
        state,
        restart_count,
        labels: status.labels,
        created_at: timestamp(status.created_at),
        started_at: timestamp(status.started_at),
        finished_at: timestamp(status.finished_at),
        exit_code: status.exit_code,
        id: status.id,
        ..ContainerDetail::default()
    }
}

fn sandbox_status(status: cri::PodSandboxStatus) -> SandboxStatus {
    let host_network = status
        .linux
        .as_ref()
        .and_then(|linux| linux.namespaces.as_ref())
        .and_then(|ns| ns.options.as_ref())
        .is_some_and(|options| options.network() == cri::NamespaceMode::Node);

    let mut ip_addresses = Vec::new();
    if let Some(network) = status.network {
        let additional = network.additional_ips.into_iter().map(|ip| ip.ip);
        for raw in std::iter::once(network.ip).chain(additional) {
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<IpAddr>() {
                Ok(ip) => ip_addresses.push(ip),
                Err(_) => log::debug!("sandbox {} reported invalid ip `{raw}`", status.id),
            }
        }
    }

    SandboxStatus {
        id: status.id,
        ip_addresses,
        host_network,
    }
}

fn stats_sample(stats: cri::ContainerStats) -> StatsSample {
    let cpu = stats.cpu.unwrap_or_default();
    let memory = stats.memory.unwrap_or_default();
    let timestamp = [cpu.timestamp, memory.timestamp]
        .into_iter()
        .find(|ts| *ts != 0)
        .map(DateTime::from_timestamp_nanos)
        .unwrap_or_else(Utc::now);

    StatsSample {
        timestamp,
        cpu_usage_core_nanos: cpu.usage_core_nano_seconds.map(|v| v.value),
        cpu_usage_nano_cores: cpu.usage_nano_cores.map(|v| v.value),
        memory_working_set_bytes: memory.working_set_bytes.map(|v| v.value),
        memory_usage_bytes: memory.usage_bytes.map(|v| v.value),
        memory_available_bytes: memory.available_bytes.map(|v| v.value),
    }
}

/// The subset of the runtime's verbose container info we read.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerboseInfo {
    #[serde(default)]
    pid: u32,
    #[serde(default)]
    runtime_spec: Option<RuntimeSpec>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeSpec {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    domainname: String,
    #[serde(default)]
    process: Option<ProcessSpec>,
    #[serde(default)]
    linux: Option<LinuxSpec>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ProcessSpec {
    #[serde(default)]
    terminal: bool,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct LinuxSpec {
    #[serde(default)]
    namespaces: Vec<NamespaceSpec>,
}

#[derive(Debug, serde::Deserialize)]
struct NamespaceSpec {
    #[serde(rename = "type")]
    kind: String,
}

impl VerboseInfo {
    fn apply(self, detail: &mut ContainerDetail) {
        detail.pid = (self.pid != 0).then_some(self.pid);

        let Some(spec) = self.runtime_spec else {
            return;
        };
        detail.hostname = if spec.domainname.is_empty() {
            spec.hostname
        } else {
            format!("{}.{}", spec.hostname, spec.domainname)
        };
        if let Some(process) = spec.process {
            detail.tty = process.terminal;
            detail.command = process.args;
            detail.env = process.env;
        }
        // Without its own network namespace the container shares the host's.
        let own_netns = spec
            .linux
            .is_some_and(|linux| linux.namespaces.iter().any(|ns| ns.kind == "network"));
        detail.network_mode = if own_netns {
            NetworkMode::Other("pod".to_owned())
        } else {
            NetworkMode::Host
        };
    }
}

/// Fills the fields only present in the verbose info. A malformed document
/// leaves `detail` as the plain status reported it.
fn apply_verbose_info(id: &str, info: &HashMap<String, String>, detail: &mut ContainerDetail) {
    let Some(raw) = info.get(VERBOSE_INFO_KEY) else {
        log::debug!("container {id} has no verbose info");
        return;
    };
    let parsed = serde_json::from_str::<VerboseInfo>(raw).map_err(|source| Error::VerboseInfo {
        id: id.to_owned(),
        source,
    });
    if let Some(verbose) = parsed.ok_warn("using container status without verbose info") {
        verbose.apply(detail);
    }
}

/// Splits `KEY=value` pairs into a map. Entries without `=` map to an empty value.
pub(crate) fn env_map(env: &[String]) -> HashMap<String, String> {
    env.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (entry.clone(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERBOSE: &str = r#"{
        "sandboxID": "sb1",
        "pid": 4242,
        "runtimeSpec": {
            "hostname": "web",
            "domainname": "cluster.local",
            "process": {
                "terminal": true,
                "args": ["nginx", "-g", "daemon off;"],
                "env": ["PATH=/usr/bin", "EMPTY"]
            },
            "linux": {
                "namespaces": [{"type": "pid"}, {"type": "network", "path": "/proc/1/ns/net"}]
            }
        }
    }"#;

    #[test]
    fn test_verbose_info_apply() {
        let info: VerboseInfo = serde_json::from_str(VERBOSE).unwrap();
        let mut detail = ContainerDetail::new("abc");
        info.apply(&mut detail);

        assert_eq!(detail.pid, Some(4242));
        assert_eq!(detail.hostname, "web.cluster.local");
        assert!(detail.tty);
        assert_eq!(detail.command, vec!["nginx", "-g", "daemon off;"]);
        assert_eq!(detail.network_mode, NetworkMode::Other("pod".to_owned()));
    }

    #[test]
    fn test_verbose_info_without_netns_is_host() {
        let info: VerboseInfo =
            serde_json::from_str(r#"{"pid": 0, "runtimeSpec": {"hostname": "node", "linux": {"namespaces": []}}}"#)
                .unwrap();
        let mut detail = ContainerDetail::new("abc");
        info.apply(&mut detail);

        assert_eq!(detail.pid, None);
        assert_eq!(detail.hostname, "node");
        assert_eq!(detail.network_mode, NetworkMode::Host);
    }

    #[test]
    fn test_malformed_verbose_info_keeps_status() {
        let mut detail = ContainerDetail {
            state: ContainerState::Running,
            ..ContainerDetail::new("abc")
        };
        let info = HashMap::from([(VERBOSE_INFO_KEY.to_owned(), r#"{"pid": "not a number"#.to_owned())]);
        apply_verbose_info("abc", &info, &mut detail);

        assert_eq!(detail.id, "abc");
        assert_eq!(detail.state, ContainerState::Running);
        assert_eq!(detail.pid, None);

        let info = HashMap::from([(VERBOSE_INFO_KEY.to_owned(), r#"{"pid": 7}"#.to_owned())]);
        apply_verbose_info("abc", &info, &mut detail);
        assert_eq!(detail.pid, Some(7));
    }

    #[test]
    fn test_container_detail_mapping() {
        let status = cri::ContainerStatus {
            id: "abc".to_owned(),
            metadata: Some(cri::ContainerMetadata {
                name: "web".to_owned(),
                attempt: 3,
            }),
            state: cri::ContainerState::ContainerRunning as i32,
            created_at: 1_700_000_000_000_000_000,
            image: Some(cri::ImageSpec {
                image: "nginx:1.27".to_owned(),
                ..Default::default()
            }),
            image_ref: "docker.io/library/nginx@sha256:aaa".to_owned(),
            image_id: "sha256:f00".to_owned(),
            ..Default::default()
        };

        let detail = container_detail(status);
        assert_eq!(detail.id, "abc");
        assert_eq!(detail.name, "web");
        assert_eq!(detail.restart_count, 3);
        assert_eq!(detail.state, ContainerState::Running);
        assert_eq!(detail.image, "nginx:1.27");
        assert_eq!(detail.image_ref, "sha256:f00");
        assert_eq!(
            detail.created_at.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
        assert_eq!(detail.started_at, None);
    }

    #[test]
    fn test_sandbox_status_mapping() {
        let status = cri::PodSandboxStatus {
            id: "sb1".to_owned(),
            network: Some(cri::PodSandboxNetworkStatus {
                ip: "10.0.0.5".to_owned(),
                additional_ips: vec![
                    cri::PodIp { ip: "fd00::5".to_owned() },
                    cri::PodIp { ip: "garbage".to_owned() },
                ],
            }),
            linux: Some(cri::LinuxPodSandboxStatus {
                namespaces: Some(cri::Namespace {
                    options: Some(cri::NamespaceOption {
                        network: cri::NamespaceMode::Node as i32,
                        ..Default::default()
                    }),
                }),
            }),
            ..Default::default()
        };

        let sandbox = sandbox_status(status);
        assert!(sandbox.host_network);
        assert_eq!(
            sandbox.ip_addresses,
            vec![
                "10.0.0.5".parse::<IpAddr>().unwrap(),
                "fd00::5".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_env_map() {
        let env = env_map(&["A=1".to_owned(), "B=x=y".to_owned(), "C".to_owned()]);
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("x=y"));
        assert_eq!(env.get("C").map(String::as_str), Some(""));
    }
}
