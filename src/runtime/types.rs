use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// Last observed lifecycle state of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Exited,
    Deleted,
    #[default]
    Unknown,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Exited => "exited",
            ContainerState::Deleted => "deleted",
            ContainerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network namespace mode of a container, as `host`, `container:<id>` or anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkMode {
    Host,
    Container(String),
    Other(String),
}

impl NetworkMode {
    pub fn parse(mode: &str) -> Self {
        if mode == "host" {
            return NetworkMode::Host;
        }
        match mode.strip_prefix("container:") {
            Some(id) => NetworkMode::Container(id.to_owned()),
            None => NetworkMode::Other(mode.to_owned()),
        }
    }
}

impl Default for NetworkMode {
    fn default() -> Self {
        NetworkMode::Other(String::new())
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Host => f.write_str("host"),
            NetworkMode::Container(id) => write!(f, "container:{id}"),
            NetworkMode::Other(mode) => f.write_str(mode),
        }
    }
}

/// One entry of a container listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub pod_sandbox_id: String,
    pub name: String,
    pub image: String,
    pub image_ref: String,
    pub state: ContainerState,
    pub created_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
}

/// Full status of a single container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    pub pod_sandbox_id: String,
    /// Human image name, e.g. `docker.io/library/nginx:1.27`.
    pub image: String,
    /// Image identifier, possibly with a `sha256:` prefix.
    pub image_ref: String,
    pub state: ContainerState,
    pub pid: Option<u32>,
    pub hostname: String,
    pub restart_count: u32,
    pub network_mode: NetworkMode,
    pub labels: HashMap<String, String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub command: Vec<String>,
    pub tty: bool,
    pub ip_addresses: Vec<IpAddr>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: i32,
}

impl ContainerDetail {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// The parts of a pod sandbox status the registry cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxStatus {
    pub id: String,
    pub ip_addresses: Vec<IpAddr>,
    pub host_network: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub size: u64,
    pub annotations: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_mode_parse() {
        assert_eq!(NetworkMode::parse("host"), NetworkMode::Host);
        assert_eq!(
            NetworkMode::parse("container:abc"),
            NetworkMode::Container("abc".to_owned())
        );
        assert_eq!(
            NetworkMode::parse("bridge"),
            NetworkMode::Other("bridge".to_owned())
        );
        assert_eq!(NetworkMode::parse("container:abc").to_string(), "container:abc");
    }
}
