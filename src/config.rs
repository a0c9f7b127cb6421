//! Agent configuration read from `CRI_PROBE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::container::ContainerOptions;
use crate::grpc::{self, Endpoint};
use crate::registry::RegistryOptions;

pub const ENDPOINT_VAR: &str = "CRI_PROBE_ENDPOINT";
pub const POLL_INTERVAL_VAR: &str = "CRI_PROBE_POLL_INTERVAL_SECS";
pub const PUBLISH_INTERVAL_VAR: &str = "CRI_PROBE_PUBLISH_INTERVAL_SECS";
pub const COLLECT_STATS_VAR: &str = "CRI_PROBE_COLLECT_STATS";
pub const NO_COMMAND_LINE_ARGUMENTS_VAR: &str = "CRI_PROBE_NO_COMMAND_LINE_ARGUMENTS";
pub const NO_ENVIRONMENT_VARIABLES_VAR: &str = "CRI_PROBE_NO_ENVIRONMENT_VARIABLES";
pub const HOST_ID_VAR: &str = "CRI_PROBE_HOST_ID";
pub const PROC_ROOT_VAR: &str = "CRI_PROBE_PROC_ROOT";
pub const LISTEN_ADDR_VAR: &str = "CRI_PROBE_LISTEN_ADDR";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 15;
const DEFAULT_HOST_ID: &str = "localhost";
const DEFAULT_PROC_ROOT: &str = "/proc";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:4041";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`{var}` must be a positive number of seconds, got `{value}`")]
    InvalidNumber { var: &'static str, value: String },
    #[error("`{var}` must be a boolean, got `{value}`")]
    InvalidBool { var: &'static str, value: String },
    #[error("`{0}` must not be zero")]
    ZeroInterval(&'static str),
    #[error("`{var}` is not a socket address: `{value}`")]
    InvalidAddress { var: &'static str, value: String },
    #[error("invalid runtime endpoint: {0}")]
    Endpoint(#[from] grpc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub endpoint: Endpoint,
    pub poll_interval: Duration,
    pub publish_interval: Duration,
    pub collect_stats: bool,
    pub no_command_line_arguments: bool,
    pub no_environment_variables: bool,
    pub host_id: String,
    pub proc_root: PathBuf,
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = match lookup(ENDPOINT_VAR) {
            Some(raw) => Endpoint::parse(&raw)?,
            None => Endpoint::default(),
        };

        let host_id = lookup(HOST_ID_VAR)
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(default_host_id);

        let listen_addr = lookup(LISTEN_ADDR_VAR).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned());
        let listen_addr = listen_addr.parse().map_err(|_| Error::InvalidAddress {
            var: LISTEN_ADDR_VAR,
            value: listen_addr.clone(),
        })?;

        Ok(Self {
            endpoint,
            poll_interval: interval(&lookup, POLL_INTERVAL_VAR, DEFAULT_POLL_INTERVAL_SECS)?,
            publish_interval: interval(&lookup, PUBLISH_INTERVAL_VAR, DEFAULT_PUBLISH_INTERVAL_SECS)?,
            collect_stats: flag(&lookup, COLLECT_STATS_VAR, true)?,
            no_command_line_arguments: flag(&lookup, NO_COMMAND_LINE_ARGUMENTS_VAR, false)?,
            no_environment_variables: flag(&lookup, NO_ENVIRONMENT_VARIABLES_VAR, false)?,
            host_id,
            proc_root: lookup(PROC_ROOT_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT)),
            listen_addr,
        })
    }

    pub fn container_options(&self) -> ContainerOptions {
        ContainerOptions {
            host_id: self.host_id.clone(),
            no_command_line_arguments: self.no_command_line_arguments,
            no_environment_variables: self.no_environment_variables,
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            endpoint: self.endpoint.clone(),
            poll_interval: self.poll_interval,
            collect_stats: self.collect_stats,
            container: self.container_options(),
        }
    }
}

fn default_host_id() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|name| name.trim().to_owned())
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST_ID.to_owned())
}

fn interval(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration> {
    let Some(raw) = lookup(var) else {
        return Ok(Duration::from_secs(default));
    };
    let secs: u64 = raw.trim().parse().map_err(|_| Error::InvalidNumber {
        var,
        value: raw.clone(),
    })?;
    if secs == 0 {
        return Err(Error::ZeroInterval(var));
    }

    Ok(Duration::from_secs(secs))
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: bool) -> Result<bool> {
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidBool { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[(HOST_ID_VAR, "node-1")])).unwrap();
        assert_eq!(config.endpoint, Endpoint::default());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.publish_interval, Duration::from_secs(15));
        assert!(config.collect_stats);
        assert!(!config.no_command_line_arguments);
        assert!(!config.no_environment_variables);
        assert_eq!(config.host_id, "node-1");
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
        assert_eq!(config.listen_addr, "0.0.0.0:4041".parse().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            (ENDPOINT_VAR, "unix:///run/crio/crio.sock"),
            (POLL_INTERVAL_VAR, "2"),
            (COLLECT_STATS_VAR, "false"),
            (NO_COMMAND_LINE_ARGUMENTS_VAR, "1"),
            (NO_ENVIRONMENT_VARIABLES_VAR, "yes"),
            (HOST_ID_VAR, "node-2"),
            (PROC_ROOT_VAR, "/host/proc"),
            (LISTEN_ADDR_VAR, "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint.to_string(), "unix:///run/crio/crio.sock");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(!config.collect_stats);

        let options = config.registry_options();
        assert!(options.container.no_command_line_arguments);
        assert!(options.container.no_environment_variables);
        assert_eq!(options.container.host_id, "node-2");
        assert_eq!(options.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup_from(&[(POLL_INTERVAL_VAR, "soon")])),
            Err(Error::InvalidNumber { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[(PUBLISH_INTERVAL_VAR, "0")])),
            Err(Error::ZeroInterval(PUBLISH_INTERVAL_VAR))
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[(COLLECT_STATS_VAR, "maybe")])),
            Err(Error::InvalidBool { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[(ENDPOINT_VAR, "tcp://localhost:1234")])),
            Err(Error::Endpoint(grpc::Error::UnsupportedScheme { .. }))
        ));
    }
}
