//! Property keys of container nodes and helpers to render them.

use std::time::Duration;

use crate::report::{self, Node};

pub const CONTAINER_ID: &str = "container_id";
pub const CONTAINER_NAME: &str = "container_name";
pub const CONTAINER_CREATED: &str = "container_created";
pub const CONTAINER_COMMAND: &str = "container_command";
pub const CONTAINER_HOSTNAME: &str = "container_hostname";
pub const CONTAINER_IMAGE_ID: &str = "container_image_id";
pub const CONTAINER_IMAGE_NAME: &str = "container_image_name";
pub const CONTAINER_STATE: &str = "container_state";
pub const CONTAINER_STATE_HUMAN: &str = "container_state_human";
pub const CONTAINER_UPTIME: &str = "container_uptime";
pub const CONTAINER_RESTART_COUNT: &str = "container_restart_count";
pub const CONTAINER_NETWORK_MODE: &str = "container_network_mode";
pub const CONTAINER_IPS: &str = "container_ips";
pub const CONTAINER_IPS_WITH_SCOPES: &str = "container_ips_with_scopes";
pub const IN_HOST_NETWORK: &str = "in_host_network";

pub const LABEL_PREFIX: &str = "label_";
pub const ENV_PREFIX: &str = "env_";

pub const MEMORY_USAGE: &str = "memory_usage";
pub const CPU_TOTAL_USAGE: &str = "cpu_total_usage";

/// Minimal node announcing that a container is gone.
pub fn deleted_node(container_id: &str) -> Node {
    Node::new(report::make_container_node_id(container_id), report::CONTAINER)
        .with_latest(CONTAINER_ID, container_id)
        .with_latest(CONTAINER_STATE, "deleted")
        .with_latest(CONTAINER_STATE_HUMAN, "Deleted")
}

/// Renders a duration the way `docker ps` does, e.g. "About an hour".
pub fn human_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 1 {
        return "Less than a second".to_owned();
    }
    if seconds == 1 {
        return "1 second".to_owned();
    }
    if seconds < 60 {
        return format!("{seconds} seconds");
    }

    let minutes = seconds / 60;
    if minutes == 1 {
        return "About a minute".to_owned();
    }
    if minutes < 60 {
        return format!("{minutes} minutes");
    }

    let hours = (seconds as f64 / 3600.0).round() as u64;
    if hours == 1 {
        return "About an hour".to_owned();
    }
    if hours < 48 {
        return format!("{hours} hours");
    }
    if hours < 24 * 7 * 2 {
        return format!("{} days", hours / 24);
    }
    if hours < 24 * 30 * 2 {
        return format!("{} weeks", hours / 24 / 7);
    }
    if hours < 24 * 365 * 2 {
        return format!("{} months", hours / 24 / 30);
    }

    format!("{} years", hours / 24 / 365)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration() {
        let cases = [
            (0, "Less than a second"),
            (1, "1 second"),
            (45, "45 seconds"),
            (90, "About a minute"),
            (47 * 60, "47 minutes"),
            (3600, "About an hour"),
            (5 * 3600, "5 hours"),
            (3 * 24 * 3600, "3 days"),
            (21 * 24 * 3600, "3 weeks"),
            (90 * 24 * 3600, "3 months"),
            (3 * 365 * 24 * 3600, "3 years"),
        ];
        for (secs, expected) in cases {
            assert_eq!(human_duration(Duration::from_secs(secs)), expected, "{secs}s");
        }
    }

    #[test]
    fn test_deleted_node() {
        let node = deleted_node("abc");
        assert_eq!(node.id, "abc;<container>");
        assert_eq!(node.latest(CONTAINER_STATE), Some("deleted"));
        assert_eq!(node.latest(CONTAINER_ID), Some("abc"));
    }
}
