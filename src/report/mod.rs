//! The topology graph produced by the probe.
//!
//! A [`Report`] bundles one [`Topology`] per node kind (containers, images,
//! overlay, service). Topologies hold [`Node`]s keyed by node ID; nodes carry
//! string properties ("latest"), string sets, parent links and metrics.
//! Everything serializes with serde so a publisher can ship it as JSON.

mod node;
mod topology;

pub use node::{Metric, MetricSample, Node};
pub use topology::{MetadataTemplate, Topology};

/// Topology name of container nodes.
pub const CONTAINER: &str = "container";
/// Topology name of container image nodes.
pub const CONTAINER_IMAGE: &str = "container_image";
/// Topology name of overlay network nodes.
pub const OVERLAY: &str = "overlay";
/// Topology name of service nodes.
pub const SERVICE: &str = "service";

pub fn make_container_node_id(container_id: &str) -> String {
    format!("{container_id};<{CONTAINER}>")
}

pub fn make_container_image_node_id(image_id: &str) -> String {
    format!("{image_id};<{CONTAINER_IMAGE}>")
}

pub fn make_overlay_node_id(host_id: &str) -> String {
    format!("{host_id};<{OVERLAY}>")
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Report {
    pub container: Topology,
    pub container_image: Topology,
    pub overlay: Topology,
    pub service: Topology,
    /// Set on out-of-band single-container updates published between full reports.
    pub shortcut: bool,
}

impl Report {
    pub fn new() -> Self {
        Self {
            container: Topology::new("Containers"),
            container_image: Topology::new("Images"),
            overlay: Topology::new("Overlay"),
            service: Topology::new("Services"),
            shortcut: false,
        }
    }

    /// Wraps a single changed container node into a shortcut report.
    pub fn shortcut(node: Node) -> Self {
        let mut report = Self::new();
        report.container.add_node(node);
        report.shortcut = true;
        report
    }

    pub fn merge(mut self, other: &Report) -> Self {
        self.container = self.container.merge(&other.container);
        self.container_image = self.container_image.merge(&other.container_image);
        self.overlay = self.overlay.merge(&other.overlay);
        self.service = self.service.merge(&other.service);
        self.shortcut = self.shortcut && other.shortcut;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids() {
        assert_eq!(make_container_node_id("abc"), "abc;<container>");
        assert_eq!(make_container_image_node_id("f00"), "f00;<container_image>");
        assert_eq!(make_overlay_node_id("host-1"), "host-1;<overlay>");
    }

    #[test]
    fn test_shortcut_report_contains_single_node() {
        let node = Node::new(make_container_node_id("abc"), CONTAINER)
            .with_latest("container_state", "running");
        let report = Report::shortcut(node.clone());
        assert!(report.shortcut);
        assert_eq!(report.container.len(), 1);
        assert_eq!(report.container.node(&node.id), Some(&node));
        assert!(report.container_image.is_empty());
    }

    #[test]
    fn test_merge_full_report_is_not_shortcut() {
        let shortcut = Report::shortcut(Node::new("a;<container>", CONTAINER));
        let full = Report::new();
        let merged = full.merge(&shortcut);
        assert!(!merged.shortcut);
        assert_eq!(merged.container.len(), 1);
    }
}
