//! Projects the registry into a [`Report`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::container::{Container, node};
use crate::image;
use crate::registry::{Registry, unique_prefix_match};
use crate::report::{self, MetadataTemplate, Node, Report};

pub mod host;
mod network;

pub use host::{HostNetwork, ProcHostNetwork, Subnet};
pub use network::{MAX_DELEGATION_DEPTH, ResolvedNetwork, resolve_network};

pub const LOCAL_NETWORKS: &str = "local_networks";
pub const SERVICE_NAME: &str = "service_name";
pub const SERVICE_NAMESPACE: &str = "service_namespace";
pub const SERVICE_IP: &str = "service_ip";

pub struct Reporter {
    registry: Registry,
    host_id: String,
    host: Arc<dyn HostNetwork>,
}

impl Reporter {
    pub fn new(registry: Registry, host_id: impl Into<String>, host: Arc<dyn HostNetwork>) -> Self {
        Self {
            registry,
            host_id: host_id.into(),
            host,
        }
    }

    pub fn name(&self) -> &'static str {
        "CRI"
    }

    pub fn report(&self) -> Report {
        let local_addresses = self.host.local_addresses();
        let mut report = Report::new();
        report.container = report.container.with_metadata_templates(container_templates());
        report.container_image = report
            .container_image
            .with_metadata_templates(image_templates());
        report.service = report.service.with_metadata_templates(service_templates());

        let mut containers = BTreeMap::new();
        self.registry.walk_containers(|c| {
            containers.insert(c.id().to_string(), Arc::clone(c));
        });

        let mut referenced_images = HashSet::new();
        for container in containers.values() {
            let resolved = resolve_network(
                container,
                |target| lookup(&containers, target),
                &self.host_id,
                &local_addresses,
            );
            report.container.add_node(container_node(container, resolved));
            if !container.image().is_empty() {
                referenced_images.insert(container.image().to_owned());
            }
        }

        self.registry.walk_images(|image| {
            if referenced_images.contains(&image.id) {
                report.container_image.add_node(image.node());
            }
        });

        let subnets: Vec<String> = self
            .host
            .local_subnets()
            .iter()
            .map(ToString::to_string)
            .collect();
        report.overlay.add_node(
            Node::new(report::make_overlay_node_id(&self.host_id), report::OVERLAY)
                .with_set(LOCAL_NETWORKS, subnets),
        );

        log::trace!(
            "{} report: {} containers, {} images",
            self.name(),
            report.container.len(),
            report.container_image.len()
        );
        report
    }
}

fn container_node(container: &Container, network: ResolvedNetwork) -> Node {
    let mut node = container.node().with_latest(
        node::IN_HOST_NETWORK,
        network.in_host_network.to_string(),
    );
    if !network.ips.is_empty() {
        node = node
            .with_set(node::CONTAINER_IPS, network.ips)
            .with_set(node::CONTAINER_IPS_WITH_SCOPES, network.ips_with_scopes);
    }
    node
}

/// Exact ID match, else the single container whose ID starts with `target`.
fn lookup(containers: &BTreeMap<String, Arc<Container>>, target: &str) -> Option<Arc<Container>> {
    containers
        .get(target)
        .or_else(|| unique_prefix_match(containers, target))
        .cloned()
}

fn container_templates() -> [MetadataTemplate; 8] {
    [
        MetadataTemplate::new(node::CONTAINER_ID, "ID", 1),
        MetadataTemplate::new(node::CONTAINER_STATE_HUMAN, "State", 2),
        MetadataTemplate::new(node::CONTAINER_COMMAND, "Command", 3),
        MetadataTemplate::new(node::CONTAINER_IMAGE_NAME, "Image", 4),
        MetadataTemplate::new(node::CONTAINER_HOSTNAME, "Hostname", 5),
        MetadataTemplate::new(node::CONTAINER_UPTIME, "Uptime", 6),
        MetadataTemplate::new(node::CONTAINER_RESTART_COUNT, "Restart #", 7),
        MetadataTemplate::new(node::CONTAINER_IPS, "IPs", 8),
    ]
}

fn image_templates() -> [MetadataTemplate; 3] {
    [
        MetadataTemplate::new(image::IMAGE_ID, "Image ID", 1),
        MetadataTemplate::new(image::IMAGE_NAME, "Image name", 2),
        MetadataTemplate::new(image::IMAGE_SIZE, "Size", 3),
    ]
}

fn service_templates() -> [MetadataTemplate; 3] {
    [
        MetadataTemplate::new(SERVICE_NAME, "Name", 1),
        MetadataTemplate::new(SERVICE_NAMESPACE, "Namespace", 2),
        MetadataTemplate::new(SERVICE_IP, "Internal IP", 3),
    ]
}
