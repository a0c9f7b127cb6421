use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use crate::container::{Container, ContainerID};
use crate::runtime::NetworkMode;

/// Longest `container:<id>` chain followed before giving up.
pub const MAX_DELEGATION_DEPTH: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedNetwork {
    pub ips: Vec<String>,
    pub ips_with_scopes: Vec<String>,
    pub in_host_network: bool,
}

/// Follows network namespace delegation starting at `container`.
///
/// `host` mode yields the host's addresses, any other mode the addresses of the
/// container reached. Cycles, chains longer than [`MAX_DELEGATION_DEPTH`] and
/// missing targets fall back to `container`'s own addresses.
pub fn resolve_network(
    container: &Arc<Container>,
    lookup: impl Fn(&str) -> Option<Arc<Container>>,
    host_id: &str,
    local_addresses: &[IpAddr],
) -> ResolvedNetwork {
    let mut visited: HashSet<ContainerID> = HashSet::new();
    let mut current = Arc::clone(container);

    for _ in 0..=MAX_DELEGATION_DEPTH {
        if !visited.insert(current.id().clone()) {
            log::warn!(
                "network of container {} delegates in a cycle through {}",
                container.id(),
                current.id()
            );
            return own_network(container, local_addresses);
        }

        match current.network_mode() {
            NetworkMode::Host => return host_network(host_id, local_addresses),
            NetworkMode::Container(target) => match lookup(&target) {
                Some(next) => current = next,
                None => {
                    log::debug!(
                        "network target {target} of container {} is unknown",
                        current.id()
                    );
                    return own_network(container, local_addresses);
                }
            },
            NetworkMode::Other(_) => return own_network(&current, local_addresses),
        }
    }

    log::warn!(
        "network delegation of container {} is deeper than {MAX_DELEGATION_DEPTH}",
        container.id()
    );
    own_network(container, local_addresses)
}

fn own_network(container: &Container, local_addresses: &[IpAddr]) -> ResolvedNetwork {
    let info = container.network_info(local_addresses);
    ResolvedNetwork {
        ips: info.ips,
        ips_with_scopes: info.ips_with_scopes,
        in_host_network: false,
    }
}

fn host_network(host_id: &str, local_addresses: &[IpAddr]) -> ResolvedNetwork {
    let ips: Vec<String> = local_addresses
        .iter()
        .filter(|ip| !ip.is_loopback())
        .map(IpAddr::to_string)
        .collect();
    ResolvedNetwork {
        ips_with_scopes: ips.iter().map(|ip| format!("{host_id};{ip}")).collect(),
        ips,
        in_host_network: true,
    }
}
