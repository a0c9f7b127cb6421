//! Host network facts read from procfs.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::error::ResultOkLogExt;

/// Addresses and subnets of the machine the probe runs on.
pub trait HostNetwork: Send + Sync {
    fn local_addresses(&self) -> Vec<IpAddr>;

    fn local_subnets(&self) -> Vec<Subnet>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subnet {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Reads `net/fib_trie` and `net/route` below a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcHostNetwork {
    proc_root: PathBuf,
}

impl ProcHostNetwork {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn read(&self, file: &str) -> Option<String> {
        let path = self.proc_root.join("net").join(file);
        std::fs::read_to_string(&path).ok_warn(format_args!("failed to read {}", path.display()))
    }
}

impl HostNetwork for ProcHostNetwork {
    fn local_addresses(&self) -> Vec<IpAddr> {
        self.read("fib_trie")
            .map(|content| parse_fib_trie(&content).into_iter().map(IpAddr::V4).collect())
            .unwrap_or_default()
    }

    fn local_subnets(&self) -> Vec<Subnet> {
        self.read("route")
            .map(|content| parse_routes(&content))
            .unwrap_or_default()
    }
}

/// Extracts the local IPv4 addresses from `/proc/net/fib_trie`.
///
/// Each local address is a leaf line `|-- <ip>` followed by `/32 host LOCAL`.
pub fn parse_fib_trie(content: &str) -> Vec<Ipv4Addr> {
    let mut addresses = BTreeSet::new();
    let mut leaf = None;
    for line in content.lines() {
        let line = line.trim();
        if let Some(ip) = line.strip_prefix("|-- ") {
            leaf = ip.parse::<Ipv4Addr>().ok();
        } else if line.starts_with("/32 host LOCAL") {
            if let Some(ip) = leaf.take() {
                addresses.insert(ip);
            }
        }
    }
    addresses.into_iter().collect()
}

/// Extracts directly connected subnets from `/proc/net/route`.
///
/// Destination and mask columns are little-endian hex. Default and gateway routes are skipped.
pub fn parse_routes(content: &str) -> Vec<Subnet> {
    let mut subnets = BTreeSet::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_iface, destination, gateway, _flags, _refcnt, _use, _metric, mask, ..] =
            fields.as_slice()
        else {
            continue;
        };
        let (Some(destination), Some(gateway), Some(mask)) =
            (hex_ipv4(destination), hex_ipv4(gateway), hex_ipv4(mask))
        else {
            log::trace!("skipping route line `{line}`");
            continue;
        };
        if mask.is_unspecified() || !gateway.is_unspecified() {
            continue;
        }
        subnets.insert(Subnet {
            network: destination,
            prefix_len: u32::from(mask).count_ones() as u8,
        });
    }
    subnets.into_iter().collect()
}

fn hex_ipv4(src: &str) -> Option<Ipv4Addr> {
    let raw = u32::from_str_radix(src, 16).ok()?;
    Some(Ipv4Addr::from(raw.to_le_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIB_TRIE: &str = "\
Main:
  +-- 0.0.0.0/0 3 0 5
     |-- 0.0.0.0
        /0 universe UNICAST
     +-- 10.0.0.0/8 2 0 2
        +-- 10.0.0.0/24 2 0 2
           |-- 10.0.0.0
              /24 link UNICAST
           |-- 10.0.0.17
              /32 host LOCAL
     +-- 127.0.0.0/8 2 0 2
        |-- 127.0.0.1
           /32 host LOCAL
Local:
  +-- 0.0.0.0/0 3 0 5
     |-- 10.0.0.17
        /32 host LOCAL
";

    const ROUTE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0100000A\t0003\t0\t0\t0\t00000000\t0\t0\t0
eth0\t0000000A\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
docker0\t000011AC\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0
";

    #[test]
    fn test_parse_fib_trie() {
        assert_eq!(
            parse_fib_trie(FIB_TRIE),
            vec![Ipv4Addr::new(10, 0, 0, 17), Ipv4Addr::new(127, 0, 0, 1)]
        );
    }

    #[test]
    fn test_parse_routes() {
        let subnets: Vec<String> = parse_routes(ROUTE).iter().map(Subnet::to_string).collect();
        assert_eq!(subnets, vec!["10.0.0.0/24", "172.17.0.0/16"]);
    }

    #[test]
    fn test_proc_host_network_reads_files() {
        let proc_root = tempfile::tempdir().unwrap();
        std::fs::create_dir(proc_root.path().join("net")).unwrap();
        std::fs::write(proc_root.path().join("net/fib_trie"), FIB_TRIE).unwrap();
        std::fs::write(proc_root.path().join("net/route"), ROUTE).unwrap();

        let host = ProcHostNetwork::new(proc_root.path());
        assert_eq!(host.local_addresses().len(), 2);
        assert_eq!(host.local_subnets().len(), 2);
    }

    #[test]
    fn test_proc_host_network_missing_files() {
        let proc_root = tempfile::tempdir().unwrap();
        let host = ProcHostNetwork::new(proc_root.path());
        assert!(host.local_addresses().is_empty());
        assert!(host.local_subnets().is_empty());
    }
}
