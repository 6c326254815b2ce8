use itertools::Itertools;
use log::warn;
use std::net::{IpAddr, SocketAddr};
use tokio::{net, time};

use crate::{DEFAULT_CLUSTER_PORT, DiscoveryNode};

/// Default time limit for one service DNS lookup.
pub const DEFAULT_DNS_TIMEOUT_SECS: u64 = 5;

/// Resolves every address record behind one DNS name, typically the
/// headless service of the cluster. DNS has no readiness notion, so every
/// record becomes a peer at the statically resolved port.
pub struct DnsResolver {
    service_dns: String,
    port: u16,
    timeout: time::Duration,
}

impl DnsResolver {
    pub fn new(service_dns: String, service_port: u16, timeout_secs: u64) -> Self {
        let port = if service_port > 0 {
            service_port
        } else {
            DEFAULT_CLUSTER_PORT
        };
        Self {
            service_dns,
            port,
            timeout: time::Duration::from_secs(timeout_secs),
        }
    }

    /// Empty on unknown host, lookup timeout or zero records: no peers yet
    /// is a normal condition for a starting cluster, not an error.
    pub async fn resolve(&self) -> Vec<DiscoveryNode> {
        let name = self.service_dns.as_str();

        let addrs = match time::timeout(self.timeout, net::lookup_host((name, self.port))).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                warn!("DNS lookup for service {name:?} failed: {e}");
                return vec![];
            }
            Err(_) => {
                warn!(
                    "DNS lookup for service {name:?} timed out after {}s",
                    self.timeout.as_secs()
                );
                return vec![];
            }
        };

        let nodes = nodes_from_ips(addrs.map(|addr| addr.ip()), self.port);
        if nodes.is_empty() {
            warn!("DNS lookup for service {name:?} returned no records");
        }
        nodes
    }
}

fn nodes_from_ips(ips: impl Iterator<Item = IpAddr>, port: u16) -> Vec<DiscoveryNode> {
    ips.unique()
        .map(|ip| DiscoveryNode::new(SocketAddr::new(ip, port)))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const IP_SERVER_1: &str = "192.168.0.5";
    const IP_SERVER_2: &str = "192.168.0.6";

    fn ips() -> Vec<IpAddr> {
        vec![IP_SERVER_1.parse().unwrap(), IP_SERVER_2.parse().unwrap()]
    }

    #[test]
    fn one_node_per_record() {
        let nodes = nodes_from_ips(ips().into_iter(), DEFAULT_CLUSTER_PORT);

        assert_eq!(2, nodes.len());
        let hosts: Vec<String> = nodes
            .iter()
            .map(|n| n.private_address.ip().to_string())
            .collect();
        assert_eq!(vec![IP_SERVER_1, IP_SERVER_2], hosts);
        assert!(
            nodes
                .iter()
                .all(|n| n.private_address.port() == DEFAULT_CLUSTER_PORT)
        );
    }

    #[test]
    fn custom_port_applies_to_every_node() {
        let nodes = nodes_from_ips(ips().into_iter(), 5702);
        assert!(nodes.iter().all(|n| n.private_address.port() == 5702));
    }

    #[test]
    fn duplicate_records_collapse() {
        let twice = ips().into_iter().chain(ips());
        assert_eq!(2, nodes_from_ips(twice, DEFAULT_CLUSTER_PORT).len());
    }

    #[test]
    fn unset_port_falls_back_to_cluster_default() {
        let resolver = DnsResolver::new("peers.default.svc".into(), 0, DEFAULT_DNS_TIMEOUT_SECS);
        assert_eq!(DEFAULT_CLUSTER_PORT, resolver.port);
    }

    #[tokio::test]
    async fn unknown_host_resolves_to_no_peers() {
        let resolver =
            DnsResolver::new("no-such-service.invalid".into(), 0, DEFAULT_DNS_TIMEOUT_SECS);
        assert!(resolver.resolve().await.is_empty());
    }
}
