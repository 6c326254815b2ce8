use k8s_openapi::api::core::v1 as core;
use log::debug;
use std::collections::BTreeMap as Map;
use std::net::SocketAddr;

use crate::client::ApiClient;
use crate::{
    DEFAULT_CLUSTER_PORT, DiscoveryConfig, DiscoveryNode, Endpoint, EndpointAddress, Result,
    map_address,
};

/// Discovers peers through the Kubernetes API. Each call cascades from the
/// most specific query to the widest: exact service name, then label
/// selector, then every endpoints object in the namespace, stopping at the
/// first non-empty answer. The namespace-wide step is the safety net
/// against a mis-scoped service name or label selector.
pub struct ApiResolver {
    client: ApiClient,
    service_name: Option<String>,
    service_label_name: Option<String>,
    service_label_value: String,
    service_port: u16,
    resolve_not_ready_addresses: bool,
}

impl ApiResolver {
    pub fn new(client: ApiClient, config: &DiscoveryConfig) -> Self {
        Self {
            client,
            service_name: config.service_name.clone(),
            service_label_name: config.service_label_name.clone(),
            service_label_value: config
                .service_label_value
                .clone()
                .unwrap_or_else(|| "true".to_owned()),
            service_port: config.service_port,
            resolve_not_ready_addresses: config.resolve_not_ready_addresses,
        }
    }

    pub async fn resolve(&self) -> Result<Vec<DiscoveryNode>> {
        if let Some(name) = self.service_name.as_deref().filter(|n| !n.is_empty()) {
            let nodes = self.nodes_by_name(name).await?;
            if !nodes.is_empty() {
                return Ok(nodes);
            }
            debug!("no endpoints under service name {name:?}, widening the query");
        }

        if let Some(label) = self.service_label_name.as_deref().filter(|l| !l.is_empty()) {
            let nodes = self.nodes_by_label(label).await?;
            if !nodes.is_empty() {
                return Ok(nodes);
            }
            debug!(
                "no endpoints labelled {label}={}, widening the query",
                self.service_label_value
            );
        }

        self.nodes_in_namespace().await
    }

    async fn nodes_by_name(&self, name: &str) -> Result<Vec<DiscoveryNode>> {
        match self.client.endpoints_by_name(name).await? {
            Some(endpoints) => Ok(self.nodes_of(&[endpoints]).await),
            None => Ok(vec![]),
        }
    }

    async fn nodes_by_label(&self, label: &str) -> Result<Vec<DiscoveryNode>> {
        let list = self
            .client
            .endpoints_by_label(label, &self.service_label_value)
            .await?;
        Ok(self.nodes_of(&list).await)
    }

    async fn nodes_in_namespace(&self) -> Result<Vec<DiscoveryNode>> {
        let list = self.client.endpoints_in_namespace().await?;
        Ok(self.nodes_of(&list).await)
    }

    async fn nodes_of(&self, endpoints: &[core::Endpoints]) -> Vec<DiscoveryNode> {
        discovery_nodes(endpoints, self.service_port, self.resolve_not_ready_addresses).await
    }
}

/// Applies the readiness rule and port resolution to every normalized
/// endpoint, dropping single unresolvable addresses without failing the
/// whole cycle.
async fn discovery_nodes(
    endpoints: &[core::Endpoints],
    service_port: u16,
    resolve_not_ready_addresses: bool,
) -> Vec<DiscoveryNode> {
    let mut nodes = Vec::new();
    for endpoint in endpoints.iter().flat_map(endpoints_of) {
        if !(endpoint.ready || resolve_not_ready_addresses) {
            continue;
        }
        let Some(address) = endpoint.private_address else {
            continue;
        };
        let Some(ip) = map_address(Some(address.ip.as_str())).await else {
            // that one member is dropped, the rest is still worth returning
            continue;
        };

        let port = resolved_port(service_port, &address);
        let mut node = DiscoveryNode::new(SocketAddr::new(ip, port));
        node.properties = endpoint.properties;
        if let Some(public) = endpoint.public_address {
            node.public_address = map_address(Some(public.ip.as_str()))
                .await
                .map(|ip| SocketAddr::new(ip, public.port.unwrap_or(port)));
        }

        debug!("found peer at {node}");
        nodes.push(node);
    }
    nodes
}

/// Port precedence: explicitly configured port, then the port the platform
/// annotated on the endpoint, then the cluster default.
fn resolved_port(service_port: u16, address: &EndpointAddress) -> u16 {
    if service_port > 0 {
        return service_port;
    }
    if let Some(port) = address.port {
        return port;
    }
    DEFAULT_CLUSTER_PORT
}

/// Flattens the subset/address lists of one endpoints object into the
/// uniform endpoint view. Absent lists mean "none", not an error.
pub fn endpoints_of(endpoints: &core::Endpoints) -> Vec<Endpoint> {
    let mut result = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        let port = subset
            .ports
            .iter()
            .flatten()
            .filter(|p| is_tcp(&p.protocol))
            .map(|p| p.port as u16)
            .next();

        for address in subset.addresses.iter().flatten() {
            result.push(endpoint_of(address, port, true));
        }
        for address in subset.not_ready_addresses.iter().flatten() {
            result.push(endpoint_of(address, port, false));
        }
    }
    result
}

fn endpoint_of(address: &core::EndpointAddress, port: Option<u16>, ready: bool) -> Endpoint {
    let mut properties = Map::new();
    if let Some(hostname) = &address.hostname {
        properties.insert("hostname".to_owned(), hostname.clone());
    }
    if let Some(node_name) = &address.node_name {
        properties.insert("node-name".to_owned(), node_name.clone());
    }
    if let Some(name) = address.target_ref.as_ref().and_then(|t| t.name.as_ref()) {
        properties.insert("target-name".to_owned(), name.clone());
    }

    Endpoint {
        private_address: Some(EndpointAddress {
            ip: address.ip.clone(),
            port,
        }),
        public_address: None,
        ready,
        properties,
    }
}

fn is_tcp(protocol: &Option<String>) -> bool {
    match protocol {
        None => true,
        Some(s) => s.as_str() == "TCP",
    }
}
