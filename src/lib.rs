use log::warn;
use std::collections::BTreeMap as Map;
use std::net::{IpAddr, SocketAddr};
use tokio::net;

pub mod client;
pub mod resolvers;
pub mod retry;
pub mod strategy;

#[cfg(test)]
mod testutil;

pub use strategy::DiscoveryStrategy;

/// Port assumed for members when neither the configuration nor the platform
/// reports one.
pub const DEFAULT_CLUSTER_PORT: u16 = 5701;

/// Key under which [`DiscoveryStrategy::discover_local_metadata`] reports the
/// availability zone.
pub const ZONE_METADATA_KEY: &str = "zone";

/// How peers are found: a lookup of all records behind one DNS name
/// (typically a headless service), or queries against the Kubernetes API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiscoveryMode {
    Dns,
    #[default]
    Api,
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dns => f.write_str("DNS"),
            Self::Api => f.write_str("API"),
        }
    }
}

/// Immutable snapshot of the discovery knobs. Built and validated once by
/// the embedding application; only read from here.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,
    /// DNS name resolved in [`DiscoveryMode::Dns`].
    pub service_dns: Option<String>,
    pub service_dns_timeout_secs: u64,
    /// Exact service whose endpoints are the peers.
    pub service_name: Option<String>,
    /// Label selector matching the peer endpoints; the value defaults to
    /// `"true"` when only the name is given.
    pub service_label_name: Option<String>,
    pub service_label_value: Option<String>,
    /// Explicit member port; `0` means "use the discovered or default port".
    pub service_port: u16,
    /// Scope of all API queries; `None` resolves from the environment, the
    /// service account, or falls back to `"default"`.
    pub namespace: Option<String>,
    /// Also resolve endpoints that currently fail their readiness probe.
    pub resolve_not_ready_addresses: bool,
    /// Explicit API server; `None` lets the standard kube config inference
    /// (kubeconfig or in-cluster environment) decide.
    pub api_server_url: Option<String>,
    /// Bearer token; `None` reads the service account token file.
    pub api_token: Option<String>,
    /// CA bundle (PEM) trusted for the API server.
    pub api_ca_certificate: Option<String>,
    pub api_retries: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Api,
            service_dns: None,
            service_dns_timeout_secs: resolvers::dns::DEFAULT_DNS_TIMEOUT_SECS,
            service_name: None,
            service_label_name: None,
            service_label_value: None,
            service_port: 0,
            namespace: None,
            resolve_not_ready_addresses: false,
            api_server_url: None,
            api_token: None,
            api_ca_certificate: None,
            api_retries: retry::DEFAULT_API_RETRIES,
        }
    }
}

impl std::fmt::Display for DiscoveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mode: {}, service-dns: {:?}, service-name: {:?}, service-label: {:?}={:?}, \
             namespace: {:?}, service-port: {}, resolve-not-ready: {}, api-server: {:?}, \
             api-token: {}, api-retries: {}",
            self.mode,
            self.service_dns,
            self.service_name,
            self.service_label_name,
            self.service_label_value,
            self.namespace,
            self.service_port,
            self.resolve_not_ready_addresses,
            self.api_server_url,
            if self.api_token.is_some() { "<set>" } else { "<none>" },
            self.api_retries,
        )
    }
}

/// One reachable cluster member candidate. Rebuilt from scratch on every
/// resolution cycle; carries no identity across cycles.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DiscoveryNode {
    pub private_address: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_address: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, String>,
}

impl DiscoveryNode {
    pub fn new(private_address: SocketAddr) -> Self {
        Self {
            private_address,
            public_address: None,
            properties: Map::new(),
        }
    }
}

impl std::fmt::Display for DiscoveryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.private_address)
    }
}

/// Normalized view of one backend reported by the platform, before the
/// readiness filter and port resolution turn it into a [`DiscoveryNode`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub private_address: Option<EndpointAddress>,
    pub public_address: Option<EndpointAddress>,
    /// Whether the backend currently passes its readiness probe.
    pub ready: bool,
    /// Per-address annotations reported by the platform (hostname, node
    /// name, target pod).
    pub properties: Map<String, String>,
}

/// An address as the platform reports it: textual IP, port only when the
/// platform annotated one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointAddress {
    pub ip: String,
    pub port: Option<u16>,
}

#[derive(Debug)]
pub enum Error {
    /// A platform API call failed.
    Api(kube::Error),
    /// The configuration cannot be turned into a working client.
    Config(String),
}

impl Error {
    /// Whether retrying the same call can reasonably succeed. Only
    /// transport-level failures and 429/5xx API answers qualify; caller
    /// faults (other 4xx, auth, malformed requests) do not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Api(e) => match e {
                kube::Error::Api(resp) => resp.code == 429 || resp.code >= 500,
                kube::Error::Auth(_)
                | kube::Error::SerdeError(_)
                | kube::Error::BuildRequest(_) => false,
                _ => true,
            },
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api(e) => write!(f, "kubernetes API error: {e}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Api(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Self::Api(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Best-effort mapping of a platform-reported host to an IP address.
/// Resolution failure is recoverable (the platform can report endpoints
/// faster than local caches refresh), so it only logs and yields `None`.
pub async fn map_address(address: Option<&str>) -> Option<IpAddr> {
    let address = address?;
    if let Ok(ip) = address.parse() {
        return Some(ip);
    }
    match net::lookup_host((address, 0u16)).await.map(|mut addrs| addrs.next()) {
        Ok(Some(addr)) => Some(addr.ip()),
        Ok(None) => {
            warn!("address {address:?} has no address records");
            None
        }
        Err(e) => {
            warn!("address {address:?} could not be resolved: {e}");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn absent_address_maps_to_none() {
        assert_eq!(None, map_address(None).await);
    }

    #[tokio::test]
    async fn literal_ip_maps_without_lookup() {
        let ip: IpAddr = "192.168.0.5".parse().unwrap();
        assert_eq!(Some(ip), map_address(Some("192.168.0.5")).await);
    }

    #[tokio::test]
    async fn unresolvable_host_maps_to_none() {
        assert_eq!(None, map_address(Some("no-such-host.invalid")).await);
    }

    #[test]
    fn server_errors_are_transient() {
        let e = Error::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "unavailable".into(),
            reason: "ServiceUnavailable".into(),
            code: 503,
        }));
        assert!(e.is_transient());
    }

    #[test]
    fn caller_faults_are_permanent() {
        let e = Error::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "no such namespace".into(),
            reason: "NotFound".into(),
            code: 404,
        }));
        assert!(!e.is_transient());
        assert!(!Error::Config("bad URL".into()).is_transient());
    }
}
