use log::{debug, info, warn};
use std::collections::BTreeMap as Map;
use tokio::sync::OnceCell;

use crate::client::{ApiClient, SERVICE_ACCOUNT_DIR};
use crate::resolvers::{Resolver, api::ApiResolver, dns::DnsResolver};
use crate::{DiscoveryConfig, DiscoveryMode, DiscoveryNode, Error, Result, ZONE_METADATA_KEY};

/// Owns exactly one resolver plus the lazily-computed zone metadata, and
/// exposes the discovery contract to the clustering layer: start, discover
/// the current peers, discover local metadata, destroy.
pub struct DiscoveryStrategy {
    resolver: Resolver,
    client: Option<ApiClient>,
    zone: OnceCell<String>,
}

impl DiscoveryStrategy {
    /// Picks the resolver variant once from the configuration; the choice
    /// never changes for the lifetime of the strategy.
    pub async fn new(config: DiscoveryConfig) -> Result<Self> {
        info!("peer discovery configured: {config}");

        let namespace = match &config.namespace {
            Some(ns) => ns.clone(),
            None => {
                default_namespace(
                    |key| std::env::var(key).ok(),
                    &format!("{SERVICE_ACCOUNT_DIR}/namespace"),
                )
                .await
            }
        };

        let (resolver, client) = match config.mode {
            DiscoveryMode::Dns => {
                let Some(service_dns) = config.service_dns.clone().filter(|s| !s.is_empty()) else {
                    return Err(Error::Config("DNS mode needs service-dns".into()));
                };
                let resolver = Resolver::Dns(DnsResolver::new(
                    service_dns,
                    config.service_port,
                    config.service_dns_timeout_secs,
                ));
                // in this mode the API client only serves zone discovery,
                // which degrades to "unknown" without one
                let client = match ApiClient::new(&config, namespace.clone()).await {
                    Ok(client) => Some(client),
                    Err(e) => {
                        debug!("no API client available for zone discovery: {e}");
                        None
                    }
                };
                (resolver, client)
            }
            DiscoveryMode::Api => {
                let client = ApiClient::new(&config, namespace.clone()).await?;
                let resolver = Resolver::Api(ApiResolver::new(client.clone(), &config));
                (resolver, Some(client))
            }
        };

        info!(
            "peer discovery activated with mode {} in namespace {namespace:?}",
            config.mode
        );
        Ok(Self {
            resolver,
            client,
            zone: OnceCell::new(),
        })
    }

    #[cfg(test)]
    fn with_resolver(resolver: Resolver, client: Option<ApiClient>) -> Self {
        Self {
            resolver,
            client,
            zone: OnceCell::new(),
        }
    }

    /// One-time warm-up; resolvers needing none treat it as a no-op.
    pub fn start(&self) {
        self.resolver.start();
    }

    /// The current set of peers, freshly resolved. Fails only once the
    /// retry ceiling is exhausted; the membership layer decides what to do
    /// with that.
    pub async fn discover_nodes(&self) -> Result<Vec<DiscoveryNode>> {
        self.resolver.resolve().await
    }

    /// Local placement metadata, today only the availability zone. The
    /// zone is computed at most once per strategy instance; any failure
    /// degrades to `"unknown"` instead of blocking startup.
    pub async fn discover_local_metadata(&self) -> Map<String, String> {
        let zone = self.zone.get_or_init(|| self.discover_zone()).await;
        Map::from([(ZONE_METADATA_KEY.to_owned(), zone.clone())])
    }

    /// Consuming self makes "resolve after destroy" unrepresentable.
    pub fn destroy(self) {
        self.resolver.destroy();
    }

    async fn discover_zone(&self) -> String {
        match self.try_discover_zone().await {
            Some(zone) => zone,
            None => {
                warn!("cannot determine the local zone, zone-aware placement is disabled");
                "unknown".to_owned()
            }
        }
    }

    async fn try_discover_zone(&self) -> Option<String> {
        let client = self.client.as_ref()?;
        let pod_name = local_pod_name(|key| std::env::var(key).ok())?;
        match client.zone_of(&pod_name).await {
            Ok(zone) => zone,
            Err(e) => {
                debug!("zone lookup for pod {pod_name:?} failed: {e}");
                None
            }
        }
    }
}

/// Namespace scoping the API queries when none is configured: environment,
/// then the service account, then `"default"`.
async fn default_namespace(
    env: impl Fn(&str) -> Option<String>,
    namespace_file: &str,
) -> String {
    for key in ["KUBERNETES_NAMESPACE", "OPENSHIFT_BUILD_NAMESPACE"] {
        if let Some(ns) = env(key).filter(|ns| !ns.is_empty()) {
            return ns;
        }
    }
    match tokio::fs::read_to_string(namespace_file).await {
        Ok(ns) if !ns.trim().is_empty() => ns.trim().to_owned(),
        _ => "default".to_owned(),
    }
}

/// Identity of the local pod, from the most explicit signal to the least:
/// POD_NAME, HOSTNAME, then the machine hostname.
fn local_pod_name(env: impl Fn(&str) -> Option<String>) -> Option<String> {
    for key in ["POD_NAME", "HOSTNAME"] {
        if let Some(name) = env(key).filter(|name| !name.is_empty()) {
            return Some(name);
        }
    }
    hostname::get().ok().and_then(|name| name.into_string().ok())
}
