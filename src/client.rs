use k8s_openapi::api::core::v1 as core;
use kube::{
    Client,
    api::{Api, ListParams},
};

use crate::retry::with_retries;
use crate::{DiscoveryConfig, Error, Result};

/// Mount point of the in-cluster service account material.
pub(crate) const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Node labels carrying topology information, current keys before the
/// deprecated ones.
const ZONE_LABELS: [&str; 2] = [
    "topology.kubernetes.io/zone",
    "failure-domain.beta.kubernetes.io/zone",
];
const REGION_LABELS: [&str; 2] = [
    "topology.kubernetes.io/region",
    "failure-domain.beta.kubernetes.io/region",
];

/// Typed accessor over the parts of the Kubernetes REST API that discovery
/// needs. Every operation retries transient failures with linear backoff
/// before surfacing the error.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    namespace: String,
    max_attempts: u32,
}

impl ApiClient {
    /// An explicit API server URL selects manual construction (bearer token
    /// plus optional CA bundle); without one, the standard kube config
    /// inference applies (kubeconfig or in-cluster environment).
    pub async fn new(config: &DiscoveryConfig, namespace: String) -> Result<Self> {
        let kube_config = match &config.api_server_url {
            Some(url) => {
                let cluster_url = url
                    .parse()
                    .map_err(|e| Error::Config(format!("invalid API server URL {url:?}: {e}")))?;
                let mut kube_config = kube::Config::new(cluster_url);
                kube_config.default_namespace = namespace.clone();
                kube_config.auth_info.token = Some(token(config).await?.into());
                if let Some(pem) = ca_certificate(config).await {
                    kube_config.root_cert = Some(der_chain(&pem)?);
                }
                kube_config
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| Error::Config(format!("cannot infer a kubernetes config: {e}")))?,
        };

        Ok(Self {
            client: Client::try_from(kube_config)?,
            namespace,
            max_attempts: config.api_retries,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_client(client: Client, namespace: &str, max_attempts: u32) -> Self {
        Self {
            client,
            namespace: namespace.to_owned(),
            max_attempts,
        }
    }

    fn endpoints(&self) -> Api<core::Endpoints> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Endpoints of one service; `None` when the service does not exist.
    pub async fn endpoints_by_name(&self, name: &str) -> Result<Option<core::Endpoints>> {
        with_retries("endpoints lookup by name", self.max_attempts, || async move {
            self.endpoints().get_opt(name).await.map_err(Error::from)
        })
        .await
    }

    /// Every endpoints object labelled `label=value` in the namespace.
    pub async fn endpoints_by_label(&self, label: &str, value: &str) -> Result<Vec<core::Endpoints>> {
        let selector = format!("{label}={value}");
        with_retries("endpoints lookup by label", self.max_attempts, || {
            let params = ListParams::default().labels(&selector);
            async move {
                self.endpoints()
                    .list(&params)
                    .await
                    .map(|list| list.items)
                    .map_err(Error::from)
            }
        })
        .await
    }

    /// Every endpoints object in the namespace.
    pub async fn endpoints_in_namespace(&self) -> Result<Vec<core::Endpoints>> {
        with_retries("namespace endpoints listing", self.max_attempts, || async move {
            self.endpoints()
                .list(&ListParams::default())
                .await
                .map(|list| list.items)
                .map_err(Error::from)
        })
        .await
    }

    /// Availability zone (or region) label of the node running `pod_name`,
    /// `None` when the pod, its node or the labels are absent.
    pub async fn zone_of(&self, pod_name: &str) -> Result<Option<String>> {
        let pods: Api<core::Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pods = &pods;
        let pod = with_retries("pod lookup", self.max_attempts, || async move {
            pods.get_opt(pod_name).await.map_err(Error::from)
        })
        .await?;

        let Some(node_name) = pod.and_then(|p| p.spec).and_then(|s| s.node_name) else {
            return Ok(None);
        };

        let nodes: Api<core::Node> = Api::all(self.client.clone());
        let nodes = &nodes;
        let node_name = node_name.as_str();
        let node = with_retries("node lookup", self.max_attempts, || async move {
            nodes.get_opt(node_name).await.map_err(Error::from)
        })
        .await?;

        let Some(labels) = node.and_then(|n| n.metadata.labels) else {
            return Ok(None);
        };
        Ok(ZONE_LABELS
            .iter()
            .chain(REGION_LABELS.iter())
            .find_map(|key| labels.get(*key).cloned()))
    }
}

async fn token(config: &DiscoveryConfig) -> Result<String> {
    if let Some(token) = &config.api_token {
        return Ok(token.clone());
    }
    let path = format!("{SERVICE_ACCOUNT_DIR}/token");
    match tokio::fs::read_to_string(&path).await {
        Ok(token) => Ok(token.trim().to_owned()),
        Err(e) => Err(Error::Config(format!(
            "no API token configured and {path} is not readable: {e}"
        ))),
    }
}

async fn ca_certificate(config: &DiscoveryConfig) -> Option<String> {
    if config.api_ca_certificate.is_some() {
        return config.api_ca_certificate.clone();
    }
    tokio::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/ca.crt"))
        .await
        .ok()
}

/// PEM bundle to the DER list kube wants as TLS trust roots.
fn der_chain(pem: &str) -> Result<Vec<Vec<u8>>> {
    openssl::x509::X509::stack_from_pem(pem.as_bytes())
        .map_err(|e| Error::Config(format!("invalid CA certificate: {e}")))?
        .iter()
        .map(|cert| {
            cert.to_der()
                .map_err(|e| Error::Config(format!("invalid CA certificate: {e}")))
        })
        .collect()
}
