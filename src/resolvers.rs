use log::debug;

use crate::{DiscoveryNode, Result};

pub mod api;
pub mod dns;

/// Closed set of resolver variants, decided once at construction. An enum
/// because resolution is async and we cannot use Box<dyn some-async-trait>.
pub enum Resolver {
    Dns(dns::DnsResolver),
    Api(api::ApiResolver),
}

impl Resolver {
    /// Produces the current list of discovered peers. Expected empty-result
    /// conditions are `Ok` with an empty list, never errors.
    pub async fn resolve(&self) -> Result<Vec<DiscoveryNode>> {
        match self {
            Self::Dns(resolver) => Ok(resolver.resolve().await),
            Self::Api(resolver) => resolver.resolve().await,
        }
    }

    /// One-time warm-up hook; no variant needs one today.
    pub fn start(&self) {
        debug!("resolver started");
    }

    /// Releases what the variant holds; dropping the API client closes its
    /// connections.
    pub fn destroy(self) {
        debug!("resolver destroyed");
    }
}
