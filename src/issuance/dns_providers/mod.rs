use anyhow::Result;

use crate::{
    core::types::DnsProvider,
    domain::{derive_zone, normalize_zone},
};

mod cloudflare;
pub(crate) mod http;

pub use cloudflare::CloudflareAdapter;

/// Publishes and removes challenge TXT records through a DNS provider's API.
pub trait DnsProviderAdapter: Send + Sync {
    fn publish_txt(&self, record_name: &str, value: &str) -> Result<()>;
    fn cleanup_txt(&self, record_name: &str) -> Result<()>;
}

/// Builds the adapter for a configured provider. `None` for the manual
/// provider, where the operator maintains the record out of band.
pub fn adapter_for(provider: &DnsProvider, domain: &str) -> Option<Box<dyn DnsProviderAdapter>> {
    match provider {
        DnsProvider::Cloudflare { api_token, zone } => {
            let zone = zone
                .clone()
                .unwrap_or_else(|| derive_zone(domain));
            Some(Box::new(CloudflareAdapter::new(api_token.clone(), zone)))
        }
        DnsProvider::Manual => None,
    }
}

pub(crate) fn matches_zone(domain_suffix: &str, zone_name: &str) -> bool {
    let Ok(domain_suffix) = normalize_zone(domain_suffix) else {
        return false;
    };
    let Ok(zone_name) = normalize_zone(zone_name) else {
        return false;
    };
    zone_name == domain_suffix || domain_suffix.ends_with(&format!(".{zone_name}"))
}
