//! Per-domain challenge configuration management.

use log::info;

use crate::{
    core::types::{ChallengeConfig, ChallengeMethod},
    domain::normalize_domain,
    error::{Error, Result},
    storage::challenges::ChallengeConfigStore,
};

#[derive(Clone)]
pub struct ChallengeConfigService {
    store: ChallengeConfigStore,
}

impl ChallengeConfigService {
    pub fn new(store: ChallengeConfigStore) -> Self {
        Self { store }
    }

    /// Validates and upserts the configuration for a domain.
    pub fn set(&self, domain: &str, method: ChallengeMethod) -> Result<ChallengeConfig> {
        let domain = normalize_domain(domain)?;
        let config = ChallengeConfig {
            domain: domain.clone(),
            method,
        };
        config.validate()?;
        self.store.upsert(&config)?;
        info!("[challenges] {domain} configured for {}", config.method.as_str());
        Ok(config)
    }

    pub fn get(&self, domain: &str) -> Result<ChallengeConfig> {
        let domain = normalize_domain(domain)?;
        self.store.get(&domain)?.ok_or(Error::NotFound)
    }

    pub fn delete(&self, domain: &str) -> Result<()> {
        let domain = normalize_domain(domain)?;
        self.store.delete(&domain)?;
        info!("[challenges] {domain} configuration removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DnsProvider;
    use crate::storage::db::Db;

    fn service() -> ChallengeConfigService {
        ChallengeConfigService::new(ChallengeConfigStore::new(Db::open_in_memory().unwrap()))
    }

    #[test]
    fn set_rejects_invalid_config() {
        let service = service();
        let result = service.set(
            "example.test",
            ChallengeMethod::Dns01 {
                dns: DnsProvider::Cloudflare {
                    api_token: "".into(),
                    zone: None,
                },
            },
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(matches!(service.get("example.test"), Err(Error::NotFound)));
    }

    #[test]
    fn set_normalizes_domain_and_upserts() -> Result<()> {
        let service = service();
        service.set(
            "Example.Test",
            ChallengeMethod::Http01 {
                webroot: "/var/www".into(),
                probe_url_base: None,
            },
        )?;

        let config = service.get("example.test")?;
        assert_eq!(config.domain, "example.test");

        service.set(
            "example.test",
            ChallengeMethod::Dns01 {
                dns: DnsProvider::Manual,
            },
        )?;
        let replaced = service.get("example.test")?;
        assert_eq!(replaced.method.as_str(), "dns-01");
        Ok(())
    }

    #[test]
    fn delete_missing_is_not_found() {
        assert!(matches!(service().delete("missing.test"), Err(Error::NotFound)));
    }
}
