//! Durable per-domain challenge configuration.

use crate::{
    core::types::ChallengeConfig,
    error::{Error, Result},
    storage::db::{BUCKET_CHALLENGE_CONFIGS, Db},
};

#[derive(Clone)]
pub struct ChallengeConfigStore {
    db: Db,
}

impl ChallengeConfigStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, domain: &str) -> Result<Option<ChallengeConfig>> {
        self.db
            .get(BUCKET_CHALLENGE_CONFIGS, domain)?
            .map(|value| serde_json::from_slice(&value).map_err(Error::from))
            .transpose()
    }

    pub fn upsert(&self, config: &ChallengeConfig) -> Result<()> {
        let value = serde_json::to_vec(config)?;
        self.db.put(BUCKET_CHALLENGE_CONFIGS, &config.domain, &value)
    }

    pub fn delete(&self, domain: &str) -> Result<()> {
        if self.db.delete(BUCKET_CHALLENGE_CONFIGS, domain)? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChallengeMethod, DnsProvider};

    fn config(domain: &str) -> ChallengeConfig {
        ChallengeConfig {
            domain: domain.into(),
            method: ChallengeMethod::Dns01 {
                dns: DnsProvider::Cloudflare {
                    api_token: "token".into(),
                    zone: None,
                },
            },
        }
    }

    #[test]
    fn upsert_and_get_round_trip() -> Result<()> {
        let store = ChallengeConfigStore::new(Db::open_in_memory()?);
        assert!(store.get("example.test")?.is_none());

        store.upsert(&config("example.test"))?;
        assert_eq!(store.get("example.test")?, Some(config("example.test")));

        // Upsert replaces in place.
        let replacement = ChallengeConfig {
            domain: "example.test".into(),
            method: ChallengeMethod::Http01 {
                webroot: "/var/www".into(),
                probe_url_base: None,
            },
        };
        store.upsert(&replacement)?;
        assert_eq!(store.get("example.test")?, Some(replacement));
        Ok(())
    }

    #[test]
    fn delete_missing_config_is_not_found() {
        let store = ChallengeConfigStore::new(Db::open_in_memory().unwrap());
        assert!(matches!(store.delete("missing.test"), Err(Error::NotFound)));
    }
}
