//! The real ACME conversation, built on `acme-lib`.
//!
//! One [`AcmeIssuer::issue`] call drives a complete order: account lookup or
//! registration, order creation, challenge solving per the domain's
//! configuration, bounded validation polling, finalization, and download.
//! Published proofs are cleaned up whether the order succeeds or fails.

use std::path::PathBuf;

use acme_lib::{
    Directory, DirectoryUrl,
    order::Auth,
    persist::{Persist, PersistKey, PersistKind},
};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use uuid::Uuid;
use x509_parser::pem::parse_x509_pem;

use crate::{
    config::AcmeTimings,
    core::types::{ChallengeConfig, ChallengeMethod},
    error::{Error, Result},
    issuance::{
        dns::{record_name, wait_for_propagation},
        dns_providers::{DnsProviderAdapter, adapter_for},
        http01::Http01Solver,
        issuer::{CertificateIssuer, IssuedMaterial},
    },
    storage::{account::AccountStore, db::BUCKET_APP_CONFIG, db::Db},
};

const PERSIST_PREFIX: &str = "acme/";

/// `acme-lib` persistence backed by the engine's store, so account state
/// survives restarts and the same authority account is reused.
#[derive(Clone)]
pub struct DbPersist {
    db: Db,
}

impl DbPersist {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Seeds the durable account key under the name `acme-lib` looks up, so
    /// the library reuses our identity instead of registering a fresh one.
    pub fn seed_account_key(&self, realm: &str, pem: &[u8]) -> Result<()> {
        let key = PersistKey::new(realm, PersistKind::AccountPrivateKey, "acme_account");
        self.put(&key, pem)
            .map_err(|err| Error::Storage(err.to_string()))
    }
}

impl Persist for DbPersist {
    fn put(&self, key: &PersistKey<'_>, value: &[u8]) -> acme_lib::Result<()> {
        let full_key = format!("{PERSIST_PREFIX}{key}");
        self.db
            .put(BUCKET_APP_CONFIG, &full_key, value)
            .map_err(|err| acme_lib::Error::Other(err.to_string()))
    }

    fn get(&self, key: &PersistKey<'_>) -> acme_lib::Result<Option<Vec<u8>>> {
        let full_key = format!("{PERSIST_PREFIX}{key}");
        self.db
            .get(BUCKET_APP_CONFIG, &full_key)
            .map_err(|err| acme_lib::Error::Other(err.to_string()))
    }
}

/// A challenge proof that was published somewhere and needs removing once
/// the order finishes.
enum PublishedProof {
    DnsRecord {
        adapter: Box<dyn DnsProviderAdapter>,
        record_name: String,
    },
    HttpToken {
        webroot: String,
        path: PathBuf,
    },
}

impl PublishedProof {
    fn cleanup(self) {
        match self {
            PublishedProof::DnsRecord {
                adapter,
                record_name,
            } => {
                if let Err(err) = adapter.cleanup_txt(&record_name) {
                    warn!("[acme] failed to clean up TXT {record_name}: {err}");
                }
            }
            PublishedProof::HttpToken { webroot, path } => {
                Http01Solver::new(&webroot, None).cleanup(&path);
            }
        }
    }
}

pub struct AcmeIssuer {
    db: Db,
    accounts: AccountStore,
    directory_url: String,
    contact_email: String,
    timings: AcmeTimings,
}

impl AcmeIssuer {
    pub fn new(
        db: Db,
        accounts: AccountStore,
        directory_url: String,
        contact_email: String,
        timings: AcmeTimings,
    ) -> Self {
        Self {
            db,
            accounts,
            directory_url,
            contact_email,
            timings,
        }
    }

    fn run_order(
        &self,
        domain: &str,
        config: &ChallengeConfig,
        published: &mut Vec<PublishedProof>,
    ) -> Result<IssuedMaterial> {
        // Account ready: reuse the persisted key, registering on first use.
        let account_key = self.accounts.ensure_account_key()?;
        let persist = DbPersist::new(self.db.clone());
        persist.seed_account_key(&self.contact_email, account_key.as_bytes())?;

        let directory = Directory::from_url(persist, DirectoryUrl::Other(&self.directory_url))
            .map_err(|err| Error::Authority(format!("directory fetch failed: {err}")))?;
        let account = directory
            .account_with_realm(
                &self.contact_email,
                Some(vec![format!("mailto:{}", self.contact_email)]),
            )
            .map_err(|err| Error::Authority(format!("account registration failed: {err}")))?;

        let mut order = account
            .new_order(domain, &[])
            .map_err(|err| Error::Authority(format!("order creation failed: {err}")))?;

        // Authorization pending: solve whatever challenge the authority
        // offers for the configured method.
        let auths = order
            .authorizations()
            .map_err(|err| Error::Authority(format!("authorization fetch failed: {err}")))?;
        for auth in &auths {
            self.solve_challenge(domain, auth, config, published)?;
        }

        // Bounded wait for the authority to confirm all validations.
        let mut attempt = 0u32;
        let mut backoff = self.timings.order_poll_backoff;
        let csr_order = loop {
            if let Some(csr_order) = order.confirm_validations() {
                break csr_order;
            }
            attempt += 1;
            if attempt > self.timings.order_poll_attempts {
                warn!("[acme] order for {domain} not confirmed after {attempt} refreshes");
                return Err(Error::ChallengeTimeout);
            }
            std::thread::sleep(backoff);
            backoff = (backoff + backoff / 2).min(self.timings.order_poll_max_backoff);
            order
                .refresh()
                .map_err(|err| Error::Authority(format!("order refresh failed: {err}")))?;
        };

        // Finalize: fresh key per order, never reusing the previous one.
        let key_pem = generate_order_key()?;
        let cert_order = csr_order
            .finalize(&key_pem, self.timings.finalize_poll.as_millis() as u64)
            .map_err(|err| Error::Authority(format!("finalization failed: {err}")))?;

        let cert = cert_order
            .download_and_save_cert()
            .map_err(|err| Error::Authority(format!("certificate download failed: {err}")))?;

        let chain_pem = cert.certificate().to_string();
        let expires_at = leaf_not_after(&chain_pem)?;

        Ok(IssuedMaterial {
            chain_pem,
            key_pem,
            expires_at,
        })
    }

    fn solve_challenge(
        &self,
        domain: &str,
        auth: &Auth<DbPersist>,
        config: &ChallengeConfig,
        published: &mut Vec<PublishedProof>,
    ) -> Result<()> {
        let auth_domain = auth.domain_name().to_string();
        match &config.method {
            ChallengeMethod::Dns01 { dns } => {
                let challenge = auth.dns_challenge();
                let proof = challenge.dns_proof();
                let record = record_name(&auth_domain);

                match adapter_for(dns, &auth_domain) {
                    Some(adapter) => {
                        adapter
                            .publish_txt(&record, &proof)
                            .map_err(|err| Error::Authority(format!(
                                "publishing TXT {record} failed: {err}"
                            )))?;
                        published.push(PublishedProof::DnsRecord {
                            adapter,
                            record_name: record.clone(),
                        });
                    }
                    None => {
                        // Manual provider: the operator publishes the record.
                        info!(
                            "[acme] waiting for operator-managed TXT {record} with value {proof}"
                        );
                    }
                }

                wait_for_propagation(&record, &proof, &self.timings)?;
                challenge
                    .validate(self.timings.validate_poll.as_millis() as u64)
                    .map_err(|err| Error::Authority(format!(
                        "dns-01 validation for {auth_domain} failed: {err}"
                    )))?;
            }
            ChallengeMethod::Http01 {
                webroot,
                probe_url_base,
            } => {
                let challenge = auth.http_challenge();
                let token = challenge.http_token().to_string();
                let proof = challenge.http_proof();

                let solver = Http01Solver::new(webroot, probe_url_base.as_deref());
                let path = solver
                    .publish(&token, &proof)
                    .map_err(|err| Error::Authority(format!(
                        "publishing http-01 token failed: {err}"
                    )))?;
                published.push(PublishedProof::HttpToken {
                    webroot: webroot.clone(),
                    path,
                });

                solver.probe(&auth_domain, &token, &proof, &self.timings);
                challenge
                    .validate(self.timings.validate_poll.as_millis() as u64)
                    .map_err(|err| Error::Authority(format!(
                        "http-01 validation for {auth_domain} failed: {err}"
                    )))?;
            }
        }
        debug!("[acme] challenge for {auth_domain} validated ({domain})");
        Ok(())
    }
}

impl CertificateIssuer for AcmeIssuer {
    fn issue(&self, domain: &str, config: &ChallengeConfig) -> Result<IssuedMaterial> {
        let order_id = Uuid::new_v4().as_simple().to_string();
        info!(
            "[acme] order {order_id}: {} order for {domain} via {}",
            config.method.as_str(),
            self.directory_url
        );

        let mut published = Vec::new();
        let outcome = self.run_order(domain, config, &mut published);
        for proof in published {
            proof.cleanup();
        }

        match &outcome {
            Ok(material) => info!(
                "[acme] order {order_id}: issued certificate for {domain}, expires {}",
                material.expires_at
            ),
            Err(err) => warn!("[acme] order {order_id}: order for {domain} failed: {err}"),
        }
        outcome
    }
}

/// Generates the per-order private key (ECDSA P-256) as PKCS#8 PEM.
fn generate_order_key() -> Result<String> {
    let key = rcgen::KeyPair::generate()
        .map_err(|err| Error::Storage(format!("order key generation failed: {err}")))?;
    Ok(key.serialize_pem())
}

/// Expiry of the leaf (first) certificate in a PEM chain.
pub fn leaf_not_after(chain_pem: &str) -> Result<DateTime<Utc>> {
    let (_, pem_block) = parse_x509_pem(chain_pem.as_bytes())
        .map_err(|err| Error::Authority(format!("issued chain is not valid PEM: {err}")))?;
    let cert = pem_block
        .parse_x509()
        .map_err(|err| Error::Authority(format!("issued leaf is not valid X.509: {err}")))?;
    Utc.timestamp_opt(cert.validity().not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| Error::Authority("issued leaf has unrepresentable expiry".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_key_is_pkcs8_pem() -> Result<()> {
        let key = generate_order_key()?;
        assert!(key.contains("BEGIN PRIVATE KEY"));
        Ok(())
    }

    #[test]
    fn leaf_not_after_parses_generated_certificate() -> Result<()> {
        let certified = rcgen::generate_simple_self_signed(vec!["example.test".into()])
            .expect("self-signed generation");
        let chain = certified.cert.pem();
        let not_after = leaf_not_after(&chain)?;
        assert!(not_after > Utc::now());
        Ok(())
    }

    #[test]
    fn leaf_not_after_rejects_garbage() {
        assert!(matches!(
            leaf_not_after("not a pem"),
            Err(Error::Authority(_))
        ));
    }

    #[test]
    fn db_persist_round_trips_values() -> acme_lib::Result<()> {
        let persist = DbPersist::new(Db::open_in_memory().unwrap());
        let key = PersistKey::new(
            "ops@example.test",
            PersistKind::AccountPrivateKey,
            "acme_account",
        );
        assert!(persist.get(&key)?.is_none());
        persist.put(&key, b"pem bytes")?;
        assert_eq!(persist.get(&key)?.as_deref(), Some(&b"pem bytes"[..]));
        Ok(())
    }
}
