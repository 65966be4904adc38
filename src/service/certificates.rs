//! The authoritative view of managed certificates.
//!
//! Holds no state of its own; every operation is one atomic repository
//! transaction, so concurrent API traffic and renewal workers never observe
//! a partial update.

use chrono::{DateTime, Utc};
use log::info;
use sha2::{Digest, Sha256};
use x509_parser::parse_x509_certificate;

use crate::{
    core::types::{Certificate, CertificateStatus},
    domain::normalize_domain,
    error::{Error, Result},
    storage::certificates::CertificateStore,
};

#[derive(Clone)]
pub struct CertificateService {
    store: CertificateStore,
}

impl CertificateService {
    pub fn new(store: CertificateStore) -> Self {
        Self { store }
    }

    /// Registers a domain. The record starts in `Pending` so challenge
    /// configuration and renewal scheduling can attach before the first
    /// successful issuance.
    pub fn create(&self, domain: &str) -> Result<Certificate> {
        let domain = normalize_domain(domain)?;
        let cert = Certificate::new(domain);
        self.store.create(&cert)?;
        info!("[certs] registered {}", cert.domain);
        Ok(cert)
    }

    pub fn get(&self, domain: &str) -> Result<Certificate> {
        let domain = normalize_domain(domain)?;
        self.store.get(&domain)?.ok_or(Error::NotFound)
    }

    pub fn list(&self) -> Result<Vec<Certificate>> {
        self.store.list()
    }

    /// Removes a domain's record. Refused while an order is in flight; the
    /// caller retries once the order has finished either way.
    pub fn delete(&self, domain: &str) -> Result<()> {
        let domain = normalize_domain(domain)?;
        self.store.delete(&domain)?;
        info!("[certs] removed {domain}");
        Ok(())
    }

    /// Records a successful issuance: transitions to `Active`, stores the
    /// new material, and clears any previous error.
    pub fn update_issued(
        &self,
        domain: &str,
        chain_pem: &str,
        key_pem: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Certificate> {
        let domain = normalize_domain(domain)?;
        if key_pem.trim().is_empty() {
            return Err(Error::Authority("issued key material is empty".into()));
        }
        let (serial, fingerprint) = leaf_identity(chain_pem)?;
        let issued_at = Utc::now();

        let cert = self.store.update(&domain, |cert| {
            cert.status = CertificateStatus::Active;
            cert.chain_pem = Some(chain_pem.to_string());
            cert.key_pem = Some(key_pem.to_string());
            cert.serial = Some(serial.clone());
            cert.fingerprint = Some(fingerprint.clone());
            cert.issued_at = Some(issued_at);
            cert.expires_at = Some(expires_at);
            cert.last_error = None;
        })?;
        info!("[certs] {domain} issued; expires {expires_at}");
        Ok(cert)
    }

    /// Records a failed order attempt. Only status and last-error change; a
    /// previously issued, still-valid certificate keeps serving.
    pub fn update_failed(&self, domain: &str, error: &str) -> Result<Certificate> {
        let domain = normalize_domain(domain)?;
        self.store.update(&domain, |cert| {
            cert.status = CertificateStatus::Error;
            cert.last_error = Some(error.to_string());
        })
    }

    /// Atomic single-flight mark for a new order attempt.
    pub fn begin_order(&self, domain: &str) -> Result<Certificate> {
        self.store.begin_order(domain)
    }

    pub fn finish_order(&self, domain: &str) -> Result<()> {
        self.store.finish_order(domain)
    }

    /// Startup reclamation of marks orphaned by a crash mid-order.
    pub fn release_stale_orders(&self) -> Result<usize> {
        self.store.release_stale_orders()
    }
}

/// Serial and SHA-256 fingerprint of the leaf (first) certificate in a PEM
/// chain. Also rejects chains with no certificate blocks at all.
fn leaf_identity(chain_pem: &str) -> Result<(String, String)> {
    let blocks = pem::parse_many(chain_pem)
        .map_err(|err| Error::Authority(format!("issued chain is not valid PEM: {err}")))?;
    let leaf = blocks
        .iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .ok_or_else(|| Error::Authority("issued chain contains no certificates".into()))?;

    let (_, cert) = parse_x509_certificate(leaf.contents())
        .map_err(|err| Error::Authority(format!("issued leaf is not valid X.509: {err}")))?;
    let serial = cert.raw_serial_as_string();

    let mut hasher = Sha256::new();
    hasher.update(leaf.contents());
    let fingerprint = hex::encode(hasher.finalize());

    Ok((serial, fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::Db;
    use chrono::Duration;

    fn service() -> CertificateService {
        CertificateService::new(CertificateStore::new(Db::open_in_memory().unwrap()))
    }

    fn self_signed_chain(domain: &str) -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec![domain.to_string()])
            .expect("self-signed generation");
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    #[test]
    fn create_is_idempotent_in_effect() -> Result<()> {
        let service = service();
        service.create("Example.Test")?;

        assert!(matches!(service.create("example.test"), Err(Error::AlreadyExists)));

        let cert = service.get("example.test")?;
        assert_eq!(cert.status, CertificateStatus::Pending);
        assert_eq!(service.list()?.len(), 1);
        Ok(())
    }

    #[test]
    fn update_issued_activates_and_fills_material() -> Result<()> {
        let service = service();
        service.create("example.test")?;
        let (chain, key) = self_signed_chain("example.test");
        let expires_at = Utc::now() + Duration::days(90);

        let cert = service.update_issued("example.test", &chain, &key, expires_at)?;
        assert_eq!(cert.status, CertificateStatus::Active);
        assert_eq!(cert.chain_pem.as_deref(), Some(chain.as_str()));
        assert_eq!(cert.expires_at, Some(expires_at));
        assert!(cert.serial.is_some());
        assert!(cert.fingerprint.is_some());
        assert!(cert.last_error.is_none());
        Ok(())
    }

    #[test]
    fn update_failed_preserves_previous_material() -> Result<()> {
        let service = service();
        service.create("example.test")?;
        let (chain, key) = self_signed_chain("example.test");
        let expires_at = Utc::now() + Duration::days(90);
        service.update_issued("example.test", &chain, &key, expires_at)?;

        let cert = service.update_failed("example.test", "authority said no")?;
        assert_eq!(cert.status, CertificateStatus::Error);
        assert_eq!(cert.last_error.as_deref(), Some("authority said no"));
        // The stored chain, key, and expiry survive the failure untouched.
        assert_eq!(cert.chain_pem.as_deref(), Some(chain.as_str()));
        assert_eq!(cert.key_pem.as_deref(), Some(key.as_str()));
        assert_eq!(cert.expires_at, Some(expires_at));
        Ok(())
    }

    #[test]
    fn update_issued_rejects_empty_chain() -> Result<()> {
        let service = service();
        service.create("example.test")?;
        let result =
            service.update_issued("example.test", "", "key", Utc::now() + Duration::days(1));
        assert!(matches!(result, Err(Error::Authority(_))));

        // The record is untouched by the rejected update.
        let cert = service.get("example.test")?;
        assert_eq!(cert.status, CertificateStatus::Pending);
        Ok(())
    }

    #[test]
    fn get_missing_domain_is_not_found() {
        assert!(matches!(service().get("missing.test"), Err(Error::NotFound)));
    }
}
