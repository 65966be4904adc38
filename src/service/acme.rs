//! Order orchestration: single-flight control, challenge-config gating, and
//! persistence of every outcome.
//!
//! The protocol conversation itself lives behind
//! [`CertificateIssuer`](crate::issuance::issuer::CertificateIssuer); this
//! service owns everything around it: at most one in-flight order per
//! domain, failing fast when no usable challenge config exists, and making
//! sure every attempt ends in exactly one of `update_issued` or
//! `update_failed`.

use std::sync::Arc;

use log::error;

use crate::{
    core::types::Certificate,
    domain::normalize_domain,
    error::{Error, Result},
    issuance::issuer::{CertificateIssuer, IssuedMaterial},
    service::{certificates::CertificateService, challenges::ChallengeConfigService},
};

#[derive(Clone)]
pub struct AcmeService {
    certificates: CertificateService,
    challenges: ChallengeConfigService,
    issuer: Arc<dyn CertificateIssuer>,
}

impl AcmeService {
    pub fn new(
        certificates: CertificateService,
        challenges: ChallengeConfigService,
        issuer: Arc<dyn CertificateIssuer>,
    ) -> Self {
        Self {
            certificates,
            challenges,
            issuer,
        }
    }

    /// Drives one certificate order for `domain` to completion or
    /// well-defined failure.
    ///
    /// A second call while an order is running is rejected with
    /// `OrderInProgress`, never queued; callers retry on their next cycle.
    /// The check-and-mark is one store transaction, so concurrent triggers
    /// cannot both proceed.
    pub fn order(&self, domain: &str) -> Result<Certificate> {
        let domain = normalize_domain(domain)?;
        self.certificates.begin_order(&domain)?;

        let outcome = self.run_order(&domain);
        let result = self.record_outcome(&domain, outcome);

        // Clear the mark only after the outcome is durable, so writes for
        // this domain stay serialized.
        if let Err(err) = self.certificates.finish_order(&domain) {
            error!("[acme] failed to clear in-flight mark for {domain}: {err}");
        }
        result
    }

    fn run_order(&self, domain: &str) -> Result<IssuedMaterial> {
        // No usable challenge config: fail before any authority contact.
        let config = match self.challenges.get(domain) {
            Ok(config) => config,
            Err(Error::NotFound) => return Err(Error::NoChallengeConfig),
            Err(err) => return Err(err),
        };
        if config.validate().is_err() {
            return Err(Error::NoChallengeConfig);
        }

        self.issuer.issue(domain, &config)
    }

    fn record_outcome(
        &self,
        domain: &str,
        outcome: Result<IssuedMaterial>,
    ) -> Result<Certificate> {
        match outcome {
            Ok(material) => self.certificates.update_issued(
                domain,
                &material.chain_pem,
                &material.key_pem,
                material.expires_at,
            ),
            Err(err) => {
                // A storage failure is not recorded through another storage
                // write; it propagates as-is.
                if !matches!(err, Error::Storage(_)) {
                    if let Err(record_err) =
                        self.certificates.update_failed(domain, &err.to_string())
                    {
                        error!("[acme] failed to record error for {domain}: {record_err}");
                    }
                }
                Err(err)
            }
        }
    }
}
