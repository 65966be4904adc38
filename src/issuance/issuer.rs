use chrono::{DateTime, Utc};

use crate::{core::types::ChallengeConfig, error::Result};

/// Material produced by a completed certificate order.
#[derive(Debug, Clone)]
pub struct IssuedMaterial {
    /// PEM-encoded certificate chain as downloaded from the authority.
    pub chain_pem: String,
    /// PEM-encoded private key the signing request was built with.
    pub key_pem: String,
    /// Expiry of the issued leaf certificate.
    pub expires_at: DateTime<Utc>,
}

/// The protocol conversation with a certificate authority.
///
/// One implementation talks real ACME (`issuance::acme::AcmeIssuer`); tests
/// substitute stubs to drive the orchestration and persistence paths without
/// a network.
pub trait CertificateIssuer: Send + Sync {
    /// Drives a single order for `domain` to completion, solving challenges
    /// with `config`. Blocks for the duration of the order; every internal
    /// wait is bounded.
    fn issue(&self, domain: &str, config: &ChallengeConfig) -> Result<IssuedMaterial>;
}
