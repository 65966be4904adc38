use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of a managed certificate.
///
/// `Pending` covers a registered domain before its first successful issuance,
/// `Active` means a certificate is stored and serving, `Error` means the last
/// order attempt failed. `Error` never implies the stored chain was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Pending,
    Active,
    Error,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Pending => "pending",
            CertificateStatus::Active => "active",
            CertificateStatus::Error => "error",
        }
    }
}

/// A managed certificate record, keyed by domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Normalized domain name; the record's primary key.
    pub domain: String,
    pub status: CertificateStatus,
    /// PEM-encoded certificate chain; populated on first successful issuance.
    pub chain_pem: Option<String>,
    /// PEM-encoded private key matching `chain_pem`.
    pub key_pem: Option<String>,
    /// Serial of the current leaf certificate as a hex string.
    pub serial: Option<String>,
    /// SHA-256 fingerprint of the current leaf certificate.
    pub fingerprint: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Error from the most recent failed order attempt.
    pub last_error: Option<String>,
    /// Durable single-flight mark: set while an order is running for this
    /// domain, cleared when the attempt finishes either way.
    pub order_in_flight: bool,
}

impl Certificate {
    pub fn new(domain: String) -> Self {
        Self {
            domain,
            status: CertificateStatus::Pending,
            chain_pem: None,
            key_pem: None,
            serial: None,
            fingerprint: None,
            issued_at: None,
            expires_at: None,
            last_error: None,
            order_in_flight: false,
        }
    }

    /// Whether the stored certificate expires within `window` of `now`.
    /// Records without an expiry are treated as expiring.
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - window <= now,
            None => true,
        }
    }
}

/// DNS providers the engine can publish TXT records through.
///
/// `Manual` means the operator maintains the record out of band; the engine
/// only polls for propagation before asking the authority to validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum DnsProvider {
    Cloudflare {
        api_token: String,
        /// Zone override; derived from the domain when absent.
        zone: Option<String>,
    },
    Manual,
}

/// How control of a domain is proven during an ACME order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ChallengeMethod {
    Dns01 {
        #[serde(flatten)]
        dns: DnsProvider,
    },
    Http01 {
        /// Directory the token file is written under; the web server must
        /// expose it at `/.well-known/acme-challenge/`.
        webroot: String,
        /// Base URL for the optional post-publication self-probe.
        probe_url_base: Option<String>,
    },
}

impl ChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::Dns01 { .. } => "dns-01",
            ChallengeMethod::Http01 { .. } => "http-01",
        }
    }
}

/// Per-domain challenge-solving configuration, linked 1:1 to a certificate
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeConfig {
    pub domain: String,
    #[serde(flatten)]
    pub method: ChallengeMethod,
}

impl ChallengeConfig {
    /// Checks that the method-specific required parameters are present.
    pub fn validate(&self) -> Result<()> {
        match &self.method {
            ChallengeMethod::Dns01 { dns } => match dns {
                DnsProvider::Cloudflare { api_token, zone } => {
                    if api_token.trim().is_empty() {
                        return Err(Error::InvalidConfig(
                            "cloudflare api_token is required".into(),
                        ));
                    }
                    if let Some(zone) = zone {
                        if zone.trim().is_empty() {
                            return Err(Error::InvalidConfig(
                                "zone must be non-empty when set".into(),
                            ));
                        }
                    }
                    Ok(())
                }
                DnsProvider::Manual => Ok(()),
            },
            ChallengeMethod::Http01 { webroot, .. } => {
                if webroot.trim().is_empty() {
                    return Err(Error::InvalidConfig("http-01 webroot is required".into()));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_cert(expires_in_days: i64) -> Certificate {
        let mut cert = Certificate::new("example.test".into());
        cert.status = CertificateStatus::Active;
        cert.expires_at = Some(Utc::now() + Duration::days(expires_in_days));
        cert
    }

    #[test]
    fn new_certificate_is_pending_without_material() {
        let cert = Certificate::new("example.test".into());
        assert_eq!(cert.status, CertificateStatus::Pending);
        assert!(cert.chain_pem.is_none());
        assert!(cert.key_pem.is_none());
        assert!(!cert.order_in_flight);
    }

    #[test]
    fn expires_within_respects_window() {
        let now = Utc::now();
        assert!(active_cert(5).expires_within(now, Duration::days(30)));
        assert!(!active_cert(40).expires_within(now, Duration::days(30)));
    }

    #[test]
    fn expires_within_treats_missing_expiry_as_due() {
        let mut cert = Certificate::new("example.test".into());
        cert.status = CertificateStatus::Active;
        assert!(cert.expires_within(Utc::now(), Duration::days(30)));
    }

    #[test]
    fn cloudflare_config_requires_token() {
        let config = ChallengeConfig {
            domain: "example.test".into(),
            method: ChallengeMethod::Dns01 {
                dns: DnsProvider::Cloudflare {
                    api_token: String::new(),
                    zone: None,
                },
            },
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn manual_dns_config_is_valid() {
        let config = ChallengeConfig {
            domain: "example.test".into(),
            method: ChallengeMethod::Dns01 {
                dns: DnsProvider::Manual,
            },
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn http01_config_requires_webroot() {
        let config = ChallengeConfig {
            domain: "example.test".into(),
            method: ChallengeMethod::Http01 {
                webroot: "  ".into(),
                probe_url_base: None,
            },
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn challenge_config_round_trips_through_json() {
        let config = ChallengeConfig {
            domain: "example.test".into(),
            method: ChallengeMethod::Dns01 {
                dns: DnsProvider::Cloudflare {
                    api_token: "token".into(),
                    zone: Some("example.test".into()),
                },
            },
        };
        let raw = serde_json::to_string(&config).unwrap();
        let parsed: ChallengeConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
