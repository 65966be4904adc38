use std::{path::PathBuf, time::Duration};

use chrono::Duration as ChronoDuration;

/// Let's Encrypt production directory.
pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory, for development against rate-limit-free
/// infrastructure.
pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Polling bounds for one ACME order attempt.
///
/// Every wait against the authority or against DNS propagation is bounded by
/// one of these so a hung authority cannot occupy a renewal worker forever.
#[derive(Debug, Clone)]
pub struct AcmeTimings {
    /// Poll delay passed to the authority while waiting on challenge
    /// validation.
    pub validate_poll: Duration,
    /// Poll delay passed to the authority while waiting on order
    /// finalization.
    pub finalize_poll: Duration,
    /// How many times the order status is refreshed while waiting for
    /// authorizations to confirm before giving up.
    pub order_poll_attempts: u32,
    /// First wait between order refreshes; subsequent waits grow by half
    /// until `order_poll_max_backoff`.
    pub order_poll_backoff: Duration,
    pub order_poll_max_backoff: Duration,
    /// Total time allowed for a published TXT record to become visible on
    /// public resolvers.
    pub dns_propagation_timeout: Duration,
    /// First wait between propagation checks; grows with the same backoff
    /// policy.
    pub dns_propagation_interval: Duration,
    /// Total time allowed for the HTTP-01 self-probe to see the token.
    pub http_probe_timeout: Duration,
}

impl Default for AcmeTimings {
    fn default() -> Self {
        Self {
            validate_poll: Duration::from_secs(5),
            finalize_poll: Duration::from_secs(5),
            order_poll_attempts: 12,
            order_poll_backoff: Duration::from_secs(2),
            order_poll_max_backoff: Duration::from_secs(60),
            dns_propagation_timeout: Duration::from_secs(120),
            dns_propagation_interval: Duration::from_secs(5),
            http_probe_timeout: Duration::from_secs(30),
        }
    }
}

/// Renewal scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wake interval between renewal passes.
    pub interval: Duration,
    /// Lead time before expiry during which an active certificate becomes
    /// eligible for renewal.
    pub renewal_window: ChronoDuration,
    /// Concurrent renewal workers per pass.
    pub workers: usize,
    /// Upper bound on one pass; domains still queued when it elapses are
    /// picked up on the next wake.
    pub pass_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            renewal_window: ChronoDuration::days(30),
            workers: 2,
            pass_deadline: Duration::from_secs(15 * 60),
        }
    }
}

/// Engine configuration, resolved once by the embedding process at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Contact email registered with the ACME account.
    pub contact_email: String,
    /// ACME directory URL of the authority.
    pub directory_url: String,
    /// SQLite database file backing all entity buckets.
    pub db_path: PathBuf,
    /// Administrative flag: rotate the API signing secret at startup,
    /// invalidating all previously issued sessions.
    pub reset_signing_secret: bool,
    pub scheduler: SchedulerConfig,
    pub acme: AcmeTimings,
}

impl EngineConfig {
    pub fn new(contact_email: impl Into<String>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            contact_email: contact_email.into(),
            directory_url: LETS_ENCRYPT_DIRECTORY.to_string(),
            db_path: db_path.into(),
            reset_signing_secret: false,
            scheduler: SchedulerConfig::default(),
            acme: AcmeTimings::default(),
        }
    }
}
