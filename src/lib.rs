//! Certificate lifecycle engine.
//!
//! Automates TLS certificates for a set of managed domains through the ACME
//! protocol: registration, challenge solving, issuance, durable storage, and
//! scheduled renewal. The HTTP surface, web UI, and session gate in front of
//! it are external; they call into [`Engine`]'s services and consume the
//! signing secret it manages.

use std::sync::Arc;

use log::{info, warn};
use zeroize::Zeroizing;

pub mod auth;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod issuance;
pub mod scheduler;
pub mod service;
pub mod storage;

pub use crate::{
    config::EngineConfig,
    error::{Error, Result},
};

use crate::{
    issuance::{acme::AcmeIssuer, issuer::CertificateIssuer},
    scheduler::RenewalScheduler,
    service::{
        acme::AcmeService, certificates::CertificateService, challenges::ChallengeConfigService,
    },
    storage::{
        account::AccountStore, certificates::CertificateStore, challenges::ChallengeConfigStore,
        db::Db,
    },
};

/// The assembled engine: store, repositories, services, and scheduler, wired
/// once at startup by explicit injection.
pub struct Engine {
    accounts: AccountStore,
    certificates: CertificateService,
    challenges: ChallengeConfigService,
    acme: AcmeService,
    scheduler: RenewalScheduler,
}

impl Engine {
    /// Opens the store and assembles the engine against the real ACME
    /// authority named in `config`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let db = Db::open(&config.db_path)?;
        let accounts = AccountStore::new(db.clone());
        let issuer = Arc::new(AcmeIssuer::new(
            db.clone(),
            accounts.clone(),
            config.directory_url.clone(),
            config.contact_email.clone(),
            config.acme.clone(),
        ));
        Self::assemble(db, config, issuer)
    }

    /// Assembles the engine over an already opened store and a caller-chosen
    /// issuer. This is the injection seam tests use to stand in for the
    /// authority.
    pub fn assemble(
        db: Db,
        config: EngineConfig,
        issuer: Arc<dyn CertificateIssuer>,
    ) -> Result<Self> {
        let accounts = AccountStore::new(db.clone());
        if config.reset_signing_secret {
            accounts.rotate_signing_secret()?;
        } else {
            accounts.ensure_signing_secret()?;
        }

        let cert_store = CertificateStore::new(db.clone());
        let released = cert_store.release_stale_orders()?;
        if released > 0 {
            warn!("[engine] released {released} stale in-flight order marks from a previous run");
        }

        let certificates = CertificateService::new(cert_store);
        let challenges = ChallengeConfigService::new(ChallengeConfigStore::new(db));
        let acme = AcmeService::new(certificates.clone(), challenges.clone(), issuer);
        let scheduler = RenewalScheduler::new(
            certificates.clone(),
            acme.clone(),
            config.scheduler.clone(),
        );

        info!("[engine] assembled for {}", config.directory_url);
        Ok(Self {
            accounts,
            certificates,
            challenges,
            acme,
            scheduler,
        })
    }

    pub fn certificates(&self) -> &CertificateService {
        &self.certificates
    }

    pub fn challenges(&self) -> &ChallengeConfigService {
        &self.challenges
    }

    /// Order orchestration, for manual renewal triggers from the API layer.
    pub fn acme(&self) -> &AcmeService {
        &self.acme
    }

    /// Starts the background renewal loop.
    pub fn start_scheduler(&mut self) -> Result<()> {
        self.scheduler.start()
    }

    /// Stops the loop, letting the current pass's in-flight orders finish.
    pub fn stop_scheduler(&mut self) {
        self.scheduler.stop();
    }

    /// Runs one renewal pass synchronously (manual "renew all" trigger).
    pub fn run_renewal_pass(&self) {
        self.scheduler.run_pass();
    }

    /// Current API signing secret for the external session gate.
    pub fn signing_secret(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.accounts.ensure_signing_secret()
    }

    /// Rotates the signing secret, invalidating all outstanding sessions.
    pub fn rotate_signing_secret(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.accounts.rotate_signing_secret()
    }
}
