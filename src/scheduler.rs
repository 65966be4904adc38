//! Background certificate renewal.
//!
//! One long-lived scheduler thread wakes on a fixed interval, scans every
//! certificate, and dispatches the due ones through a small pool of renewal
//! workers. A failure for one domain never aborts the pass for the rest;
//! that isolation is the point of the design.

use std::{
    sync::{Arc, Condvar, Mutex, mpsc},
    thread,
    time::Instant,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};

use crate::{
    config::SchedulerConfig,
    core::types::{Certificate, CertificateStatus},
    error::{Error, Result},
    service::{acme::AcmeService, certificates::CertificateService},
};

/// Whether a certificate should be picked up by a renewal pass at `now`.
///
/// `Pending` and `Error` records are always eligible for a retry; `Active`
/// ones only once they enter the renewal window before expiry.
pub fn due_for_renewal(cert: &Certificate, now: DateTime<Utc>, window: ChronoDuration) -> bool {
    match cert.status {
        CertificateStatus::Pending | CertificateStatus::Error => true,
        CertificateStatus::Active => cert.expires_within(now, window),
    }
}

struct SchedulerInner {
    certificates: CertificateService,
    acme: AcmeService,
    config: SchedulerConfig,
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// The renewal loop, owned by the process: explicit start/stop lifecycle
/// instead of a fire-and-forget task, and a bounded worker pool instead of
/// unbounded fan-out.
pub struct RenewalScheduler {
    inner: Arc<SchedulerInner>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RenewalScheduler {
    pub fn new(
        certificates: CertificateService,
        acme: AcmeService,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                certificates,
                acme,
                config,
                stopped: Mutex::new(false),
                wake: Condvar::new(),
            }),
            handle: None,
        }
    }

    /// Spawns the scheduler thread. Idempotent while running.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        if let Ok(mut stopped) = self.inner.stopped.lock() {
            *stopped = false;
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("renewd-scheduler".into())
            .spawn(move || inner.run())
            .map_err(|err| Error::Storage(format!("failed to spawn scheduler thread: {err}")))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Signals the loop to stop and waits for the current pass's in-flight
    /// work to finish or fail naturally.
    pub fn stop(&mut self) {
        if let Ok(mut stopped) = self.inner.stopped.lock() {
            *stopped = true;
        }
        self.inner.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Runs a single renewal pass synchronously. Used by the manual
    /// "renew everything now" trigger and by tests.
    pub fn run_pass(&self) {
        self.inner.run_pass();
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SchedulerInner {
    fn run(&self) {
        info!(
            "[scheduler] started; interval {:?}, window {} days, {} workers",
            self.config.interval,
            self.config.renewal_window.num_days(),
            self.config.workers.max(1)
        );

        loop {
            self.run_pass();

            let Ok(guard) = self.stopped.lock() else {
                return;
            };
            let Ok((guard, _)) = self
                .wake
                .wait_timeout_while(guard, self.config.interval, |stopped| !*stopped)
            else {
                return;
            };
            if *guard {
                info!("[scheduler] stopped");
                return;
            }
        }
    }

    fn run_pass(&self) {
        let now = Utc::now();
        let certs = match self.certificates.list() {
            Ok(certs) => certs,
            Err(err) => {
                error!("[scheduler] listing certificates failed: {err}");
                return;
            }
        };

        let due: Vec<String> = certs
            .iter()
            .filter(|cert| due_for_renewal(cert, now, self.config.renewal_window))
            .map(|cert| cert.domain.clone())
            .collect();

        if due.is_empty() {
            debug!(
                "[scheduler] pass: nothing due among {} certificates",
                certs.len()
            );
            return;
        }
        info!(
            "[scheduler] pass: {}/{} certificates due for renewal",
            due.len(),
            certs.len()
        );

        let deadline = Instant::now() + self.config.pass_deadline;
        let workers = self.config.workers.max(1);

        let (tx, rx) = mpsc::channel::<String>();
        for domain in due {
            // Receiver outlives this loop; send cannot fail here.
            let _ = tx.send(domain);
        }
        drop(tx);
        let rx = Arc::new(Mutex::new(rx));

        thread::scope(|scope| {
            for _ in 0..workers {
                let rx = Arc::clone(&rx);
                scope.spawn(move || {
                    loop {
                        if Instant::now() >= deadline {
                            break;
                        }
                        let job = match rx.lock() {
                            Ok(guard) => guard.recv(),
                            Err(_) => break,
                        };
                        let Ok(domain) = job else { break };
                        self.renew_one(&domain);
                    }
                });
            }
        });

        let deferred = Arc::try_unwrap(rx)
            .ok()
            .and_then(|mutex| mutex.into_inner().ok())
            .map(|rx| rx.try_iter().count())
            .unwrap_or(0);
        if deferred > 0 {
            warn!(
                "[scheduler] pass deadline reached; {deferred} domains deferred to the next wake"
            );
        }
    }

    fn renew_one(&self, domain: &str) {
        debug!("[scheduler] triggering renewal for {domain}");
        match self.acme.order(domain) {
            Ok(cert) => info!(
                "[scheduler] renewed {domain}; expires {}",
                cert.expires_at
                    .map(|expires_at| expires_at.to_rfc3339())
                    .unwrap_or_else(|| "unknown".into())
            ),
            // Another trigger got there first; this domain's order is
            // already being handled.
            Err(Error::OrderInProgress) => {
                debug!("[scheduler] {domain}: order already in progress, skipping")
            }
            // A lost write is the one failure the engine cannot paper over.
            Err(Error::Storage(err)) => {
                error!("[scheduler] {domain}: storage failure during renewal: {err}")
            }
            // Recorded on the certificate by the orchestrator; the pass
            // moves on to the other domains.
            Err(err) => warn!("[scheduler] {domain}: renewal failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cert_with(status: CertificateStatus, expires_in_days: Option<i64>) -> Certificate {
        let mut cert = Certificate::new("example.test".into());
        cert.status = status;
        cert.expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));
        cert
    }

    #[test]
    fn selects_only_certificates_inside_the_window() {
        let now = Utc::now();
        let window = Duration::days(30);

        let close = cert_with(CertificateStatus::Active, Some(5));
        let distant = cert_with(CertificateStatus::Active, Some(40));

        assert!(due_for_renewal(&close, now, window));
        assert!(!due_for_renewal(&distant, now, window));
    }

    #[test]
    fn pending_and_error_are_always_due() {
        let now = Utc::now();
        let window = Duration::days(30);

        assert!(due_for_renewal(
            &cert_with(CertificateStatus::Pending, None),
            now,
            window
        ));
        assert!(due_for_renewal(
            &cert_with(CertificateStatus::Error, Some(300)),
            now,
            window
        ));
    }

    #[test]
    fn active_without_expiry_is_due() {
        assert!(due_for_renewal(
            &cert_with(CertificateStatus::Active, None),
            Utc::now(),
            Duration::days(30)
        ));
    }
}
