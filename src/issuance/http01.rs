//! HTTP-01 challenge solving against a shared webroot.
//!
//! The web server fronting the domain must serve files under
//! `<webroot>/.well-known/acme-challenge/` at the same path. The engine
//! writes the token file, optionally probes it through the public URL, and
//! removes it once the order finishes.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::{config::AcmeTimings, issuance::retry::poll_with_backoff};

pub const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

pub struct Http01Solver<'a> {
    webroot: &'a str,
    probe_url_base: Option<&'a str>,
}

impl<'a> Http01Solver<'a> {
    pub fn new(webroot: &'a str, probe_url_base: Option<&'a str>) -> Self {
        Self {
            webroot,
            probe_url_base,
        }
    }

    /// Writes the key-authorization file and returns its path.
    pub fn publish(&self, token: &str, proof: &str) -> Result<PathBuf> {
        let dir = Path::new(self.webroot).join(CHALLENGE_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = dir.join(token);
        fs::write(&path, proof)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("[http01] published token at {}", path.display());
        Ok(path)
    }

    pub fn cleanup(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            warn!("[http01] failed to remove {}: {err}", path.display());
        }
    }

    /// Best-effort preflight: fetches the token through the public URL the
    /// authority will use. A failing probe is logged but does not abort the
    /// order; the authority's own validation is authoritative.
    pub fn probe(&self, domain: &str, token: &str, proof: &str, timings: &AcmeTimings) {
        let base = match self.probe_url_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://{domain}"),
        };
        let url = format!("{base}/{CHALLENGE_DIR}/{token}");

        let outcome = poll_with_backoff(
            timings.http_probe_timeout,
            timings.dns_propagation_interval,
            timings.order_poll_max_backoff,
            || {
                match ureq::get(&url).call() {
                    Ok(response) => match response.into_string() {
                        Ok(body) if body.trim() == proof => Ok(Some(())),
                        Ok(_) => {
                            debug!("[http01] probe of {url} returned wrong body");
                            Ok(None)
                        }
                        Err(err) => {
                            debug!("[http01] probe of {url} body read failed: {err}");
                            Ok(None)
                        }
                    },
                    Err(err) => {
                        debug!("[http01] probe of {url} failed: {err}");
                        Ok(None)
                    }
                }
            },
        );

        match outcome {
            Ok(Some(())) => debug!("[http01] probe of {url} succeeded"),
            Ok(None) => warn!(
                "[http01] token for {domain} was not reachable at {url}; the authority may fail validation"
            ),
            Err(err) => warn!("[http01] probe of {url} errored: {err}"),
        }
    }
}
