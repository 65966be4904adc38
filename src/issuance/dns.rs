//! DNS-01 propagation checks over public DNS-over-HTTPS resolvers.
//!
//! Before asking the authority to validate a DNS challenge, the engine waits
//! until the published TXT record is visible on public resolvers; validating
//! earlier just burns the authority's rate limits on a guaranteed failure.

use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;

use crate::{
    config::AcmeTimings,
    error::{Error, Result},
    issuance::retry::poll_with_backoff,
};

/// TXT record name carrying the challenge proof for `domain`.
pub fn record_name(domain: &str) -> String {
    let trimmed = domain.trim_end_matches('.');
    if trimmed.starts_with("_acme-challenge.") {
        trimmed.to_string()
    } else {
        format!("_acme-challenge.{trimmed}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationState {
    Found,
    Pending,
    NxDomain,
    WrongContent,
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct Propagation {
    pub state: PropagationState,
    pub observed: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer")]
    answer: Option<Vec<DohAnswer>>,
}

const DOH_RESOLVERS: &[(&str, &str)] = &[
    ("Google DNS", "https://dns.google/resolve"),
    ("Cloudflare DNS", "https://cloudflare-dns.com/dns-query"),
];

/// Queries the public resolvers once and interprets the combined result.
pub fn check_txt(name: &str, expected: &str) -> Propagation {
    let agent = ureq::AgentBuilder::new().timeout(doh_timeout()).build();
    let mut responses = Vec::new();

    for (resolver, base) in DOH_RESOLVERS {
        let url = format!("{base}?name={name}&type=TXT");
        let response = agent
            .get(&url)
            .set("Accept", "application/dns-json")
            .call();
        match response {
            Ok(resp) => match resp
                .into_string()
                .map_err(|err| err.to_string())
                .and_then(|body| {
                    serde_json::from_str::<DohResponse>(&body).map_err(|err| err.to_string())
                }) {
                Ok(parsed) => {
                    debug!(
                        "[dns] {resolver} answered for {name}: status={} answers={}",
                        parsed.status,
                        parsed.answer.as_ref().map_or(0, Vec::len)
                    );
                    responses.push(parsed);
                }
                Err(err) => warn!("[dns] {resolver} returned unparseable body for {name}: {err}"),
            },
            Err(err) => warn!("[dns] {resolver} query failed for {name}: {err}"),
        }
    }

    interpret(&responses, expected)
}

/// Waits until the TXT record at `name` carries `expected`, within the
/// configured propagation bounds. Timeout yields `ChallengeTimeout`.
pub fn wait_for_propagation(name: &str, expected: &str, timings: &AcmeTimings) -> Result<()> {
    let found = poll_with_backoff(
        timings.dns_propagation_timeout,
        timings.dns_propagation_interval,
        timings.order_poll_max_backoff,
        || {
            let propagation = check_txt(name, expected);
            match propagation.state {
                PropagationState::Found => Ok(Some(())),
                state => {
                    debug!("[dns] {name} not propagated yet ({state:?})");
                    Ok(None)
                }
            }
        },
    )?;

    match found {
        Some(()) => Ok(()),
        None => {
            warn!("[dns] propagation deadline passed for {name}");
            Err(Error::ChallengeTimeout)
        }
    }
}

fn interpret(responses: &[DohResponse], expected: &str) -> Propagation {
    let mut observed = Vec::new();
    let mut saw_ok = false;
    let mut saw_nxdomain = false;

    for response in responses {
        if let Some(answers) = &response.answer {
            for answer in answers {
                if let Some(data) = &answer.data {
                    observed.push(trim_txt_quotes(data));
                }
            }
        }
        match response.status {
            0 => saw_ok = true,
            3 => saw_nxdomain = true,
            other => warn!("[dns] unexpected resolver status {other}"),
        }
    }

    let state = if observed.iter().any(|value| value == expected) {
        PropagationState::Found
    } else if !observed.is_empty() {
        PropagationState::WrongContent
    } else if saw_ok {
        PropagationState::Pending
    } else if saw_nxdomain {
        PropagationState::NxDomain
    } else {
        PropagationState::Unreachable
    };

    Propagation { state, observed }
}

fn trim_txt_quotes(value: &str) -> String {
    value.trim().trim_matches('"').trim().to_string()
}

fn doh_timeout() -> Duration {
    const DEFAULT_TIMEOUT_SECS: u64 = 10;
    let timeout = std::env::var("RENEWD_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout == 0 {
        return Duration::from_secs(DEFAULT_TIMEOUT_SECS);
    }
    Duration::from_secs(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u32, answers: &[&str]) -> DohResponse {
        DohResponse {
            status,
            answer: (!answers.is_empty()).then(|| {
                answers
                    .iter()
                    .map(|data| DohAnswer {
                        data: Some((*data).to_string()),
                    })
                    .collect()
            }),
        }
    }

    #[test]
    fn record_name_prefixes_challenge_label() {
        assert_eq!(record_name("example.com"), "_acme-challenge.example.com");
        assert_eq!(
            record_name("_acme-challenge.example.com"),
            "_acme-challenge.example.com"
        );
    }

    #[test]
    fn found_when_any_answer_matches() {
        let result = interpret(
            &[response(0, &["\"other\"", "\"proof\""])],
            "proof",
        );
        assert_eq!(result.state, PropagationState::Found);
    }

    #[test]
    fn found_beats_nxdomain_from_other_resolver() {
        let result = interpret(
            &[response(3, &[]), response(0, &["\"proof\""])],
            "proof",
        );
        assert_eq!(result.state, PropagationState::Found);
    }

    #[test]
    fn wrong_content_when_answers_do_not_match() {
        let result = interpret(&[response(0, &["\"stale\""])], "proof");
        assert_eq!(result.state, PropagationState::WrongContent);
        assert_eq!(result.observed, vec!["stale"]);
    }

    #[test]
    fn pending_when_ok_without_answers() {
        let result = interpret(&[response(0, &[])], "proof");
        assert_eq!(result.state, PropagationState::Pending);
    }

    #[test]
    fn nxdomain_when_only_nxdomain_seen() {
        let result = interpret(&[response(3, &[])], "proof");
        assert_eq!(result.state, PropagationState::NxDomain);
    }

    #[test]
    fn unreachable_when_no_responses() {
        let result = interpret(&[], "proof");
        assert_eq!(result.state, PropagationState::Unreachable);
    }
}
