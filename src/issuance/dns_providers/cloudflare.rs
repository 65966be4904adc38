use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{DnsProviderAdapter, http, matches_zone};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
// Cloudflare error code for "record already exists".
const CODE_RECORD_EXISTS: u32 = 81058;

pub struct CloudflareAdapter {
    api_token: String,
    zone: String,
}

#[derive(Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ZoneListResponse {
    result: Vec<Zone>,
    success: bool,
}

#[derive(Serialize)]
struct TxtRecord {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: String,
    content: String,
    ttl: u32,
}

#[derive(Deserialize)]
struct RecordResult {
    id: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct RecordResponse {
    result: Option<RecordResult>,
    success: bool,
    errors: Option<Vec<ApiError>>,
}

#[derive(Deserialize)]
struct RecordListResponse {
    result: Vec<RecordResult>,
    success: bool,
}

#[derive(Deserialize)]
struct ApiError {
    code: u32,
    message: String,
}

impl CloudflareAdapter {
    pub fn new(api_token: String, zone: String) -> Self {
        Self { api_token, zone }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_token)
    }

    fn discover_zone_id(&self) -> Result<String> {
        let response = http::HttpClient::shared()
            .get(format!("{API_BASE}/zones"))
            .header("Authorization", self.auth_header())
            .send()
            .context("failed to list Cloudflare zones")?;

        if !response.status().is_success() {
            return Err(http::status_error("Cloudflare", response.status(), None));
        }

        let zones: ZoneListResponse = response
            .json()
            .context("failed to parse Cloudflare zone list")?;
        if !zones.success {
            return Err(anyhow!("Cloudflare zone list reported failure"));
        }

        zones
            .result
            .iter()
            .find(|zone| matches_zone(&self.zone, &zone.name))
            .map(|zone| zone.id.clone())
            .ok_or_else(|| anyhow!("no Cloudflare zone found for {}", self.zone))
    }

    fn list_txt_records(&self, zone_id: &str, record_name: &str) -> Result<Vec<RecordResult>> {
        let response = http::HttpClient::shared()
            .get(format!(
                "{API_BASE}/zones/{zone_id}/dns_records?type=TXT&name={record_name}"
            ))
            .header("Authorization", self.auth_header())
            .send()
            .context("failed to list Cloudflare DNS records")?;

        if !response.status().is_success() {
            return Err(http::status_error("Cloudflare", response.status(), None));
        }

        let list: RecordListResponse = response
            .json()
            .context("failed to parse Cloudflare DNS record list")?;
        if !list.success {
            return Err(anyhow!("Cloudflare record list reported failure"));
        }
        Ok(list.result)
    }

    fn update_record(&self, zone_id: &str, record_id: &str, record: &TxtRecord) -> Result<()> {
        let response = http::HttpClient::shared()
            .put(format!("{API_BASE}/zones/{zone_id}/dns_records/{record_id}"))
            .header("Authorization", self.auth_header())
            .json(record)
            .send()
            .context("failed to update Cloudflare DNS record")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(http::status_error("Cloudflare", status, Some(body)));
        }
        Ok(())
    }
}

fn format_txt_content(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed.to_string()
    } else {
        format!("\"{}\"", trimmed.trim_matches('"'))
    }
}

fn has_error_code(errors: &Option<Vec<ApiError>>, code: u32) -> bool {
    errors
        .as_ref()
        .map(|errors| errors.iter().any(|err| err.code == code))
        .unwrap_or(false)
}

impl DnsProviderAdapter for CloudflareAdapter {
    fn publish_txt(&self, record_name: &str, value: &str) -> Result<()> {
        let zone_id = self.discover_zone_id()?;
        let content = format_txt_content(value);

        // An identical record left over from an earlier attempt is fine.
        let existing = self.list_txt_records(&zone_id, record_name)?;
        if existing
            .iter()
            .any(|record| record.content.as_deref() == Some(content.as_str()))
        {
            debug!("[cloudflare] {record_name} already carries the proof");
            return Ok(());
        }

        let record = TxtRecord {
            record_type: "TXT",
            name: record_name.to_string(),
            content: content.clone(),
            ttl: 120,
        };

        let response = http::HttpClient::shared()
            .post(format!("{API_BASE}/zones/{zone_id}/dns_records"))
            .header("Authorization", self.auth_header())
            .json(&record)
            .send()
            .context("failed to create Cloudflare DNS record")?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        let parsed: Option<RecordResponse> = serde_json::from_str(&body).ok();

        let record_exists = parsed
            .as_ref()
            .map(|resp| has_error_code(&resp.errors, CODE_RECORD_EXISTS))
            .unwrap_or(false);

        if record_exists {
            // Same name, different content: overwrite the stale proof.
            let stale = self.list_txt_records(&zone_id, record_name)?;
            for old in stale {
                self.update_record(&zone_id, &old.id, &record)?;
            }
            return Ok(());
        }

        if !status.is_success() {
            return Err(http::status_error("Cloudflare", status, Some(body)));
        }

        match parsed {
            Some(resp) if resp.success && resp.result.is_some() => {
                debug!("[cloudflare] published TXT {record_name}");
                Ok(())
            }
            Some(resp) => {
                let detail = resp
                    .errors
                    .map(|errors| {
                        errors
                            .iter()
                            .map(|err| format!("{}: {}", err.code, err.message))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_else(|| "unknown error".to_string());
                Err(anyhow!("Cloudflare API error: {detail}"))
            }
            None => Err(anyhow!("unparseable Cloudflare create response")),
        }
    }

    fn cleanup_txt(&self, record_name: &str) -> Result<()> {
        let zone_id = self.discover_zone_id()?;
        let records = self.list_txt_records(&zone_id, record_name)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut first_failure = None;
        for record in records {
            let response = http::HttpClient::shared()
                .delete(format!(
                    "{API_BASE}/zones/{zone_id}/dns_records/{}",
                    record.id
                ))
                .header("Authorization", self.auth_header())
                .send()
                .context("failed to delete Cloudflare DNS record")?;

            let status = response.status();
            // 404 means another cleanup got there first.
            if !status.is_success() && status.as_u16() != 404 && first_failure.is_none() {
                first_failure = Some(http::status_error("Cloudflare", status, None));
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                debug!("[cloudflare] cleaned up TXT {record_name}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_content_is_quoted_once() {
        assert_eq!(format_txt_content("proof"), "\"proof\"");
        assert_eq!(format_txt_content("\"proof\""), "\"proof\"");
        assert_eq!(format_txt_content("  proof  "), "\"proof\"");
    }

    #[test]
    fn detects_record_exists_code() {
        let errors = Some(vec![ApiError {
            code: CODE_RECORD_EXISTS,
            message: "already exists".into(),
        }]);
        assert!(has_error_code(&errors, CODE_RECORD_EXISTS));
        assert!(!has_error_code(&errors, 10000));
        assert!(!has_error_code(&None, CODE_RECORD_EXISTS));
    }
}
