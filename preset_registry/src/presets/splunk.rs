use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use provisioner_shared_types::{
    Address, PortSpec, Preset, PresetKind, ProvisionError, SplunkEvent, SplunkPreset,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{endpoint, ensure_success, expect_preset, http_client, seed_endpoint};
use crate::error::{ProbeFailure, SeedError};
use crate::handler::{ImageSpec, PresetHandler};
use crate::seed_files::read_json_lines;

const COLLECTOR_PORT: &str = "collector";
const API_PORT: &str = "api";
const WEB_PORT: &str = "web";

const ADMIN_USER: &str = "admin";
const DEFAULT_PASSWORD: &str = "changeme";
const MIN_PASSWORD_LEN: usize = 8;

/// Indexes every Splunk installation starts with.
const BUILTIN_INDEX: &str = "main";

const COUNT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const INGEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SplunkHandler;

impl SplunkHandler {
    fn password(p: &SplunkPreset) -> &str {
        p.admin_password.as_deref().unwrap_or(DEFAULT_PASSWORD)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    entry: Vec<TokenEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenEntry {
    content: TokenContent,
}

#[derive(Debug, Deserialize)]
struct TokenContent {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SearchLine {
    result: Option<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    count: Option<String>,
}

/// Total event count from an export search; the response is one JSON
/// object per line and the last line with a count wins.
fn parse_event_count(body: &str) -> Option<u64> {
    body.lines()
        .filter_map(|line| serde_json::from_str::<SearchLine>(line).ok())
        .filter_map(|line| line.result.and_then(|r| r.count))
        .filter_map(|count| count.parse().ok())
        .last()
}

/// Talks to the management API and event collector of one container.
struct SplunkApi {
    client: reqwest::Client,
    api: String,
    collector: String,
    password: String,
}

impl SplunkApi {
    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<reqwest::Response, String> {
        self.client
            .post(format!("https://{}{}", self.api, path))
            .basic_auth(ADMIN_USER, Some(&self.password))
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())
    }

    async fn issue_token(&self) -> Result<String, String> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let name = format!("provisioner-{nanos}");

        let response = self
            .post_form("/services/data/inputs/http?output_mode=json", &[("name", name.as_str())])
            .await?;
        let response: TokenResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        response
            .entry
            .into_iter()
            .next()
            .map(|entry| entry.content.token)
            .ok_or_else(|| "token response has no entries".to_string())
    }

    async fn create_index(&self, index: &str) -> Result<(), String> {
        let response = self
            .post_form("/services/data/indexes?output_mode=json", &[("name", index)])
            .await?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        ensure_success(response).await.map(|_| ())
    }

    async fn count_events(&self) -> Result<u64, String> {
        let response = self
            .post_form(
                "/services/search/jobs/export",
                &[("search", "search index=* | stats count"), ("output_mode", "json")],
            )
            .await?;
        let body = ensure_success(response)
            .await?
            .text()
            .await
            .map_err(|e| e.to_string())?;

        parse_event_count(&body).ok_or_else(|| format!("no event count in search response: {body}"))
    }

    async fn send_event(&self, token: &str, event: &SplunkEvent) -> Result<(), String> {
        let response = self
            .client
            .post(format!("https://{}/services/collector?output_mode=json", self.collector))
            .header(reqwest::header::AUTHORIZATION, format!("Splunk {token}"))
            .json(event)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        ensure_success(response).await.map(|_| ())
    }
}

#[async_trait]
impl PresetHandler for SplunkHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Splunk
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        let p = expect_preset!(preset, Splunk, self.kind())?;
        Ok(ImageSpec::new("docker.io/splunk/splunk", "latest")
            .with_port(COLLECTOR_PORT, PortSpec::tcp(8088))
            .with_port(API_PORT, PortSpec::tcp(8089))
            .with_port(WEB_PORT, PortSpec::tcp(8000))
            .with_env("SPLUNK_START_ARGS", "--accept-license")
            .with_env("SPLUNK_PASSWORD", Self::password(p)))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Splunk, self.kind())?;
        if !p.accept_license {
            return Err(ProvisionError::validation(
                "splunk: the Splunk license must be accepted (accept_license: true)",
            ));
        }
        if Self::password(p).len() < MIN_PASSWORD_LEN {
            return Err(ProvisionError::validation(format!(
                "splunk: admin_password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }

    async fn health_check(&self, preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let p = expect_preset!(preset, Splunk, self.kind())?;
        let client = http_client().map_err(ProbeFailure::context("http client"))?;
        let api = endpoint(address, API_PORT)?;
        let collector = endpoint(address, COLLECTOR_PORT)?;

        let login = client
            .post(format!("https://{api}/services/auth/login"))
            .form(&[("username", ADMIN_USER), ("password", Self::password(p))])
            .send()
            .await
            .map_err(ProbeFailure::context("login"))?;
        ensure_success(login).await.map_err(ProbeFailure::context("login"))?;

        let health = client
            .get(format!("https://{collector}/services/collector/health"))
            .send()
            .await
            .map_err(ProbeFailure::context("collector health"))?;
        ensure_success(health)
            .await
            .map(|_| ())
            .map_err(ProbeFailure::context("collector health"))
    }

    /// Events from `values_file` go first, then the literal values. Returns
    /// once the indexed event count reflects every event sent.
    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Splunk, self.kind())?;
        let kind = self.kind();

        let mut events: Vec<SplunkEvent> = match &p.values_file {
            Some(path) => read_json_lines(path)?,
            None => Vec::new(),
        };
        events.extend(p.values.iter().cloned());
        if events.is_empty() {
            return Ok(());
        }

        let api = SplunkApi {
            client: http_client().map_err(SeedError::connection(kind))?,
            api: seed_endpoint(address, API_PORT, kind)?,
            collector: seed_endpoint(address, COLLECTOR_PORT, kind)?,
            password: Self::password(p).to_string(),
        };

        let token = api.issue_token().await.map_err(SeedError::connection(kind))?;
        let initial = api.count_events().await.map_err(SeedError::connection(kind))?;

        let mut indexes: BTreeSet<String> = BTreeSet::from([BUILTIN_INDEX.to_string()]);
        for event in &events {
            if !event.index.is_empty() && indexes.insert(event.index.clone()) {
                debug!(index = %event.index, "Creating splunk index");
                api.create_index(&event.index)
                    .await
                    .map_err(SeedError::rejected(kind))?;
            }
            api.send_event(&token, event)
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        let expected = initial + events.len() as u64;
        let deadline = tokio::time::Instant::now() + INGEST_TIMEOUT;
        while let Some(last) = pending_events(api.count_events().await, expected) {
            if tokio::time::Instant::now() >= deadline {
                return Err(SeedError::Rejected {
                    kind,
                    message: format!("events were not indexed in time: {last}"),
                });
            }
            tokio::time::sleep(COUNT_POLL_INTERVAL).await;
        }

        info!(events = events.len(), "Splunk seeded");
        Ok(())
    }
}

/// `None` once `expected` events are searchable, otherwise what is missing.
fn pending_events(observed: Result<u64, String>, expected: u64) -> Option<String> {
    match observed {
        Ok(count) if count >= expected => None,
        Ok(count) => Some(format!("{count} of {expected} events indexed")),
        Err(e) => Some(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_events() {
        assert_eq!(pending_events(Ok(12), 12), None);
        assert_eq!(pending_events(Ok(13), 12), None);
        assert_eq!(
            pending_events(Ok(10), 12).as_deref(),
            Some("10 of 12 events indexed")
        );
        assert_eq!(
            pending_events(Err("connection refused".into()), 12).as_deref(),
            Some("connection refused")
        );
    }

    #[test]
    fn test_license_and_password_rules() {
        let handler = SplunkHandler;

        let preset = Preset::Splunk(SplunkPreset::default());
        assert!(handler.validate(&preset).is_err());

        let preset = Preset::Splunk(SplunkPreset {
            accept_license: true,
            admin_password: Some("short".into()),
            ..Default::default()
        });
        assert!(handler.validate(&preset).is_err());

        let preset = Preset::Splunk(SplunkPreset {
            accept_license: true,
            ..Default::default()
        });
        assert!(handler.validate(&preset).is_ok());
    }

    #[test]
    fn test_parse_event_count() {
        let body = "{\"preview\":true,\"result\":{\"count\":\"3\"}}\n{\"preview\":false,\"result\":{\"count\":\"5\"}}\n";
        assert_eq!(parse_event_count(body), Some(5));
        assert_eq!(parse_event_count("{\"messages\":[]}"), None);
    }

    #[test]
    fn test_image_exposes_three_ports() {
        let spec = SplunkHandler
            .image_spec(&Preset::Splunk(SplunkPreset::default()))
            .unwrap();
        let names: Vec<_> = spec.ports.keys().map(String::as_str).collect();
        assert_eq!(names, vec![API_PORT, COLLECTOR_PORT, WEB_PORT]);
        assert!(spec.env.contains(&"SPLUNK_PASSWORD=changeme".to_string()));
    }
}
