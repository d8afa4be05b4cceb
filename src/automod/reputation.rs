//! Google Safe Browsing lookups for the safe browsing trigger

use crate::AUTOMOD_TARGET;
use crate::automod::error::{AutomodError, AutomodResult};
use crate::automod::services::{LinkReputation, Threat};
use crate::automod::text::find_links;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const SAFE_BROWSING_URL: &str = "https://safebrowsing.googleapis.com/v4/threatMatches:find";

const THREAT_TYPES: [&str; 4] = [
    "MALWARE",
    "SOCIAL_ENGINEERING",
    "UNWANTED_SOFTWARE",
    "POTENTIALLY_HARMFUL_APPLICATION",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest<'a> {
    client: ClientInfo<'a>,
    threat_info: ThreatInfo<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo<'a> {
    client_id: &'a str,
    client_version: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreatInfo<'a> {
    threat_types: &'a [&'a str],
    platform_types: [&'a str; 1],
    threat_entry_types: [&'a str; 1],
    threat_entries: Vec<ThreatEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct ThreatEntry<'a> {
    url: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct FindResponse {
    #[serde(default)]
    matches: Vec<ThreatMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreatMatch {
    threat_type: String,
    threat: MatchedUrl,
}

#[derive(Debug, Deserialize)]
struct MatchedUrl {
    url: String,
}

/// Safe Browsing v4 lookup API client
#[derive(Debug, Clone)]
pub struct SafeBrowsingClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl SafeBrowsingClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: SAFE_BROWSING_URL.to_string(),
        }
    }

    /// Point the client at another endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body<'a>(links: &[&'a str]) -> FindRequest<'a> {
        FindRequest {
            client: ClientInfo {
                client_id: crate::BOT_NAME,
                client_version: env!("CARGO_PKG_VERSION"),
            },
            threat_info: ThreatInfo {
                threat_types: &THREAT_TYPES,
                platform_types: ["ANY_PLATFORM"],
                threat_entry_types: ["URL"],
                threat_entries: links
                    .iter()
                    .map(|url| ThreatEntry { url: *url })
                    .collect(),
            },
        }
    }
}

/// First match of a lookup response
fn first_threat(response: FindResponse) -> Option<Threat> {
    response.matches.into_iter().next().map(|m| Threat {
        url: m.threat.url,
        threat_type: m.threat_type,
    })
}

#[async_trait::async_trait]
impl LinkReputation for SafeBrowsingClient {
    async fn check(&self, text: &str) -> AutomodResult<Option<Threat>> {
        let links = find_links(text);
        if links.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&Self::request_body(&links))
            .send()
            .await
            .map_err(|e| {
                error!(target: AUTOMOD_TARGET, error = ?e, "Safe browsing request failed");
                AutomodError::Reputation(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(target: AUTOMOD_TARGET, status = %status, body = %body, "Safe browsing returned error");
            return Err(AutomodError::Reputation(format!("status {status}")));
        }

        let parsed: FindResponse = response
            .json()
            .await
            .map_err(|e| AutomodError::Reputation(e.to_string()))?;
        let threat = first_threat(parsed);
        if let Some(threat) = &threat {
            debug!(target: AUTOMOD_TARGET, url = %threat.url, threat_type = %threat.threat_type, "Unsafe link found");
        }
        Ok(threat)
    }
}
