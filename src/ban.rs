//! Client for the remote ban service
//!
//! The ban service owns the actual ban list. iplimit forwards ban decisions
//! to its `/update` endpoint and proxies `/update` and `/remove` calls from
//! operators. Every request uses a short timeout.

use crate::config::BanConfig;
use crate::validators::validate_target;
use crate::whitelist::Whitelist;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum BanError {
    /// Network failure, timeout or bad URL
    #[error("request to ban service failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered without confirming the ban
    #[error("ban service did not confirm ban of {ip}: {body}")]
    NotConfirmed { ip: String, body: String },
}

/// One entry of a `/ban` request, as produced by the top-talkers report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRequest {
    pub ip: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BanStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanResult {
    pub ip: String,
    pub count: u64,
    pub status: BanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of a proxied call, passed back unchanged
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BanClient {
    client: reqwest::Client,
    base_url: String,
    ban_type: u32,
    ban_time: u64,
    threshold: u64,
    whitelist: Whitelist,
}

impl BanClient {
    /// # Errors
    ///
    /// Returns `Err` if the HTTP client cannot be constructed.
    pub fn new(config: &BanConfig) -> Result<Self, BanError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout().min(Duration::from_secs(3)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            ban_type: config.ban_type,
            ban_time: config.ban_time,
            threshold: config.threshold,
            whitelist: Whitelist::default(),
        })
    }

    /// Entries overlapping `whitelist` are skipped by [`BanClient::ban_all`]
    pub fn with_whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Asks the service to ban `ip` for the configured time.
    ///
    /// Succeeds only if the reply confirms the ban as added or updated.
    pub async fn ban(&self, ip: &str) -> Result<(), BanError> {
        let url = format!("{}/update", self.base_url);
        let body = self
            .client
            .get(&url)
            .query(&[
                ("cidr", ip.to_string()),
                ("ban_type", self.ban_type.to_string()),
                ("ban_time", self.ban_time.to_string()),
            ])
            .send()
            .await?
            .text()
            .await?;

        if is_ban_confirmed(&body, ip) {
            Ok(())
        } else {
            Err(BanError::NotConfirmed {
                ip: ip.to_string(),
                body,
            })
        }
    }

    /// Bans every entry at or above the threshold; the rest are skipped.
    ///
    /// Entries are handled one after another and a failure never stops the
    /// remaining ones.
    pub async fn ban_all(&self, entries: &[BanRequest]) -> Vec<BanResult> {
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            let result = |status, error| BanResult {
                ip: entry.ip.clone(),
                count: entry.count,
                status,
                error,
            };

            if entry.count < self.threshold {
                info!("Skipped IP: {}, count: {}", entry.ip, entry.count);
                results.push(result(BanStatus::Skipped, None));
                continue;
            }

            let ip = match validate_target(&entry.ip) {
                Ok(ip) => ip,
                Err(e) => {
                    error!("Refusing to ban '{}': {e}", entry.ip);
                    results.push(result(BanStatus::Failed, Some(e)));
                    continue;
                }
            };

            if self.whitelist.is_whitelisted(&ip) {
                info!("Skipped whitelisted IP: {ip}, count: {}", entry.count);
                results.push(result(BanStatus::Skipped, Some("whitelisted".to_string())));
                continue;
            }

            match self.ban(&ip).await {
                Ok(()) => {
                    info!("Succeeded to ban {ip}");
                    results.push(result(BanStatus::Success, None));
                }
                Err(e) => {
                    error!("Failed to ban {ip}: {e}");
                    results.push(result(BanStatus::Failed, Some(e.to_string())));
                }
            }
        }

        results
    }

    /// Forwards a request to `path` on the ban service with the raw query
    /// string unchanged
    pub async fn forward(
        &self,
        path: &str,
        raw_query: Option<&str>,
    ) -> Result<ForwardedResponse, BanError> {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        if let Some(query) = raw_query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        Ok(ForwardedResponse {
            status,
            content_type,
            body,
        })
    }
}

/// The ban service's two confirmation messages
fn is_ban_confirmed(body: &str, ip: &str) -> bool {
    body.contains(&format!("Successfully added {ip} to banned list"))
        || body.contains(&format!("{ip} have been updated"))
}
