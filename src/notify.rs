//! Chat webhook notifications
//!
//! Limit, unlimit and ban events are posted to a Lark/Feishu style incoming
//! webhook as text messages. Message text comes from per-event templates in
//! which `${name}` placeholders are replaced by event variables.
//!
//! Delivery is best effort. Callers log failures and carry on; a webhook
//! outage never fails a rule-set operation.

use crate::config::NotifyConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Events an operator is told about
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotifyEvent {
    Limit,
    Unlimit,
    Ban,
}

impl NotifyEvent {
    /// Built-in message template
    pub const fn default_template(self) -> &'static str {
        match self {
            NotifyEvent::Limit => "[iplimit] ${ip}: rate limit ${status}",
            NotifyEvent::Unlimit => "[iplimit] ${ip}: rate limit removed (${removed} rules deleted)",
            NotifyEvent::Ban => "[iplimit] ${ip}: ban ${status} after ${count} requests",
        }
    }
}

/// Replaces every `${name}` with its value; unknown placeholders stay as-is
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("${{{name}}}"), value)
    })
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
    templates: BTreeMap<NotifyEvent, String>,
}

impl Notifier {
    /// Builds a notifier for the configured webhook, or `None` when no
    /// webhook is configured.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the HTTP client cannot be constructed.
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>, NotifyError> {
        let Some(url) = config
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Some(Self {
            client,
            webhook_url: url.to_string(),
            templates: config.templates.clone(),
        }))
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Message text for `event`, from the configured template or the
    /// built-in one
    pub fn message(&self, event: NotifyEvent, vars: &[(&str, String)]) -> String {
        let template = self
            .templates
            .get(&event)
            .map_or(event.default_template(), String::as_str);
        render(template, vars)
    }

    /// Posts one event to the webhook.
    ///
    /// # Errors
    ///
    /// Returns `Err` on network failure or a non-2xx reply.
    pub async fn notify(&self, event: NotifyEvent, vars: &[(&str, String)]) -> Result<(), NotifyError> {
        let text = self.message(event, vars);
        let payload = json!({
            "msg_type": "text",
            "content": { "text": text },
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Sent {event} notification");
        Ok(())
    }
}
