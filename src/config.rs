//! Service configuration
//!
//! Loaded from a JSON file: an explicit `--config` path, otherwise
//! `config.json` in the XDG config directory, otherwise built-in defaults.
//! Every field is optional in the file.

use crate::core::error::{Error, Result};
use crate::core::firewall::{DEFAULT_CHAIN, LimitPolicy};
use crate::core::iptables::DEFAULT_COMMAND_TIMEOUT;
use crate::notify::NotifyEvent;
use crate::utils::get_config_dir;
use crate::whitelist::{Whitelist, parse_entry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote ban service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BanConfig {
    /// Base URL of the ban service; `/update` and `/remove` are appended
    pub service_url: String,
    /// Minimum request count for an entry to be banned
    pub threshold: u64,
    pub ban_type: u32,
    /// Ban duration in seconds
    pub ban_time: u64,
    pub timeout_secs: u64,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            service_url: "http://198.18.114.2:8080".to_string(),
            threshold: 250,
            ban_type: 1,
            ban_time: 36_000,
            timeout_secs: 3,
        }
    }
}

impl BanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-talkers report settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    pub access_log: PathBuf,
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            access_log: PathBuf::from("/var/log/mirror/access.log"),
            top_n: 10,
        }
    }
}

/// Chat webhook settings; notifications are off without a URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
    /// Per-event message templates with `${name}` placeholders
    pub templates: BTreeMap<NotifyEvent, String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 5,
            templates: BTreeMap::new(),
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Control API listen address
    pub listen: SocketAddr,
    /// Chain the rule groups are appended to
    pub chain: String,
    pub table: String,
    /// Port, rate and burst of newly installed rule groups
    pub policy: LimitPolicy,
    pub iptables_path: String,
    pub iptables_save_path: String,
    /// Timeout for a single iptables invocation
    pub command_timeout_secs: u64,
    pub ban: BanConfig,
    pub report: ReportConfig,
    /// Addresses and CIDRs that are never limited or banned
    pub whitelist: Vec<String>,
    pub notify: NotifyConfig,
    /// Write `audit.log` entries for every mutation (default: on)
    pub audit_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9521)),
            chain: DEFAULT_CHAIN.to_string(),
            table: "filter".to_string(),
            policy: LimitPolicy::default(),
            iptables_path: crate::IPTABLES_PATH.to_string(),
            iptables_save_path: crate::IPTABLES_SAVE_PATH.to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            ban: BanConfig::default(),
            report: ReportConfig::default(),
            whitelist: Vec::new(),
            notify: NotifyConfig::default(),
            audit_enabled: true,
        }
    }
}

impl AppConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Checks the values that end up on iptables command lines.
    ///
    /// Returns a warning for legal but unusual rates.
    pub fn validate(&self) -> Result<Option<String>> {
        let chain_ok = !self.chain.is_empty()
            && self.chain.len() <= 28
            && self
                .chain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
        if !chain_ok {
            return Err(Error::validation(
                "chain",
                format!("Invalid chain name '{}'", self.chain),
            ));
        }
        if !matches!(
            self.table.as_str(),
            "filter" | "mangle" | "raw" | "security" | "nat"
        ) {
            return Err(Error::validation(
                "table",
                format!("Unknown table '{}'", self.table),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(Error::validation(
                "command_timeout_secs",
                "Timeout must be at least 1 second",
            ));
        }
        if let Some(entry) = self.whitelist.iter().find(|e| parse_entry(e.trim()).is_none()) {
            return Err(Error::validation(
                "whitelist",
                format!("Invalid whitelist entry '{entry}'"),
            ));
        }
        if self.notify.timeout_secs == 0 {
            return Err(Error::validation(
                "notify.timeout_secs",
                "Timeout must be at least 1 second",
            ));
        }
        crate::validators::validate_policy(&self.policy).map_err(|e| Error::validation("policy", e))
    }

    pub fn whitelist(&self) -> Whitelist {
        Whitelist::new(&self.whitelist)
    }
}

/// Default location: `config.json` in the XDG config directory
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Loads the configuration.
///
/// An explicit path must exist and parse. The default location is optional:
/// a missing file yields defaults, an unreadable one is logged and ignored.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let json = tokio::fs::read_to_string(path).await?;
        let config = serde_json::from_str::<AppConfig>(&json)?;
        tracing::info!("Loaded configuration from {}", path.display());
        return Ok(config);
    }

    if let Some(path) = default_config_path() {
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => match serde_json::from_str::<AppConfig>(&json) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    return Ok(config);
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid config {}: {e}", path.display());
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to read config {}: {e}", path.display()),
        }
    }

    Ok(AppConfig::default())
}
