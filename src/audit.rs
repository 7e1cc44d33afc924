//! Audit logging for rule-set mutations
//!
//! Every limit, unlimit and ban decision is appended to `audit.log` in the
//! state directory as one JSON object per line. A failed audit write is
//! logged and never fails the operation itself.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LimitIp,
    UnlimitIp,
    BanIp,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Creates an audit log writing to `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    async fn log_or_warn(&self, event: AuditEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Logs a limit request
    ///
    /// # Arguments
    ///
    /// * `ip` - Target of the request
    /// * `status` - `limited` or `already_limited` on success
    /// * `error` - Error message if the install failed
    pub async fn log_limit(&self, ip: &str, status: Option<&str>, error: Option<String>) {
        let event = AuditEvent::new(
            EventType::LimitIp,
            error.is_none(),
            serde_json::json!({
                "ip": ip,
                "status": status,
            }),
            error,
        );
        self.log_or_warn(event).await;
    }

    /// Logs an unlimit request with the removal counts
    pub async fn log_unlimit(
        &self,
        ip: &str,
        removed: usize,
        still_present: bool,
        error: Option<String>,
    ) {
        let event = AuditEvent::new(
            EventType::UnlimitIp,
            error.is_none() && !still_present,
            serde_json::json!({
                "ip": ip,
                "removed": removed,
                "still_present": still_present,
            }),
            error,
        );
        self.log_or_warn(event).await;
    }

    /// Logs a ban forwarded to the remote ban service
    pub async fn log_ban(&self, ip: &str, count: u64, error: Option<String>) {
        let event = AuditEvent::new(
            EventType::BanIp,
            error.is_none(),
            serde_json::json!({
                "ip": ip,
                "count": count,
            }),
            error,
        );
        self.log_or_warn(event).await;
    }
}
