//! Rate-limit rule manager
//!
//! Installs, detects, enumerates and removes rule groups, treating the live
//! rule set as the only source of truth. Every operation reads a fresh
//! [`Snapshot`]; nothing is cached between calls.
//!
//! # Failure model
//!
//! - Installs abort on the first failed append without rollback. A group can
//!   be left half-installed; the error is returned to the caller.
//! - Removals are best-effort: every candidate line gets its own delete, a
//!   failed delete is recorded and the loop moves on. A fresh snapshot taken
//!   after all attempts decides `still_present`.
//! - `BackendUnavailable` is never swallowed. It aborts the operation.

use crate::core::backend::RuleBackend;
use crate::core::error::{Error, Result};
use crate::core::firewall::{LimitPolicy, SavedRule};
use crate::core::identity::{hashlimit_name, target_from_hashlimit_name};
use crate::core::lock::TargetLocks;
use crate::core::snapshot::{Snapshot, take_snapshot};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of a check-then-install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum LimitOutcome {
    #[strum(serialize = "limited")]
    Limited,
    #[strum(serialize = "already_limited")]
    AlreadyLimited,
}

/// A delete that the backend refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub line: String,
    pub error: String,
}

/// Outcome of a best-effort removal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub target: String,
    /// Lines selected for deletion from the first snapshot
    pub matched: usize,
    /// Deletes the backend accepted
    pub removed: usize,
    pub failures: Vec<DeleteFailure>,
    /// Rules of the group were still found by the verification snapshot
    pub still_present: bool,
}

impl RemovalReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.still_present
    }
}

pub struct RateLimitManager {
    backend: Arc<dyn RuleBackend>,
    chain: String,
    locks: TargetLocks,
}

impl RateLimitManager {
    pub fn new(backend: Arc<dyn RuleBackend>, chain: impl Into<String>) -> Self {
        Self {
            backend,
            chain: chain.into(),
            locks: TargetLocks::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn RuleBackend> {
        &self.backend
    }

    /// Chain the rule groups live in
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Fresh dump of the live rule set
    pub async fn snapshot(&self) -> Result<Snapshot> {
        take_snapshot(self.backend.as_ref()).await
    }

    /// Whether a limit rule tagged with the target's hashlimit name exists
    pub async fn exists(&self, target: &str) -> Result<bool> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.has_hashlimit_name(&hashlimit_name(target)))
    }

    /// Appends the limit rule, then the drop rule.
    ///
    /// Does not check for an existing group; see [`Self::limit`] for the
    /// check-then-install sequence. A failed second append leaves the group
    /// half-installed.
    pub async fn install(&self, target: &str, policy: &LimitPolicy) -> Result<()> {
        let limit_rule = policy.limit_rule(&self.chain, target);
        let drop_rule = policy.drop_rule(&self.chain, target);

        if let Err(e) = self.backend.append_rule(&limit_rule).await {
            error!("Failed to append limit rule for {target}: {e}");
            return Err(e);
        }
        if let Err(e) = self.backend.append_rule(&drop_rule).await {
            error!("Failed to append drop rule for {target}, group is half-installed: {e}");
            return Err(e);
        }

        info!(
            ip = target,
            rate = %policy.rate,
            burst = policy.burst,
            port = policy.port,
            "Installed rate-limit rule group"
        );
        Ok(())
    }

    /// Lines belonging to the target's group: its hashlimit name, or a drop
    /// rule in the managed chain for the target and port
    fn group_lines(&self, snapshot: &Snapshot, target: &str, port: u16) -> Vec<SavedRule> {
        let name = hashlimit_name(target);
        let port = port.to_string();
        snapshot
            .rules()
            .filter(|rule| {
                rule.hashlimit_name.as_deref() == Some(name.as_str())
                    || (rule.spec.chain == self.chain
                        && rule.source_is(target)
                        && rule.dport.as_deref() == Some(port.as_str())
                        && rule.jump.as_deref() == Some("DROP"))
            })
            .collect()
    }

    /// Deletes every line of the target's group, then re-reads the rule set
    /// to verify.
    ///
    /// Removing an absent group is a successful no-op.
    pub async fn remove(&self, target: &str, port: u16) -> Result<RemovalReport> {
        let snapshot = self.snapshot().await?;
        let candidates = self.group_lines(&snapshot, target, port);

        let mut report = RemovalReport {
            target: target.to_string(),
            matched: candidates.len(),
            ..RemovalReport::default()
        };

        if candidates.is_empty() {
            debug!("No rules found for {target}, nothing to remove");
            return Ok(report);
        }

        for rule in &candidates {
            info!("Matched for deletion: {}", rule.line);
            match self.backend.delete_rule(&rule.spec).await {
                Ok(()) => report.removed += 1,
                Err(e @ Error::BackendUnavailable { .. }) => {
                    error!("Backend unavailable while removing rules for {target}: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!("Failed to delete rule '{}': {e}", rule.line);
                    report.failures.push(DeleteFailure {
                        line: rule.line.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let verification = self.snapshot().await?;
        report.still_present = !self.group_lines(&verification, target, port).is_empty();
        if report.still_present {
            warn!("Rules for {target} still exist after attempted deletion");
        } else {
            info!(ip = target, removed = report.removed, "Removed rate-limit rule group");
        }

        Ok(report)
    }

    /// Targets with a limit rule in the current rule set, decoded from their
    /// hashlimit names
    pub async fn list_limited(&self) -> Result<BTreeSet<String>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .hashlimit_names()
            .filter_map(|name| target_from_hashlimit_name(&name))
            .collect())
    }

    /// Check-then-install under the per-target lock.
    ///
    /// A stray drop rule without its limit rule (a half-removed group) is
    /// cleared first; appending a new group behind it would drop all traffic
    /// from the target.
    pub async fn limit(&self, target: &str, policy: &LimitPolicy) -> Result<LimitOutcome> {
        let _guard = self.locks.lock(target).await;

        let snapshot = self.snapshot().await?;
        if snapshot.has_hashlimit_name(&hashlimit_name(target)) {
            info!("Limit rule for {target} already exists, skipping insertion");
            return Ok(LimitOutcome::AlreadyLimited);
        }

        if !self.group_lines(&snapshot, target, policy.port).is_empty() {
            warn!("Found a partial rule group for {target}, clearing it before install");
            let report = self.remove(target, policy.port).await?;
            if report.still_present {
                return Err(Error::Internal(format!(
                    "could not clear partial rule group for {target}"
                )));
            }
        }

        self.install(target, policy).await?;
        Ok(LimitOutcome::Limited)
    }

    /// Removal under the per-target lock
    pub async fn unlimit(&self, target: &str, port: u16) -> Result<RemovalReport> {
        let _guard = self.locks.lock(target).await;
        self.remove(target, port).await
    }
}
