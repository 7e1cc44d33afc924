//! Point-in-time dumps of the live rule set
//!
//! A snapshot is taken fresh for every existence check, removal and listing
//! and is never reused across operations, since other actors may change the
//! rule set between two calls.
use crate::core::backend::RuleBackend;
use crate::core::error::Result;
use crate::core::firewall::SavedRule;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Snapshot {
    text: String,
}

impl Snapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Parsed rule lines in dump order; headers, chain policies and
    /// `COMMIT` lines are skipped
    pub fn rules(&self) -> impl Iterator<Item = SavedRule> + '_ {
        self.text.lines().filter_map(SavedRule::parse)
    }

    /// Whether some rule carries exactly this hashlimit name
    pub fn has_hashlimit_name(&self, name: &str) -> bool {
        self.rules()
            .any(|rule| rule.hashlimit_name.as_deref() == Some(name))
    }

    /// Every hashlimit name in the dump, in order, duplicates included
    pub fn hashlimit_names(&self) -> impl Iterator<Item = String> + '_ {
        self.rules().filter_map(|rule| rule.hashlimit_name)
    }

    pub fn rule_count(&self) -> usize {
        self.rules().count()
    }
}

/// Takes a fresh snapshot from the backend
pub async fn take_snapshot(backend: &dyn RuleBackend) -> Result<Snapshot> {
    let text = backend.dump_rules().await?;
    let snapshot = Snapshot::new(text);
    debug!(
        backend = backend.name(),
        rules = snapshot.rule_count(),
        "Took rule set snapshot"
    );
    Ok(snapshot)
}
