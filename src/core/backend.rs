//! Narrow interface to the packet-filter subsystem
//!
//! The live rule set is the only store of record. Backends expose exactly
//! three operations on it; every matching, ordering and dedup decision is
//! made in-process by [`crate::core::manager`].

use crate::core::error::Result;
use crate::core::firewall::RuleSpec;
use async_trait::async_trait;

#[async_trait]
pub trait RuleBackend: Send + Sync {
    /// Dumps the current rule set in `iptables-save` format.
    ///
    /// Fails with `BackendUnavailable` when the dump cannot run or exits
    /// non-zero.
    async fn dump_rules(&self) -> Result<String>;

    /// Appends one rule to the end of its chain.
    async fn append_rule(&self, rule: &RuleSpec) -> Result<()>;

    /// Deletes the first rule in its chain matching `rule` exactly.
    async fn delete_rule(&self, rule: &RuleSpec) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
