//! In-process rule store speaking the `iptables-save` dialect
//!
//! Used by the unit tests and by `iplimit serve --dry-run`. Appended rules are
//! stored the way `iptables-save` prints them back (`/32` on single sources,
//! the implicit `-m tcp`, `--hashlimit` shown as `--hashlimit-upto`), so the
//! manager sees the same text shapes it sees in production.

use crate::core::backend::RuleBackend;
use crate::core::error::{Error, Result};
use crate::core::firewall::{RuleSpec, SavedRule, normalize_source};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    /// Rule lines in chain order
    lines: Vec<String>,
    /// Appends still allowed before failing; `None` = unlimited
    append_budget: Option<usize>,
    /// Number of upcoming deletes that fail
    failing_deletes: usize,
    unavailable: bool,
    delete_calls: usize,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with existing rules given as `iptables-save` lines
    pub fn with_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        if let Ok(mut state) = backend.state.lock() {
            state.lines = lines.into_iter().map(Into::into).collect();
        }
        backend
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory backend lock poisoned".to_string()))
    }

    /// Current rule lines
    pub fn lines(&self) -> Vec<String> {
        self.state().map(|s| s.lines.clone()).unwrap_or_default()
    }

    /// Makes the next `count` deletes fail as if the rule did not exist
    pub fn fail_next_deletes(&self, count: usize) {
        if let Ok(mut state) = self.state() {
            state.failing_deletes = count;
        }
    }

    /// Allows `count` more appends, then fails every further one
    pub fn fail_appends_after(&self, count: usize) {
        if let Ok(mut state) = self.state() {
            state.append_budget = Some(count);
        }
    }

    /// Makes every operation fail with `BackendUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state() {
            state.unavailable = unavailable;
        }
    }

    /// Number of delete commands issued so far, failed ones included
    pub fn delete_calls(&self) -> usize {
        self.state().map(|s| s.delete_calls).unwrap_or_default()
    }

    /// Drops every rule line containing `needle`, bypassing the manager, the
    /// way an operator editing the rule set by hand would
    pub fn remove_lines_containing(&self, needle: &str) {
        if let Ok(mut state) = self.state() {
            state.lines.retain(|line| !line.contains(needle));
        }
    }
}

/// Renders a rule the way `iptables-save` prints it back
fn canonical_line(rule: &RuleSpec) -> String {
    let has_dport = rule.args.iter().any(|a| a == "--dport");
    let mut args: Vec<String> = Vec::with_capacity(rule.args.len() + 2);
    let mut iter = rule.args.iter().peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-s" | "-d" => {
                if let Some(addr) = iter.next() {
                    match normalize_source(addr) {
                        // iptables-save drops an any-address match entirely
                        Some(net) if net.prefix() == 0 => {}
                        Some(net) => {
                            args.push(arg.clone());
                            args.push(net.to_string());
                        }
                        None => {
                            args.push(arg.clone());
                            args.push(addr.clone());
                        }
                    }
                }
            }
            "-p" => {
                args.push(arg.clone());
                if let Some(proto) = iter.next() {
                    args.push(proto.clone());
                    let already_loaded = iter.peek().is_some_and(|next| *next == "-m");
                    if has_dport && !already_loaded && (proto == "tcp" || proto == "udp") {
                        args.push("-m".to_string());
                        args.push(proto.clone());
                    }
                }
            }
            "--hashlimit" => args.push("--hashlimit-upto".to_string()),
            _ => args.push(arg.clone()),
        }
    }

    RuleSpec {
        chain: rule.chain.clone(),
        args,
    }
    .to_string()
}

#[async_trait]
impl RuleBackend for MemoryBackend {
    async fn dump_rules(&self) -> Result<String> {
        let state = self.state()?;
        if state.unavailable {
            return Err(Error::unavailable("iptables-save: memory backend offline"));
        }

        let mut chains: Vec<String> = vec!["INPUT".into(), "FORWARD".into(), "OUTPUT".into()];
        for rule in state.lines.iter().filter_map(|l| SavedRule::parse(l)) {
            if !chains.contains(&rule.spec.chain) {
                chains.push(rule.spec.chain);
            }
        }

        let mut out = String::from("# Generated by iplimit memory backend\n*filter\n");
        for chain in &chains {
            out.push_str(&format!(":{chain} ACCEPT [0:0]\n"));
        }
        for line in &state.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("COMMIT\n");
        Ok(out)
    }

    async fn append_rule(&self, rule: &RuleSpec) -> Result<()> {
        let mut state = self.state()?;
        if state.unavailable {
            return Err(Error::unavailable("iptables: memory backend offline"));
        }
        match state.append_budget {
            Some(0) => {
                return Err(Error::BackendCommandFailed {
                    command: rule.command_args("-A").join(" "),
                    message: "iptables: injected append failure".to_string(),
                    exit_code: Some(1),
                });
            }
            Some(n) => state.append_budget = Some(n - 1),
            None => {}
        }
        state.lines.push(canonical_line(rule));
        Ok(())
    }

    async fn delete_rule(&self, rule: &RuleSpec) -> Result<()> {
        let mut state = self.state()?;
        if state.unavailable {
            return Err(Error::unavailable("iptables: memory backend offline"));
        }
        state.delete_calls += 1;

        let bad_rule = || Error::BackendCommandFailed {
            command: rule.command_args("-D").join(" "),
            message: "iptables: Bad rule (does a matching rule exist in that chain?).".to_string(),
            exit_code: Some(1),
        };

        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(bad_rule());
        }

        let wanted = canonical_line(rule);
        let position = state.lines.iter().position(|line| *line == wanted);
        match position {
            Some(index) => {
                state.lines.remove(index);
                Ok(())
            }
            None => Err(bad_rule()),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
