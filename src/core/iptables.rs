//! `iptables` / `iptables-save` backend
//!
//! Each operation is one external, non-transactional invocation run under a
//! bounded timeout. A hung command is killed when the timeout fires.

use crate::core::backend::RuleBackend;
use crate::core::error::{Error, Result};
use crate::core::firewall::RuleSpec;
use crate::elevation::create_elevated_command;
use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

/// Default time a single iptables invocation may take
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct IptablesBackend {
    iptables: String,
    iptables_save: String,
    table: String,
    timeout: Duration,
    wait_for_lock: bool,
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self {
            iptables: crate::IPTABLES_PATH.to_string(),
            iptables_save: crate::IPTABLES_SAVE_PATH.to_string(),
            table: "filter".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            wait_for_lock: true,
        }
    }
}

impl IptablesBackend {
    pub fn new(iptables: impl Into<String>, iptables_save: impl Into<String>) -> Self {
        Self {
            iptables: iptables.into(),
            iptables_save: iptables_save.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Passes `-w` so iptables waits for the xtables lock instead of failing
    #[must_use]
    pub fn with_lock_wait(mut self, wait: bool) -> Self {
        self.wait_for_lock = wait;
        self
    }

    fn mutation_args(&self, rule: &RuleSpec, verb: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(rule.args.len() + 5);
        if self.wait_for_lock {
            args.push("-w".to_string());
        }
        args.push("-t".to_string());
        args.push(self.table.clone());
        args.extend(rule.command_args(verb));
        args
    }

    /// Spawns `cmd` and waits for it within the configured timeout
    async fn run(&self, mut cmd: Command, what: &str) -> Result<Output> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn {what}: {e}");
            Error::unavailable(format!("failed to spawn {what}: {e}"))
        })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::unavailable(format!("failed to wait for {what}: {e}"))),
            Err(_) => {
                error!("{what} timed out after {:?}", self.timeout);
                Err(Error::unavailable(format!(
                    "{what} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    async fn mutate(&self, rule: &RuleSpec, verb: &str) -> Result<()> {
        let args = self.mutation_args(rule, verb);
        let shown = format!("{} {}", self.iptables, args.join(" "));
        debug!("Running {shown}");

        let cmd = create_elevated_command(&self.iptables, &args)
            .map_err(|e| Error::unavailable(format!("Privilege escalation unavailable: {e}")))?;
        let output = self.run(cmd, "iptables").await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_privilege_failure(&stderr) {
            return Err(Error::unavailable(stderr));
        }
        Err(Error::BackendCommandFailed {
            command: shown,
            message: stderr,
            exit_code: output.status.code(),
        })
    }
}

/// Permission problems mean the backend is unusable, not that one rule failed
fn is_privilege_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("permission denied")
        || lower.contains("you must be root")
        || lower.contains("a password is required")
}

#[async_trait]
impl RuleBackend for IptablesBackend {
    async fn dump_rules(&self) -> Result<String> {
        let args = vec!["-t".to_string(), self.table.clone()];
        let cmd = create_elevated_command(&self.iptables_save, &args)
            .map_err(|e| Error::unavailable(format!("Privilege escalation unavailable: {e}")))?;
        let output = self.run(cmd, "iptables-save").await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("iptables-save failed: {stderr}");
            return Err(Error::unavailable(format!(
                "iptables-save exited with {:?}: {stderr}",
                output.status.code()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn append_rule(&self, rule: &RuleSpec) -> Result<()> {
        self.mutate(rule, "-A").await
    }

    async fn delete_rule(&self, rule: &RuleSpec) -> Result<()> {
        self.mutate(rule, "-D").await
    }

    fn name(&self) -> &'static str {
        "iptables"
    }
}
