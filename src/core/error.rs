use thiserror::Error;

/// Core error types for iplimit
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The rule-dump or mutation command could not run at all
    /// (binary missing, no privileges, timed out, dump exited non-zero)
    #[error("packet filter unavailable: {message}")]
    BackendUnavailable { message: String },

    /// A single append/delete command ran and exited with failure
    #[error("iptables command failed: {command}: {message}")]
    BackendCommandFailed {
        command: String,
        message: String,
        exit_code: Option<i32>,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns a translated, user-facing hint for backend failures
    pub fn translation(&self) -> Option<ErrorTranslation> {
        match self {
            Error::BackendUnavailable { message } | Error::BackendCommandFailed { message, .. } => {
                Some(IptablesErrorPattern::match_error(message))
            }
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of iptables error patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
            || lower.contains("a password is required")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run iplimit as root or grant CAP_NET_ADMIN")
                .with_suggestion("For sudo elevation, allow iptables and iptables-save with NOPASSWD")
                .with_suggestion("Force a method with IPLIMIT_ELEVATION_METHOD=sudo|run0|none");
        }

        // Missing iptables
        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables  (Fedora/RHEL)")
                .with_suggestion("Or set iptables_path / iptables_save_path in the config file");
        }

        // Deleting a rule that is already gone
        if lower.contains("does a matching rule exist") || lower.contains("bad rule") {
            return ErrorTranslation::new("Rule not found in the chain")
                .with_suggestion("Another actor may have removed it already")
                .with_suggestion("Inspect the live rules: sudo iptables-save");
        }

        // Unknown match module or option
        if lower.contains("couldn't load match") || lower.contains("unknown option") {
            return ErrorTranslation::new("iptables rejected a match option")
                .with_suggestion("Check that the xt_hashlimit and xt_state modules are available")
                .with_suggestion("Load the module: sudo modprobe xt_hashlimit");
        }

        // Chain errors
        if lower.contains("chain") && (lower.contains("doesn't exist") || lower.contains("no chain")) {
            return ErrorTranslation::new("Firewall chain not found")
                .with_suggestion("Check the configured chain name (default INPUT)");
        }

        // xtables lock held by another process
        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("Firewall resource is busy")
                .with_suggestion("Another process is modifying iptables")
                .with_suggestion("Wait a moment and try again");
        }

        // Timeout errors
        if lower.contains("timeout") || lower.contains("timed out") {
            return ErrorTranslation::new("Operation timed out")
                .with_suggestion("The firewall command took too long")
                .with_suggestion("Increase command_timeout_secs or check system load");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Verify iptables is working: sudo iptables-save")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
