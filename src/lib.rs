//! iplimit - per-source-IP rate limiting over iptables
//!
//! An HTTP control plane that installs, detects, lists and removes per-IP
//! rate-limit rule groups in the live iptables rule set, and forwards bans of
//! the heaviest talkers to a remote ban service.
//!
//! # Architecture
//!
//! - [`core`] - Rule groups, rule-set snapshots and the rate-limit manager
//! - [`api`] - HTTP control API
//! - [`ban`] - Remote ban service client and passthrough
//! - [`report`] - Top-talkers report over the access log
//! - [`whitelist`] - Addresses that are never limited or banned
//! - [`notify`] - Chat webhook notifications
//! - [`audit`] - Audit logging for all rule-set mutations
//! - [`validators`] - Input validation
//! - [`config`] - Configuration loading
//! - [`elevation`] - Privilege elevation for iptables commands
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Source of truth
//!
//! There is no database. Every operation re-reads the rule set with
//! `iptables-save`, mutates it with discrete `iptables -A` / `-D` calls and
//! re-reads it to confirm.

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod audit;
pub mod ban;
pub mod config;
pub mod core;
pub mod elevation;
pub mod notify;
pub mod report;
pub mod utils;
pub mod validators;
pub mod whitelist;

/// `iptables` program, overridable at build time for distro packaging
pub const IPTABLES_PATH: &str = match option_env!("IPLIMIT_IPTABLES_PATH") {
    Some(path) => path,
    None => "iptables",
};

/// `iptables-save` program, overridable at build time for distro packaging
pub const IPTABLES_SAVE_PATH: &str = match option_env!("IPLIMIT_IPTABLES_SAVE_PATH") {
    Some(path) => path,
    None => "iptables-save",
};

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::firewall::{LimitPolicy, RateLimit, TimeUnit};
pub use core::manager::{LimitOutcome, RateLimitManager, RemovalReport};
