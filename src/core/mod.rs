//! Core rate-limit rule management
//!
//! This module contains the types and logic for managing per-target rate-limit
//! rule groups in the live packet-filter rule set. It provides:
//!
//! - [`backend`]: The narrow dump/append/delete interface to the packet filter
//! - [`iptables`]: The `iptables` / `iptables-save` implementation of it
//! - [`memory`]: An in-process implementation for tests and dry runs
//! - [`firewall`]: Rule group construction and `iptables-save` line parsing
//! - [`identity`]: Hashlimit identifiers derived from IP/CIDR targets
//! - [`snapshot`]: Fresh, point-in-time dumps of the rule set
//! - [`manager`]: Install, detect, enumerate and remove rule groups
//! - [`lock`]: Per-target advisory locks
//! - [`error`]: Error types for rule operations

pub mod backend;
pub mod error;
pub mod firewall;
pub mod identity;
pub mod iptables;
pub mod lock;
pub mod manager;
pub mod memory;
pub mod snapshot;

#[cfg(test)]
pub mod test_helpers;
