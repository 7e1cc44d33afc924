//! Addresses that are never limited or banned
//!
//! Entries are IPv4 addresses or CIDRs. A target is protected when its
//! network overlaps any entry: with `10.1.2.3` whitelisted, neither
//! `10.1.2.3` nor `10.0.0.0/8` can be limited.

use crate::core::firewall::normalize_source;
use ipnetwork::Ipv4Network;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    networks: Vec<Ipv4Network>,
}

impl Whitelist {
    /// Builds a whitelist, skipping (and logging) entries that are not IPv4
    /// addresses or CIDRs
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let networks = entries
            .into_iter()
            .filter_map(|entry| {
                let entry = entry.as_ref().trim();
                let network = parse_entry(entry);
                if network.is_none() {
                    warn!("Ignoring invalid whitelist entry '{entry}'");
                }
                network
            })
            .collect();
        Self { networks }
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Whether `target` (address or CIDR) overlaps a whitelisted network.
    ///
    /// Unparsable targets are never whitelisted; validation rejects them
    /// separately.
    pub fn is_whitelisted(&self, target: &str) -> bool {
        let Some(target) = parse_entry(target) else {
            return false;
        };
        self.networks.iter().any(|entry| overlaps(entry, &target))
    }

    /// Entries in canonical form, in configuration order
    pub fn entries(&self) -> Vec<String> {
        self.networks.iter().map(ToString::to_string).collect()
    }
}

/// Parses one entry into its masked network; plain addresses become `/32`
pub fn parse_entry(entry: &str) -> Option<Ipv4Network> {
    if entry.is_empty() || entry.contains(':') {
        return None;
    }
    normalize_source(entry)
}

/// Two aligned networks overlap exactly when one contains the other
fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}
