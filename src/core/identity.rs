//! Rate-limit identifiers derived from IP/CIDR targets
//!
//! A target such as `10.0.0.0/24` is encoded as `10.0.0.0_24` and embedded in
//! the accept rule as `--hashlimit-name limit_10.0.0.0_24`. The encoding keeps
//! byte-for-byte compatibility with rule sets installed by earlier deployments.
//!
//! # Known limitation
//!
//! `/` → `_` is only invertible when the encoded target contains no `_`.
//! Validated targets (IPv4 addresses and CIDRs) never do, so the reversal in
//! [`target_from_identifier`] is exact for everything the installer accepts.
//! Names written by other tools may decode to something that was never a
//! valid target.

/// Prefix of every hashlimit name managed by iplimit
pub const HASHLIMIT_PREFIX: &str = "limit_";

/// Derives the identifier for a target.
///
/// Total over any input: `/` becomes `_`, characters that are unsafe inside
/// an iptables argument become `-`, and the empty string maps to `-`.
pub fn identifier_for(target: &str) -> String {
    if target.is_empty() {
        return "-".to_string();
    }

    target
        .chars()
        .map(|c| match c {
            '/' => '_',
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-') => c,
            _ => '-',
        })
        .collect()
}

/// Full hashlimit name (`limit_<identifier>`) for a target
pub fn hashlimit_name(target: &str) -> String {
    format!("{HASHLIMIT_PREFIX}{}", identifier_for(target))
}

/// Recovers a target from a hashlimit name.
///
/// Returns `None` for names not carrying the iplimit prefix. `_` is turned
/// back into `/` only when the remainder looks like an encoded CIDR: no `/`
/// already present and at least one `_`.
pub fn target_from_hashlimit_name(name: &str) -> Option<String> {
    name.strip_prefix(HASHLIMIT_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(target_from_identifier)
}

/// Reverses [`identifier_for`] for CIDR-shaped identifiers
pub fn target_from_identifier(identifier: &str) -> String {
    if !identifier.contains('/') && identifier.contains('_') {
        identifier.replace('_', "/")
    } else {
        identifier.to_string()
    }
}
