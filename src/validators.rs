//! Input validation for iplimit
//!
//! Everything that ends up on an iptables command line passes through here
//! first. Validated targets are IPv4 addresses or IPv4 CIDRs only, which keeps
//! the hashlimit identifier encoding unambiguous.

use crate::core::firewall::{LimitPolicy, RateLimit, TimeUnit};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Upper bound for `--hashlimit-burst`
pub const MAX_BURST: u32 = 10_000;

/// Validates an IPv4 address or IPv4 CIDR and returns its canonical text.
///
/// Surrounding whitespace is ignored. Host bits of a CIDR are cleared
/// (`10.0.0.5/24` becomes `10.0.0.0/24`). IPv6 and `/0` are rejected.
///
/// # Examples
///
/// ```
/// use iplimit::validators::validate_target;
///
/// assert_eq!(validate_target("198.51.100.7").unwrap(), "198.51.100.7");
/// assert_eq!(validate_target(" 10.0.0.0/24 ").unwrap(), "10.0.0.0/24");
/// assert_eq!(validate_target("10.0.0.5/24").unwrap(), "10.0.0.0/24");
/// assert!(validate_target("2001:db8::1").is_err());
/// assert!(validate_target("10.0.0.1; reboot").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` if the input is empty, not IPv4, or has an invalid prefix.
pub fn validate_target(input: &str) -> Result<String, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("IP address is required".to_string());
    }

    if input.contains(':') {
        return Err(format!("'{input}' is not an IPv4 address (IPv6 is not supported)"));
    }

    if input.contains('/') {
        let network: Ipv4Network = input
            .parse()
            .map_err(|e| format!("Invalid CIDR '{input}': {e}"))?;
        if network.prefix() == 0 {
            return Err(format!("'{input}' covers every address"));
        }
        // The kernel stores the masked network; names and lookups must agree
        let masked = Ipv4Network::new(network.network(), network.prefix())
            .map_err(|e| format!("Invalid CIDR '{input}': {e}"))?;
        return Ok(masked.to_string());
    }

    let addr: Ipv4Addr = input
        .parse()
        .map_err(|_| format!("Invalid IPv4 address '{input}'"))?;
    Ok(addr.to_string())
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a rate limit value.
///
/// Returns Ok(Some(warning)) for high but acceptable values.
/// Returns Err for zero and for values that exceed kernel/system limits.
///
/// # Errors
///
/// Returns `Err` if rate is 0 or exceeds reasonable maximum for the given time unit.
pub fn validate_rate_limit(rate: RateLimit) -> Result<Option<String>, String> {
    let RateLimit { count, unit } = rate;

    let (max, warn) = match unit {
        TimeUnit::Second => (10_000, 1_000),
        TimeUnit::Minute => (100_000, 10_000),
        TimeUnit::Hour => (1_000_000, 100_000),
        TimeUnit::Day => (10_000_000, 1_000_000),
    };

    if count == 0 {
        return Err("Rate limit must be at least 1".to_string());
    }

    if count > max {
        return Err(format!("Rate limit exceeds max {}/{}", max, unit.as_iptables()));
    }

    if count > warn {
        return Ok(Some(format!(
            "High rate ({}/{}) - typical: 10-{}",
            count,
            unit.as_iptables(),
            warn / 10
        )));
    }

    Ok(None)
}

/// Validates the hashlimit burst allowance.
///
/// # Errors
///
/// Returns `Err` if burst is 0 or above [`MAX_BURST`].
pub fn validate_burst(burst: u32) -> Result<u32, String> {
    if burst == 0 || burst > MAX_BURST {
        Err(format!("Burst must be between 1 and {MAX_BURST}"))
    } else {
        Ok(burst)
    }
}

/// Validates every field of a policy, returning any rate warning.
///
/// # Errors
///
/// Returns the first field error found.
pub fn validate_policy(policy: &LimitPolicy) -> Result<Option<String>, String> {
    validate_port(policy.port)?;
    validate_burst(policy.burst)?;
    validate_rate_limit(policy.rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target_plain_ip() {
        assert_eq!(validate_target("203.0.113.5").unwrap(), "203.0.113.5");
        assert_eq!(validate_target("0.0.0.0").unwrap(), "0.0.0.0");
    }

    #[test]
    fn test_validate_target_cidr() {
        assert_eq!(validate_target("10.0.0.0/24").unwrap(), "10.0.0.0/24");
        assert_eq!(validate_target("192.0.2.1/32").unwrap(), "192.0.2.1/32");
        assert!(validate_target("10.0.0.0/33").is_err());
        assert!(validate_target("0.0.0.0/0").is_err());
        assert!(validate_target("10.1.2.3/0").is_err());
        assert!(validate_target("10.0.0.0/").is_err());
    }

    #[test]
    fn test_validate_target_masks_host_bits() {
        assert_eq!(validate_target("10.0.0.5/24").unwrap(), "10.0.0.0/24");
        assert_eq!(validate_target("172.16.99.1/12").unwrap(), "172.16.0.0/12");
        assert_eq!(validate_target("192.0.2.1/32").unwrap(), "192.0.2.1/32");
    }

    #[test]
    fn test_validate_target_rejects_garbage() {
        assert!(validate_target("").is_err());
        assert!(validate_target("   ").is_err());
        assert!(validate_target("256.1.1.1").is_err());
        assert!(validate_target("10.0.0").is_err());
        assert!(validate_target("10.0.0.1 -j ACCEPT").is_err());
        assert!(validate_target("10_0_0_1").is_err());
        assert!(validate_target("example.com").is_err());
    }

    #[test]
    fn test_validate_target_rejects_ipv6() {
        let err = validate_target("::1").unwrap_err();
        assert!(err.contains("IPv6"));
        assert!(validate_target("2001:db8::/32").is_err());
    }

    #[test]
    fn test_validate_port() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(8081).unwrap(), 8081);
        assert_eq!(validate_port(65535).unwrap(), 65535);
    }

    #[test]
    fn test_validate_rate_limit() {
        let rate = |count, unit| RateLimit { count, unit };

        assert_eq!(validate_rate_limit(rate(10, TimeUnit::Minute)), Ok(None));
        assert!(validate_rate_limit(rate(0, TimeUnit::Minute)).is_err());
        assert!(validate_rate_limit(rate(10_001, TimeUnit::Second)).is_err());
        assert!(
            validate_rate_limit(rate(5_000, TimeUnit::Second))
                .unwrap()
                .is_some()
        );
        assert_eq!(validate_rate_limit(rate(5_000, TimeUnit::Hour)), Ok(None));
    }

    #[test]
    fn test_validate_burst() {
        assert!(validate_burst(0).is_err());
        assert_eq!(validate_burst(20).unwrap(), 20);
        assert_eq!(validate_burst(MAX_BURST).unwrap(), MAX_BURST);
        assert!(validate_burst(MAX_BURST + 1).is_err());
    }

    #[test]
    fn test_validate_default_policy() {
        assert_eq!(validate_policy(&LimitPolicy::default()), Ok(None));
    }
}
