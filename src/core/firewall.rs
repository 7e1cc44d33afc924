//! Rule data structures and iptables argument generation
//!
//! This module defines the pieces of a rate-limit rule group and the parser
//! for the `iptables-save` line format the rest of the crate queries.
//!
//! # Rule Group
//!
//! Every limited target owns exactly two rules in the managed chain:
//!
//! 1. the *limit* rule, accepting new TCP connections from the target up to a
//!    steady rate plus burst, tagged `--hashlimit-name limit_<identifier>`;
//! 2. the *drop* rule, discarding all further TCP traffic from the target to
//!    the protected port.
//!
//! The limit rule must precede the drop rule. Reversing them drops all
//! traffic from the target regardless of rate.
//!
//! # Example
//!
//! ```
//! use iplimit::core::firewall::{LimitPolicy, RateLimit, TimeUnit};
//!
//! let policy = LimitPolicy {
//!     port: 8081,
//!     rate: RateLimit { count: 10, unit: TimeUnit::Minute },
//!     burst: 20,
//! };
//! let limit = policy.limit_rule("INPUT", "198.51.100.7");
//! assert!(limit.to_string().contains("--hashlimit-name limit_198.51.100.7"));
//! ```

use crate::core::identity::hashlimit_name;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default chain the rule groups are appended to
pub const DEFAULT_CHAIN: &str = "INPUT";

/// Default protected port
pub const DEFAULT_PORT: u16 = 8081;

/// Time unit of a hashlimit rate
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[strum(to_string = "second", serialize = "sec", serialize = "s")]
    Second,
    #[default]
    #[strum(to_string = "minute", serialize = "min", serialize = "m")]
    Minute,
    #[strum(to_string = "hour", serialize = "h")]
    Hour,
    #[strum(to_string = "day", serialize = "d")]
    Day,
}

impl TimeUnit {
    /// Returns the unit spelling `iptables-save` prints for hashlimit rates
    pub const fn as_iptables(self) -> &'static str {
        match self {
            TimeUnit::Second => "sec",
            TimeUnit::Minute => "min",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        }
    }
}

/// Steady admission rate, e.g. `10/min`
///
/// Serialized as its iptables spelling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct RateLimit {
    pub count: u32,
    pub unit: TimeUnit,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            count: 10,
            unit: TimeUnit::Minute,
        }
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.unit.as_iptables())
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .split_once('/')
            .ok_or_else(|| format!("Rate '{s}' must look like <count>/<unit>"))?;
        let count = count
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid rate count '{count}'"))?;
        let unit = TimeUnit::from_str(unit.trim())
            .map_err(|_| format!("Invalid rate unit '{unit}' (use sec, min, hour or day)"))?;
        Ok(Self { count, unit })
    }
}

impl TryFrom<String> for RateLimit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RateLimit> for String {
    fn from(rate: RateLimit) -> Self {
        rate.to_string()
    }
}

/// Parameters of the limit rule: protected port, steady rate, burst allowance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitPolicy {
    pub port: u16,
    pub rate: RateLimit,
    pub burst: u32,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            rate: RateLimit::default(),
            burst: 20,
        }
    }
}

impl LimitPolicy {
    /// The accept rule admitting new connections up to the rate
    #[rustfmt::skip]
    pub fn limit_rule(&self, chain: &str, target: &str) -> RuleSpec {
        let port = self.port.to_string();
        let rate = self.rate.to_string();
        let burst = self.burst.to_string();
        let name = hashlimit_name(target);
        RuleSpec::new(
            chain,
            [
                "-s", target, "-p", "tcp", "--dport", port.as_str(),
                "-m", "state", "--state", "NEW",
                "-m", "hashlimit", "--hashlimit", rate.as_str(),
                "--hashlimit-name", name.as_str(),
                "--hashlimit-burst", burst.as_str(),
                "--hashlimit-mode", "srcip",
                "-j", "ACCEPT",
            ],
        )
    }

    /// The unconditional drop rule evaluated after the limit rule
    pub fn drop_rule(&self, chain: &str, target: &str) -> RuleSpec {
        let port = self.port.to_string();
        RuleSpec::new(
            chain,
            ["-s", target, "-p", "tcp", "--dport", port.as_str(), "-j", "DROP"],
        )
    }
}

/// One rule as an `iptables` invocation minus the verb: chain plus match
/// and target arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub chain: String,
    pub args: Vec<String>,
}

impl RuleSpec {
    pub fn new<I, S>(chain: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chain: chain.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Full argument vector for `iptables` with the given verb (`-A`, `-D`)
    pub fn command_args(&self, verb: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 2);
        out.push(verb.to_string());
        out.push(self.chain.clone());
        out.extend(self.args.iter().cloned());
        out
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-A {}", self.chain)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
                write!(f, " \"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// A rule line from an `iptables-save` dump with the fields iplimit matches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRule {
    /// The line as the dump printed it
    pub line: String,
    pub spec: RuleSpec,
    pub source: Option<String>,
    pub source_negated: bool,
    pub protocol: Option<String>,
    pub dport: Option<String>,
    pub hashlimit_name: Option<String>,
    pub jump: Option<String>,
}

impl SavedRule {
    /// Parses an `-A <chain> ...` line; any other line yields `None`
    pub fn parse(line: &str) -> Option<Self> {
        let tokens = split_rule_line(line.trim());
        let (verb, rest) = tokens.split_first()?;
        if verb != "-A" {
            return None;
        }
        let (chain, args) = rest.split_first()?;

        let mut rule = SavedRule {
            line: line.trim().to_string(),
            spec: RuleSpec::new(chain, args.iter().cloned()),
            source: None,
            source_negated: false,
            protocol: None,
            dport: None,
            hashlimit_name: None,
            jump: None,
        };

        let mut negate_next = false;
        let mut iter = args.iter();
        while let Some(token) = iter.next() {
            match token.as_str() {
                "!" => {
                    negate_next = true;
                    continue;
                }
                "-s" | "--source" => {
                    rule.source = iter.next().cloned();
                    rule.source_negated = negate_next;
                }
                "-p" | "--protocol" => rule.protocol = iter.next().cloned(),
                "--dport" | "--destination-port" => rule.dport = iter.next().cloned(),
                "--hashlimit-name" => rule.hashlimit_name = iter.next().cloned(),
                "-j" | "--jump" => rule.jump = iter.next().cloned(),
                _ => {}
            }
            negate_next = false;
        }

        Some(rule)
    }

    /// Whether the source matches `target` as a network.
    ///
    /// `a.b.c.d` equals `a.b.c.d/32`, and host bits are ignored on both
    /// sides, so `10.0.0.5/24` matches the `10.0.0.0/24` the kernel reports.
    pub fn source_is(&self, target: &str) -> bool {
        !self.source_negated
            && self.source.as_deref().is_some_and(|s| {
                match (normalize_source(s), normalize_source(target)) {
                    (Some(a), Some(b)) => a == b,
                    _ => s == target,
                }
            })
    }
}

/// Parses an address or CIDR into its masked network form
pub fn normalize_source(source: &str) -> Option<Ipv4Network> {
    let network: Ipv4Network = source.trim().parse().ok()?;
    Ipv4Network::new(network.network(), network.prefix()).ok()
}

/// Splits an `iptables-save` line into arguments.
///
/// Arguments containing whitespace are double-quoted in the dump, with `"`
/// and `\` escaped by a backslash.
pub fn split_rule_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::with_capacity(24);
    let mut chars = line.chars().peekable();
    let mut current = String::new();
    let mut in_token = false;

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_token = true;
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        }
                        '"' => break,
                        other => current.push(other),
                    }
                }
            }
            '\\' if chars.peek().is_some() => {
                in_token = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT_LINE: &str = "-A INPUT -s 198.51.100.7/32 -p tcp -m tcp --dport 8081 -m state --state NEW -m hashlimit --hashlimit-upto 10/min --hashlimit-burst 20 --hashlimit-mode srcip --hashlimit-name limit_198.51.100.7 -j ACCEPT";

    #[test]
    fn test_rate_limit_parse() {
        let rate: RateLimit = "10/min".parse().unwrap();
        assert_eq!(rate, RateLimit { count: 10, unit: TimeUnit::Minute });

        let rate: RateLimit = "5/second".parse().unwrap();
        assert_eq!(rate.unit, TimeUnit::Second);
        assert_eq!(rate.to_string(), "5/sec");

        assert!("10".parse::<RateLimit>().is_err());
        assert!("x/min".parse::<RateLimit>().is_err());
        assert!("10/fortnight".parse::<RateLimit>().is_err());
    }

    #[test]
    fn test_policy_serde_uses_rate_spelling() {
        let json = serde_json::to_value(LimitPolicy::default()).unwrap();
        assert_eq!(json["rate"], "10/min");

        let policy: LimitPolicy = serde_json::from_str(r#"{"rate": "5/sec"}"#).unwrap();
        assert_eq!(policy.port, DEFAULT_PORT);
        assert_eq!(policy.burst, 20);
        assert_eq!(policy.rate.unit, TimeUnit::Second);

        assert!(serde_json::from_str::<LimitPolicy>(r#"{"rate": "5/week"}"#).is_err());
    }

    #[test]
    fn test_limit_rule_arguments() {
        let spec = LimitPolicy::default().limit_rule("INPUT", "198.51.100.7");
        assert_eq!(
            spec.command_args("-A").join(" "),
            "-A INPUT -s 198.51.100.7 -p tcp --dport 8081 -m state --state NEW -m hashlimit \
             --hashlimit 10/min --hashlimit-name limit_198.51.100.7 --hashlimit-burst 20 \
             --hashlimit-mode srcip -j ACCEPT"
        );
    }

    #[test]
    fn test_drop_rule_arguments() {
        let spec = LimitPolicy::default().drop_rule("INPUT", "10.0.0.0/24");
        assert_eq!(
            spec.command_args("-D").join(" "),
            "-D INPUT -s 10.0.0.0/24 -p tcp --dport 8081 -j DROP"
        );
    }

    #[test]
    fn test_parse_saved_limit_line() {
        let rule = SavedRule::parse(LIMIT_LINE).unwrap();
        assert_eq!(rule.spec.chain, "INPUT");
        assert_eq!(rule.source.as_deref(), Some("198.51.100.7/32"));
        assert!(rule.source_is("198.51.100.7"));
        assert_eq!(rule.dport.as_deref(), Some("8081"));
        assert_eq!(rule.hashlimit_name.as_deref(), Some("limit_198.51.100.7"));
        assert_eq!(rule.jump.as_deref(), Some("ACCEPT"));
    }

    #[test]
    fn test_parse_ignores_non_rule_lines() {
        assert!(SavedRule::parse("*filter").is_none());
        assert!(SavedRule::parse(":INPUT ACCEPT [0:0]").is_none());
        assert!(SavedRule::parse("COMMIT").is_none());
        assert!(SavedRule::parse("# Generated by iptables-save").is_none());
        assert!(SavedRule::parse("").is_none());
    }

    #[test]
    fn test_negated_source_does_not_match() {
        let rule = SavedRule::parse("-A INPUT ! -s 10.0.0.1/32 -p tcp -j DROP").unwrap();
        assert!(!rule.source_is("10.0.0.1"));
        assert_eq!(rule.protocol.as_deref(), Some("tcp"));
    }

    #[test]
    fn test_source_matches_masked_network() {
        let rule = SavedRule::parse("-A INPUT -s 10.0.0.0/24 -p tcp -m tcp --dport 80 -j DROP").unwrap();
        assert!(rule.source_is("10.0.0.0/24"));
        assert!(rule.source_is("10.0.0.5/24"));
        assert!(!rule.source_is("10.0.0.0/25"));
        assert!(!rule.source_is("10.0.0.5"));

        let host = SavedRule::parse("-A INPUT -s 192.0.2.1/32 -j DROP").unwrap();
        assert!(host.source_is("192.0.2.1"));
        assert!(host.source_is("192.0.2.1/32"));
    }

    #[test]
    fn test_split_quoted_comment() {
        let tokens = split_rule_line(
            r#"-A INPUT -m comment --comment "allow \"office\" vpn" -j ACCEPT"#,
        );
        assert_eq!(tokens[4], "--comment");
        assert_eq!(tokens[5], "allow \"office\" vpn");
        assert_eq!(tokens.last().map(String::as_str), Some("ACCEPT"));
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        let spec = RuleSpec::new("INPUT", ["-m", "comment", "--comment", "two words", "-j", "DROP"]);
        let parsed = SavedRule::parse(&spec.to_string()).unwrap();
        assert_eq!(parsed.spec, spec);
    }

    #[test]
    fn test_delete_form_swaps_only_the_verb() {
        let rule = SavedRule::parse(LIMIT_LINE).unwrap();
        let args = rule.spec.command_args("-D");
        assert_eq!(args[0], "-D");
        assert_eq!(args[1], "INPUT");
        assert_eq!(args[2..], rule.spec.args[..]);
    }
}
