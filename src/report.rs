//! Top-talkers report over the mirror access log
//!
//! Counts requests per client address for the current hour. The access log is
//! in common/combined log format: the client address is the first field and
//! the timestamp carries a `[dd/Mon/yyyy:HH:MM:SS zone]` stamp.

use crate::core::error::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Requests seen from one client address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkerCount {
    pub ip: String,
    pub count: u64,
}

/// Log stamp of the hour containing `now`, e.g. `25/Aug/2024:15`
pub fn hour_stamp(now: &DateTime<Local>) -> String {
    now.format("%d/%b/%Y:%H").to_string()
}

/// Running per-address counts for one hour stamp
#[derive(Debug)]
pub struct TalkerCounter {
    stamp: String,
    counts: HashMap<String, u64>,
}

impl TalkerCounter {
    pub fn new(stamp: impl Into<String>) -> Self {
        Self {
            stamp: stamp.into(),
            counts: HashMap::new(),
        }
    }

    /// Counts the line's first field if the line carries the stamp
    pub fn observe(&mut self, line: &str) {
        if !line.contains(&self.stamp) {
            return;
        }
        if let Some(ip) = line.split_whitespace().next() {
            match self.counts.get_mut(ip) {
                Some(count) => *count += 1,
                None => {
                    self.counts.insert(ip.to_string(), 1);
                }
            }
        }
    }

    /// Top `limit` addresses, by descending count then address ascending
    pub fn top(self, limit: usize) -> Vec<TalkerCount> {
        let mut talkers: Vec<TalkerCount> = self
            .counts
            .into_iter()
            .map(|(ip, count)| TalkerCount { ip, count })
            .collect();
        talkers.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
        talkers.truncate(limit);
        talkers
    }
}

/// Top `limit` first fields among lines containing `stamp`.
///
/// Ordered by descending count, ties by address ascending.
pub fn top_talkers(log: &str, stamp: &str, limit: usize) -> Vec<TalkerCount> {
    let mut counter = TalkerCounter::new(stamp);
    for line in log.lines() {
        counter.observe(line);
    }
    counter.top(limit)
}

/// Streams the access log and reports the top talkers of the hour
/// containing `now`.
///
/// Lines are read one at a time; bytes that are not UTF-8 are replaced
/// rather than failing the report.
///
/// # Errors
///
/// Returns `Err` if the log cannot be opened or read.
pub async fn hourly_report(
    access_log: &Path,
    limit: usize,
    now: DateTime<Local>,
) -> Result<Vec<TalkerCount>> {
    let file = File::open(access_log).await?;
    let mut reader = BufReader::new(file);
    let stamp = hour_stamp(&now);
    debug!("Scanning {} for {stamp}", access_log.display());

    let mut counter = TalkerCounter::new(stamp.as_str());
    let mut buf = Vec::with_capacity(512);
    let mut scanned = 0_u64;
    while reader.read_until(b'\n', &mut buf).await? > 0 {
        counter.observe(&String::from_utf8_lossy(&buf));
        scanned += 1;
        buf.clear();
    }

    let talkers = counter.top(limit);
    info!("Top talkers for {stamp}: {} entries from {scanned} lines", talkers.len());
    Ok(talkers)
}
