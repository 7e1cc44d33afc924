//! Per-target advisory locks
//!
//! Serializes this process's own check-then-install and removal sequences
//! for the same target. Other actors editing the rule set are not affected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `target`; released when the guard drops
    pub async fn lock(&self, target: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(target.to_string()).or_default())
        };
        entry.lock_owned().await
    }

    /// Number of targets currently locked or awaited
    #[cfg(test)]
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}
