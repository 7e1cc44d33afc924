//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::firewall::{DEFAULT_CHAIN, LimitPolicy};
use crate::core::manager::RateLimitManager;
use crate::core::memory::MemoryBackend;
use std::sync::{Arc, Mutex};

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when your test needs to:
/// 1. Temporarily change env vars to different values
/// 2. Restore env vars after the test
/// 3. Test behavior when env vars are absent
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::remove_var("IPLIMIT_TEST_NO_ELEVATION");
///     std::env::set_var("IPLIMIT_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("IPLIMIT_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Manager over a fresh in-memory backend, managing `INPUT`
pub fn memory_manager() -> (Arc<MemoryBackend>, RateLimitManager) {
    memory_manager_with_lines(Vec::<String>::new())
}

/// Manager over an in-memory backend seeded with `iptables-save` lines
pub fn memory_manager_with_lines<I, S>(lines: I) -> (Arc<MemoryBackend>, RateLimitManager)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let backend = Arc::new(MemoryBackend::with_lines(lines));
    let manager = RateLimitManager::new(backend.clone(), DEFAULT_CHAIN);
    (backend, manager)
}

/// The default group settings: port 8081, 10/min, burst 20
pub fn default_policy() -> LimitPolicy {
    LimitPolicy::default()
}

/// Index of the first line containing `needle`
pub fn line_index(lines: &[String], needle: &str) -> Option<usize> {
    lines.iter().position(|line| line.contains(needle))
}
