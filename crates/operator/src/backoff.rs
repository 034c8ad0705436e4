//! Per-object exponential requeue delay used by the default error policy.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::client::NamespacedName;

pub const BASE_DELAY: Duration = Duration::from_millis(5);
pub const MAX_DELAY: Duration = Duration::from_secs(1000);

#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    last: Instant,
}

/// Failure counts keyed by object. An entry whose object has not failed for twice the maximum
/// delay is dropped, since any object still failing is retried within the maximum delay.
#[derive(Debug)]
pub struct RequeueBackoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<NamespacedName, Failures>>,
}

impl Default for RequeueBackoff {
    fn default() -> Self { Self::new(BASE_DELAY, MAX_DELAY) }
}

impl RequeueBackoff {
    pub fn new(base: Duration, max: Duration) -> Self { Self { base, max, failures: Mutex::new(HashMap::new()) } }

    fn table(&self) -> MutexGuard<'_, HashMap<NamespacedName, Failures>> { self.failures.lock().unwrap_or_else(|p| p.into_inner()) }

    /// Records one more failure for `key` and returns the delay before the next attempt.
    pub fn next_delay(&self, key: &NamespacedName) -> Duration {
        let now = Instant::now();
        let stale_after = self.max.saturating_mul(2);
        let mut table = self.table();
        table.retain(|_, f| now.saturating_duration_since(f.last) <= stale_after);
        let entry = table.entry(key.clone()).or_insert(Failures { count: 0, last: now });
        let exp = entry.count;
        entry.count = entry.count.saturating_add(1);
        entry.last = now;
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |d| d.min(self.max))
    }

    pub fn forget(&self, key: &NamespacedName) { self.table().remove(key); }

    pub fn failures(&self, key: &NamespacedName) -> u32 { self.table().get(key).map_or(0, |f| f.count) }

    /// Objects currently tracked.
    pub fn len(&self) -> usize { self.table().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
