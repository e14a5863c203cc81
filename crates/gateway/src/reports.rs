//! In-process usage counters, flushed to the persistence layer by the
//! report job.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub const REQUESTS_OK: &str = "requests_ok";
pub const REQUESTS_ERR: &str = "requests_err";
pub const REQUESTS_NOT_AUTHORIZED: &str = "requests_not_authorized";
pub const REQUESTS_NOT_IMPLEMENTED: &str = "requests_not_implemented";
pub const POSTS_ADDED: &str = "posts_added";
pub const PUSHES_SENT: &str = "pushes_sent";
pub const WS_CONNECTS: &str = "ws_connects";
pub const WS_DISCONNECTS: &str = "ws_disconnects";

#[derive(Debug, Default)]
pub struct Reporter {
    counters: Mutex<HashMap<String, u64>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn incr(&self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&self, key: &str, n: u64) {
        if n == 0 {
            return;
        }
        *self.lock().entry(key.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    /// Take all counters, leaving the reporter empty.
    pub fn drain(&self) -> HashMap<String, u64> {
        std::mem::take(&mut *self.lock())
    }

    /// Put counters back after a failed flush.
    pub fn restore(&self, counters: HashMap<String, u64>) {
        let mut current = self.lock();
        for (key, n) in counters {
            *current.entry(key).or_insert(0) += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_resets() {
        let reporter = Reporter::new();
        reporter.incr(REQUESTS_OK);
        reporter.incr(REQUESTS_OK);
        reporter.add(POSTS_ADDED, 3);

        let drained = reporter.drain();
        assert_eq!(drained.get(REQUESTS_OK), Some(&2));
        assert_eq!(drained.get(POSTS_ADDED), Some(&3));
        assert_eq!(reporter.get(REQUESTS_OK), 0);
    }

    #[test]
    fn test_restore_merges() {
        let reporter = Reporter::new();
        reporter.incr(REQUESTS_ERR);
        let drained = reporter.drain();
        reporter.incr(REQUESTS_ERR);
        reporter.restore(drained);
        assert_eq!(reporter.get(REQUESTS_ERR), 2);
    }
}
