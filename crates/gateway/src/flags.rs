//! Process-wide flags.
//!
//! Mutated by background jobs and admin commands, read on every request.
//! Readers load an immutable snapshot without locking; writers publish a new
//! snapshot atomically.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;

/// Snapshot of the process flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Flags {
    pub health_check_running: bool,
    pub license_expired: bool,
    /// Slow-mode tier while the license is expired (0 mildest, 2 harshest).
    pub license_slow_mode: Option<u8>,
}

/// Copy-on-write holder for [`Flags`].
#[derive(Debug, Default)]
pub struct FlagStore {
    current: ArcSwap<Flags>,
}

impl FlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<Flags> {
        self.current.load_full()
    }

    /// Apply `change` to a copy of the current flags and publish it.
    /// `change` may run more than once under contention. Returns the
    /// snapshot that was replaced.
    pub fn update<F>(&self, change: F) -> Arc<Flags>
    where
        F: Fn(&mut Flags),
    {
        self.current.rcu(|current| {
            let mut next = Flags::clone(current);
            change(&mut next);
            next
        })
    }

    /// Set the health-check flag, or flip it when `running` is `None`.
    /// Returns the value now in effect.
    pub fn set_health_check_running(&self, running: Option<bool>) -> bool {
        let previous = self.update(|flags| {
            flags.health_check_running = running.unwrap_or(!flags.health_check_running)
        });
        running.unwrap_or(!previous.health_check_running)
    }

    pub fn set_license(&self, expired: bool, slow_mode: Option<u8>) {
        self.update(|flags| {
            flags.license_expired = expired;
            flags.license_slow_mode = slow_mode;
        });
    }
}
