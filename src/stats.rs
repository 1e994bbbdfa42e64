// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Transaction lifecycle counters. A pure observer: removing this module
//! entirely would not change the outcome of a single test in this crate.

use std::sync::atomic::{AtomicU64, Ordering};

/// Side-effect-only counters for transaction inits, commits, aborts, and
/// restarts. One instance is owned by each [`crate::Stm`] runtime handle
/// and shared by every transaction opened against it.
#[derive(Debug, Default)]
pub struct Stats {
    inits: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    restarts: AtomicU64,
}

/// A point-in-time copy of the counters in [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub inits: u64,
    pub commits: u64,
    pub aborts: u64,
    pub restarts: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_init(&self) {
        self.inits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a relaxed snapshot of all four counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inits: self.inits.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let stats = Stats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn counters_increment_independently() {
        let stats = Stats::new();
        stats.record_init();
        stats.record_init();
        stats.record_commit();
        stats.record_abort();
        stats.record_abort();
        stats.record_abort();
        stats.record_restart();

        let snap = stats.snapshot();
        assert_eq!(snap.inits, 2);
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.aborts, 3);
        assert_eq!(snap.restarts, 1);
    }
}
