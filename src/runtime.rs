// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The runtime handle: owns the global version clock, the versioned lock
//! table, and the statistics counters for one STM universe. Clone is
//! cheap (it clones three `Arc`s) and every clone refers to the same
//! underlying clock and lock table, so sharing a handle across threads
//! reproduces a process-wide singleton while still letting independent
//! tests build their own, fully isolated universes.

use std::sync::Arc;

use crate::clock::GlobalClock;
use crate::error::TxError;
use crate::lock_table::LockTable;
use crate::stats::{Stats, StatsSnapshot};
use crate::transaction::Transaction;

use log::{debug, trace};

/// Tunable parameters for a runtime handle. The defaults match the
/// reference constants; tests that want to provoke stripe collisions
/// deliberately can shrink `num_stripes` far below the default.
#[derive(Debug, Clone, Copy)]
pub struct StmConfig {
    num_stripes: usize,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self {
            num_stripes: crate::lock_table::NUM_STRIPES,
        }
    }
}

impl StmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock table's stripe count. Must be a nonzero power of
    /// two; validated when the config is used to build a [`Stm`].
    pub fn num_stripes(mut self, num_stripes: usize) -> Self {
        self.num_stripes = num_stripes;
        self
    }
}

/// Owns one STM universe's global version clock and versioned lock
/// table. Construct one with [`Stm::core_init`] and share it (by
/// `clone`) with every thread that should transact against the same
/// memory.
#[derive(Clone)]
pub struct Stm {
    clock: Arc<GlobalClock>,
    lock_table: Arc<LockTable>,
    stats: Arc<Stats>,
}

impl Default for Stm {
    fn default() -> Self {
        Self::core_init()
    }
}

impl Stm {
    /// Initializes the global version clock and allocates the versioned
    /// lock table with the reference stripe count. Analogous to the
    /// original `gvc_init` + `vlock_init` pair, bundled under one owning
    /// handle.
    pub fn core_init() -> Self {
        Self::with_config(StmConfig::default())
    }

    /// Initializes a runtime handle with a caller-chosen configuration,
    /// e.g. a shrunk lock table for tests that want to exercise stripe
    /// collisions deliberately (see [`StmConfig::num_stripes`]).
    ///
    /// # Panics
    ///
    /// Panics if `config.num_stripes` is not a nonzero power of two.
    pub fn with_config(config: StmConfig) -> Self {
        Self {
            clock: Arc::new(GlobalClock::new()),
            lock_table: Arc::new(LockTable::with_stripes(config.num_stripes)),
            stats: Arc::new(Stats::new()),
        }
    }

    /// Clears every lock table slot back to unlocked/version-0.
    /// Callers must ensure no transactions are in flight.
    pub fn core_shutdown(&self) {
        self.lock_table.clear_all();
    }

    /// Resets both the clock and the lock table to their initial state,
    /// without reallocating. Callers must ensure no transactions are in
    /// flight. After this call, every slot reads 0 and the clock reads 0.
    pub fn reinit(&self) {
        self.clock.init();
        self.lock_table.clear_all();
    }

    /// The current clock value, with no ordering guarantees. For
    /// diagnostics; do not use for validation.
    pub fn clock_value(&self) -> u64 {
        self.clock.relaxed_get()
    }

    /// A snapshot of the lifecycle counters (inits, commits, aborts,
    /// restarts).
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn clock(&self) -> &Arc<GlobalClock> {
        &self.clock
    }

    pub(crate) fn lock_table(&self) -> &Arc<LockTable> {
        &self.lock_table
    }

    pub(crate) fn stats_handle(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Opens a fresh, active transaction against this runtime.
    pub fn begin(&self) -> Transaction {
        Transaction::begin(self)
    }

    /// The begin/try-commit/restart convenience loop (§6.6): invokes
    /// `body` against a freshly-begun transaction, retrying transparently
    /// on [`TxError::Conflict`] and propagating any other error
    /// immediately. `body` must be idempotent across retries: it is run
    /// from scratch, against a fresh `Transaction`, on every attempt.
    pub fn atomically<F, T>(&self, mut body: F) -> Result<T, TxError>
    where
        F: FnMut(&mut Transaction) -> Result<T, TxError>,
    {
        loop {
            let mut tx = self.begin();
            match body(&mut tx) {
                Ok(value) => match tx.commit() {
                    Ok(()) => return Ok(value),
                    Err(TxError::Conflict) => {
                        trace!("atomically: commit conflict, restarting");
                        continue;
                    }
                    Err(other) => return Err(other),
                },
                Err(TxError::Conflict) => {
                    debug!("atomically: speculative execution aborted, restarting");
                    tx.abort();
                    continue;
                }
                Err(other) => {
                    tx.abort();
                    return Err(other);
                }
            }
        }
    }
}
