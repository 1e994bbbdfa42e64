// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The global version clock (GVC): a single monotonically non-decreasing
//! counter shared by every transaction running against one [`crate::Stm`]
//! runtime handle.
//!
//! Read paths use acquire ordering so they observe every write published
//! before the most recent advance; the commit path uses release ordering
//! so its writes are visible to anyone who later observes the new clock
//! value through [`GlobalClock::read`].

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic clock providing the total order TL2 validates transactions
/// against. One instance is owned by each [`crate::Stm`] runtime handle.
#[derive(Debug, Default)]
pub struct GlobalClock {
    counter: AtomicU64,
}

impl GlobalClock {
    /// Creates a clock starting at 0.
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Resets the clock to 0. Callers must ensure no transactions are in
    /// flight against the owning runtime handle when calling this.
    pub fn init(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }

    /// Returns the current value with acquire semantics.
    pub fn read(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Returns the current value with no ordering guarantees. For
    /// statistics and debugging only; never use this for validation.
    pub fn relaxed_get(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Atomically advances the clock by 1 and returns the new value with
    /// release semantics, publishing every write the caller made before
    /// this call to anyone who later observes the returned value.
    pub fn increment_and_fetch(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Release) + 1
    }
}
