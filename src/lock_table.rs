// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The versioned lock table (VLT): a fixed-size, striped array of atomic
//! lock words. Every transactable address hashes to exactly one slot; a
//! slot packs a lock bit (bit 0) and a version (bits 1..63) into a single
//! 64-bit word, so a single atomic store can simultaneously release a
//! lock and publish a new version.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of stripes in the lock table. Must be a power of two. Multiple
/// addresses legitimately share a stripe; the protocol tolerates the
/// resulting false conflicts.
pub const NUM_STRIPES: usize = 1 << 20;

/// Number of attempts `Transaction::commit` spends on a single slot
/// before giving up and aborting. Unbounded spinning on the commit path
/// can deadlock two transactions that acquire shared stripes in opposite
/// orders, so the budget must be finite.
pub const COMMIT_LOCK_RETRY_BUDGET: usize = 128;

const LOCK_BIT: u64 = 1;

#[inline]
fn word_locked(word: u64) -> bool {
    word & LOCK_BIT != 0
}

#[inline]
fn word_version(word: u64) -> u64 {
    word >> 1
}

/// A snapshot of one lock word: whether it was locked, and at what
/// version, at the instant it was read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    word: u64,
}

impl Snapshot {
    pub fn is_locked(self) -> bool {
        word_locked(self.word)
    }

    pub fn version(self) -> u64 {
        word_version(self.word)
    }
}

/// The striped table of versioned locks, shared by every transaction
/// opened against one [`crate::Stm`] runtime handle.
pub struct LockTable {
    slots: Box<[AtomicU64]>,
    mask: usize,
}

impl LockTable {
    /// Allocates a table of [`NUM_STRIPES`] slots, all unlocked at
    /// version 0.
    pub fn new() -> Self {
        Self::with_stripes(NUM_STRIPES)
    }

    /// Allocates a table with a caller-chosen stripe count, which must
    /// be a power of two. Tests use this to shrink the table far below
    /// [`NUM_STRIPES`] and deliberately provoke stripe collisions
    /// between otherwise-unrelated addresses.
    ///
    /// # Panics
    ///
    /// Panics if `num_stripes` is zero or not a power of two.
    pub fn with_stripes(num_stripes: usize) -> Self {
        assert!(
            num_stripes > 0 && num_stripes.is_power_of_two(),
            "num_stripes must be a nonzero power of two, got {num_stripes}"
        );
        let mut slots = Vec::with_capacity(num_stripes);
        slots.resize_with(num_stripes, AtomicU64::default);
        Self {
            slots: slots.into_boxed_slice(),
            mask: num_stripes - 1,
        }
    }

    /// Maps an address to its stripe index by shifting out the
    /// word-alignment bits and masking to this table's stripe count.
    #[inline]
    pub fn index(&self, addr: usize) -> usize {
        (addr >> 3) & self.mask
    }

    /// Returns the lock word for `addr`.
    #[inline]
    pub fn slot(&self, addr: usize) -> &AtomicU64 {
        &self.slots[self.index(addr)]
    }

    /// Spins until the lock bit transitions 0→1 under the caller. The
    /// version field is left unchanged. Used only where deadlock is
    /// impossible, i.e. never on the commit path (see
    /// [`COMMIT_LOCK_RETRY_BUDGET`]).
    pub fn acquire(&self, slot: &AtomicU64) {
        loop {
            let current = slot.load(Ordering::Relaxed);
            if word_locked(current) {
                std::hint::spin_loop();
                continue;
            }
            let desired = current | LOCK_BIT;
            if slot
                .compare_exchange_weak(current, desired, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// A single compare-and-swap attempt: sets the lock bit if clear,
    /// leaving the version untouched. Never spins. Returns whether the
    /// attempt succeeded.
    pub fn try_acquire(&self, slot: &AtomicU64) -> bool {
        let current = slot.load(Ordering::Relaxed);
        if word_locked(current) {
            return false;
        }
        let desired = current | LOCK_BIT;
        slot.compare_exchange(current, desired, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Atomically clears the lock bit and publishes `new_version` in a
    /// single store. Caller must hold the lock.
    pub fn release(&self, slot: &AtomicU64, new_version: u64) {
        slot.store(new_version << 1, Ordering::Release);
    }

    /// Clears the lock bit without touching the version. Used to back
    /// out of a partially-acquired write set on an aborted commit, where
    /// the version must stay exactly as it was before this transaction
    /// touched the slot.
    pub fn unlock_unchanged(&self, slot: &AtomicU64) {
        slot.fetch_and(!LOCK_BIT, Ordering::Release);
    }

    /// Reads the version field with relaxed ordering.
    pub fn version(&self, slot: &AtomicU64) -> u64 {
        word_version(slot.load(Ordering::Relaxed))
    }

    /// Reads the lock bit with relaxed ordering.
    pub fn is_locked(&self, slot: &AtomicU64) -> bool {
        word_locked(slot.load(Ordering::Relaxed))
    }

    /// Atomically reads the whole word with acquire ordering, capturing
    /// lock-bit and version together for validation.
    pub fn snapshot(&self, slot: &AtomicU64) -> Snapshot {
        Snapshot {
            word: slot.load(Ordering::Acquire),
        }
    }

    /// Sets every slot back to 0 (unlocked, version 0). Callers must
    /// ensure no transactions are in flight when calling this.
    pub fn clear_all(&self) {
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
