// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transaction state machine: begin, speculative read/write, validate,
//! commit, abort. This is where the global version clock and the versioned
//! lock table meet the per-transaction logs to implement TL2.

use std::ptr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use log::trace;

use crate::clock::GlobalClock;
use crate::error::TxError;
use crate::lock_table::LockTable;
use crate::runtime::Stm;
use crate::stats::Stats;
use crate::tlog::{ReadSet, WriteSet};

/// The lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Committed,
    Aborted,
}

/// One speculative transaction against a [`Stm`] runtime handle.
///
/// Reads and writes address memory by raw pointer and are unsafe: the
/// core has no notion of what type lives at an address, only its byte
/// length, so the caller must uphold the usual validity and lifetime
/// requirements itself.
pub struct Transaction {
    id: u64,
    clock: Arc<GlobalClock>,
    lock_table: Arc<LockTable>,
    stats: Arc<Stats>,
    read_timestamp: u64,
    write_timestamp: u64,
    read_only: bool,
    status: Status,
    read_set: ReadSet,
    write_set: WriteSet,
}

impl Transaction {
    /// Samples the clock as this transaction's read timestamp and opens
    /// fresh, empty logs. Every transaction starts out presumed
    /// read-only; the first `write` flips it.
    pub(crate) fn begin(stm: &Stm) -> Self {
        stm.stats_handle().record_init();
        let read_timestamp = stm.clock().read();
        trace!("tx begin at read_timestamp={}", read_timestamp);
        Self {
            id: read_timestamp,
            clock: Arc::clone(stm.clock()),
            lock_table: Arc::clone(stm.lock_table()),
            stats: Arc::clone(stm.stats_handle()),
            read_timestamp,
            write_timestamp: 0,
            read_only: true,
            status: Status::Active,
            read_set: ReadSet::new(),
            write_set: WriteSet::new(),
        }
    }

    /// An opaque identifier for this transaction, stable for its whole
    /// lifetime. Currently the read timestamp it began at; callers must
    /// not rely on that beyond uniqueness-for-logging purposes.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The write timestamp assigned at commit, or 0 if this transaction
    /// has not yet committed a non-empty write set.
    pub fn write_timestamp(&self) -> u64 {
        self.write_timestamp
    }

    /// Speculatively reads `dst.len()` bytes from `src` into `dst`.
    ///
    /// Consults this transaction's own write set first, so a location
    /// already written earlier in the same transaction reads back its
    /// buffered value rather than the memory behind `src` (read-your-own-
    /// writes). Otherwise, the read is validated against the lock table
    /// both before and after the copy: if the slot is locked by another
    /// transaction, or its version is newer than this transaction's read
    /// timestamp, at either check, the read (and therefore the
    /// transaction) must be aborted and retried.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `dst.len()` bytes for the
    /// duration of this call.
    pub unsafe fn read(&mut self, dst: &mut [u8], src: *const u8) -> Result<(), TxError> {
        if self.status != Status::Active {
            return Err(TxError::NotActive);
        }
        if dst.is_empty() {
            return Err(TxError::ZeroSizedAccess);
        }
        if src.is_null() {
            return Err(TxError::NullAddress);
        }

        let addr = src as usize;

        if !self.write_set.is_empty() {
            if let Some(entry) = self.write_set.lookup(addr) {
                if entry.size() != dst.len() {
                    return Err(TxError::SizeMismatch);
                }
                dst.copy_from_slice(entry.bytes());
                return Ok(());
            }
        }

        let slot = self.lock_table.slot(addr);
        let pre = self.lock_table.snapshot(slot);
        if pre.is_locked() || pre.version() > self.read_timestamp {
            return self.conflict();
        }

        ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());

        let post = self.lock_table.snapshot(slot);
        if post.is_locked() || post.version() != pre.version() || post.version() > self.read_timestamp
        {
            return self.conflict();
        }

        self.read_set.append(addr);
        Ok(())
    }

    /// Speculatively writes `bytes` as the new value of `dst`. The write
    /// is only buffered in this transaction's write set; it becomes
    /// visible to other transactions only if and when `commit` succeeds.
    ///
    /// # Safety
    ///
    /// `dst`'s identity is used only as an address key; no memory is
    /// touched until a successful `commit`, at which point `dst` must be
    /// valid for writes of `bytes.len()` bytes.
    pub unsafe fn write(&mut self, dst: *mut u8, bytes: &[u8]) -> Result<(), TxError> {
        if self.status != Status::Active {
            return Err(TxError::NotActive);
        }
        if bytes.is_empty() {
            return Err(TxError::ZeroSizedAccess);
        }
        if dst.is_null() {
            return Err(TxError::NullAddress);
        }
        self.read_only = false;
        self.write_set.add(dst as usize, bytes);
        Ok(())
    }

    /// Validates and, if successful, publishes this transaction's write
    /// set. A read-only transaction (no writes were ever buffered)
    /// commits unconditionally, since its read set was already validated
    /// incrementally by every `read` call.
    ///
    /// A transaction with a non-empty write set:
    ///
    /// 1. Locks every write-set slot, bounded by
    ///    [`crate::lock_table::COMMIT_LOCK_RETRY_BUDGET`] attempts per
    ///    slot; failure to lock any slot aborts the whole commit and
    ///    releases every lock already held, unchanged.
    /// 2. Advances the global clock to obtain a write timestamp.
    /// 3. Re-validates the read set: every entry must still be at or
    ///    below the read timestamp and not locked by another
    ///    transaction (this step is skipped when the write timestamp is
    ///    exactly one past the read timestamp, since no other
    ///    transaction could have committed in between).
    /// 4. Applies every buffered write to memory.
    /// 5. Releases every write-set lock, publishing the write timestamp
    ///    as the new version of each slot.
    pub fn commit(&mut self) -> Result<(), TxError> {
        if self.status != Status::Active {
            return Err(TxError::NotActive);
        }

        if self.read_only {
            self.status = Status::Committed;
            self.stats.record_commit();
            self.read_set.reset();
            self.write_set.reset();
            return Ok(());
        }

        let mut locked: Vec<&AtomicU64> = Vec::with_capacity(self.write_set.len());
        for entry in self.write_set.iter() {
            let slot = self.lock_table.slot(entry.addr());

            // Two addresses in the same write set can hash to the same
            // stripe. Locking it twice would have this thread spin against
            // its own already-set lock bit until the retry budget runs out,
            // which no amount of retrying ever fixes.
            if locked.iter().any(|held| std::ptr::eq(*held, slot)) {
                continue;
            }

            let mut acquired = false;
            for _ in 0..crate::lock_table::COMMIT_LOCK_RETRY_BUDGET {
                if self.lock_table.try_acquire(slot) {
                    acquired = true;
                    break;
                }
                std::hint::spin_loop();
            }
            if !acquired {
                for held in &locked {
                    self.lock_table.unlock_unchanged(held);
                }
                return self.conflict();
            }
            locked.push(slot);
        }

        let write_timestamp = self.clock.increment_and_fetch();
        self.write_timestamp = write_timestamp;

        if write_timestamp != self.read_timestamp + 1 {
            for entry in self.read_set.iter() {
                let slot = self.lock_table.slot(entry.addr);
                let snap = self.lock_table.snapshot(slot);
                if snap.is_locked() || snap.version() > self.read_timestamp {
                    for held in &locked {
                        self.lock_table.unlock_unchanged(held);
                    }
                    return self.conflict();
                }
            }
        }

        for entry in self.write_set.iter() {
            unsafe {
                ptr::copy_nonoverlapping(entry.bytes().as_ptr(), entry.addr() as *mut u8, entry.size());
            }
        }

        for slot in &locked {
            self.lock_table.release(slot, write_timestamp);
        }

        self.status = Status::Committed;
        self.stats.record_commit();
        self.read_set.reset();
        self.write_set.reset();
        Ok(())
    }

    /// Abandons this transaction without publishing any of its buffered
    /// writes. Idempotent-ish in effect: calling `commit` afterward
    /// returns [`TxError::NotActive`].
    pub fn abort(&mut self) {
        if self.status == Status::Active {
            self.stats.record_abort();
        }
        self.status = Status::Aborted;
        self.read_set.reset();
        self.write_set.reset();
    }

    /// Aborts this transaction, if still active, and reopens it in
    /// place with a fresh read timestamp and empty logs.
    pub fn restart(&mut self) {
        self.abort();
        self.stats.record_restart();
        self.read_timestamp = self.clock.read();
        self.write_timestamp = 0;
        self.id = self.read_timestamp;
        self.read_only = true;
        self.status = Status::Active;
    }

    fn conflict<T>(&mut self) -> Result<T, TxError> {
        self.status = Status::Aborted;
        self.stats.record_abort();
        self.read_set.reset();
        self.write_set.reset();
        Err(TxError::Conflict)
    }
}
