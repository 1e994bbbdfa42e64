// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction read and write logs (TLOG). The read set is an
//! append-only log tolerating duplicates; the write set is a keyed log
//! (at most one entry per address) fronted by a Bloom filter so a read
//! that never touched the write set can skip scanning it entirely.

use crate::bloom::Bloom;

/// Values up to this many bytes are buffered inline inside a
/// [`WriteEntry`]; larger values spill to a heap-allocated overflow
/// buffer.
pub const INLINE_CAP: usize = 32;

/// Initial read-set capacity.
pub const READ_SET_INIT_CAPACITY: usize = 16;

/// Initial write-set capacity.
pub const WRITE_SET_INIT_CAPACITY: usize = 32;

/// One speculative read: the address consulted. The slot is re-derived
/// from the address in O(1) when needed rather than stored as a raw
/// pointer alongside it.
#[derive(Debug, Clone, Copy)]
pub struct ReadEntry {
    pub addr: usize,
}

/// One buffered speculative write: the target address, the logical size
/// of the value, and its bytes (inline for `size <= INLINE_CAP`, on the
/// heap otherwise).
#[derive(Debug)]
pub struct WriteEntry {
    addr: usize,
    size: usize,
    inline: [u8; INLINE_CAP],
    heap: Option<Vec<u8>>,
}

impl WriteEntry {
    fn new(addr: usize) -> Self {
        Self {
            addr,
            size: 0,
            inline: [0u8; INLINE_CAP],
            heap: None,
        }
    }

    fn set(&mut self, bytes: &[u8]) {
        self.size = bytes.len();
        if bytes.len() <= INLINE_CAP {
            self.inline[..bytes.len()].copy_from_slice(bytes);
            self.heap = None;
        } else {
            self.heap = Some(bytes.to_vec());
        }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The buffered value. Transparent to the caller whether it came
    /// from the inline buffer or the heap overflow.
    pub fn bytes(&self) -> &[u8] {
        match &self.heap {
            Some(v) => &v[..self.size],
            None => &self.inline[..self.size],
        }
    }
}

/// The append-only log of speculative reads for one transaction.
#[derive(Debug, Default)]
pub struct ReadSet {
    entries: Vec<ReadEntry>,
}

impl ReadSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(READ_SET_INIT_CAPACITY),
        }
    }

    /// Appends a speculative read. Duplicates are permitted: correctness
    /// does not require de-duplication, only a bounded size proportional
    /// to the transaction's distinct reads.
    pub fn append(&mut self, addr: usize) {
        self.entries.push(ReadEntry { addr });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frees the entries and restores the log to its post-`new` state.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

/// The keyed log of speculative writes for one transaction, with a
/// Bloom filter over its addresses for a fast negative lookup.
#[derive(Debug)]
pub struct WriteSet {
    entries: Vec<WriteEntry>,
    bloom: Bloom,
}

impl Default for WriteSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(WRITE_SET_INIT_CAPACITY),
            bloom: Bloom::new(),
        }
    }

    /// Returns the entry for `addr`, if any. The Bloom filter fast path
    /// skips the linear scan when `addr` was definitely never inserted.
    pub fn lookup(&self, addr: usize) -> Option<&WriteEntry> {
        if !self.bloom.maybe_contains(addr) {
            return None;
        }
        self.entries.iter().find(|e| e.addr == addr)
    }

    /// Buffers `bytes` as the speculative new value for `addr`. A second
    /// write to an address already present overwrites its value and
    /// size; the entry array grows (doubling, via `Vec`'s own growth)
    /// when it needs to.
    pub fn add(&mut self, addr: usize, bytes: &[u8]) {
        if let Some(pos) = self.entries.iter().position(|e| e.addr == addr) {
            self.entries[pos].set(bytes);
            return;
        }
        let mut entry = WriteEntry::new(addr);
        entry.set(bytes);
        self.bloom.insert(addr);
        self.entries.push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frees every overflow buffer and the entry array, and resets the
    /// Bloom filter, restoring the log to its post-`new` state.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.bloom.clear();
    }
}
