// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A sorted singly-linked list built directly on the raw core API, to
//! exercise multi-node transactions (a sorted insert touches however
//! many nodes it walks past) and a concurrent pop against concurrent
//! inserts.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stm::{Stm, Transaction, TxError};
use threadpool::ThreadPool;

#[cfg(feature = "verbose")]
#[ctor::ctor]
fn init_logging() {
    env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .init();
}

const NIL: usize = usize::MAX;

/// A node slab: `next[i]` holds the index of the node following node
/// `i`, or `NIL`. `head` holds the index of the first live node, or
/// `NIL` for an empty list. Every slot is transactable memory; the
/// slab itself never grows once allocated.
struct Slab {
    key: Vec<UnsafeCell<u64>>,
    next: Vec<UnsafeCell<usize>>,
    head: UnsafeCell<usize>,
    free: AtomicUsize,
}

unsafe impl Sync for Slab {}

impl Slab {
    fn new(capacity: usize) -> Self {
        Self {
            key: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
            next: (0..capacity).map(|_| UnsafeCell::new(NIL)).collect(),
            head: UnsafeCell::new(NIL),
            free: AtomicUsize::new(0),
        }
    }

    fn alloc(&self) -> usize {
        self.free.fetch_add(1, Ordering::Relaxed)
    }

    fn head_ptr(&self) -> *mut u8 {
        self.head.get() as *mut u8
    }

    fn next_ptr(&self, node: usize) -> *mut u8 {
        self.next[node].get() as *mut u8
    }

    fn key_ptr(&self, node: usize) -> *mut u8 {
        self.key[node].get() as *mut u8
    }

    fn snapshot_keys(&self) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = unsafe { *self.head.get() };
        while cur != NIL {
            out.push(unsafe { *self.key[cur].get() });
            cur = unsafe { *self.next[cur].get() };
        }
        out
    }
}

fn read_usize(tx: &mut Transaction, ptr: *const u8) -> Result<usize, TxError> {
    let mut buf = [0u8; std::mem::size_of::<usize>()];
    unsafe {
        tx.read(&mut buf, ptr)?;
    }
    Ok(usize::from_ne_bytes(buf))
}

fn write_usize(tx: &mut Transaction, ptr: *mut u8, value: usize) -> Result<(), TxError> {
    unsafe { tx.write(ptr, &value.to_ne_bytes()) }
}

fn read_u64(tx: &mut Transaction, ptr: *const u8) -> Result<u64, TxError> {
    let mut buf = [0u8; 8];
    unsafe {
        tx.read(&mut buf, ptr)?;
    }
    Ok(u64::from_ne_bytes(buf))
}

fn write_u64(tx: &mut Transaction, ptr: *mut u8, value: u64) -> Result<(), TxError> {
    unsafe { tx.write(ptr, &value.to_ne_bytes()) }
}

/// Walks from `head`, transactionally, until it finds the slot to
/// splice `node` into so the list stays sorted by key, then splices it.
fn sorted_insert(stm: &Stm, slab: &Slab, node: usize, key: u64) {
    stm.atomically(|tx| {
        write_u64(tx, slab.key_ptr(node), key)?;

        let mut prev_ptr = slab.head_ptr();
        let mut cur = read_usize(tx, prev_ptr)?;

        while cur != NIL {
            let cur_key = read_u64(tx, slab.key_ptr(cur))?;
            if cur_key >= key {
                break;
            }
            prev_ptr = slab.next_ptr(cur);
            cur = read_usize(tx, prev_ptr)?;
        }

        write_usize(tx, slab.next_ptr(node), cur)?;
        write_usize(tx, prev_ptr, node)?;
        Ok(())
    })
    .expect("sorted insert should eventually commit");
}

/// Removes the head node, if any, returning its key.
fn pop_front(stm: &Stm, slab: &Slab) -> Option<u64> {
    stm.atomically(|tx| {
        let head = read_usize(tx, slab.head_ptr())?;
        if head == NIL {
            return Ok(None);
        }
        let key = read_u64(tx, slab.key_ptr(head))?;
        let next = read_usize(tx, slab.next_ptr(head))?;
        write_usize(tx, slab.head_ptr(), next)?;
        Ok(Some(key))
    })
    .expect("pop should eventually commit")
}

#[test]
fn concurrent_sorted_insert_and_pop() {
    const INSERTERS: usize = 4;
    const KEYS_PER_INSERTER: usize = 100;
    const POPS: usize = 15;

    let stm = Stm::core_init();
    let slab = Arc::new(Slab::new(INSERTERS * KEYS_PER_INSERTER));
    let pool = ThreadPool::new(INSERTERS + 1);

    let mut inserted = Vec::new();
    for worker in 0..INSERTERS {
        let mut rng = StdRng::seed_from_u64(worker as u64 + 1);
        let keys: Vec<u64> = (0..KEYS_PER_INSERTER)
            .map(|_| rng.gen_range(1..=100))
            .collect();
        inserted.extend_from_slice(&keys);

        let stm = stm.clone();
        let slab = slab.clone();
        pool.execute(move || {
            for key in keys {
                let node = slab.alloc();
                sorted_insert(&stm, &slab, node, key);
            }
        });
    }

    let (result_tx, result_rx) = std::sync::mpsc::channel();
    {
        let stm = stm.clone();
        let slab = slab.clone();
        pool.execute(move || {
            let mut local = Vec::new();
            for _ in 0..POPS {
                std::thread::yield_now();
                if let Some(key) = pop_front(&stm, &slab) {
                    local.push(key);
                }
            }
            result_tx.send(local).unwrap();
        });
    }

    pool.join();
    let popped = result_rx.recv().unwrap_or_default();

    let remaining = slab.snapshot_keys();
    assert!(remaining.windows(2).all(|w| w[0] <= w[1]), "list must stay sorted");
    assert_eq!(remaining.len(), INSERTERS * KEYS_PER_INSERTER - popped.len());
    assert!(popped.len() <= POPS);

    let mut all_accounted: Vec<u64> = remaining.clone();
    all_accounted.extend(popped.iter().copied());
    all_accounted.sort_unstable();
    let mut expected = inserted.clone();
    expected.sort_unstable();
    assert_eq!(all_accounted, expected);
}
